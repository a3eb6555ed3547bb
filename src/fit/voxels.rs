//! Fit many voxels with one optimizer.
//!
//! Voxels are independent problems that share the read-only optimizer state
//! (scheme, kernels, positivity matrix), so they are solved in parallel.
//! Results come back in input order.

use rayon::prelude::*;
use tracing::{info, warn};

use crate::domain::SolveStatus;
use crate::error::CsdError;
use crate::fit::csd::{CsdFit, CsdOptimizer};

/// Deconvolve every signal vector with the same initial guess.
///
/// The first failing voxel aborts the whole batch.
pub fn fit_voxels(
    optimizer: &CsdOptimizer<'_>,
    signals: &[Vec<f64>],
    x0: &[Option<f64>],
) -> Result<Vec<CsdFit>, CsdError> {
    let fits: Vec<CsdFit> = signals
        .par_iter()
        .map(|signal| optimizer.fit_detailed(signal, x0))
        .collect::<Result<_, _>>()?;

    let unconverged = fits
        .iter()
        .filter(|f| f.status != SolveStatus::Solved)
        .count();
    info!(voxels = fits.len(), unconverged, "fitted voxels");
    if unconverged > 0 {
        warn!(unconverged, "some voxels hit the iteration limit; their fits are inaccurate");
    }

    Ok(fits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ModelKind;
    use crate::fit::qp::SolverOptions;
    use crate::math::hemisphere;
    use crate::models::MultiCompartmentModel;
    use crate::scheme::{AcquisitionScheme, SchemeOptions};
    use approx::assert_abs_diff_eq;

    #[test]
    fn results_keep_input_order() {
        let dirs = hemisphere(1);
        let bvalues = vec![1e9; dirs.len()];
        let scheme = AcquisitionScheme::from_bvalues(bvalues, dirs, &SchemeOptions::default()).unwrap();

        let d = 1e-9;
        let mut model = MultiCompartmentModel::from_kinds(&[ModelKind::Ball], 0).unwrap();
        model.set_fixed_parameter("G1Ball_1_lambda_iso", vec![d]).unwrap();
        let opt = CsdOptimizer::new(&scheme, &model, 0, false).unwrap();

        let base = (-1e9 * d).exp();
        let scales = [0.2, 0.5, 0.9, 0.4];
        let signals: Vec<Vec<f64>> = scales
            .iter()
            .map(|s| vec![s * base; scheme.number_of_measurements()])
            .collect();

        let fits = fit_voxels(&opt, &signals, &model.initial_guess()).unwrap();
        assert_eq!(fits.len(), scales.len());
        for (fit, s) in fits.iter().zip(scales.iter()) {
            assert_abs_diff_eq!(fit.volume_fractions[0], *s, epsilon = 1e-4);
        }
    }

    #[test]
    fn one_bad_voxel_fails_the_batch() {
        let dirs = hemisphere(1);
        let bvalues = vec![1e9; dirs.len()];
        let scheme = AcquisitionScheme::from_bvalues(bvalues, dirs, &SchemeOptions::default()).unwrap();
        let mut model = MultiCompartmentModel::from_kinds(&[ModelKind::Ball], 0).unwrap();
        model.set_fixed_parameter("G1Ball_1_lambda_iso", vec![1e-9]).unwrap();
        let opt = CsdOptimizer::new(&scheme, &model, 0, false).unwrap();

        let n = scheme.number_of_measurements();
        let signals = vec![vec![0.5; n], vec![0.5; n - 1]];
        assert!(fit_voxels(&opt, &signals, &model.initial_guess()).is_err());
    }

    #[test]
    fn unconverged_voxels_are_returned_with_their_status() {
        let dirs = hemisphere(2);
        let bvalues = vec![2e9; dirs.len()];
        let scheme = AcquisitionScheme::from_bvalues(bvalues, dirs.clone(), &SchemeOptions::default()).unwrap();
        let mut model = MultiCompartmentModel::from_kinds(&[ModelKind::Stick], 4).unwrap();
        model.set_fixed_parameter("C1Stick_1_lambda_par", vec![1.7e-9]).unwrap();
        let solver = SolverOptions {
            max_iter: 1,
            ..SolverOptions::default()
        };
        let opt = CsdOptimizer::with_options(&scheme, &model, 4, true, solver).unwrap();

        let signal: Vec<f64> = dirs.iter().map(|g| (-2e9 * 1.7e-9 * g[2] * g[2]).exp()).collect();
        let fits = fit_voxels(&opt, &[signal.clone(), signal], &model.initial_guess()).unwrap();
        assert_eq!(fits.len(), 2);
        assert!(fits.iter().all(|f| f.status == SolveStatus::MaxIterations));
    }
}
