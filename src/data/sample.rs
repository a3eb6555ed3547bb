//! Synthetic signal generation.
//!
//! Signals are forward-simulated from compartment kernels: oriented kernels
//! are evaluated at the angle between each gradient and the compartment's
//! fiber direction, isotropic kernels ignore direction. Compartments are mixed
//! by volume fraction, then optional Rician noise is added:
//!
//! `S_noisy = sqrt((S + σ n₁)² + (σ n₂)²)`, `σ = 1 / SNR`, `n₁, n₂ ~ N(0, 1)`.

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::domain::{FitRequest, ModelKind, ParameterMap, SimulateConfig};
use crate::error::CsdError;
use crate::math::{dot, hemisphere, normalize};
use crate::models::{CompartmentModel, build_model};
use crate::scheme::{AcquisitionScheme, SchemeOptions};

/// Icosphere subdivisions for simulated gradient tables (81 directions per shell).
const GRADIENT_SUBDIVISIONS: usize = 2;

/// One compartment of a simulated voxel.
#[derive(Debug)]
pub struct SimulatedCompartment {
    pub model: Box<dyn CompartmentModel>,
    /// Kernel parameters under their local names.
    pub parameters: ParameterMap,
    /// Fiber direction; ignored for isotropic kernels.
    pub orientation: Option<[f64; 3]>,
    pub fraction: f64,
}

/// Noise-free mixture signal for every measurement of `scheme`.
pub fn simulate_signal(
    scheme: &AcquisitionScheme,
    compartments: &[SimulatedCompartment],
) -> Result<Vec<f64>, CsdError> {
    let mut signal = vec![0.0; scheme.number_of_measurements()];
    for c in compartments {
        let axis = match (c.model.has_orientation(), c.orientation) {
            (true, Some(o)) => Some(normalize(o).ok_or_else(|| CsdError::InvalidParameter {
                name: "orientation".into(),
                reason: "zero or non-finite fiber direction".into(),
            })?),
            (true, None) => return Err(CsdError::MissingParameter("orientation".into())),
            (false, _) => None,
        };
        for (i, (&b, &g)) in scheme
            .bvalues()
            .iter()
            .zip(scheme.gradient_directions())
            .enumerate()
        {
            let cos_theta = axis.map(|a| dot(a, g)).unwrap_or(0.0);
            signal[i] += c.fraction * c.model.kernel(b, cos_theta, &c.parameters)?;
        }
    }
    Ok(signal)
}

/// Add Rician noise at the given SNR (relative to unit b0 signal).
pub fn add_rician_noise<R: Rng + ?Sized>(signal: &[f64], snr: f64, rng: &mut R) -> Result<Vec<f64>, CsdError> {
    if !(snr.is_finite() && snr > 0.0) {
        return Err(CsdError::InvalidParameter {
            name: "snr".into(),
            reason: format!("must be finite and > 0, got {snr}"),
        });
    }
    let sigma = 1.0 / snr;
    let normal = Normal::new(0.0, sigma).map_err(|e| CsdError::InvalidParameter {
        name: "snr".into(),
        reason: format!("noise distribution error: {e}"),
    })?;
    Ok(signal
        .iter()
        .map(|&s| {
            let re = s + normal.sample(rng);
            let im = normal.sample(rng);
            (re * re + im * im).sqrt()
        })
        .collect())
}

/// Multi-shell gradient table: `n_b0` b0 measurements followed by one
/// hemisphere of directions per shell.
pub fn simulated_gradient_table(shells: &[f64], n_b0: usize) -> (Vec<f64>, Vec<[f64; 3]>) {
    let dirs = hemisphere(GRADIENT_SUBDIVISIONS);
    let mut bvalues = vec![0.0; n_b0];
    let mut gradients = vec![[0.0, 0.0, 0.0]; n_b0];
    for &b in shells {
        bvalues.extend(std::iter::repeat_n(b, dirs.len()));
        gradients.extend(dirs.iter().copied());
    }
    (bvalues, gradients)
}

/// A request with two crossing sticks plus a ball in every voxel.
///
/// The crossing pair is rotated about z by a random azimuth per voxel, and
/// the sticks share the non-isotropic signal equally.
pub fn crossing_sticks_sample(config: &SimulateConfig) -> Result<FitRequest, CsdError> {
    if config.voxels == 0 {
        return Err(CsdError::InvalidParameter {
            name: "voxels".into(),
            reason: "must be > 0".into(),
        });
    }
    if !(0.0..=1.0).contains(&config.iso_fraction) {
        return Err(CsdError::InvalidParameter {
            name: "iso_fraction".into(),
            reason: format!("must lie in [0, 1], got {}", config.iso_fraction),
        });
    }

    let (bvalues, gradients) = simulated_gradient_table(&config.shells, config.n_b0);
    let scheme = AcquisitionScheme::from_bvalues(bvalues.clone(), gradients.clone(), &SchemeOptions::default())?;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let half_angle = config.crossing_angle_deg.to_radians() / 2.0;

    let mut stick_params = ParameterMap::new();
    stick_params.insert_scalar("lambda_par", config.lambda_par);
    let mut ball_params = ParameterMap::new();
    ball_params.insert_scalar("lambda_iso", config.lambda_iso);
    let stick_fraction = (1.0 - config.iso_fraction) / 2.0;

    let mut signals = Vec::with_capacity(config.voxels);
    for _ in 0..config.voxels {
        let azimuth = rng.gen_range(0.0..std::f64::consts::TAU);
        let fiber = |offset: f64| {
            let (s, c) = (azimuth + offset).sin_cos();
            [c, s, 0.0]
        };
        let compartments = [
            SimulatedCompartment {
                model: build_model(ModelKind::Stick),
                parameters: stick_params.clone(),
                orientation: Some(fiber(-half_angle)),
                fraction: stick_fraction,
            },
            SimulatedCompartment {
                model: build_model(ModelKind::Stick),
                parameters: stick_params.clone(),
                orientation: Some(fiber(half_angle)),
                fraction: stick_fraction,
            },
            SimulatedCompartment {
                model: build_model(ModelKind::Ball),
                parameters: ball_params.clone(),
                orientation: None,
                fraction: config.iso_fraction,
            },
        ];
        let clean = simulate_signal(&scheme, &compartments)?;
        let signal = match config.snr {
            Some(snr) => add_rician_noise(&clean, snr, &mut rng)?,
            None => clean,
        };
        signals.push(signal);
    }

    let mut fixed = ParameterMap::new();
    fixed.insert_scalar("C1Stick_1_lambda_par", config.lambda_par);
    fixed.insert_scalar("G1Ball_1_lambda_iso", config.lambda_iso);

    Ok(FitRequest {
        bvalues,
        gradient_directions: gradients,
        models: vec![ModelKind::Stick, ModelKind::Ball],
        sh_order: config.sh_order,
        unity_constraint: true,
        fixed_parameters: fixed,
        signals,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::path::PathBuf;

    fn config() -> SimulateConfig {
        SimulateConfig {
            output: PathBuf::from("unused.json"),
            voxels: 3,
            seed: 7,
            snr: Some(50.0),
            crossing_angle_deg: 90.0,
            shells: vec![1e9, 3e9],
            n_b0: 2,
            lambda_par: 1.7e-9,
            lambda_iso: 3e-9,
            iso_fraction: 0.2,
            sh_order: 8,
        }
    }

    #[test]
    fn noise_free_b0_equals_total_fraction() {
        let mut cfg = config();
        cfg.snr = None;
        let req = crossing_sticks_sample(&cfg).unwrap();
        assert_eq!(req.signals.len(), 3);
        assert_eq!(req.signals[0].len(), 2 + 2 * 81);
        assert_abs_diff_eq!(req.signals[0][0], 1.0, epsilon = 1e-12);
        assert!(req.signals[0][2..].iter().all(|&s| s > 0.0 && s < 1.0));
    }

    #[test]
    fn same_seed_same_sample() {
        let a = crossing_sticks_sample(&config()).unwrap();
        let b = crossing_sticks_sample(&config()).unwrap();
        assert_eq!(a.signals, b.signals);
    }

    #[test]
    fn rician_noise_is_non_negative() {
        let mut rng = StdRng::seed_from_u64(1);
        let noisy = add_rician_noise(&[0.0, 0.01, 1.0], 5.0, &mut rng).unwrap();
        assert!(noisy.iter().all(|v| *v >= 0.0));
        assert!(add_rician_noise(&[1.0], 0.0, &mut rng).is_err());
    }

    #[test]
    fn oriented_compartment_needs_direction() {
        let (b, g) = simulated_gradient_table(&[1e9], 1);
        let scheme = AcquisitionScheme::from_bvalues(b, g, &SchemeOptions::default()).unwrap();
        let mut p = ParameterMap::new();
        p.insert_scalar("lambda_par", 1.7e-9);
        let c = SimulatedCompartment {
            model: build_model(ModelKind::Stick),
            parameters: p,
            orientation: None,
            fraction: 1.0,
        };
        assert_eq!(
            simulate_signal(&scheme, &[c]).unwrap_err(),
            CsdError::MissingParameter("orientation".into())
        );
    }
}
