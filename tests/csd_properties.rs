//! End-to-end properties of the deconvolution on synthetic signals.

use approx::assert_abs_diff_eq;

use mc_csd::data::{SimulatedCompartment, simulate_signal, simulated_gradient_table};
use mc_csd::domain::{ModelKind, ParameterMap, SolveStatus};
use mc_csd::error::CsdError;
use mc_csd::fit::CsdOptimizer;
use mc_csd::models::{MultiCompartmentModel, build_model};
use mc_csd::scheme::{AcquisitionScheme, SchemeOptions};

fn scheme() -> AcquisitionScheme {
    let (b, g) = simulated_gradient_table(&[1e9, 2e9, 3e9], 2);
    AcquisitionScheme::from_bvalues(b, g, &SchemeOptions::default()).unwrap()
}

fn ball(lambda_iso: f64, fraction: f64) -> SimulatedCompartment {
    let mut p = ParameterMap::new();
    p.insert_scalar("lambda_iso", lambda_iso);
    SimulatedCompartment {
        model: build_model(ModelKind::Ball),
        parameters: p,
        orientation: None,
        fraction,
    }
}

fn stick(lambda_par: f64, axis: [f64; 3], fraction: f64) -> SimulatedCompartment {
    let mut p = ParameterMap::new();
    p.insert_scalar("lambda_par", lambda_par);
    SimulatedCompartment {
        model: build_model(ModelKind::Stick),
        parameters: p,
        orientation: Some(axis),
        fraction,
    }
}

#[test]
fn single_ball_with_unity_has_unit_fraction() {
    let scheme = scheme();
    let mut model = MultiCompartmentModel::from_kinds(&[ModelKind::Ball], 0).unwrap();
    model.set_fixed_parameter("G1Ball_1_lambda_iso", vec![2e-9]).unwrap();
    let opt = CsdOptimizer::new(&scheme, &model, 0, true).unwrap();

    let data = simulate_signal(&scheme, &[ball(2e-9, 1.0)]).unwrap();
    let fit = opt.fit_detailed(&data, &model.initial_guess()).unwrap();
    assert_abs_diff_eq!(fit.volume_fractions[0], 1.0, epsilon = 1e-5);
    assert!(fit.sse < 1e-8, "sse={}", fit.sse);
}

#[test]
fn two_balls_recover_their_fractions() {
    let scheme = scheme();
    let mut model = MultiCompartmentModel::from_kinds(&[ModelKind::Ball, ModelKind::Ball], 0).unwrap();
    model.set_fixed_parameter("G1Ball_1_lambda_iso", vec![0.5e-9]).unwrap();
    model.set_fixed_parameter("G1Ball_2_lambda_iso", vec![3e-9]).unwrap();
    let opt = CsdOptimizer::new(&scheme, &model, 0, true).unwrap();

    let data = simulate_signal(&scheme, &[ball(0.5e-9, 0.3), ball(3e-9, 0.7)]).unwrap();
    let x0 = model.initial_guess();
    let fit = opt.fit_detailed(&data, &x0).unwrap();

    assert!(fit.volume_fractions.iter().all(|f| *f >= -1e-6));
    assert_abs_diff_eq!(fit.volume_fractions.iter().sum::<f64>(), 1.0, epsilon = 1e-5);
    assert_abs_diff_eq!(fit.volume_fractions[0], 0.3, epsilon = 1e-3);
    assert_abs_diff_eq!(fit.volume_fractions[1], 0.7, epsilon = 1e-3);

    // Both fractions are written back under their partial-volume names.
    let params = model.parameter_vector_to_parameters(&fit.parameters).unwrap();
    assert_abs_diff_eq!(params.scalar("partial_volume_0").unwrap(), fit.volume_fractions[0], epsilon = 1e-12);
    assert_abs_diff_eq!(params.scalar("partial_volume_1").unwrap(), fit.volume_fractions[1], epsilon = 1e-12);
}

#[test]
fn no_unity_recovers_scaled_signal() {
    let scheme = scheme();
    let mut model = MultiCompartmentModel::from_kinds(&[ModelKind::Ball], 0).unwrap();
    model.set_fixed_parameter("G1Ball_1_lambda_iso", vec![1e-9]).unwrap();
    let opt = CsdOptimizer::new(&scheme, &model, 0, false).unwrap();

    let data = simulate_signal(&scheme, &[ball(1e-9, 0.5)]).unwrap();
    let fit = opt.fit_detailed(&data, &model.initial_guess()).unwrap();
    assert_abs_diff_eq!(fit.volume_fractions[0], 0.5, epsilon = 1e-4);
}

struct CrossingFit {
    sse: f64,
    fractions: Vec<f64>,
    /// FOD amplitudes on the positivity hemisphere.
    fod: Vec<f64>,
    status: SolveStatus,
}

fn crossing_fit(sh_order: usize) -> CrossingFit {
    let scheme = scheme();
    let lambda_par = 1.7e-9;
    let lambda_iso = 3e-9;
    let mut model = MultiCompartmentModel::from_kinds(&[ModelKind::Stick, ModelKind::Ball], sh_order).unwrap();
    model.set_fixed_parameter("C1Stick_1_lambda_par", vec![lambda_par]).unwrap();
    model.set_fixed_parameter("G1Ball_1_lambda_iso", vec![lambda_iso]).unwrap();
    let opt = CsdOptimizer::new(&scheme, &model, sh_order, true).unwrap();

    let data = simulate_signal(
        &scheme,
        &[
            stick(lambda_par, [1.0, 0.0, 0.0], 0.35),
            stick(lambda_par, [0.0, 0.6, 0.8], 0.35),
            ball(lambda_iso, 0.3),
        ],
    )
    .unwrap();
    let fit = opt.fit_detailed(&data, &model.initial_guess()).unwrap();

    let sh = fit.sh_coeff.clone().unwrap();
    let pos = opt.positivity_matrix() * nalgebra::DVector::from_vec(sh);
    CrossingFit {
        sse: fit.sse,
        fractions: fit.volume_fractions,
        fod: pos.iter().copied().collect(),
        status: fit.status,
    }
}

#[test]
fn higher_order_does_not_fit_worse() {
    let sse4 = crossing_fit(4).sse;
    let sse8 = crossing_fit(8).sse;
    assert!(sse8 <= sse4 * (1.0 + 1e-3) + 1e-6, "sse4={sse4} sse8={sse8}");
}

#[test]
fn fod_is_non_negative_on_the_positivity_grid() {
    let fit = crossing_fit(8);
    assert_eq!(fit.status, SolveStatus::Solved);
    let min = fit.fod.iter().copied().fold(f64::INFINITY, f64::min);
    assert!(min >= -1e-4, "min FOD amplitude {min}");
    assert_abs_diff_eq!(fit.fractions.iter().sum::<f64>(), 1.0, epsilon = 1e-4);
    assert!(fit.fractions.iter().all(|f| *f >= -1e-6));
}

#[test]
fn fod_order_above_shell_order_is_zero_padded() {
    // 81 directions per shell cap the shell order below 12, so the highest
    // FOD orders are constrained by positivity alone.
    let sse8 = crossing_fit(8).sse;
    let fit = crossing_fit(12);
    assert_eq!(fit.status, SolveStatus::Solved);
    assert_abs_diff_eq!(fit.fractions.iter().sum::<f64>(), 1.0, epsilon = 1e-4);
    let min = fit.fod.iter().copied().fold(f64::INFINITY, f64::min);
    assert!(min >= -1e-4, "min FOD amplitude {min}");
    assert!(fit.sse <= sse8 * (1.0 + 1e-3) + 1e-6, "sse8={sse8} sse12={}", fit.sse);
}

#[test]
fn two_oriented_models_cannot_be_combined() {
    let scheme = scheme();
    let model = MultiCompartmentModel::from_kinds(&[ModelKind::Stick, ModelKind::Stick], 8).unwrap();
    let err = CsdOptimizer::new(&scheme, &model, 8, true).unwrap_err();
    assert_eq!(err, CsdError::MultipleOrientedModels { count: 2 });
}
