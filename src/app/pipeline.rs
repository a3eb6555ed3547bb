//! Shared fit pipeline.
//!
//! request file -> acquisition scheme -> multi-compartment model (fixed
//! kernel parameters) -> optimizer -> per-voxel fits -> FOD analysis -> report
//!
//! Front-ends only deal with presentation (printing, exports).

use tracing::info;

use crate::domain::{FitConfig, FitReport, FitRequest, SimulateConfig, VoxelReport};
use crate::error::AppError;
use crate::fit::{CsdFit, CsdOptimizer, PeakOptions, SolverOptions, anisotropy_index, fit_voxels, peaks};
use crate::models::MultiCompartmentModel;
use crate::scheme::{AcquisitionScheme, SchemeOptions};

/// All computed outputs of a single `csd fit` run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub request: FitRequest,
    pub scheme: AcquisitionScheme,
    pub report: FitReport,
}

/// Read the request named by `config` and fit it.
pub fn run_fit(config: &FitConfig) -> Result<RunOutput, AppError> {
    let request = crate::io::read_request_json(&config.input)?;
    info!(path = %config.input.display(), voxels = request.signals.len(), "loaded request");
    let output = run_fit_with_request(config, request)?;

    if let Some(path) = &config.export {
        crate::io::write_report_json(path, &output.report)?;
        info!(path = %path.display(), "wrote report");
    }
    Ok(output)
}

/// Fit an in-memory request.
pub fn run_fit_with_request(config: &FitConfig, request: FitRequest) -> Result<RunOutput, AppError> {
    crate::io::validate_request(&request)?;

    let scheme = AcquisitionScheme::from_bvalues(
        request.bvalues.clone(),
        request.gradient_directions.clone(),
        &SchemeOptions::default(),
    )?;
    info!(
        measurements = scheme.number_of_measurements(),
        shells = scheme.shell_bvalues().len(),
        dwi_shells = scheme.unique_dwi_indices().len(),
        "built acquisition scheme"
    );

    let sh_order = config.sh_order.unwrap_or(request.sh_order);
    let unity_constraint = request.unity_constraint && !config.no_unity;

    let mut model = MultiCompartmentModel::from_kinds(&request.models, sh_order)?;
    for (name, values) in request.fixed_parameters.iter() {
        model.set_fixed_parameter(name, values.clone())?;
    }

    let solver = SolverOptions {
        max_iter: config.max_iter,
        tol: config.tol,
    };
    let optimizer = CsdOptimizer::with_options(&scheme, &model, sh_order, unity_constraint, solver)?;

    let x0 = model.initial_guess();
    let fits = fit_voxels(&optimizer, &request.signals, &x0)?;

    let peak_options = PeakOptions {
        relative_threshold: config.peak_threshold,
        min_separation_deg: config.peak_separation_deg,
        max_peaks: config.max_peaks,
        ..PeakOptions::default()
    };
    let voxels = fits
        .iter()
        .map(|fit| voxel_report(&model, sh_order, fit, &peak_options))
        .collect::<Result<Vec<_>, AppError>>()?;

    let report = FitReport {
        tool: "csd".to_string(),
        models: request.models.clone(),
        model_names: model
            .model_names()
            .iter()
            .map(|n| n.trim_end_matches('_').to_string())
            .collect(),
        sh_order,
        unity_constraint,
        voxels,
    };

    Ok(RunOutput { request, scheme, report })
}

fn voxel_report(
    model: &MultiCompartmentModel,
    sh_order: usize,
    fit: &CsdFit,
    peak_options: &PeakOptions,
) -> Result<VoxelReport, AppError> {
    let parameters = model.parameter_vector_to_parameters(&fit.parameters)?;
    let (anisotropy, fod_peaks) = match &fit.sh_coeff {
        Some(sh) => (Some(anisotropy_index(sh)), peaks(sh, sh_order, peak_options)),
        None => (None, Vec::new()),
    };
    Ok(VoxelReport {
        parameters,
        volume_fractions: fit.volume_fractions.clone(),
        sse: fit.sse,
        rmse: fit.rmse,
        status: fit.status,
        iterations: fit.iterations,
        anisotropy_index: anisotropy,
        peaks: fod_peaks,
    })
}

/// Generate a synthetic request and write it to `config.output`.
pub fn run_simulate(config: &SimulateConfig) -> Result<FitRequest, AppError> {
    let request = crate::data::crossing_sticks_sample(config)?;
    crate::io::write_request_json(&config.output, &request)?;
    info!(
        path = %config.output.display(),
        voxels = request.signals.len(),
        measurements = request.bvalues.len(),
        "wrote synthetic request"
    );
    Ok(request)
}
