//! Read/write fit request JSON files.
//!
//! A request carries the acquisition (b-values, gradients), the compartment
//! models, any fixed kernel parameters and one signal vector per voxel. The
//! schema is defined by `domain::FitRequest`.
//!
//! Validation here is structural only (lengths, finiteness). Scheme and model
//! checks happen when the pipeline builds those objects.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use tracing::debug;

use crate::domain::FitRequest;
use crate::error::AppError;

/// Read and validate a request file.
pub fn read_request_json(path: &Path) -> Result<FitRequest, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open request JSON '{}': {e}", path.display())))?;
    let request: FitRequest =
        serde_json::from_reader(file).map_err(|e| AppError::new(2, format!("Invalid request JSON: {e}")))?;
    validate_request(&request)?;
    debug!(
        path = %path.display(),
        measurements = request.bvalues.len(),
        voxels = request.signals.len(),
        "read request"
    );
    Ok(request)
}

/// Write a request file (pretty-printed).
pub fn write_request_json(path: &Path, request: &FitRequest) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create request JSON '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(BufWriter::new(file), request)
        .map_err(|e| AppError::new(2, format!("Failed to write request JSON: {e}")))?;
    Ok(())
}

/// Structural checks on a parsed request.
pub fn validate_request(request: &FitRequest) -> Result<(), AppError> {
    let n = request.bvalues.len();
    if n == 0 {
        return Err(AppError::new(2, "Request has no measurements."));
    }
    if request.gradient_directions.len() != n {
        return Err(AppError::new(
            2,
            format!(
                "Request has {n} b-values but {} gradient directions.",
                request.gradient_directions.len()
            ),
        ));
    }
    if request.models.is_empty() {
        return Err(AppError::new(2, "Request lists no compartment models."));
    }
    if request.signals.is_empty() {
        return Err(AppError::new(2, "Request has no voxel signals."));
    }
    for (i, s) in request.signals.iter().enumerate() {
        if s.len() != n {
            return Err(AppError::new(
                2,
                format!("Voxel {i} has {} samples, expected {n}.", s.len()),
            ));
        }
        if let Some(j) = s.iter().position(|v| !v.is_finite()) {
            return Err(AppError::new(2, format!("Voxel {i} has a non-finite sample at index {j}.")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ModelKind, ParameterMap};

    fn request() -> FitRequest {
        FitRequest {
            bvalues: vec![0.0, 1e9],
            gradient_directions: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]],
            models: vec![ModelKind::Ball],
            sh_order: 0,
            unity_constraint: true,
            fixed_parameters: ParameterMap::new(),
            signals: vec![vec![1.0, 0.5]],
        }
    }

    #[test]
    fn valid_request_passes() {
        assert!(validate_request(&request()).is_ok());
    }

    #[test]
    fn short_signal_is_rejected() {
        let mut r = request();
        r.signals.push(vec![1.0]);
        let err = validate_request(&r).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("Voxel 1"));
    }

    #[test]
    fn nan_sample_is_rejected() {
        let mut r = request();
        r.signals[0][1] = f64::NAN;
        assert!(validate_request(&r).is_err());
    }

    #[test]
    fn request_file_round_trip() {
        let path = std::env::temp_dir().join(format!("mc-csd-request-{}.json", std::process::id()));
        let mut r = request();
        r.fixed_parameters.insert_scalar("G1Ball_1_lambda_iso", 3e-9);
        write_request_json(&path, &r).unwrap();
        let back = read_request_json(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(back.bvalues, r.bvalues);
        assert_eq!(back.models, r.models);
        assert_eq!(back.fixed_parameters, r.fixed_parameters);
        assert_eq!(back.signals, r.signals);
    }

    #[test]
    fn missing_file_is_a_usage_error() {
        let err = read_request_json(Path::new("/nonexistent/mc-csd/request.json")).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn gradient_count_must_match() {
        let mut r = request();
        r.gradient_directions.pop();
        assert!(validate_request(&r).is_err());
    }
}
