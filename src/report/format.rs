//! Formatted terminal output for fit runs.
//!
//! Formatting lives here so the solver code stays free of presentation
//! concerns and output changes stay localized.

use crate::domain::{FitReport, SolveStatus, VoxelReport};
use crate::scheme::AcquisitionScheme;

/// Worst-fitting voxels (by RMSE), worst first, with their input index.
pub fn rank_worst_voxels(report: &FitReport, top_n: usize) -> Vec<(usize, &VoxelReport)> {
    let mut ranked: Vec<(usize, &VoxelReport)> = report.voxels.iter().enumerate().collect();
    ranked.sort_by(|a, b| b.1.rmse.total_cmp(&a.1.rmse));
    ranked.truncate(top_n);
    ranked
}

/// Format the run summary (acquisition + model + aggregate fit quality).
pub fn format_fit_summary(report: &FitReport, scheme: &AcquisitionScheme) -> String {
    let mut out = String::new();

    out.push_str("=== csd - Multi-Compartment Spherical Deconvolution ===\n");
    out.push_str(&format!("Models: {}\n", report.model_names.join(" + ")));
    out.push_str(&format!(
        "SH order: {} | unity constraint: {}\n",
        report.sh_order,
        if report.unity_constraint { "on" } else { "off" }
    ));

    out.push_str(&format!("Measurements: n={}\n", scheme.number_of_measurements()));
    for (shell, &b) in scheme.shell_bvalues().iter().enumerate() {
        let kind = if scheme.shell_b0_mask()[shell] { "b0" } else { "dwi" };
        out.push_str(&format!(
            "  shell {shell}: b={:.0} s/mm² ({kind}) n={} sh_order={}\n",
            b * 1e-6,
            scheme.shell_measurements(shell).len(),
            scheme.shell_sh_orders()[shell],
        ));
    }

    let n = report.voxels.len();
    let unconverged = report
        .voxels
        .iter()
        .filter(|v| v.status != SolveStatus::Solved)
        .count();
    out.push_str(&format!("\nVoxels: n={n} | unconverged={unconverged}\n"));
    if n > 0 {
        let mean_rmse = report.voxels.iter().map(|v| v.rmse).sum::<f64>() / n as f64;
        let max_rmse = report.voxels.iter().map(|v| v.rmse).fold(0.0, f64::max);
        out.push_str(&format!("RMSE: mean={mean_rmse:.3e} max={max_rmse:.3e}\n"));

        let n_models = report.model_names.len();
        let mut mean_fractions = vec![0.0; n_models];
        for v in &report.voxels {
            for (acc, f) in mean_fractions.iter_mut().zip(&v.volume_fractions) {
                *acc += f / n as f64;
            }
        }
        out.push_str("Mean volume fractions:\n");
        for (name, f) in report.model_names.iter().zip(&mean_fractions) {
            out.push_str(&format!("- {name:<12} {f:.4}\n"));
        }
    }
    out.push('\n');

    out
}

/// Format a per-voxel table for the given rows.
pub fn format_voxel_table(rows: &[(usize, &VoxelReport)]) -> String {
    let mut out = String::new();
    out.push_str(
        format!(
            "{:>6} {:>11} {:>14} {:>7} {:>6} {:>6} {:<24}",
            "voxel", "rmse", "status", "iters", "AI", "peaks", "fractions"
        )
        .trim_end(),
    );
    out.push('\n');
    out.push_str(format!("{:-<6} {:-<11} {:-<14} {:-<7} {:-<6} {:-<6} {:-<24}", "", "", "", "", "", "", "").trim_end());
    out.push('\n');

    for (idx, v) in rows {
        let status = match v.status {
            SolveStatus::Solved => "solved",
            SolveStatus::MaxIterations => "max_iterations",
        };
        let ai = v
            .anisotropy_index
            .map(|a| format!("{a:.3}"))
            .unwrap_or_else(|| "-".to_string());
        out.push_str(
            format!(
                "{idx:>6} {:>11.3e} {status:>14} {:>7} {ai:>6} {:>6} {:<24}",
                v.rmse,
                v.iterations,
                v.peaks.len(),
                fmt_vec(&v.volume_fractions),
            )
            .trim_end(),
        );
        out.push('\n');
    }

    out
}

fn fmt_vec(v: &[f64]) -> String {
    let parts: Vec<String> = v.iter().map(|x| format!("{x:.3}")).collect();
    format!("[{}]", parts.join(", "))
}
