//! Acquisition scheme: b-values, gradient directions and shell structure.
//!
//! Measurements are grouped into shells by b-value. Each diffusion-weighted
//! shell gets its own spherical-harmonic order (limited by how many
//! directions it samples) and basis matrix; b0 shells use order 0.
//!
//! Units are SI: b-values in s/m² (a clinical `b = 1000 s/mm²` is `1e9`).

use nalgebra::DMatrix;
use tracing::debug;

use crate::error::CsdError;
use crate::math::{max_order_for_samples, normalize, real_sym_sh_mrtrix};

/// Shell-clustering and basis options.
#[derive(Debug, Clone)]
pub struct SchemeOptions {
    /// Shells whose mean b-value is at or below this are treated as b0.
    pub b0_threshold: f64,
    /// Sorted b-values closer than this to their predecessor join its shell.
    pub min_shell_distance: f64,
    /// Upper bound on any shell's SH order.
    pub max_sh_order: usize,
}

impl Default for SchemeOptions {
    fn default() -> Self {
        Self {
            b0_threshold: 10e6,
            min_shell_distance: 50e6,
            max_sh_order: 14,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AcquisitionScheme {
    bvalues: Vec<f64>,
    gradient_directions: Vec<[f64; 3]>,
    shell_indices: Vec<usize>,
    shell_bvalues: Vec<f64>,
    shell_b0_mask: Vec<bool>,
    shell_measurements: Vec<Vec<usize>>,
    unique_dwi_indices: Vec<usize>,
    unique_b0_indices: Vec<usize>,
    shell_sh_orders: Vec<usize>,
    shell_sh_matrices: Vec<DMatrix<f64>>,
}

impl AcquisitionScheme {
    /// Build a scheme from per-measurement b-values and gradient directions.
    ///
    /// Directions of diffusion-weighted measurements are normalized; b0
    /// measurements may carry a zero direction.
    pub fn from_bvalues(
        bvalues: Vec<f64>,
        gradient_directions: Vec<[f64; 3]>,
        options: &SchemeOptions,
    ) -> Result<Self, CsdError> {
        if bvalues.is_empty() {
            return Err(CsdError::InvalidScheme("no measurements".into()));
        }
        if bvalues.len() != gradient_directions.len() {
            return Err(CsdError::DimensionMismatch {
                what: "gradient directions",
                expected: bvalues.len(),
                found: gradient_directions.len(),
            });
        }
        if let Some((i, b)) = bvalues
            .iter()
            .enumerate()
            .find(|(_, b)| !b.is_finite() || **b < 0.0)
        {
            return Err(CsdError::InvalidScheme(format!(
                "b-value {b} at measurement {i} must be finite and non-negative"
            )));
        }

        let (shell_indices, shell_bvalues) =
            cluster_shells(&bvalues, options.min_shell_distance);
        let n_shells = shell_bvalues.len();
        let shell_b0_mask: Vec<bool> = shell_bvalues
            .iter()
            .map(|&b| b <= options.b0_threshold)
            .collect();

        let mut shell_measurements = vec![Vec::new(); n_shells];
        for (i, &s) in shell_indices.iter().enumerate() {
            shell_measurements[s].push(i);
        }

        let mut directions = gradient_directions;
        for (i, dir) in directions.iter_mut().enumerate() {
            if shell_b0_mask[shell_indices[i]] {
                *dir = normalize(*dir).unwrap_or([0.0, 0.0, 1.0]);
                continue;
            }
            *dir = normalize(*dir).ok_or_else(|| {
                CsdError::InvalidScheme(format!(
                    "diffusion-weighted measurement {i} has a zero or non-finite gradient direction"
                ))
            })?;
        }

        let unique_dwi_indices: Vec<usize> = (0..n_shells).filter(|&s| !shell_b0_mask[s]).collect();
        let unique_b0_indices: Vec<usize> = (0..n_shells).filter(|&s| shell_b0_mask[s]).collect();

        let shell_sh_orders: Vec<usize> = (0..n_shells)
            .map(|s| {
                if shell_b0_mask[s] {
                    0
                } else {
                    max_order_for_samples(shell_measurements[s].len(), options.max_sh_order)
                }
            })
            .collect();

        let shell_sh_matrices: Vec<DMatrix<f64>> = (0..n_shells)
            .map(|s| {
                let dirs: Vec<[f64; 3]> = shell_measurements[s].iter().map(|&i| directions[i]).collect();
                real_sym_sh_mrtrix(shell_sh_orders[s], &dirs)
            })
            .collect();

        debug!(
            measurements = bvalues.len(),
            shells = n_shells,
            dwi_shells = unique_dwi_indices.len(),
            ?shell_sh_orders,
            "built acquisition scheme"
        );

        Ok(Self {
            bvalues,
            gradient_directions: directions,
            shell_indices,
            shell_bvalues,
            shell_b0_mask,
            shell_measurements,
            unique_dwi_indices,
            unique_b0_indices,
            shell_sh_orders,
            shell_sh_matrices,
        })
    }

    pub fn number_of_measurements(&self) -> usize {
        self.bvalues.len()
    }

    pub fn bvalues(&self) -> &[f64] {
        &self.bvalues
    }

    pub fn gradient_directions(&self) -> &[[f64; 3]] {
        &self.gradient_directions
    }

    /// Shell index of every measurement.
    pub fn shell_indices(&self) -> &[usize] {
        &self.shell_indices
    }

    /// Mean b-value per shell (ascending).
    pub fn shell_bvalues(&self) -> &[f64] {
        &self.shell_bvalues
    }

    pub fn shell_b0_mask(&self) -> &[bool] {
        &self.shell_b0_mask
    }

    /// Measurement indices belonging to `shell`.
    pub fn shell_measurements(&self, shell: usize) -> &[usize] {
        &self.shell_measurements[shell]
    }

    /// Diffusion-weighted shells in ascending b-value order.
    pub fn unique_dwi_indices(&self) -> &[usize] {
        &self.unique_dwi_indices
    }

    pub fn unique_b0_indices(&self) -> &[usize] {
        &self.unique_b0_indices
    }

    pub fn shell_sh_orders(&self) -> &[usize] {
        &self.shell_sh_orders
    }

    pub fn shell_sh_matrix(&self, shell: usize) -> &DMatrix<f64> {
        &self.shell_sh_matrices[shell]
    }
}

/// Assign shell indices by clustering sorted b-values.
///
/// Returns `(shell index per measurement, mean b-value per shell)`.
fn cluster_shells(bvalues: &[f64], min_distance: f64) -> (Vec<usize>, Vec<f64>) {
    let mut order: Vec<usize> = (0..bvalues.len()).collect();
    order.sort_by(|&a, &b| bvalues[a].total_cmp(&bvalues[b]));

    let mut shell_indices = vec![0usize; bvalues.len()];
    let mut sums: Vec<f64> = Vec::new();
    let mut counts: Vec<usize> = Vec::new();
    let mut prev: Option<f64> = None;

    for &i in &order {
        let b = bvalues[i];
        let new_shell = match prev {
            None => true,
            Some(p) => b - p >= min_distance,
        };
        if new_shell {
            sums.push(0.0);
            counts.push(0);
        }
        let s = sums.len() - 1;
        sums[s] += b;
        counts[s] += 1;
        shell_indices[i] = s;
        prev = Some(b);
    }

    let means = sums
        .iter()
        .zip(counts.iter())
        .map(|(s, &c)| s / c as f64)
        .collect();
    (shell_indices, means)
}
