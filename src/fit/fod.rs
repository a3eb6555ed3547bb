//! FOD analysis: evaluation, anisotropy index and peak extraction.

use crate::domain::FodPeak;
use crate::math::{dot, evaluate_sh, icosphere, in_upper_hemisphere};

/// Peak search settings.
#[derive(Debug, Clone)]
pub struct PeakOptions {
    /// Icosphere subdivisions for the search grid.
    pub subdivisions: usize,
    /// Peaks below `relative_threshold × max` are dropped.
    pub relative_threshold: f64,
    /// Minimum angle between peaks (degrees); antipodes count as equal.
    pub min_separation_deg: f64,
    pub max_peaks: usize,
}

impl Default for PeakOptions {
    fn default() -> Self {
        Self {
            subdivisions: 4,
            relative_threshold: 0.5,
            min_separation_deg: 25.0,
            max_peaks: 5,
        }
    }
}

/// FOD amplitude at `directions`.
pub fn fod(sh_coeff: &[f64], sh_order: usize, directions: &[[f64; 3]]) -> Vec<f64> {
    evaluate_sh(sh_coeff, sh_order, directions)
}

/// Anisotropy index `sqrt(1 − c00² / Σ c²)`: 0 for an isotropic FOD, → 1 when
/// all power is in the higher orders.
pub fn anisotropy_index(sh_coeff: &[f64]) -> f64 {
    let total: f64 = sh_coeff.iter().map(|c| c * c).sum();
    if total <= 0.0 {
        return 0.0;
    }
    let c00 = sh_coeff.first().copied().unwrap_or(0.0);
    (1.0 - c00 * c00 / total).max(0.0).sqrt()
}

/// Local maxima of the FOD on an icosphere, strongest first, reported on the
/// upper hemisphere.
pub fn peaks(sh_coeff: &[f64], sh_order: usize, opts: &PeakOptions) -> Vec<FodPeak> {
    let mesh = icosphere(opts.subdivisions);
    let values = fod(sh_coeff, sh_order, &mesh.vertices);
    let adjacency = mesh.adjacency();

    let max_value = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !(max_value.is_finite() && max_value > 0.0) {
        return Vec::new();
    }
    let floor = opts.relative_threshold * max_value;

    let mut candidates: Vec<FodPeak> = values
        .iter()
        .enumerate()
        .filter(|&(i, &v)| v >= floor && adjacency[i].iter().all(|&j| values[j] <= v))
        .map(|(i, &v)| {
            let d = mesh.vertices[i];
            let direction = if in_upper_hemisphere(d) { d } else { [-d[0], -d[1], -d[2]] };
            FodPeak { direction, value: v }
        })
        .collect();
    candidates.sort_by(|a, b| b.value.total_cmp(&a.value));

    let cos_min = opts.min_separation_deg.to_radians().cos();
    let mut out: Vec<FodPeak> = Vec::new();
    for c in candidates {
        if out.len() >= opts.max_peaks {
            break;
        }
        if out.iter().all(|p| dot(p.direction, c.direction).abs() < cos_min) {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{normalize, real_sym_sh_mrtrix};
    use std::f64::consts::PI;

    /// SH coefficients of a delta along `axis`, truncated at `order`.
    fn delta_fod(axis: [f64; 3], order: usize) -> Vec<f64> {
        // The MRtrix basis is orthogonal with norm 1 (m = 0) or 1/2 (m ≠ 0) in squared L2.
        let basis = real_sym_sh_mrtrix(order, &[axis]);
        let indices = crate::math::sh_indices(order);
        indices
            .iter()
            .enumerate()
            .map(|(k, &(_, m))| if m == 0 { basis[(0, k)] } else { 2.0 * basis[(0, k)] })
            .collect()
    }

    #[test]
    fn isotropic_fod_has_zero_anisotropy() {
        assert_eq!(anisotropy_index(&[1.0, 0.0, 0.0]), 0.0);
        assert_eq!(anisotropy_index(&[]), 0.0);
        assert!(anisotropy_index(&[1.0, 0.5, -0.5]) > 0.0);
    }

    #[test]
    fn single_delta_gives_single_peak() {
        let axis = normalize([0.2, 0.4, 0.9]).unwrap();
        let sh = delta_fod(axis, 8);
        let found = peaks(&sh, 8, &PeakOptions::default());
        assert_eq!(found.len(), 1);
        let angle = dot(found[0].direction, axis).abs().min(1.0).acos();
        assert!(angle < 5.0 * PI / 180.0, "angle={angle}");
    }

    #[test]
    fn crossing_deltas_give_two_peaks() {
        let a = [1.0, 0.0, 0.0];
        let b = [0.0, 1.0, 0.0];
        let sh: Vec<f64> = delta_fod(a, 8)
            .iter()
            .zip(delta_fod(b, 8))
            .map(|(x, y)| 0.5 * (x + y))
            .collect();
        let found = peaks(&sh, 8, &PeakOptions::default());
        assert_eq!(found.len(), 2);
        for p in &found {
            assert!(dot(p.direction, a).abs() > 0.99 || dot(p.direction, b).abs() > 0.99);
        }
    }
}
