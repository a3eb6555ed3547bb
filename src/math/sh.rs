//! Real symmetric spherical-harmonic basis (MRtrix legacy convention).
//!
//! Only even orders are used because diffusion signals and FODs are
//! antipodally symmetric. Coefficients are ordered by `l = 0, 2, 4, …` and,
//! within each `l`, by `m = -l, …, l`. For a maximum order `L` there are
//! `(L + 1)(L + 2) / 2` coefficients.
//!
//! Basis functions, with `Y_l^m` the complex orthonormal harmonic:
//!
//! - `m = 0`: `Y_l^0`
//! - `m > 0`: `Re(Y_l^m)`
//! - `m < 0`: `Im(Y_l^|m|)`
//!
//! This is not orthonormal for `m ≠ 0` (norm `1/√2`), which is harmless for
//! deconvolution because rotational harmonics act per order `l`. `Y_0^0` is the
//! constant `1 / (2√π)`, so the FOD integral is `2√π · c_00`.

use nalgebra::{DMatrix, DVector};

use crate::math::legendre::{associated_legendre, sh_normalization};
use crate::math::sphere::cart2sphere;

/// Number of real symmetric SH coefficients up to (even) `order`.
pub fn n_coefficients(order: usize) -> usize {
    (order + 2) * (order + 1) / 2
}

/// `(l, m)` for every column of the basis.
pub fn sh_indices(order: usize) -> Vec<(usize, i32)> {
    let mut out = Vec::with_capacity(n_coefficients(order));
    for l in (0..=order).step_by(2) {
        let li = l as i32;
        for m in -li..=li {
            out.push((l, m));
        }
    }
    out
}

/// Evaluate one basis function at `(theta, phi)`.
pub fn sh_value(l: usize, m: i32, theta: f64, phi: f64) -> f64 {
    let am = m.unsigned_abs() as usize;
    let radial = sh_normalization(l, am) * associated_legendre(l, am, theta.cos());
    match m {
        0 => radial,
        m if m > 0 => radial * (am as f64 * phi).cos(),
        _ => radial * (am as f64 * phi).sin(),
    }
}

/// Basis matrix with one row per direction and one column per coefficient.
pub fn real_sym_sh_mrtrix(order: usize, directions: &[[f64; 3]]) -> DMatrix<f64> {
    let indices = sh_indices(order);
    let mut out = DMatrix::<f64>::zeros(directions.len(), indices.len());
    for (row, &dir) in directions.iter().enumerate() {
        let (_, theta, phi) = cart2sphere(dir);
        for (col, &(l, m)) in indices.iter().enumerate() {
            out[(row, col)] = sh_value(l, m, theta, phi);
        }
    }
    out
}

/// Evaluate an SH series at the given directions.
///
/// `coef` may be shorter or longer than the basis of `order`; missing
/// coefficients are treated as zero and extra ones are ignored.
pub fn evaluate_sh(coef: &[f64], order: usize, directions: &[[f64; 3]]) -> Vec<f64> {
    let basis = real_sym_sh_mrtrix(order, directions);
    let mut c = DVector::<f64>::zeros(basis.ncols());
    for (dst, src) in c.iter_mut().zip(coef.iter()) {
        *dst = *src;
    }
    (basis * c).iter().copied().collect()
}

/// Largest even order whose coefficient count fits in `n_samples`, capped at `max_order`.
pub fn max_order_for_samples(n_samples: usize, max_order: usize) -> usize {
    let mut order = max_order - max_order % 2;
    while order > 0 && n_coefficients(order) > n_samples {
        order -= 2;
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::PI;

    #[test]
    fn coefficient_counts() {
        assert_eq!(n_coefficients(0), 1);
        assert_eq!(n_coefficients(2), 6);
        assert_eq!(n_coefficients(8), 45);
        assert_eq!(sh_indices(4).len(), 15);
        assert_eq!(sh_indices(4)[0], (0, 0));
        assert_eq!(sh_indices(4)[1], (2, -2));
        assert_eq!(sh_indices(4)[14], (4, 4));
    }

    #[test]
    fn constant_and_zonal_values() {
        let dirs = [[0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 0.6, 0.8]];
        let basis = real_sym_sh_mrtrix(2, &dirs);
        for r in 0..dirs.len() {
            assert_abs_diff_eq!(basis[(r, 0)], 1.0 / (2.0 * PI.sqrt()), epsilon = 1e-14);
        }
        // Y_2^0 on the z-axis is sqrt(5 / 4π); (2, 0) is column 3.
        assert_abs_diff_eq!(basis[(0, 3)], (5.0 / (4.0 * PI)).sqrt(), epsilon = 1e-14);
        // ... and -1/2 of that on the equator.
        assert_abs_diff_eq!(basis[(1, 3)], -0.5 * (5.0 / (4.0 * PI)).sqrt(), epsilon = 1e-14);
    }

    #[test]
    fn evaluate_pads_missing_coefficients() {
        let dirs = [[0.0, 0.0, 1.0]];
        let v = evaluate_sh(&[2.0 * PI.sqrt()], 4, &dirs);
        assert_abs_diff_eq!(v[0], 1.0, epsilon = 1e-14);
    }

    #[test]
    fn sample_limited_order() {
        assert_eq!(max_order_for_samples(30, 14), 6);
        assert_eq!(max_order_for_samples(45, 14), 8);
        assert_eq!(max_order_for_samples(500, 14), 14);
        assert_eq!(max_order_for_samples(3, 14), 0);
    }
}
