//! Legendre functions and zonal projections.
//!
//! The spherical-harmonic basis is built from associated Legendre functions
//! `P_l^m(cos θ)` evaluated with the standard three-term recurrence:
//!
//! - `P_m^m(x) = (-1)^m (2m-1)!! (1-x²)^{m/2}`
//! - `P_{m+1}^m(x) = x (2m+1) P_m^m(x)`
//! - `(l-m) P_l^m(x) = x (2l-1) P_{l-1}^m(x) - (l+m-1) P_{l-2}^m(x)`
//!
//! The `(-1)^m` factor is the Condon–Shortley phase. For the orders used in
//! diffusion MRI (l ≤ 16) the unnormalized recurrence is well within `f64`
//! range.

use std::f64::consts::PI;

use solvr::integrate::GaussLegendreQuadrature;

use crate::error::CsdError;

/// Associated Legendre function `P_l^m(x)` for `x ∈ [-1, 1]`.
///
/// Returns `0.0` when `m > l`.
pub fn associated_legendre(l: usize, m: usize, x: f64) -> f64 {
    if m > l {
        return 0.0;
    }

    let mut pmm = 1.0;
    if m > 0 {
        let somx2 = ((1.0 - x) * (1.0 + x)).max(0.0).sqrt();
        let mut fact = 1.0;
        for _ in 0..m {
            pmm *= -fact * somx2;
            fact += 2.0;
        }
    }
    if l == m {
        return pmm;
    }

    let mut pmmp1 = x * (2 * m + 1) as f64 * pmm;
    if l == m + 1 {
        return pmmp1;
    }

    let mut pll = 0.0;
    for ll in (m + 2)..=l {
        pll = (x * (2 * ll - 1) as f64 * pmmp1 - (ll + m - 1) as f64 * pmm) / (ll - m) as f64;
        pmm = pmmp1;
        pmmp1 = pll;
    }
    pll
}

/// Legendre polynomial `P_l(x)`.
pub fn legendre(l: usize, x: f64) -> f64 {
    associated_legendre(l, 0, x)
}

/// Orthonormalization factor `sqrt((2l+1)/(4π) · (l-m)!/(l+m)!)`.
pub fn sh_normalization(l: usize, m: usize) -> f64 {
    if m > l {
        return 0.0;
    }
    let mut ratio = 1.0;
    for k in (l - m + 1)..=(l + m) {
        ratio /= k as f64;
    }
    ((2 * l + 1) as f64 / (4.0 * PI) * ratio).sqrt()
}

/// Project an axially symmetric function `f(cos θ)` onto the zonal harmonics
/// `Y_l^0`, `l = 0, 2, …, order`.
///
/// Returns `order / 2 + 1` coefficients:
/// `c_l = 2π ∫_{-1}^{1} f(x) N_l P_l(x) dx`, evaluated with `nodes`-point
/// Gauss–Legendre quadrature. Odd orders vanish for antipodally symmetric
/// kernels and are not returned.
pub fn zonal_projection<F>(order: usize, nodes: usize, mut f: F) -> Result<Vec<f64>, CsdError>
where
    F: FnMut(f64) -> f64,
{
    let rule = GaussLegendreQuadrature::new(nodes).map_err(|e| CsdError::Quadrature(e.to_string()))?;
    let (xs, ws) = (&rule.nodes, &rule.weights);
    let samples: Vec<f64> = xs.iter().map(|&x| f(x)).collect();

    Ok((0..=order)
        .step_by(2)
        .map(|l| {
            let norm = sh_normalization(l, 0);
            let integral: f64 = xs
                .iter()
                .zip(ws.iter())
                .zip(samples.iter())
                .map(|((&x, &w), &s)| w * s * legendre(l, x))
                .sum();
            2.0 * PI * norm * integral
        })
        .collect())
}
