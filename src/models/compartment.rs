//! Compartment kernels.
//!
//! Each model describes the signal attenuation `E(b, cos θ)` of one tissue
//! compartment in its own frame, where `θ` is the angle between the gradient
//! and the model orientation (the z-axis). Isotropic models ignore `θ`.
//!
//! Deconvolution only needs the kernel's *rotational harmonics*: its
//! projection onto the zonal harmonics `Y_l^0` per shell. The default
//! implementation computes these by quadrature; closed forms are not needed
//! at the orders used in practice.

use std::f64::consts::PI;
use std::fmt::Debug;

use crate::domain::{ModelKind, ParameterMap, ParameterSpec, ParameterType};
use crate::error::CsdError;
use crate::math::zonal_projection;
use crate::scheme::AcquisitionScheme;

/// Quadrature nodes for rotational harmonics. Kernels are smooth in `cos θ`,
/// so this is far beyond what order 14 requires.
pub const RH_QUADRATURE_NODES: usize = 64;

/// Diffusivity range shared by the Gaussian models (m²/s).
const DIFFUSIVITY_RANGE: (f64, f64) = (0.1e-9, 3e-9);

const ORIENTATION: ParameterSpec = ParameterSpec {
    name: "mu",
    cardinality: 2,
    kind: ParameterType::Orientation,
    range: (-PI, PI),
};

pub trait CompartmentModel: Debug + Send + Sync {
    fn kind(&self) -> ModelKind;

    fn name(&self) -> &'static str {
        self.kind().display_name()
    }

    fn parameters(&self) -> &'static [ParameterSpec];

    /// Signal attenuation for b-value `bvalue` at `cos θ` from the model axis.
    ///
    /// `params` holds the model's own parameter names (no prefix); orientation
    /// entries are not consulted.
    fn kernel(&self, bvalue: f64, cos_theta: f64, params: &ParameterMap) -> Result<f64, CsdError>;

    fn has_orientation(&self) -> bool {
        self.parameters()
            .iter()
            .any(|p| p.kind == ParameterType::Orientation)
    }

    /// Rotational harmonics per diffusion-weighted shell.
    ///
    /// Entry `i` corresponds to `scheme.unique_dwi_indices()[i]` and holds
    /// `shell_order / 2 + 1` coefficients (orders 0, 2, …).
    fn rotational_harmonics_representation(
        &self,
        scheme: &AcquisitionScheme,
        params: &ParameterMap,
    ) -> Result<Vec<Vec<f64>>, CsdError> {
        let mut out = Vec::with_capacity(scheme.unique_dwi_indices().len());
        for &shell in scheme.unique_dwi_indices() {
            let b = scheme.shell_bvalues()[shell];
            let order = scheme.shell_sh_orders()[shell];

            // Evaluate once up front so kernel errors surface before quadrature.
            self.kernel(b, 1.0, params)?;
            let rh = zonal_projection(order, RH_QUADRATURE_NODES, |x| {
                self.kernel(b, x, params).unwrap_or(f64::NAN)
            })?;
            if rh.iter().any(|v| !v.is_finite()) {
                return Err(CsdError::InvalidParameter {
                    name: self.name().to_string(),
                    reason: format!("non-finite rotational harmonics at b = {b:.3e}"),
                });
            }
            out.push(rh);
        }
        Ok(out)
    }
}

/// Build a boxed model from its kind.
pub fn build_model(kind: ModelKind) -> Box<dyn CompartmentModel> {
    match kind {
        ModelKind::Ball => Box::new(Ball),
        ModelKind::Stick => Box::new(Stick),
        ModelKind::Zeppelin => Box::new(Zeppelin),
        ModelKind::Dot => Box::new(Dot),
    }
}

fn diffusivity(params: &ParameterMap, name: &str) -> Result<f64, CsdError> {
    let v = params.scalar(name)?;
    if !v.is_finite() || v < 0.0 {
        return Err(CsdError::InvalidParameter {
            name: name.to_string(),
            reason: format!("diffusivity must be finite and non-negative, got {v}"),
        });
    }
    Ok(v)
}

/// Isotropic Gaussian compartment: `E = exp(-b λ_iso)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ball;

impl CompartmentModel for Ball {
    fn kind(&self) -> ModelKind {
        ModelKind::Ball
    }

    fn parameters(&self) -> &'static [ParameterSpec] {
        const PARAMS: &[ParameterSpec] = &[ParameterSpec {
            name: "lambda_iso",
            cardinality: 1,
            kind: ParameterType::Normal,
            range: DIFFUSIVITY_RANGE,
        }];
        PARAMS
    }

    fn kernel(&self, bvalue: f64, _cos_theta: f64, params: &ParameterMap) -> Result<f64, CsdError> {
        let d = diffusivity(params, "lambda_iso")?;
        Ok((-bvalue * d).exp())
    }
}

/// Zero-radius cylinder: `E = exp(-b λ_par cos²θ)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stick;

impl CompartmentModel for Stick {
    fn kind(&self) -> ModelKind {
        ModelKind::Stick
    }

    fn parameters(&self) -> &'static [ParameterSpec] {
        const PARAMS: &[ParameterSpec] = &[
            ORIENTATION,
            ParameterSpec {
                name: "lambda_par",
                cardinality: 1,
                kind: ParameterType::Normal,
                range: DIFFUSIVITY_RANGE,
            },
        ];
        PARAMS
    }

    fn kernel(&self, bvalue: f64, cos_theta: f64, params: &ParameterMap) -> Result<f64, CsdError> {
        let d = diffusivity(params, "lambda_par")?;
        Ok((-bvalue * d * cos_theta * cos_theta).exp())
    }
}

/// Axially symmetric tensor:
/// `E = exp(-b (λ_perp + (λ_par - λ_perp) cos²θ))`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Zeppelin;

impl CompartmentModel for Zeppelin {
    fn kind(&self) -> ModelKind {
        ModelKind::Zeppelin
    }

    fn parameters(&self) -> &'static [ParameterSpec] {
        const PARAMS: &[ParameterSpec] = &[
            ORIENTATION,
            ParameterSpec {
                name: "lambda_par",
                cardinality: 1,
                kind: ParameterType::Normal,
                range: DIFFUSIVITY_RANGE,
            },
            ParameterSpec {
                name: "lambda_perp",
                cardinality: 1,
                kind: ParameterType::Normal,
                range: DIFFUSIVITY_RANGE,
            },
        ];
        PARAMS
    }

    fn kernel(&self, bvalue: f64, cos_theta: f64, params: &ParameterMap) -> Result<f64, CsdError> {
        let par = diffusivity(params, "lambda_par")?;
        let perp = diffusivity(params, "lambda_perp")?;
        let c2 = cos_theta * cos_theta;
        Ok((-bvalue * (perp + (par - perp) * c2)).exp())
    }
}

/// Non-diffusing compartment: `E = 1`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Dot;

impl CompartmentModel for Dot {
    fn kind(&self) -> ModelKind {
        ModelKind::Dot
    }

    fn parameters(&self) -> &'static [ParameterSpec] {
        &[]
    }

    fn kernel(&self, _bvalue: f64, _cos_theta: f64, _params: &ParameterMap) -> Result<f64, CsdError> {
        Ok(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::hemisphere;
    use crate::scheme::SchemeOptions;
    use approx::assert_abs_diff_eq;

    fn scheme() -> AcquisitionScheme {
        let dirs = hemisphere(2);
        let bvalues = vec![2e9; dirs.len()];
        AcquisitionScheme::from_bvalues(bvalues, dirs, &SchemeOptions::default()).unwrap()
    }

    #[test]
    fn orientation_flags() {
        assert!(Stick.has_orientation());
        assert!(Zeppelin.has_orientation());
        assert!(!Ball.has_orientation());
        assert!(!Dot.has_orientation());
    }

    #[test]
    fn ball_rotational_harmonics_are_isotropic() {
        let mut p = ParameterMap::new();
        p.insert_scalar("lambda_iso", 1e-9);
        let rh = Ball.rotational_harmonics_representation(&scheme(), &p).unwrap();
        assert_eq!(rh.len(), 1);
        assert_eq!(rh[0].len(), 6); // order 10
        assert_abs_diff_eq!(rh[0][0], (-2.0f64).exp() * (4.0 * PI).sqrt(), epsilon = 1e-12);
        for v in &rh[0][1..] {
            assert_abs_diff_eq!(*v, 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn stick_rotational_harmonics_decay_with_order() {
        let mut p = ParameterMap::new();
        p.insert_scalar("lambda_par", 1.7e-9);
        let rh = Stick.rotational_harmonics_representation(&scheme(), &p).unwrap();
        let rh = &rh[0];
        // The stick attenuates along its axis, so l=2 is negative.
        assert!(rh[0] > 0.0);
        assert!(rh[1] < 0.0);
        assert!(rh[1].abs() > rh[3].abs());
    }

    #[test]
    fn zeppelin_reduces_to_stick_when_perp_is_zero() {
        let mut p = ParameterMap::new();
        p.insert_scalar("lambda_par", 1.7e-9);
        p.insert_scalar("lambda_perp", 0.0);
        for &c in &[0.0, 0.3, 1.0] {
            assert_abs_diff_eq!(
                Zeppelin.kernel(1e9, c, &p).unwrap(),
                Stick.kernel(1e9, c, &p).unwrap(),
                epsilon = 1e-15
            );
        }
    }

    #[test]
    fn missing_diffusivity_is_reported() {
        let err = Stick
            .rotational_harmonics_representation(&scheme(), &ParameterMap::new())
            .unwrap_err();
        assert_eq!(err, CsdError::MissingParameter("lambda_par".into()));
    }
}
