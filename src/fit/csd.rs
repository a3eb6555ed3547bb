//! Multi-compartment constrained spherical deconvolution (MC-CSD).
//!
//! Given fixed kernel parameters, the signal of every diffusion-weighted
//! shell is linear in the unknowns:
//!
//! - the FOD's SH coefficients `c` (for the single orientation-bearing kernel)
//! - one scalar `s_j` per isotropic kernel
//!
//! For shell `i` with SH basis `B_i` and prepared rotational harmonics
//! `r_ij` (see [`prepare_rotational_harmonics`]):
//!
//! ```text
//! S_i = B_i · diag(r_i,orient) · c  +  Σ_j Y00 · r_ij[0] · s_j
//! ```
//!
//! The deconvolution is the QP
//!
//! ```text
//! minimize    Σ_i ‖S_i − data_i‖²
//! subject to  B_pos · c ≥ 0,  s_j ≥ 0,  [Σ_j 2√π · (zeroth coefficient)_j = 1]
//! ```
//!
//! where `B_pos` is the SH basis on a dense hemisphere and the bracketed
//! unity constraint is optional. Each kernel's volume fraction is its zeroth
//! coefficient times `2√π` (the integral of the FOD over the sphere).
//!
//! Compartments are fitted directly to the signal attenuation, so every
//! compartment is implicitly assumed to have the same b0 intensity.
//!
//! Only one kernel may carry an orientation: two oriented kernels would need
//! two independent FODs, which this formulation cannot separate.

use std::f64::consts::PI;

use nalgebra::{DMatrix, DVector};
use tracing::{debug, trace};

use crate::domain::SolveStatus;
use crate::error::CsdError;
use crate::fit::qp::{QpProblem, SolverOptions, solve_qp};
use crate::math::{hemisphere, n_coefficients, real_sym_sh_mrtrix};
use crate::models::{MultiCompartmentModel, SH_COEFF};
use crate::scheme::AcquisitionScheme;

/// Icosphere subdivisions for the positivity directions (321 on the hemisphere).
pub const POSITIVITY_SUBDIVISIONS: usize = 3;

/// Result of one deconvolution.
#[derive(Debug, Clone)]
pub struct CsdFit {
    /// Fitted parameter vector in the model's layout.
    pub parameters: Vec<Option<f64>>,
    /// FOD coefficients, if the model has an orientation-bearing kernel.
    pub sh_coeff: Option<Vec<f64>>,
    /// Volume fraction per kernel (also reported for a single kernel).
    pub volume_fractions: Vec<f64>,
    /// Sum of squared residuals over the diffusion-weighted measurements.
    pub sse: f64,
    pub rmse: f64,
    pub status: SolveStatus,
    pub iterations: usize,
}

/// One kernel's slice of the decision vector.
#[derive(Debug, Clone, Copy)]
struct Block {
    offset: usize,
    width: usize,
    oriented: bool,
}

#[derive(Debug)]
pub struct CsdOptimizer<'a> {
    scheme: &'a AcquisitionScheme,
    model: &'a MultiCompartmentModel,
    sh_order: usize,
    n_coef: usize,
    n_models: usize,
    unity_constraint: bool,
    sh_matrix_positivity: DMatrix<f64>,
    solver: SolverOptions,
}

impl<'a> CsdOptimizer<'a> {
    pub fn new(
        scheme: &'a AcquisitionScheme,
        model: &'a MultiCompartmentModel,
        sh_order: usize,
        unity_constraint: bool,
    ) -> Result<Self, CsdError> {
        Self::with_options(scheme, model, sh_order, unity_constraint, SolverOptions::default())
    }

    pub fn with_options(
        scheme: &'a AcquisitionScheme,
        model: &'a MultiCompartmentModel,
        sh_order: usize,
        unity_constraint: bool,
        solver: SolverOptions,
    ) -> Result<Self, CsdError> {
        let oriented = model.orientation_count();
        if oriented > 1 {
            return Err(CsdError::MultipleOrientedModels { count: oriented });
        }
        if sh_order % 2 != 0 {
            return Err(CsdError::InvalidShOrder(sh_order));
        }
        if oriented == 1 && model.sh_order() != sh_order {
            return Err(CsdError::ShOrderMismatch {
                model: model.sh_order(),
                optimizer: sh_order,
            });
        }
        if scheme.unique_dwi_indices().is_empty() {
            return Err(CsdError::InvalidScheme(
                "no diffusion-weighted shells to deconvolve".into(),
            ));
        }

        let positivity_directions = hemisphere(POSITIVITY_SUBDIVISIONS);
        let sh_matrix_positivity = real_sym_sh_mrtrix(sh_order, &positivity_directions);

        debug!(
            sh_order,
            n_coef = n_coefficients(sh_order),
            n_models = model.models().len(),
            positivity_directions = positivity_directions.len(),
            unity_constraint,
            "built CSD optimizer"
        );

        Ok(Self {
            scheme,
            model,
            sh_order,
            n_coef: n_coefficients(sh_order),
            n_models: model.models().len(),
            unity_constraint,
            sh_matrix_positivity,
            solver,
        })
    }

    pub fn sh_order(&self) -> usize {
        self.sh_order
    }

    pub fn n_coefficients(&self) -> usize {
        self.n_coef
    }

    pub fn unity_constraint(&self) -> bool {
        self.unity_constraint
    }

    pub fn scheme(&self) -> &AcquisitionScheme {
        self.scheme
    }

    pub fn model(&self) -> &MultiCompartmentModel {
        self.model
    }

    /// SH basis of order `sh_order` on the positivity hemisphere.
    pub fn positivity_matrix(&self) -> &DMatrix<f64> {
        &self.sh_matrix_positivity
    }

    /// Deconvolve one signal vector and return the fitted parameter vector.
    pub fn fit(&self, data: &[f64], x0: &[Option<f64>]) -> Result<Vec<Option<f64>>, CsdError> {
        Ok(self.fit_detailed(data, x0)?.parameters)
    }

    /// Deconvolve one signal vector, keeping fractions and fit diagnostics.
    pub fn fit_detailed(&self, data: &[f64], x0: &[Option<f64>]) -> Result<CsdFit, CsdError> {
        if data.len() != self.scheme.number_of_measurements() {
            return Err(CsdError::DimensionMismatch {
                what: "signal measurements",
                expected: self.scheme.number_of_measurements(),
                found: data.len(),
            });
        }
        if let Some(i) = data.iter().position(|v| !v.is_finite()) {
            return Err(CsdError::InvalidParameter {
                name: "signal".into(),
                reason: format!("measurement {i} is not finite"),
            });
        }

        // Step 1: kernel rotational harmonics at the given parameters.
        let rh = self.recover_rotational_harmonics(x0)?;

        // Step 2/3: variables and the stacked per-shell forward model.
        let blocks = self.blocks();
        let (design, rows) = self.design_matrix(&blocks, &rh);
        let target = DVector::from_iterator(rows.len(), rows.iter().map(|&i| data[i]));

        // Step 4: minimize the sum of squares under the constraints.
        let problem = self.constraints(&blocks, design.tr_mul(&design) * 2.0, design.tr_mul(&target) * -2.0);
        let solution = solve_qp(&problem, &self.solver)?;
        let x = solution.x;

        let residual = &design * &x - &target;
        let sse = residual.norm_squared();
        let rmse = (sse / rows.len() as f64).sqrt();

        // Step 5: write the solution back into the parameter layout.
        let sh_coeff = blocks
            .iter()
            .find(|b| b.oriented)
            .map(|b| x.rows(b.offset, b.width).iter().copied().collect::<Vec<f64>>());
        let volume_fractions: Vec<f64> = blocks
            .iter()
            .map(|b| x[b.offset] * 2.0 * PI.sqrt())
            .collect();

        let mut params = self.model.parameter_vector_to_parameters(x0)?;
        if let Some(sh) = &sh_coeff {
            params.insert(SH_COEFF, sh.clone());
        }
        if self.n_models > 1 {
            for (name, &f) in self.model.partial_volume_names().iter().zip(volume_fractions.iter()) {
                params.insert_scalar(name.clone(), f);
            }
        }
        let parameters = self.model.parameters_to_parameter_vector(&params)?;

        trace!(
            sse,
            iterations = solution.iterations,
            status = ?solution.status,
            "CSD fit"
        );

        Ok(CsdFit {
            parameters,
            sh_coeff,
            volume_fractions,
            sse,
            rmse,
            status: solution.status,
            iterations: solution.iterations,
        })
    }

    /// Rotational harmonics of every kernel, indexed `[model][dwi shell][order / 2]`.
    pub fn recover_rotational_harmonics(&self, x0: &[Option<f64>]) -> Result<Vec<Vec<Vec<f64>>>, CsdError> {
        let params = self.model.parameter_vector_to_parameters(x0)?;
        let params = self.model.add_linked_parameters_to_parameters(&params);

        let mut out = Vec::with_capacity(self.n_models);
        for (j, kernel) in self.model.models().iter().enumerate() {
            if let Some(missing) = self.model.required_parameters(j).find(|name| !params.contains(name)) {
                return Err(CsdError::MissingParameter(missing.to_string()));
            }
            let local = self.model.parameters_for_model(j, &params);
            out.push(kernel.rotational_harmonics_representation(self.scheme, &local)?);
        }
        Ok(out)
    }

    /// Forward-model signal for a fit (all measurements).
    ///
    /// b0 measurements are predicted as the sum of the volume fractions.
    pub fn predict(&self, x0: &[Option<f64>], fit: &CsdFit) -> Result<Vec<f64>, CsdError> {
        let rh = self.recover_rotational_harmonics(x0)?;
        let blocks = self.blocks();
        let (design, rows) = self.design_matrix(&blocks, &rh);

        let mut x = DVector::<f64>::zeros(self.n_variables(&blocks));
        for (j, b) in blocks.iter().enumerate() {
            if b.oriented {
                if let Some(sh) = &fit.sh_coeff {
                    for (k, v) in sh.iter().take(b.width).enumerate() {
                        x[b.offset + k] = *v;
                    }
                }
            } else if let Some(f) = fit.volume_fractions.get(j) {
                x[b.offset] = f / (2.0 * PI.sqrt());
            }
        }

        let b0_level: f64 = fit.volume_fractions.iter().sum();
        let mut out = vec![b0_level; self.scheme.number_of_measurements()];
        let predicted = &design * &x;
        for (k, &i) in rows.iter().enumerate() {
            out[i] = predicted[k];
        }
        Ok(out)
    }

    fn blocks(&self) -> Vec<Block> {
        let mut offset = 0;
        self.model
            .models()
            .iter()
            .map(|m| {
                let oriented = m.has_orientation();
                let width = if oriented { self.n_coef } else { 1 };
                let block = Block {
                    offset,
                    width,
                    oriented,
                };
                offset += width;
                block
            })
            .collect()
    }

    fn n_variables(&self, blocks: &[Block]) -> usize {
        blocks.last().map(|b| b.offset + b.width).unwrap_or(0)
    }

    /// Stacked forward model over the diffusion-weighted shells.
    ///
    /// Returns the matrix and, per row, the measurement index it predicts.
    fn design_matrix(&self, blocks: &[Block], rh: &[Vec<Vec<f64>>]) -> (DMatrix<f64>, Vec<usize>) {
        let scheme = self.scheme;
        let rows: Vec<usize> = scheme
            .unique_dwi_indices()
            .iter()
            .flat_map(|&s| scheme.shell_measurements(s).iter().copied())
            .collect();

        let mut design = DMatrix::<f64>::zeros(rows.len(), self.n_variables(blocks));
        let mut row0 = 0;
        for (i, &shell) in scheme.unique_dwi_indices().iter().enumerate() {
            let sh_mat = scheme.shell_sh_matrix(shell);
            let rh_order = scheme.shell_sh_orders()[shell];
            let n_rows = sh_mat.nrows();

            for (j, block) in blocks.iter().enumerate() {
                if block.oriented {
                    let prepared = prepare_rotational_harmonics(&rh[j][i], rh_order);
                    // Truncate to whichever of the FOD or the shell has fewer coefficients.
                    let k = prepared.len().min(self.n_coef);
                    for r in 0..n_rows {
                        for c in 0..k {
                            design[(row0 + r, block.offset + c)] = sh_mat[(r, c)] * prepared[c];
                        }
                    }
                } else {
                    let prepared = prepare_rotational_harmonics(&rh[j][i], 0);
                    for r in 0..n_rows {
                        design[(row0 + r, block.offset)] = sh_mat[(r, 0)] * prepared[0];
                    }
                }
            }
            row0 += n_rows;
        }

        (design, rows)
    }

    /// Attach the positivity rows, isotropic non-negativity rows and the
    /// optional unity row to the objective `½ xᵀ P x + qᵀ x`.
    fn constraints(&self, blocks: &[Block], p: DMatrix<f64>, q: DVector<f64>) -> QpProblem {
        let n = self.n_variables(blocks);
        let n_pos = if blocks.iter().any(|b| b.oriented) {
            self.sh_matrix_positivity.nrows()
        } else {
            0
        };
        let n_iso = blocks.iter().filter(|b| !b.oriented).count();

        let mut a_ineq = DMatrix::<f64>::zeros(n_pos + n_iso, n);
        let mut row = 0;
        for block in blocks {
            if block.oriented {
                a_ineq
                    .view_mut((row, block.offset), (n_pos, block.width))
                    .copy_from(&self.sh_matrix_positivity);
                row += n_pos;
            }
        }
        for block in blocks.iter().filter(|b| !b.oriented) {
            a_ineq[(row, block.offset)] = 1.0;
            row += 1;
        }

        let n_eq = usize::from(self.unity_constraint);
        let mut a_eq = DMatrix::<f64>::zeros(n_eq, n);
        if self.unity_constraint {
            for block in blocks {
                a_eq[(0, block.offset)] = 2.0 * PI.sqrt();
            }
        }

        QpProblem {
            p,
            q,
            b_ineq: DVector::zeros(a_ineq.nrows()),
            a_ineq,
            a_eq,
            b_eq: DVector::from_element(n_eq, 1.0),
        }
    }
}

/// Expand per-order rotational harmonics to per-coefficient convolution weights.
///
/// Order `n` contributes `2n + 1` copies of `rh[n / 2] · √(4π / (2n + 1))`.
/// Orders missing from `rh` count as zero.
pub fn prepare_rotational_harmonics(rh: &[f64], order: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(n_coefficients(order));
    for n in (0..=order).step_by(2) {
        let value = rh.get(n / 2).copied().unwrap_or(0.0) * (4.0 * PI / (2 * n + 1) as f64).sqrt();
        out.extend(std::iter::repeat_n(value, 2 * n + 1));
    }
    out
}
