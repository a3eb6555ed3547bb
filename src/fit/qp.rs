//! Dense convex quadratic programs, solved with `solvr`.
//!
//! ```text
//! minimize    ½ xᵀ P x + qᵀ x
//! subject to  A_ineq x ≥ b_ineq
//!             A_eq x = b_eq
//! ```
//!
//! Problems are small and dense (tens of variables, a few hundred
//! constraints). They are assembled with `nalgebra`, copied into row-major
//! `numr` tensors and handed to solvr's interior point method on the CPU
//! runtime. A constraint block with zero rows is omitted.

use nalgebra::{DMatrix, DVector};
use numr::runtime::cpu::{CpuClient, CpuDevice, CpuRuntime};
use numr::tensor::Tensor;
use solvr::optimize::{QpAlgorithms, QpMethod, QpOptions};
use tracing::warn;

use crate::domain::SolveStatus;
use crate::error::SolverError;

#[derive(Debug, Clone)]
pub struct SolverOptions {
    pub max_iter: usize,
    /// Convergence tolerance of the interior point iteration.
    pub tol: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iter: 200,
            tol: 1e-8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QpProblem {
    pub p: DMatrix<f64>,
    pub q: DVector<f64>,
    pub a_ineq: DMatrix<f64>,
    pub b_ineq: DVector<f64>,
    pub a_eq: DMatrix<f64>,
    pub b_eq: DVector<f64>,
}

impl QpProblem {
    /// Problem without constraint rows; the variable count is `q.len()`.
    pub fn unconstrained(p: DMatrix<f64>, q: DVector<f64>) -> Self {
        let n = q.len();
        Self {
            p,
            q,
            a_ineq: DMatrix::zeros(0, n),
            b_ineq: DVector::zeros(0),
            a_eq: DMatrix::zeros(0, n),
            b_eq: DVector::zeros(0),
        }
    }

    fn validate(&self) -> Result<(), SolverError> {
        let n = self.q.len();
        if self.p.shape() != (n, n) {
            return Err(SolverError::Dimensions(format!(
                "P is {:?}, expected ({n}, {n})",
                self.p.shape()
            )));
        }
        for (name, a, b) in [("A_ineq", &self.a_ineq, &self.b_ineq), ("A_eq", &self.a_eq, &self.b_eq)] {
            if a.ncols() != n || a.nrows() != b.len() {
                return Err(SolverError::Dimensions(format!(
                    "{name} is {:?} with {} bounds, expected {n} columns",
                    a.shape(),
                    b.len()
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct QpSolution {
    pub x: DVector<f64>,
    pub status: SolveStatus,
    pub iterations: usize,
    pub objective: f64,
}

/// Solve a convex QP. Running out of iterations is reported through
/// [`QpSolution::status`], not as an error.
pub fn solve_qp(problem: &QpProblem, opts: &SolverOptions) -> Result<QpSolution, SolverError> {
    problem.validate()?;

    let device = CpuDevice::new();
    let client = CpuClient::new(device.clone());

    let p = matrix_tensor(&problem.p, &device);
    let q = vector_tensor(&problem.q, &device);
    let (a_eq, b_eq) = constraint_tensors(&problem.a_eq, &problem.b_eq, &device);
    let (a_ineq, b_ineq) = constraint_tensors(&problem.a_ineq, &problem.b_ineq, &device);

    let options = QpOptions {
        method: QpMethod::InteriorPoint,
        max_iter: opts.max_iter,
        tol: opts.tol,
        ..QpOptions::default()
    };
    let result = client
        .solve_qp(
            &p,
            &q,
            a_eq.as_ref(),
            b_eq.as_ref(),
            a_ineq.as_ref(),
            b_ineq.as_ref(),
            &options,
        )
        .map_err(|e| SolverError::Backend(e.to_string()))?;

    let x: Vec<f64> = result.x.to_vec();
    if x.len() != problem.q.len() {
        return Err(SolverError::Dimensions(format!(
            "solver returned {} values for {} variables",
            x.len(),
            problem.q.len()
        )));
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(SolverError::NonFinite {
            iteration: result.iterations,
        });
    }

    let status = if result.converged {
        SolveStatus::Solved
    } else {
        warn!(
            iterations = result.iterations,
            max_iter = opts.max_iter,
            "QP did not converge"
        );
        SolveStatus::MaxIterations
    };

    Ok(QpSolution {
        x: DVector::from_vec(x),
        status,
        iterations: result.iterations,
        objective: result.fun,
    })
}

/// Row-major copy of a dense matrix.
fn matrix_tensor(m: &DMatrix<f64>, device: &CpuDevice) -> Tensor<CpuRuntime> {
    // Column-major storage of the transpose is row-major storage of `m`.
    Tensor::<CpuRuntime>::from_slice(m.transpose().as_slice(), &[m.nrows(), m.ncols()], device)
}

fn vector_tensor(v: &DVector<f64>, device: &CpuDevice) -> Tensor<CpuRuntime> {
    Tensor::<CpuRuntime>::from_slice(v.as_slice(), &[v.len()], device)
}

fn constraint_tensors(
    a: &DMatrix<f64>,
    b: &DVector<f64>,
    device: &CpuDevice,
) -> (Option<Tensor<CpuRuntime>>, Option<Tensor<CpuRuntime>>) {
    if a.nrows() == 0 {
        return (None, None);
    }
    (Some(matrix_tensor(a, device)), Some(vector_tensor(b, device)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn diag_problem() -> QpProblem {
        // min ½‖x − (1, −2)‖²  s.t. x ≥ 0
        QpProblem {
            a_ineq: DMatrix::identity(2, 2),
            b_ineq: DVector::zeros(2),
            ..QpProblem::unconstrained(DMatrix::identity(2, 2), DVector::from_row_slice(&[-1.0, 2.0]))
        }
    }

    #[test]
    fn unconstrained_minimum() {
        let problem = QpProblem::unconstrained(DMatrix::identity(2, 2), DVector::from_row_slice(&[-1.0, -1.0]));
        let sol = solve_qp(&problem, &SolverOptions::default()).unwrap();
        assert_eq!(sol.status, SolveStatus::Solved);
        assert_abs_diff_eq!(sol.x[0], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(sol.x[1], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(sol.objective, -1.0, epsilon = 1e-6);
    }

    #[test]
    fn nonnegative_projection() {
        let sol = solve_qp(&diag_problem(), &SolverOptions::default()).unwrap();
        assert_eq!(sol.status, SolveStatus::Solved);
        assert_abs_diff_eq!(sol.x[0], 1.0, epsilon = 1e-4);
        assert_abs_diff_eq!(sol.x[1], 0.0, epsilon = 1e-4);
    }

    #[test]
    fn equality_constrained_simplex() {
        // min ½‖x − (0.9, 0.5)‖²  s.t. x ≥ 0, x0 + x1 = 1  →  x = (0.7, 0.3)
        let problem = QpProblem {
            a_ineq: DMatrix::identity(2, 2),
            b_ineq: DVector::zeros(2),
            a_eq: DMatrix::from_row_slice(1, 2, &[1.0, 1.0]),
            b_eq: DVector::from_row_slice(&[1.0]),
            ..QpProblem::unconstrained(DMatrix::identity(2, 2), DVector::from_row_slice(&[-0.9, -0.5]))
        };
        let sol = solve_qp(&problem, &SolverOptions::default()).unwrap();
        assert_abs_diff_eq!(sol.x[0], 0.7, epsilon = 1e-4);
        assert_abs_diff_eq!(sol.x[1], 0.3, epsilon = 1e-4);
        assert_abs_diff_eq!(sol.x.sum(), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn row_major_layout_is_preserved() {
        // x0 ≥ 2 binds, x0 + x1 ≥ −5 does not. A transposed copy would give (0.5, 1.5).
        let problem = QpProblem {
            a_ineq: DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 1.0, 1.0]),
            b_ineq: DVector::from_row_slice(&[2.0, -5.0]),
            ..QpProblem::unconstrained(DMatrix::identity(2, 2), DVector::from_row_slice(&[0.0, -1.0]))
        };
        let sol = solve_qp(&problem, &SolverOptions::default()).unwrap();
        assert_abs_diff_eq!(sol.x[0], 2.0, epsilon = 1e-4);
        assert_abs_diff_eq!(sol.x[1], 1.0, epsilon = 1e-4);
    }

    #[test]
    fn iteration_limit_is_a_status_not_an_error() {
        let opts = SolverOptions {
            max_iter: 1,
            ..SolverOptions::default()
        };
        let sol = solve_qp(&diag_problem(), &opts).unwrap();
        assert_eq!(sol.status, SolveStatus::MaxIterations);
        assert!(sol.iterations <= 1);
    }

    #[test]
    fn inconsistent_dimensions_are_rejected() {
        let mut problem = diag_problem();
        problem.b_ineq = DVector::zeros(3);
        assert!(matches!(
            solve_qp(&problem, &SolverOptions::default()),
            Err(SolverError::Dimensions(_))
        ));
    }
}
