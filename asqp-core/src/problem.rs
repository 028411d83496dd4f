//! Problem data structures and validation.
//!
//! This module defines the canonical QP representation and all associated
//! types.

use crate::linalg::sparse::SparseCsc;
use std::fmt;

/// Convex quadratic program in canonical form.
///
/// ```text
/// minimize    (1/2) x^T H x + g^T x
/// subject to  lbx <= x <= ubx
///             lba <= A x <= uba
/// ```
///
/// Infinite bounds mean the corresponding side is unconstrained; equal lower
/// and upper bounds make a constraint an equality.
///
/// # Dimensions
///
/// - `n`: number of variables (length of g)
/// - `m`: number of linear constraints (rows of A)
/// - H: n × n, symmetric positive semidefinite; full symmetric storage or a
///   single triangle are both accepted
/// - A: m × n
#[derive(Debug, Clone)]
pub struct QpProblem {
    /// Quadratic cost matrix H (n × n, CSC)
    pub h: SparseCsc,

    /// Linear cost vector g (length n)
    pub g: Vec<f64>,

    /// Constraint matrix A (m × n, CSC)
    pub a: SparseCsc,

    /// Lower variable bounds (length n, -inf allowed)
    pub lbx: Vec<f64>,

    /// Upper variable bounds (length n, +inf allowed)
    pub ubx: Vec<f64>,

    /// Lower constraint bounds (length m, -inf allowed)
    pub lba: Vec<f64>,

    /// Upper constraint bounds (length m, +inf allowed)
    pub uba: Vec<f64>,
}

impl QpProblem {
    /// Get the number of variables (n)
    pub fn num_vars(&self) -> usize {
        self.g.len()
    }

    /// Get the number of linear constraints (m)
    pub fn num_constraints(&self) -> usize {
        self.a.rows()
    }

    /// Validate problem dimensions and bounds.
    pub fn validate(&self) -> Result<(), String> {
        let n = self.num_vars();
        let m = self.num_constraints();

        if self.h.rows() != n || self.h.cols() != n {
            return Err(format!(
                "H has shape {}×{}, expected {}×{}",
                self.h.rows(), self.h.cols(), n, n
            ));
        }
        if self.a.cols() != n {
            return Err(format!("A has {} cols, expected {}", self.a.cols(), n));
        }
        if self.lbx.len() != n || self.ubx.len() != n {
            return Err(format!(
                "Variable bounds have lengths {}/{}, expected {}",
                self.lbx.len(), self.ubx.len(), n
            ));
        }
        if self.lba.len() != m || self.uba.len() != m {
            return Err(format!(
                "Constraint bounds have lengths {}/{}, expected {}",
                self.lba.len(), self.uba.len(), m
            ));
        }

        check_bounds("variable", &self.lbx, &self.ubx)?;
        check_bounds("constraint", &self.lba, &self.uba)?;
        Ok(())
    }
}

fn check_bounds(what: &str, lb: &[f64], ub: &[f64]) -> Result<(), String> {
    for (i, (&l, &u)) in lb.iter().zip(ub.iter()).enumerate() {
        if l.is_nan() || u.is_nan() {
            return Err(format!("{} bound {} is NaN", what, i));
        }
        if l > u {
            return Err(format!(
                "{} {} has lower bound {} > upper bound {}",
                what, i, l, u
            ));
        }
        if l == f64::INFINITY {
            return Err(format!("{} {} has lower bound +inf", what, i));
        }
        if u == f64::NEG_INFINITY {
            return Err(format!("{} {} has upper bound -inf", what, i));
        }
    }
    Ok(())
}

/// Optional warm-start data.
///
/// Missing fields start at zero; the solver does not run a feasibility phase,
/// so the caller owns the quality of the initial guess.
#[derive(Debug, Clone, Default)]
pub struct WarmStart {
    /// Primal variables x (length n)
    pub x: Option<Vec<f64>>,
    /// Box multipliers (length n)
    pub lam_x: Option<Vec<f64>>,
    /// Constraint multipliers (length m)
    pub lam_a: Option<Vec<f64>>,
}

/// Solver settings and parameters.
#[derive(Debug, Clone)]
pub struct SolverSettings {
    /// Maximum number of active-set iterations
    pub max_iter: usize,

    /// Tolerance. Reserved: convergence is declared when an iteration leaves
    /// the working set unchanged, which drives the residuals to their
    /// attainable floor.
    pub tol: f64,

    /// Enable verbose logging
    pub verbose: bool,

    /// Optional warm-start values for repeated solves
    pub warm_start: Option<WarmStart>,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_iter: 1000,
            tol: 1e-8,
            verbose: false,
            warm_start: None,
        }
    }
}

/// Solution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    /// The working set stabilized; first-order conditions hold at the
    /// returned point
    Optimal,

    /// Maximum iterations reached
    MaxIters,

    /// The working set became singular and no flip could restore rank
    NumericalError,
}

impl SolveStatus {
    /// Whether the solve terminated successfully.
    pub fn is_optimal(&self) -> bool {
        matches!(self, SolveStatus::Optimal)
    }
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolveStatus::Optimal => write!(f, "Optimal"),
            SolveStatus::MaxIters => write!(f, "MaxIters"),
            SolveStatus::NumericalError => write!(f, "Numerical Error"),
        }
    }
}

/// Solve result with solution and diagnostics.
#[derive(Debug, Clone)]
pub struct SolveResult {
    /// Solution status
    pub status: SolveStatus,

    /// Primal solution x (length n)
    pub x: Vec<f64>,

    /// Box multipliers (length n); the sign encodes the active bound
    pub lam_x: Vec<f64>,

    /// Constraint multipliers (length m)
    pub lam_a: Vec<f64>,

    /// Objective value at solution
    pub obj_val: f64,

    /// Detailed solve information
    pub info: SolveInfo,
}

/// Detailed solve information and diagnostics.
#[derive(Debug, Clone)]
pub struct SolveInfo {
    /// Number of iterations completed
    pub iters: usize,

    /// Total solve time (milliseconds)
    pub solve_time_ms: u64,

    /// Final primal error (largest bound violation)
    pub primal_err: f64,

    /// Final dual error (largest stationarity violation)
    pub dual_err: f64,

    /// Last accepted step length
    pub last_tau: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::sparse;

    fn valid_problem() -> QpProblem {
        QpProblem {
            h: sparse::from_triplets(2, 2, vec![(0, 0, 2.0), (1, 1, 2.0)]),
            g: vec![-4.0, -6.0],
            a: sparse::from_triplets(1, 2, vec![(0, 0, 1.0), (0, 1, 1.0)]),
            lbx: vec![0.0, 0.0],
            ubx: vec![1.0, 1.0],
            lba: vec![f64::NEG_INFINITY],
            uba: vec![1.5],
        }
    }

    #[test]
    fn test_validate_ok() {
        assert!(valid_problem().validate().is_ok());
    }

    #[test]
    fn test_validate_dimension_mismatch() {
        let mut prob = valid_problem();
        prob.g = vec![1.0, 2.0, 3.0];
        assert!(prob.validate().is_err());
    }

    #[test]
    fn test_validate_crossed_bounds() {
        let mut prob = valid_problem();
        prob.lbx[0] = 2.0;
        assert!(prob.validate().is_err());
    }

    #[test]
    fn test_validate_nan_bound() {
        let mut prob = valid_problem();
        prob.uba[0] = f64::NAN;
        assert!(prob.validate().is_err());
    }

    #[test]
    fn test_validate_infinite_lower_bound() {
        let mut prob = valid_problem();
        prob.lbx[1] = f64::INFINITY;
        assert!(prob.validate().is_err());
    }
}
