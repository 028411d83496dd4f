//! asqp: an active-set solver for sparse convex quadratic programs
//!
//! This library solves problems of the form
//!
//! ```text
//! minimize    (1/2) x^T H x + g^T x
//! subject to  lbx <= x <= ubx
//!             lba <= A x <= uba
//! ```
//!
//! with H symmetric positive semidefinite and all data sparse (CSC). Bounds
//! may be infinite; equal bounds make equalities.
//!
//! # Algorithm
//!
//! A primal-dual active-set method with the working set encoded in the sign
//! pattern of the multiplier vector:
//!
//! - **Fixed-sparsity working KKT**: the KKT matrix carries its full
//!   structural diagonal, so activating or releasing a constraint is a value
//!   rewrite, never a symbolic change
//! - **Sparse QR refactorization** once per iteration, with rank monitoring
//!   through min |diag(R)|
//! - **Composite ratio test** enforcing primal feasibility and a
//!   non-increasing dual infeasibility across multiplier sign crossings
//! - **Singularity recovery** that flips a constraint selected through a
//!   left null vector of the working KKT
//!
//! The caller supplies the initial guess (warm start); there is no
//! feasibility phase.
//!
//! # Example
//!
//! ```ignore
//! use asqp_core::{solve, QpProblem, SolverSettings};
//! use asqp_core::linalg::sparse;
//!
//! // Minimize x1^2 + x2^2 - 4 x1 - 6 x2 inside the unit box
//! let problem = QpProblem {
//!     h: sparse::from_triplets(2, 2, vec![(0, 0, 2.0), (1, 1, 2.0)]),
//!     g: vec![-4.0, -6.0],
//!     a: sparse::from_triplets(0, 2, vec![]),
//!     lbx: vec![0.0, 0.0],
//!     ubx: vec![1.0, 1.0],
//!     lba: vec![],
//!     uba: vec![],
//! };
//!
//! let result = solve(&problem, &SolverSettings::default())?;
//! println!("x = {:?}, f = {}", result.x, result.obj_val);
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::too_many_arguments)]

pub mod linalg;
pub mod problem;
pub mod solver;

// Re-export main types
pub use problem::{
    QpProblem, SolveInfo, SolveResult, SolveStatus, SolverSettings, WarmStart,
};
pub use solver::SolverError;

/// Main solve entry point.
///
/// Solves a convex QP with the active-set method. The result carries the
/// primal solution, the box and constraint multipliers (their signs encode
/// which bounds are active), the objective value, and diagnostics.
///
/// # Errors
///
/// Fails fast on malformed problems and on constraint structures that leave
/// some index without an admissible multiplier sign. Slow convergence and
/// irrecoverable singularity are reported through
/// [`SolveResult::status`](problem::SolveResult), not as errors.
pub fn solve(
    problem: &QpProblem,
    settings: &SolverSettings,
) -> Result<SolveResult, SolverError> {
    solver::solve_active_set(problem, settings)
}
