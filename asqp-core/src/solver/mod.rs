//! Active-set iteration loop.
//!
//! Each iteration assembles the working KKT system for the current sign
//! pattern of the multipliers, factorizes it once, computes a primal-dual
//! direction (or a null-space direction when the working set is singular),
//! runs the ratio test, and applies the step. Convergence is declared when
//! an iteration leaves the working set unchanged.

pub mod direction;
pub mod ratio;
pub mod recovery;
pub mod workspace;

use crate::linalg::kkt::KktSystem;
use crate::linalg::qr::SparseQr;
use crate::linalg::sparse::{self, SparseCsc};
use crate::problem::{QpProblem, SolveInfo, SolveResult, SolveStatus, SolverSettings};
use recovery::Recovery;
use std::fmt::Write as _;
use std::time::Instant;
use thiserror::Error;
use workspace::Workspace;

/// Smallest strictly positive normalized double; sentinel magnitude for
/// "active with near-zero multiplier" so the sign survives arithmetic.
pub(crate) const DMIN: f64 = f64::MIN_POSITIVE;

/// Rank threshold on min |diag(R)|, also the direction-magnitude filter in
/// the recovery path.
pub(crate) const SINGULAR_TOL: f64 = 1e-12;

/// Entries at or below this magnitude count as numerically absent in the
/// all-zero-row scan.
pub(crate) const ZERO_ROW_TOL: f64 = 1e-16;

/// Smallest flip step for an inactive recovery candidate.
pub(crate) const MIN_FLIP_TAU: f64 = 1e-16;

/// Floor on the acceptable primal/dual error brackets.
pub(crate) const ERR_FLOOR: f64 = 1e-10;

/// Fatal solver errors; non-fatal outcomes are [`SolveStatus`] values.
#[derive(Error, Debug)]
pub enum SolverError {
    /// Problem validation failed
    #[error("invalid problem: {0}")]
    InvalidProblem(String),

    /// All three sign flags are set for one index: the constraint structure
    /// admits no multiplier sign
    #[error("no admissible multiplier sign for index {0}")]
    NoAdmissibleSign(usize),
}

/// Per-iteration error measures.
pub struct IterationErrors {
    /// Objective value 0.5 x'Hx + g'x
    pub fk: f64,
    /// Largest bound violation
    pub prerr: f64,
    /// Index attaining it
    pub iprerr: Option<usize>,
    /// Violation is above the upper bound (as opposed to below the lower)
    pub prerr_pos: bool,
    /// Largest stationarity violation |glag + lam_x|
    pub duerr: f64,
    /// Index attaining it
    pub iduerr: Option<usize>,
}

/// Solve a QP with the active-set method.
///
/// See [`crate::solve`] for the public entry point.
pub fn solve_active_set(
    problem: &QpProblem,
    settings: &SolverSettings,
) -> Result<SolveResult, SolverError> {
    problem.validate().map_err(SolverError::InvalidProblem)?;
    let start = Instant::now();

    let n = problem.num_vars();
    let m = problem.num_constraints();
    let nz = n + m;

    // One-time symbolic work: full symmetric Hessian, A transpose, KKT
    // patterns, QR pattern
    let h = sparse::symmetrize(&problem.h);
    let at = sparse::transpose(&problem.a);
    let mut kkt = KktSystem::new(&h, &problem.a, &at);
    let mut qr = SparseQr::new(kkt.colptr(), kkt.rowind(), nz);

    let mut ws = Workspace::new(n, m);
    ws.load(problem, settings.warm_start.as_ref());
    let zero_rows = kkt.zero_rows(ZERO_ROW_TOL);
    ws.init_signs(&problem.a, &zero_rows)?;

    if settings.verbose {
        println!("asqp active-set QP solver");
        println!("problem: n = {}, m = {}, nnz(H) = {}, nnz(A) = {}",
                 n, m, h.nnz(), problem.a.nnz());
    }

    let mut new_active_set = true;
    let mut tau = 0.0;
    let mut sing = false;
    let mut sing_ind: Option<usize> = None;
    let mut sing_sign: i32 = 0;
    let mut iter = 0usize;
    let mut msg = String::new();
    let mut errors;
    let status;

    loop {
        // Refresh the constraint block, the Lagrangian gradient, and the
        // active multipliers, then measure errors
        ws.refresh_constraint_values(&problem.a);
        ws.compute_lagrangian_gradient(&h, &problem.a, &problem.g);
        ws.refresh_active_multipliers();
        errors = evaluate_errors(&h, &problem.g, &mut ws);

        // Post-step sign management: a quiet previous iteration either
        // applies a scheduled singularity flip or activates the worst
        // primal violator
        if !new_active_set {
            if sing {
                debug_assert!(sing_ind.is_some(), "singular iteration without flip index");
                if let Some(ind) = sing_ind {
                    if settings.verbose {
                        println!(
                            "flip {}: sign {}, z = {:.6e}, lam = {:.6e}, tau = {:.6e}",
                            ind, sing_sign, ws.z[ind], ws.lam[ind], tau
                        );
                    }
                    ws.lam[ind] = match sing_sign {
                        0 => 0.0,
                        s if s < 0 => -DMIN,
                        _ => DMIN,
                    };
                    new_active_set = true;
                    msg.clear();
                    let _ = write!(msg, "sign(lam[{}])={}", ind, sing_sign);
                }
            } else if let Some(ip) = errors.iprerr {
                if ws.lam[ip] == 0.0 {
                    ws.lam[ip] = if ws.z[ip] < ws.lbz[ip] { -DMIN } else { DMIN };
                    new_active_set = true;
                    msg.clear();
                    let _ = write!(msg, "Added {} to reduce |pr|", ip);
                }
            }
        }

        // Assemble and factorize the working KKT, probe for rank deficiency
        kkt.load_working_set(&ws.lam);
        qr.factorize(kkt.vals());
        let (mina, imina) = qr.min_diag();
        sing = mina < SINGULAR_TOL;

        if settings.verbose {
            if iter % 10 == 0 {
                print_header();
            }
            print_row(iter, sing, &errors, mina, imina, tau, &msg);
        }

        // A full pass without any working-set change is convergence
        if !new_active_set {
            status = SolveStatus::Optimal;
            break;
        }

        if iter >= settings.max_iter {
            if settings.verbose {
                eprintln!("Maximum number of iterations reached");
            }
            status = SolveStatus::MaxIters;
            break;
        }

        iter += 1;
        msg.clear();
        new_active_set = false;

        direction::compute_direction(&h, &problem.a, &mut ws, &qr, sing, imina);

        if sing {
            match recovery::recover(&mut ws, &mut kkt, &mut qr, &at, &errors) {
                Recovery::Flip { index, sign } => {
                    sing_ind = Some(index);
                    sing_sign = sign;
                }
                Recovery::ZeroStep { index, sign } => {
                    // The flip is applied by the next iteration's post-step
                    // management
                    sing_ind = Some(index);
                    sing_sign = sign;
                    tau = 0.0;
                    continue;
                }
                Recovery::Stuck => {
                    if settings.verbose {
                        eprintln!("Cannot restore feasibility");
                    }
                    status = SolveStatus::NumericalError;
                    break;
                }
            }
        }

        let outcome = ratio::take_step(
            &mut ws,
            &at,
            errors.prerr,
            errors.duerr,
            &mut new_active_set,
            &mut msg,
        );
        if outcome.zero_direction && settings.verbose {
            eprintln!("No search direction");
        }
        tau = outcome.tau;
    }

    if settings.verbose {
        println!("status: {} after {} iterations", status, iter);
    }

    Ok(SolveResult {
        status,
        x: ws.z[..n].to_vec(),
        lam_x: ws.lam[..n].to_vec(),
        lam_a: ws.lam[n..].to_vec(),
        obj_val: errors.fk,
        info: SolveInfo {
            iters: iter,
            solve_time_ms: start.elapsed().as_millis() as u64,
            primal_err: errors.prerr,
            dual_err: errors.duerr,
            last_tau: tau,
        },
    })
}

/// Objective value and the primal/dual error measures at the current
/// iterate; refreshes the stored dual infeasibility.
fn evaluate_errors(h: &SparseCsc, g: &[f64], ws: &mut Workspace) -> IterationErrors {
    let n = ws.n;
    let nz = n + ws.m;

    let zx = &ws.z[..n];
    let fk = 0.5 * sparse::bilin(h, zx, zx) + dot(g, zx);

    let mut prerr = 0.0;
    let mut iprerr = None;
    let mut prerr_pos = false;
    for i in 0..nz {
        if ws.z[i] > ws.ubz[i] + prerr {
            prerr = ws.z[i] - ws.ubz[i];
            iprerr = Some(i);
            prerr_pos = true;
        } else if ws.z[i] < ws.lbz[i] - prerr {
            prerr = ws.lbz[i] - ws.z[i];
            iprerr = Some(i);
            prerr_pos = false;
        }
    }

    let mut duerr = 0.0;
    let mut iduerr = None;
    for i in 0..n {
        ws.infeas[i] = ws.glag[i] + ws.lam[i];
        let trial = ws.infeas[i].abs();
        if trial > duerr {
            duerr = trial;
            iduerr = Some(i);
        }
    }

    IterationErrors {
        fk,
        prerr,
        iprerr,
        prerr_pos,
        duerr,
        iduerr,
    }
}

#[inline]
fn dot(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(ai, bi)| ai * bi).sum()
}

fn print_header() {
    println!(
        "{:>9} {:>3} {:>14} {:>12} {:>5} {:>12} {:>5} {:>14} {:>5} {:>10}  {}",
        "Iteration", "", "fk", "|pr|", "con", "|du|", "var", "min(diag(R))", "con", "last tau",
        "Note"
    );
}

fn print_row(
    iter: usize,
    sing: bool,
    errors: &IterationErrors,
    mina: f64,
    imina: usize,
    tau: f64,
    msg: &str,
) {
    println!(
        "{:>9} {:>3} {:>14.6e} {:>12.4e} {:>5} {:>12.4e} {:>5} {:>14.6e} {:>5} {:>10.4e}  {}",
        iter,
        if sing { "(S)" } else { "(F)" },
        errors.fk,
        errors.prerr,
        errors.iprerr.map_or(-1, |i| i as i64),
        errors.duerr,
        errors.iduerr.map_or(-1, |i| i as i64),
        mina,
        imina,
        tau,
        msg
    );
}
