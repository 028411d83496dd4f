//! Singularity recovery.
//!
//! When the working KKT is rank deficient, one constraint must change its
//! working-set status to restore rank. A left null vector `w` of the working
//! matrix identifies which column swaps do it: exchanging column i between
//! its active and inactive forms raises the rank iff the swap has a nonzero
//! component along `w`. Among the admissible candidates the one reachable
//! with the smallest step along the null-space direction wins.

use super::workspace::Workspace;
use super::{IterationErrors, MIN_FLIP_TAU, SINGULAR_TOL};
use crate::linalg::kkt::KktSystem;
use crate::linalg::qr::SparseQr;
use crate::linalg::sparse::SparseCsc;

/// Outcome of a recovery attempt.
pub enum Recovery {
    /// Direction rescaled so tau = 1 reaches the flip point; the sign change
    /// at `index` is scheduled for the next iteration.
    Flip { index: usize, sign: i32 },
    /// The selected flip is already at hand; take a zero step and let the
    /// next iteration apply it.
    ZeroStep { index: usize, sign: i32 },
    /// No candidate can restore rank.
    Stuck,
}

/// Select a working-set flip that restores rank, rescaling the direction so
/// that the ratio test sees the flip point at tau = 1.
///
/// Refactorizes the transposed working KKT in place to extract the left null
/// vector; the original factorization is not needed again this iteration.
pub fn recover(
    ws: &mut Workspace,
    kkt: &mut KktSystem,
    qr: &mut SparseQr,
    at: &SparseCsc,
    errors: &IterationErrors,
) -> Recovery {
    let n = ws.n;
    let nz = n + ws.m;

    // Signed tangents of the primal and dual errors along the direction; the
    // dominant error decides which sign of tau is allowed to grow
    let prtau = match errors.iprerr {
        None => 0.0,
        Some(i) => {
            if errors.prerr_pos {
                ws.dz[i] / errors.prerr
            } else {
                -ws.dz[i] / errors.prerr
            }
        }
    };
    let dutau = match errors.iduerr {
        None => 0.0,
        Some(i) => ws.tinfeas[i] / ws.infeas[i],
    };
    let derr = if errors.prerr >= errors.duerr {
        prtau
    } else {
        dutau
    };

    // Left null vector of the working KKT via QR of its transpose
    kkt.transpose_values();
    qr.factorize(kkt.vals());
    let (_, imin_tr) = qr.min_diag();
    qr.null_column_combination(imin_tr, &mut ws.w);

    let mut best_tau = f64::INFINITY;
    let mut sing_ind: Option<usize> = None;
    let mut sing_sign: i32 = 0;

    for i in 0..nz {
        // The direction must actually move this constraint
        let step = if i < n { ws.dz[i] } else { ws.dlam[i] };
        if step.abs() < SINGULAR_TOL {
            continue;
        }

        // Rank test: d = w' (flipped column - base column)
        let mut d = if i < n { ws.w[i] } else { -ws.w[i] };
        let col = kkt.base().outer_view(i).unwrap();
        for (row, &val) in col.iter() {
            d -= val * ws.w[row];
        }
        if d.abs() < SINGULAR_TOL {
            continue;
        }

        // Deactivating a constraint at the dual-error bound must not push
        // the error up
        if ws.lam[i] != 0.0 {
            let mut at_bound = false;
            let mut increasing = false;
            if i < n {
                if errors.duerr == ws.glag[i].abs() {
                    at_bound = true;
                    increasing = (ws.glag[i] > 0.0) != (ws.lam[i] > 0.0);
                }
            } else {
                let arow = at.outer_view(i - n).unwrap();
                for (j, &aij) in arow.iter() {
                    if errors.duerr == (ws.infeas[j] - aij * ws.lam[i]).abs() {
                        at_bound = true;
                        increasing = aij != 0.0
                            && (ws.infeas[j] > 0.0) != ((aij > 0.0) == (ws.lam[i] > 0.0));
                        if increasing {
                            break;
                        }
                    }
                }
            }
            if at_bound && increasing {
                continue;
            }
        }

        if ws.lam[i] == 0.0 {
            if ws.dz[i].abs() < SINGULAR_TOL {
                continue;
            }
            // Step to the lower bound
            if !ws.neverlower[i] {
                let tau_test = (ws.lbz[i] - ws.z[i]) / ws.dz[i];
                if !((derr > 0.0 && tau_test > 0.0) || (derr < 0.0 && tau_test < 0.0))
                    && tau_test.abs() >= MIN_FLIP_TAU
                    && tau_test.abs() < best_tau.abs()
                {
                    best_tau = tau_test;
                    sing_ind = Some(i);
                    sing_sign = -1;
                }
            }
            // Step to the upper bound
            if !ws.neverupper[i] {
                let tau_test = (ws.ubz[i] - ws.z[i]) / ws.dz[i];
                if !((derr > 0.0 && tau_test > 0.0) || (derr < 0.0 && tau_test < 0.0))
                    && tau_test.abs() >= MIN_FLIP_TAU
                    && tau_test.abs() < best_tau.abs()
                {
                    best_tau = tau_test;
                    sing_ind = Some(i);
                    sing_sign = 1;
                }
            }
        } else {
            if ws.dlam[i].abs() < SINGULAR_TOL {
                continue;
            }
            // Step to a zero multiplier
            if !ws.neverzero[i] {
                let tau_test = -ws.lam[i] / ws.dlam[i];
                if (derr > 0.0 && tau_test > 0.0) || (derr < 0.0 && tau_test < 0.0) {
                    continue;
                }
                if tau_test.abs() < best_tau.abs() {
                    best_tau = tau_test;
                    sing_ind = Some(i);
                    sing_sign = 0;
                }
            }
        }
    }

    let Some(index) = sing_ind else {
        return Recovery::Stuck;
    };

    if best_tau.abs() < SINGULAR_TOL {
        return Recovery::ZeroStep {
            index,
            sign: sing_sign,
        };
    }

    // Rescale so that tau = 1 is the full step to the flip point
    for v in ws.dz.iter_mut() {
        *v *= best_tau;
    }
    for v in ws.dlam.iter_mut() {
        *v *= best_tau;
    }
    for v in ws.tinfeas.iter_mut() {
        *v *= best_tau;
    }

    Recovery::Flip {
        index,
        sign: sing_sign,
    }
}
