//! Step-length engine.
//!
//! Finds the largest tau in [0, 1] that keeps the primal error from growing
//! past its current level and holds the dual infeasibility under its bound
//! across the piecewise-linear segments created by multiplier sign
//! crossings, then applies the step and enforces multiplier signs.

use super::workspace::Workspace;
use super::{DMIN, ERR_FLOOR};
use crate::linalg::sparse::SparseCsc;
use std::fmt::Write;

/// Result of one ratio test + step application.
pub struct StepOutcome {
    /// Accepted step length
    pub tau: f64,
    /// Both dz and dlam were identically zero
    pub zero_direction: bool,
}

/// Run the ratio test over the current direction and apply the step.
///
/// `at` is the transpose of the constraint matrix; its columns are the rows
/// of A, used to update the dual-infeasibility tangent when a constraint
/// multiplier snaps to zero. `new_active_set` is raised whenever the working
/// set changes; `msg` receives a note describing the last change.
pub fn take_step(
    ws: &mut Workspace,
    at: &SparseCsc,
    prerr: f64,
    duerr: f64,
    new_active_set: &mut bool,
    msg: &mut String,
) -> StepOutcome {
    let n = ws.n;
    let nz = n + ws.m;

    let mut tau = 1.0;
    let mut index: Option<usize> = None;
    let mut sign: i32 = 0;

    let zero_direction = ws.dz.iter().all(|&v| v == 0.0) && ws.dlam.iter().all(|&v| v == 0.0);
    if zero_direction {
        tau = 0.0;
    }

    // Primal bracket: shrink tau until no component leaves its bound by more
    // than the acceptable primal error
    let e_pr = prerr.max(ERR_FLOOR);
    for i in 0..nz {
        if tau <= 0.0 {
            break;
        }
        let tau_prev = tau;
        if ws.dz[i] == 0.0 {
            continue;
        }
        // Already violating and not improving
        if ws.dz[i] < 0.0 {
            if ws.z[i] <= ws.lbz[i] - e_pr {
                tau = 0.0;
                index = Some(i);
                sign = -1;
                break;
            }
        } else if ws.z[i] >= ws.ubz[i] + e_pr {
            tau = 0.0;
            index = Some(i);
            sign = 1;
            break;
        }
        let trial = ws.z[i] + tau * ws.dz[i];
        if ws.dz[i] < 0.0 && trial < ws.lbz[i] - e_pr {
            tau = (ws.lbz[i] - e_pr - ws.z[i]) / ws.dz[i];
            index = Some(i);
            sign = -1;
        } else if ws.dz[i] > 0.0 && trial > ws.ubz[i] + e_pr {
            tau = (ws.ubz[i] + e_pr - ws.z[i]) / ws.dz[i];
            index = Some(i);
            sign = 1;
        }
        debug_assert!(tau <= tau_prev, "inconsistent step size calculation");
    }

    // Dual bracket: collect multipliers whose sign would cross within the
    // full step, ordered by crossing point. Entries that do not cross at the
    // current tau sit at 1.
    ws.crossing.fill(1.0);
    ws.order.clear();
    for i in 0..nz {
        if ws.dlam[i] == 0.0 || ws.lam[i] == 0.0 {
            continue;
        }
        // Skip full steps that keep the sign
        if ws.lam[i] > 0.0 {
            if ws.lam[i] >= -ws.dlam[i] {
                continue;
            }
        } else if ws.lam[i] <= -ws.dlam[i] {
            continue;
        }
        let trial = ws.lam[i] + tau * ws.dlam[i];
        if (ws.lam[i] > 0.0 && trial < 0.0) || (ws.lam[i] < 0.0 && trial > 0.0) {
            ws.crossing[i] = -ws.lam[i] / ws.dlam[i];
        }
        ws.order.push(i);
    }
    {
        let crossing = &ws.crossing;
        ws.order
            .sort_by(|&a, &b| crossing[a].total_cmp(&crossing[b]));
    }

    // Walk the segments between crossings. The dual infeasibility is affine
    // on each segment: infeas(tau) = infeas(tau_k) + dtau * tinfeas, and
    // tinfeas jumps when a multiplier snaps out at a crossing.
    let e_du = duerr.max(ERR_FLOOR);
    let mut tau_k = 0.0;
    for pos in 0..ws.order.len() {
        let i = ws.order[pos];
        let dtau = ws.crossing[i] - tau_k;
        // Would the bound be exceeded inside this segment?
        let mut found_tau = false;
        for k in 0..n {
            if (ws.infeas[k] + dtau * ws.tinfeas[k]).abs() > e_du {
                let clipped = (tau_k - dtau * (ws.infeas[k] / ws.tinfeas[k])).max(0.0);
                if clipped < tau {
                    found_tau = true;
                    tau = clipped;
                    index = None;
                    *new_active_set = true;
                    break;
                }
            }
        }
        if found_tau {
            break;
        }
        // Accept the crossing: advance the infeasibility, snap the
        // multiplier contribution out of the tangent
        tau_k = ws.crossing[i];
        for k in 0..n {
            ws.infeas[k] += dtau * ws.tinfeas[k];
        }
        if i < n {
            ws.tinfeas[i] -= ws.lam[i];
        } else {
            let col = at.outer_view(i - n).unwrap();
            for (row, &aij) in col.iter() {
                ws.tinfeas[row] -= aij * ws.lam[i];
            }
        }
        if Some(i) != index {
            *new_active_set = true;
            ws.lam[i] = if !ws.neverzero[i] {
                0.0
            } else if ws.lam[i] < 0.0 {
                DMIN
            } else {
                -DMIN
            };
            msg.clear();
            let _ = write!(msg, "Removed {}", i);
            ws.dlam[i] = 0.0;
        }
    }

    // A bound reached exactly at a full step is not an active-set change
    if tau == 1.0 {
        index = None;
    }

    // Primal step (x-block only; the a-block is refreshed from A x at the
    // top of the next iteration)
    for i in 0..n {
        ws.z[i] += tau * ws.dz[i];
    }

    // Multiplier step with sign enforcement
    for i in 0..nz {
        let mut s: i32 = if ws.lam[i] > 0.0 {
            1
        } else if ws.lam[i] < 0.0 {
            -1
        } else {
            0
        };
        if Some(i) == index && s != sign {
            msg.clear();
            let _ = write!(msg, "Added {} ({}->{})", i, s, sign);
            *new_active_set = true;
            s = sign;
        }
        ws.lam[i] += tau * ws.dlam[i];
        match s {
            -1 => ws.lam[i] = ws.lam[i].min(-DMIN),
            1 => ws.lam[i] = ws.lam[i].max(DMIN),
            _ => ws.lam[i] = 0.0,
        }
    }

    StepOutcome {
        tau,
        zero_direction,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::sparse;

    fn empty_at() -> SparseCsc {
        sparse::transpose(&sparse::from_triplets(0, 2, Vec::new()))
    }

    #[test]
    fn test_full_step_when_unconstrained() {
        let mut ws = Workspace::new(2, 0);
        ws.lbz.fill(f64::NEG_INFINITY);
        ws.ubz.fill(f64::INFINITY);
        ws.dz.copy_from_slice(&[2.0, 3.0]);
        ws.infeas.copy_from_slice(&[-4.0, -6.0]);
        ws.tinfeas.copy_from_slice(&[4.0, 6.0]);

        let at = empty_at();
        let mut changed = false;
        let mut msg = String::new();
        let out = take_step(&mut ws, &at, 0.0, 6.0, &mut changed, &mut msg);

        assert_eq!(out.tau, 1.0);
        assert!(!changed);
        assert_eq!(ws.z[0], 2.0);
        assert_eq!(ws.z[1], 3.0);
    }

    #[test]
    fn test_primal_bracket_clips_to_bound() {
        let mut ws = Workspace::new(2, 0);
        ws.lbz.fill(0.0);
        ws.ubz.fill(1.0);
        ws.dz.copy_from_slice(&[2.0, 3.0]);
        ws.infeas.copy_from_slice(&[-4.0, -6.0]);
        ws.tinfeas.copy_from_slice(&[4.0, 6.0]);

        let at = empty_at();
        let mut changed = false;
        let mut msg = String::new();
        let out = take_step(&mut ws, &at, 0.0, 6.0, &mut changed, &mut msg);

        // Component 1 hits its upper bound first: tau ~ 1/3, activation
        // recorded with positive sign
        assert!((out.tau - 1.0 / 3.0).abs() < 1e-6, "tau = {}", out.tau);
        assert!(changed);
        assert!(ws.lam[1] >= DMIN);
        assert_eq!(ws.lam[0], 0.0);
        assert!(msg.starts_with("Added 1"));
    }

    #[test]
    fn test_zero_direction() {
        let mut ws = Workspace::new(1, 0);
        ws.lbz.fill(f64::NEG_INFINITY);
        ws.ubz.fill(f64::INFINITY);

        let at = sparse::transpose(&sparse::from_triplets(0, 1, Vec::new()));
        let mut changed = false;
        let mut msg = String::new();
        let out = take_step(&mut ws, &at, 0.0, 0.0, &mut changed, &mut msg);

        assert!(out.zero_direction);
        assert_eq!(out.tau, 0.0);
        assert!(!changed);
    }

    #[test]
    fn test_dual_crossing_removes_multiplier() {
        // One active box multiplier crossing zero mid-step; no dual error
        // pressure, so the crossing is accepted and the constraint leaves
        // the working set
        let mut ws = Workspace::new(1, 0);
        ws.lbz.fill(0.0);
        ws.ubz.fill(10.0);
        ws.z[0] = 5.0;
        ws.lam[0] = 1.0;
        ws.dlam[0] = -2.0;
        ws.dz[0] = 0.1;
        ws.infeas[0] = 0.0;
        ws.tinfeas[0] = 0.0;

        let at = sparse::transpose(&sparse::from_triplets(0, 1, Vec::new()));
        let mut changed = false;
        let mut msg = String::new();
        let out = take_step(&mut ws, &at, 0.0, 1.0, &mut changed, &mut msg);

        assert_eq!(out.tau, 1.0);
        assert!(changed);
        assert_eq!(ws.lam[0], 0.0);
        assert_eq!(ws.dlam[0], 0.0);
        assert_eq!(msg, "Removed 0");
    }

    #[test]
    fn test_dual_crossing_flips_equality_sign() {
        // An equality multiplier crossing zero flips to the opposite sign
        // sentinel instead of deactivating
        let mut ws = Workspace::new(1, 0);
        ws.lbz.fill(1.0);
        ws.ubz.fill(1.0);
        ws.z[0] = 1.0;
        ws.neverzero[0] = true;
        ws.lam[0] = 1.0;
        ws.dlam[0] = -2.0;
        ws.dz[0] = 0.0;

        let at = sparse::transpose(&sparse::from_triplets(0, 1, Vec::new()));
        let mut changed = false;
        let mut msg = String::new();
        let _ = take_step(&mut ws, &at, 0.0, 1.0, &mut changed, &mut msg);

        assert!(changed);
        assert_eq!(ws.lam[0], -DMIN);
    }
}
