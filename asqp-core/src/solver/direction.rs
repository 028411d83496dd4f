//! Search-direction computation.
//!
//! Builds the working-KKT residual from the current iterate, solves the
//! transposed working system for the primal-dual step, and derives the
//! multiplier step and the dual-infeasibility tangent.

use super::workspace::Workspace;
use crate::linalg::qr::SparseQr;
use crate::linalg::sparse::{self, SparseCsc};

/// Compute the search direction (dz, dlam) and the tangent tinfeas.
///
/// Nonsingular case: the residual is
///
/// ```text
/// r_i = z_i - ubz_i    if lam_i > 0
///       z_i - lbz_i    if lam_i < 0
///       glag_i         if lam_i = 0, i < n
///       -lam_i         if lam_i = 0, i >= n
/// ```
///
/// and `dz` solves `Kw' dz = -r`. Singular case: `dz` is a null-space column
/// combination through the deficient column `imin` of the last
/// factorization.
pub fn compute_direction(
    h: &SparseCsc,
    a: &SparseCsc,
    ws: &mut Workspace,
    qr: &SparseQr,
    singular: bool,
    imin: usize,
) {
    let n = ws.n;
    let nz = n + ws.m;

    if singular {
        qr.null_column_combination(imin, &mut ws.dz);
    } else {
        for i in 0..nz {
            ws.dz[i] = if ws.lam[i] > 0.0 {
                ws.z[i] - ws.ubz[i]
            } else if ws.lam[i] < 0.0 {
                ws.z[i] - ws.lbz[i]
            } else if i < n {
                ws.glag[i]
            } else {
                -ws.lam[i]
            };
        }
        for v in ws.dz.iter_mut() {
            *v = -*v;
        }
        qr.solve_transposed(&mut ws.dz);
    }

    // Multiplier step on the box block: dlam_x = -(H dz_x + A^T dlam_a),
    // where the a-block of dz still holds the multiplier part of the solve
    {
        let (dzx, dza) = ws.dz.split_at(n);
        let dlx = &mut ws.dlam[..n];
        sparse::spmv(h, dzx, dlx, 1.0, 0.0);
        sparse::spmv_transpose(a, dza, dlx, 1.0, 1.0);
        for v in dlx.iter_mut() {
            *v = -*v;
        }
    }

    // Inactive boxes stay inactive along the direction
    for i in 0..n {
        if ws.lam[i] == 0.0 {
            ws.dlam[i] = 0.0;
        }
    }

    // Multiplier step on the constraint block, then overwrite the a-block of
    // dz with the induced constraint motion
    for i in n..nz {
        ws.dlam[i] = ws.dz[i];
    }
    {
        let (dzx, dza) = ws.dz.split_at_mut(n);
        sparse::spmv(a, dzx, dza, 1.0, 0.0);
    }

    // Tangent of the dual infeasibility at tau = 0
    sparse::spmv(h, &ws.dz[..n], &mut ws.tinfeas, 1.0, 0.0);
    sparse::spmv_transpose(a, &ws.dlam[n..], &mut ws.tinfeas, 1.0, 1.0);
    for i in 0..n {
        ws.tinfeas[i] += ws.dlam[i];
    }
}
