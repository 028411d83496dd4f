//! Pre-allocated state for the active-set iteration.
//!
//! All buffers are sized once from the problem dimensions and reused across
//! iterations; the iteration loop itself does not allocate.
//!
//! The working set has no container of its own: `sign(lam[i])` is the
//! canonical encoding (negative = lower bound active, positive = upper bound
//! active, zero = inactive). Active multipliers are clamped away from zero to
//! `DMIN` magnitude so arithmetic cannot silently deactivate a constraint.

use super::{SolverError, DMIN};
use crate::linalg::sparse::{self, SparseCsc};
use crate::problem::{QpProblem, WarmStart};

/// Iteration state and scratch buffers.
pub struct Workspace {
    /// Number of variables
    pub n: usize,
    /// Number of linear constraints
    pub m: usize,

    /// Stacked iterate [x; A x] (length n + m)
    pub z: Vec<f64>,
    /// Stacked lower bounds [lbx; lba]
    pub lbz: Vec<f64>,
    /// Stacked upper bounds [ubx; uba]
    pub ubz: Vec<f64>,
    /// Stacked multipliers [lam_x; lam_a]; the sign is the working set
    pub lam: Vec<f64>,

    /// Primal-dual search direction (length n + m)
    pub dz: Vec<f64>,
    /// Multiplier search direction (length n + m)
    pub dlam: Vec<f64>,

    /// Gradient of the Lagrangian restricted to x (length n)
    pub glag: Vec<f64>,
    /// Dual infeasibility glag + lam_x (length n)
    pub infeas: Vec<f64>,
    /// Its derivative along the current direction (length n)
    pub tinfeas: Vec<f64>,

    /// Dense scratch (length n + m); holds the left null vector during
    /// singularity recovery
    pub w: Vec<f64>,
    /// Sign-crossing step lengths for the dual bracket (length n + m)
    pub crossing: Vec<f64>,
    /// Crossing indices ordered by step length
    pub order: Vec<usize>,

    /// lam[i] must stay nonzero (equality, or zero KKT row)
    pub neverzero: Vec<bool>,
    /// lam[i] > 0 is forbidden (no upper bound, or zero KKT row)
    pub neverupper: Vec<bool>,
    /// lam[i] < 0 is forbidden (no lower bound, or zero KKT row)
    pub neverlower: Vec<bool>,
}

impl Workspace {
    /// Allocate all buffers for the given problem dimensions.
    pub fn new(n: usize, m: usize) -> Self {
        let nz = n + m;
        Self {
            n,
            m,
            z: vec![0.0; nz],
            lbz: vec![0.0; nz],
            ubz: vec![0.0; nz],
            lam: vec![0.0; nz],
            dz: vec![0.0; nz],
            dlam: vec![0.0; nz],
            glag: vec![0.0; n],
            infeas: vec![0.0; n],
            tinfeas: vec![0.0; n],
            w: vec![0.0; nz],
            crossing: vec![0.0; nz],
            order: Vec::with_capacity(nz),
            neverzero: vec![false; nz],
            neverupper: vec![false; nz],
            neverlower: vec![false; nz],
        }
    }

    /// Copy bounds and the caller's initial guess into the workspace.
    pub fn load(&mut self, problem: &QpProblem, warm: Option<&WarmStart>) {
        let n = self.n;
        self.lbz[..n].copy_from_slice(&problem.lbx);
        self.lbz[n..].copy_from_slice(&problem.lba);
        self.ubz[..n].copy_from_slice(&problem.ubx);
        self.ubz[n..].copy_from_slice(&problem.uba);

        self.z.fill(0.0);
        self.lam.fill(0.0);
        if let Some(warm) = warm {
            if let Some(x) = &warm.x {
                assert_eq!(x.len(), n, "warm-start x has wrong length");
                self.z[..n].copy_from_slice(x);
            }
            if let Some(lam_x) = &warm.lam_x {
                assert_eq!(lam_x.len(), n, "warm-start lam_x has wrong length");
                self.lam[..n].copy_from_slice(lam_x);
            }
            if let Some(lam_a) = &warm.lam_a {
                assert_eq!(lam_a.len(), self.m, "warm-start lam_a has wrong length");
                self.lam[n..].copy_from_slice(lam_a);
            }
        }
    }

    /// Refresh the constraint block: z[n..] = A x.
    pub fn refresh_constraint_values(&mut self, a: &SparseCsc) {
        let (zx, za) = self.z.split_at_mut(self.n);
        sparse::spmv(a, zx, za, 1.0, 0.0);
    }

    /// Gradient of the Lagrangian restricted to x: glag = g + H x + A^T lam_a.
    pub fn compute_lagrangian_gradient(&mut self, h: &SparseCsc, a: &SparseCsc, g: &[f64]) {
        self.glag.copy_from_slice(g);
        sparse::spmv(h, &self.z[..self.n], &mut self.glag, 1.0, 1.0);
        sparse::spmv_transpose(a, &self.lam[self.n..], &mut self.glag, 1.0, 1.0);
    }

    /// Recompute active box multipliers from stationarity without changing
    /// their sign.
    pub fn refresh_active_multipliers(&mut self) {
        for i in 0..self.n {
            if self.lam[i] > 0.0 {
                self.lam[i] = (-self.glag[i]).max(DMIN);
            } else if self.lam[i] < 0.0 {
                self.lam[i] = (-self.glag[i]).min(-DMIN);
            }
        }
    }

    /// Determine the admissible multiplier signs and project the warm-start
    /// multipliers onto them.
    ///
    /// Flag rules: equalities must stay active; a missing bound forbids the
    /// corresponding sign; an all-zero KKT row forces a box index active and
    /// a constraint index inactive. An index with no admissible sign left is
    /// a fatal configuration.
    pub fn init_signs(&mut self, a: &SparseCsc, zero_rows: &[bool]) -> Result<(), SolverError> {
        let n = self.n;
        let nz = n + self.m;

        for i in 0..nz {
            self.neverzero[i] = self.lbz[i] == self.ubz[i];
            self.neverupper[i] = self.ubz[i].is_infinite();
            self.neverlower[i] = self.lbz[i].is_infinite();
            if zero_rows[i] {
                if i < n {
                    self.neverzero[i] = true;
                } else {
                    self.neverupper[i] = true;
                    self.neverlower[i] = true;
                }
            }
        }

        self.refresh_constraint_values(a);

        for i in 0..nz {
            if self.neverzero[i] && self.neverupper[i] && self.neverlower[i] {
                return Err(SolverError::NoAdmissibleSign(i));
            }
            if !self.neverzero[i] {
                // All inequality constraints start inactive
                self.lam[i] = 0.0;
            } else if self.neverupper[i] || self.z[i] <= self.lbz[i] {
                self.lam[i] = self.lam[i].min(-DMIN);
            } else {
                self.lam[i] = self.lam[i].max(DMIN);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::sparse;

    fn box_problem() -> QpProblem {
        QpProblem {
            h: sparse::from_triplets(2, 2, vec![(0, 0, 2.0), (1, 1, 2.0)]),
            g: vec![-4.0, -6.0],
            a: sparse::from_triplets(1, 2, vec![(0, 0, 1.0), (0, 1, 1.0)]),
            lbx: vec![0.0, 0.0],
            ubx: vec![1.0, 1.0],
            lba: vec![0.5],
            uba: vec![0.5],
        }
    }

    #[test]
    fn test_load_and_refresh() {
        let prob = box_problem();
        let mut ws = Workspace::new(2, 1);
        ws.load(
            &prob,
            Some(&WarmStart {
                x: Some(vec![0.25, 0.5]),
                ..Default::default()
            }),
        );
        ws.refresh_constraint_values(&prob.a);

        assert_eq!(ws.z[0], 0.25);
        assert_eq!(ws.z[2], 0.75);
        assert_eq!(ws.lbz[2], 0.5);
        assert_eq!(ws.ubz[2], 0.5);
    }

    #[test]
    fn test_init_signs_projection() {
        let prob = box_problem();
        let mut ws = Workspace::new(2, 1);
        ws.load(&prob, None);
        let zero_rows = vec![false; 3];
        ws.init_signs(&prob.a, &zero_rows).unwrap();

        // Inequalities inactive, equality forced active at its lower side
        // (z = 0 <= lba)
        assert_eq!(ws.lam[0], 0.0);
        assert_eq!(ws.lam[1], 0.0);
        assert!(ws.neverzero[2]);
        assert!(ws.lam[2] <= -DMIN);
    }

    #[test]
    fn test_init_signs_zero_row_box() {
        // Zero KKT row on a box index forces it active
        let prob = box_problem();
        let mut ws = Workspace::new(2, 1);
        ws.load(&prob, None);
        let zero_rows = vec![false, true, false];
        ws.init_signs(&prob.a, &zero_rows).unwrap();

        assert!(ws.neverzero[1]);
        assert!(ws.lam[1] != 0.0);
    }

    #[test]
    fn test_init_signs_inadmissible() {
        // Free variable (no bounds) with a zero KKT row has no sign left
        let prob = QpProblem {
            h: sparse::from_triplets(1, 1, Vec::new()),
            g: vec![0.0],
            a: sparse::from_triplets(0, 1, Vec::new()),
            lbx: vec![f64::NEG_INFINITY],
            ubx: vec![f64::INFINITY],
            lba: vec![],
            uba: vec![],
        };
        let mut ws = Workspace::new(1, 0);
        ws.load(&prob, None);
        let err = ws.init_signs(&prob.a, &[true]).unwrap_err();
        assert!(matches!(err, SolverError::NoAdmissibleSign(0)));
    }

    #[test]
    fn test_refresh_active_multipliers_keeps_sign() {
        let prob = box_problem();
        let mut ws = Workspace::new(2, 1);
        ws.load(&prob, None);
        ws.glag.copy_from_slice(&[-2.0, 3.0]);
        ws.lam[0] = DMIN;
        ws.lam[1] = -DMIN;
        ws.refresh_active_multipliers();

        // lam[0] follows -glag upward, lam[1] is pinned at -DMIN because
        // -glag would cross zero
        assert_eq!(ws.lam[0], 2.0);
        assert_eq!(ws.lam[1], -DMIN);
    }
}
