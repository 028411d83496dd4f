//! KKT system assembly and working-set encoding.
//!
//! The base KKT matrix is
//!
//! ```text
//! K = [ H   A^T ]
//!     [ A    0  ]
//! ```
//!
//! The working pattern is `K ∪ diag(n+m)`: carrying the full structural
//! diagonal lets the active-set encoding pin a variable (unit column) or
//! disable a multiplier (negated unit column) by overwriting values only.
//! Symbolic work happens once, at construction; every iteration is a value
//! refresh plus column rewrites.

use super::sparse::SparseCsc;
use sprs::TriMat;

/// Assembled KKT system with fixed working sparsity.
pub struct KktSystem {
    n: usize,
    m: usize,

    /// Base KKT matrix [[H, A^T], [A, 0]] (values never change)
    kkt: SparseCsc,

    /// Working pattern kktd = kkt ∪ diag, raw CSC arrays
    colptr: Vec<usize>,
    rowind: Vec<usize>,

    /// Base values projected into the working pattern
    base: Vec<f64>,

    /// Working values (rewritten every iteration)
    vals: Vec<f64>,

    /// Scratch for the same-pattern value transpose
    tvals: Vec<f64>,
    tnext: Vec<usize>,
}

impl KktSystem {
    /// Assemble the base KKT matrix and its working pattern.
    ///
    /// # Arguments
    ///
    /// * `h` - Hessian in full symmetric storage (n×n)
    /// * `a` - Constraint matrix (m×n)
    /// * `at` - Its transpose (n×m)
    pub fn new(h: &SparseCsc, a: &SparseCsc, at: &SparseCsc) -> Self {
        let n = h.rows();
        let m = a.rows();
        let nz = n + m;
        assert_eq!(h.cols(), n);
        assert_eq!(a.cols(), n);
        assert_eq!(at.rows(), n);
        assert_eq!(at.cols(), m);

        let mut tri = TriMat::new((nz, nz));
        for (val, (row, col)) in h.iter() {
            tri.add_triplet(row, col, *val);
        }
        for (val, (row, col)) in a.iter() {
            tri.add_triplet(n + row, col, *val);
        }
        for (val, (row, col)) in at.iter() {
            tri.add_triplet(row, n + col, *val);
        }
        let kkt = tri.to_csc();

        // Working pattern: union with the full diagonal. Duplicate diagonal
        // triplets sum, so the zero additions leave base values intact.
        let mut trid = TriMat::new((nz, nz));
        for (val, (row, col)) in kkt.iter() {
            trid.add_triplet(row, col, *val);
        }
        for i in 0..nz {
            trid.add_triplet(i, i, 0.0);
        }
        let kktd = trid.to_csc();

        let colptr: Vec<usize> = kktd.indptr().raw_storage().to_vec();
        let rowind: Vec<usize> = kktd.indices().to_vec();
        let base: Vec<f64> = kktd.data().to_vec();
        let nnz = rowind.len();

        Self {
            n,
            m,
            kkt,
            colptr,
            rowind,
            vals: base.clone(),
            base,
            tvals: vec![0.0; nnz],
            tnext: vec![0; nz],
        }
    }

    /// Dimension of the working system (n + m).
    pub fn order(&self) -> usize {
        self.n + self.m
    }

    /// Column pointers of the working pattern.
    pub fn colptr(&self) -> &[usize] {
        &self.colptr
    }

    /// Row indices of the working pattern.
    pub fn rowind(&self) -> &[usize] {
        &self.rowind
    }

    /// Current working values.
    pub fn vals(&self) -> &[f64] {
        &self.vals
    }

    /// Base KKT matrix [[H, A^T], [A, 0]] without the added diagonal.
    pub fn base(&self) -> &SparseCsc {
        &self.kkt
    }

    /// Refresh working values and encode the active set.
    ///
    /// Box column with nonzero multiplier: replaced by the unit column, which
    /// turns the transposed solve's row into `dz_c = rhs_c`. Linear column
    /// with zero multiplier: replaced by the negated unit column, pinning the
    /// corresponding multiplier step.
    pub fn load_working_set(&mut self, lam: &[f64]) {
        debug_assert_eq!(lam.len(), self.order());

        self.vals.copy_from_slice(&self.base);
        for c in 0..self.n {
            if lam[c] != 0.0 {
                for idx in self.colptr[c]..self.colptr[c + 1] {
                    self.vals[idx] = if self.rowind[idx] == c { 1.0 } else { 0.0 };
                }
            }
        }
        for c in 0..self.m {
            let col = self.n + c;
            if lam[col] == 0.0 {
                for idx in self.colptr[col]..self.colptr[col + 1] {
                    self.vals[idx] = if self.rowind[idx] == col { -1.0 } else { 0.0 };
                }
            }
        }
    }

    /// Rows of the base KKT matrix with no entry of magnitude above `tol`.
    ///
    /// A zero box row cannot be deactivated without a singular working
    /// system; a zero linear row cannot be activated. The caller folds this
    /// into the sign-feasibility flags.
    pub fn zero_rows(&self, tol: f64) -> Vec<bool> {
        let mut zero = vec![true; self.order()];
        for (val, (row, _)) in self.kkt.iter() {
            if val.abs() > tol {
                zero[row] = false;
            }
        }
        zero
    }

    /// Transpose the working values within the (symmetric) working pattern.
    ///
    /// Used by the singularity recovery to factorize the transposed working
    /// KKT for a left null vector.
    pub fn transpose_values(&mut self) {
        let nz = self.order();
        self.tnext.copy_from_slice(&self.colptr[..nz]);
        for c in 0..nz {
            for idx in self.colptr[c]..self.colptr[c + 1] {
                let r = self.rowind[idx];
                self.tvals[self.tnext[r]] = self.vals[idx];
                self.tnext[r] += 1;
            }
        }
        self.vals.copy_from_slice(&self.tvals);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::sparse;

    fn small_system() -> KktSystem {
        // H = diag(2, 2), A = [1, 1]
        let h = sparse::from_triplets(2, 2, vec![(0, 0, 2.0), (1, 1, 2.0)]);
        let a = sparse::from_triplets(1, 2, vec![(0, 0, 1.0), (0, 1, 1.0)]);
        let at = sparse::transpose(&a);
        KktSystem::new(&h, &a, &at)
    }

    fn dense(k: &KktSystem) -> Vec<Vec<f64>> {
        let nz = k.order();
        let mut d = vec![vec![0.0; nz]; nz];
        for c in 0..nz {
            for idx in k.colptr()[c]..k.colptr()[c + 1] {
                d[k.rowind()[idx]][c] = k.vals()[idx];
            }
        }
        d
    }

    #[test]
    fn test_pattern_has_full_diagonal() {
        let k = small_system();
        for c in 0..k.order() {
            let has_diag = (k.colptr()[c]..k.colptr()[c + 1])
                .any(|idx| k.rowind()[idx] == c);
            assert!(has_diag, "missing structural diagonal in column {}", c);
        }
    }

    #[test]
    fn test_inactive_everything() {
        let mut k = small_system();
        // All multipliers zero: box columns keep base values, linear column
        // becomes the negated unit column
        k.load_working_set(&[0.0, 0.0, 0.0]);
        let d = dense(&k);
        assert_eq!(d[0][0], 2.0);
        assert_eq!(d[2][0], 1.0);
        assert_eq!(d[0][2], 0.0);
        assert_eq!(d[2][2], -1.0);
    }

    #[test]
    fn test_active_box_and_linear() {
        let mut k = small_system();
        k.load_working_set(&[1.0, 0.0, -1.0]);
        let d = dense(&k);
        // Box 0 active: unit column
        assert_eq!(d[0][0], 1.0);
        assert_eq!(d[2][0], 0.0);
        // Box 1 inactive: base column
        assert_eq!(d[1][1], 2.0);
        assert_eq!(d[2][1], 1.0);
        // Linear row active: base column restored
        assert_eq!(d[0][2], 1.0);
        assert_eq!(d[2][2], 0.0);
    }

    #[test]
    fn test_zero_rows() {
        // H = diag(1, 0) stored with an explicit zero, no constraints
        let h = sparse::from_triplets(2, 2, vec![(0, 0, 1.0), (1, 1, 0.0)]);
        let a = sparse::from_triplets(0, 2, Vec::new());
        let at = sparse::transpose(&a);
        let k = KktSystem::new(&h, &a, &at);

        let zero = k.zero_rows(1e-16);
        assert!(!zero[0]);
        assert!(zero[1]);
    }

    #[test]
    fn test_transpose_values() {
        let mut k = small_system();
        k.load_working_set(&[1.0, 0.0, -1.0]);
        let before = dense(&k);
        k.transpose_values();
        let after = dense(&k);
        let nz = k.order();
        for r in 0..nz {
            for c in 0..nz {
                assert_eq!(before[r][c], after[c][r], "mismatch at ({}, {})", r, c);
            }
        }
    }
}
