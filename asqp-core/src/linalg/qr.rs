//! Sparse QR factorization over a structurally fixed pattern.
//!
//! Left-looking Householder QR for square CSC matrices whose sparsity never
//! changes between factorizations. The symbolic phase runs once and predicts
//! the nonzero patterns of the Householder vectors V and the triangular
//! factor R; every numeric factorization then only overwrites values.
//!
//! This is the kernel behind the working-KKT solves: the active-set engine
//! refactorizes the same pattern every iteration, monitors `min |diag(R)|`
//! for rank deficiency, and extracts null-space directions from deficient
//! columns.

/// Sparse Householder QR of a square matrix with fixed sparsity.
///
/// `A = Q R` with `Q = H_0 H_1 ... H_{n-1}` a product of Householder
/// reflections stored as sparse columns of V with scalar coefficients β.
pub struct SparseQr {
    n: usize,

    /// Pattern of the factorized matrix (copied at construction)
    a_colptr: Vec<usize>,
    a_rowind: Vec<usize>,

    /// Householder vectors V in CSC format (fixed pattern)
    v_colptr: Vec<usize>,
    v_rowind: Vec<usize>,
    v_data: Vec<f64>,

    /// Upper triangular factor R in CSC format (fixed pattern, diagonal last
    /// in every column)
    r_colptr: Vec<usize>,
    r_rowind: Vec<usize>,
    r_data: Vec<f64>,

    /// Householder coefficients, one per column
    beta: Vec<f64>,

    /// Dense scatter column, kept all-zero between factorizations
    work: Vec<f64>,
}

impl SparseQr {
    /// Symbolic analysis: predict the V and R patterns for a square CSC
    /// pattern.
    ///
    /// Simulates the left-looking elimination with a marker array. A
    /// reflection `H_j` only introduces rows with index >= j, so visiting
    /// candidate reflections in ascending order covers every fill path.
    ///
    /// # Arguments
    ///
    /// * `colptr` - CSC column pointers (length n+1)
    /// * `rowind` - CSC row indices
    /// * `n` - Matrix dimension
    pub fn new(colptr: &[usize], rowind: &[usize], n: usize) -> Self {
        assert_eq!(colptr.len(), n + 1);

        let mut marker = vec![usize::MAX; n];
        let mut v_colptr = Vec::with_capacity(n + 1);
        let mut v_rowind: Vec<usize> = Vec::new();
        let mut r_colptr = Vec::with_capacity(n + 1);
        let mut r_rowind: Vec<usize> = Vec::new();
        v_colptr.push(0);
        r_colptr.push(0);

        for k in 0..n {
            // Pattern of column k of A
            for &i in &rowind[colptr[k]..colptr[k + 1]] {
                marker[i] = k;
            }

            // Reflections whose pattern meets the accumulated column fill it
            // with their own pattern and contribute an entry to R[:, k]
            for j in 0..k {
                let vj = &v_rowind[v_colptr[j]..v_colptr[j + 1]];
                if vj.iter().any(|&i| marker[i] == k) {
                    r_rowind.push(j);
                    for idx in v_colptr[j]..v_colptr[j + 1] {
                        marker[v_rowind[idx]] = k;
                    }
                }
            }
            r_rowind.push(k);
            r_colptr.push(r_rowind.len());

            // V[:, k]: accumulated rows at or below the diagonal
            let vstart = v_rowind.len();
            if marker[k] != k {
                v_rowind.push(k);
            }
            for i in k..n {
                if marker[i] == k {
                    v_rowind.push(i);
                }
            }
            debug_assert_eq!(v_rowind[vstart], k);
            v_colptr.push(v_rowind.len());
        }

        let v_nnz = v_rowind.len();
        let r_nnz = r_rowind.len();
        Self {
            n,
            a_colptr: colptr.to_vec(),
            a_rowind: rowind.to_vec(),
            v_colptr,
            v_rowind,
            v_data: vec![0.0; v_nnz],
            r_colptr,
            r_rowind,
            r_data: vec![0.0; r_nnz],
            beta: vec![0.0; n],
            work: vec![0.0; n],
        }
    }

    /// Numeric factorization of values aligned with the pattern given to
    /// [`SparseQr::new`].
    pub fn factorize(&mut self, values: &[f64]) {
        assert_eq!(values.len(), self.a_rowind.len());

        let n = self.n;
        let Self {
            a_colptr,
            a_rowind,
            v_colptr,
            v_rowind,
            v_data,
            r_colptr,
            r_rowind,
            r_data,
            beta,
            work,
            ..
        } = self;

        for k in 0..n {
            // Scatter column k
            for idx in a_colptr[k]..a_colptr[k + 1] {
                work[a_rowind[idx]] = values[idx];
            }

            // Apply earlier reflections recorded in R[:, k], gathering the
            // above-diagonal entries of R as they finalize
            let rend = r_colptr[k + 1];
            for ridx in r_colptr[k]..rend - 1 {
                let j = r_rowind[ridx];
                let mut tau = 0.0;
                for vidx in v_colptr[j]..v_colptr[j + 1] {
                    tau += v_data[vidx] * work[v_rowind[vidx]];
                }
                tau *= beta[j];
                for vidx in v_colptr[j]..v_colptr[j + 1] {
                    work[v_rowind[vidx]] -= tau * v_data[vidx];
                }
                r_data[ridx] = work[j];
                work[j] = 0.0;
            }

            // Gather the sub-column and form the next reflection
            for vidx in v_colptr[k]..v_colptr[k + 1] {
                v_data[vidx] = work[v_rowind[vidx]];
                work[v_rowind[vidx]] = 0.0;
            }
            let (s, b) = house(&mut v_data[v_colptr[k]..v_colptr[k + 1]]);
            beta[k] = b;
            r_data[rend - 1] = s;
        }
    }

    /// Smallest `|R[k,k]|` and its column index.
    pub fn min_diag(&self) -> (f64, usize) {
        let mut mina = f64::INFINITY;
        let mut imina = 0;
        for k in 0..self.n {
            let d = self.r_data[self.r_colptr[k + 1] - 1].abs();
            if d < mina {
                mina = d;
                imina = k;
            }
        }
        (mina, imina)
    }

    /// Solve `A x = b` in place: `x = R^{-1} Q' b`.
    pub fn solve(&self, b: &mut [f64]) {
        assert_eq!(b.len(), self.n);

        for j in 0..self.n {
            self.apply_reflection(j, b);
        }
        // Back substitution on R
        for k in (0..self.n).rev() {
            let diag = self.r_data[self.r_colptr[k + 1] - 1];
            b[k] /= diag;
            for idx in self.r_colptr[k]..self.r_colptr[k + 1] - 1 {
                b[self.r_rowind[idx]] -= self.r_data[idx] * b[k];
            }
        }
    }

    /// Solve `A' x = b` in place: `x = Q R'^{-1} b`.
    pub fn solve_transposed(&self, b: &mut [f64]) {
        assert_eq!(b.len(), self.n);

        // Forward substitution on R'
        for k in 0..self.n {
            let mut acc = b[k];
            for idx in self.r_colptr[k]..self.r_colptr[k + 1] - 1 {
                acc -= self.r_data[idx] * b[self.r_rowind[idx]];
            }
            b[k] = acc / self.r_data[self.r_colptr[k + 1] - 1];
        }
        for j in (0..self.n).rev() {
            self.apply_reflection(j, b);
        }
    }

    /// Right null vector of R through the deficient column `imin`, written
    /// into `out` (length n) and normalized to unit length.
    ///
    /// Solves the leading triangular block against the deficient column, so
    /// `R out ≈ 0` and therefore `A out ≈ 0`.
    pub fn null_column_combination(&self, imin: usize, out: &mut [f64]) {
        assert_eq!(out.len(), self.n);

        out.fill(0.0);
        out[imin] = 1.0;
        for idx in self.r_colptr[imin]..self.r_colptr[imin + 1] - 1 {
            out[self.r_rowind[idx]] = -self.r_data[idx];
        }
        for c in (0..imin).rev() {
            out[c] /= self.r_data[self.r_colptr[c + 1] - 1];
            for idx in self.r_colptr[c]..self.r_colptr[c + 1] - 1 {
                out[self.r_rowind[idx]] -= self.r_data[idx] * out[c];
            }
        }
        let norm = out.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm > 0.0 {
            for v in out.iter_mut() {
                *v /= norm;
            }
        }
    }

    /// Apply Householder reflection j: `x -= v_j * (beta_j * v_j' x)`.
    fn apply_reflection(&self, j: usize, x: &mut [f64]) {
        let mut tau = 0.0;
        for idx in self.v_colptr[j]..self.v_colptr[j + 1] {
            tau += self.v_data[idx] * x[self.v_rowind[idx]];
        }
        tau *= self.beta[j];
        for idx in self.v_colptr[j]..self.v_colptr[j + 1] {
            x[self.v_rowind[idx]] -= tau * self.v_data[idx];
        }
    }
}

/// Householder reflection of a gathered column, diagonal element first.
///
/// Overwrites `x` with the reflection vector and returns `(s, beta)` with
/// `H x = s e_1`, `H = I - beta v v'`, `s = ||x|| >= 0`.
fn house(x: &mut [f64]) -> (f64, f64) {
    let mut sigma = 0.0;
    for &xi in &x[1..] {
        sigma += xi * xi;
    }
    if sigma == 0.0 {
        let s = x[0].abs();
        let beta = if x[0] <= 0.0 { 2.0 } else { 0.0 };
        x[0] = 1.0;
        (s, beta)
    } else {
        let s = (x[0] * x[0] + sigma).sqrt();
        x[0] = if x[0] <= 0.0 {
            x[0] - s
        } else {
            -sigma / (x[0] + s)
        };
        let beta = -1.0 / (s * x[0]);
        (s, beta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::sparse::{self, SparseCsc};

    fn csc_arrays(a: &SparseCsc) -> (Vec<usize>, Vec<usize>, Vec<f64>) {
        (
            a.indptr().raw_storage().to_vec(),
            a.indices().to_vec(),
            a.data().to_vec(),
        )
    }

    fn residual_inf(a: &SparseCsc, x: &[f64], b: &[f64]) -> f64 {
        let mut ax = vec![0.0; b.len()];
        sparse::spmv(a, x, &mut ax, 1.0, 0.0);
        ax.iter()
            .zip(b.iter())
            .map(|(v, w)| (v - w).abs())
            .fold(0.0, f64::max)
    }

    #[test]
    fn test_qr_solve_tridiagonal() {
        // [[4, 1, 0], [1, 4, 1], [0, 1, 4]]
        let a = sparse::from_triplets(3, 3, vec![
            (0, 0, 4.0), (1, 0, 1.0),
            (0, 1, 1.0), (1, 1, 4.0), (2, 1, 1.0),
            (1, 2, 1.0), (2, 2, 4.0),
        ]);
        let (cp, ri, vals) = csc_arrays(&a);

        let mut qr = SparseQr::new(&cp, &ri, 3);
        qr.factorize(&vals);

        let (mina, _) = qr.min_diag();
        assert!(mina > 1.0, "well-conditioned matrix reported mina = {}", mina);

        let b = vec![1.0, 2.0, 3.0];
        let mut x = b.clone();
        qr.solve(&mut x);
        assert!(residual_inf(&a, &x, &b) < 1e-12);
    }

    #[test]
    fn test_qr_solve_transposed() {
        // Unsymmetric: [[2, 1, 0], [0, 3, 1], [1, 0, 2]]
        let a = sparse::from_triplets(3, 3, vec![
            (0, 0, 2.0), (2, 0, 1.0),
            (0, 1, 1.0), (1, 1, 3.0),
            (1, 2, 1.0), (2, 2, 2.0),
        ]);
        let (cp, ri, vals) = csc_arrays(&a);

        let mut qr = SparseQr::new(&cp, &ri, 3);
        qr.factorize(&vals);

        let b = vec![1.0, -1.0, 2.0];
        let mut x = b.clone();
        qr.solve_transposed(&mut x);

        // Check A' x = b
        let at = sparse::transpose(&a);
        assert!(residual_inf(&at, &x, &b) < 1e-12);
    }

    #[test]
    fn test_qr_refactorize_same_pattern() {
        let a = sparse::from_triplets(2, 2, vec![
            (0, 0, 1.0), (1, 0, 2.0), (0, 1, 3.0), (1, 1, 4.0),
        ]);
        let (cp, ri, vals) = csc_arrays(&a);

        let mut qr = SparseQr::new(&cp, &ri, 2);
        qr.factorize(&vals);

        // Same pattern, different values
        let a2 = sparse::from_triplets(2, 2, vec![
            (0, 0, 5.0), (1, 0, 1.0), (0, 1, 2.0), (1, 1, 3.0),
        ]);
        let (_, _, vals2) = csc_arrays(&a2);
        qr.factorize(&vals2);

        let b = vec![7.0, 4.0];
        let mut x = b.clone();
        qr.solve(&mut x);
        assert!(residual_inf(&a2, &x, &b) < 1e-12);
    }

    #[test]
    fn test_qr_singular_detection_and_null_vector() {
        // Rank-1: [[1, 1], [1, 1]]
        let a = sparse::from_triplets(2, 2, vec![
            (0, 0, 1.0), (1, 0, 1.0), (0, 1, 1.0), (1, 1, 1.0),
        ]);
        let (cp, ri, vals) = csc_arrays(&a);

        let mut qr = SparseQr::new(&cp, &ri, 2);
        qr.factorize(&vals);

        let (mina, imina) = qr.min_diag();
        assert!(mina < 1e-12, "rank-1 matrix not flagged: mina = {}", mina);

        let mut nv = vec![0.0; 2];
        qr.null_column_combination(imina, &mut nv);
        let norm: f64 = nv.iter().map(|v| v * v).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-12);

        let mut anv = vec![0.0; 2];
        sparse::spmv(&a, &nv, &mut anv, 1.0, 0.0);
        assert!(anv.iter().all(|v| v.abs() < 1e-12), "A nv = {:?}", anv);
    }

    #[test]
    fn test_qr_fill_in_pattern() {
        // Arrow matrix forces fill below the diagonal during elimination
        let a = sparse::from_triplets(4, 4, vec![
            (0, 0, 4.0), (1, 0, 1.0), (2, 0, 1.0), (3, 0, 1.0),
            (0, 1, 1.0), (1, 1, 4.0),
            (0, 2, 1.0), (2, 2, 4.0),
            (0, 3, 1.0), (3, 3, 4.0),
        ]);
        let (cp, ri, vals) = csc_arrays(&a);

        let mut qr = SparseQr::new(&cp, &ri, 4);
        qr.factorize(&vals);

        let b = vec![1.0, 0.0, 0.0, 2.0];
        let mut x = b.clone();
        qr.solve(&mut x);
        assert!(residual_inf(&a, &x, &b) < 1e-12);

        let mut xt = b.clone();
        qr.solve_transposed(&mut xt);
        let at = sparse::transpose(&a);
        assert!(residual_inf(&at, &xt, &b) < 1e-12);
    }
}
