//! Sparse matrix types and operations.
//!
//! This module provides wrappers and utilities for sparse matrices in CSC
//! (Compressed Sparse Column) format. All solver matrices (H, A, the KKT
//! system) live in this format.

use sprs::{CsMat, TriMat};

/// Sparse matrix in CSC format.
pub type SparseCsc = CsMat<f64>;

/// Build a sparse CSC matrix from triplets (row, col, value).
///
/// # Arguments
///
/// * `nrows` - Number of rows
/// * `ncols` - Number of columns
/// * `triplets` - Iterator of (row, col, value) tuples
pub fn from_triplets<I>(nrows: usize, ncols: usize, triplets: I) -> SparseCsc
where
    I: IntoIterator<Item = (usize, usize, f64)>,
{
    let mut tri = TriMat::new((nrows, ncols));
    for (i, j, v) in triplets {
        tri.add_triplet(i, j, v);
    }
    tri.to_csc()
}

/// Sparse matrix-vector product: y = alpha * A * x + beta * y
pub fn spmv(a: &SparseCsc, x: &[f64], y: &mut [f64], alpha: f64, beta: f64) {
    assert_eq!(a.cols(), x.len());
    assert_eq!(a.rows(), y.len());

    // Scale y by beta
    if beta == 0.0 {
        y.fill(0.0);
    } else if beta != 1.0 {
        for yi in y.iter_mut() {
            *yi *= beta;
        }
    }

    // Add alpha * A * x
    if alpha != 0.0 {
        for (val, (row, col)) in a.iter() {
            y[row] += alpha * (*val) * x[col];
        }
    }
}

/// Transpose-vector product: y = alpha * A^T * x + beta * y
pub fn spmv_transpose(a: &SparseCsc, x: &[f64], y: &mut [f64], alpha: f64, beta: f64) {
    assert_eq!(a.rows(), x.len());
    assert_eq!(a.cols(), y.len());

    // Scale y by beta
    if beta == 0.0 {
        y.fill(0.0);
    } else if beta != 1.0 {
        for yi in y.iter_mut() {
            *yi *= beta;
        }
    }

    // For CSC, A^T * x accumulates each column against x
    if alpha != 0.0 {
        for col_idx in 0..a.cols() {
            let col = a.outer_view(col_idx).unwrap();
            for (row_idx, &val) in col.iter() {
                y[col_idx] += alpha * val * x[row_idx];
            }
        }
    }
}

/// Sparse quadratic/bilinear form: x^T A y.
pub fn bilin(a: &SparseCsc, x: &[f64], y: &[f64]) -> f64 {
    assert_eq!(a.rows(), x.len());
    assert_eq!(a.cols(), y.len());

    let mut acc = 0.0;
    for (val, (row, col)) in a.iter() {
        acc += x[row] * (*val) * y[col];
    }
    acc
}

/// Transpose a sparse matrix into a new CSC matrix.
pub fn transpose(a: &SparseCsc) -> SparseCsc {
    let mut tri = TriMat::new((a.cols(), a.rows()));
    for (val, (row, col)) in a.iter() {
        tri.add_triplet(col, row, *val);
    }
    tri.to_csc()
}

/// Expand a symmetric matrix given as a triangle (or as full storage) into
/// full symmetric storage.
///
/// Entries whose mirror position is structurally absent are mirrored; full
/// symmetric inputs pass through unchanged. The KKT assembly needs whole
/// columns of H, so triangle-stored Hessians go through this once at solve
/// start.
pub fn symmetrize(a: &SparseCsc) -> SparseCsc {
    assert_eq!(a.rows(), a.cols(), "symmetrize requires a square matrix");

    let pattern: std::collections::HashSet<(usize, usize)> =
        a.iter().map(|(_, (row, col))| (row, col)).collect();

    let mut tri = TriMat::new((a.rows(), a.cols()));
    for (val, (row, col)) in a.iter() {
        tri.add_triplet(row, col, *val);
        if row != col && !pattern.contains(&(col, row)) {
            tri.add_triplet(col, row, *val);
        }
    }
    tri.to_csc()
}
