//! Linear algebra layer.
//!
//! Sparse matrix operations, KKT system assembly, and the sparse QR
//! factorization kernel.

pub mod kkt;
pub mod qr;
pub mod sparse;
