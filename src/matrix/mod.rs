//! Sparse matrix store with simultaneous row and column views.
//!
//! A [`SparseMatrix`] is built once from (row, col, value) triples and is
//! immutable afterwards. The CSR view is always present; the CSC view is
//! built lazily on first column access or transpose product and, once
//! published, always lists exactly the same nonzero set as the row view.

pub mod builder;
pub mod csc;
pub mod csr;
pub mod error;
pub mod mtx;

use std::sync::OnceLock;

use ndarray::Array1;

pub use builder::MatrixBuilder;
pub use error::{MatrixError, MatrixMarketError};

use csc::CscMatrix;
use csr::CsrMatrix;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shape {
    pub rows: usize,
    pub cols: usize,
}

#[derive(Debug, Clone)]
pub struct SparseMatrix {
    csr: CsrMatrix,
    csc: OnceLock<CscMatrix>,
    diag: Vec<f64>,
}

impl SparseMatrix {
    pub(crate) fn from_csr(csr: CsrMatrix) -> Self {
        let n = csr.shape.rows.min(csr.shape.cols);
        let mut diag = vec![0.0; n];
        for (i, d) in diag.iter_mut().enumerate() {
            let (cols, vals) = csr.row(i);
            if let Ok(p) = cols.binary_search(&i) {
                *d = vals[p];
            }
        }
        Self {
            csr,
            csc: OnceLock::new(),
            diag,
        }
    }

    /// Build from (row, col, value) triples; duplicates are summed and
    /// entries that cancel to exactly zero are dropped.
    pub fn from_triples(
        rows: usize,
        cols: usize,
        triples: &[(usize, usize, f64)],
    ) -> Result<Self, MatrixError> {
        let mut b = MatrixBuilder::new(rows, cols);
        b.reserve(triples.len());
        for &(i, j, v) in triples {
            b.push(i, j, v)?;
        }
        b.build()
    }

    pub fn shape(&self) -> Shape {
        self.csr.shape
    }

    pub fn rows(&self) -> usize {
        self.csr.shape.rows
    }

    pub fn cols(&self) -> usize {
        self.csr.shape.cols
    }

    pub fn nnz(&self) -> usize {
        self.csr.nnz()
    }

    pub fn is_square(&self) -> bool {
        self.csr.shape.rows == self.csr.shape.cols
    }

    /// Square dimension, or [`MatrixError::NotSquare`] tagged with the caller.
    pub(crate) fn require_square(&self, operation: &'static str) -> Result<usize, MatrixError> {
        if self.is_square() {
            Ok(self.csr.shape.rows)
        } else {
            Err(MatrixError::NotSquare {
                operation,
                rows: self.csr.shape.rows,
                cols: self.csr.shape.cols,
            })
        }
    }

    /// Nonzeros of row `i` as (column, value) pairs, columns ascending.
    pub fn row(&self, i: usize) -> Result<impl Iterator<Item = (usize, f64)> + '_, MatrixError> {
        if i >= self.csr.shape.rows {
            return Err(MatrixError::IndexOutOfRange {
                index: i,
                dim: self.csr.shape.rows,
            });
        }
        let (cols, vals) = self.csr.row(i);
        Ok(cols.iter().copied().zip(vals.iter().copied()))
    }

    /// Nonzeros of column `j` as (row, value) pairs, rows ascending.
    ///
    /// Forces the column view on first use.
    pub fn col(&self, j: usize) -> Result<impl Iterator<Item = (usize, f64)> + '_, MatrixError> {
        if j >= self.csr.shape.cols {
            return Err(MatrixError::IndexOutOfRange {
                index: j,
                dim: self.csr.shape.cols,
            });
        }
        let (rows, vals) = self.csc().col(j);
        Ok(rows.iter().copied().zip(vals.iter().copied()))
    }

    /// A_ii, or 0.0 when no diagonal entry is stored.
    pub fn diagonal(&self, i: usize) -> Result<f64, MatrixError> {
        self.diag
            .get(i)
            .copied()
            .ok_or(MatrixError::IndexOutOfRange {
                index: i,
                dim: self.diag.len(),
            })
    }

    pub(crate) fn diag_slice(&self) -> &[f64] {
        &self.diag
    }

    pub(crate) fn csr(&self) -> &CsrMatrix {
        &self.csr
    }

    /// Column view, built on first use. Publication is single-writer; both
    /// views are immutable afterwards.
    pub(crate) fn csc(&self) -> &CscMatrix {
        self.csc.get_or_init(|| CscMatrix::from_csr(&self.csr))
    }

    /// Whether the lazy column view has been published yet.
    pub fn column_view_built(&self) -> bool {
        self.csc.get().is_some()
    }

    /// y <- A x.
    ///
    /// Iterates row-major; each row accumulates into a local scalar and
    /// writes y[i] exactly once. This accumulation order is a documented
    /// contract: repeated products over identical inputs are bitwise equal.
    pub fn mat_vec(&self, x: &Array1<f64>, y: &mut Array1<f64>) -> Result<(), MatrixError> {
        self.check_len(x.len(), self.csr.shape.cols, "mat_vec input")?;
        self.check_len(y.len(), self.csr.shape.rows, "mat_vec output")?;
        for i in 0..self.csr.shape.rows {
            let (cols, vals) = self.csr.row(i);
            let mut acc = 0.0;
            for (&j, &v) in cols.iter().zip(vals) {
                acc += v * x[j];
            }
            y[i] = acc;
        }
        Ok(())
    }

    /// y <- A^T x on the column view (forced on first use).
    pub fn mat_vec_t(&self, x: &Array1<f64>, y: &mut Array1<f64>) -> Result<(), MatrixError> {
        self.check_len(x.len(), self.csr.shape.rows, "mat_vec_t input")?;
        self.check_len(y.len(), self.csr.shape.cols, "mat_vec_t output")?;
        let csc = self.csc();
        for j in 0..self.csr.shape.cols {
            let (rows, vals) = csc.col(j);
            let mut acc = 0.0;
            for (&i, &v) in rows.iter().zip(vals) {
                acc += v * x[i];
            }
            y[j] = acc;
        }
        Ok(())
    }

    /// Per-row sums of |a_ij|, one O(nnz) pass.
    pub(crate) fn abs_row_sums(&self) -> Vec<f64> {
        let mut sums = vec![0.0; self.csr.shape.rows];
        for (i, s) in sums.iter_mut().enumerate() {
            let (_, vals) = self.csr.row(i);
            *s = vals.iter().map(|v| v.abs()).sum();
        }
        sums
    }

    fn check_len(
        &self,
        actual: usize,
        expected: usize,
        operation: &'static str,
    ) -> Result<(), MatrixError> {
        if actual == expected {
            Ok(())
        } else {
            Err(MatrixError::DimensionMismatch {
                expected,
                actual,
                operation,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn mat_vec_basic() {
        // [ 4 -1  0 ]   [1]   [ 2]
        // [-1  4 -1 ] x [2] = [ 4]
        // [ 0 -1  3 ]   [3]   [ 7]
        let a = SparseMatrix::from_triples(
            3,
            3,
            &[
                (0, 0, 4.0),
                (0, 1, -1.0),
                (1, 0, -1.0),
                (1, 1, 4.0),
                (1, 2, -1.0),
                (2, 1, -1.0),
                (2, 2, 3.0),
            ],
        )
        .unwrap();
        let x = array![1.0, 2.0, 3.0];
        let mut y = Array1::zeros(3);
        a.mat_vec(&x, &mut y).unwrap();
        assert_eq!(y, array![2.0, 4.0, 7.0]);
    }

    #[test]
    fn mat_vec_t_agrees_with_explicit_transpose() {
        let triples = [(0, 1, 2.0), (1, 0, -3.0), (1, 1, 5.0), (2, 0, 1.0)];
        let a = SparseMatrix::from_triples(3, 2, &triples).unwrap();
        let t: Vec<_> = triples.iter().map(|&(i, j, v)| (j, i, v)).collect();
        let at = SparseMatrix::from_triples(2, 3, &t).unwrap();

        let x = array![1.0, 2.0, 3.0];
        let mut y1 = Array1::zeros(2);
        let mut y2 = Array1::zeros(2);
        a.mat_vec_t(&x, &mut y1).unwrap();
        at.mat_vec(&x, &mut y2).unwrap();
        assert_eq!(y1, y2);
    }

    #[test]
    fn diagonal_defaults_to_zero() {
        let a = SparseMatrix::from_triples(2, 2, &[(0, 1, 1.0), (1, 1, 2.0)]).unwrap();
        assert_eq!(a.diagonal(0).unwrap(), 0.0);
        assert_eq!(a.diagonal(1).unwrap(), 2.0);
        assert!(matches!(
            a.diagonal(2),
            Err(MatrixError::IndexOutOfRange { .. })
        ));
    }

    #[test]
    fn column_view_is_lazy() {
        let a = SparseMatrix::from_triples(2, 2, &[(0, 0, 1.0)]).unwrap();
        assert!(!a.column_view_built());
        let _ = a.col(0).unwrap().count();
        assert!(a.column_view_built());
    }

    #[test]
    fn row_out_of_range() {
        let a = SparseMatrix::from_triples(2, 2, &[(0, 0, 1.0)]).unwrap();
        assert!(a.row(2).is_err());
    }
}
