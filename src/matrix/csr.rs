use crate::matrix::Shape;
use crate::matrix::error::MatrixError;

/// Compressed sparse row view.
/// - `row_ptr` marks the start and end of each row, len = rows + 1
/// - `col_idx` holds the column of each nonzero, len = nnz
/// - `values` holds the nonzeros themselves, len = nnz
#[derive(Debug, Clone)]
pub struct CsrMatrix {
    pub(crate) shape: Shape,
    pub(crate) row_ptr: Vec<usize>,
    pub(crate) col_idx: Vec<usize>,
    pub(crate) values: Vec<f64>,
}

impl CsrMatrix {
    pub fn nnz(&self) -> usize {
        self.col_idx.len()
    }

    /// `(column indices, values)` slices for row `i`, columns ascending.
    pub fn row(&self, i: usize) -> (&[usize], &[f64]) {
        let (s, e) = (self.row_ptr[i], self.row_ptr[i + 1]);
        (&self.col_idx[s..e], &self.values[s..e])
    }

    pub fn row_nnz(&self, i: usize) -> usize {
        self.row_ptr[i + 1] - self.row_ptr[i]
    }

    /// y <- A x over slices, iterating row-major.
    ///
    /// Each row accumulates into a local scalar and writes y[i] exactly once;
    /// callers rely on this accumulation order for reproducibility.
    pub fn mat_vec(&self, x: &[f64], y: &mut [f64]) {
        for i in 0..self.shape.rows {
            let (cols, vals) = self.row(i);
            let mut acc = 0.0;
            for (&j, &v) in cols.iter().zip(vals) {
                acc += v * x[j];
            }
            y[i] = acc;
        }
    }

    pub fn check_invariants(&self) -> Result<(), MatrixError> {
        if self.row_ptr.len() != self.shape.rows + 1 {
            return Err(MatrixError::PointerLength {
                view: "csr",
                expected: self.shape.rows + 1,
                actual: self.row_ptr.len(),
            });
        }
        if self.row_ptr[0] != 0 || *self.row_ptr.last().unwrap() != self.nnz() {
            return Err(MatrixError::PointerNotMonotone {
                view: "csr",
                index: 0,
            });
        }
        if self.col_idx.len() != self.values.len() {
            return Err(MatrixError::PointerLength {
                view: "csr",
                expected: self.col_idx.len(),
                actual: self.values.len(),
            });
        }
        for i in 0..self.shape.rows {
            let (s, e) = (self.row_ptr[i], self.row_ptr[i + 1]);
            if s > e || e > self.nnz() {
                return Err(MatrixError::PointerNotMonotone {
                    view: "csr",
                    index: i,
                });
            }
            let mut prev = None;
            for &c in &self.col_idx[s..e] {
                if c >= self.shape.cols {
                    return Err(MatrixError::IndexOutOfRange {
                        index: c,
                        dim: self.shape.cols,
                    });
                }
                if prev.is_some_and(|p| c <= p) {
                    return Err(MatrixError::IndicesNotAscending {
                        view: "csr",
                        lane: i,
                    });
                }
                prev = Some(c);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::matrix::SparseMatrix;

    #[test]
    fn row_access_after_build() {
        // [ 10  0  2 ]
        // [  0 20  0 ]
        // [  3  0 35 ]   (35 from a 30 + 5 duplicate)
        let a = SparseMatrix::from_triples(
            3,
            3,
            &[
                (0, 0, 10.0),
                (0, 2, 2.0),
                (1, 1, 20.0),
                (2, 0, 3.0),
                (2, 2, 30.0),
                (2, 2, 5.0),
            ],
        )
        .unwrap();

        let csr = a.csr();
        assert_eq!(csr.nnz(), 5);
        assert_eq!(csr.row_ptr, vec![0, 2, 3, 5]);

        let (c0, v0) = csr.row(0);
        assert_eq!(c0, &[0, 2]);
        assert_eq!(v0, &[10.0, 2.0]);

        let (c2, v2) = csr.row(2);
        assert_eq!(c2, &[0, 2]);
        assert_eq!(v2, &[3.0, 35.0]);

        assert!(csr.check_invariants().is_ok());
    }

    #[test]
    fn slice_mat_vec() {
        let a = SparseMatrix::from_triples(2, 2, &[(0, 0, 2.0), (0, 1, 1.0), (1, 1, 3.0)]).unwrap();
        let mut y = [0.0; 2];
        a.csr().mat_vec(&[1.0, 2.0], &mut y);
        assert_eq!(y, [4.0, 6.0]);
    }
}
