use crate::matrix::Shape;
use crate::matrix::csr::CsrMatrix;
use crate::matrix::error::MatrixError;

/// Compressed sparse column view.
/// - `col_ptr` marks the start and end of each column, len = cols + 1
/// - `row_idx` holds the row of each nonzero, len = nnz
/// - `values` holds the nonzeros themselves, len = nnz
#[derive(Debug, Clone)]
pub struct CscMatrix {
    pub(crate) shape: Shape,
    pub(crate) col_ptr: Vec<usize>,
    pub(crate) row_idx: Vec<usize>,
    pub(crate) values: Vec<f64>,
}

impl CscMatrix {
    pub fn nnz(&self) -> usize {
        self.row_idx.len()
    }

    /// `(row indices, values)` slices for column `j`, rows ascending.
    pub fn col(&self, j: usize) -> (&[usize], &[f64]) {
        let (s, e) = (self.col_ptr[j], self.col_ptr[j + 1]);
        (&self.row_idx[s..e], &self.values[s..e])
    }

    pub fn col_nnz(&self, j: usize) -> usize {
        self.col_ptr[j + 1] - self.col_ptr[j]
    }

    /// y <- A^T x, iterating the column view the way [`CsrMatrix::mat_vec`]
    /// iterates rows: one local accumulator per output entry.
    pub fn mat_vec_t(&self, x: &[f64], y: &mut [f64]) {
        for j in 0..self.shape.cols {
            let (rows, vals) = self.col(j);
            let mut acc = 0.0;
            for (&i, &v) in rows.iter().zip(vals) {
                acc += v * x[i];
            }
            y[j] = acc;
        }
    }

    /// Column view of `csr`, listing exactly the same (i, j, v) set.
    ///
    /// Counting pass over the column indices, then a placement pass; within a
    /// column the CSR row-major order leaves rows ascending.
    pub fn from_csr(csr: &CsrMatrix) -> Self {
        let nnz = csr.nnz();
        let mut col_ptr = vec![0usize; csr.shape.cols + 1];
        for &j in &csr.col_idx {
            col_ptr[j + 1] += 1;
        }
        for j in 0..csr.shape.cols {
            col_ptr[j + 1] += col_ptr[j];
        }

        let mut row_idx = vec![0usize; nnz];
        let mut values = vec![0f64; nnz];
        let mut next = col_ptr.clone();
        for i in 0..csr.shape.rows {
            let (cols, vals) = csr.row(i);
            for (&j, &v) in cols.iter().zip(vals) {
                let p = next[j];
                row_idx[p] = i;
                values[p] = v;
                next[j] += 1;
            }
        }

        let csc = Self {
            shape: csr.shape,
            col_ptr,
            row_idx,
            values,
        };
        debug_assert!(csc.check_invariants().is_ok());
        csc
    }

    pub fn check_invariants(&self) -> Result<(), MatrixError> {
        if self.col_ptr.len() != self.shape.cols + 1 {
            return Err(MatrixError::PointerLength {
                view: "csc",
                expected: self.shape.cols + 1,
                actual: self.col_ptr.len(),
            });
        }
        if self.col_ptr[0] != 0 || *self.col_ptr.last().unwrap() != self.nnz() {
            return Err(MatrixError::PointerNotMonotone {
                view: "csc",
                index: 0,
            });
        }
        for j in 0..self.shape.cols {
            let (s, e) = (self.col_ptr[j], self.col_ptr[j + 1]);
            if s > e || e > self.nnz() {
                return Err(MatrixError::PointerNotMonotone {
                    view: "csc",
                    index: j,
                });
            }
            let mut prev = None;
            for &r in &self.row_idx[s..e] {
                if r >= self.shape.rows {
                    return Err(MatrixError::IndexOutOfRange {
                        index: r,
                        dim: self.shape.rows,
                    });
                }
                if prev.is_some_and(|p| r <= p) {
                    return Err(MatrixError::IndicesNotAscending {
                        view: "csc",
                        lane: j,
                    });
                }
                prev = Some(r);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::matrix::SparseMatrix;

    #[test]
    fn column_view_matches_row_view() {
        let triples = [
            (0, 0, 10.0),
            (0, 2, 2.0),
            (1, 1, 20.0),
            (2, 0, 3.0),
            (2, 2, 35.0),
        ];
        let a = SparseMatrix::from_triples(3, 3, &triples).unwrap();

        // Forcing the column view must reproduce the same triple set.
        let mut seen = Vec::new();
        for j in 0..3 {
            for (i, v) in a.col(j).unwrap() {
                seen.push((i, j, v));
            }
        }
        seen.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        assert_eq!(seen, triples.to_vec());
    }

    #[test]
    fn transpose_product() {
        // A = [1 2; 0 3], A^T x with x = [1, 1] -> [1, 5]
        let a = SparseMatrix::from_triples(2, 2, &[(0, 0, 1.0), (0, 1, 2.0), (1, 1, 3.0)]).unwrap();
        let mut y = [0.0; 2];
        a.csc().mat_vec_t(&[1.0, 1.0], &mut y);
        assert_eq!(y, [1.0, 5.0]);
    }
}
