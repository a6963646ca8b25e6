use crate::matrix::Shape;
use crate::matrix::csr::CsrMatrix;
use crate::matrix::error::MatrixError;
use crate::matrix::SparseMatrix;

/// Builder from (row, col, value) triples.
///
/// Usage:
///   let mut b = MatrixBuilder::new(rows, cols);
///   b.reserve(nnz_guess);
///   b.push(i, j, v)?; ...
///   let a = b.build()?;
///
/// Duplicates are summed at build time; entries whose combined value is
/// exactly zero are dropped.
#[derive(Debug)]
pub struct MatrixBuilder {
    shape: Shape,
    entries: Vec<(usize, usize, f64)>,
}

impl MatrixBuilder {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            shape: Shape { rows, cols },
            entries: Vec::new(),
        }
    }

    pub fn reserve(&mut self, nnz: usize) {
        self.entries.reserve(nnz);
    }

    pub fn push(&mut self, row: usize, col: usize, value: f64) -> Result<(), MatrixError> {
        if row >= self.shape.rows || col >= self.shape.cols {
            return Err(MatrixError::EntryOutOfBounds {
                row,
                col,
                rows: self.shape.rows,
                cols: self.shape.cols,
            });
        }
        if !value.is_finite() {
            return Err(MatrixError::NonFiniteEntry { row, col, value });
        }
        if value != 0.0 {
            self.entries.push((row, col, value));
        }
        Ok(())
    }

    pub fn build(self) -> Result<SparseMatrix, MatrixError> {
        let Shape { rows, cols } = self.shape;

        let mut entries = self.entries;
        entries.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        // Combine duplicates; drop entries that cancel to exactly zero.
        let mut combined: Vec<(usize, usize, f64)> = Vec::with_capacity(entries.len());
        for (r, c, v) in entries {
            match combined.last_mut() {
                Some((lr, lc, acc)) if *lr == r && *lc == c => *acc += v,
                _ => combined.push((r, c, v)),
            }
        }
        combined.retain(|&(_, _, v)| v != 0.0);
        for &(r, c, v) in &combined {
            if !v.is_finite() {
                return Err(MatrixError::NonFiniteEntry {
                    row: r,
                    col: c,
                    value: v,
                });
            }
        }

        // Counting pass, then placement.
        let mut row_ptr = vec![0usize; rows + 1];
        for &(r, _, _) in &combined {
            row_ptr[r + 1] += 1;
        }
        for i in 0..rows {
            row_ptr[i + 1] += row_ptr[i];
        }

        let nnz = combined.len();
        let mut col_idx = vec![0usize; nnz];
        let mut values = vec![0f64; nnz];
        let mut next = row_ptr.clone();
        for (r, c, v) in combined {
            let p = next[r];
            col_idx[p] = c;
            values[p] = v;
            next[r] += 1;
        }

        let csr = CsrMatrix {
            shape: Shape { rows, cols },
            row_ptr,
            col_idx,
            values,
        };
        debug_assert!(csr.check_invariants().is_ok());

        Ok(SparseMatrix::from_csr(csr))
    }
}
