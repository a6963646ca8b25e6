//! Ingest helpers for embedders that read matrices from files.
//!
//! Coordinate triples go through [`SparseMatrix::from_triples`] directly;
//! this module adds the MatrixMarket coordinate reader (1-based indices in
//! the file, converted to 0-based here) and a row-major dense reader.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::matrix::builder::MatrixBuilder;
use crate::matrix::error::{MatrixError, MatrixMarketError};
use crate::matrix::SparseMatrix;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MmField {
    Integer,
    Real,
}

/// Parse a `%%MatrixMarket matrix coordinate {integer|real} general` banner.
fn parse_banner(line: &str, line_no: usize) -> Result<MmField, MatrixMarketError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() != 5 {
        return Err(MatrixMarketError::InvalidBanner(format!(
            "expected 5 tokens at line {line_no}, got {}: {line}",
            tokens.len()
        )));
    }
    if tokens[0] != "%%MatrixMarket" {
        return Err(MatrixMarketError::InvalidBanner(format!(
            "missing %%MatrixMarket at line {line_no}: {line}"
        )));
    }
    if !tokens[1].eq_ignore_ascii_case("matrix") || !tokens[2].eq_ignore_ascii_case("coordinate") {
        return Err(MatrixMarketError::Unsupported(format!(
            "only 'matrix coordinate' is supported, got '{} {}'",
            tokens[1], tokens[2]
        )));
    }
    if !tokens[4].eq_ignore_ascii_case("general") {
        return Err(MatrixMarketError::Unsupported(format!(
            "only 'general' symmetry is supported, got '{}'",
            tokens[4]
        )));
    }
    match tokens[3].to_ascii_lowercase().as_str() {
        "integer" => Ok(MmField::Integer),
        "real" => Ok(MmField::Real),
        other => Err(MatrixMarketError::Unsupported(format!(
            "only 'integer' and 'real' fields are supported, got '{other}'"
        ))),
    }
}

/// Load a sparse matrix from a MatrixMarket `.mtx` file (coordinate format).
pub fn load_matrix_market_file(path: impl AsRef<Path>) -> Result<SparseMatrix, MatrixError> {
    let f = File::open(path.as_ref()).map_err(MatrixMarketError::from)?;
    load_matrix_market(BufReader::new(f))
}

/// Same as [`load_matrix_market_file`], reading from any buffered reader.
pub fn load_matrix_market<R: BufRead>(reader: R) -> Result<SparseMatrix, MatrixError> {
    let mut lines = reader.lines().enumerate();

    // Banner: first non-empty line (tolerating a BOM).
    let field = loop {
        match lines.next() {
            None => {
                return Err(MatrixMarketError::InvalidBanner("empty input".to_string()).into());
            }
            Some((i, line)) => {
                let line = line.map_err(MatrixMarketError::from)?;
                let t = line.trim().trim_start_matches('\u{feff}');
                if t.is_empty() {
                    continue;
                }
                break parse_banner(t, i + 1)?;
            }
        }
    };

    // Size line: first non-comment line after the banner.
    let (size_line_no, size_line) = loop {
        match lines.next() {
            None => {
                return Err(
                    MatrixMarketError::InvalidSizeLine("missing size line".to_string()).into(),
                );
            }
            Some((i, line)) => {
                let line = line.map_err(MatrixMarketError::from)?;
                let t = line.trim();
                if t.is_empty() || t.starts_with('%') {
                    continue;
                }
                break (i + 1, t.to_string());
            }
        }
    };

    let dims: Vec<usize> = size_line
        .split_whitespace()
        .map(str::parse)
        .collect::<Result<_, _>>()
        .map_err(|e| {
            MatrixMarketError::InvalidSizeLine(format!(
                "line {size_line_no}: {size_line} ({e})"
            ))
        })?;
    let &[rows, cols, nnz] = dims.as_slice() else {
        return Err(MatrixMarketError::InvalidSizeLine(format!(
            "expected 3 integers at line {size_line_no}: {size_line}"
        ))
        .into());
    };

    let mut b = MatrixBuilder::new(rows, cols);
    b.reserve(nnz);

    let mut read = 0usize;
    for (i, line) in lines {
        let line_no = i + 1;
        let line = line.map_err(MatrixMarketError::from)?;
        let t = line.trim();
        if t.is_empty() || t.starts_with('%') {
            continue;
        }
        if read >= nnz {
            return Err(MatrixMarketError::InvalidEntry {
                line: line_no,
                msg: format!("found more than nnz={nnz} entries"),
            }
            .into());
        }

        let parts: Vec<&str> = t.split_whitespace().collect();
        let &[row_s, col_s, val_s] = parts.as_slice() else {
            return Err(MatrixMarketError::InvalidEntry {
                line: line_no,
                msg: format!("expected 'row col val', got: {t}"),
            }
            .into());
        };

        let row_1: usize = row_s.parse().map_err(|e| MatrixMarketError::InvalidEntry {
            line: line_no,
            msg: format!("bad row index '{row_s}': {e}"),
        })?;
        let col_1: usize = col_s.parse().map_err(|e| MatrixMarketError::InvalidEntry {
            line: line_no,
            msg: format!("bad col index '{col_s}': {e}"),
        })?;
        if row_1 == 0 || col_1 == 0 {
            return Err(MatrixMarketError::InvalidEntry {
                line: line_no,
                msg: "MatrixMarket indices are 1-based; found 0".to_string(),
            }
            .into());
        }

        let val = match field {
            MmField::Integer => {
                let v: i64 = val_s.parse().map_err(|e| MatrixMarketError::InvalidEntry {
                    line: line_no,
                    msg: format!("bad integer value '{val_s}': {e}"),
                })?;
                v as f64
            }
            MmField::Real => val_s.parse().map_err(|e| MatrixMarketError::InvalidEntry {
                line: line_no,
                msg: format!("bad real value '{val_s}': {e}"),
            })?,
        };

        b.push(row_1 - 1, col_1 - 1, val)?;
        read += 1;
    }

    if read != nnz {
        return Err(MatrixMarketError::EntryCountMismatch {
            expected: nnz,
            actual: read,
        }
        .into());
    }

    b.build()
}

/// Build from an n x n row-major dense buffer, keeping only the nonzeros.
pub fn from_dense_rows(n: usize, data: &[f64]) -> Result<SparseMatrix, MatrixError> {
    if data.len() != n * n {
        return Err(MatrixError::DimensionMismatch {
            expected: n * n,
            actual: data.len(),
            operation: "from_dense_rows",
        });
    }
    let mut b = MatrixBuilder::new(n, n);
    for i in 0..n {
        for j in 0..n {
            let v = data[i * n + j];
            if v != 0.0 {
                b.push(i, j, v)?;
            }
        }
    }
    b.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parse_coordinate_general_with_duplicates() {
        let mtx = r#"
%%MatrixMarket matrix coordinate integer general
% a comment
3 3 4
1 1 2
1 1 3
3 1 4
2 3 5
"#;
        let a = load_matrix_market(Cursor::new(mtx)).unwrap();
        assert_eq!(a.shape().rows, 3);
        assert_eq!(a.shape().cols, 3);
        // (1,1) duplicates combine: 2+3=5 -> 3 unique nonzeros
        assert_eq!(a.nnz(), 3);
        assert_eq!(a.diagonal(0).unwrap(), 5.0);

        let col0: Vec<_> = a.col(0).unwrap().collect();
        assert_eq!(col0, vec![(0, 5.0), (2, 4.0)]);
    }

    #[test]
    fn rejects_symmetric_banner() {
        let mtx = "%%MatrixMarket matrix coordinate real symmetric\n2 2 1\n1 1 1.0\n";
        let err = load_matrix_market(Cursor::new(mtx)).unwrap_err();
        assert!(format!("{err}").contains("only 'general' symmetry is supported"));
    }

    #[test]
    fn rejects_entry_count_mismatch() {
        let mtx = "%%MatrixMarket matrix coordinate real general\n2 2 2\n1 1 1.0\n";
        let err = load_matrix_market(Cursor::new(mtx)).unwrap_err();
        assert!(matches!(
            err,
            MatrixError::MatrixMarket(MatrixMarketError::EntryCountMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn dense_rows_roundtrip() {
        let a = from_dense_rows(2, &[4.0, 1.0, 1.0, 3.0]).unwrap();
        assert_eq!(a.nnz(), 4);
        assert_eq!(a.diagonal(1).unwrap(), 3.0);
    }
}
