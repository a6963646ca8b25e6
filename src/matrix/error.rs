use thiserror::Error;

#[derive(Debug, Error)]
pub enum MatrixError {
    #[error("entry ({row}, {col}) is out of bounds for a {rows}x{cols} matrix")]
    EntryOutOfBounds {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    #[error("entry ({row}, {col}) has non-finite value {value}")]
    NonFiniteEntry { row: usize, col: usize, value: f64 },

    #[error("vector entry {index} has non-finite value {value}")]
    NonFiniteVector { index: usize, value: f64 },

    #[error("index {index} is out of range for dimension {dim}")]
    IndexOutOfRange { index: usize, dim: usize },

    #[error("{operation} requires a square matrix, got {rows}x{cols}")]
    NotSquare {
        operation: &'static str,
        rows: usize,
        cols: usize,
    },

    #[error("vector length {actual} does not match dimension {expected} in {operation}")]
    DimensionMismatch {
        expected: usize,
        actual: usize,
        operation: &'static str,
    },

    #[error("row {row} has a zero diagonal, required by {operation}")]
    ZeroDiagonal { row: usize, operation: &'static str },

    #[error("invalid stochastic input: {detail}")]
    InvalidStochastic { detail: String },

    #[error("{view} pointer array has length {actual}, expected {expected}")]
    PointerLength {
        view: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{view} pointers are not monotone at position {index}")]
    PointerNotMonotone { view: &'static str, index: usize },

    #[error("{view} indices not strictly ascending within lane {lane}")]
    IndicesNotAscending { view: &'static str, lane: usize },

    #[error(transparent)]
    MatrixMarket(#[from] MatrixMarketError),
}

#[derive(Debug, Error)]
pub enum MatrixMarketError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid MatrixMarket banner: {0}")]
    InvalidBanner(String),

    #[error("unsupported MatrixMarket type: {0}")]
    Unsupported(String),

    #[error("invalid MatrixMarket size line: {0}")]
    InvalidSizeLine(String),

    #[error("invalid MatrixMarket entry at line {line}: {msg}")]
    InvalidEntry { line: usize, msg: String },

    #[error("expected {expected} entries but found {actual}")]
    EntryCountMismatch { expected: usize, actual: usize },
}
