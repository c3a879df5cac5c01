use thiserror::Error;

use super::array::DType;

/// Errors raised while building or mutating labeled arrays and datasets.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("dimensions {dims:?} do not fit an array of rank {ndim}")]
    RankMismatch { dims: Vec<String>, ndim: usize },

    #[error("dimension '{dim}' has length {expected} but '{name}' has length {found} along it")]
    LengthMismatch {
        name: String,
        dim: String,
        expected: usize,
        found: usize,
    },

    #[error("'{0}' is not a valid variable name")]
    InvalidName(String),

    #[error("name '{0}' is already used in this dataset")]
    DuplicateName(String),

    #[error("coordinate '{0}' differs from the coordinate already present")]
    CoordinateConflict(String),

    #[error("coordinate '{name}' must be one-dimensional, got {ndim} dimension(s)")]
    CoordinateRank { name: String, ndim: usize },

    #[error("field '{field}' expects {expected}")]
    FieldType {
        field: String,
        expected: &'static str,
    },

    #[error("gzip level {0} is outside 0..=9")]
    GzipLevel(u32),

    #[error("dimension '{0}' not found")]
    MissingDimension(String),

    #[error("variable '{0}' not found")]
    MissingVariable(String),

    #[error("'{name}' has dtype {found} in one dataset and {expected} in another")]
    DTypeMismatch {
        name: String,
        expected: DType,
        found: DType,
    },

    #[error("cannot concatenate an empty list of datasets")]
    EmptyConcat,

    #[error("dimension '{0}' is present in some datasets but not others")]
    PartialDimension(String),

    #[error("variable '{0}' is present in some datasets but not others")]
    PartialVariable(String),

    #[error("'{0}' differs between datasets")]
    Conflict(String),

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}

pub type Result<T, E = DatasetError> = std::result::Result<T, E>;
