use thiserror::Error;

#[derive(Error, Debug)]
pub enum ForensicsError {
    #[error("Image decode error: {0}")]
    ImageDecode(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JPEG re-encoding failed: {0}")]
    Encoding(String),

    #[error("Embedding dimension mismatch (expected {expected}, got {actual})")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Input shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Pre/post batch sizes differ ({pre} pre vs {post} post)")]
    BatchAlignment { pre: usize, post: usize },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid catalog label {0:?}")]
    InvalidLabel(String),

    #[error("Catalog format error at line {line}: {reason}")]
    CatalogFormat { line: usize, reason: String },

    #[error("Catalog record error: {0}")]
    Record(#[from] csv::Error),

    #[error("Model format error: {0}")]
    ModelFormat(String),
}

impl From<serde_json::Error> for ForensicsError {
    fn from(err: serde_json::Error) -> Self {
        ForensicsError::ModelFormat(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ForensicsError>;
