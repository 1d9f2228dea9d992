//! Error types for the meter-core library.

use thiserror::Error;

/// Main error type for a field extraction request.
///
/// Only request-level failures live here. Per-field recognition and
/// normalization failures are reported inline as
/// [`FieldOutcome::Failed`](crate::FieldOutcome::Failed).
#[derive(Error, Debug)]
pub enum MeterError {
    /// Missing or malformed image reference, or bytes that are not an image.
    #[error("{0}")]
    InvalidInput(String),

    /// Remote image could not be fetched.
    #[error("failed to fetch image from {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// The field detector failed or returned malformed data.
    #[error("detection failed: {0}")]
    Detection(String),

    /// Collaborator error outside the detection stage (e.g. model loading).
    #[error("OCR error: {0}")]
    Ocr(#[from] OcrError),

    /// Image processing error.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl MeterError {
    /// True for errors caused by the caller's input (reported as HTTP 400).
    pub fn is_client_error(&self) -> bool {
        matches!(self, MeterError::InvalidInput(_) | MeterError::Fetch { .. })
    }

    /// Pipeline stage the error belongs to, for logging.
    pub fn stage(&self) -> &'static str {
        match self {
            MeterError::InvalidInput(_) => "input",
            MeterError::Fetch { .. } => "fetch",
            MeterError::Detection(_) => "detection",
            MeterError::Ocr(_) | MeterError::Image(_) => "ocr",
            MeterError::Io(_) => "io",
            MeterError::Config(_) => "config",
        }
    }
}

/// Errors raised by the detector and recognizer collaborators.
#[derive(Error, Debug)]
pub enum OcrError {
    /// Failed to load a model or build a client.
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    /// Field detection failed.
    #[error("field detection failed: {0}")]
    Detection(String),

    /// Text recognition failed.
    #[error("text recognition failed: {0}")]
    Recognition(String),

    /// Image preprocessing failed.
    #[error("preprocessing failed: {0}")]
    Preprocessing(String),
}

/// Result type for the meter-core library.
pub type Result<T> = std::result::Result<T, MeterError>;
