//! ONNX inference layer for meter-ocr.
//!
//! The field detector and the digit recognizer both run through the
//! [`InferenceBackend`] trait so the models can be swapped for test doubles
//! or another runtime without touching the OCR code.

mod backend;
mod error;
mod tensor;

pub use backend::InferenceBackend;
pub use error::InferenceError;
pub use tensor::{InputTensor, OutputTensor};

#[cfg(feature = "native")]
pub use backend::ort::{OrtBackend, SessionOptions};

/// Result type for inference operations.
pub type Result<T> = std::result::Result<T, InferenceError>;
