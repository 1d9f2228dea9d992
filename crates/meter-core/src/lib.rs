//! Core library for water-meter OCR.
//!
//! This crate provides:
//! - image acquisition from local paths or `http(s)` URLs, normalized to RGB
//! - field detection (remote detector API or a local YOLO model)
//! - digit recognition with a CTC model
//! - the digit normalizer and the field extraction pipeline that ties them together

pub mod error;
pub mod models;
pub mod ocr;
pub mod pipeline;
pub mod source;

pub use error::{MeterError, OcrError, Result};
pub use models::config::MeterConfig;
pub use models::fields::{BoundingBox, Detection, DuplicatePolicy, FieldFailure, FieldMap, FieldOutcome};
pub use ocr::normalizer::{normalize, normalize_field, DigitNormalizer, NormalizeError};
pub use ocr::{ObjectDetector, TextRecognizer};
pub use pipeline::{ExtractionReport, FieldPipeline};
pub use source::ImageLoader;

#[cfg(feature = "native")]
pub use ocr::engine::create_pipeline;
