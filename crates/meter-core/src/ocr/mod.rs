//! Field detection and digit recognition collaborators.

pub mod hub;
pub mod normalizer;
pub mod preprocessing;
pub mod recognizer;
pub mod yolo;

#[cfg(feature = "native")]
pub mod engine;

use image::RgbImage;

use crate::error::OcrError;
use crate::models::fields::Detection;

pub use hub::HubDetector;
pub use recognizer::CtcRecognizer;
pub use yolo::YoloDetector;

/// Finds digit-group boxes on a meter photo.
///
/// No ordering is promised for the returned detections. An empty vector is
/// a valid answer.
pub trait ObjectDetector: Send + Sync {
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, OcrError>;
}

/// Reads the text in one cropped field.
pub trait TextRecognizer: Send + Sync {
    fn recognize(&self, crop: &RgbImage) -> Result<String, OcrError>;
}

impl<T: ObjectDetector + ?Sized> ObjectDetector for Box<T> {
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, OcrError> {
        (**self).detect(image)
    }
}

impl<T: TextRecognizer + ?Sized> TextRecognizer for Box<T> {
    fn recognize(&self, crop: &RgbImage) -> Result<String, OcrError> {
        (**self).recognize(crop)
    }
}
