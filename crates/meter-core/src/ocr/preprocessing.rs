//! Image preprocessing: field crops and model input tensors.

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use tracing::trace;

use crate::error::OcrError;
use crate::models::fields::{BoundingBox, CropRect};

/// Cut a detection box out of the image.
///
/// Returns `None` when the box clamps to an empty area.
pub fn crop_field(image: &RgbImage, bbox: &BoundingBox) -> Option<RgbImage> {
    let CropRect {
        x,
        y,
        width,
        height,
    } = bbox.clamp_to(image.width(), image.height())?;

    trace!("Cropping field at ({}, {}) {}x{}", x, y, width, height);
    Some(imageops::crop_imm(image, x, y, width, height).to_image())
}

/// Builds model input tensors for the detector and the recognizer.
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    /// Square input size of the detection model.
    det_input_size: u32,
    /// Input height of the recognition model.
    rec_height: u32,
    /// Maximum input width of the recognition model.
    rec_max_width: u32,
}

impl ImagePreprocessor {
    pub fn new() -> Self {
        Self {
            det_input_size: 640,
            rec_height: 48,
            rec_max_width: 320,
        }
    }

    pub fn with_detection_size(mut self, size: u32) -> Self {
        self.det_input_size = size;
        self
    }

    pub fn with_recognition_size(mut self, height: u32, max_width: u32) -> Self {
        self.rec_height = height;
        self.rec_max_width = max_width;
        self
    }

    pub fn detection_size(&self) -> u32 {
        self.det_input_size
    }

    /// Resize to the square detector input and scale to `[0, 1]`, NCHW.
    ///
    /// Returns the tensor and the factors that map model coordinates back to
    /// source pixels.
    pub fn preprocess_for_detection(
        &self,
        image: &RgbImage,
    ) -> Result<(Array4<f32>, f32, f32), OcrError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(OcrError::Preprocessing("empty image".to_string()));
        }

        let size = self.det_input_size;
        let resized = imageops::resize(image, size, size, FilterType::Triangle);

        let mut tensor = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = f32::from(pixel[c]) / 255.0;
            }
        }

        let scale_x = width as f32 / size as f32;
        let scale_y = height as f32 / size as f32;

        Ok((tensor, scale_x, scale_y))
    }

    /// Target width for a crop at the recognizer height, keeping aspect ratio.
    pub fn recognition_width(&self, width: u32, height: u32) -> u32 {
        let aspect = width as f32 / height.max(1) as f32;
        ((self.rec_height as f32 * aspect).round() as u32).clamp(1, self.rec_max_width)
    }

    /// Resize a crop to the recognizer height, normalize to `[-1, 1]` and
    /// right-pad to the maximum width.
    pub fn preprocess_for_recognition(&self, crop: &RgbImage) -> Result<Array4<f32>, OcrError> {
        let (width, height) = crop.dimensions();
        if width == 0 || height == 0 {
            return Err(OcrError::Preprocessing("empty crop".to_string()));
        }

        let target_width = self.recognition_width(width, height);
        let resized = imageops::resize(crop, target_width, self.rec_height, FilterType::Triangle);

        let mut tensor = Array4::<f32>::zeros((
            1,
            3,
            self.rec_height as usize,
            self.rec_max_width as usize,
        ));

        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                let value = f32::from(pixel[c]) / 255.0;
                tensor[[0, c, y as usize, x as usize]] = (value - 0.5) / 0.5;
            }
        }

        Ok(tensor)
    }
}

impl Default for ImagePreprocessor {
    fn default() -> Self {
        Self::new()
    }
}
