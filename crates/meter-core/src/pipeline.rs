//! Field extraction pipeline: detect, crop, recognize, normalize, assemble.

use std::time::Instant;

use image::RgbImage;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::{MeterError, Result};
use crate::models::config::FetchConfig;
use crate::models::fields::{Detection, DuplicatePolicy, FieldFailure, FieldMap, FieldOutcome};
use crate::ocr::normalizer::DigitNormalizer;
use crate::ocr::preprocessing::crop_field;
use crate::ocr::{ObjectDetector, TextRecognizer};
use crate::source::ImageLoader;

/// Outcome of one extraction.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionReport {
    /// Field name to normalized value.
    pub fields: FieldMap,

    /// Number of detections returned by the detector.
    pub detections: usize,

    /// Detections dropped because their box had no area inside the image.
    pub skipped: usize,

    /// Source image dimensions (width, height).
    pub image_size: (u32, u32),

    /// Wall time of detection and recognition in milliseconds.
    pub processing_time_ms: u64,
}

/// Coordinates image acquisition, the detector and the recognizer.
///
/// Collaborators are injected through [`FieldPipelineBuilder`]; the pipeline
/// itself is immutable and can be shared between requests.
pub struct FieldPipeline {
    loader: ImageLoader,
    detector: Box<dyn ObjectDetector>,
    recognizer: Box<dyn TextRecognizer>,
    normalizer: DigitNormalizer,
    duplicate_policy: DuplicatePolicy,
}

/// Builder for [`FieldPipeline`].
pub struct FieldPipelineBuilder {
    loader: Option<ImageLoader>,
    detector: Option<Box<dyn ObjectDetector>>,
    recognizer: Option<Box<dyn TextRecognizer>>,
    duplicate_policy: DuplicatePolicy,
}

impl FieldPipelineBuilder {
    pub fn new() -> Self {
        Self {
            loader: None,
            detector: None,
            recognizer: None,
            duplicate_policy: DuplicatePolicy::default(),
        }
    }

    pub fn with_loader(mut self, loader: ImageLoader) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn with_detector(mut self, detector: impl ObjectDetector + 'static) -> Self {
        self.detector = Some(Box::new(detector));
        self
    }

    pub fn with_recognizer(mut self, recognizer: impl TextRecognizer + 'static) -> Self {
        self.recognizer = Some(Box::new(recognizer));
        self
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    /// Build the pipeline. Detector and recognizer are required.
    pub fn build(self) -> Result<FieldPipeline> {
        let detector = self
            .detector
            .ok_or_else(|| MeterError::Config("no detector configured".to_string()))?;
        let recognizer = self
            .recognizer
            .ok_or_else(|| MeterError::Config("no recognizer configured".to_string()))?;
        let loader = match self.loader {
            Some(loader) => loader,
            None => ImageLoader::from_config(&FetchConfig::default())?,
        };

        Ok(FieldPipeline {
            loader,
            detector,
            recognizer,
            normalizer: DigitNormalizer::new(),
            duplicate_policy: self.duplicate_policy,
        })
    }
}

impl Default for FieldPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldPipeline {
    pub fn builder() -> FieldPipelineBuilder {
        FieldPipelineBuilder::new()
    }

    /// Load `image_url` and extract its fields.
    pub fn run(&self, image_url: &str) -> Result<ExtractionReport> {
        let image = self.loader.load(image_url).inspect_err(|e| {
            warn!(stage = e.stage(), "Rejected image {:?}: {}", image_url, e);
        })?;
        self.extract(&image)
    }

    /// Extract fields from an already loaded image.
    pub fn extract(&self, image: &RgbImage) -> Result<ExtractionReport> {
        let start = Instant::now();
        let (width, height) = image.dimensions();

        let detections = self.detector.detect(image).map_err(|e| {
            error!(stage = "detection", "Detector failed: {}", e);
            MeterError::Detection(e.to_string())
        })?;

        if detections.is_empty() {
            info!("No detections found in the image");
        } else {
            debug!("Detector returned {} boxes", detections.len());
        }

        let mut fields = FieldMap::new();
        let mut skipped = 0usize;

        for detection in &detections {
            let name = detection.field_name();
            let Some(crop) = crop_field(image, &detection.bbox) else {
                debug!("Skipping {}: box {:?} is empty inside {}x{}", name, detection.bbox, width, height);
                skipped += 1;
                continue;
            };

            let outcome = self.read_field(&name, detection, &crop);
            if !fields.insert(name.clone(), outcome, detection.confidence, self.duplicate_policy) {
                debug!("Kept earlier value for {} ({:?})", name, self.duplicate_policy);
            }
        }

        let processing_time_ms = start.elapsed().as_millis() as u64;
        info!(
            "Extracted {} fields ({} failed, {} skipped) in {}ms",
            fields.len(),
            fields.failed_count(),
            skipped,
            processing_time_ms
        );

        Ok(ExtractionReport {
            fields,
            detections: detections.len(),
            skipped,
            image_size: (width, height),
            processing_time_ms,
        })
    }

    fn read_field(&self, name: &str, detection: &Detection, crop: &RgbImage) -> FieldOutcome {
        let raw = match self.recognizer.recognize(crop) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(stage = "recognition", "Error recognizing {}: {}", name, e);
                return FieldOutcome::Failed(FieldFailure::Recognition(e.to_string()));
            }
        };

        match self.normalizer.normalize_outcome(&raw) {
            Ok(digits) => {
                debug!(
                    "{} (class {}, conf {:.2}): {:?} -> {:?}",
                    name, detection.class_index, detection.confidence, raw, digits
                );
                FieldOutcome::Text(digits)
            }
            Err(failure) => {
                warn!(stage = "normalization", "Field {}: {}", name, failure);
                FieldOutcome::Failed(failure)
            }
        }
    }
}
