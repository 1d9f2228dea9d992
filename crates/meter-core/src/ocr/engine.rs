//! Building a ready-to-serve pipeline from configuration.

use tracing::info;

use crate::error::{MeterError, OcrError, Result};
use crate::models::config::{DetectorBackend, MeterConfig};
use crate::pipeline::FieldPipeline;
use crate::source::ImageLoader;
use meter_inference::{OrtBackend, SessionOptions};

use super::hub::HubDetector;
use super::recognizer::CtcRecognizer;
use super::yolo::YoloDetector;

/// Load models and clients described by `config` and assemble the pipeline.
///
/// Everything is loaded once here; the returned pipeline is shared across
/// requests.
pub fn create_pipeline(config: &MeterConfig) -> Result<FieldPipeline> {
    config.validate()?;

    let rec = &config.recognizer;
    if !rec.model_path.exists() {
        return Err(MeterError::Config(format!(
            "recognizer model not found at {}",
            rec.model_path.display()
        )));
    }

    let options = SessionOptions {
        intra_threads: rec.num_threads.max(1),
    };
    let rec_backend = OrtBackend::from_file_with(&rec.model_path, options)
        .map_err(|e| OcrError::ModelLoad(format!("recognizer: {}", e)))?;
    let dictionary = match &rec.dictionary {
        Some(path) => CtcRecognizer::<OrtBackend>::load_dictionary(path)?,
        None => CtcRecognizer::<OrtBackend>::default_dictionary(),
    };
    let recognizer =
        CtcRecognizer::new(rec_backend, dictionary).with_input_size(rec.image_height, rec.max_width);
    info!("Loaded recognizer from {}", rec.model_path.display());

    let builder = FieldPipeline::builder()
        .with_loader(ImageLoader::from_config(&config.fetch)?)
        .with_recognizer(recognizer)
        .with_duplicate_policy(config.fields.duplicate_policy);

    let det = &config.detector;
    let builder = match det.backend {
        DetectorBackend::Hub => builder.with_detector(HubDetector::from_config(det)?),
        DetectorBackend::Onnx => {
            let backend = OrtBackend::from_file_with(&det.onnx.model_path, options)
                .map_err(|e| OcrError::ModelLoad(format!("detector: {}", e)))?;
            info!("Loaded detector from {}", det.onnx.model_path.display());
            builder.with_detector(
                YoloDetector::new(backend, det.onnx.num_classes)
                    .with_input_size(det.image_size)
                    .with_thresholds(det.confidence, det.iou)
                    .with_max_detections(det.onnx.max_detections),
            )
        }
    };

    builder.build()
}
