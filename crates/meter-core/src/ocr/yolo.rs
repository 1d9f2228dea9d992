//! Local field detector running a YOLOv8 export through ONNX Runtime.

use image::RgbImage;
use ndarray::ArrayD;
use tracing::debug;

use crate::error::OcrError;
use crate::models::fields::{BoundingBox, Detection};
use meter_inference::{InferenceBackend, InputTensor};

use super::preprocessing::ImagePreprocessor;
use super::ObjectDetector;

/// YOLOv8 detector for meter digit groups.
pub struct YoloDetector<B: InferenceBackend> {
    backend: B,
    preprocessor: ImagePreprocessor,
    num_classes: usize,
    confidence: f32,
    iou: f32,
    max_detections: usize,
}

impl<B: InferenceBackend> YoloDetector<B> {
    pub fn new(backend: B, num_classes: usize) -> Self {
        Self {
            backend,
            preprocessor: ImagePreprocessor::new(),
            num_classes,
            confidence: 0.25,
            iou: 0.45,
            max_detections: 32,
        }
    }

    pub fn with_input_size(mut self, size: u32) -> Self {
        self.preprocessor = self.preprocessor.with_detection_size(size);
        self
    }

    pub fn with_thresholds(mut self, confidence: f32, iou: f32) -> Self {
        self.confidence = confidence;
        self.iou = iou;
        self
    }

    pub fn with_max_detections(mut self, max: usize) -> Self {
        self.max_detections = max;
        self
    }

    /// Turn raw model output into detections in source pixel coordinates.
    ///
    /// Accepts both `[1, 4 + classes, anchors]` and the transposed
    /// `[1, anchors, 4 + classes]` layout.
    pub(crate) fn decode(
        &self,
        output: &ArrayD<f32>,
        scale_x: f32,
        scale_y: f32,
    ) -> Result<Vec<Detection>, OcrError> {
        let shape = output.shape();
        let features = 4 + self.num_classes;
        if shape.len() != 3 || shape[0] != 1 {
            return Err(OcrError::Detection(format!(
                "expected [1, {}, N] output, got {:?}",
                features, shape
            )));
        }

        let (anchors, transposed) = if shape[1] == features {
            (shape[2], false)
        } else if shape[2] == features {
            (shape[1], true)
        } else {
            return Err(OcrError::Detection(format!(
                "output {:?} does not match {} classes",
                shape, self.num_classes
            )));
        };

        let feature = |anchor: usize, f: usize| {
            if transposed {
                output[[0, anchor, f]]
            } else {
                output[[0, f, anchor]]
            }
        };

        let mut candidates = Vec::new();
        for anchor in 0..anchors {
            let mut best_class = 0usize;
            let mut best_score = f32::NEG_INFINITY;
            for class in 0..self.num_classes {
                let score = feature(anchor, 4 + class);
                if score > best_score {
                    best_score = score;
                    best_class = class;
                }
            }

            if !(best_score >= self.confidence) {
                continue;
            }

            let bbox = BoundingBox::from_center(
                feature(anchor, 0),
                feature(anchor, 1),
                feature(anchor, 2),
                feature(anchor, 3),
            )
            .scale(scale_x, scale_y);

            if !bbox.is_well_formed() {
                continue;
            }

            candidates.push(Detection {
                bbox,
                class_index: best_class as u32,
                confidence: best_score.min(1.0),
            });
        }

        debug!("{} candidates above confidence {}", candidates.len(), self.confidence);

        let mut kept = non_max_suppression(candidates, self.iou);
        kept.truncate(self.max_detections);
        Ok(kept)
    }
}

/// Class-aware NMS. Output is sorted by descending confidence.
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<Detection> = Vec::with_capacity(detections.len());
    for det in detections {
        let suppressed = keep.iter().any(|k| {
            k.class_index == det.class_index && k.bbox.iou(&det.bbox) > iou_threshold
        });
        if !suppressed {
            keep.push(det);
        }
    }
    keep
}

impl<B: InferenceBackend> ObjectDetector for YoloDetector<B> {
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, OcrError> {
        let (tensor, scale_x, scale_y) = self.preprocessor.preprocess_for_detection(image)?;

        debug!(
            "Detection input {:?}, scales ({:.3}, {:.3})",
            tensor.shape(),
            scale_x,
            scale_y
        );

        let output = self
            .backend
            .run_single(InputTensor::Float32(tensor.into_dyn()))
            .map_err(|e| OcrError::Detection(e.to_string()))?
            .into_f32()
            .map_err(|e| OcrError::Detection(e.to_string()))?;

        let detections = self.decode(&output, scale_x, scale_y)?;
        debug!("Detected {} fields", detections.len());
        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meter_inference::OutputTensor;
    use ndarray::Array3;
    use pretty_assertions::assert_eq;

    struct NoBackend(Vec<String>);

    impl InferenceBackend for NoBackend {
        fn run(
            &self,
            _inputs: &[(&str, InputTensor)],
        ) -> meter_inference::Result<Vec<(String, OutputTensor)>> {
            Err(meter_inference::InferenceError::InferenceFailed("offline".into()))
        }

        fn input_names(&self) -> &[String] {
            &self.0
        }

        fn output_names(&self) -> &[String] {
            &self.0
        }
    }

    /// Build a `[1, 4 + classes, anchors]` output from (cx, cy, w, h, class, score) rows.
    fn output(classes: usize, rows: &[(f32, f32, f32, f32, usize, f32)]) -> ArrayD<f32> {
        let mut arr = Array3::<f32>::zeros((1, 4 + classes, rows.len()));
        for (i, &(cx, cy, w, h, class, score)) in rows.iter().enumerate() {
            arr[[0, 0, i]] = cx;
            arr[[0, 1, i]] = cy;
            arr[[0, 2, i]] = w;
            arr[[0, 3, i]] = h;
            arr[[0, 4 + class, i]] = score;
        }
        arr.into_dyn()
    }

    fn det(x0: f32, class: u32, confidence: f32) -> Detection {
        Detection {
            bbox: BoundingBox::new(x0, 0.0, x0 + 10.0, 10.0),
            class_index: class,
            confidence,
        }
    }

    #[test]
    fn test_decode_filters_and_scales() {
        let detector = YoloDetector::new(NoBackend(Vec::new()), 3);
        let raw = output(
            3,
            &[
                (20.0, 10.0, 10.0, 4.0, 1, 0.9),
                (50.0, 10.0, 10.0, 4.0, 2, 0.1),
            ],
        );

        let dets = detector.decode(&raw, 2.0, 1.0).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].class_index, 1);
        assert_eq!(dets[0].bbox, BoundingBox::new(30.0, 8.0, 50.0, 12.0));
    }

    #[test]
    fn test_decode_transposed_layout() {
        let detector = YoloDetector::new(NoBackend(Vec::new()), 2);
        let mut arr = Array3::<f32>::zeros((1, 1, 6));
        arr[[0, 0, 0]] = 10.0;
        arr[[0, 0, 1]] = 10.0;
        arr[[0, 0, 2]] = 4.0;
        arr[[0, 0, 3]] = 4.0;
        arr[[0, 0, 5]] = 0.8;

        let dets = detector.decode(&arr.into_dyn(), 1.0, 1.0).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].class_index, 1);
    }

    #[test]
    fn test_decode_rejects_wrong_class_count() {
        let detector = YoloDetector::new(NoBackend(Vec::new()), 7);
        let raw = output(3, &[(1.0, 1.0, 1.0, 1.0, 0, 0.9)]);
        assert!(matches!(detector.decode(&raw, 1.0, 1.0), Err(OcrError::Detection(_))));
    }

    #[test]
    fn test_nms_same_class_only() {
        let kept = non_max_suppression(
            vec![det(0.0, 0, 0.6), det(1.0, 0, 0.9), det(1.0, 1, 0.5), det(40.0, 0, 0.3)],
            0.45,
        );

        let summary: Vec<(u32, f32)> = kept.iter().map(|d| (d.class_index, d.confidence)).collect();
        assert_eq!(summary, vec![(0, 0.9), (1, 0.5), (0, 0.3)]);
    }

    #[test]
    fn test_detect_maps_backend_failure() {
        let detector = YoloDetector::new(NoBackend(Vec::new()), 7).with_input_size(32);
        let err = detector.detect(&RgbImage::new(8, 8)).unwrap_err();
        assert!(matches!(err, OcrError::Detection(_)));
    }
}
