//! Detections, field outcomes and the field map returned to callers.

use std::collections::BTreeMap;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

use crate::error::OcrError;

/// Value reported for a field whose text could not be read or normalized.
pub const ERROR_SENTINEL: &str = "ERROR";

/// Axis-aligned box in source image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

/// Integer crop rectangle inside an image, `[x, x + width) x [y, y + height)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    /// Build a box from YOLO-style center coordinates.
    pub fn from_center(cx: f32, cy: f32, width: f32, height: f32) -> Self {
        Self::new(
            cx - width / 2.0,
            cy - height / 2.0,
            cx + width / 2.0,
            cy + height / 2.0,
        )
    }

    pub fn width(&self) -> f32 {
        (self.x_max - self.x_min).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y_max - self.y_min).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Finite coordinates with `min <= max` on both axes.
    pub fn is_well_formed(&self) -> bool {
        [self.x_min, self.y_min, self.x_max, self.y_max]
            .iter()
            .all(|v| v.is_finite())
            && self.x_min <= self.x_max
            && self.y_min <= self.y_max
    }

    /// Scale both axes, e.g. from model input space back to source pixels.
    pub fn scale(&self, sx: f32, sy: f32) -> Self {
        Self::new(
            self.x_min * sx,
            self.y_min * sy,
            self.x_max * sx,
            self.y_max * sy,
        )
    }

    /// Intersection over union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x_min.max(other.x_min);
        let y1 = self.y_min.max(other.y_min);
        let x2 = self.x_max.min(other.x_max);
        let y2 = self.y_max.min(other.y_max);

        let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - intersection;

        if union > 0.0 { intersection / union } else { 0.0 }
    }

    /// Clamp to an image of the given size and round to whole pixels.
    ///
    /// Returns `None` when nothing of the box is left inside the image.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<CropRect> {
        let clamp = |v: f32, max: u32| -> u32 {
            if v.is_nan() {
                0
            } else {
                v.round().clamp(0.0, max as f32) as u32
            }
        };

        let x0 = clamp(self.x_min, width);
        let y0 = clamp(self.y_min, height);
        let x1 = clamp(self.x_max, width);
        let y1 = clamp(self.y_max, height);

        if x1 <= x0 || y1 <= y0 {
            return None;
        }

        Some(CropRect {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        })
    }
}

/// One box emitted by the field detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub class_index: u32,
    pub confidence: f32,
}

impl Detection {
    /// Create a detection, rejecting inverted boxes and out-of-range scores.
    pub fn new(bbox: BoundingBox, class_index: u32, confidence: f32) -> Result<Self, OcrError> {
        if !bbox.is_well_formed() {
            return Err(OcrError::Detection(format!("malformed box {:?}", bbox)));
        }
        if !(0.0..=1.0).contains(&confidence) {
            return Err(OcrError::Detection(format!(
                "confidence {} outside [0, 1]",
                confidence
            )));
        }
        Ok(Self {
            bbox,
            class_index,
            confidence,
        })
    }

    /// Output field name for this detection's class (`v1` for class 0).
    pub fn field_name(&self) -> String {
        format!("v{}", u64::from(self.class_index) + 1)
    }
}

/// Why a single field ended up as `"ERROR"`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FieldFailure {
    /// The recognizer failed on this crop.
    #[error("recognition failed: {0}")]
    Recognition(String),

    /// The recognized text contained a character with no digit mapping.
    #[error("invalid character {character:?} in {text:?}")]
    Normalization { character: char, text: String },
}

/// Result of reading one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldOutcome {
    /// Canonical digit string (may be empty).
    Text(String),
    /// Field could not be read; serialized as `"ERROR"`.
    Failed(FieldFailure),
}

impl FieldOutcome {
    /// Value as reported to callers.
    pub fn value(&self) -> &str {
        match self {
            FieldOutcome::Text(text) => text,
            FieldOutcome::Failed(_) => ERROR_SENTINEL,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, FieldOutcome::Failed(_))
    }
}

impl Serialize for FieldOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.value())
    }
}

/// Which detection wins when two share a class index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Later detection overwrites earlier ones.
    #[default]
    Last,
    /// First detection is kept.
    First,
    /// Detection with the highest detector confidence is kept; ties go to the later one.
    HighestConfidence,
}

#[derive(Debug, Clone, PartialEq)]
struct FieldEntry {
    outcome: FieldOutcome,
    confidence: f32,
}

/// Field name to outcome mapping, serialized as `{"v1": "0123", ...}`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMap {
    entries: BTreeMap<String, FieldEntry>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a field honoring the duplicate policy. Returns whether the
    /// value was stored.
    pub fn insert(
        &mut self,
        name: String,
        outcome: FieldOutcome,
        confidence: f32,
        policy: DuplicatePolicy,
    ) -> bool {
        let replace = match (self.entries.get(&name), policy) {
            (None, _) => true,
            (Some(_), DuplicatePolicy::Last) => true,
            (Some(_), DuplicatePolicy::First) => false,
            (Some(existing), DuplicatePolicy::HighestConfidence) => {
                confidence >= existing.confidence
            }
        };

        if replace {
            self.entries.insert(name, FieldEntry { outcome, confidence });
        }
        replace
    }

    pub fn get(&self, name: &str) -> Option<&FieldOutcome> {
        self.entries.get(name).map(|e| &e.outcome)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldOutcome)> {
        self.entries.iter().map(|(k, e)| (k.as_str(), &e.outcome))
    }

    /// Number of fields reported as `"ERROR"`.
    pub fn failed_count(&self) -> usize {
        self.entries.values().filter(|e| e.outcome.is_failed()).count()
    }
}

impl Serialize for FieldMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, entry) in &self.entries {
            map.serialize_entry(name, &entry.outcome)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_clamp_inside() {
        let bbox = BoundingBox::new(10.0, 10.0, 50.0, 30.0);
        assert_eq!(
            bbox.clamp_to(100, 100),
            Some(CropRect {
                x: 10,
                y: 10,
                width: 40,
                height: 20
            })
        );
    }

    #[test]
    fn test_clamp_partially_outside() {
        let bbox = BoundingBox::new(-15.0, 90.0, 30.4, 140.0);
        assert_eq!(
            bbox.clamp_to(100, 100),
            Some(CropRect {
                x: 0,
                y: 90,
                width: 30,
                height: 10
            })
        );
    }

    #[test]
    fn test_clamp_to_zero_area() {
        // Entirely right of the image
        assert_eq!(BoundingBox::new(120.0, 10.0, 160.0, 20.0).clamp_to(100, 100), None);
        // Zero height
        assert_eq!(BoundingBox::new(10.0, 20.0, 40.0, 20.0).clamp_to(100, 100), None);
        // Sub-pixel sliver rounds away
        assert_eq!(BoundingBox::new(10.1, 10.0, 10.3, 20.0).clamp_to(100, 100), None);
        // NaN collapses to the origin
        assert_eq!(BoundingBox::new(f32::NAN, 0.0, f32::NAN, 5.0).clamp_to(100, 100), None);
    }

    #[test]
    fn test_iou() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 0.0, 15.0, 10.0);
        let c = BoundingBox::new(20.0, 20.0, 30.0, 30.0);

        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(a.iou(&c), 0.0);
    }

    #[test]
    fn test_from_center() {
        let bbox = BoundingBox::from_center(20.0, 10.0, 8.0, 4.0);
        assert_eq!(bbox, BoundingBox::new(16.0, 8.0, 24.0, 12.0));
    }

    #[test]
    fn test_detection_validation() {
        let ok = Detection::new(BoundingBox::new(1.0, 2.0, 3.0, 4.0), 2, 0.9).unwrap();
        assert_eq!(ok.field_name(), "v3");

        assert!(Detection::new(BoundingBox::new(5.0, 2.0, 3.0, 4.0), 0, 0.9).is_err());
        assert!(Detection::new(BoundingBox::new(1.0, 2.0, 3.0, 4.0), 0, 1.5).is_err());
        assert!(Detection::new(BoundingBox::new(1.0, f32::INFINITY, 3.0, 4.0), 0, 0.5).is_err());
    }

    #[test]
    fn test_field_map_serialization() {
        let mut fields = FieldMap::new();
        fields.insert("v1".into(), FieldOutcome::Text("50".into()), 0.9, DuplicatePolicy::Last);
        fields.insert(
            "v2".into(),
            FieldOutcome::Failed(FieldFailure::Recognition("timeout".into())),
            0.8,
            DuplicatePolicy::Last,
        );

        let json = serde_json::to_value(&fields).unwrap();
        assert_eq!(json, serde_json::json!({"v1": "50", "v2": "ERROR"}));
        assert_eq!(fields.failed_count(), 1);
    }

    #[test]
    fn test_duplicate_policies() {
        let text = |s: &str| FieldOutcome::Text(s.to_string());

        let mut last = FieldMap::new();
        last.insert("v1".into(), text("1"), 0.9, DuplicatePolicy::Last);
        last.insert("v1".into(), text("2"), 0.1, DuplicatePolicy::Last);
        assert_eq!(last.get("v1"), Some(&text("2")));
        assert_eq!(last.len(), 1);

        let mut first = FieldMap::new();
        first.insert("v1".into(), text("1"), 0.1, DuplicatePolicy::First);
        assert!(!first.insert("v1".into(), text("2"), 0.9, DuplicatePolicy::First));
        assert_eq!(first.get("v1"), Some(&text("1")));

        let mut best = FieldMap::new();
        best.insert("v1".into(), text("1"), 0.7, DuplicatePolicy::HighestConfidence);
        best.insert("v1".into(), text("2"), 0.4, DuplicatePolicy::HighestConfidence);
        best.insert("v1".into(), text("3"), 0.7, DuplicatePolicy::HighestConfidence);
        assert_eq!(best.get("v1"), Some(&text("3")));
    }

    #[test]
    fn test_duplicate_policy_serde() {
        let policy: DuplicatePolicy = serde_json::from_str("\"highest_confidence\"").unwrap();
        assert_eq!(policy, DuplicatePolicy::HighestConfidence);
        assert_eq!(DuplicatePolicy::default(), DuplicatePolicy::Last);
    }
}
