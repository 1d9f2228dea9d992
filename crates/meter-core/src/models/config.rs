//! Configuration structures for the meter OCR service.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::MeterError;
use crate::models::fields::DuplicatePolicy;

/// Environment variable consulted for the detector API key.
pub const HUB_API_KEY_ENV: &str = "METER_HUB_API_KEY";

/// Main configuration for the meter OCR service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    /// HTTP server configuration.
    pub server: ServerConfig,

    /// Remote image fetch configuration.
    pub fetch: FetchConfig,

    /// Field detector configuration.
    pub detector: DetectorConfig,

    /// Digit recognizer configuration.
    pub recognizer: RecognizerConfig,

    /// Field assembly configuration.
    pub fields: FieldsConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the server binds to.
    pub bind_addr: String,

    /// Upper bound for one `/ocr` request, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5001".to_string(),
            request_timeout_secs: 120,
        }
    }
}

/// Remote image fetch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// HTTP timeout for downloading the meter photo.
    pub timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

/// Which detector implementation to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorBackend {
    /// Remote detection API (multipart upload).
    #[default]
    Hub,
    /// Local YOLO model through ONNX Runtime.
    Onnx,
}

/// Field detector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub backend: DetectorBackend,

    /// Minimum detection confidence (0.0 - 1.0).
    pub confidence: f32,

    /// IoU threshold for non-maximum suppression (0.0 - 1.0).
    pub iou: f32,

    /// Square model input size in pixels.
    pub image_size: u32,

    pub hub: HubConfig,

    pub onnx: OnnxDetectorConfig,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            backend: DetectorBackend::Hub,
            confidence: 0.25,
            iou: 0.45,
            image_size: 640,
            hub: HubConfig::default(),
            onnx: OnnxDetectorConfig::default(),
        }
    }
}

/// Remote detector API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Prediction endpoint.
    pub api_url: String,

    /// API key; falls back to `METER_HUB_API_KEY` when empty.
    pub api_key: String,

    /// Model identifier sent with each request.
    pub model_url: String,

    /// HTTP timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            api_url: "https://predict.ultralytics.com".to_string(),
            api_key: String::new(),
            model_url: "https://hub.ultralytics.com/models/9MXNttLcuHXX2yFUN6Ym".to_string(),
            timeout_secs: 60,
        }
    }
}

impl HubConfig {
    /// Configured key, or the environment fallback.
    pub fn resolved_api_key(&self) -> Option<String> {
        if !self.api_key.is_empty() {
            return Some(self.api_key.clone());
        }
        std::env::var(HUB_API_KEY_ENV).ok().filter(|k| !k.is_empty())
    }
}

/// Local YOLO detector settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OnnxDetectorConfig {
    /// Path to the exported YOLO model.
    pub model_path: PathBuf,

    /// Number of field classes the model was trained on.
    pub num_classes: usize,

    /// Maximum detections kept after NMS.
    pub max_detections: usize,
}

impl Default for OnnxDetectorConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/fields.onnx"),
            num_classes: 7,
            max_detections: 32,
        }
    }
}

/// Digit recognizer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognizerConfig {
    /// Path to the CTC recognition model.
    pub model_path: PathBuf,

    /// Character dictionary, one character per line. Built-in when unset.
    pub dictionary: Option<PathBuf>,

    /// Model input height.
    pub image_height: u32,

    /// Maximum model input width; narrower crops are right-padded.
    pub max_width: u32,

    /// Number of CPU threads for the recognizer session.
    pub num_threads: usize,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/digits_rec.onnx"),
            dictionary: None,
            image_height: 48,
            max_width: 320,
            num_threads: 4,
        }
    }
}

/// Field assembly configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldsConfig {
    /// Which detection wins when two share a class.
    pub duplicate_policy: DuplicatePolicy,
}

impl MeterConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, MeterError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| MeterError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &Path) -> Result<(), MeterError> {
        let content =
            serde_json::to_string_pretty(self).map_err(|e| MeterError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values the pipeline cannot work with.
    pub fn validate(&self) -> Result<(), MeterError> {
        let unit = 0.0..=1.0;
        if !unit.contains(&self.detector.confidence) {
            return Err(MeterError::Config(format!(
                "detector.confidence must be in [0, 1], got {}",
                self.detector.confidence
            )));
        }
        if !unit.contains(&self.detector.iou) {
            return Err(MeterError::Config(format!(
                "detector.iou must be in [0, 1], got {}",
                self.detector.iou
            )));
        }
        if self.detector.image_size == 0 {
            return Err(MeterError::Config("detector.image_size must be positive".into()));
        }
        if self.detector.onnx.num_classes == 0 {
            return Err(MeterError::Config("detector.onnx.num_classes must be positive".into()));
        }
        if self.recognizer.image_height == 0 || self.recognizer.max_width == 0 {
            return Err(MeterError::Config("recognizer input size must be positive".into()));
        }
        if self.server.request_timeout_secs == 0
            || self.fetch.timeout_secs == 0
            || self.detector.hub.timeout_secs == 0
        {
            return Err(MeterError::Config("timeouts must be positive".into()));
        }
        if self.detector.backend == DetectorBackend::Hub {
            if self.detector.hub.api_url.trim().is_empty() {
                return Err(MeterError::Config("detector.hub.api_url must not be empty".into()));
            }
            if self.detector.hub.model_url.trim().is_empty() {
                return Err(MeterError::Config("detector.hub.model_url must not be empty".into()));
            }
        }
        Ok(())
    }
}
