//! Remote field detector behind an HTTP prediction API.
//!
//! The API only accepts file uploads, so each request writes the image to
//! its own temporary JPEG. The file is removed when the upload handle drops,
//! whichever way the request ends.

use std::path::PathBuf;
use std::time::Duration;

use image::{ImageFormat, RgbImage};
use reqwest::blocking::multipart::Form;
use reqwest::blocking::Client;
use serde::Deserialize;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::OcrError;
use crate::models::config::DetectorConfig;
use crate::models::fields::{BoundingBox, Detection};

use super::ObjectDetector;

#[derive(Debug, Deserialize)]
struct HubResponse {
    images: Vec<HubImage>,
}

#[derive(Debug, Deserialize)]
struct HubImage {
    results: Vec<HubResult>,
}

#[derive(Debug, Deserialize)]
struct HubResult {
    class: f64,
    confidence: f32,
    #[serde(rename = "box")]
    bbox: HubBox,
}

#[derive(Debug, Deserialize)]
struct HubBox {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
}

/// Parse a prediction response body into detections for the first image.
pub fn parse_response(body: &str) -> Result<Vec<Detection>, OcrError> {
    let response: HubResponse = serde_json::from_str(body)
        .map_err(|e| OcrError::Detection(format!("malformed detector response: {}", e)))?;

    let image = response
        .images
        .into_iter()
        .next()
        .ok_or_else(|| OcrError::Detection("detector response has no images".to_string()))?;

    image
        .results
        .into_iter()
        .map(|r| {
            if !r.class.is_finite() || r.class < 0.0 {
                return Err(OcrError::Detection(format!("invalid class index {}", r.class)));
            }
            let bbox = BoundingBox::new(r.bbox.x1, r.bbox.y1, r.bbox.x2, r.bbox.y2);
            Detection::new(bbox, r.class as u32, r.confidence)
        })
        .collect()
}

/// Detector client for the hosted prediction API.
pub struct HubDetector {
    client: Client,
    api_url: String,
    api_key: String,
    model_url: String,
    image_size: u32,
    confidence: f32,
    iou: f32,
    temp_dir: Option<PathBuf>,
}

impl HubDetector {
    /// Create a client for `api_url`.
    pub fn new(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        model_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, OcrError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OcrError::ModelLoad(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_url: api_url.into(),
            api_key: api_key.into(),
            model_url: model_url.into(),
            image_size: 640,
            confidence: 0.25,
            iou: 0.45,
            temp_dir: None,
        })
    }

    /// Build from configuration. Requires an API key (config or environment).
    pub fn from_config(config: &DetectorConfig) -> Result<Self, OcrError> {
        let api_key = config.hub.resolved_api_key().ok_or_else(|| {
            OcrError::ModelLoad(format!(
                "detector API key missing; set detector.hub.api_key or {}",
                crate::models::config::HUB_API_KEY_ENV
            ))
        })?;
        if config.hub.model_url.trim().is_empty() {
            return Err(OcrError::ModelLoad(
                "detector model missing; set detector.hub.model_url".to_string(),
            ));
        }

        info!("Using remote detector at {}", config.hub.api_url);

        Ok(Self::new(
            config.hub.api_url.clone(),
            api_key,
            config.hub.model_url.clone(),
            Duration::from_secs(config.hub.timeout_secs),
        )?
        .with_image_size(config.image_size)
        .with_thresholds(config.confidence, config.iou))
    }

    pub fn with_image_size(mut self, size: u32) -> Self {
        self.image_size = size;
        self
    }

    pub fn with_thresholds(mut self, confidence: f32, iou: f32) -> Self {
        self.confidence = confidence;
        self.iou = iou;
        self
    }

    /// Place upload files in `dir` instead of the system temp directory.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    fn write_upload(&self, image: &RgbImage) -> Result<NamedTempFile, OcrError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("meter-upload-").suffix(".jpg");

        let file = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(|e| OcrError::Detection(format!("failed to create upload file: {}", e)))?;

        image
            .save_with_format(file.path(), ImageFormat::Jpeg)
            .map_err(|e| OcrError::Detection(format!("failed to encode upload: {}", e)))?;

        debug!("Wrote upload to {}", file.path().display());
        Ok(file)
    }
}

impl ObjectDetector for HubDetector {
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, OcrError> {
        let upload = self.write_upload(image)?;

        let form = Form::new()
            .text("model", self.model_url.clone())
            .text("imgsz", self.image_size.to_string())
            .text("conf", self.confidence.to_string())
            .text("iou", self.iou.to_string())
            .file("file", upload.path())
            .map_err(|e| OcrError::Detection(format!("failed to attach upload: {}", e)))?;

        let response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .multipart(form)
            .send()
            .map_err(|e| OcrError::Detection(format!("detector request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|e| OcrError::Detection(format!("failed to read detector response: {}", e)))?;

        if !status.is_success() {
            let snippet: String = body.chars().take(200).collect();
            return Err(OcrError::Detection(format!(
                "detector returned {}: {}",
                status, snippet
            )));
        }

        let detections = parse_response(&body)?;
        debug!("Detector returned {} boxes", detections.len());
        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    use super::*;
    use pretty_assertions::assert_eq;

    fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack.windows(needle.len()).position(|w| w == needle)
    }

    /// Read one HTTP request: headers plus a sized or chunked body.
    fn read_request(stream: &mut TcpStream) -> Vec<u8> {
        let mut data = Vec::new();
        let mut buf = [0u8; 8192];
        loop {
            let n = stream.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);

            let Some(end) = find(&data, b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&data[..end]).to_ascii_lowercase();
            let content_length = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok());
            match content_length {
                Some(len) if data.len() - end - 4 >= len => break,
                None if data.ends_with(b"0\r\n\r\n") => break,
                _ => {}
            }
        }
        data
    }

    /// Answer a single request on an ephemeral port; the handle yields the raw request.
    fn serve_once(
        status: &'static str,
        body: &'static str,
    ) -> (String, thread::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/predict", listener.local_addr().unwrap());

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let request = read_request(&mut stream);
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).unwrap();
            request
        });

        (url, handle)
    }

    /// Value of a text part in a multipart body.
    fn form_field<'a>(body: &'a str, name: &str) -> Option<&'a str> {
        let start = body.find(&format!("name=\"{}\"", name))?;
        let value_start = start + body[start..].find("\r\n\r\n")? + 4;
        let value_end = value_start + body[value_start..].find("\r\n")?;
        Some(&body[value_start..value_end])
    }

    #[test]
    fn test_detect_sends_form_and_parses_boxes() {
        let (url, server) = serve_once(
            "200 OK",
            r#"{"images": [{"results": [{"class": 1, "confidence": 0.8,
                "box": {"x1": 2.0, "y1": 3.0, "x2": 20.0, "y2": 12.0}}]}]}"#,
        );
        let dir = tempfile::tempdir().unwrap();
        let detector = HubDetector::new(
            url,
            "secret",
            "https://hub.example/models/abc",
            Duration::from_secs(5),
        )
        .unwrap()
        .with_image_size(320)
        .with_thresholds(0.3, 0.5)
        .with_temp_dir(dir.path());

        let dets = detector.detect(&RgbImage::new(32, 16)).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].field_name(), "v2");
        assert_eq!(dets[0].bbox, BoundingBox::new(2.0, 3.0, 20.0, 12.0));

        let request = server.join().unwrap();
        let text = String::from_utf8_lossy(&request);
        assert!(text.starts_with("POST /predict"));
        assert!(text.to_ascii_lowercase().contains("x-api-key: secret\r\n"));
        assert_eq!(form_field(&text, "model"), Some("https://hub.example/models/abc"));
        assert_eq!(form_field(&text, "imgsz"), Some("320"));
        assert_eq!(form_field(&text, "conf"), Some("0.3"));
        assert_eq!(form_field(&text, "iou"), Some("0.5"));
        assert!(text.contains("name=\"file\"; filename=\"meter-upload-"));

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_error_status_removes_upload() {
        let (url, server) = serve_once("401 Unauthorized", r#"{"message": "Invalid API key"}"#);
        let dir = tempfile::tempdir().unwrap();
        let detector = HubDetector::new(url, "wrong", "model", Duration::from_secs(5))
            .unwrap()
            .with_temp_dir(dir.path());

        let err = detector.detect(&RgbImage::new(16, 16)).unwrap_err();
        match err {
            OcrError::Detection(msg) => {
                assert!(msg.contains("401"), "{msg}");
                assert!(msg.contains("Invalid API key"), "{msg}");
            }
            other => panic!("expected detection error, got {other:?}"),
        }

        server.join().unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_from_config_requires_model() {
        let mut config = DetectorConfig::default();
        config.hub.api_key = "secret".into();
        assert!(HubDetector::from_config(&config).is_ok());

        config.hub.model_url = String::new();
        assert!(matches!(
            HubDetector::from_config(&config),
            Err(OcrError::ModelLoad(ref m)) if m.contains("model_url")
        ));
    }

    #[test]
    fn test_parse_response() {
        let body = r#"{
            "images": [{
                "results": [
                    {"class": 0, "name": "v1", "confidence": 0.91,
                     "box": {"x1": 10.0, "y1": 10.0, "x2": 50.0, "y2": 30.0}},
                    {"class": 3, "name": "v4", "confidence": 0.55,
                     "box": {"x1": 60.5, "y1": 12.0, "x2": 80.0, "y2": 31.0}}
                ],
                "shape": [480, 640]
            }],
            "metadata": {"model": "fields"}
        }"#;

        let dets = parse_response(body).unwrap();
        assert_eq!(dets.len(), 2);
        assert_eq!(dets[0].field_name(), "v1");
        assert_eq!(dets[0].bbox, BoundingBox::new(10.0, 10.0, 50.0, 30.0));
        assert_eq!(dets[1].class_index, 3);
    }

    #[test]
    fn test_parse_empty_results() {
        let dets = parse_response(r#"{"images": [{"results": []}]}"#).unwrap();
        assert!(dets.is_empty());
    }

    #[test]
    fn test_parse_malformed() {
        for body in [
            "not json",
            r#"{"images": []}"#,
            r#"{"images": [{}]}"#,
            r#"{"message": "Invalid API key"}"#,
            r#"{"images": [{"results": [{"class": -1, "confidence": 0.5,
                "box": {"x1": 0, "y1": 0, "x2": 1, "y2": 1}}]}]}"#,
            r#"{"images": [{"results": [{"class": 0, "confidence": 0.5,
                "box": {"x1": 9, "y1": 0, "x2": 1, "y2": 1}}]}]}"#,
        ] {
            assert!(
                matches!(parse_response(body), Err(OcrError::Detection(_))),
                "{body}"
            );
        }
    }

    #[test]
    fn test_failed_request_removes_upload() {
        let dir = tempfile::tempdir().unwrap();
        let detector = HubDetector::new(
            "http://127.0.0.1:1/predict",
            "key",
            "model",
            Duration::from_secs(2),
        )
        .unwrap()
        .with_temp_dir(dir.path());

        let err = detector.detect(&RgbImage::new(16, 16)).unwrap_err();
        assert!(matches!(err, OcrError::Detection(_)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_upload_files_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let detector = HubDetector::new("http://127.0.0.1:1", "k", "m", Duration::from_secs(1))
            .unwrap()
            .with_temp_dir(dir.path());

        let image = RgbImage::new(8, 8);
        let a = detector.write_upload(&image).unwrap();
        let b = detector.write_upload(&image).unwrap();
        assert_ne!(a.path(), b.path());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);

        drop(a);
        drop(b);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
