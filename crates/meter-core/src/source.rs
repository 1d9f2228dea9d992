//! Image acquisition from a local path or an `http(s)` URL.

use std::path::Path;
use std::time::Duration;

use image::{DynamicImage, ImageReader, RgbImage};
use reqwest::blocking::Client;
use tracing::{debug, error, info};

use crate::error::{MeterError, Result};
use crate::models::config::FetchConfig;

/// Loads meter photos and normalizes them to RGB.
pub struct ImageLoader {
    client: Client,
}

impl ImageLoader {
    /// Create a loader whose remote fetches time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MeterError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn from_config(config: &FetchConfig) -> Result<Self> {
        Self::new(Duration::from_secs(config.timeout_secs))
    }

    /// Resolve `image_url` to an RGB image.
    ///
    /// Existing local files win over URL interpretation. Anything else must
    /// be an `http://` or `https://` URL.
    pub fn load(&self, image_url: &str) -> Result<RgbImage> {
        let image_url = image_url.trim();
        if image_url.is_empty() {
            return Err(MeterError::InvalidInput("Image URL is required".to_string()));
        }

        let path = Path::new(image_url);
        let image = if path.is_file() {
            info!("Processing local file: {}", path.display());
            let reader = ImageReader::open(path)?
                .with_guessed_format()
                .map_err(MeterError::Io)?;
            reader.decode().map_err(|e| {
                MeterError::InvalidInput(format!("{} is not a readable image: {}", path.display(), e))
            })?
        } else if is_http_url(image_url) {
            self.fetch(image_url)?
        } else {
            return Err(MeterError::InvalidInput("Invalid URL or file path".to_string()));
        };

        Ok(to_rgb(image))
    }

    fn fetch(&self, url: &str) -> Result<DynamicImage> {
        info!("Fetching image from URL: {}", url);

        let response = self.client.get(url).send().map_err(|e| {
            error!("Failed to fetch image from {}: {}", url, e);
            MeterError::Fetch {
                url: url.to_string(),
                reason: e.to_string(),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            error!("Failed to fetch image from {}. Status code: {}", url, status);
            return Err(MeterError::Fetch {
                url: url.to_string(),
                reason: format!("status {}", status),
            });
        }

        let bytes = response.bytes().map_err(|e| MeterError::Fetch {
            url: url.to_string(),
            reason: format!("failed to read body: {}", e),
        })?;
        debug!("Fetched {} bytes from {}", bytes.len(), url);

        image::load_from_memory(&bytes)
            .map_err(|e| MeterError::InvalidInput(format!("{} is not a readable image: {}", url, e)))
    }
}

/// True for strings starting with `http://` or `https://`.
pub fn is_http_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Convert any colour mode to 8-bit RGB.
pub fn to_rgb(image: DynamicImage) -> RgbImage {
    let color = image.color();
    info!("Image size: {}x{}, mode: {:?}", image.width(), image.height(), color);

    match image {
        DynamicImage::ImageRgb8(rgb) => rgb,
        other => {
            debug!("Converting {:?} to RGB", color);
            other.to_rgb8()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgba, RgbaImage};

    fn loader() -> ImageLoader {
        ImageLoader::new(Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn test_empty_input() {
        let err = loader().load("   ").unwrap_err();
        assert!(matches!(err, MeterError::InvalidInput(ref m) if m == "Image URL is required"));
    }

    #[test]
    fn test_not_a_url() {
        for input in ["ftp://host/meter.jpg", "/definitely/not/here.jpg", "meter.jpg"] {
            let err = loader().load(input).unwrap_err();
            assert!(matches!(err, MeterError::InvalidInput(_)), "{input}");
            assert!(err.is_client_error());
        }
    }

    #[test]
    fn test_local_grayscale_is_converted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gray.png");
        GrayImage::from_pixel(12, 8, Luma([200])).save(&path).unwrap();

        let rgb = loader().load(path.to_str().unwrap()).unwrap();
        assert_eq!(rgb.dimensions(), (12, 8));
        assert_eq!(rgb.get_pixel(0, 0).0, [200, 200, 200]);
    }

    #[test]
    fn test_local_rgba_is_converted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alpha.png");
        RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 128])).save(&path).unwrap();

        let rgb = loader().load(path.to_str().unwrap()).unwrap();
        assert_eq!(rgb.get_pixel(3, 3).0, [10, 20, 30]);
    }

    #[test]
    fn test_local_file_that_is_not_an_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "not an image").unwrap();

        let err = loader().load(path.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, MeterError::InvalidInput(_)));
    }

    #[test]
    fn test_unreachable_url_is_fetch_error() {
        let err = loader().load("http://127.0.0.1:1/meter.jpg").unwrap_err();
        match err {
            MeterError::Fetch { url, .. } => assert_eq!(url, "http://127.0.0.1:1/meter.jpg"),
            other => panic!("expected fetch error, got {other:?}"),
        }
    }
}
