//! CLI commands.

pub mod config;
pub mod extract;
pub mod serve;

use std::path::{Path, PathBuf};

use meter_core::MeterConfig;

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("meter-ocr")
        .join("config.json")
}

/// Path named with `--config`, or the per-user default.
pub fn config_path(explicit: Option<&str>) -> PathBuf {
    explicit.map(PathBuf::from).unwrap_or_else(default_config_path)
}

/// Load the configuration, falling back to defaults when no file exists.
///
/// An explicitly named file must exist.
pub fn load_config(explicit: Option<&str>) -> anyhow::Result<MeterConfig> {
    if let Some(path) = explicit {
        let path = Path::new(path);
        if !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        return Ok(MeterConfig::from_file(path)?);
    }

    let path = default_config_path();
    if path.exists() {
        Ok(MeterConfig::from_file(&path)?)
    } else {
        Ok(MeterConfig::default())
    }
}
