//! # Config Loader
//!
//! Settings loading and parsing.
//!
//! Responsibilities:
//! - Parse TOML/JSON settings files
//! - Validate settings legality
//! - Produce `SdkSettings`
//!
//! # Example
//!
//! ```no_run
//! use config_loader::ConfigLoader;
//! use std::path::Path;
//!
//! let settings = ConfigLoader::load_from_path(Path::new("settings.toml")).unwrap();
//! println!("Dispatchers: {}", settings.dispatchers.len());
//! ```

mod parser;
mod validator;

pub use contracts::SdkSettings;
pub use parser::ConfigFormat;

use contracts::CoreError;
use std::path::Path;

/// Settings loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load settings from a file path
    ///
    /// Format is detected from the extension (.toml / .json).
    ///
    /// # Errors
    /// - File read failure
    /// - Unsupported format
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_path(path: &Path) -> Result<SdkSettings, CoreError> {
        let format = Self::detect_format(path)?;
        let content = std::fs::read_to_string(path)?;
        Self::load_from_str(&content, format)
    }

    /// Load settings from a string
    pub fn load_from_str(content: &str, format: ConfigFormat) -> Result<SdkSettings, CoreError> {
        let settings = parser::parse(content, format)?;
        validator::validate(&settings)?;
        Ok(settings)
    }

    /// Validate already-built settings
    pub fn validate(settings: &SdkSettings) -> Result<(), CoreError> {
        validator::validate(settings)
    }

    pub fn to_toml(settings: &SdkSettings) -> Result<String, CoreError> {
        toml::to_string_pretty(settings)
            .map_err(|e| CoreError::config_parse(format!("TOML serialize error: {e}")))
    }

    pub fn to_json(settings: &SdkSettings) -> Result<String, CoreError> {
        serde_json::to_string_pretty(settings)
            .map_err(|e| CoreError::config_parse(format!("JSON serialize error: {e}")))
    }

    fn detect_format(path: &Path) -> Result<ConfigFormat, CoreError> {
        let ext = path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
            CoreError::config_parse("cannot determine file format from extension")
        })?;

        ConfigFormat::from_extension(ext)
            .ok_or_else(|| CoreError::config_parse(format!("unsupported config format: .{ext}")))
    }
}
