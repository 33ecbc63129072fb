//! # Config Loader
//!
//! Configuration loading and parsing module.
//!
//! Responsibilities:
//! - Parse TOML/JSON configuration files
//! - Validate configuration legality
//! - Generate `RunConfig`
//!
//! # Example
//!
//! ```no_run
//! use config_loader::ConfigLoader;
//! use std::path::Path;
//!
//! let config = ConfigLoader::load_from_path(Path::new("autoflush.toml")).unwrap();
//! println!("max_len: {}", config.buffer.max_len);
//! ```

mod parser;
mod validator;

pub use contracts::RunConfig;
pub use parser::ConfigFormat;

use contracts::AutoflushError;
use std::path::Path;

/// Configuration loader
///
/// Provides static methods to load configuration from files or strings.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file path
    ///
    /// Automatically detects format from file extension (.toml / .json).
    ///
    /// # Errors
    /// - File read failure
    /// - Unsupported format
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_path(path: &Path) -> Result<RunConfig, AutoflushError> {
        let format = Self::detect_format(path)?;
        let content = std::fs::read_to_string(path)?;
        Self::load_from_str(&content, format)
    }

    /// Load configuration from string
    pub fn load_from_str(content: &str, format: ConfigFormat) -> Result<RunConfig, AutoflushError> {
        let config = parser::parse(content, format)?;
        validator::validate(&config)?;
        Ok(config)
    }

    /// Serialize RunConfig to TOML string
    pub fn to_toml(config: &RunConfig) -> Result<String, AutoflushError> {
        toml::to_string_pretty(config)
            .map_err(|e| AutoflushError::config_parse(format!("TOML serialize error: {e}")))
    }

    /// Serialize RunConfig to JSON string
    pub fn to_json(config: &RunConfig) -> Result<String, AutoflushError> {
        serde_json::to_string_pretty(config)
            .map_err(|e| AutoflushError::config_parse(format!("JSON serialize error: {e}")))
    }

    /// Infer configuration format from file extension
    fn detect_format(path: &Path) -> Result<ConfigFormat, AutoflushError> {
        let ext = path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
            AutoflushError::config_parse("cannot determine file format from extension")
        })?;

        ConfigFormat::from_extension(ext).ok_or_else(|| {
            AutoflushError::config_parse(format!("unsupported config format: .{ext}"))
        })
    }
}
