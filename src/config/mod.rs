use std::env;
use std::path::PathBuf;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    pub export: ExportConfig,
    pub logging: LoggingConfig,
}

/// Thought store configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root directory holding the partitioned session layout.
    pub root: PathBuf,
}

/// Export configuration for closed-session snapshots
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Directory linked exports are written to when a session closes.
    pub dir: PathBuf,
    /// Whether a terminal append triggers an automatic export.
    pub auto_export: bool,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let storage = StorageConfig {
            root: PathBuf::from(
                env::var("THOUGHT_STORE_ROOT").unwrap_or_else(|_| "./data/thoughts".to_string()),
            ),
        };

        let export = ExportConfig {
            dir: PathBuf::from(
                env::var("EXPORT_DIR").unwrap_or_else(|_| "./data/exports".to_string()),
            ),
            auto_export: env::var("AUTO_EXPORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(true),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        Ok(Config {
            storage,
            export,
            logging,
        })
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./data/exports"),
            auto_export: true,
        }
    }
}
