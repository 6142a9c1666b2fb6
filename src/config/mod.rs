use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::utils::validation::{ALLOWED_MIME_TYPES, MAX_FILE_SIZE};

/// Configuration for file intake and the analysis pipeline
#[derive(Debug, Clone)]
pub struct IntakeConfig {
    /// Maximum file size in bytes (default: 10 MB)
    pub max_file_size: usize,

    /// MIME types accepted at intake
    pub allowed_mime_types: Vec<String>,

    /// Check the payload's magic bytes against the declared type (default: true)
    pub verify_signature: bool,

    /// Downscale previews to this many pixels on the longest side.
    /// `None` keeps the original payload as the preview.
    pub preview_max_dimension: Option<u32>,

    /// Analysis service type: "http" or "disabled" (default: "http")
    pub analysis_service_type: String,

    /// Base URL of the analysis backend (default: "http://localhost:8000")
    pub analysis_base_url: String,

    /// Per-request timeout for the analysis backend in seconds (default: 60)
    pub request_timeout_secs: u64,

    /// Pause between sequential calls of a batch in milliseconds (default: 0)
    pub batch_delay_ms: u64,

    /// Recorder type: "tracing" or "jsonl" (default: "tracing")
    pub recorder_type: String,

    /// History file used by the jsonl recorder
    pub history_path: PathBuf,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            max_file_size: MAX_FILE_SIZE,
            allowed_mime_types: ALLOWED_MIME_TYPES.iter().map(|m| m.to_string()).collect(),
            verify_signature: true,
            preview_max_dimension: None,
            analysis_service_type: "http".to_string(),
            analysis_base_url: "http://localhost:8000".to_string(),
            request_timeout_secs: 60,
            batch_delay_ms: 0,
            recorder_type: "tracing".to_string(),
            history_path: PathBuf::from("screening-history.jsonl"),
        }
    }
}

impl IntakeConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            max_file_size: env::var("MAX_FILE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_file_size),

            allowed_mime_types: env::var("ALLOWED_MIME_TYPES")
                .ok()
                .map(|v| parse_list(&v))
                .filter(|list| !list.is_empty())
                .unwrap_or(default.allowed_mime_types),

            verify_signature: env::var("VERIFY_SIGNATURE")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(default.verify_signature),

            preview_max_dimension: env::var("PREVIEW_MAX_DIMENSION")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|&d: &u32| d > 0)
                .or(default.preview_max_dimension),

            analysis_service_type: env::var("ANALYSIS_SERVICE")
                .unwrap_or(default.analysis_service_type),

            analysis_base_url: env::var("ANALYSIS_BASE_URL").unwrap_or(default.analysis_base_url),

            request_timeout_secs: env::var("REQUEST_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.request_timeout_secs),

            batch_delay_ms: env::var("BATCH_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.batch_delay_ms),

            recorder_type: env::var("RECORDER").unwrap_or(default.recorder_type),

            history_path: env::var("HISTORY_PATH")
                .map(PathBuf::from)
                .unwrap_or(default.history_path),
        }
    }

    /// Create config for development (no signature checks, local backend)
    pub fn development() -> Self {
        Self {
            verify_signature: false,
            analysis_base_url: "http://127.0.0.1:8000".to_string(),
            request_timeout_secs: 120,
            ..Self::default()
        }
    }

    /// Create config for production (strict checks, thumbnail previews, persisted history)
    pub fn production() -> Self {
        Self {
            verify_signature: true,
            preview_max_dimension: Some(512),
            analysis_base_url: env::var("ANALYSIS_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8000".to_string()),
            request_timeout_secs: 30,
            batch_delay_ms: 250,
            recorder_type: "jsonl".to_string(),
            ..Self::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = IntakeConfig::default();
        assert_eq!(config.max_file_size, 10 * 1024 * 1024);
        assert!(config.verify_signature);
        assert_eq!(config.analysis_service_type, "http");
        assert_eq!(config.batch_delay(), Duration::ZERO);
        assert!(config.allowed_mime_types.iter().any(|m| m == "image/webp"));
    }

    #[test]
    fn test_development_config() {
        let config = IntakeConfig::development();
        assert!(!config.verify_signature);
        assert_eq!(config.recorder_type, "tracing");
    }

    #[test]
    fn test_production_config() {
        let config = IntakeConfig::production();
        assert!(config.verify_signature);
        assert_eq!(config.preview_max_dimension, Some(512));
        assert_eq!(config.recorder_type, "jsonl");
        assert_eq!(config.batch_delay(), Duration::from_millis(250));
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(
            parse_list(" image/PNG, ,image/jpeg "),
            vec!["image/png".to_string(), "image/jpeg".to_string()]
        );
    }
}
