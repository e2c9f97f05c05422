//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    // ─────────────────────────────────────────────────────────────────────────
    // Value validation errors
    // ─────────────────────────────────────────────────────────────────────────
    /// A size, count or interval that must be positive is zero.
    #[error("'{field}' must be greater than zero")]
    ZeroValue { field: &'static str },

    /// Automatic certificate management needs at least one hostname.
    #[error("tls.hostnames must list at least one hostname when mode is autocert")]
    NoAutocertHostnames,

    /// Invalid URL format.
    #[error("invalid URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    /// A configured proxy header is not a valid HTTP header name.
    #[error("invalid proxy header name '{name}'")]
    InvalidHeaderName { name: String },

    /// A referenced file does not exist.
    #[error("{field} not found: {path}")]
    FileNotFound { field: &'static str, path: PathBuf },

    /// Required environment variable not set.
    #[error("environment variable '{var}' not set (required for field '{field}')")]
    MissingEnvVar { var: String, field: String },

    // ─────────────────────────────────────────────────────────────────────────
    // I/O and parsing errors
    // ─────────────────────────────────────────────────────────────────────────
    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    ParseError(#[from] serde_saphyr::Error),

    /// I/O error reading config file.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Config file not found at any search location.
    #[error("configuration file not found (searched: {searched:?})")]
    ConfigFileNotFound { searched: Vec<PathBuf> },

    /// Empty configuration file.
    #[error("configuration file is empty")]
    EmptyConfigFile,
}

/// Validation warnings (non-fatal).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationWarning {
    /// Autocert always serves on 443; a different `bind_port` is ignored.
    AutocertPortIgnored { bind_port: u16 },

    /// The poll keep-alive interval is not shorter than the longest poll
    /// deadline (`max_poll + poll_jitter`), so no keep-alive frame will ever
    /// be written.
    KeepaliveNeverFires,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AutocertPortIgnored { bind_port } => {
                write!(f, "autocert listens on port 443; bind_port {bind_port} is ignored")
            }
            Self::KeepaliveNeverFires => {
                write!(f, "poll_keepalive_interval is not shorter than max_poll + poll_jitter")
            }
        }
    }
}

/// Result of configuration validation.
#[derive(Debug)]
pub struct ValidationResult {
    /// Non-fatal warnings encountered during validation.
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    /// Create a new validation result with no warnings.
    pub fn ok() -> Self {
        Self {
            warnings: Vec::new(),
        }
    }

    /// Create a new validation result with warnings.
    pub fn with_warnings(warnings: Vec<ValidationWarning>) -> Self {
        Self { warnings }
    }

    /// Check if validation passed with no warnings.
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}
