//! Configuration loading and validation.
//!
//! Loading flow: locate file → read → `${VAR}` substitution → YAML parse →
//! semantic validation.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use super::error::{ConfigError, ValidationResult, ValidationWarning};
use super::schema::{Config, TlsConfig};

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "BEACON_CONFIG";

/// Configuration file search paths (in priority order), after the CLI flag.
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        paths.push(PathBuf::from(path));
    }

    paths.push(PathBuf::from("/etc/beacon/frontend.yaml"));
    paths.push(PathBuf::from("./frontend.yaml"));

    paths
}

/// Find the first existing config file from the search paths.
///
/// # Errors
///
/// Returns [`ConfigError::ConfigFileNotFound`] listing every path tried.
pub fn find_config_file(explicit_path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit_path {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(ConfigError::ConfigFileNotFound {
            searched: vec![path.to_path_buf()],
        });
    }

    let paths = default_config_paths();
    for path in &paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    Err(ConfigError::ConfigFileNotFound { searched: paths })
}

/// Load configuration from a file path.
///
/// # Errors
///
/// Returns an error if the file is unreadable, empty, references an unset
/// environment variable, or is not valid YAML for [`Config`].
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;

    if contents.trim().is_empty() {
        return Err(ConfigError::EmptyConfigFile);
    }

    let contents = substitute_env_vars(&contents)?;
    let config: Config = serde_saphyr::from_str(&contents)?;

    Ok(config)
}

/// Load and validate configuration.
///
/// # Errors
///
/// Returns the first loading or validation error.
pub fn load_and_validate(path: &Path) -> Result<(Config, ValidationResult), ConfigError> {
    let config = load_config(path)?;
    let result = validate(&config)?;
    Ok((config, result))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Environment Variable Substitution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

// SAFETY: .expect() on LazyLock with a compile-time literal regex pattern,
// covered by test_env_var_pattern_compiles().
static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
        .expect("BUG: ENV_VAR_PATTERN regex is invalid")
});

/// Substitute environment variables in a string.
///
/// # Syntax
/// - `${VAR}` - Required, fail if not set
/// - `${VAR:-default}` - Optional with default
///
/// # Errors
///
/// Returns [`ConfigError::MissingEnvVar`] for the first required variable
/// that is unset.
pub fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
    let mut missing = None;

    let result = ENV_VAR_PATTERN.replace_all(content, |cap: &regex::Captures<'_>| {
        let var_name = &cap[1];
        match (std::env::var(var_name), cap.get(2)) {
            (Ok(value), _) => value,
            (Err(_), Some(default)) => default.as_str().to_string(),
            (Err(_), None) => {
                missing.get_or_insert_with(|| var_name.to_string());
                String::new()
            }
        }
    });

    if let Some(var) = missing {
        return Err(ConfigError::MissingEnvVar {
            var,
            field: "configuration".to_string(),
        });
    }

    Ok(result.into_owned())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Validate a configuration.
///
/// # Errors
///
/// Returns the first violated rule. Problems that still leave a working
/// frontend are reported as warnings in the returned [`ValidationResult`].
pub fn validate(config: &Config) -> Result<ValidationResult, ConfigError> {
    let mut warnings = Vec::new();

    let limits = &config.limits;
    require_positive("limits.max_upload_size", limits.max_upload_size)?;
    require_positive("limits.max_poll_body_size", limits.max_poll_body_size)?;
    require_positive("limits.upload_burst", limits.upload_burst)?;
    require_positive("limits.concurrency", limits.concurrency as u64)?;

    let timing = &config.timing;
    require_positive_duration("timing.max_poll", timing.max_poll)?;
    require_positive_duration("timing.post_padding_interval", timing.post_padding_interval)?;
    require_positive_duration(
        "timing.poll_keepalive_interval",
        timing.poll_keepalive_interval,
    )?;
    require_positive_duration("timing.shutdown_grace", timing.shutdown_grace)?;
    if timing.poll_keepalive_interval >= timing.max_poll + timing.poll_jitter {
        warnings.push(ValidationWarning::KeepaliveNeverFires);
    }

    match &config.tls {
        TlsConfig::Static(tls) => {
            require_file("tls.certificate", &tls.certificate)?;
            require_file("tls.private_key", &tls.private_key)?;
        }
        TlsConfig::Autocert(autocert) => {
            if autocert.hostnames.iter().all(|h| h.trim().is_empty()) {
                return Err(ConfigError::NoAutocertHostnames);
            }
            if config.listen.bind_port != 443 {
                warnings.push(ValidationWarning::AutocertPortIgnored {
                    bind_port: config.listen.bind_port,
                });
            }
        }
    }

    if let Some(url) = &config.redirect_url {
        validate_redirect_url(url)?;
    }

    if let Some(name) = &config.proxy_header
        && http::HeaderName::from_bytes(name.as_bytes()).is_err()
    {
        return Err(ConfigError::InvalidHeaderName { name: name.clone() });
    }

    Ok(ValidationResult::with_warnings(warnings))
}

fn require_positive(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::ZeroValue { field });
    }
    Ok(())
}

fn require_positive_duration(
    field: &'static str,
    value: std::time::Duration,
) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::ZeroValue { field });
    }
    Ok(())
}

fn require_file(field: &'static str, path: &Path) -> Result<(), ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::FileNotFound {
            field,
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

fn validate_redirect_url(url: &str) -> Result<(), ConfigError> {
    let invalid = |message: &str| ConfigError::InvalidUrl {
        url: url.to_string(),
        message: message.to_string(),
    };

    let uri: http::Uri = url.parse().map_err(|_| invalid("not a URI"))?;
    match uri.scheme_str() {
        Some("http" | "https") => {}
        _ => return Err(invalid("scheme must be http or https")),
    }
    if uri.host().is_none_or(str::is_empty) {
        return Err(invalid("missing host"));
    }
    Ok(())
}
