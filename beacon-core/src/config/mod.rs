//! Frontend configuration: YAML schema, loading and validation.

pub mod duration_format;
mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ValidationResult, ValidationWarning};
pub use loader::{
    CONFIG_ENV_VAR, default_config_paths, find_config_file, load_and_validate, load_config,
    substitute_env_vars, validate,
};
pub use schema::{
    AdminConfig, AutocertConfig, Config, LimitsConfig, ListenConfig, StaticTlsConfig,
    TimingConfig, TlsConfig,
};
