//! Configuration error types.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating a platform configuration.
///
/// All of these are fatal: a simulation never starts from a partially
/// valid configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration `{0}`")]
    InvalidDuration(String),

    #[error("unknown time unit `{0}`")]
    UnknownUnit(String),

    #[error("invalid {entity} `{name}`: {reason}")]
    Invalid {
        entity: &'static str,
        name: String,
        reason: String,
    },

    #[error("duplicate {entity} `{name}`")]
    Duplicate { entity: &'static str, name: String },

    #[error("service `{service}` has no {phase} duration and there is no `default` service profile")]
    MissingTiming {
        service: String,
        phase: &'static str,
    },

    #[error("no node types configured")]
    NoNodeTypes,

    #[error("unknown {kind} strategy `{name}`")]
    UnknownStrategy { kind: &'static str, name: String },
}
