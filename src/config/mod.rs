//! Configuration Module
//!
//! Deploy options, auth file lookup and private key discovery.

pub mod options;

pub use options::{
    DeployOptions, DeploySettings, KeyOption, OneOrMany, ResolvedOptions, DEFAULT_AUTH_FILE,
    DEFAULT_KEY_LOCATIONS,
};

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required option: host")]
    MissingHost,

    #[error("Could not find auth key '{key}' in {file}")]
    AuthKeyNotFound { key: String, file: String },

    #[error("Private key not found, searched: {searched}")]
    KeyNotFound { searched: String },

    #[error("Concurrency must be at least 1")]
    InvalidConcurrency,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
