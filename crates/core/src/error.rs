//! Error types for configuration and startup.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised before the GPU is involved.
#[derive(Error, Debug)]
pub enum Error {
    /// The configuration file could not be read.
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML or has mistyped fields.
    #[error("invalid config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A configuration value is out of range.
    #[error("config error: {0}")]
    Config(String),

    /// The OS window could not be created or queried.
    #[error("window error: {0}")]
    Window(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using the core [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
