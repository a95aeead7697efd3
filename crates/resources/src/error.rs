//! Error types for resource loading.

use std::path::PathBuf;
use thiserror::Error;

/// Error type for resource loading operations.
#[derive(Error, Debug)]
pub enum ResourceError {
    /// IO error during file operations.
    #[error("IO error reading '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file exists but could not be decoded as an image.
    #[error("Image error in '{path}': {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// File not found.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// Shader bytecode is not a SPIR-V module.
    #[error("Invalid SPIR-V in '{path}': {reason}")]
    InvalidSpirv { path: PathBuf, reason: String },
}

/// Result type alias for resource operations.
pub type ResourceResult<T> = Result<T, ResourceError>;
