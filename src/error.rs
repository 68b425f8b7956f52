//! Atlas builder error types

use thiserror::Error;

/// Errors surfaced by an atlas build or the worker protocol
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AtlasError {
    /// Font could not be fetched or parsed (shared by every waiter of that font)
    #[error("Failed to resolve font {url}: {reason}")]
    FontResolution { url: String, reason: String },

    /// Packing needed an atlas beyond the configured maximum
    #[error("Atlas too large: {width}x{height} exceeds maximum side {max}")]
    AtlasTooLarge { width: u32, height: u32, max: u32 },

    /// Bitmap engine failure; the arena must be reset before reuse
    #[error("Bitmap engine error: {0}")]
    BitmapEngine(String),

    /// Font identifier string failed validation
    #[error("Malformed font identifier: {0}")]
    MalformedFontIdentifier(String),

    /// Request named an operation the worker does not provide
    #[error("No such function: {0}")]
    UnknownOperation(String),

    /// Request arguments did not match the operation
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
}

/// Result type for atlas operations
pub type Result<T> = std::result::Result<T, AtlasError>;
