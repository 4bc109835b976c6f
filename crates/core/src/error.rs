//! Error types for the core domain

use thiserror::Error;

/// Core domain errors
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Relationship '{name}' ({from} -> {to}) references unknown node '{missing}'")]
    DanglingRelationship {
        name: String,
        from: String,
        to: String,
        missing: String,
    },

    #[error("Invalid tiling parameters: {0}")]
    InvalidTiling(String),

    #[error("Invalid image data: {0}")]
    ImageDecode(String),

    #[error("Failed to encode image section: {0}")]
    ImageEncode(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
