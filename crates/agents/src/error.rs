//! Agent error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Database error: {0}")]
    Database(#[from] flowgraph_db::DbError),

    #[error(transparent)]
    Core(#[from] flowgraph_core::CoreError),

    #[error("Oracle error: {0}")]
    Oracle(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("The oracle returned no answer")]
    NoAnswer,

    #[error("Graph repair failed after {attempts} attempts: {last_error}")]
    RepairFailed { attempts: u32, last_error: String },

    #[error("Processing error: {0}")]
    Processing(String),
}

pub type Result<T> = std::result::Result<T, AgentError>;
