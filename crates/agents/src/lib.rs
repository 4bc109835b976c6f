//! AI Agents for Flowgraph
//!
//! This crate contains the oracle client and the agent implementations:
//! - Librarian: Tiles images and merges extracted fragments
//! - Gardener: Deduplicates and repairs the accumulated graph
//! - Search: Selects relevant context and answers questions
//! - Editor: Applies manual edits

pub mod config;
pub mod editor;
pub mod error;
pub mod gardener;
pub mod inference;
pub mod librarian;
pub mod oracle;
pub mod prompts;
pub mod search;

pub use config::{OracleConfig, OracleProvider, PipelineConfig, RetryPolicy};
pub use editor::EditorAgent;
pub use error::{AgentError, Result};
pub use gardener::GardenerAgent;
pub use inference::ChatClient;
pub use librarian::{IngestOutcome, IngestReport, LibrarianAgent, SectionFailure, SectionJob};
pub use oracle::{ContentPart, ExtractionOracle, OracleMessage, OracleRole};
pub use prompts::Prompts;
pub use search::{QueryAnswer, SearchAgent};
