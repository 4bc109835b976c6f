//! Core domain types for Flowgraph
//!
//! This crate defines the graph wire format shared by every layer
//! (nodes, relationships, graphs), the explicit edit operations users
//! apply by hand, conversation turns, and the image tiler that cuts
//! flowchart photos into overlapping sections.

pub mod graph;
pub mod edit;
pub mod conversation;
pub mod tiling;
pub mod error;

pub use graph::{Graph, Node, Relationship, StringSet, USER_EDITED_SOURCE};
pub use edit::{EdgeRef, EditRequest, GraphEdits, NodeEdit, NodeRename};
pub use conversation::{ConversationTurn, TurnRole};
pub use tiling::{BoundingBox, Section, TilingParams};
pub use error::{CoreError, Result};
