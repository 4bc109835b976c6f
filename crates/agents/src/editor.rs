//! Editor Agent - Applies manual graph edits

use crate::Result;
use flowgraph_core::{GraphEdits, Graph, NodeEdit, USER_EDITED_SOURCE};
use flowgraph_db::Repository;
use tracing::{debug, info, instrument};

/// The Editor agent applies user mutations directly to the store
pub struct EditorAgent {
    repo: Repository,
}

impl EditorAgent {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// Apply deleted edges, then added edges, then node edits, and return
    /// the refreshed full graph.
    ///
    /// Edits run one at a time; an error stops the batch and leaves the
    /// edits before it applied.
    #[instrument(skip(self, edits), fields(
        deleted_edges = edits.deleted_edges.len(),
        added_edges = edits.added_edges.len(),
        node_edits = edits.node_edits.len()
    ))]
    pub async fn apply(&self, edits: &GraphEdits) -> Result<Graph> {
        for edge in &edits.deleted_edges {
            debug!(from = %edge.from, to = %edge.to, label = %edge.label, "Deleting edge");
            self.repo
                .delete_relationship(&edge.from, &edge.to, &edge.label)
                .await?;
        }

        for edge in &edits.added_edges {
            debug!(from = %edge.from, to = %edge.to, label = %edge.label, "Adding edge");
            self.repo
                .create_relationship(&edge.from, &edge.to, &edge.label, USER_EDITED_SOURCE)
                .await?;
        }

        for edit in &edits.node_edits {
            debug!(?edit, "Applying node edit");
            match edit {
                NodeEdit::CreateNode { name } => {
                    self.repo.create_node(name, USER_EDITED_SOURCE).await?
                }
                NodeEdit::DeleteNode { name } => self.repo.delete_node(name).await?,
                NodeEdit::RenameNode { from, to } => self.repo.rename_node(from, to).await?,
            }
        }

        let graph = self.repo.full_graph().await?;
        info!(
            nodes = graph.nodes.len(),
            relationships = graph.relationships.len(),
            "Applied graph edits"
        );
        Ok(graph)
    }
}
