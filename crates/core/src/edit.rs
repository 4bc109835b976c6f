//! Manual graph edit operations

use crate::{CoreError, Result};
use serde::{Deserialize, Serialize};

/// An explicit node mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum NodeEdit {
    /// Create a node (no-op if it already exists)
    CreateNode { name: String },
    /// Delete a node and every relationship touching it
    DeleteNode { name: String },
    /// Rename a node in place, keeping its attributes and relationships
    RenameNode { from: String, to: String },
}

impl NodeEdit {
    /// Convert the editor's `(oldName, newName)` pair into an operation.
    ///
    /// An empty `old` means create, an empty `new` means delete, anything
    /// else is a rename. Both empty is rejected.
    pub fn from_names(old: &str, new: &str) -> Result<Self> {
        match (old.is_empty(), new.is_empty()) {
            (true, true) => Err(CoreError::Validation(
                "node edit needs at least one of oldName/newName".into(),
            )),
            (true, false) => Ok(Self::CreateNode { name: new.into() }),
            (false, true) => Ok(Self::DeleteNode { name: old.into() }),
            (false, false) => Ok(Self::RenameNode {
                from: old.into(),
                to: new.into(),
            }),
        }
    }
}

/// An edge addressed by its identity triple
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRef {
    pub from: String,
    pub to: String,
    pub label: String,
}

impl EdgeRef {
    pub fn new(from: impl Into<String>, to: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            label: label.into(),
        }
    }
}

/// A batch of edits, applied as: deleted edges, added edges, node edits
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdits {
    #[serde(default)]
    pub deleted_edges: Vec<EdgeRef>,
    #[serde(default)]
    pub added_edges: Vec<EdgeRef>,
    #[serde(default)]
    pub node_edits: Vec<NodeEdit>,
}

impl GraphEdits {
    pub fn is_empty(&self) -> bool {
        self.deleted_edges.is_empty() && self.added_edges.is_empty() && self.node_edits.is_empty()
    }
}

/// `(oldName, newName)` pair as sent by the graph editor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRename {
    #[serde(default)]
    pub old_name: String,
    #[serde(default)]
    pub new_name: String,
}

/// Edit request wire form
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditRequest {
    #[serde(default)]
    pub edited_nodes: Vec<NodeRename>,
    #[serde(default)]
    pub deleted_edges: Vec<EdgeRef>,
    #[serde(default)]
    pub added_edges: Vec<EdgeRef>,
}

impl TryFrom<EditRequest> for GraphEdits {
    type Error = CoreError;

    fn try_from(request: EditRequest) -> Result<Self> {
        let node_edits = request
            .edited_nodes
            .iter()
            .map(|n| NodeEdit::from_names(&n.old_name, &n.new_name))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            deleted_edges: request.deleted_edges,
            added_edges: request.added_edges,
            node_edits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_names() {
        assert_eq!(
            NodeEdit::from_names("", "Start").unwrap(),
            NodeEdit::CreateNode { name: "Start".into() }
        );
        assert_eq!(
            NodeEdit::from_names("Start", "").unwrap(),
            NodeEdit::DeleteNode { name: "Start".into() }
        );
        assert_eq!(
            NodeEdit::from_names("Start", "Begin").unwrap(),
            NodeEdit::RenameNode {
                from: "Start".into(),
                to: "Begin".into()
            }
        );
        assert!(NodeEdit::from_names("", "").is_err());
    }

    #[test]
    fn test_edit_request_conversion() {
        let request: EditRequest = serde_json::from_str(
            r#"{
                "editedNodes": [{"oldName": "", "newName": "Start"}],
                "deletedEdges": [{"from": "A", "to": "B", "label": "old"}],
                "addedEdges": [{"from": "A", "to": "B", "label": "new"}]
            }"#,
        )
        .unwrap();

        let edits = GraphEdits::try_from(request).unwrap();
        assert_eq!(edits.deleted_edges, vec![EdgeRef::new("A", "B", "old")]);
        assert_eq!(edits.added_edges, vec![EdgeRef::new("A", "B", "new")]);
        assert_eq!(
            edits.node_edits,
            vec![NodeEdit::CreateNode { name: "Start".into() }]
        );
    }

    #[test]
    fn test_edit_request_missing_lists_default_to_empty() {
        let request: EditRequest = serde_json::from_str("{}").unwrap();
        let edits = GraphEdits::try_from(request).unwrap();
        assert!(edits.is_empty());
    }

    #[test]
    fn test_tagged_serialization() {
        let json = serde_json::to_value(NodeEdit::RenameNode {
            from: "A".into(),
            to: "B".into(),
        })
        .unwrap();
        assert_eq!(json["op"], "rename_node");
        assert_eq!(json["from"], "A");
    }
}
