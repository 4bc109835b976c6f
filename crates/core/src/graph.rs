//! Graph types - nodes, relationships and the JSON wire format

use crate::{CoreError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

/// Provenance tag for facts created through manual edits
pub const USER_EDITED_SOURCE: &str = "User Edited";

/// Attribute sets (`context`, `imageSources`) are mathematical sets
pub type StringSet = BTreeSet<String>;

/// A flowchart node, identified by its name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,

    /// Free-text context accumulated over time
    #[serde(default, deserialize_with = "string_set")]
    pub context: StringSet,

    /// Source images that contributed to this node
    #[serde(default, rename = "imageSources", deserialize_with = "string_set")]
    pub image_sources: StringSet,
}

impl Node {
    /// Create a node with empty attributes
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            context: StringSet::new(),
            image_sources: StringSet::new(),
        }
    }

    /// Builder: add context entries
    pub fn with_context<I, S>(mut self, context: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.context.extend(context.into_iter().map(Into::into));
        self
    }

    /// Builder: add a provenance tag
    pub fn with_image_source(mut self, source: impl Into<String>) -> Self {
        self.image_sources.insert(source.into());
        self
    }

    /// Union another node's attributes into this one
    pub fn absorb(&mut self, other: Node) {
        self.context.extend(other.context);
        self.image_sources.extend(other.image_sources);
    }
}

/// A labelled, directed edge identified by `(from, to, name)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    /// Edge label
    #[serde(default)]
    pub name: String,

    pub from: String,

    pub to: String,

    #[serde(default, deserialize_with = "string_set")]
    pub context: StringSet,

    #[serde(default, rename = "imageSources", deserialize_with = "string_set")]
    pub image_sources: StringSet,
}

impl Relationship {
    /// Create a relationship with empty attributes
    pub fn new(from: impl Into<String>, to: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            from: from.into(),
            to: to.into(),
            context: StringSet::new(),
            image_sources: StringSet::new(),
        }
    }

    /// Builder: add context entries
    pub fn with_context<I, S>(mut self, context: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.context.extend(context.into_iter().map(Into::into));
        self
    }

    /// Builder: add a provenance tag
    pub fn with_image_source(mut self, source: impl Into<String>) -> Self {
        self.image_sources.insert(source.into());
        self
    }

    /// Identity triple
    pub fn key(&self) -> (&str, &str, &str) {
        (&self.from, &self.to, &self.name)
    }

    /// Union another relationship's attributes into this one
    pub fn absorb(&mut self, other: Relationship) {
        self.context.extend(other.context);
        self.image_sources.extend(other.image_sources);
    }
}

/// A graph or graph fragment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Graph {
    #[serde(default)]
    pub nodes: Vec<Node>,

    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

impl Graph {
    pub fn new(nodes: Vec<Node>, relationships: Vec<Relationship>) -> Self {
        Self {
            nodes,
            relationships,
        }
    }

    /// Parse a graph from its JSON wire form
    pub fn from_json(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.relationships.is_empty()
    }

    /// Names of all declared nodes
    pub fn node_names(&self) -> BTreeSet<&str> {
        self.nodes.iter().map(|n| n.name.as_str()).collect()
    }

    pub fn find_node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn find_relationship(&self, from: &str, to: &str, name: &str) -> Option<&Relationship> {
        self.relationships
            .iter()
            .find(|r| r.key() == (from, to, name))
    }

    /// Replace every node's and relationship's provenance with `source`
    pub fn tag_provenance(&mut self, source: &str) {
        for node in &mut self.nodes {
            node.image_sources = StringSet::from([source.to_string()]);
        }
        for relationship in &mut self.relationships {
            relationship.image_sources = StringSet::from([source.to_string()]);
        }
    }

    /// Collapse repeated identities by set union, keeping first-seen order
    pub fn consolidated(self) -> Self {
        let mut nodes: Vec<Node> = Vec::with_capacity(self.nodes.len());
        let mut node_index: HashMap<String, usize> = HashMap::new();
        for node in self.nodes {
            match node_index.get(&node.name) {
                Some(&idx) => nodes[idx].absorb(node),
                None => {
                    node_index.insert(node.name.clone(), nodes.len());
                    nodes.push(node);
                }
            }
        }

        let mut relationships: Vec<Relationship> = Vec::with_capacity(self.relationships.len());
        let mut rel_index: HashMap<(String, String, String), usize> = HashMap::new();
        for rel in self.relationships {
            let key = (rel.from.clone(), rel.to.clone(), rel.name.clone());
            match rel_index.get(&key) {
                Some(&idx) => relationships[idx].absorb(rel),
                None => {
                    rel_index.insert(key, relationships.len());
                    relationships.push(rel);
                }
            }
        }

        Self {
            nodes,
            relationships,
        }
    }

    /// Sort nodes by name and relationships by identity triple
    pub fn sorted(mut self) -> Self {
        self.nodes.sort_by(|a, b| a.name.cmp(&b.name));
        self.relationships.sort_by(|a, b| a.key().cmp(&b.key()));
        self
    }

    /// Endpoints referenced by relationships but not declared as nodes
    pub fn undeclared_endpoints(&self) -> BTreeSet<&str> {
        let names = self.node_names();
        self.relationships
            .iter()
            .flat_map(|r| [r.from.as_str(), r.to.as_str()])
            .filter(|endpoint| !names.contains(endpoint))
            .collect()
    }

    /// Check structural invariants: non-empty node names and every
    /// relationship endpoint declared among this graph's nodes.
    pub fn validate(&self) -> Result<()> {
        if self.nodes.iter().any(|n| n.name.trim().is_empty()) {
            return Err(CoreError::Validation("node name cannot be empty".into()));
        }

        let names = self.node_names();
        for rel in &self.relationships {
            for endpoint in [&rel.from, &rel.to] {
                if !names.contains(endpoint.as_str()) {
                    return Err(CoreError::DanglingRelationship {
                        name: rel.name.clone(),
                        from: rel.from.clone(),
                        to: rel.to.clone(),
                        missing: endpoint.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

/// Accepts an absent/null value, a scalar or a (nested) list and yields a set.
/// Empty strings are dropped.
fn string_set<'de, D>(deserializer: D) -> std::result::Result<StringSet, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let mut set = StringSet::new();
    if let Some(value) = value {
        collect_strings(value, &mut set);
    }
    Ok(set)
}

fn collect_strings(value: Value, out: &mut StringSet) {
    match value {
        Value::Null | Value::Object(_) => {}
        Value::String(s) => {
            if !s.trim().is_empty() {
                out.insert(s);
            }
        }
        Value::Number(n) => {
            out.insert(n.to_string());
        }
        Value::Bool(b) => {
            out.insert(b.to_string());
        }
        Value::Array(items) => {
            for item in items {
                collect_strings(item, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_scalar_becomes_single_element_set() {
        let node: Node =
            serde_json::from_str(r#"{"name": "Start", "context": "entry point"}"#).unwrap();
        assert_eq!(node.context, StringSet::from(["entry point".to_string()]));
        assert!(node.image_sources.is_empty());
    }

    #[test]
    fn test_context_absent_null_or_empty_becomes_empty_set() {
        for json in [
            r#"{"name": "A"}"#,
            r#"{"name": "A", "context": null}"#,
            r#"{"name": "A", "context": ""}"#,
            r#"{"name": "A", "context": []}"#,
        ] {
            let node: Node = serde_json::from_str(json).unwrap();
            assert!(node.context.is_empty(), "{json}");
        }
    }

    #[test]
    fn test_wire_format_uses_camel_case_image_sources() {
        let rel = Relationship::new("A", "B", "leads to").with_image_source("img1.png");
        let json = serde_json::to_value(&rel).unwrap();
        assert_eq!(json["from"], "A");
        assert_eq!(json["to"], "B");
        assert_eq!(json["imageSources"][0], "img1.png");
        assert!(json["context"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_consolidated_unions_duplicates() {
        let graph = Graph::new(
            vec![
                Node::new("A").with_context(["x"]),
                Node::new("B"),
                Node::new("A").with_context(["y", "x"]),
            ],
            vec![
                Relationship::new("A", "B", "next").with_image_source("one"),
                Relationship::new("A", "B", "next").with_image_source("two"),
                Relationship::new("A", "B", "other"),
            ],
        )
        .consolidated();

        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.nodes[0].name, "A");
        assert_eq!(graph.nodes[0].context.len(), 2);
        assert_eq!(graph.relationships.len(), 2);
        assert_eq!(graph.relationships[0].image_sources.len(), 2);
    }

    #[test]
    fn test_validate_rejects_dangling_endpoint() {
        let graph = Graph::new(
            vec![Node::new("A")],
            vec![Relationship::new("Ghost", "A", "points at")],
        );

        match graph.validate() {
            Err(CoreError::DanglingRelationship { missing, .. }) => assert_eq!(missing, "Ghost"),
            other => panic!("expected dangling relationship error, got {other:?}"),
        }
        assert_eq!(graph.undeclared_endpoints(), BTreeSet::from(["Ghost"]));
    }

    #[test]
    fn test_validate_rejects_empty_node_name() {
        let graph = Graph::new(vec![Node::new("  ")], vec![]);
        assert!(matches!(graph.validate(), Err(CoreError::Validation(_))));
    }

    #[test]
    fn test_tag_provenance_overwrites_sources() {
        let mut graph = Graph::new(
            vec![Node::new("A").with_image_source("stale")],
            vec![Relationship::new("A", "A", "loop")],
        );
        graph.tag_provenance("board.jpg");

        assert_eq!(
            graph.nodes[0].image_sources,
            StringSet::from(["board.jpg".to_string()])
        );
        assert_eq!(
            graph.relationships[0].image_sources,
            StringSet::from(["board.jpg".to_string()])
        );
    }
}
