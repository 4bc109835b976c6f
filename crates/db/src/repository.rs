//! Repository pattern for graph store operations

use crate::{DbConnection, DbError, Result};
use flowgraph_core::{CoreError, Graph, Node, Relationship, StringSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

/// Repository for all graph store operations
///
/// Writes go through a single lock: the embedded engine aborts
/// conflicting write transactions instead of queueing them.
#[derive(Clone)]
pub struct Repository {
    db: DbConnection,
    write_lock: Arc<Mutex<()>>,
}

impl Repository {
    /// Create a new repository
    pub fn new(db: DbConnection) -> Self {
        Self {
            db,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    // ==========================================
    // READ OPERATIONS
    // ==========================================

    /// All nodes with their attributes, ordered by name
    #[instrument(skip(self))]
    pub async fn list_nodes(&self) -> Result<Vec<Node>> {
        let records: Vec<NodeRecord> = self
            .db
            .query(SELECT_NODES)
            .await?
            .take(0)?;

        Ok(records.into_iter().map(Node::from).collect())
    }

    /// The whole stored graph
    #[instrument(skip(self))]
    pub async fn full_graph(&self) -> Result<Graph> {
        let mut response = self
            .db
            .query(SELECT_NODES)
            .query(SELECT_RELATIONSHIPS)
            .await?;

        let nodes: Vec<NodeRecord> = response.take(0)?;
        let relationships: Vec<RelationshipRecord> = response.take(1)?;

        Ok(Graph::new(
            nodes.into_iter().map(Node::from).collect(),
            relationships.into_iter().map(Relationship::from).collect(),
        )
        .sorted())
    }

    /// Every relationship touching one of `names`, plus the named nodes
    /// and all endpoints of those relationships.
    #[instrument(skip(self))]
    pub async fn induced_subgraph(&self, names: &[String]) -> Result<Graph> {
        let relationships: Vec<RelationshipRecord> = self
            .db
            .query(
                "SELECT source, target, name, context, image_sources FROM relationship \
                 WHERE source IN $names OR target IN $names",
            )
            .bind(("names", names.to_vec()))
            .await?
            .take(0)?;

        let mut wanted: BTreeSet<String> = names.iter().cloned().collect();
        for rel in &relationships {
            wanted.insert(rel.source.clone());
            wanted.insert(rel.target.clone());
        }

        let nodes: Vec<NodeRecord> = self
            .db
            .query("SELECT name, context, image_sources FROM node WHERE name IN $names ORDER BY name")
            .bind(("names", wanted.into_iter().collect::<Vec<_>>()))
            .await?
            .take(0)?;

        debug!(
            nodes = nodes.len(),
            relationships = relationships.len(),
            "Induced subgraph"
        );

        Ok(Graph::new(
            nodes.into_iter().map(Node::from).collect(),
            relationships.into_iter().map(Relationship::from).collect(),
        )
        .sorted())
    }

    /// Which of `names` exist as nodes
    #[instrument(skip(self))]
    pub async fn existing_node_names(&self, names: &[String]) -> Result<BTreeSet<String>> {
        if names.is_empty() {
            return Ok(BTreeSet::new());
        }

        let found: Vec<String> = self
            .db
            .query("SELECT VALUE name FROM node WHERE name IN $names")
            .bind(("names", names.to_vec()))
            .await?
            .take(0)?;

        Ok(found.into_iter().collect())
    }

    // ==========================================
    // MERGE OPERATIONS
    // ==========================================

    /// Merge a fragment into the store.
    ///
    /// Nodes and relationships are upserted by identity and their attribute
    /// sets unioned with whatever is stored, so re-merging is idempotent and
    /// the order of concurrent merges does not matter. Relationship endpoints
    /// must be declared in the fragment or already stored.
    #[instrument(skip(self, fragment), fields(nodes = fragment.nodes.len(), relationships = fragment.relationships.len()))]
    pub async fn upsert_graph(&self, fragment: &Graph) -> Result<()> {
        let fragment = fragment.clone().consolidated();
        if fragment.is_empty() {
            return Ok(());
        }
        if fragment.nodes.iter().any(|n| n.name.trim().is_empty()) {
            return Err(CoreError::Validation("node name cannot be empty".into()).into());
        }

        let _guard = self.write_lock.lock().await;

        let undeclared: Vec<String> = fragment
            .undeclared_endpoints()
            .into_iter()
            .map(String::from)
            .collect();
        let stored = self.existing_node_names(&undeclared).await?;
        if let Some(missing) = undeclared.iter().find(|name| !stored.contains(*name)) {
            let rel = fragment
                .relationships
                .iter()
                .find(|r| &r.from == missing || &r.to == missing);
            return Err(CoreError::DanglingRelationship {
                name: rel.map(|r| r.name.clone()).unwrap_or_default(),
                from: rel.map(|r| r.from.clone()).unwrap_or_default(),
                to: rel.map(|r| r.to.clone()).unwrap_or_default(),
                missing: missing.clone(),
            }
            .into());
        }

        self.db
            .query(format!("BEGIN TRANSACTION; {UPSERT_STATEMENTS} COMMIT TRANSACTION;"))
            .bind(("nodes", node_records(&fragment)))
            .bind(("relationships", relationship_records(&fragment)))
            .await?
            .check()?;

        info!(
            nodes = fragment.nodes.len(),
            relationships = fragment.relationships.len(),
            "Merged graph fragment"
        );
        Ok(())
    }

    /// Atomically swap the stored graph for `graph`
    #[instrument(skip(self, graph), fields(nodes = graph.nodes.len(), relationships = graph.relationships.len()))]
    pub async fn replace_graph(&self, graph: &Graph) -> Result<()> {
        let graph = graph.clone().consolidated();
        graph.validate()?;

        let _guard = self.write_lock.lock().await;

        self.db
            .query(format!(
                "BEGIN TRANSACTION; DELETE relationship; DELETE node; {UPSERT_STATEMENTS} COMMIT TRANSACTION;"
            ))
            .bind(("nodes", node_records(&graph)))
            .bind(("relationships", relationship_records(&graph)))
            .await?
            .check()?;

        info!("Replaced stored graph");
        Ok(())
    }

    /// Remove every node and relationship
    #[instrument(skip(self))]
    pub async fn delete_all(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        self.db
            .query("BEGIN TRANSACTION; DELETE relationship; DELETE node; COMMIT TRANSACTION;")
            .await?
            .check()?;

        info!("Cleared graph store");
        Ok(())
    }

    // ==========================================
    // EDIT OPERATIONS
    // ==========================================

    /// Create a node if absent. Existing nodes keep their attributes.
    #[instrument(skip(self))]
    pub async fn create_node(&self, name: &str, image_source: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(CoreError::Validation("node name cannot be empty".into()).into());
        }

        let _guard = self.write_lock.lock().await;

        self.db
            .query(
                "UPSERT type::thing('node', $name) SET \
                    name = $name, \
                    context = context ?? [], \
                    image_sources = image_sources ?? $image_sources",
            )
            .bind(("name", name.to_string()))
            .bind(("image_sources", vec![image_source.to_string()]))
            .await?
            .check()?;

        Ok(())
    }

    /// Create a relationship between two stored nodes if absent.
    /// An existing relationship keeps its attributes.
    #[instrument(skip(self))]
    pub async fn create_relationship(
        &self,
        from: &str,
        to: &str,
        label: &str,
        image_source: &str,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let endpoints = vec![from.to_string(), to.to_string()];
        let stored = self.existing_node_names(&endpoints).await?;
        if let Some(missing) = endpoints.iter().find(|name| !stored.contains(*name)) {
            return Err(DbError::NotFound("node".into(), missing.clone()));
        }

        self.db
            .query(
                "UPSERT type::thing('relationship', $key) SET \
                    source = $source, \
                    target = $target, \
                    name = $label, \
                    context = context ?? [], \
                    image_sources = image_sources ?? $image_sources",
            )
            .bind(("key", relationship_key(from, to, label)))
            .bind(("source", from.to_string()))
            .bind(("target", to.to_string()))
            .bind(("label", label.to_string()))
            .bind(("image_sources", vec![image_source.to_string()]))
            .await?
            .check()?;

        Ok(())
    }

    /// Delete the relationship with this identity, if any
    #[instrument(skip(self))]
    pub async fn delete_relationship(&self, from: &str, to: &str, label: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        self.db
            .query("DELETE type::thing('relationship', $key)")
            .bind(("key", relationship_key(from, to, label)))
            .await?
            .check()?;

        Ok(())
    }

    /// Delete a node together with every relationship touching it
    #[instrument(skip(self))]
    pub async fn delete_node(&self, name: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        self.db
            .query(
                "BEGIN TRANSACTION; \
                 DELETE relationship WHERE source = $name OR target = $name; \
                 DELETE type::thing('node', $name); \
                 COMMIT TRANSACTION;",
            )
            .bind(("name", name.to_string()))
            .await?
            .check()?;

        Ok(())
    }

    /// Rename a node, keeping its attributes and re-pointing its relationships
    #[instrument(skip(self))]
    pub async fn rename_node(&self, from: &str, to: &str) -> Result<()> {
        if to.trim().is_empty() {
            return Err(CoreError::Validation("node name cannot be empty".into()).into());
        }

        let _guard = self.write_lock.lock().await;

        let mut response = self
            .db
            .query("SELECT name, context, image_sources FROM node WHERE name = $from")
            .query("SELECT VALUE name FROM node WHERE name = $to")
            .query(
                "SELECT source, target, name, context, image_sources FROM relationship \
                 WHERE source = $from OR target = $from",
            )
            .bind(("from", from.to_string()))
            .bind(("to", to.to_string()))
            .await?;

        let current: Vec<NodeRecord> = response.take(0)?;
        let taken: Vec<String> = response.take(1)?;
        let incident: Vec<RelationshipRecord> = response.take(2)?;

        let Some(node) = current.into_iter().next() else {
            return Err(DbError::NotFound("node".into(), from.into()));
        };
        if from == to {
            return Ok(());
        }
        if !taken.is_empty() {
            return Err(DbError::Conflict(format!("node '{to}' already exists")));
        }

        let renamed = NodeRecord {
            name: to.to_string(),
            ..node
        };
        let relationships: Vec<RelationshipRecord> = incident
            .into_iter()
            .map(|mut rel| {
                if rel.source == from {
                    rel.source = to.to_string();
                }
                if rel.target == from {
                    rel.target = to.to_string();
                }
                rel.key = relationship_key(&rel.source, &rel.target, &rel.name);
                rel
            })
            .collect();

        self.db
            .query(format!(
                "BEGIN TRANSACTION; \
                 DELETE relationship WHERE source = $from OR target = $from; \
                 DELETE type::thing('node', $from); \
                 {UPSERT_STATEMENTS} \
                 COMMIT TRANSACTION;"
            ))
            .bind(("from", from.to_string()))
            .bind(("nodes", vec![renamed]))
            .bind(("relationships", relationships))
            .await?
            .check()?;

        info!(from, to, "Renamed node");
        Ok(())
    }

    // ==========================================
    // STATS
    // ==========================================

    /// Get store statistics
    #[instrument(skip(self))]
    pub async fn get_stats(&self) -> Result<DbStats> {
        let stats: Option<DbStats> = self
            .db
            .query(
                r#"
                RETURN {
                    node_count: (SELECT count() FROM node GROUP ALL)[0].count ?? 0,
                    relationship_count: (SELECT count() FROM relationship GROUP ALL)[0].count ?? 0
                }
            "#,
            )
            .await?
            .take(0)?;

        stats.ok_or_else(|| DbError::QueryFailed("stats".into()))
    }
}

// Union-merges `$nodes` and `$relationships` into the store. Run inside a
// transaction by the callers.
const UPSERT_STATEMENTS: &str = r#"
    FOR $node IN $nodes {
        UPSERT type::thing('node', $node.name) SET
            name = $node.name,
            context = array::union(context ?? [], $node.context),
            image_sources = array::union(image_sources ?? [], $node.image_sources);
    };
    FOR $rel IN $relationships {
        UPSERT type::thing('relationship', $rel.key) SET
            source = $rel.source,
            target = $rel.target,
            name = $rel.name,
            context = array::union(context ?? [], $rel.context),
            image_sources = array::union(image_sources ?? [], $rel.image_sources);
    };
"#;

const SELECT_NODES: &str = "SELECT name, context, image_sources FROM node ORDER BY name";

const SELECT_RELATIONSHIPS: &str =
    "SELECT source, target, name, context, image_sources FROM relationship";

/// Record key for a relationship identity
pub fn relationship_key(from: &str, to: &str, label: &str) -> String {
    serde_json::json!([from, to, label]).to_string()
}

fn node_records(graph: &Graph) -> Vec<NodeRecord> {
    graph.nodes.iter().map(NodeRecord::from).collect()
}

fn relationship_records(graph: &Graph) -> Vec<RelationshipRecord> {
    graph.relationships.iter().map(RelationshipRecord::from).collect()
}

// ==========================================
// RECORD TYPES
// ==========================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct NodeRecord {
    name: String,
    #[serde(default)]
    context: Vec<String>,
    #[serde(default)]
    image_sources: Vec<String>,
}

impl From<&Node> for NodeRecord {
    fn from(node: &Node) -> Self {
        Self {
            name: node.name.clone(),
            context: node.context.iter().cloned().collect(),
            image_sources: node.image_sources.iter().cloned().collect(),
        }
    }
}

impl From<NodeRecord> for Node {
    fn from(record: NodeRecord) -> Self {
        Self {
            name: record.name,
            context: record.context.into_iter().collect::<StringSet>(),
            image_sources: record.image_sources.into_iter().collect::<StringSet>(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RelationshipRecord {
    /// Only set on writes
    #[serde(default)]
    key: String,
    source: String,
    target: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    context: Vec<String>,
    #[serde(default)]
    image_sources: Vec<String>,
}

impl From<&Relationship> for RelationshipRecord {
    fn from(rel: &Relationship) -> Self {
        Self {
            key: relationship_key(&rel.from, &rel.to, &rel.name),
            source: rel.from.clone(),
            target: rel.to.clone(),
            name: rel.name.clone(),
            context: rel.context.iter().cloned().collect(),
            image_sources: rel.image_sources.iter().cloned().collect(),
        }
    }
}

impl From<RelationshipRecord> for Relationship {
    fn from(record: RelationshipRecord) -> Self {
        Self {
            name: record.name,
            from: record.source,
            to: record.target,
            context: record.context.into_iter().collect(),
            image_sources: record.image_sources.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DbStats {
    #[serde(default)]
    pub node_count: i64,
    #[serde(default)]
    pub relationship_count: i64,
}
