//! SurrealDB schema definitions

use crate::{DbConnection, DbError, Result};
use tracing::info;

/// Initialize the database schema
pub async fn initialize_schema(db: &DbConnection) -> Result<()> {
    info!("Initializing database schema...");

    db.query(SCHEMA_DEFINITION)
        .await?
        .check()
        .map_err(|e| DbError::SchemaInit(e.to_string()))?;

    info!("Schema initialized successfully");
    Ok(())
}

// Record ids are derived from identities: `node:<name>` and
// `relationship:<json [from, to, name]>`, so concurrent upserts of the
// same fact land on the same record.
const SCHEMA_DEFINITION: &str = r#"
-- ============================================
-- TABLES
-- ============================================

-- Flowchart nodes
DEFINE TABLE IF NOT EXISTS node SCHEMAFULL;
DEFINE FIELD IF NOT EXISTS name ON node TYPE string;
DEFINE FIELD IF NOT EXISTS context ON node TYPE array<string> DEFAULT [];
DEFINE FIELD IF NOT EXISTS image_sources ON node TYPE array<string> DEFAULT [];

-- Labelled edges between nodes, endpoints stored by node name
DEFINE TABLE IF NOT EXISTS relationship SCHEMAFULL;
DEFINE FIELD IF NOT EXISTS source ON relationship TYPE string;
DEFINE FIELD IF NOT EXISTS target ON relationship TYPE string;
DEFINE FIELD IF NOT EXISTS name ON relationship TYPE string;
DEFINE FIELD IF NOT EXISTS context ON relationship TYPE array<string> DEFAULT [];
DEFINE FIELD IF NOT EXISTS image_sources ON relationship TYPE array<string> DEFAULT [];

-- ============================================
-- INDEXES
-- ============================================

DEFINE INDEX IF NOT EXISTS idx_node_name ON node FIELDS name UNIQUE;
DEFINE INDEX IF NOT EXISTS idx_relationship_source ON relationship FIELDS source;
DEFINE INDEX IF NOT EXISTS idx_relationship_target ON relationship FIELDS target;
"#;
