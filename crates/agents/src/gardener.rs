//! Gardener Agent - Keeps the stored graph consistent
//!
//! After a batch of sections has been merged the graph usually contains the
//! same box read twice from overlapping sections. The fix pass sends the whole
//! graph to the oracle, validates the repaired graph and swaps it in.

use crate::config::RetryPolicy;
use crate::oracle::{parse_reply, ExtractionOracle, OracleMessage};
use crate::prompts::Prompts;
use crate::{AgentError, Result};
use flowgraph_core::{CoreError, Graph, Node, Relationship};
use flowgraph_db::Repository;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Repaired graph as returned by the oracle. Both lists are required, so a
/// reply like `{"error": ...}` is rejected instead of read as an empty graph.
#[derive(Deserialize)]
struct RepairedGraph {
    nodes: Vec<Node>,
    relationships: Vec<Relationship>,
}

impl From<RepairedGraph> for Graph {
    fn from(reply: RepairedGraph) -> Self {
        Graph::new(reply.nodes, reply.relationships)
    }
}

/// The Gardener agent runs the consistency fix pass
pub struct GardenerAgent {
    repo: Repository,
    oracle: Arc<dyn ExtractionOracle>,
    prompts: Arc<Prompts>,
    retry: RetryPolicy,
}

impl GardenerAgent {
    /// Create a new Gardener agent
    pub fn new(repo: Repository, oracle: Arc<dyn ExtractionOracle>, prompts: Arc<Prompts>) -> Self {
        Self {
            repo,
            oracle,
            prompts,
            retry: RetryPolicy::default(),
        }
    }

    /// Set the retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Ask the oracle to deduplicate and repair the stored graph, then
    /// replace the store's contents with the answer.
    ///
    /// Every attempt sends the same input. Unusable answers are retried up to
    /// the policy limit; after that the store is left as it was.
    #[instrument(skip(self))]
    pub async fn fix_graph(&self) -> Result<Graph> {
        let current = self.repo.full_graph().await?;
        if current.is_empty() {
            info!("Graph store is empty, nothing to fix");
            return Ok(current);
        }

        let payload = serde_json::to_string(&current).map_err(CoreError::from)?;
        let messages = vec![
            OracleMessage::system(self.prompts.merge_nodes_and_fix_graph.clone()),
            OracleMessage::user(payload),
        ];

        let max_attempts = self.retry.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            debug!(attempt, "Fixing graph");

            match self.request_repair(messages.clone()).await {
                Ok(repaired) => {
                    self.repo.replace_graph(&repaired).await?;
                    let graph = self.repo.full_graph().await?;
                    info!(
                        attempt,
                        nodes_before = current.nodes.len(),
                        nodes_after = graph.nodes.len(),
                        relationships_after = graph.relationships.len(),
                        "Replaced graph with repaired version"
                    );
                    return Ok(graph);
                }
                Err(reason) => {
                    warn!(attempt, max_attempts, %reason, "Rejected repaired graph");
                    last_error = reason;
                }
            }

            if attempt < max_attempts {
                if let Some(backoff) = self.retry.backoff {
                    tokio::time::sleep(backoff).await;
                }
            }
        }

        Err(AgentError::RepairFailed {
            attempts: max_attempts,
            last_error,
        })
    }

    /// One oracle round trip; `Err` carries why the answer was unusable
    async fn request_repair(&self, messages: Vec<OracleMessage>) -> std::result::Result<Graph, String> {
        let reply = match self.oracle.complete(messages).await {
            Ok(Some(reply)) => reply,
            Ok(None) => return Err("no response from oracle".into()),
            Err(e) => return Err(format!("oracle error: {e}")),
        };

        let reply: RepairedGraph =
            parse_reply(&reply).map_err(|e| format!("unparseable oracle reply: {e}"))?;
        let graph = Graph::from(reply).consolidated();
        graph.validate().map_err(|e| e.to_string())?;
        Ok(graph)
    }
}
