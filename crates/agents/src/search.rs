//! Search Agent - Answers questions about the stored flowchart
//!
//! A query first narrows the graph to the nodes the oracle considers
//! relevant (falling back to every node), then sends that subgraph together
//! with the recent conversation to the oracle for an answer.

use crate::oracle::{parse_reply, strip_json_fence, ExtractionOracle, OracleMessage};
use crate::prompts::Prompts;
use crate::{AgentError, Result};
use flowgraph_core::conversation::recent_turns;
use flowgraph_core::{ConversationTurn, CoreError, Graph};
use flowgraph_db::Repository;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

const DEFAULT_HISTORY_TURNS: usize = 10;

/// Answer to a flowchart question
#[derive(Debug, Clone, Serialize)]
pub struct QueryAnswer {
    pub text: String,
    /// Source images the answer relies on
    pub image_names: Vec<String>,
    /// Graph context the answer was produced from
    pub subgraph: Graph,
}

#[derive(Deserialize)]
struct AnswerPayload {
    text: String,
    #[serde(default, rename = "imageSources", alias = "image_sources")]
    image_sources: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SelectorReply {
    Names(Vec<Value>),
    Wrapped { nodes: Vec<Value> },
}

/// The Search agent handles user queries
pub struct SearchAgent {
    repo: Repository,
    oracle: Arc<dyn ExtractionOracle>,
    prompts: Arc<Prompts>,
    history_turns: usize,
}

impl SearchAgent {
    /// Create a new Search agent
    pub fn new(repo: Repository, oracle: Arc<dyn ExtractionOracle>, prompts: Arc<Prompts>) -> Self {
        Self {
            repo,
            oracle,
            prompts,
            history_turns: DEFAULT_HISTORY_TURNS,
        }
    }

    /// Number of past conversation turns forwarded to the oracle
    pub fn with_history_turns(mut self, turns: usize) -> Self {
        self.history_turns = turns;
        self
    }

    /// Names of the stored nodes relevant to `user_input`.
    ///
    /// Only names that exist in the store are kept. An empty selection, an
    /// unusable reply or an oracle failure selects every node.
    #[instrument(skip(self))]
    pub async fn relevant_node_names(&self, user_input: &str) -> Result<Vec<String>> {
        let nodes = self.repo.list_nodes().await?;
        if nodes.is_empty() {
            return Ok(Vec::new());
        }

        let all_names: Vec<String> = nodes.iter().map(|n| n.name.clone()).collect();
        let available: Vec<Value> = nodes
            .iter()
            .map(|n| serde_json::json!({ "name": n.name, "context": n.context }))
            .collect();
        let available = serde_json::to_string(&available).map_err(CoreError::from)?;

        let messages = vec![
            OracleMessage::system(self.prompts.find_relevant_nodes.clone()),
            OracleMessage::user(format!(
                "User input: '{user_input}'. Available nodes: {available}."
            )),
        ];

        let selected = match self.oracle.complete(messages).await {
            Ok(Some(reply)) => parse_selection(&reply),
            Ok(None) => {
                warn!("No node selection from oracle, using all nodes");
                Vec::new()
            }
            Err(e) => {
                warn!("Node selection failed, using all nodes: {}", e);
                Vec::new()
            }
        };

        let known: BTreeSet<&str> = all_names.iter().map(String::as_str).collect();
        let mut seen = BTreeSet::new();
        let relevant: Vec<String> = selected
            .into_iter()
            .filter(|name| known.contains(name.as_str()))
            .filter(|name| seen.insert(name.clone()))
            .collect();

        if relevant.is_empty() {
            debug!(nodes = all_names.len(), "Falling back to every node");
            return Ok(all_names);
        }

        info!(selected = relevant.len(), of = all_names.len(), "Selected relevant nodes");
        Ok(relevant)
    }

    /// Subgraph induced by the nodes relevant to `user_input`
    #[instrument(skip(self))]
    pub async fn relevant_subgraph(&self, user_input: &str) -> Result<Graph> {
        let names = self.relevant_node_names(user_input).await?;
        if names.is_empty() {
            return Ok(Graph::default());
        }
        Ok(self.repo.induced_subgraph(&names).await?)
    }

    /// Answer a question about the flowchart.
    ///
    /// `use_relevant_context` narrows the graph sent to the oracle; otherwise
    /// the full graph is used.
    #[instrument(skip(self, history), fields(history = history.len()))]
    pub async fn answer(
        &self,
        user_input: &str,
        history: &[ConversationTurn],
        use_relevant_context: bool,
    ) -> Result<QueryAnswer> {
        let subgraph = if use_relevant_context {
            self.relevant_subgraph(user_input).await?
        } else {
            self.repo.full_graph().await?
        };

        let context = serde_json::to_string(&subgraph).map_err(CoreError::from)?;
        let mut messages = vec![
            OracleMessage::system(self.prompts.flowchart_query.clone()),
            OracleMessage::user(format!("Here is the data for a flowchart: {context}")),
        ];
        messages.extend(
            recent_turns(history, self.history_turns)
                .iter()
                .map(|turn| OracleMessage::text(turn.role.into(), turn.content.clone())),
        );
        messages.push(OracleMessage::user(user_input));

        let reply = self
            .oracle
            .complete(messages)
            .await?
            .ok_or(AgentError::NoAnswer)?;

        let (text, image_names) = match parse_reply::<AnswerPayload>(&reply) {
            Ok(payload) => (payload.text, payload.image_sources),
            Err(e) => {
                debug!("Answer is not structured JSON ({}), using raw reply", e);
                (strip_json_fence(&reply).to_string(), Vec::new())
            }
        };

        Ok(QueryAnswer {
            text,
            image_names,
            subgraph,
        })
    }
}

/// Node names from a selector reply: a JSON array of names (or of objects
/// with a `name`), optionally wrapped as `{"nodes": [...]}`.
fn parse_selection(reply: &str) -> Vec<String> {
    let items = match parse_reply::<SelectorReply>(reply) {
        Ok(SelectorReply::Names(items)) | Ok(SelectorReply::Wrapped { nodes: items }) => items,
        Err(e) => {
            warn!("Unusable node selection ({}), using all nodes", e);
            return Vec::new();
        }
    };

    items
        .into_iter()
        .filter_map(|item| match item {
            Value::String(name) => Some(name),
            Value::Object(map) => map.get("name").and_then(Value::as_str).map(String::from),
            _ => None,
        })
        .collect()
}
