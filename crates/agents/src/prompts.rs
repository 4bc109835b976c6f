//! System instructions sent to the oracle

use crate::{AgentError, Result};
use std::path::Path;
use tracing::info;

const IMAGE_TO_GRAPH: &str = include_str!("../prompts/image_to_graph.md");
const FIND_RELEVANT_NODES: &str = include_str!("../prompts/find_relevant_nodes.md");
const FLOWCHART_QUERY: &str = include_str!("../prompts/flowchart_query.md");
const MERGE_NODES_AND_FIX_GRAPH: &str = include_str!("../prompts/merge_nodes_and_fix_graph.md");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompts {
    /// Section image → graph fragment
    pub image_to_graph: String,
    /// Query → relevant node names
    pub find_relevant_nodes: String,
    /// Graph context + conversation → answer
    pub flowchart_query: String,
    /// Accumulated graph → deduplicated graph
    pub merge_nodes_and_fix_graph: String,
}

impl Default for Prompts {
    fn default() -> Self {
        Self {
            image_to_graph: IMAGE_TO_GRAPH.to_string(),
            find_relevant_nodes: FIND_RELEVANT_NODES.to_string(),
            flowchart_query: FLOWCHART_QUERY.to_string(),
            merge_nodes_and_fix_graph: MERGE_NODES_AND_FIX_GRAPH.to_string(),
        }
    }
}

impl Prompts {
    /// Built-in prompts, overridden by `FLOWGRAPH_PROMPTS_DIR/<name>.md` when present
    pub fn load() -> Result<Self> {
        match std::env::var("FLOWGRAPH_PROMPTS_DIR") {
            Ok(dir) if !dir.trim().is_empty() => Self::from_dir(Path::new(dir.trim())),
            _ => Ok(Self::default()),
        }
    }

    /// Built-in prompts with any `<name>.md` file in `dir` taking precedence
    pub fn from_dir(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(AgentError::InvalidInput(format!(
                "prompts directory not found: {}",
                dir.display()
            )));
        }

        let defaults = Self::default();
        Ok(Self {
            image_to_graph: read_override(dir, "image_to_graph.md", defaults.image_to_graph)?,
            find_relevant_nodes: read_override(
                dir,
                "find_relevant_nodes.md",
                defaults.find_relevant_nodes,
            )?,
            flowchart_query: read_override(dir, "flowchart_query.md", defaults.flowchart_query)?,
            merge_nodes_and_fix_graph: read_override(
                dir,
                "merge_nodes_and_fix_graph.md",
                defaults.merge_nodes_and_fix_graph,
            )?,
        })
    }
}

fn read_override(dir: &Path, file: &str, default: String) -> Result<String> {
    let path = dir.join(file);
    if !path.is_file() {
        return Ok(default);
    }

    let content = std::fs::read_to_string(&path).map_err(|e| {
        AgentError::InvalidInput(format!("cannot read prompt {}: {e}", path.display()))
    })?;
    info!(path = %path.display(), "Loaded prompt override");
    Ok(content)
}
