//! Relevant subgraph selection and conversational answers

mod common;

use common::{create_test_repo, ScriptedOracle};
use flowgraph_agents::{AgentError, OracleRole, Prompts, SearchAgent};
use flowgraph_core::{ConversationTurn, Graph, Node, Relationship};
use flowgraph_db::Repository;
use std::sync::Arc;

async fn seeded_repo() -> Repository {
    let repo = create_test_repo().await;
    let mut graph = Graph::new(
        vec![
            Node::new("Start"),
            Node::new("Validate").with_context(["checks the form"]),
            Node::new("Save"),
            Node::new("Notify"),
        ],
        vec![
            Relationship::new("Start", "Validate", "next"),
            Relationship::new("Validate", "Save", "ok"),
            Relationship::new("Save", "Notify", "then"),
        ],
    );
    graph.tag_provenance("board.jpg");
    repo.upsert_graph(&graph).await.unwrap();
    repo
}

fn agent(repo: Repository, oracle: Arc<ScriptedOracle>) -> SearchAgent {
    SearchAgent::new(repo, oracle, Arc::new(Prompts::default()))
}

#[tokio::test]
async fn test_empty_selection_falls_back_to_every_node() {
    let repo = seeded_repo().await;
    let oracle = ScriptedOracle::replies(vec![Some("[]")]);
    let search = agent(repo, oracle);

    let names = search.relevant_node_names("show me everything").await.unwrap();
    assert_eq!(names, vec!["Notify", "Save", "Start", "Validate"]);
}

#[tokio::test]
async fn test_failed_selection_falls_back_to_every_node() {
    let repo = seeded_repo().await;
    let oracle = ScriptedOracle::replies(vec![None]);
    let search = agent(repo, oracle);

    let names = search.relevant_node_names("anything").await.unwrap();
    assert_eq!(names.len(), 4);
}

#[tokio::test]
async fn test_selection_keeps_only_known_names() {
    let repo = seeded_repo().await;
    let oracle = ScriptedOracle::replies(vec![Some(r#"["Validate", "Imaginary", "Validate"]"#)]);
    let search = agent(repo, oracle.clone());

    let names = search.relevant_node_names("what does validation do?").await.unwrap();
    assert_eq!(names, vec!["Validate"]);

    let request = &oracle.requests()[0];
    let user = request[1].text_content();
    assert!(user.starts_with("User input: 'what does validation do?'. Available nodes: "));
    assert!(user.contains("checks the form"));
}

#[tokio::test]
async fn test_relevant_subgraph_is_induced() {
    let repo = seeded_repo().await;
    let oracle = ScriptedOracle::replies(vec![Some(r#"{"nodes": ["Validate"]}"#)]);
    let search = agent(repo, oracle);

    let sub = search.relevant_subgraph("validation").await.unwrap();
    let names: Vec<_> = sub.nodes.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, vec!["Save", "Start", "Validate"]);
    assert_eq!(sub.relationships.len(), 2);
    assert!(sub.find_relationship("Save", "Notify", "then").is_none());
}

#[tokio::test]
async fn test_structured_answer() {
    let repo = seeded_repo().await;
    let oracle = ScriptedOracle::replies(vec![
        Some(r#"["Save"]"#),
        Some(r#"```json
{"text": "Saving happens after validation.", "imageSources": ["board.jpg"]}
```"#),
    ]);
    let search = agent(repo, oracle.clone());

    let answer = search.answer("when do we save?", &[], true).await.unwrap();
    assert_eq!(answer.text, "Saving happens after validation.");
    assert_eq!(answer.image_names, vec!["board.jpg"]);
    assert!(answer.subgraph.find_node("Save").is_some());

    let request = &oracle.requests()[1];
    assert_eq!(request.len(), 3);
    assert!(request[1]
        .text_content()
        .starts_with("Here is the data for a flowchart: {"));
    assert_eq!(request[2].text_content(), "when do we save?");
}

#[tokio::test]
async fn test_unstructured_answer_uses_raw_text() {
    let repo = seeded_repo().await;
    let oracle = ScriptedOracle::replies(vec![Some("It ends at Notify.")]);
    let search = agent(repo, oracle);

    let answer = search.answer("where does it end?", &[], false).await.unwrap();
    assert_eq!(answer.text, "It ends at Notify.");
    assert!(answer.image_names.is_empty());
    assert_eq!(answer.subgraph.nodes.len(), 4);
}

#[tokio::test]
async fn test_history_is_truncated_to_recent_turns() {
    let repo = seeded_repo().await;
    let oracle = ScriptedOracle::replies(vec![Some(r#"{"text": "ok", "imageSources": []}"#)]);
    let search = agent(repo, oracle.clone());

    let history: Vec<ConversationTurn> = (0..15)
        .map(|i| {
            if i % 2 == 0 {
                ConversationTurn::user(format!("question {i}"))
            } else {
                ConversationTurn::assistant(format!("answer {i}"))
            }
        })
        .collect();

    search.answer("and now?", &history, false).await.unwrap();

    let request = &oracle.requests()[0];
    // system + graph context + 10 turns + new input
    assert_eq!(request.len(), 13);
    assert_eq!(request[2].text_content(), "answer 5");
    assert_eq!(request[2].role, OracleRole::Assistant);
    assert_eq!(request[11].text_content(), "question 14");
    assert_eq!(request[12].text_content(), "and now?");
}

#[tokio::test]
async fn test_missing_reply_is_no_answer() {
    let repo = seeded_repo().await;
    let oracle = ScriptedOracle::replies(vec![None]);
    let search = agent(repo, oracle);

    let err = search.answer("hello?", &[], false).await.unwrap_err();
    assert!(matches!(err, AgentError::NoAnswer));
}
