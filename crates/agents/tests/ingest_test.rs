//! Section extraction, merging and the post-batch fix pass

mod common;

use common::{create_test_repo, flowchart_png, system_prompt, ScriptedOracle};
use flowgraph_agents::{
    AgentError, ExtractionOracle, LibrarianAgent, OracleMessage, PipelineConfig, Prompts,
    SectionJob,
};
use flowgraph_core::{BoundingBox, StringSet, TilingParams};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const LEADS_TO: &str = r#"```json
{"nodes": [{"name": "A", "context": "first step"}, {"name": "B"}],
 "relationships": [{"name": "leads to", "from": "A", "to": "B", "context": null}]}
```"#;

fn single_section() -> TilingParams {
    TilingParams {
        rows: 1,
        cols: 1,
        overlap: 0,
    }
}

/// Fragment replies for extraction requests, identity answer for the fix pass
fn echo_fixer(fragment: &'static str) -> impl Fn(&[OracleMessage]) -> flowgraph_agents::Result<Option<String>> {
    let prompts = Prompts::default();
    move |messages| {
        if system_prompt(messages) == prompts.merge_nodes_and_fix_graph {
            Ok(Some(messages[1].text_content()))
        } else {
            Ok(Some(fragment.to_string()))
        }
    }
}

fn set(items: &[&str]) -> StringSet {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_two_sections_same_fact_merge_into_one() {
    let repo = create_test_repo().await;
    let oracle = ScriptedOracle::new(echo_fixer(LEADS_TO));
    let librarian = LibrarianAgent::new(
        repo.clone(),
        oracle.clone(),
        Arc::new(Prompts::default()),
        &PipelineConfig::default(),
    );

    let images = vec![flowchart_png(120, 80), flowchart_png(120, 80)];
    let names = vec!["board-1.jpg".to_string(), "board-2.jpg".to_string()];
    let outcome = librarian
        .ingest_images(&images, &names, single_section())
        .await
        .expect("ingest");

    assert_eq!(outcome.report.sections_total, 2);
    assert_eq!(outcome.report.sections_merged, 2);
    assert_eq!(outcome.report.sections_dropped(), 0);

    let graph = outcome.graph;
    assert_eq!(graph.nodes.len(), 2);
    assert_eq!(graph.relationships.len(), 1);

    let rel = graph.find_relationship("A", "B", "leads to").unwrap();
    assert_eq!(rel.image_sources, set(&["board-1.jpg", "board-2.jpg"]));
    assert!(rel.context.is_empty());
    let a = graph.find_node("A").unwrap();
    assert_eq!(a.context, set(&["first step"]));
    assert_eq!(a.image_sources, set(&["board-1.jpg", "board-2.jpg"]));

    // two extractions plus one fix
    assert_eq!(oracle.calls(), 3);
    assert_eq!(repo.full_graph().await.unwrap(), graph);
}

#[tokio::test]
async fn test_section_request_carries_image_and_coordinates() {
    let repo = create_test_repo().await;
    let oracle = ScriptedOracle::new(echo_fixer(LEADS_TO));
    let librarian = LibrarianAgent::new(
        repo,
        oracle.clone(),
        Arc::new(Prompts::default()),
        &PipelineConfig::default(),
    );

    librarian
        .ingest_image("board.png", &flowchart_png(64, 48), single_section())
        .await
        .unwrap();

    let requests = oracle.requests();
    assert_eq!(requests.len(), 1);
    let user = &requests[0][1];
    assert_eq!(user.images().count(), 1);
    assert_eq!(user.text_content(), "Section coordinates: (0, 0, 64, 48).");
}

#[tokio::test]
async fn test_failed_section_is_dropped_without_aborting_siblings() {
    let repo = create_test_repo().await;
    let prompts = Prompts::default();
    let extractions = AtomicUsize::new(0);
    let oracle = ScriptedOracle::new(move |messages| {
        if system_prompt(messages) == prompts.merge_nodes_and_fix_graph {
            return Ok(Some(messages[1].text_content()));
        }
        match extractions.fetch_add(1, Ordering::SeqCst) {
            0 => Ok(Some(LEADS_TO.to_string())),
            1 => Ok(Some("I could not read this section".to_string())),
            _ => Ok(None),
        }
    });

    let librarian = LibrarianAgent::new(
        repo,
        oracle.clone(),
        Arc::new(Prompts::default()),
        &PipelineConfig::default(),
    );
    let params = TilingParams {
        rows: 1,
        cols: 3,
        overlap: 5,
    };
    let outcome = librarian
        .ingest_images(&[flowchart_png(150, 60)], &["wide.png".to_string()], params)
        .await
        .unwrap();

    assert_eq!(outcome.report.sections_total, 3);
    assert_eq!(outcome.report.sections_merged, 1);
    assert_eq!(outcome.report.sections_dropped(), 2);
    assert!(outcome
        .report
        .failures
        .iter()
        .all(|f| f.image_name == "wide.png"));
    assert_eq!(outcome.graph.nodes.len(), 2);
}

#[tokio::test]
async fn test_fragment_with_dangling_relationship_is_dropped() {
    let repo = create_test_repo().await;
    let oracle = ScriptedOracle::new(echo_fixer(
        r#"{"nodes": [{"name": "A"}], "relationships": [{"name": "x", "from": "A", "to": "Ghost"}]}"#,
    ));
    let librarian = LibrarianAgent::new(
        repo.clone(),
        oracle,
        Arc::new(Prompts::default()),
        &PipelineConfig::default(),
    );

    let report = librarian
        .ingest_image("board.png", &flowchart_png(40, 40), single_section())
        .await
        .unwrap();

    assert_eq!(report.sections_merged, 0);
    assert!(report.failures[0].reason.contains("Ghost"));
    assert!(repo.full_graph().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_mismatched_names_fail_fast() {
    let repo = create_test_repo().await;
    let oracle = ScriptedOracle::replies(vec![]);
    let librarian = LibrarianAgent::new(
        repo,
        oracle.clone(),
        Arc::new(Prompts::default()),
        &PipelineConfig::default(),
    );

    let err = librarian
        .ingest_images(&[flowchart_png(40, 40)], &[], single_section())
        .await
        .unwrap_err();

    assert!(matches!(err, AgentError::InvalidInput(_)));
    assert_eq!(oracle.calls(), 0);
}

#[tokio::test]
async fn test_undecodable_image_fails_before_dispatch() {
    let repo = create_test_repo().await;
    let oracle = ScriptedOracle::new(echo_fixer(LEADS_TO));
    let librarian = LibrarianAgent::new(
        repo.clone(),
        oracle.clone(),
        Arc::new(Prompts::default()),
        &PipelineConfig::default(),
    );

    let images = vec![flowchart_png(40, 40), "bm90IGFuIGltYWdl".to_string()];
    let names = vec!["good.png".to_string(), "bad.png".to_string()];
    let err = librarian
        .ingest_images(&images, &names, single_section())
        .await
        .unwrap_err();

    match err {
        AgentError::InvalidInput(message) => assert!(message.contains("bad.png")),
        other => panic!("expected invalid input, got {other:?}"),
    }
    assert_eq!(oracle.calls(), 0);
    assert!(repo.full_graph().await.unwrap().is_empty());
}

/// Oracle that holds each request open for a while and records the highest
/// number of requests in flight at once
#[derive(Default)]
struct SlowOracle {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl ExtractionOracle for SlowOracle {
    async fn complete(&self, _messages: Vec<OracleMessage>) -> flowgraph_agents::Result<Option<String>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(20)).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(Some(format!(
            r#"{{"nodes": [{{"name": "Step {call}"}}], "relationships": []}}"#
        )))
    }
}

#[tokio::test]
async fn test_dispatch_respects_max_concurrency() {
    let repo = create_test_repo().await;
    let oracle = Arc::new(SlowOracle::default());
    let config = PipelineConfig {
        max_concurrency: 3,
        ..PipelineConfig::default()
    };
    let librarian = LibrarianAgent::new(
        repo.clone(),
        oracle.clone(),
        Arc::new(Prompts::default()),
        &config,
    );

    let jobs: Vec<SectionJob> = (0..9)
        .map(|i| SectionJob {
            image_name: "board.jpg".to_string(),
            bounds: BoundingBox::new(i * 10, 0, i * 10 + 10, 10),
            jpeg_base64: String::new(),
        })
        .collect();

    let report = librarian.dispatch_sections(jobs).await.unwrap();

    assert_eq!(report.sections_merged, 9);
    assert_eq!(oracle.calls.load(Ordering::SeqCst), 9);
    let peak = oracle.peak.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak in-flight {peak} exceeds the limit");
    assert!(peak > 1, "sections were dispatched one at a time");
    assert_eq!(repo.list_nodes().await.unwrap().len(), 9);
}
