//! HTTP API for the flowchart UI
//!
//! Routes:
//! - `POST /upload`     ingest images, returns `{full_graph}`
//! - `POST /query`      answer a question, returns `{response, image_names, relevant_subgraph}`
//! - `GET  /fullgraph`  returns `{full_graph}`
//! - `POST /editgraph`  apply manual edits, returns `{full_graph}`
//! - `GET  /healthcheck`
//!
//! Every failure is reported as `400 {"detail": "<message>"}`.

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use flowgraph_agents::{
    EditorAgent, ExtractionOracle, LibrarianAgent, PipelineConfig, Prompts, SearchAgent,
};
use flowgraph_core::{ConversationTurn, EditRequest, Graph, GraphEdits, TilingParams};
use flowgraph_db::Repository;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

// ============================================================================
// Application State
// ============================================================================

pub struct AppState {
    repo: Repository,
    librarian: LibrarianAgent,
    search: SearchAgent,
    editor: EditorAgent,
    /// Serializes the mutating routes
    write_lock: Mutex<()>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(
        repo: Repository,
        oracle: Arc<dyn ExtractionOracle>,
        prompts: Arc<Prompts>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            librarian: LibrarianAgent::new(repo.clone(), oracle.clone(), prompts.clone(), config),
            search: SearchAgent::new(repo.clone(), oracle, prompts)
                .with_history_turns(config.history_turns),
            editor: EditorAgent::new(repo.clone()),
            repo,
            write_lock: Mutex::new(()),
        }
    }
}

// ============================================================================
// Request/Response Types
// ============================================================================

fn default_grid() -> u32 {
    2
}

fn default_overlap() -> u32 {
    50
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    pub image_base64_array: Vec<String>,
    pub image_name_array: Vec<String>,
    #[serde(default = "default_grid")]
    pub rows: u32,
    #[serde(default = "default_grid")]
    pub cols: u32,
    #[serde(default = "default_overlap")]
    pub overlap: u32,
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub user_input: String,
    #[serde(default)]
    pub conversation_history: Vec<ConversationTurn>,
    #[serde(default = "default_true")]
    pub use_relevant_context: bool,
}

#[derive(Debug, Serialize)]
pub struct FullGraphResponse {
    pub full_graph: Graph,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub response: String,
    pub image_names: Vec<String>,
    pub relevant_subgraph: Graph,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Any handler failure, rendered as `400 {"detail": ...}`
pub struct ApiError(String);

impl<E: std::fmt::Display> From<E> for ApiError {
    fn from(err: E) -> Self {
        Self(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!("Request failed: {}", self.0);
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "detail": self.0 })),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

// ============================================================================
// Handlers
// ============================================================================

async fn upload(
    State(state): State<SharedState>,
    Json(req): Json<UploadRequest>,
) -> ApiResult<FullGraphResponse> {
    info!(images = req.image_base64_array.len(), "Received request to process flowchart");
    let params = TilingParams {
        rows: req.rows,
        cols: req.cols,
        overlap: req.overlap,
    };

    let _guard = state.write_lock.lock().await;
    let outcome = state
        .librarian
        .ingest_images(&req.image_base64_array, &req.image_name_array, params)
        .await?;

    Ok(Json(FullGraphResponse {
        full_graph: outcome.graph,
    }))
}

async fn query(
    State(state): State<SharedState>,
    Json(req): Json<QueryRequest>,
) -> ApiResult<QueryResponse> {
    info!("Received query");
    let answer = state
        .search
        .answer(
            &req.user_input,
            &req.conversation_history,
            req.use_relevant_context,
        )
        .await?;

    Ok(Json(QueryResponse {
        response: answer.text,
        image_names: answer.image_names,
        relevant_subgraph: answer.subgraph,
    }))
}

async fn full_graph(State(state): State<SharedState>) -> ApiResult<FullGraphResponse> {
    let full_graph = state.repo.full_graph().await?;
    Ok(Json(FullGraphResponse { full_graph }))
}

async fn edit_graph(
    State(state): State<SharedState>,
    Json(req): Json<EditRequest>,
) -> ApiResult<FullGraphResponse> {
    info!("Received request to edit graph");
    let edits = GraphEdits::try_from(req)?;

    let _guard = state.write_lock.lock().await;
    let full_graph = state.editor.apply(&edits).await?;
    Ok(Json(FullGraphResponse { full_graph }))
}

async fn healthcheck() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// ============================================================================
// Router & Server
// ============================================================================

pub fn create_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/upload", post(upload))
        .route("/query", post(query))
        .route("/fullgraph", get(full_graph))
        .route("/editgraph", post(edit_graph))
        .route("/healthcheck", get(healthcheck))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: SharedState, addr: SocketAddr) -> anyhow::Result<()> {
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use flowgraph_agents::OracleMessage;
    use flowgraph_db::init_memory;
    use serde_json::{json, Value};
    use std::sync::Mutex as StdMutex;
    use tower::ServiceExt;

    struct QueueOracle(StdMutex<Vec<String>>);

    #[async_trait::async_trait]
    impl ExtractionOracle for QueueOracle {
        async fn complete(
            &self,
            _messages: Vec<OracleMessage>,
        ) -> flowgraph_agents::Result<Option<String>> {
            let mut replies = self.0.lock().unwrap();
            Ok((!replies.is_empty()).then(|| replies.remove(0)))
        }
    }

    async fn app(replies: &[&str]) -> Router {
        let repo = Repository::new(init_memory().await.unwrap());
        let oracle = Arc::new(QueueOracle(StdMutex::new(
            replies.iter().map(|r| r.to_string()).collect(),
        )));
        let state = AppState::new(
            repo,
            oracle,
            Arc::new(Prompts::default()),
            &PipelineConfig::default(),
        );
        create_router(Arc::new(state))
    }

    async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        let request = match body {
            Some(body) => request.body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_healthcheck() {
        let (status, body) = send(app(&[]).await, "GET", "/healthcheck", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn test_fullgraph_starts_empty() {
        let (status, body) = send(app(&[]).await, "GET", "/fullgraph", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "full_graph": { "nodes": [], "relationships": [] } }));
    }

    #[tokio::test]
    async fn test_editgraph_creates_node() {
        let body = json!({ "editedNodes": [{ "oldName": "", "newName": "Start" }] });
        let (status, body) = send(app(&[]).await, "POST", "/editgraph", Some(body)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["full_graph"]["nodes"][0]["name"], "Start");
        assert_eq!(body["full_graph"]["nodes"][0]["imageSources"][0], "User Edited");
    }

    #[tokio::test]
    async fn test_editgraph_rejects_empty_rename() {
        let body = json!({ "editedNodes": [{ "oldName": "", "newName": "" }] });
        let (status, body) = send(app(&[]).await, "POST", "/editgraph", Some(body)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().contains("oldName"));
    }

    #[tokio::test]
    async fn test_upload_rejects_mismatched_arrays() {
        let body = json!({ "image_base64_array": ["aaaa"], "image_name_array": [] });
        let (status, body) = send(app(&[]).await, "POST", "/upload", Some(body)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].is_string());
    }

    #[tokio::test]
    async fn test_query_returns_answer() {
        let app = app(&[r#"{"text": "Nothing yet.", "imageSources": []}"#]).await;
        let body = json!({
            "user_input": "what is in the chart?",
            "conversation_history": [{ "role": "user", "content": "hi" }],
            "use_relevant_context": false
        });
        let (status, body) = send(app, "POST", "/query", Some(body)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["response"], "Nothing yet.");
        assert_eq!(body["image_names"], json!([]));
        assert_eq!(body["relevant_subgraph"]["nodes"], json!([]));
    }

    #[tokio::test]
    async fn test_query_without_answer_is_bad_request() {
        let body = json!({ "user_input": "hello", "conversation_history": [] });
        let (status, body) = send(app(&[]).await, "POST", "/query", Some(body)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().contains("no answer"));
    }
}
