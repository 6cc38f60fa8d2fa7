//! HTTP API v1 — the assistant over REST.
//!
//! Endpoints:
//!
//! - `POST   /v1/chat`                    — Chat turn in a session
//! - `POST   /v1/code/generate`           — Generate code
//! - `POST   /v1/code/explain`            — Explain a snippet
//! - `POST   /v1/code/debug`              — Debug a snippet
//! - `GET    /v1/sessions`                — List live sessions
//! - `GET    /v1/sessions/{id}`           — History and stats of a session
//! - `GET    /v1/sessions/{id}/search?q=` — Search a session's turns
//! - `DELETE /v1/sessions/{id}`           — Close a session
//! - `GET    /v1/stats`                   — Cache and dispatcher counters
//! - `GET    /v1/ws`                      — WebSocket chat, one reply frame per message

use axum::{
    Router,
    extract::{
        Path, Query, State,
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use localcoder_agent::{AssistRequest, AssistResponse, CoordinatorStats, SessionSummary, Task};
use localcoder_core::error::CoordinatorError;
use localcoder_core::session::{SessionId, SessionStats, Turn};

use crate::SharedState;

// ── Router ────────────────────────────────────────────────────────────────

/// Build the v1 API router. Nest this under "/v1" in the main router.
pub fn v1_router(state: SharedState) -> Router {
    Router::new()
        .route("/chat", post(chat_handler))
        .route("/code/generate", post(generate_code_handler))
        .route("/code/explain", post(explain_code_handler))
        .route("/code/debug", post(debug_code_handler))
        .route("/sessions", get(list_sessions_handler))
        .route(
            "/sessions/{id}",
            get(get_session_handler).delete(close_session_handler),
        )
        .route("/sessions/{id}/search", get(search_session_handler))
        .route("/stats", get(stats_handler))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

// ── Errors ────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
}

impl From<&CoordinatorError> for ErrorResponse {
    fn from(err: &CoordinatorError) -> Self {
        Self {
            error: err.to_string(),
            kind: err.kind().to_string(),
        }
    }
}

/// A coordinator failure rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub CoordinatorError);

impl From<CoordinatorError> for ApiError {
    fn from(err: CoordinatorError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            CoordinatorError::EmptyPrompt => StatusCode::BAD_REQUEST,
            CoordinatorError::ContextTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            CoordinatorError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            CoordinatorError::GenerationFailed(_) => StatusCode::BAD_GATEWAY,
            CoordinatorError::Cancelled | CoordinatorError::Unavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            CoordinatorError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(ErrorResponse::from(&self.0))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChatRequest {
    /// Existing session ID (omit to start a new one).
    #[serde(default)]
    session_id: Option<String>,
    message: String,
    #[serde(default)]
    max_tokens: Option<usize>,
    #[serde(default)]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct GenerateCodeRequest {
    #[serde(default)]
    session_id: Option<String>,
    prompt: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    template: Option<String>,
    #[serde(default)]
    max_tokens: Option<usize>,
    #[serde(default)]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct ExplainCodeRequest {
    #[serde(default)]
    session_id: Option<String>,
    code: String,
    #[serde(default)]
    language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DebugCodeRequest {
    #[serde(default)]
    session_id: Option<String>,
    code: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionSummary>,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub session_id: SessionId,
    pub turns: Vec<Turn>,
    pub stats: SessionStats,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    q: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub session_id: SessionId,
    pub query: String,
    pub matches: Vec<Turn>,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub stats: CoordinatorStats,
    pub uptime_secs: i64,
}

fn assist_request(
    session_id: Option<String>,
    task: Task,
    max_tokens: Option<usize>,
    temperature: Option<f32>,
) -> AssistRequest {
    AssistRequest {
        session_id: session_id
            .filter(|id| !id.trim().is_empty())
            .map(SessionId::from),
        task,
        max_tokens,
        temperature,
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn run(state: &SharedState, request: AssistRequest) -> ApiResult<AssistResponse> {
    let kind = request.task.kind();
    info!(kind = %kind, session = ?request.session_id, "v1 assist request");
    // Dropping this future (client disconnect) cancels the inference job.
    let response = state.coordinator.handle(request).await?;
    Ok(Json(response))
}

async fn chat_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ChatRequest>,
) -> ApiResult<AssistResponse> {
    let request = assist_request(
        payload.session_id,
        Task::chat(payload.message),
        payload.max_tokens,
        payload.temperature,
    );
    run(&state, request).await
}

async fn generate_code_handler(
    State(state): State<SharedState>,
    Json(payload): Json<GenerateCodeRequest>,
) -> ApiResult<AssistResponse> {
    let task = Task::Code {
        prompt: payload.prompt,
        language: payload.language,
        template: payload.template,
    };
    let request = assist_request(
        payload.session_id,
        task,
        payload.max_tokens,
        payload.temperature,
    );
    run(&state, request).await
}

async fn explain_code_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ExplainCodeRequest>,
) -> ApiResult<AssistResponse> {
    let task = Task::Explain {
        code: payload.code,
        language: payload.language,
    };
    run(&state, assist_request(payload.session_id, task, None, None)).await
}

async fn debug_code_handler(
    State(state): State<SharedState>,
    Json(payload): Json<DebugCodeRequest>,
) -> ApiResult<AssistResponse> {
    let task = Task::Debug {
        code: payload.code,
        language: payload.language,
        error_message: payload.error_message,
    };
    run(&state, assist_request(payload.session_id, task, None, None)).await
}

async fn list_sessions_handler(State(state): State<SharedState>) -> Json<SessionListResponse> {
    let sessions = state.coordinator.list_sessions().await;
    Json(SessionListResponse {
        count: sessions.len(),
        sessions,
    })
}

async fn get_session_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<SessionResponse> {
    let id = SessionId::from(id);
    let turns = state.coordinator.history(&id).await?;
    let stats = state.coordinator.session_stats(&id).await?;
    Ok(Json(SessionResponse {
        session_id: id,
        turns,
        stats,
    }))
}

async fn search_session_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<SearchResponse> {
    let id = SessionId::from(id);
    let matches = state.coordinator.search(&id, &query.q).await?;
    Ok(Json(SearchResponse {
        session_id: id,
        query: query.q,
        count: matches.len(),
        matches,
    }))
}

async fn close_session_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.coordinator.close(&SessionId::from(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn stats_handler(State(state): State<SharedState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        stats: state.coordinator.stats().await,
        uptime_secs: (chrono::Utc::now() - state.started_at).num_seconds(),
    })
}

// ── WebSocket ─────────────────────────────────────────────────────────────

/// WebSocket frame from the client.
///
/// `{ "type": "chat", "message": "...", "session_id": "..." }`
#[derive(Debug, Deserialize)]
struct WsClientMessage {
    #[serde(rename = "type", default = "default_ws_type")]
    msg_type: String,
    message: String,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    max_tokens: Option<usize>,
    #[serde(default)]
    temperature: Option<f32>,
}

fn default_ws_type() -> String {
    "chat".into()
}

/// WebSocket frame sent back for every client frame.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsServerMessage {
    Response(AssistResponse),
    Error(ErrorResponse),
}

impl WsServerMessage {
    fn invalid(error: String) -> Self {
        Self::Error(ErrorResponse {
            error,
            kind: "invalid_message".into(),
        })
    }
}

/// `GET /v1/ws` — chat over a WebSocket.
///
/// Frames on one connection are answered in order. Each frame names its
/// session, so one socket can drive several sessions.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

async fn handle_ws_connection(mut socket: WebSocket, state: SharedState) {
    info!("WebSocket connection established");

    while let Some(msg) = socket.recv().await {
        let text = match msg {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => continue,
            Err(_) => break,
        };

        let reply = ws_reply(&state, text.as_str()).await;
        let json = match serde_json::to_string(&reply) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to encode WebSocket reply");
                continue;
            }
        };
        if socket.send(WsMessage::Text(json.into())).await.is_err() {
            break;
        }
    }

    info!("WebSocket connection closed");
}

/// Answer one client frame.
async fn ws_reply(state: &SharedState, raw: &str) -> WsServerMessage {
    let frame: WsClientMessage = match serde_json::from_str(raw) {
        Ok(frame) => frame,
        Err(e) => return WsServerMessage::invalid(format!("Invalid message: {e}")),
    };
    if frame.msg_type != "chat" {
        return WsServerMessage::invalid(format!("Unknown message type: '{}'", frame.msg_type));
    }

    let request = assist_request(
        frame.session_id,
        Task::chat(frame.message),
        frame.max_tokens,
        frame.temperature,
    );
    match state.coordinator.handle(request).await {
        Ok(response) => WsServerMessage::Response(response),
        Err(e) => WsServerMessage::Error(ErrorResponse::from(&e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GatewayState;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use localcoder_agent::Coordinator;
    use localcoder_config::AppConfig;
    use localcoder_core::engine::{
        AbortSignal, Generation, GenerationParams, InferenceEngine, TokenUsage,
    };
    use localcoder_core::error::EngineError;
    use std::sync::Arc;
    use tower::ServiceExt;

    /// Lightweight mock engine for gateway tests.
    struct MockEngine {
        reply: Result<String, EngineError>,
    }

    #[async_trait::async_trait]
    impl InferenceEngine for MockEngine {
        fn model_id(&self) -> &str {
            "gateway-mock"
        }

        async fn generate(
            &self,
            _prompt: &str,
            _params: &GenerationParams,
            _abort: AbortSignal,
        ) -> Result<Generation, EngineError> {
            self.reply.clone().map(|text| Generation {
                text,
                usage: TokenUsage::new(10, 5),
            })
        }

        async fn reset(&self) -> Result<(), EngineError> {
            Ok(())
        }
    }

    fn state_with(reply: Result<String, EngineError>) -> SharedState {
        let coordinator =
            Coordinator::from_config(&AppConfig::default(), Box::new(MockEngine { reply }), None)
                .unwrap();
        Arc::new(GatewayState::new(Arc::new(coordinator)))
    }

    fn test_state() -> SharedState {
        state_with(Ok("Mock response".into()))
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn chat_returns_response() {
        let app = v1_router(test_state());
        let req = post_json(
            "/chat",
            serde_json::json!({"session_id": "web-1", "message": "Hello"}),
        );

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json: AssistResponse = body_json(response).await;
        assert_eq!(json.response_text, "Mock response");
        assert_eq!(json.session_id, SessionId::from("web-1"));
        assert!(!json.cache_hit);
    }

    #[tokio::test]
    async fn chat_without_session_creates_one() {
        let app = v1_router(test_state());
        let response = app
            .oneshot(post_json("/chat", serde_json::json!({"message": "Hi"})))
            .await
            .unwrap();
        let json: AssistResponse = body_json(response).await;
        assert!(!json.session_id.as_str().is_empty());
    }

    #[tokio::test]
    async fn empty_message_is_bad_request() {
        let app = v1_router(test_state());
        let response = app
            .oneshot(post_json("/chat", serde_json::json!({"message": "   "})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json: ErrorResponse = body_json(response).await;
        assert_eq!(json.kind, "empty_prompt");
    }

    #[tokio::test]
    async fn huge_prompt_is_payload_too_large() {
        let app = v1_router(test_state());
        let response = app
            .oneshot(post_json(
                "/chat",
                serde_json::json!({"message": "x".repeat(20_000)}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn engine_failure_is_bad_gateway() {
        let app = v1_router(state_with(Err(EngineError::Generation("oom".into()))));
        let response = app
            .oneshot(post_json("/chat", serde_json::json!({"message": "Hello"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let json: ErrorResponse = body_json(response).await;
        assert_eq!(json.kind, "generation_failed");
    }

    #[tokio::test]
    async fn code_endpoints() {
        let state = test_state();
        for (uri, body) in [
            (
                "/code/generate",
                serde_json::json!({"prompt": "fizzbuzz", "language": "rust"}),
            ),
            ("/code/explain", serde_json::json!({"code": "print(1)"})),
            (
                "/code/debug",
                serde_json::json!({"code": "1/0", "error_message": "ZeroDivisionError"}),
            ),
        ] {
            let response = v1_router(state.clone())
                .oneshot(post_json(uri, body))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{uri}");
        }
    }

    #[tokio::test]
    async fn session_lifecycle() {
        let state = test_state();
        v1_router(state.clone())
            .oneshot(post_json(
                "/chat",
                serde_json::json!({"session_id": "life", "message": "Explain traits"}),
            ))
            .await
            .unwrap();

        let get = |uri: &str| Request::builder().uri(uri).body(Body::empty()).unwrap();

        let response = v1_router(state.clone())
            .oneshot(get("/sessions/life"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let session: SessionResponse = body_json(response).await;
        assert_eq!(session.turns.len(), 2);
        assert_eq!(session.stats.exchanges, 1);

        let response = v1_router(state.clone())
            .oneshot(get("/sessions/life/search?q=TRAITS"))
            .await
            .unwrap();
        let search: SearchResponse = body_json(response).await;
        assert_eq!(search.count, 1);

        let response = v1_router(state.clone())
            .oneshot(get("/sessions"))
            .await
            .unwrap();
        let list: SessionListResponse = body_json(response).await;
        assert_eq!(list.count, 1);

        let delete = Request::builder()
            .method("DELETE")
            .uri("/sessions/life")
            .body(Body::empty())
            .unwrap();
        let response = v1_router(state.clone()).oneshot(delete).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = v1_router(state.clone())
            .oneshot(get("/sessions/life"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn stats_reports_counters() {
        let state = test_state();
        for _ in 0..2 {
            v1_router(state.clone())
                .oneshot(post_json("/chat", serde_json::json!({"message": "same"})))
                .await
                .unwrap();
        }
        let response = v1_router(state)
            .oneshot(Request::builder().uri("/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json: serde_json::Value = body_json(response).await;
        assert_eq!(json["cache"]["hits"], 1);
        assert_eq!(json["dispatcher"]["completed"], 1);
        assert_eq!(json["dispatcher"]["model_id"], "gateway-mock");
    }

    #[tokio::test]
    async fn ws_route_exists() {
        let response = v1_router(test_state())
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        // A plain GET is not an upgrade, but the route is there.
        assert_ne!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn ws_chat_frame_gets_response_frame() {
        let state = test_state();
        let raw = serde_json::json!({"type": "chat", "message": "hi", "session_id": "sock"});
        let reply = ws_reply(&state, &raw.to_string()).await;

        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["type"], "response");
        assert_eq!(json["response_text"], "Mock response");
        assert_eq!(
            state
                .coordinator
                .history(&SessionId::from("sock"))
                .await
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn ws_bad_frames_get_error_frames() {
        let state = test_state();
        for raw in [
            "not json",
            r#"{"type": "upload", "message": "x"}"#,
            r#"{"message": "   "}"#,
        ] {
            match ws_reply(&state, raw).await {
                WsServerMessage::Error(err) => assert!(
                    err.kind == "invalid_message" || err.kind == "empty_prompt",
                    "{raw}: {}",
                    err.kind
                ),
                WsServerMessage::Response(r) => panic!("{raw}: unexpected reply {r:?}"),
            }
        }
    }

    #[test]
    fn error_status_mapping() {
        use localcoder_core::error::TimeoutPhase;
        use std::time::Duration;

        let cases = [
            (CoordinatorError::EmptyPrompt, StatusCode::BAD_REQUEST),
            (
                CoordinatorError::Timeout {
                    phase: TimeoutPhase::Queued,
                    after: Duration::from_secs(1),
                },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (CoordinatorError::Cancelled, StatusCode::SERVICE_UNAVAILABLE),
            (CoordinatorError::Unavailable, StatusCode::SERVICE_UNAVAILABLE),
            (
                CoordinatorError::SessionNotFound("x".into()),
                StatusCode::NOT_FOUND,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status(), status);
        }
    }
}
