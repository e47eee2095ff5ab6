use crate::ws::ws_handler;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use parley_core::{Cat, CallHistoryItem, Message, ParleyError};
use parley_modes::{ModeConfig, ModeInfo};
use parley_session::{MessageStats, SessionManager, SessionSummary};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

pub type AppState = Arc<SessionManager>;

/// Error wrapper mapping [`ParleyError`] onto HTTP statuses.
pub struct ApiError(ParleyError);

impl From<ParleyError> for ApiError {
    fn from(e: ParleyError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ParleyError::NotFound(_) => StatusCode::NOT_FOUND,
            ParleyError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Parses a JSON request body, surfacing any mismatch as a 400.
fn parse_body<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, ApiError> {
    serde_json::from_str(body)
        .map_err(|e| ApiError(ParleyError::InvalidArgument(format!("invalid body: {}", e))))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub mode: Option<String>,
    pub mode_config: Option<ModeConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(default)]
    pub mentioned_cats: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchModeRequest {
    pub mode: String,
    pub mode_config: Option<ModeConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeResponse {
    pub mode: String,
    pub mode_config: ModeConfig,
}

/// Builds the full API router. CORS is permissive: the front-end is served
/// from anywhere during development.
pub fn build_router(manager: AppState) -> Router {
    Router::new()
        .route("/api/sessions", get(list_sessions).post(create_session))
        .route(
            "/api/sessions/{sessionId}",
            get(get_session).delete(delete_session),
        )
        .route(
            "/api/sessions/{sessionId}/messages",
            get(get_messages).post(send_message),
        )
        .route("/api/sessions/{sessionId}/stats", get(get_stats))
        .route("/api/sessions/{sessionId}/history", get(get_history))
        .route(
            "/api/sessions/{sessionId}/mode",
            get(get_mode).put(switch_mode),
        )
        .route("/api/sessions/{sessionId}/ws", get(ws_handler))
        .route("/api/modes", get(list_modes))
        .route("/api/cats", get(list_cats))
        .route("/api/cats/available", get(available_cats))
        .route("/api/cats/{catId}", get(get_cat))
        .layer(CorsLayer::permissive())
        .with_state(manager)
}

async fn list_sessions(State(manager): State<AppState>) -> Json<Vec<SessionSummary>> {
    Json(manager.list_sessions().await)
}

async fn create_session(
    State(manager): State<AppState>,
    body: String,
) -> ApiResult<Json<SessionSummary>> {
    let req: CreateSessionRequest = if body.trim().is_empty() {
        CreateSessionRequest::default()
    } else {
        parse_body(&body)?
    };
    let session = manager.create_session(req.mode, req.mode_config).await?;
    Ok(Json(session))
}

async fn get_session(
    State(manager): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<SessionSummary>> {
    Ok(Json(manager.get_session(&session_id).await?))
}

async fn delete_session(
    State(manager): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<StatusCode> {
    manager.delete_session(&session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_messages(
    State(manager): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Vec<Message>>> {
    Ok(Json(manager.get_messages(&session_id).await?))
}

async fn send_message(
    State(manager): State<AppState>,
    Path(session_id): Path<String>,
    body: String,
) -> ApiResult<Json<Message>> {
    let req: SendMessageRequest = parse_body(&body)?;
    let message = manager
        .send_message(&session_id, &req.content, &req.mentioned_cats)
        .await?;
    Ok(Json(message))
}

async fn get_stats(
    State(manager): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<MessageStats>> {
    Ok(Json(manager.get_stats(&session_id).await?))
}

async fn get_history(
    State(manager): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Vec<CallHistoryItem>>> {
    Ok(Json(manager.get_call_history(&session_id).await?))
}

async fn get_mode(
    State(manager): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<ModeResponse>> {
    let (mode, mode_config) = manager.current_mode(&session_id).await?;
    Ok(Json(ModeResponse { mode, mode_config }))
}

async fn switch_mode(
    State(manager): State<AppState>,
    Path(session_id): Path<String>,
    body: String,
) -> ApiResult<Json<ModeResponse>> {
    let req: SwitchModeRequest = parse_body(&body)?;
    manager
        .switch_mode(&session_id, &req.mode, req.mode_config)
        .await?;
    let (mode, mode_config) = manager.current_mode(&session_id).await?;
    Ok(Json(ModeResponse { mode, mode_config }))
}

async fn list_modes(State(manager): State<AppState>) -> Json<Vec<ModeInfo>> {
    Json(manager.list_modes())
}

async fn list_cats(State(manager): State<AppState>) -> Json<Vec<Cat>> {
    Json(manager.cats().await)
}

async fn available_cats(State(manager): State<AppState>) -> Json<Vec<Cat>> {
    Json(manager.available_cats().await)
}

async fn get_cat(
    State(manager): State<AppState>,
    Path(cat_id): Path<String>,
) -> ApiResult<Json<Cat>> {
    Ok(Json(manager.cat(&cat_id).await?))
}
