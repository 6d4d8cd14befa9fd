use axum::{extract::State, http::StatusCode, Json};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::catalog::SchemaCatalog;
use crate::pipeline::conversation::ConversationHistory;
use crate::pipeline::{PipelineError, Reply, StatisticalAnswer};
use crate::web::state::AppState;

// Request types

#[derive(Debug, Deserialize)]
pub struct PipelineRequest {
    #[serde(default)]
    pub history: ConversationHistory,
    pub query: String,
}

// Response types

#[derive(Debug, Serialize)]
pub struct IntentResponse {
    pub statistical: bool,
}

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: String,
    pub uptime_seconds: i64,
    pub table_count: usize,
    pub embedding_enabled: bool,
    pub model: String,
}

/// Maps pipeline failures onto HTTP statuses.
///
/// Exhausted retries report the last database error verbatim.
fn pipeline_error(err: PipelineError) -> (StatusCode, String) {
    let status = match &err {
        PipelineError::EmptyQuery => StatusCode::BAD_REQUEST,
        PipelineError::ExhaustedRetries { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        PipelineError::Classification(_)
        | PipelineError::Rewrite(_)
        | PipelineError::Conversation(_)
        | PipelineError::Summarization(_) => StatusCode::BAD_GATEWAY,
        PipelineError::Schema(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        error!("Request failed: {}", err);
    } else {
        warn!("Request rejected: {}", err);
    }
    (status, err.to_string())
}

// API Implementations

pub async fn classify_intent(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PipelineRequest>,
) -> Result<Json<IntentResponse>, (StatusCode, String)> {
    let statistical = state
        .pipeline
        .classify_intent(&request.history, &request.query)
        .await
        .map_err(pipeline_error)?;

    Ok(Json(IntentResponse { statistical }))
}

pub async fn answer_query(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PipelineRequest>,
) -> Result<Json<StatisticalAnswer>, (StatusCode, String)> {
    let start = Instant::now();
    info!("Answering statistical query: {}", request.query);

    let answer = state
        .pipeline
        .answer_statistical_query(&request.history, &request.query)
        .await
        .map_err(pipeline_error)?;

    info!(
        "Answered in {} ms after {} attempt(s), {} rows",
        start.elapsed().as_millis(),
        answer.attempts.len(),
        answer.rows.len()
    );
    Ok(Json(answer))
}

pub async fn respond(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PipelineRequest>,
) -> Result<Json<Reply>, (StatusCode, String)> {
    let reply = state
        .pipeline
        .respond(&request.history, &request.query)
        .await
        .map_err(pipeline_error)?;

    Ok(Json(reply))
}

pub async fn get_schema(State(state): State<Arc<AppState>>) -> Json<SchemaCatalog> {
    Json(state.pipeline.catalog().clone())
}

pub async fn system_status(State(state): State<Arc<AppState>>) -> Json<SystemStatus> {
    let now = chrono::Utc::now();
    let uptime = now.signed_duration_since(state.startup_time).num_seconds();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
        table_count: state.pipeline.catalog().table_count(),
        embedding_enabled: state.pipeline.is_gating(),
        model: state.config.llm.model.clone(),
    })
}
