// src/api.rs
use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, rejection::PathRejection, Path, Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::config::{AppConfig, Environment};
use crate::llm::{QueryRewriter, RewriteError};
use crate::metrics::MetricsStore;
use crate::orchestrator::{Orchestrator, OrchestratorError, RunRequest};
use crate::query::schema::MAX_RESULTS_CAP;
use crate::query::QueryError;
use crate::store::{ProcessedRow, RunFilter, RunId, RunRecord, RunRepository, StoreError};

pub const MAX_QUERY_CHARS: usize = 512;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<AppConfig>,
    pub store: Arc<dyn RunRepository>,
    pub rewriter: Arc<dyn QueryRewriter>,
    pub orchestrator: Arc<Orchestrator>,
    pub metrics: Arc<MetricsStore>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/search-runs", get(list_search_runs).post(create_search_run))
        .route("/search-runs/{id}", get(get_search_run))
        .route("/debug/metrics", get(debug_metrics))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    Validation(String),
    NotFound(String),
    BadGateway(String),
    Internal(String),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "missing or invalid bearer token".into(),
            ),
            ApiError::Validation(m) => (StatusCode::BAD_REQUEST, "validation_error", m.clone()),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, "not_found", m.clone()),
            ApiError::BadGateway(m) => (StatusCode::BAD_GATEWAY, "upstream_error", m.clone()),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", m.clone()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, detail) = self.parts();
        (status, Json(json!({ "error": kind, "detail": detail }))).into_response()
    }
}

impl From<RewriteError> for ApiError {
    fn from(e: RewriteError) -> Self {
        match e {
            RewriteError::Validation(_) => ApiError::Validation(e.to_string()),
            RewriteError::Service(_) => ApiError::BadGateway(e.to_string()),
        }
    }
}

impl From<QueryError> for ApiError {
    fn from(e: QueryError) -> Self {
        ApiError::Validation(e.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        tracing::error!(error = %e, "persistence failure");
        ApiError::Internal(e.to_string())
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(e: OrchestratorError) -> Self {
        match e {
            OrchestratorError::AllProvidersFailed { .. } => ApiError::BadGateway(e.to_string()),
            OrchestratorError::Store(s) => s.into(),
        }
    }
}

/// Writes always need the token when one is configured; reads only in prod.
fn authorize(state: &AppState, headers: &HeaderMap, write: bool) -> Result<(), ApiError> {
    let Some(expected) = state.settings.bearer_token() else {
        return Ok(());
    };
    if !write && state.settings.environment != Environment::Prod {
        return Ok(());
    }
    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);
    match presented {
        Some(token) if token == expected => Ok(()),
        _ => Err(ApiError::Unauthorized),
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn healthz(State(state): State<AppState>) -> Json<serde_json::Value> {
    let db = match state.store.ping().await {
        Ok(()) => "ok",
        Err(e) => {
            tracing::warn!(error = %e, "health db ping failed");
            "error"
        }
    };
    Json(json!({
        "status": "ok",
        "env": state.settings.environment.as_str(),
        "provider": state.settings.search.provider.as_str(),
        "db": db,
    }))
}

/// Unknown keys are ignored here and on [`SearchRunRequest`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchOptions {
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub geo: Option<String>,
    #[serde(default, rename = "maxResults")]
    pub max_results: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct SearchRunRequest {
    pub query: String,
    #[serde(default)]
    pub options: Option<SearchOptions>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessedOut {
    pub url: String,
    pub providers: Vec<String>,
    pub confidence: u32,
}

impl From<&ProcessedRow> for ProcessedOut {
    fn from(r: &ProcessedRow) -> Self {
        Self {
            url: r.url.clone(),
            providers: r.providers.clone(),
            confidence: r.confidence,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchRunResponse {
    pub id: RunId,
    pub providers_used: Vec<String>,
    pub per_provider_query_used: BTreeMap<String, String>,
    pub processed: Vec<ProcessedOut>,
}

fn validate_request(body: &SearchRunRequest) -> Result<(), ApiError> {
    if body.query.trim().is_empty() {
        return Err(ApiError::Validation("query must not be empty".into()));
    }
    let len = body.query.chars().count();
    if len > MAX_QUERY_CHARS {
        return Err(ApiError::Validation(format!(
            "query length {len} exceeds {MAX_QUERY_CHARS} characters"
        )));
    }
    if let Some(m) = body.options.as_ref().and_then(|o| o.max_results) {
        if m == 0 || m > MAX_RESULTS_CAP {
            return Err(ApiError::Validation(format!("maxResults must be in 1..=100, got {m}")));
        }
    }
    Ok(())
}

async fn create_search_run(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<SearchRunRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SearchRunResponse>), ApiError> {
    authorize(&state, &headers, true)?;
    let Json(body) = body.map_err(|e| ApiError::Validation(e.body_text()))?;
    validate_request(&body)?;

    let rewritten = state.rewriter.rewrite(&body.query).await?;
    let options = body.options.clone().unwrap_or_default();
    let query = rewritten.query.with_overrides(
        options.lang.as_deref(),
        options.geo.as_deref(),
        options.max_results,
    )?;

    let out = state
        .orchestrator
        .run(RunRequest {
            original_query: body.query.clone(),
            rewritten_template: rewritten.template,
            query,
            run_config: json!({ "options": options }),
        })
        .await?;

    let resp = SearchRunResponse {
        id: out.run_id,
        providers_used: out.providers_used,
        per_provider_query_used: out.per_provider_query_used,
        processed: out
            .processed
            .iter()
            .map(|p| ProcessedOut {
                url: p.url().to_string(),
                providers: p.providers().to_vec(),
                confidence: p.confidence(),
            })
            .collect(),
    };
    Ok((StatusCode::CREATED, Json(resp)))
}

async fn get_search_run(
    State(state): State<AppState>,
    headers: HeaderMap,
    id: Result<Path<RunId>, PathRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    authorize(&state, &headers, false)?;
    let Path(id) = id.map_err(|e| ApiError::Validation(e.body_text()))?;

    let found = state
        .store
        .get_run(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("run not found".into()))?;

    let processed: Vec<ProcessedOut> = found.processed.iter().map(ProcessedOut::from).collect();
    Ok(Json(json!({
        "id": found.run.id,
        "query": found.run.query,
        "rewritten_template": found.run.rewritten_template,
        "providers_used": found.run.providers_used,
        "processed": processed,
    })))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub query: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

async fn list_search_runs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<RunRecord>>, ApiError> {
    authorize(&state, &headers, false)?;
    let filter = RunFilter {
        query: params.query,
        from: params.from,
        to: params.to,
    };
    Ok(Json(state.store.list_runs(&filter).await?))
}

async fn debug_metrics(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<crate::metrics::MetricsSnapshot>, ApiError> {
    authorize(&state, &headers, false)?;
    Ok(Json(state.metrics.snapshot()))
}
