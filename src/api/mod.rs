//! HTTP control surface and read interface.
//!
//! The core exposes three verbs to the outside: ingest, run the pipeline,
//! and submit manual input; plus narrow reads (deal search, alerts,
//! summary counters).

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::error;

use crate::config::AttributionConfig;
use crate::edgar::EdgarClient;
use crate::ingest::ingest_company_filings;
use crate::models::{AlertKind, AtomicFact, Deal, DealState, FinancingEvent, FinancingParticipant};
use crate::pipeline::{run_pipeline, submit_manual_input};
use crate::storage::{DealFilter, GraphStore};

/// Shared application state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<GraphStore>,
    pub edgar: Arc<EdgarClient>,
    pub attribution: Arc<AttributionConfig>,
}

struct ApiError(anyhow::Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(error = %self.0, "request failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": self.0.to_string() })),
        )
            .into_response()
    }
}

impl<E: Into<anyhow::Error>> From<E> for ApiError {
    fn from(e: E) -> Self {
        Self(e.into())
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/deals", get(list_deals))
        .route("/api/deals/:id", get(get_deal))
        .route("/api/alerts", get(list_alerts))
        .route("/api/alerts/unresolved", get(list_unresolved_alerts))
        .route("/api/alerts/:id/resolve", post(resolve_alert))
        .route("/api/alerts/:id/manual-input", post(manual_input))
        .route("/api/pipeline/run", post(pipeline_run))
        .route("/api/ingest", post(ingest))
        .route("/api/stats/summary", get(stats_summary))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

#[derive(Debug, Deserialize)]
struct DealQuery {
    q: Option<String>,
    is_sponsor_backed: Option<bool>,
    market_tag: Option<String>,
    state: Option<String>,
    #[serde(default)]
    offset: usize,
    limit: Option<usize>,
}

async fn list_deals(
    State(state): State<AppState>,
    Query(query): Query<DealQuery>,
) -> Result<Json<Vec<Deal>>, ApiError> {
    let filter = DealFilter {
        query: query.q,
        is_sponsor_backed: query.is_sponsor_backed,
        market_tag: query.market_tag,
        state: query.state.as_deref().and_then(DealState::parse),
        limit: query.limit.unwrap_or(50).min(200),
        offset: query.offset,
    };
    Ok(Json(state.store.search_deals(&filter)?))
}

#[derive(Debug, Serialize)]
struct EventDetail {
    #[serde(flatten)]
    event: FinancingEvent,
    participants: Vec<FinancingParticipant>,
}

#[derive(Debug, Serialize)]
struct DealDetail {
    #[serde(flatten)]
    deal: Deal,
    facts: Vec<AtomicFact>,
    financing_events: Vec<EventDetail>,
}

async fn get_deal(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let Some(deal) = state.store.deal_by_id(id)? else {
        return Ok((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "deal not found" })),
        )
            .into_response());
    };
    let facts = state.store.facts_by_deal(id)?;
    let mut financing_events = Vec::new();
    for event in state.store.events_by_deal(id)? {
        let participants = state.store.participants_by_event(event.id)?;
        financing_events.push(EventDetail {
            event,
            participants,
        });
    }
    Ok(Json(DealDetail {
        deal,
        facts,
        financing_events,
    })
    .into_response())
}

#[derive(Debug, Deserialize)]
struct AlertQuery {
    alert_type: Option<String>,
    is_resolved: Option<bool>,
    #[serde(default)]
    offset: usize,
    limit: Option<usize>,
}

async fn list_alerts(
    State(state): State<AppState>,
    Query(query): Query<AlertQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let kind = query.alert_type.as_deref().and_then(AlertKind::parse);
    let alerts = state.store.list_alerts(
        kind,
        query.is_resolved,
        query.limit.unwrap_or(50).min(200),
        query.offset,
    )?;
    Ok(Json(serde_json::to_value(alerts)?))
}

async fn list_unresolved_alerts(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let alerts = state.store.list_alerts(None, Some(false), 50, 0)?;
    Ok(Json(serde_json::to_value(alerts)?))
}

#[derive(Debug, Deserialize)]
struct ResolveRequest {
    resolved_by: String,
    resolution_notes: Option<String>,
}

async fn resolve_alert(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<ResolveRequest>,
) -> Result<Response, ApiError> {
    let resolved = state.store.resolve_alert(
        id,
        &request.resolved_by,
        request.resolution_notes.as_deref(),
    )?;
    if !resolved {
        return Ok((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "alert not found" })),
        )
            .into_response());
    }
    Ok(Json(json!({ "status": "resolved", "alert_id": id })).into_response())
}

#[derive(Debug, Deserialize)]
struct ManualInputRequest {
    input_type: String,
    data: serde_json::Value,
    entered_by: String,
    notes: Option<String>,
}

async fn manual_input(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<ManualInputRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let input_id = submit_manual_input(
        &state.store,
        id,
        &request.input_type,
        request.data,
        &request.entered_by,
        request.notes.as_deref(),
    )?;
    Ok(Json(json!({
        "status": "submitted",
        "manual_input_id": input_id,
        "alert_id": id,
    })))
}

async fn pipeline_run(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let store = state.store.clone();
    let config = state.attribution.clone();
    // The batch stages block; keep them off the IO runtime.
    let report =
        tokio::task::spawn_blocking(move || run_pipeline(&store, &config)).await??;
    Ok(Json(json!({ "status": "completed", "results": report })))
}

#[derive(Debug, Deserialize)]
struct IngestRequest {
    cik: String,
    #[serde(default)]
    form_types: Vec<String>,
    start_date: Option<String>,
    end_date: Option<String>,
}

async fn ingest(
    State(state): State<AppState>,
    Json(request): Json<IngestRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let report = ingest_company_filings(
        &state.store,
        &state.edgar,
        &request.cik,
        &request.form_types,
        request.start_date.as_deref(),
        request.end_date.as_deref(),
    )
    .await?;
    Ok(Json(json!({ "status": "completed", "report": report })))
}

async fn stats_summary(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let summary = state.store.summary()?;
    Ok(Json(serde_json::to_value(summary)?))
}
