use std::sync::Arc;

use axum::extract::{Query, Request, State};
use axum::http::header;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use jotter_core::bulk::{BulkAction, BulkReport, BulkRunner};
use jotter_core::export::{render_records_export, ExportFormat};
use jotter_core::limiter::{LimiterMetricsSnapshot, OperationClass, RateLimiter};
use jotter_core::models::{RecordId, RunSummary, SyncReport};
use jotter_core::net::{HttpProbe, NetworkStatus, SampledNetworkMonitor};
use jotter_core::sync::{HttpTransport, SyncDirection, SyncOrchestrator, SyncRequest};
use jotter_core::RecordService;

use crate::config::AppConfig;
use crate::error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    service: RecordService,
    orchestrator: Arc<SyncOrchestrator>,
    bulk_runner: Arc<BulkRunner>,
    monitor: Arc<SampledNetworkMonitor>,
    limiter: Arc<RateLimiter>,
}

impl AppState {
    /// Wire the engine from configuration. The orchestrator receives all
    /// of its collaborators explicitly so nothing reaches for globals.
    pub async fn from_config(
        config: Arc<AppConfig>,
        service: RecordService,
    ) -> Result<Self, jotter_core::Error> {
        let probe = Arc::new(HttpProbe::new(
            config.probe_url.clone(),
            config.transport_timeout,
            config.transport_timeout / 2,
        )?);
        let monitor = Arc::new(SampledNetworkMonitor::new(
            probe,
            config.engine.network_refresh,
        ));
        let limiter = Arc::new(RateLimiter::new(config.engine.limits));
        let transport = Arc::new(HttpTransport::new(
            &config.remote_url,
            config.transport_timeout,
        )?);

        let orchestrator = Arc::new(SyncOrchestrator::new(
            service.clone(),
            transport,
            monitor.clone(),
            limiter.clone(),
            config.engine.clone(),
        ));
        let bulk_runner = Arc::new(BulkRunner::new(
            service.clone(),
            monitor.clone(),
            limiter.clone(),
            config.engine.clone(),
        ));

        Ok(Self {
            config,
            service,
            orchestrator,
            bulk_runner,
            monitor,
            limiter,
        })
    }

    pub fn orchestrator(&self) -> Arc<SyncOrchestrator> {
        self.orchestrator.clone()
    }
}

pub fn app_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route(
            "/sync",
            post(run_sync).get(sync_status).delete(clear_history),
        )
        .route("/bulk", post(run_bulk))
        .route("/export", get(export_records))
        .route_layer(middleware::from_fn(require_owner));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/v1", protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

/// Owner identity for a request.
///
/// Carried in the `X-Owner-Id` header; the identity provider in front of
/// this service is expected to have verified it.
#[derive(Debug, Clone)]
pub struct AuthenticatedOwner {
    pub owner_id: String,
}

async fn require_owner(mut request: Request, next: Next) -> Result<Response, ApiError> {
    let owner_id = request
        .headers()
        .get("x-owner-id")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::unauthorized("Missing X-Owner-Id header"))?
        .to_string();

    request
        .extensions_mut()
        .insert(AuthenticatedOwner { owner_id });
    Ok(next.run(request).await)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    rate_limit: LimiterMetricsSnapshot,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
        rate_limit: state.limiter.metrics_snapshot(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct SyncBody {
    #[serde(default)]
    force: bool,
    #[serde(default)]
    direction: SyncDirection,
    #[serde(default)]
    record_ids: Option<Vec<String>>,
}

async fn run_sync(
    State(state): State<AppState>,
    Extension(owner): Extension<AuthenticatedOwner>,
    body: Option<Json<SyncBody>>,
) -> Result<Json<SyncReport>, ApiError> {
    let body = body.map(|Json(body)| body).unwrap_or_default();

    let mut request = SyncRequest::new(&owner.owner_id)
        .with_direction(body.direction)
        .with_force(body.force);
    if let Some(raw_ids) = body.record_ids {
        request = request.with_record_ids(parse_record_ids(&raw_ids)?);
    }

    let report = state.orchestrator.run(request).await?;
    Ok(Json(report))
}

#[derive(Debug, Serialize)]
struct SyncStatusResponse {
    network: NetworkStatus,
    last_run: Option<RunSummary>,
    queue_length: usize,
}

async fn sync_status(
    State(state): State<AppState>,
    Extension(owner): Extension<AuthenticatedOwner>,
) -> Result<Json<SyncStatusResponse>, ApiError> {
    let network = state.monitor.sample().await;
    let last_run = state.service.last_run_summary(&owner.owner_id).await?;
    let queue_length = state
        .service
        .queue_len(&owner.owner_id, state.config.engine.attempt_ceiling)
        .await?;

    Ok(Json(SyncStatusResponse {
        network,
        last_run,
        queue_length,
    }))
}

#[derive(Debug, Serialize)]
struct ClearHistoryResponse {
    conflicts_removed: usize,
    entries_removed: usize,
}

async fn clear_history(
    State(state): State<AppState>,
    Extension(owner): Extension<AuthenticatedOwner>,
) -> Result<Json<ClearHistoryResponse>, ApiError> {
    let cutoff = state
        .config
        .engine
        .retention_cutoff(Utc::now().timestamp_millis());
    let (conflicts_removed, entries_removed) = state
        .service
        .purge_history(state.config.engine.attempt_ceiling, cutoff)
        .await?;

    tracing::info!(
        owner = %owner.owner_id,
        conflicts_removed,
        entries_removed,
        "Cleared resolved conflict history and stale queue entries"
    );

    Ok(Json(ClearHistoryResponse {
        conflicts_removed,
        entries_removed,
    }))
}

#[derive(Debug, Deserialize)]
struct BulkBody {
    action: BulkAction,
    record_ids: Vec<String>,
}

async fn run_bulk(
    State(state): State<AppState>,
    Extension(owner): Extension<AuthenticatedOwner>,
    Json(body): Json<BulkBody>,
) -> Result<Json<BulkReport>, ApiError> {
    let record_ids = parse_record_ids(&body.record_ids)?;
    let report = state
        .bulk_runner
        .apply(&owner.owner_id, body.action, &record_ids)
        .await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
struct ExportQuery {
    #[serde(default = "default_export_format")]
    format: ExportFormat,
}

const fn default_export_format() -> ExportFormat {
    ExportFormat::Json
}

async fn export_records(
    State(state): State<AppState>,
    Extension(owner): Extension<AuthenticatedOwner>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    state
        .limiter
        .check(OperationClass::Export, &owner.owner_id)
        .await?;

    const PAGE_SIZE: usize = 500;
    let mut records = Vec::new();
    let mut offset = 0usize;
    loop {
        let batch = state
            .service
            .list_records(&owner.owner_id, PAGE_SIZE, offset)
            .await?;
        let count = batch.len();
        records.extend(batch);
        if count < PAGE_SIZE {
            break;
        }
        offset += count;
    }

    let rendered = render_records_export(&records, query.format)
        .map_err(|error| ApiError::Internal(error.to_string()))?;
    let content_type = match query.format {
        ExportFormat::Json => "application/json",
        ExportFormat::Markdown => "text/markdown; charset=utf-8",
    };

    tracing::info!(
        owner = %owner.owner_id,
        records = records.len(),
        format = ?query.format,
        "Exported records"
    );

    Ok(([(header::CONTENT_TYPE, content_type)], rendered).into_response())
}

fn parse_record_ids(raw: &[String]) -> Result<Vec<RecordId>, ApiError> {
    raw.iter()
        .map(|value| {
            value
                .parse::<RecordId>()
                .map_err(|_| ApiError::bad_request(format!("invalid record id: {value}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_record_ids_rejects_garbage() {
        let err = parse_record_ids(&["not-a-uuid".to_string()]).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        let id = RecordId::new();
        let parsed = parse_record_ids(&[id.to_string()]).unwrap();
        assert_eq!(parsed, vec![id]);
    }

    #[test]
    fn sync_body_defaults_are_permissive() {
        let body: SyncBody = serde_json::from_str("{}").unwrap();
        assert!(!body.force);
        assert_eq!(body.direction, SyncDirection::Both);
        assert!(body.record_ids.is_none());
    }

    #[test]
    fn bulk_body_parses_action() {
        let body: BulkBody =
            serde_json::from_str(r#"{"action": "archive", "record_ids": []}"#).unwrap();
        assert_eq!(body.action, BulkAction::Archive);
    }
}
