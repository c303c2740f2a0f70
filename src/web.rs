//! HTTP API for strategy validation and backtesting.
//!
//! Each backtest request owns a cancellation token guarded by a drop guard, so a client
//! that disconnects mid-run stops its strategy script instead of leaving it to run out
//! its time budget.

use std::net::SocketAddr;

use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use backtest_engine::BacktestRun;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use strategy_engine::ValidationResult;
use strategy_lab_core::BacktestRequest;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::service::{BacktestService, RunBacktestParams};
use crate::store::{BacktestRecord, BacktestSummary};

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    service: BacktestService,
    prometheus_handle: Option<PrometheusHandle>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("service", &self.service)
            .field("metrics", &self.prometheus_handle.is_some())
            .finish()
    }
}

impl AppState {
    pub fn new(service: BacktestService, prometheus_handle: Option<PrometheusHandle>) -> Self {
        Self {
            service,
            prometheus_handle,
        }
    }
}

/// Builds the application router.
pub fn router(state: AppState, max_payload_size: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_origin(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .route("/api/strategies/validate", post(validate_strategy))
        .route("/api/backtests/run", post(run_inline))
        .route("/api/backtests", get(list_backtests).post(run_backtest))
        .route("/api/backtests/:id", get(get_backtest))
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_payload_size))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Serves `app` on `addr` until `shutdown` resolves.
pub async fn serve(
    addr: SocketAddr,
    app: Router,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Strategy Lab API listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok", "version": crate::VERSION }))
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let metrics = state
        .prometheus_handle
        .as_ref()
        .map(PrometheusHandle::render)
        .unwrap_or_default();
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics,
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValidateRequest {
    code: String,
}

async fn validate_strategy(
    State(state): State<AppState>,
    Json(payload): Json<ValidateRequest>,
) -> Json<ValidationResult> {
    Json(state.service.engine().validate(&payload.code))
}

async fn run_inline(
    State(state): State<AppState>,
    Json(request): Json<BacktestRequest>,
) -> ApiResult<Json<BacktestRun>> {
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let run = state.service.run_request(request, cancel).await?;
    Ok(Json(run))
}

async fn run_backtest(
    State(state): State<AppState>,
    Json(params): Json<RunBacktestParams>,
) -> ApiResult<(StatusCode, Json<BacktestRecord>)> {
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let record = state.service.run(params, cancel).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn list_backtests(State(state): State<AppState>) -> Json<Vec<BacktestSummary>> {
    Json(state.service.list().await)
}

async fn get_backtest(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<BacktestRecord>> {
    state
        .service
        .get(id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("backtest {id}")))
}
