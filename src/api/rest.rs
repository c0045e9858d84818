// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/` and are thin wrappers over
// `PredictionEngine`. Engine calls touch SQLite and may run a training pass,
// so mutating handlers hop onto the blocking pool.
//
// CORS is permissive; there is no authentication layer.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::engine::{OutcomeReport, PredictionEngine};
use crate::outcome_store::TradeRecord;
use crate::pipeline::Signal;
use crate::trainer::TrainReport;
use crate::types::Outcome;

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(engine: Arc<PredictionEngine>) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        // ── Ingestion ───────────────────────────────────────────────
        .route("/api/v1/outcomes", post(report_outcome))
        .route("/api/v1/outcomes/resolve", post(resolve_outcome))
        .route("/api/v1/predictions", post(record_prediction))
        .route("/api/v1/trades", get(trades))
        .route("/api/v1/trades/:trade_id", delete(delete_trade))
        // ── Learning ────────────────────────────────────────────────
        .route("/api/v1/train", post(train))
        .route("/api/v1/corrections/:pattern", get(correction))
        .route("/api/v1/session/reset", post(reset_session))
        .route("/api/v1/session/new", post(new_session))
        // ── Prediction ──────────────────────────────────────────────
        .route("/api/v1/predict", get(predict))
        .route("/api/v1/signal", get(signal))
        // ── Middleware & State ───────────────────────────────────────
        .layer(CorsLayer::permissive())
        .with_state(engine)
}

/// Run a synchronous engine call off the async workers.
async fn blocking<T, F>(engine: &Arc<PredictionEngine>, f: F) -> Result<T, StatusCode>
where
    T: Send + 'static,
    F: FnOnce(&PredictionEngine) -> T + Send + 'static,
{
    let engine = engine.clone();
    tokio::task::spawn_blocking(move || f(engine.as_ref()))
        .await
        .map_err(|e| {
            warn!(error = %e, "engine task failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

#[derive(Serialize)]
struct Accepted {
    ok: bool,
}

fn accepted(ok: bool, rejected: StatusCode) -> (StatusCode, Json<Accepted>) {
    let status = if ok { StatusCode::OK } else { rejected };
    (status, Json(Accepted { ok }))
}

// =============================================================================
// Health
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    trained_through: i64,
    server_time: i64,
}

async fn health(State(engine): State<Arc<PredictionEngine>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        trained_through: engine.stats().trained_through,
        server_time: Utc::now().timestamp_millis(),
    })
}

// =============================================================================
// Outcome ingestion
// =============================================================================

async fn report_outcome(
    State(engine): State<Arc<PredictionEngine>>,
    Json(report): Json<OutcomeReport>,
) -> impl IntoResponse {
    match blocking(&engine, move |e| e.report_outcome(report)).await {
        Ok(ok) => accepted(ok, StatusCode::CONFLICT).into_response(),
        Err(status) => status.into_response(),
    }
}

#[derive(Deserialize)]
struct RecordPrediction {
    trade_id: String,
    signal: Signal,
    #[serde(default = "Utc::now")]
    timestamp: DateTime<Utc>,
}

async fn record_prediction(
    State(engine): State<Arc<PredictionEngine>>,
    Json(body): Json<RecordPrediction>,
) -> impl IntoResponse {
    let recorded = blocking(&engine, move |e| {
        e.record_prediction(&body.trade_id, &body.signal, body.timestamp)
    })
    .await;
    match recorded {
        Ok(ok) => accepted(ok, StatusCode::CONFLICT).into_response(),
        Err(status) => status.into_response(),
    }
}

#[derive(Deserialize)]
struct ResolveOutcome {
    trade_id: String,
    actual: Outcome,
}

async fn resolve_outcome(
    State(engine): State<Arc<PredictionEngine>>,
    Json(body): Json<ResolveOutcome>,
) -> impl IntoResponse {
    match blocking(&engine, move |e| e.resolve_outcome(&body.trade_id, body.actual)).await {
        Ok(ok) => accepted(ok, StatusCode::NOT_FOUND).into_response(),
        Err(status) => status.into_response(),
    }
}

async fn delete_trade(
    State(engine): State<Arc<PredictionEngine>>,
    Path(trade_id): Path<String>,
) -> impl IntoResponse {
    match blocking(&engine, move |e| e.delete_trade(&trade_id)).await {
        Ok(ok) => accepted(ok, StatusCode::NOT_FOUND).into_response(),
        Err(status) => status.into_response(),
    }
}

#[derive(Deserialize)]
struct TradesQuery {
    #[serde(default = "default_trades_limit")]
    limit: usize,
    #[serde(default)]
    include_archived: bool,
}

fn default_trades_limit() -> usize {
    50
}

#[derive(Serialize)]
struct TradesResponse {
    total: usize,
    active: usize,
    trades: Vec<TradeRecord>,
}

async fn trades(
    State(engine): State<Arc<PredictionEngine>>,
    Query(q): Query<TradesQuery>,
) -> impl IntoResponse {
    let listed = blocking(&engine, move |e| {
        let stats = e.stats();
        TradesResponse {
            total: stats.total_trades,
            active: stats.active_trades,
            trades: e.recent_trades(q.limit, q.include_archived),
        }
    })
    .await;
    match listed {
        Ok(body) => Json(body).into_response(),
        Err(status) => status.into_response(),
    }
}

// =============================================================================
// Learning
// =============================================================================

#[derive(Deserialize)]
struct TrainRequest {
    #[serde(default)]
    include_archived: bool,
}

async fn train(
    State(engine): State<Arc<PredictionEngine>>,
    body: Option<Json<TrainRequest>>,
) -> impl IntoResponse {
    let include_archived = body.map(|Json(b)| b.include_archived).unwrap_or_default();
    let report: Result<TrainReport, _> =
        blocking(&engine, move |e| e.train_report(include_archived)).await;
    match report {
        Ok(report) => {
            info!(trained = report.trained, records = report.records, "training requested over API");
            Json(report).into_response()
        }
        Err(status) => status.into_response(),
    }
}

async fn correction(
    State(engine): State<Arc<PredictionEngine>>,
    Path(pattern): Path<String>,
) -> impl IntoResponse {
    match blocking(&engine, move |e| e.get_correction(&pattern)).await {
        Ok(Some(c)) => Json(c).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(status) => status.into_response(),
    }
}

#[derive(Serialize)]
struct SessionResponse {
    cleared_errors: usize,
    archived_trades: usize,
}

async fn reset_session(State(engine): State<Arc<PredictionEngine>>) -> impl IntoResponse {
    let cleared = engine.reset_session_memory();
    Json(SessionResponse {
        cleared_errors: cleared,
        archived_trades: 0,
    })
}

async fn new_session(State(engine): State<Arc<PredictionEngine>>) -> impl IntoResponse {
    let outcome = blocking(&engine, |e| {
        let cleared = e.stats().session_errors;
        (cleared, e.new_session())
    })
    .await;
    match outcome {
        Ok((cleared_errors, archived_trades)) => Json(SessionResponse {
            cleared_errors,
            archived_trades,
        })
        .into_response(),
        Err(status) => status.into_response(),
    }
}

// =============================================================================
// Prediction
// =============================================================================

async fn predict(State(engine): State<Arc<PredictionEngine>>) -> impl IntoResponse {
    match blocking(&engine, |e| e.predict()).await {
        Ok(signal) => Json(signal).into_response(),
        Err(status) => status.into_response(),
    }
}

async fn signal(State(engine): State<Arc<PredictionEngine>>) -> impl IntoResponse {
    match blocking(&engine, |e| e.signal()).await {
        Ok(signal) => Json(signal).into_response(),
        Err(status) => status.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime_config::EngineConfig;
    use crate::types::SignalSource;
    use axum::response::Response;

    fn engine(dir: &std::path::Path) -> Arc<PredictionEngine> {
        let config = EngineConfig {
            pattern_memory_path: dir.join("patterns.json"),
            strategy_weights_path: dir.join("weights.json"),
            ..EngineConfig::default()
        };
        Arc::new(PredictionEngine::in_memory(config).unwrap())
    }

    fn report(actual: Outcome, trade_id: &str) -> OutcomeReport {
        OutcomeReport::new(actual, None, SignalSource::External, Utc::now()).with_trade_id(trade_id)
    }

    fn status(r: impl IntoResponse) -> StatusCode {
        let response: Response = r.into_response();
        response.status()
    }

    #[tokio::test]
    async fn duplicate_report_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let e = engine(dir.path());
        let first = report_outcome(State(e.clone()), Json(report(Outcome::Big, "a"))).await;
        assert_eq!(status(first), StatusCode::OK);
        let second = report_outcome(State(e.clone()), Json(report(Outcome::Big, "a"))).await;
        assert_eq!(status(second), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn unknown_trade_and_pattern_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let e = engine(dir.path());
        let resolved = resolve_outcome(
            State(e.clone()),
            Json(ResolveOutcome {
                trade_id: "missing".into(),
                actual: Outcome::Small,
            }),
        )
        .await;
        assert_eq!(status(resolved), StatusCode::NOT_FOUND);
        let c = correction(State(e.clone()), Path("BBSS".to_string())).await;
        assert_eq!(status(c), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_reports_watermark() {
        let dir = tempfile::tempdir().unwrap();
        let e = engine(dir.path());
        let Json(h) = health(State(e)).await;
        assert_eq!(h.status, "ok");
        assert_eq!(h.trained_through, 0);
    }
}
