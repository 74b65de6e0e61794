// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// Read-mostly observability surface under `/api/v1/`, plus the two write
// paths the engine accepts from outside: trade outcome intake and a manual
// Alpha decision trigger.
//
// CORS is configured permissively; the surface is meant for an operator
// dashboard on a private network.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::aggregator::Ticker;
use crate::app_state::AppContext;
use crate::goal::GoalError;

type Ctx = State<Arc<AppContext>>;

// =============================================================================
// Router construction
// =============================================================================

/// Build the REST + WebSocket router with CORS middleware and shared context.
pub fn router(ctx: Arc<AppContext>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Health ──────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        // ── Market data ─────────────────────────────────────────────
        .route("/api/v1/snapshots", get(snapshots))
        .route("/api/v1/snapshots/:symbol", get(snapshot))
        .route("/api/v1/market/:symbol", get(market))
        .route("/api/v1/confluence/:symbol", get(confluence))
        .route("/api/v1/features/:symbol", get(features))
        .route("/api/v1/cache/stats", get(cache_stats))
        // ── Goal ────────────────────────────────────────────────────
        .route("/api/v1/goal", get(goal_status))
        .route("/api/v1/goal/trades", post(record_trade))
        .route("/api/v1/goal/checkpoints", get(goal_checkpoints))
        .route("/api/v1/goal/recommendation", get(goal_recommendation))
        .route("/api/v1/goal/history", get(goal_history))
        // ── Alpha ───────────────────────────────────────────────────
        .route("/api/v1/alpha/latest", get(alpha_latest))
        .route("/api/v1/alpha/history", get(alpha_history))
        .route("/api/v1/alpha/trigger", post(alpha_trigger))
        // ── Event bridge ────────────────────────────────────────────
        .route("/api/v1/events", get(crate::api::ws::ws_handler))
        // ── Middleware & State ──────────────────────────────────────
        .layer(cors)
        .with_state(ctx)
}

fn not_found(what: String) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": what }))).into_response()
}

// =============================================================================
// Health
// =============================================================================

async fn health(State(ctx): Ctx) -> impl IntoResponse {
    Json(ctx.health())
}

// =============================================================================
// Market data
// =============================================================================

async fn snapshots(State(ctx): Ctx) -> impl IntoResponse {
    let all: Vec<Ticker> = ctx.aggregator.snapshots().iter().map(|t| t.as_ref().clone()).collect();
    Json(all)
}

async fn snapshot(State(ctx): Ctx, Path(symbol): Path<String>) -> Response {
    let symbol = symbol.to_uppercase();
    match ctx.aggregator.snapshot(&symbol) {
        Some(t) => Json(t.as_ref().clone()).into_response(),
        None => not_found(format!("no fresh snapshot for {symbol}")),
    }
}

/// Latest published market update, or a live computation when the market
/// task has not covered this instrument yet.
async fn market(State(ctx): Ctx, Path(symbol): Path<String>) -> Response {
    let symbol = symbol.to_uppercase();
    match ctx.market.latest(&symbol) {
        Some(update) => Json(update).into_response(),
        None => Json(json!({
            "symbol": symbol,
            "metrics": ctx.market.metrics(&symbol),
            "regime": null,
        }))
        .into_response(),
    }
}

async fn confluence(State(ctx): Ctx, Path(symbol): Path<String>) -> Response {
    let symbol = symbol.to_uppercase();
    let report = ctx.mtf.latest(&symbol).unwrap_or_else(|| ctx.mtf.analyze(&symbol));
    Json(report).into_response()
}

async fn features(State(ctx): Ctx, Path(symbol): Path<String>) -> Response {
    let symbol = symbol.to_uppercase();
    match ctx.cache.get(&symbol) {
        Some(f) => Json(f).into_response(),
        None => not_found(format!("no cached features for {symbol}")),
    }
}

async fn cache_stats(State(ctx): Ctx) -> impl IntoResponse {
    Json(ctx.cache.stats())
}

// =============================================================================
// Goal
// =============================================================================

async fn goal_status(State(ctx): Ctx) -> impl IntoResponse {
    let today = Utc::now().date_naive();
    ctx.goal.roll_over(today);
    Json(ctx.goal.status_at(today))
}

#[derive(Debug, Deserialize)]
struct TradeRequest {
    #[serde(default)]
    date: Option<NaiveDate>,
    is_win: bool,
    profit_pct: f64,
}

fn goal_error_status(e: &GoalError) -> StatusCode {
    match e {
        GoalError::PriorMonth { .. } => StatusCode::CONFLICT,
        GoalError::FutureMonth { .. } | GoalError::InvalidReturn(_) => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

async fn record_trade(
    State(ctx): Ctx,
    Json(req): Json<TradeRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let today = Utc::now().date_naive();
    ctx.goal.roll_over(today);

    match ctx.goal.record_trade_at(today, req.date, req.is_win, req.profit_pct) {
        Ok(progress) => Ok((StatusCode::CREATED, Json(progress))),
        Err(e) => {
            warn!(error = %e, "trade rejected");
            Err((goal_error_status(&e), Json(json!({ "error": e.to_string() }))))
        }
    }
}

async fn goal_checkpoints(State(ctx): Ctx) -> impl IntoResponse {
    ctx.goal.roll_over(Utc::now().date_naive());
    Json(ctx.goal.weekly_checkpoints())
}

async fn goal_recommendation(State(ctx): Ctx) -> impl IntoResponse {
    ctx.goal.roll_over(Utc::now().date_naive());
    Json(ctx.goal.strategic_recommendation())
}

async fn goal_history(State(ctx): Ctx) -> impl IntoResponse {
    Json(ctx.goal.history())
}

// =============================================================================
// Alpha
// =============================================================================

async fn alpha_latest(State(ctx): Ctx) -> Response {
    match ctx.alpha.latest() {
        Some(d) => Json(d).into_response(),
        None => not_found("no decision yet".to_string()),
    }
}

async fn alpha_history(State(ctx): Ctx) -> impl IntoResponse {
    Json(ctx.alpha.mode_history())
}

async fn alpha_trigger(State(ctx): Ctx) -> impl IntoResponse {
    ctx.alpha.request_cycle();
    info!("alpha decision cycle requested via API");
    (
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "scheduled",
            "server_time": Utc::now().timestamp_millis(),
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sealed_month_is_a_conflict() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 31).unwrap();
        assert_eq!(goal_error_status(&GoalError::PriorMonth { date }), StatusCode::CONFLICT);
        assert_eq!(
            goal_error_status(&GoalError::InvalidReturn(f64::NAN)),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn trade_request_date_is_optional() {
        let req: TradeRequest = serde_json::from_str(r#"{ "is_win": true, "profit_pct": 1.2 }"#).unwrap();
        assert!(req.date.is_none());
        let req: TradeRequest =
            serde_json::from_str(r#"{ "date": "2026-06-05", "is_win": false, "profit_pct": -0.4 }"#).unwrap();
        assert_eq!(req.date, NaiveDate::from_ymd_opt(2026, 6, 5));
    }
}
