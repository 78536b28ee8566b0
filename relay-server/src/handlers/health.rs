use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::{Value, json};
use tracing::debug;

use crate::infra::app_state::AppState;

pub async fn ping_handler() -> Json<Value> {
    debug!("Ping endpoint called");
    Json(json!({
        "status": "ok",
        "message": "Inbox relay is running",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Store reachability, live subscription count and change feed state.
/// Answers 503 when the store does not respond.
pub async fn health_handler(State(state): State<AppState>) -> Response {
    let mut health_status = json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "checks": {}
    });

    let mut is_unhealthy = false;

    match state.store().ping().await {
        Ok(()) => {
            health_status["checks"]["store"] = json!({ "status": "healthy" });
        }
        Err(e) => {
            health_status["checks"]["store"] = json!({
                "status": "unhealthy",
                "error": e.to_string()
            });
            is_unhealthy = true;
        }
    }

    let subscriptions = state.subscriptions();
    health_status["checks"]["subscriptions"] = json!({
        "active": subscriptions.active_count(),
        "shutting_down": subscriptions.is_shutting_down(),
    });

    health_status["checks"]["feed"] = match state.fanout().feed() {
        Some(feed) => json!({
            "mode": "change_feed",
            "status": feed.status(),
            "reconnects": feed.reconnects(),
        }),
        None => json!({ "mode": "single_process" }),
    };

    if is_unhealthy {
        health_status["status"] = json!("unhealthy");
        (StatusCode::SERVICE_UNAVAILABLE, Json(health_status)).into_response()
    } else {
        Json(health_status).into_response()
    }
}
