use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::api::AppState;

pub fn system_router() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/info", get(info))
}

#[derive(Serialize)]
struct SystemInfo {
    version: &'static str,
    max_sessions: usize,
    active_sessions: usize,
}

async fn index() -> &'static str {
    "system route!"
}

async fn info(State(state): State<AppState>) -> Json<SystemInfo> {
    let pool = state.pool.lock().await;
    Json(SystemInfo {
        version: env!("CARGO_PKG_VERSION"),
        max_sessions: pool.max_sessions(),
        active_sessions: pool.len(),
    })
}
