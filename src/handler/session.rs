use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use crate::{
    api::AppState,
    handler::ApiJsonResult,
    media::types::{CodecFamily, VideoQuality},
    pool::Activation,
    session::{SessionStatus, StreamTarget},
};

pub fn session_router() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/list", get(list_sessions))
        .route("/toggle", post(toggle_session))
        .route("/update", post(update_session))
        .route("/remove/{camera_id}", get(remove_session))
}

#[derive(Serialize, Deserialize)]
struct SessionRequest {
    camera_id: String,
    channel: Option<u32>,
    /// Codec name ("h264", "hevc") or camera codec id ("4", "5").
    codec: Option<String>,
    quality: Option<VideoQuality>,
}

impl SessionRequest {
    fn into_target(self, default_codec: Option<CodecFamily>) -> anyhow::Result<StreamTarget> {
        let codec = match self.codec.as_deref() {
            Some(codec) => Some(codec.parse::<CodecFamily>()?),
            None => default_codec,
        };
        Ok(StreamTarget {
            camera_id: self.camera_id,
            channel: self.channel.unwrap_or(0),
            codec,
            quality: self.quality,
        })
    }
}

#[derive(Serialize)]
struct UpdateResponse {
    epoch: u64,
}

async fn index() -> &'static str {
    "session route!"
}

async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionStatus>> {
    Json(state.pool.lock().await.snapshot())
}

async fn toggle_session(
    State(state): State<AppState>,
    Json(request): Json<SessionRequest>,
) -> ApiJsonResult<Activation> {
    let target = request.into_target(state.default_codec)?;
    let activation = state.pool.lock().await.activate(target).await?;
    Ok(Json(activation))
}

async fn update_session(
    State(state): State<AppState>,
    Json(request): Json<SessionRequest>,
) -> ApiJsonResult<UpdateResponse> {
    let target = request.into_target(state.default_codec)?;
    let epoch = state.pool.lock().await.update(target).await?;
    Ok(Json(UpdateResponse { epoch }))
}

async fn remove_session(
    State(state): State<AppState>,
    Path(camera_id): Path<String>,
) -> ApiJsonResult<String> {
    if state.pool.lock().await.deactivate(&camera_id).await {
        return Ok(Json("success".to_string()));
    }
    Err(anyhow::anyhow!("camera {} is not active", camera_id).into())
}
