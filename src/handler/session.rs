use axum::{
    extract::Path,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::{
    config,
    error::Error,
    handler::ApiJsonResult,
    manager,
    media::{
        session::SessionStatus,
        types::{QualityTier, SessionConfig, SinkKind},
    },
    source::CallbackSource,
};

pub fn session_router() -> Router {
    Router::new()
        .route("/", get(index))
        .route("/list", get(list_sessions))
        .route("/add", post(add_session))
        .route("/remove/{id}", get(remove_session))
        .route("/status/{id}", get(session_status))
}

#[derive(Serialize, Deserialize)]
struct SessionRequest {
    /// Generated when missing.
    id: Option<String>,
    device_id: String,
    channel: Option<u32>,
    sink: SinkRequest,
    quality: Option<QualityTier>,
    audio: Option<bool>,
    reconnect: Option<bool>,
}

#[derive(Serialize, Deserialize)]
struct SinkRequest {
    t: String,
    /// RTSP push target; defaults to the configured URL.
    url: Option<String>,
}

async fn index() -> &'static str {
    "session route!"
}

async fn list_sessions() -> Json<Vec<String>> {
    let sessions = manager::get_session_manager().read().await;
    Json(sessions.keys().cloned().collect())
}

async fn add_session(Json(req): Json<SessionRequest>) -> ApiJsonResult<String> {
    let sink = match req.sink.t.as_str() {
        "rtsp" => SinkKind::Rtsp {
            url: req
                .sink
                .url
                .unwrap_or_else(|| config::config().rtsp_url().to_string()),
        },
        "mjpeg" => SinkKind::Mjpeg,
        _ => return Err(anyhow::anyhow!("sink type is not supported").into()),
    };

    let session_config = SessionConfig::builder()
        .device_id(req.device_id)
        .channel(req.channel.unwrap_or(0))
        .quality(req.quality.unwrap_or_default())
        .enable_audio(req.audio.unwrap_or(false))
        .enable_reconnect(req.reconnect.unwrap_or(true))
        .sink(sink)
        .build();

    // The device SDK integration attaches to the session's source handle;
    // over plain HTTP the session starts out with no producer.
    let id = req
        .id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    manager::add_session(&id, session_config, Box::new(CallbackSource::new()), false).await?;
    Ok(Json(id))
}

async fn remove_session(Path(id): Path<String>) -> ApiJsonResult<String> {
    manager::remove_session(&id).await?;
    Ok(Json("success".to_string()))
}

async fn session_status(Path(id): Path<String>) -> ApiJsonResult<SessionStatus> {
    let session = manager::get_session(&id)
        .await
        .ok_or_else(|| Error::SessionNotFound(id))?;
    Ok(Json(session.status()))
}
