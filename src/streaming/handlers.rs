use super::server::ServerState;
use super::session::{StreamSession, BOUNDARY};
use axum::{
    body::Body,
    extract::State,
    http::{header, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::{mpsc, OwnedSemaphorePermit};
use tracing::{debug, info, warn};

/// Chunks queued between a session and its response body; one frame part is three
const STREAM_CHANNEL_DEPTH: usize = 3;

/// Reserve one frame client slot, or build the 503 for a full server
fn reserve_client_slot(state: &ServerState, kind: &str) -> Result<OwnedSemaphorePermit, Response> {
    Arc::clone(&state.client_slots)
        .try_acquire_owned()
        .map_err(|_| {
            state.stats.client_rejected();
            warn!(
                "Rejecting {} client, all {} frame client slots in use",
                kind, state.max_frame_clients
            );
            (StatusCode::SERVICE_UNAVAILABLE, "Too many clients\n").into_response()
        })
}

/// Handler for the multipart live stream on `/`
pub async fn stream_handler(State(state): State<ServerState>) -> Response {
    let slot = match reserve_client_slot(&state, "stream") {
        Ok(slot) => slot,
        Err(response) => return response,
    };

    let (tx, mut rx) = mpsc::channel::<Bytes>(STREAM_CHANNEL_DEPTH);
    let session = StreamSession::new(Arc::clone(&state.frames), tx, Arc::clone(&state.stats));
    let stats = Arc::clone(&state.stats);
    let shutdown = state.shutdown.clone();

    stats.client_connected();
    info!("Stream client connected ({} active)", stats.active_clients());

    tokio::spawn(async move {
        let _slot = slot;
        let frames_sent = session.run(shutdown).await;
        stats.client_disconnected();
        info!(
            "Stream client disconnected after {} frames ({} active)",
            frames_sent,
            stats.active_clients()
        );
    });

    let body = async_stream::stream! {
        while let Some(chunk) = rx.recv().await {
            yield Ok::<_, Infallible>(chunk);
        }
    };

    (
        StatusCode::OK,
        [
            (
                header::CONTENT_TYPE,
                format!("multipart/x-mixed-replace; boundary={}", BOUNDARY),
            ),
            (header::CACHE_CONTROL, "no-cache, private".to_string()),
            (header::PRAGMA, "no-cache".to_string()),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

/// Handler for a single JPEG on `/jpg`
pub async fn snapshot_handler(State(state): State<ServerState>) -> Response {
    let slot = match reserve_client_slot(&state, "snapshot") {
        Ok(slot) => slot,
        Err(response) => return response,
    };

    let buffer = match state.frames.acquire().await {
        Ok(buffer) => buffer,
        Err(e) => {
            state.stats.record_camera_fault();
            warn!("Camera capture failed: {}", e);
            return (StatusCode::SERVICE_UNAVAILABLE, format!("Camera unavailable: {}\n", e))
                .into_response();
        }
    };

    state.stats.record_snapshot();
    let length = buffer.len();
    debug!("Serving snapshot ({} bytes)", length);

    // The body owns the buffer and the client slot until the bytes are
    // written; a client that leaves early drops the body and both with it
    let frames = Arc::clone(&state.frames);
    let body = async_stream::stream! {
        let _slot = slot;
        yield Ok::<_, Infallible>(buffer.bytes());
        frames.release(buffer);
    };

    (
        StatusCode::OK,
        [
            (
                header::CONTENT_DISPOSITION,
                "inline; filename=capture.jpg".to_string(),
            ),
            (header::CONTENT_TYPE, "image/jpeg".to_string()),
            (header::CONTENT_LENGTH, length.to_string()),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

/// Handler for health check endpoint
pub async fn health_handler(State(state): State<ServerState>) -> impl IntoResponse {
    let timelapse = state
        .persister_stats
        .as_ref()
        .map(|stats| stats.lock().clone());

    let health_info = serde_json::json!({
        "status": "healthy",
        "camera": {
            "backend": state.frames.backend(),
            "frames": state.frames.stats(),
        },
        "streaming": {
            "max_frame_clients": state.max_frame_clients,
            "stats": state.stats.snapshot(),
        },
        "timelapse": timelapse,
    });

    (StatusCode::OK, Json(health_info))
}

/// Diagnostic page for every request no route serves
pub async fn fallback_handler(method: Method, uri: Uri) -> impl IntoResponse {
    let arguments = uri
        .query()
        .map(|query| query.split('&').filter(|arg| !arg.is_empty()).count())
        .unwrap_or(0);

    let message = format!(
        "Server is running!\n\nURI: {}\nMethod: {}\nArguments: {}\n",
        uri.path(),
        method,
        arguments
    );

    (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain")], message)
}
