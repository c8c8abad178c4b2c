use crate::{
    config::StreamConfig,
    error::{LapsecamError, Result, StreamError},
    frame::FrameSource,
    timelapse::PersisterStatsHandle,
};
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::handlers::{fallback_handler, health_handler, snapshot_handler, stream_handler};
use super::stats::StreamStats;

/// Shared state for the Axum server
#[derive(Clone)]
pub struct ServerState {
    pub(crate) frames: Arc<FrameSource>,
    /// Shared by stream sessions and snapshots, one frame buffer each at most
    pub(crate) client_slots: Arc<Semaphore>,
    pub(crate) max_frame_clients: usize,
    pub(crate) stats: Arc<StreamStats>,
    pub(crate) persister_stats: Option<PersisterStatsHandle>,
    pub(crate) shutdown: CancellationToken,
}

impl ServerState {
    pub fn new(frames: Arc<FrameSource>, max_frame_clients: usize) -> Self {
        Self {
            frames,
            client_slots: Arc::new(Semaphore::new(max_frame_clients)),
            max_frame_clients,
            stats: Arc::new(StreamStats::default()),
            persister_stats: None,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_persister_stats(mut self, stats: PersisterStatsHandle) -> Self {
        self.persister_stats = Some(stats);
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn stats(&self) -> Arc<StreamStats> {
        Arc::clone(&self.stats)
    }
}

/// Routes served on the stream port
pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/", get(stream_handler).fallback(fallback_handler))
        .route("/jpg", get(snapshot_handler).fallback(fallback_handler))
        .route("/health", get(health_handler))
        .fallback(fallback_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// HTTP server for the live stream, snapshots and diagnostics
pub struct StreamServer {
    pub(crate) config: StreamConfig,
    pub(crate) state: ServerState,
}

impl StreamServer {
    /// Create a new streaming server
    pub fn new(config: StreamConfig, frames: Arc<FrameSource>) -> Self {
        let state = ServerState::new(frames, config.max_frame_clients);
        Self { config, state }
    }

    pub fn state(&self) -> &ServerState {
        &self.state
    }

    /// Serve until `shutdown` fires. Open streams are closed on shutdown.
    pub async fn start(&self, shutdown: CancellationToken) -> Result<()> {
        let state = self.state.clone().with_shutdown(shutdown.clone());
        let app = router(state);

        let addr = format!("{}:{}", self.config.ip, self.config.port);
        info!("Starting stream server on {}", addr);

        let listener =
            tokio::net::TcpListener::bind(&addr)
                .await
                .map_err(|e| StreamError::BindFailed {
                    address: addr.clone(),
                    source: e,
                })?;

        info!(
            "Stream server listening on {}",
            listener.local_addr().map(|a| a.to_string()).unwrap_or(addr)
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| StreamError::ServerFailed {
                details: format!("Server error: {}", e),
            })?;

        info!("Stream server stopped");
        Ok(())
    }
}

/// Stream server builder for configuration
pub struct StreamServerBuilder {
    config: Option<StreamConfig>,
    frames: Option<Arc<FrameSource>>,
    persister_stats: Option<PersisterStatsHandle>,
}

impl StreamServerBuilder {
    /// Create a new stream server builder
    pub fn new() -> Self {
        Self {
            config: None,
            frames: None,
            persister_stats: None,
        }
    }

    /// Set the stream configuration
    pub fn config(mut self, config: StreamConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the frame source shared with the persister
    pub fn frame_source(mut self, frames: Arc<FrameSource>) -> Self {
        self.frames = Some(frames);
        self
    }

    /// Report persister counters on the health endpoint
    pub fn persister_stats(mut self, stats: PersisterStatsHandle) -> Self {
        self.persister_stats = Some(stats);
        self
    }

    /// Build the stream server
    pub fn build(self) -> Result<StreamServer> {
        let config = self.config.ok_or_else(|| {
            LapsecamError::Stream(StreamError::StartupFailed {
                details: "Stream configuration is required".to_string(),
            })
        })?;

        let frames = self.frames.ok_or_else(|| {
            LapsecamError::Stream(StreamError::StartupFailed {
                details: "Frame source is required".to_string(),
            })
        })?;

        let mut server = StreamServer::new(config, frames);
        if let Some(stats) = self.persister_stats {
            server.state = server.state.with_persister_stats(stats);
        }
        Ok(server)
    }
}

impl Default for StreamServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
