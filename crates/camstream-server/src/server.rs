//! MJPEG HTTP server.
//!
//! This module provides the host streaming server that:
//! - Serves a single `GET` route with a `multipart/x-mixed-replace` body
//! - Lets one client at a time own the frame source
//! - Stops active streams when shut down or when the network link drops

use std::convert::Infallible;
use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, Notify};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use camstream_core::{FrameSource, LinkStatus, StopSignal, StreamSession};

use crate::sink::ChannelSink;

/// Chunks buffered between the session thread and the socket.
pub const CHUNK_QUEUE_DEPTH: usize = 4;

/// How long shutdown waits for open connections to flush.
///
/// A client that stopped reading never drains its socket; its connection is
/// abandoned after this delay.
pub const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Configuration for the streaming server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Route serving the stream.
    pub route: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            route: "/stream".to_string(),
        }
    }
}

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

struct AppState<S> {
    source: Arc<Mutex<S>>,
    stop: StopSignal,
    link: LinkStatus,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            stop: self.stop.clone(),
            link: self.link.clone(),
        }
    }
}

/// The MJPEG streaming server.
///
/// Owns the frame source for its whole lifetime. Dropping the server (or
/// completing [`serve`](Self::serve)) releases the route and the source.
pub struct StreamServer<S> {
    config: ServerConfig,
    state: AppState<S>,
}

impl<S> StreamServer<S>
where
    S: FrameSource + Send + 'static,
{
    /// Create a server streaming from `source`.
    ///
    /// Active streams end when `link` leaves the connected state.
    pub fn new(config: ServerConfig, source: S, link: LinkStatus) -> Self {
        Self {
            config,
            state: AppState {
                source: Arc::new(Mutex::new(source)),
                stop: StopSignal::new(),
                link,
            },
        }
    }

    /// Signal that ends every active stream.
    pub fn stop_signal(&self) -> StopSignal {
        self.state.stop.clone()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Build the router for the streaming route.
    pub fn router(&self) -> Router {
        Router::new()
            .route(&self.config.route, get(stream_handler::<S>))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind the configured address and serve until `shutdown` resolves.
    pub async fn run(self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves.
    ///
    /// On shutdown the stop signal is raised so open streams finish their
    /// current frame and close. Connections still open after
    /// [`SHUTDOWN_DRAIN_TIMEOUT`] are abandoned.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        info!("MJPEG stream listening on http://{}{}", addr, self.config.route);

        let stop = self.state.stop.clone();
        let router = self.router();
        let draining = Arc::new(Notify::new());
        let drain_started = draining.clone();

        let server = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown.await;
                info!("Stopping active streams");
                stop.stop();
                drain_started.notify_one();
            })
            .into_future();

        tokio::select! {
            result = server => result?,
            _ = async {
                draining.notified().await;
                tokio::time::sleep(SHUTDOWN_DRAIN_TIMEOUT).await;
            } => {
                warn!("Connections still open after {:?}, abandoning them", SHUTDOWN_DRAIN_TIMEOUT);
            }
        }

        info!("MJPEG server stopped");
        Ok(())
    }
}

/// Stream handler: runs one session on a blocking thread.
async fn stream_handler<S>(State(state): State<AppState<S>>) -> Response
where
    S: FrameSource + Send + 'static,
{
    let source = match state.source.clone().try_lock_owned() {
        Ok(guard) => guard,
        Err(_) => {
            warn!("Rejecting stream request: another client is streaming");
            return (StatusCode::SERVICE_UNAVAILABLE, "stream busy\n").into_response();
        }
    };

    let (mut sink, content_type_rx, chunk_rx) = ChannelSink::channel(CHUNK_QUEUE_DEPTH, state.stop.clone());
    let session = StreamSession::new(state.stop.clone()).with_link(state.link.clone());

    tokio::task::spawn_blocking(move || {
        let mut source = source;
        let report = session.serve(&mut *source, &mut sink);
        // Free the source before the body ends so a reconnecting client finds it unlocked.
        drop(source);
        drop(sink);
        debug!(
            frames = report.frames_sent,
            bytes = report.bytes_sent,
            "Stream session finished"
        );
    });

    let content_type = match content_type_rx.await {
        Ok(content_type) => content_type,
        Err(_) => {
            error!("Stream session ended before announcing its content type");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let chunks = futures::stream::unfold(chunk_rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (Ok::<_, Infallible>(chunk), rx))
    });

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")
        .header(header::PRAGMA, "no-cache")
        .body(Body::from_stream(chunks));

    match response {
        Ok(response) => response,
        Err(e) => {
            error!("Failed to build stream response: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
