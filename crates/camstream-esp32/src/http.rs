//! esp-idf httpd streaming endpoint.
//!
//! After the response head is sent, every write on an esp-idf response goes
//! out as an HTTP chunk (`httpd_resp_send_chunk`), which is the transport the
//! stream session needs.

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use camstream_core::{ChunkSink, LinkStatus, StopSignal, StreamConfig, StreamSession, TransportError};
use embedded_svc::http::server::{Connection, Request, Response};
use esp_idf_svc::http::server::{Configuration, EspHttpServer};
use esp_idf_svc::http::Method;
use esp_idf_svc::io::Write;
use log::info;

use crate::camera::EspCamera;

/// Stack for httpd handler tasks; the stream session runs on it.
const HTTPD_STACK_SIZE: usize = 8192;

fn transport_error(e: impl std::fmt::Debug) -> TransportError {
    TransportError::new(format!("{:?}", e))
}

/// [`ChunkSink`] over an esp-idf httpd request.
///
/// The response head (status and content type) is sent on
/// [`announce`](ChunkSink::announce).
pub enum HttpdSink<C: Connection> {
    Pending(Request<C>),
    Streaming(Response<C>),
    Closed,
}

impl<C: Connection> HttpdSink<C> {
    pub fn new(request: Request<C>) -> Self {
        HttpdSink::Pending(request)
    }
}

impl<C: Connection> ChunkSink for HttpdSink<C> {
    fn announce(&mut self, content_type: &str) -> Result<(), TransportError> {
        match std::mem::replace(self, HttpdSink::Closed) {
            HttpdSink::Pending(request) => {
                let headers = [
                    ("Content-Type", content_type),
                    ("Cache-Control", "no-cache, no-store, must-revalidate"),
                ];
                let response = request
                    .into_response(200, Some("OK"), &headers)
                    .map_err(transport_error)?;
                *self = HttpdSink::Streaming(response);
                Ok(())
            }
            other => {
                *self = other;
                Err(TransportError::new("content type already announced"))
            }
        }
    }

    fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), TransportError> {
        match self {
            HttpdSink::Streaming(response) => response.write_all(chunk).map_err(transport_error),
            _ => Err(TransportError::new("response head not sent")),
        }
    }
}

/// The camera's HTTP server.
///
/// Owns the esp-idf httpd instance; dropping it stops active streams and
/// shuts the server down.
///
/// httpd dispatches every handler on its single server task, so while a
/// stream runs a second request waits in the listen backlog until the first
/// session ends. It is never rejected.
pub struct CameraHttpd {
    _server: EspHttpServer<'static>,
    stop: StopSignal,
}

impl CameraHttpd {
    /// Start httpd and register the streaming route.
    pub fn start(config: &StreamConfig, camera: EspCamera, link: LinkStatus) -> Result<Self> {
        let mut server = EspHttpServer::new(&Configuration {
            http_port: config.port,
            stack_size: HTTPD_STACK_SIZE,
            ..Default::default()
        })?;

        let camera = Arc::new(Mutex::new(camera));
        let stop = StopSignal::new();
        let handler_stop = stop.clone();

        server.fn_handler(&config.route, Method::Get, move |request| {
            let mut camera = camera.lock().unwrap_or_else(PoisonError::into_inner);

            info!("Client connected to stream");
            let session = StreamSession::new(handler_stop.clone()).with_link(link.clone());
            let mut sink = HttpdSink::new(request);
            session.serve(&mut *camera, &mut sink);

            Ok::<(), anyhow::Error>(())
        })?;

        info!("HTTP server started on port {}", config.port);
        Ok(Self {
            _server: server,
            stop,
        })
    }

    /// End active streams after their current frame.
    pub fn stop_streams(&self) {
        self.stop.stop();
    }
}

impl Drop for CameraHttpd {
    fn drop(&mut self) {
        self.stop.stop();
    }
}
