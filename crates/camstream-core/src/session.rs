//! Per-request MJPEG streaming session.
//!
//! A session announces the multipart content type once, then loops:
//! lease a frame, write its part header, write its body, return the frame.
//! It ends when the sink or the source fails, when the owner raises the
//! [`StopSignal`], or when the network link is no longer connected.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::connection::LinkStatus;
use crate::frame::FrameSource;
use crate::multipart::{FrameTooLarge, PartHeader, CONTENT_TYPE};

/// A chunk could not be delivered to the peer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct TransportError(String);

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    /// The peer went away.
    pub fn closed() -> Self {
        Self::new("peer closed the connection")
    }
}

/// Chunked HTTP response body.
///
/// Implementations:
/// - `HttpdSink` on ESP32 (esp-idf httpd chunked responses)
/// - `ChannelSink` on Linux (bounded channel feeding an axum body)
pub trait ChunkSink {
    /// Set the response content type. Called once, before any chunk.
    fn announce(&mut self, content_type: &str) -> Result<(), TransportError>;

    /// Send one chunk. Blocks while the peer applies backpressure.
    fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), TransportError>;
}

impl<K: ChunkSink + ?Sized> ChunkSink for &mut K {
    fn announce(&mut self, content_type: &str) -> Result<(), TransportError> {
        (**self).announce(content_type)
    }

    fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), TransportError> {
        (**self).write_chunk(chunk)
    }
}

/// Errors that end a streaming session.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("failed to announce stream content type: {0}")]
    ContentType(#[source] TransportError),

    #[error("camera capture failed")]
    Acquisition,

    #[error("failed to send part header: {0}")]
    HeaderWrite(#[source] TransportError),

    #[error("failed to send frame body: {0}")]
    BodyWrite(#[source] TransportError),

    #[error(transparent)]
    FrameTooLarge(#[from] FrameTooLarge),
}

impl StreamError {
    /// Whether the peer side failed, as opposed to the camera side.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            StreamError::ContentType(_) | StreamError::HeaderWrite(_) | StreamError::BodyWrite(_)
        )
    }
}

/// Why a session ended.
#[derive(Debug)]
pub enum SessionEnd {
    /// The owner raised the stop signal.
    Stopped,
    /// The network link left the connected state.
    LinkLost,
    /// A fatal error.
    Failed(StreamError),
}

/// Summary of a finished session.
#[derive(Debug)]
pub struct SessionReport {
    /// Parts written completely (header and body).
    pub frames_sent: u64,
    /// Payload bytes written, headers excluded.
    pub bytes_sent: u64,
    pub end: SessionEnd,
}

impl SessionReport {
    pub fn error(&self) -> Option<&StreamError> {
        match &self.end {
            SessionEnd::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Cooperative stop flag shared between a session and its owner.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every session holding this signal to end before its next frame.
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// One streaming loop over a frame source and a chunk sink.
#[derive(Debug, Clone, Default)]
pub struct StreamSession {
    stop: StopSignal,
    link: Option<LinkStatus>,
}

impl StreamSession {
    pub fn new(stop: StopSignal) -> Self {
        Self { stop, link: None }
    }

    /// End the session once `link` stops reporting connected.
    pub fn with_link(mut self, link: LinkStatus) -> Self {
        self.link = Some(link);
        self
    }

    /// Stream frames from `source` into `sink` until the session ends.
    pub fn serve<S, K>(&self, source: &mut S, sink: &mut K) -> SessionReport
    where
        S: FrameSource,
        K: ChunkSink + ?Sized,
    {
        let mut report = SessionReport {
            frames_sent: 0,
            bytes_sent: 0,
            end: SessionEnd::Stopped,
        };

        debug!("Stream session started");
        report.end = match self.stream(source, sink, &mut report) {
            Ok(end) => end,
            // A sink may abandon a stalled write once the stop signal is raised.
            Err(e) if e.is_transport() && self.stop.is_stopped() => SessionEnd::Stopped,
            Err(e) => SessionEnd::Failed(e),
        };

        match &report.end {
            SessionEnd::Stopped => info!("Stream stopped after {} frames", report.frames_sent),
            SessionEnd::LinkLost => warn!("Network lost, ending stream after {} frames", report.frames_sent),
            SessionEnd::Failed(StreamError::Acquisition) => {
                error!("Camera capture failed after {} frames", report.frames_sent)
            }
            SessionEnd::Failed(e) if e.is_transport() => {
                info!("Client disconnected after {} frames: {}", report.frames_sent, e)
            }
            SessionEnd::Failed(e) => error!("Stream aborted after {} frames: {}", report.frames_sent, e),
        }

        report
    }

    fn stream<S, K>(&self, source: &mut S, sink: &mut K, report: &mut SessionReport) -> Result<SessionEnd, StreamError>
    where
        S: FrameSource,
        K: ChunkSink + ?Sized,
    {
        sink.announce(CONTENT_TYPE).map_err(StreamError::ContentType)?;

        loop {
            if self.stop.is_stopped() {
                return Ok(SessionEnd::Stopped);
            }
            if self.link.as_ref().is_some_and(|link| !link.is_connected()) {
                return Ok(SessionEnd::LinkLost);
            }

            // Released on every exit from this iteration, including `?`.
            let frame = source.lease().ok_or(StreamError::Acquisition)?;
            let header = PartHeader::new(frame.len())?;

            sink.write_chunk(header.as_bytes()).map_err(StreamError::HeaderWrite)?;
            sink.write_chunk(&frame).map_err(StreamError::BodyWrite)?;

            report.frames_sent += 1;
            report.bytes_sent += frame.len() as u64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionState;
    use crate::multipart::MAX_FRAME_LEN;

    /// Endless source of fixed-size frames.
    #[derive(Default)]
    struct EndlessSource {
        len: usize,
        acquired: usize,
        released: usize,
    }

    impl FrameSource for EndlessSource {
        type Frame = Vec<u8>;

        fn acquire(&mut self) -> Option<Vec<u8>> {
            self.acquired += 1;
            Some(vec![0xFF; self.len])
        }

        fn release(&mut self, _frame: Vec<u8>) {
            self.released += 1;
        }
    }

    /// Accepts a limited number of chunks and can trip a stop signal.
    struct LimitedSink {
        announced: Option<String>,
        chunks: usize,
        stop_after: usize,
        on_limit: Box<dyn FnMut()>,
        fail_announce: bool,
    }

    impl LimitedSink {
        fn new(stop_after: usize, on_limit: impl FnMut() + 'static) -> Self {
            Self {
                announced: None,
                chunks: 0,
                stop_after,
                on_limit: Box::new(on_limit),
                fail_announce: false,
            }
        }
    }

    impl ChunkSink for LimitedSink {
        fn announce(&mut self, content_type: &str) -> Result<(), TransportError> {
            if self.fail_announce {
                return Err(TransportError::closed());
            }
            self.announced = Some(content_type.to_string());
            Ok(())
        }

        fn write_chunk(&mut self, _chunk: &[u8]) -> Result<(), TransportError> {
            self.chunks += 1;
            if self.chunks == self.stop_after {
                (self.on_limit)();
            }
            Ok(())
        }
    }

    #[test]
    fn test_stop_signal_ends_session() {
        let stop = StopSignal::new();
        let trigger = stop.clone();
        let mut source = EndlessSource { len: 10, ..Default::default() };
        // Two chunks per part: stop after the third part completes.
        let mut sink = LimitedSink::new(6, move || trigger.stop());

        let report = StreamSession::new(stop).serve(&mut source, &mut sink);

        assert!(matches!(report.end, SessionEnd::Stopped));
        assert_eq!(report.frames_sent, 3);
        assert_eq!(report.bytes_sent, 30);
        assert_eq!(source.acquired, source.released);
        assert_eq!(sink.announced.as_deref(), Some(CONTENT_TYPE));
    }

    /// Refuses writes once its stop signal is raised, like a sink whose peer stalled.
    struct StallingSink {
        stop: StopSignal,
        writes: usize,
    }

    impl ChunkSink for StallingSink {
        fn announce(&mut self, _content_type: &str) -> Result<(), TransportError> {
            Ok(())
        }

        fn write_chunk(&mut self, _chunk: &[u8]) -> Result<(), TransportError> {
            self.writes += 1;
            if self.writes == 3 {
                self.stop.stop();
            }
            if self.stop.is_stopped() {
                return Err(TransportError::new("stream stopped while the peer was stalled"));
            }
            Ok(())
        }
    }

    #[test]
    fn test_stop_during_stalled_write_ends_as_stopped() {
        let stop = StopSignal::new();
        let mut source = EndlessSource { len: 8, ..Default::default() };
        let mut sink = StallingSink {
            stop: stop.clone(),
            writes: 0,
        };

        let report = StreamSession::new(stop).serve(&mut source, &mut sink);

        assert!(matches!(report.end, SessionEnd::Stopped));
        assert_eq!(report.frames_sent, 1);
        assert_eq!(source.acquired, source.released);
    }

    #[test]
    fn test_link_loss_ends_session() {
        let link = LinkStatus::new(ConnectionState::Connected);
        let drop_link = link.clone();
        let mut source = EndlessSource { len: 4, ..Default::default() };
        let mut sink = LimitedSink::new(2, move || drop_link.set(ConnectionState::Disconnected));

        let report = StreamSession::new(StopSignal::new())
            .with_link(link)
            .serve(&mut source, &mut sink);

        assert!(matches!(report.end, SessionEnd::LinkLost));
        assert_eq!(report.frames_sent, 1);
        assert_eq!(source.acquired, 1);
        assert_eq!(source.released, 1);
    }

    #[test]
    fn test_disconnected_link_streams_nothing() {
        let mut source = EndlessSource { len: 4, ..Default::default() };
        let mut sink = LimitedSink::new(usize::MAX, || {});

        let report = StreamSession::new(StopSignal::new())
            .with_link(LinkStatus::new(ConnectionState::Connecting))
            .serve(&mut source, &mut sink);

        assert!(matches!(report.end, SessionEnd::LinkLost));
        assert_eq!(source.acquired, 0);
    }

    #[test]
    fn test_announce_failure_aborts_before_frames() {
        let mut source = EndlessSource { len: 4, ..Default::default() };
        let mut sink = LimitedSink::new(usize::MAX, || {});
        sink.fail_announce = true;

        let report = StreamSession::new(StopSignal::new()).serve(&mut source, &mut sink);

        assert!(matches!(report.error(), Some(StreamError::ContentType(_))));
        assert_eq!(source.acquired, 0);
        assert_eq!(sink.chunks, 0);
    }

    #[test]
    fn test_oversized_frame_is_released_and_fatal() {
        let mut source = EndlessSource {
            len: MAX_FRAME_LEN + 1,
            ..Default::default()
        };
        let mut sink = LimitedSink::new(usize::MAX, || {});

        let report = StreamSession::new(StopSignal::new()).serve(&mut source, &mut sink);

        match report.error() {
            Some(StreamError::FrameTooLarge(e)) => assert_eq!(e.len, MAX_FRAME_LEN + 1),
            other => panic!("Expected FrameTooLarge, got {:?}", other),
        }
        assert_eq!(sink.chunks, 0);
        assert_eq!(source.acquired, 1);
        assert_eq!(source.released, 1);
    }

    #[test]
    fn test_error_classification() {
        assert!(StreamError::BodyWrite(TransportError::closed()).is_transport());
        assert!(StreamError::HeaderWrite(TransportError::closed()).is_transport());
        assert!(!StreamError::Acquisition.is_transport());
        assert_eq!(
            StreamError::BodyWrite(TransportError::new("socket reset")).to_string(),
            "failed to send frame body: socket reset"
        );
    }
}
