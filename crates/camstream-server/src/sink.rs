//! Chunk sink feeding an async HTTP body.
//!
//! The streaming session runs on a blocking thread. Chunks travel to the
//! response body through a bounded channel: when the client reads slowly the
//! channel fills and `write_chunk` blocks, and when the client goes away the
//! receiver is dropped and the next write fails. A write waiting on a full
//! channel gives up once the stop signal is raised.

use std::time::Duration;

use axum::body::Bytes;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};

use camstream_core::{ChunkSink, StopSignal, TransportError};

/// How often a blocked write rechecks the stop signal.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Blocking [`ChunkSink`] over tokio channels.
pub struct ChannelSink {
    content_type: Option<oneshot::Sender<String>>,
    chunks: mpsc::Sender<Bytes>,
    stop: StopSignal,
}

impl ChannelSink {
    /// Create a sink and the receiving ends for the HTTP handler.
    ///
    /// `depth` is the number of chunks buffered before the session blocks.
    /// Raising `stop` fails a write that is waiting for room.
    pub fn channel(
        depth: usize,
        stop: StopSignal,
    ) -> (Self, oneshot::Receiver<String>, mpsc::Receiver<Bytes>) {
        let (content_type_tx, content_type_rx) = oneshot::channel();
        let (chunk_tx, chunk_rx) = mpsc::channel(depth);
        let sink = Self {
            content_type: Some(content_type_tx),
            chunks: chunk_tx,
            stop,
        };
        (sink, content_type_rx, chunk_rx)
    }
}

impl ChunkSink for ChannelSink {
    fn announce(&mut self, content_type: &str) -> Result<(), TransportError> {
        let tx = self
            .content_type
            .take()
            .ok_or_else(|| TransportError::new("content type already announced"))?;
        tx.send(content_type.to_string())
            .map_err(|_| TransportError::closed())
    }

    /// Must be called off the async runtime (e.g. from `spawn_blocking`).
    fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), TransportError> {
        let mut chunk = Bytes::copy_from_slice(chunk);
        loop {
            match self.chunks.try_send(chunk) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Closed(_)) => return Err(TransportError::closed()),
                Err(TrySendError::Full(returned)) => {
                    if self.stop.is_stopped() {
                        return Err(TransportError::new("stream stopped while the peer was stalled"));
                    }
                    chunk = returned;
                    std::thread::sleep(STOP_POLL_INTERVAL);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunks_reach_receiver() {
        let (mut sink, mut content_type, mut chunks) = ChannelSink::channel(4, StopSignal::new());

        sink.announce("multipart/x-mixed-replace;boundary=x").unwrap();
        sink.write_chunk(b"header").unwrap();
        sink.write_chunk(b"body").unwrap();

        assert_eq!(content_type.try_recv().unwrap(), "multipart/x-mixed-replace;boundary=x");
        assert_eq!(chunks.try_recv().unwrap(), Bytes::from_static(b"header"));
        assert_eq!(chunks.try_recv().unwrap(), Bytes::from_static(b"body"));
    }

    #[test]
    fn test_announce_only_once() {
        let (mut sink, _content_type, _chunks) = ChannelSink::channel(1, StopSignal::new());
        sink.announce("a").unwrap();
        assert!(sink.announce("b").is_err());
    }

    #[test]
    fn test_dropped_receiver_fails_writes() {
        let (mut sink, content_type, chunks) = ChannelSink::channel(1, StopSignal::new());
        drop(content_type);
        drop(chunks);

        assert_eq!(sink.announce("a"), Err(TransportError::closed()));
        assert_eq!(sink.write_chunk(b"frame"), Err(TransportError::closed()));
    }

    #[test]
    fn test_stop_releases_write_blocked_on_full_channel() {
        let stop = StopSignal::new();
        let (mut sink, _content_type, _chunks) = ChannelSink::channel(1, stop.clone());
        sink.write_chunk(b"fills the queue").unwrap();

        let trigger = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            stop.stop();
        });

        let err = sink.write_chunk(b"never read").unwrap_err();
        assert_ne!(err, TransportError::closed());
        trigger.join().unwrap();
    }

    #[test]
    fn test_full_channel_waits_for_reader() {
        let (mut sink, _content_type, mut chunks) = ChannelSink::channel(1, StopSignal::new());
        sink.write_chunk(b"first").unwrap();

        let reader = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            let first = chunks.blocking_recv().unwrap();
            let second = chunks.blocking_recv().unwrap();
            (first, second)
        });

        sink.write_chunk(b"second").unwrap();
        let (first, second) = reader.join().unwrap();
        assert_eq!(first, Bytes::from_static(b"first"));
        assert_eq!(second, Bytes::from_static(b"second"));
    }
}
