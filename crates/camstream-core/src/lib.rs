//! # camstream-core
//!
//! Streaming core for a camera device that serves a live MJPEG stream.
//!
//! This crate provides:
//! - Frame leasing over an abstract frame source
//! - Multipart (`multipart/x-mixed-replace`) part header encoding
//! - The per-request streaming session loop
//! - The station connection state machine with injectable backoff
//! - Device configuration types
//!
//! This crate is intentionally runtime-agnostic and contains no async code,
//! making it usable on both Linux (tokio) and ESP32 (esp-idf) targets.

pub mod config;
pub mod connection;
pub mod frame;
pub mod multipart;
pub mod session;

pub use config::{
    CameraConfig, ConfigError, ConnectionConfig, DeviceConfig, FrameSize, GrabMode, StreamConfig,
    WifiConfig,
};
pub use connection::{
    Backoff, Connection, ConnectionManager, ConnectionState, Credentials, CredentialsError,
    FixedBackoff, LinkStatus, NetworkLink, Sleeper, ThreadSleeper,
};
pub use frame::{FrameLease, FrameSource};
pub use multipart::{PartHeader, BOUNDARY, CONTENT_TYPE, MAX_FRAME_LEN};
pub use session::{
    ChunkSink, SessionEnd, SessionReport, StopSignal, StreamError, StreamSession, TransportError,
};
