//! # camstream-server
//!
//! Host implementation of the camstream MJPEG endpoint.
//!
//! This crate provides:
//! - `StreamServer`: axum server owning the single streaming route
//! - `ChannelSink`: bridges the blocking stream session to an async body
//! - `ClipSource`: replays JPEG files as camera frames
//! - `TcpBindLink`: host network link (binding the listening socket)

pub mod link;
pub mod server;
pub mod sink;
pub mod source;

pub use camstream_core::{DeviceConfig, LinkStatus, StopSignal};
pub use link::{reachable_ip, TcpBindLink};
pub use server::{ServerConfig, ServerError, StreamServer};
pub use sink::ChannelSink;
pub use source::{ClipSource, SourceError};
