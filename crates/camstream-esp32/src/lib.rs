//! ESP32-specific components for camstream.
//!
//! This crate provides the device side of the MJPEG camera:
//! - WiFi station link and connection supervision
//! - esp32-camera driver as a frame source
//! - esp-idf httpd streaming handler
//! - NVS (Non-Volatile Storage) configuration
//!
//! # Architecture
//!
//! The streaming loop and the connection state machine live in
//! `camstream-core`; this crate only implements their collaborators
//! (`NetworkLink`, `FrameSource`, `ChunkSink`) on top of ESP-IDF. The firmware
//! binary (`camstream-server-esp32`) wires them together.
//!
//! # Example
//!
//! ```ignore
//! use camstream_core::ConnectionManager;
//! use camstream_esp32::{camera::EspCamera, http::CameraHttpd, wifi::EspStationLink};
//!
//! let link = EspStationLink::new(peripherals.modem, sysloop, Some(nvs))?;
//! let mut manager = ConnectionManager::new(link);
//! manager.connect(&credentials);
//!
//! let camera = EspCamera::init(&config.camera)?;
//! let httpd = CameraHttpd::start(&config.stream, camera, manager.status())?;
//! // Keep `httpd` alive to keep serving
//! ```

pub mod camera;
pub mod config;
pub mod http;
pub mod wifi;
