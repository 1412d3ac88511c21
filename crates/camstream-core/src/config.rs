//! Device configuration.
//!
//! Configuration is plain serde data shared by both platforms:
//! - Linux: loaded from a JSON file
//! - ESP32: loaded from NVS, with compile-time WiFi credentials as fallback
//!
//! All sections have defaults, so a partial document is valid input.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::connection::{Credentials, CredentialsError, DEFAULT_BACKOFF};

/// Highest sensor clock the camera driver accepts.
pub const MAX_XCLK_FREQ_HZ: u32 = 40_000_000;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid configuration JSON.
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// WiFi credentials are unusable.
    #[error(transparent)]
    Credentials(#[from] CredentialsError),

    /// A value is out of range.
    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: &'static str, message: String },
}

// ============================================================================
// Sections
// ============================================================================

/// Complete device configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceConfig {
    pub wifi: WifiConfig,
    pub camera: CameraConfig,
    pub stream: StreamConfig,
    pub connection: ConnectionConfig,
}

/// WiFi station credentials.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WifiConfig {
    /// Network SSID.
    pub ssid: String,

    /// Network password.
    pub password: String,
}

impl std::fmt::Debug for WifiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WifiConfig")
            .field("ssid", &self.ssid)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Sensor resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameSize {
    /// 320x240
    Qvga,
    /// 640x480
    Vga,
    /// 800x600
    Svga,
    /// 1024x768
    Xga,
    /// 1280x1024
    Sxga,
    /// 1600x1200
    Uxga,
}

impl FrameSize {
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            FrameSize::Qvga => (320, 240),
            FrameSize::Vga => (640, 480),
            FrameSize::Svga => (800, 600),
            FrameSize::Xga => (1024, 768),
            FrameSize::Sxga => (1280, 1024),
            FrameSize::Uxga => (1600, 1200),
        }
    }
}

/// When the driver refills frame buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GrabMode {
    /// Fill buffers only when they are empty.
    WhenEmpty,
    /// Always hand out the most recent frame.
    Latest,
}

/// Camera sensor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CameraConfig {
    pub frame_size: FrameSize,

    /// JPEG quality, 0-63. Lower is better quality.
    pub jpeg_quality: u8,

    /// Frame buffers in the driver pool. More than one needs PSRAM.
    pub fb_count: u8,

    pub grab_mode: GrabMode,

    /// Sensor clock.
    pub xclk_freq_hz: u32,

    /// Flip the image vertically.
    pub vflip: bool,

    /// Mirror the image horizontally.
    pub hmirror: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            frame_size: FrameSize::Uxga,
            jpeg_quality: 10,
            fb_count: 2,
            grab_mode: GrabMode::Latest,
            xclk_freq_hz: 20_000_000,
            vflip: false,
            hmirror: true,
        }
    }
}

/// HTTP streaming endpoint settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamConfig {
    /// HTTP server port.
    pub port: u16,

    /// Route serving the MJPEG stream.
    pub route: String,

    /// Linux only: directory of JPEG files to replay as camera frames.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frames_dir: Option<PathBuf>,

    /// Linux only: delay between replayed frames.
    pub frame_interval_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            port: 80,
            route: "/stream".to_string(),
            frames_dir: None,
            frame_interval_ms: 100,
        }
    }
}

impl StreamConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    /// Viewer URL for the stream at `ip`. Port 80 is left implicit.
    pub fn url_for(&self, ip: IpAddr) -> String {
        let host = match ip {
            IpAddr::V4(v4) => v4.to_string(),
            IpAddr::V6(v6) => format!("[{}]", v6),
        };
        if self.port == 80 {
            format!("http://{}{}", host, self.route)
        } else {
            format!("http://{}:{}{}", host, self.port, self.route)
        }
    }
}

/// Connection retry settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionConfig {
    /// Delay between association attempts.
    pub backoff_ms: u64,

    /// How often the link supervisor checks the connection.
    pub watchdog_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            backoff_ms: DEFAULT_BACKOFF.as_millis() as u64,
            watchdog_ms: 2_000,
        }
    }
}

impl ConnectionConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn watchdog(&self) -> Duration {
        Duration::from_millis(self.watchdog_ms)
    }
}

// ============================================================================
// Loading
// ============================================================================

impl DeviceConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: DeviceConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check value ranges. Credentials are checked separately by
    /// [`credentials`](Self::credentials) since they may be supplied later.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.jpeg_quality > 63 {
            return Err(ConfigError::InvalidValue {
                field: "camera.jpegQuality",
                message: format!("{} is outside 0-63", self.camera.jpeg_quality),
            });
        }
        if self.camera.fb_count == 0 {
            return Err(ConfigError::InvalidValue {
                field: "camera.fbCount",
                message: "at least one frame buffer is required".to_string(),
            });
        }
        if self.camera.xclk_freq_hz == 0 || self.camera.xclk_freq_hz > MAX_XCLK_FREQ_HZ {
            return Err(ConfigError::InvalidValue {
                field: "camera.xclkFreqHz",
                message: format!(
                    "{} Hz is outside 1-{} Hz",
                    self.camera.xclk_freq_hz, MAX_XCLK_FREQ_HZ
                ),
            });
        }
        if !self.stream.route.starts_with('/') {
            return Err(ConfigError::InvalidValue {
                field: "stream.route",
                message: format!("'{}' must start with '/'", self.stream.route),
            });
        }
        if self.connection.backoff_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "connection.backoffMs",
                message: "backoff must be non-zero".to_string(),
            });
        }
        Ok(())
    }

    /// Validated station credentials.
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        Ok(Credentials::new(&self.wifi.ssid, &self.wifi.password)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_match_device_firmware() {
        let config = DeviceConfig::default();
        assert_eq!(config.camera.frame_size, FrameSize::Uxga);
        assert_eq!(config.camera.jpeg_quality, 10);
        assert_eq!(config.camera.fb_count, 2);
        assert_eq!(config.camera.grab_mode, GrabMode::Latest);
        assert!(!config.camera.vflip);
        assert!(config.camera.hmirror);
        assert_eq!(config.stream.route, "/stream");
        assert_eq!(config.connection.backoff(), Duration::from_millis(500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_document() {
        let json = r#"{
            "wifi": { "ssid": "Home_2.4G", "password": "11112222" },
            "camera": { "frameSize": "vga", "grabMode": "whenEmpty" },
            "stream": { "port": 8080 }
        }"#;
        let config = DeviceConfig::from_json_str(json).unwrap();

        assert_eq!(config.camera.frame_size, FrameSize::Vga);
        assert_eq!(config.camera.frame_size.dimensions(), (640, 480));
        assert_eq!(config.camera.grab_mode, GrabMode::WhenEmpty);
        assert_eq!(config.camera.jpeg_quality, 10);
        assert_eq!(config.stream.port, 8080);
        assert_eq!(config.stream.route, "/stream");
        assert_eq!(config.credentials().unwrap().ssid(), "Home_2.4G");
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        let err = DeviceConfig::from_json_str(r#"{"camera":{"jpegQuality":64}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "camera.jpegQuality", .. }));

        let err = DeviceConfig::from_json_str(r#"{"camera":{"fbCount":0}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "camera.fbCount", .. }));

        let err = DeviceConfig::from_json_str(r#"{"camera":{"xclkFreqHz":0}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "camera.xclkFreqHz", .. }));

        // Would wrap negative in the driver's signed field.
        let err = DeviceConfig::from_json_str(r#"{"camera":{"xclkFreqHz":3000000000}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "camera.xclkFreqHz", .. }));

        let config = DeviceConfig::from_json_str(r#"{"camera":{"xclkFreqHz":10000000}}"#).unwrap();
        assert_eq!(config.camera.xclk_freq_hz, 10_000_000);

        let err = DeviceConfig::from_json_str(r#"{"stream":{"route":"stream"}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "stream.route", .. }));
    }

    #[test]
    fn test_empty_credentials_are_fatal() {
        let config = DeviceConfig::default();
        assert!(matches!(
            config.credentials(),
            Err(ConfigError::Credentials(CredentialsError::EmptySsid))
        ));
    }

    #[test]
    fn test_json_roundtrip_keeps_settings() {
        let mut config = DeviceConfig::default();
        config.stream.frames_dir = Some(PathBuf::from("/tmp/frames"));
        config.camera.vflip = true;

        let json = config.to_json().unwrap();
        assert!(json.contains("\"framesDir\""));
        assert_eq!(DeviceConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn test_stream_url() {
        let mut stream = StreamConfig::default();
        let ip: IpAddr = "192.168.1.42".parse().unwrap();
        assert_eq!(stream.url_for(ip), "http://192.168.1.42/stream");

        stream.port = 8080;
        assert_eq!(stream.url_for(ip), "http://192.168.1.42:8080/stream");
        assert_eq!(
            stream.url_for("::1".parse().unwrap()),
            "http://[::1]:8080/stream"
        );
    }

    #[test]
    fn test_missing_file() {
        let err = DeviceConfig::load("/nonexistent/camstream.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
