//! Frame source replaying JPEG clips.
//!
//! Stands in for the camera on a host: frames are loaded once from a
//! directory (or supplied in memory) and handed out at a fixed interval to
//! mimic the sensor's frame rate.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use axum::body::Bytes;
use thiserror::Error;
use tracing::{debug, info, warn};

use camstream_core::FrameSource;

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

/// Errors loading a clip.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no JPEG frames found in {0}")]
    Empty(PathBuf),
}

/// Replays a fixed set of JPEG frames.
pub struct ClipSource {
    frames: Vec<Bytes>,
    cursor: usize,
    looped: bool,
    interval: Duration,
    last_frame: Option<Instant>,
    outstanding: usize,
}

impl ClipSource {
    /// Play `frames` once, without pacing.
    pub fn from_frames(frames: Vec<Bytes>) -> Self {
        Self {
            frames,
            cursor: 0,
            looped: false,
            interval: Duration::ZERO,
            last_frame: None,
            outstanding: 0,
        }
    }

    /// Load every `.jpg`/`.jpeg` file in `dir`, in file name order, looping.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, SourceError> {
        let dir = dir.as_ref();
        let io_err = |path: &Path, source| SourceError::Io {
            path: path.to_path_buf(),
            source,
        };

        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
            .map_err(|e| io_err(dir, e))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
            })
            .collect();
        paths.sort();

        let mut frames = Vec::with_capacity(paths.len());
        for path in &paths {
            let data = std::fs::read(path).map_err(|e| io_err(path, e))?;
            if !data.starts_with(&JPEG_SOI) {
                warn!("Skipping {}: not a JPEG image", path.display());
                continue;
            }
            debug!("Loaded frame {} ({} bytes)", path.display(), data.len());
            frames.push(Bytes::from(data));
        }

        if frames.is_empty() {
            return Err(SourceError::Empty(dir.to_path_buf()));
        }

        info!("Loaded {} frames from {}", frames.len(), dir.display());
        Ok(Self::from_frames(frames).looped(true))
    }

    /// Restart from the first frame after the last one.
    pub fn looped(mut self, looped: bool) -> Self {
        self.looped = looped;
        self
    }

    /// Minimum time between two acquired frames.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    fn pace(&mut self) {
        if let Some(last) = self.last_frame {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                std::thread::sleep(self.interval - elapsed);
            }
        }
        self.last_frame = Some(Instant::now());
    }
}

impl FrameSource for ClipSource {
    type Frame = Bytes;

    fn acquire(&mut self) -> Option<Bytes> {
        debug_assert_eq!(self.outstanding, 0, "frame acquired before the previous one was released");

        if self.cursor >= self.frames.len() {
            if !self.looped || self.frames.is_empty() {
                return None;
            }
            self.cursor = 0;
        }

        self.pace();
        let frame = self.frames[self.cursor].clone();
        self.cursor += 1;
        self.outstanding += 1;
        Some(frame)
    }

    fn release(&mut self, _frame: Bytes) {
        self.outstanding = self.outstanding.saturating_sub(1);
    }
}
