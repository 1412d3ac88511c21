//! Frame source abstraction and frame leasing.
//!
//! A frame source owns a small pool of compressed image buffers and lends
//! them out one at a time. Every lent frame must be handed back exactly once.
//! [`FrameLease`] ties that return to scope exit so no error path can leak a
//! buffer back into the driver's pool.

use std::ops::Deref;

/// A producer of compressed image frames.
///
/// Implementations:
/// - `EspCamera` on ESP32 (esp32-camera frame buffers)
/// - `ClipSource` on Linux (JPEG files replayed from disk or memory)
pub trait FrameSource {
    /// The lent frame. Its bytes are the complete JPEG image.
    type Frame: AsRef<[u8]>;

    /// Take the next frame from the source.
    ///
    /// Returns `None` when the sensor or driver failed to produce a frame.
    fn acquire(&mut self) -> Option<Self::Frame>;

    /// Return a frame previously obtained from [`acquire`](Self::acquire).
    fn release(&mut self, frame: Self::Frame);

    /// Acquire a frame wrapped in a lease that releases it on drop.
    fn lease(&mut self) -> Option<FrameLease<'_, Self>>
    where
        Self: Sized,
    {
        let frame = self.acquire()?;
        Some(FrameLease {
            source: self,
            frame: Some(frame),
        })
    }
}

/// A frame borrowed from a [`FrameSource`].
///
/// The frame goes back to its source when the lease is dropped, so the
/// lease borrows the source mutably for its whole lifetime: at most one
/// frame can be outstanding per source.
pub struct FrameLease<'s, S: FrameSource> {
    source: &'s mut S,
    frame: Option<S::Frame>,
}

impl<S: FrameSource> FrameLease<'_, S> {
    /// Frame payload.
    pub fn bytes(&self) -> &[u8] {
        match &self.frame {
            Some(frame) => frame.as_ref(),
            None => &[],
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<S: FrameSource> Deref for FrameLease<'_, S> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.bytes()
    }
}

impl<S: FrameSource> Drop for FrameLease<'_, S> {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            self.source.release(frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CountingSource {
        next_len: usize,
        acquired: usize,
        released: usize,
    }

    impl FrameSource for CountingSource {
        type Frame = Vec<u8>;

        fn acquire(&mut self) -> Option<Vec<u8>> {
            if self.next_len == 0 {
                return None;
            }
            self.acquired += 1;
            Some(vec![0xAB; self.next_len])
        }

        fn release(&mut self, _frame: Vec<u8>) {
            self.released += 1;
        }
    }

    #[test]
    fn test_lease_releases_on_drop() {
        let mut source = CountingSource {
            next_len: 16,
            ..Default::default()
        };

        {
            let lease = source.lease().expect("frame");
            assert_eq!(lease.len(), 16);
            assert_eq!(lease[0], 0xAB);
        }

        assert_eq!(source.acquired, 1);
        assert_eq!(source.released, 1);
    }

    #[test]
    fn test_lease_released_on_early_return() {
        fn fail_midway(source: &mut CountingSource) -> Result<(), &'static str> {
            let lease = source.lease().ok_or("no frame")?;
            if !lease.is_empty() {
                return Err("write failed");
            }
            Ok(())
        }

        let mut source = CountingSource {
            next_len: 4,
            ..Default::default()
        };
        assert!(fail_midway(&mut source).is_err());
        assert_eq!(source.released, 1);
    }

    #[test]
    fn test_no_frame_means_nothing_to_release() {
        let mut source = CountingSource::default();
        assert!(source.lease().is_none());
        assert_eq!(source.acquired, 0);
        assert_eq!(source.released, 0);
    }
}
