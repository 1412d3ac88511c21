//! `multipart/x-mixed-replace` part encoding for MJPEG streams.
//!
//! Each part on the wire is:
//!
//! ```text
//! \r\n--<boundary>\r\n
//! Content-Type: image/jpeg\r\n
//! Content-Length: <n>\r\n
//! \r\n
//! <n JPEG bytes>
//! ```
//!
//! The part header is rendered into a fixed stack buffer. Its capacity is
//! checked at compile time against the longest header the supported frame
//! length range can produce, so rendering never truncates.

use std::io::Write;

use thiserror::Error;

macro_rules! boundary {
    () => {
        "123456789000000000000987654321"
    };
}

/// Boundary token separating parts.
pub const BOUNDARY: &str = boundary!();

/// Response content type announced once per stream.
pub const CONTENT_TYPE: &str = concat!("multipart/x-mixed-replace;boundary=", boundary!());

const PART_PREFIX: &str = concat!(
    "\r\n--",
    boundary!(),
    "\r\nContent-Type: image/jpeg\r\nContent-Length: "
);
const PART_SUFFIX: &str = "\r\n\r\n";

/// Largest frame the encoder accepts (16 MiB - 1).
///
/// A UXGA JPEG at the highest sensor quality is well under 1 MiB.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024 - 1;

/// Capacity of the part header buffer.
pub const PART_HEADER_CAPACITY: usize = 96;

const fn decimal_digits(mut n: usize) -> usize {
    let mut digits = 1;
    while n >= 10 {
        n /= 10;
        digits += 1;
    }
    digits
}

/// Longest header any accepted frame length can produce.
pub const MAX_PART_HEADER_LEN: usize =
    PART_PREFIX.len() + decimal_digits(MAX_FRAME_LEN) + PART_SUFFIX.len();

const _: () = assert!(MAX_PART_HEADER_LEN <= PART_HEADER_CAPACITY);

/// A frame does not fit the part header's length field.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("frame of {len} bytes exceeds the {max} byte part limit")]
pub struct FrameTooLarge {
    pub len: usize,
    pub max: usize,
}

/// Rendered header for one multipart part.
#[derive(Clone)]
pub struct PartHeader {
    buf: [u8; PART_HEADER_CAPACITY],
    len: usize,
    content_length: usize,
}

impl PartHeader {
    /// Render the header announcing a body of `frame_len` bytes.
    pub fn new(frame_len: usize) -> Result<Self, FrameTooLarge> {
        let too_large = FrameTooLarge {
            len: frame_len,
            max: MAX_FRAME_LEN,
        };
        if frame_len > MAX_FRAME_LEN {
            return Err(too_large);
        }

        let mut buf = [0u8; PART_HEADER_CAPACITY];
        let remaining = {
            let mut cursor: &mut [u8] = &mut buf;
            write!(cursor, "{PART_PREFIX}{frame_len}{PART_SUFFIX}").map_err(|_| too_large)?;
            cursor.len()
        };

        Ok(Self {
            buf,
            len: PART_HEADER_CAPACITY - remaining,
            content_length: frame_len,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// The body length this header announces.
    pub fn content_length(&self) -> usize {
        self.content_length
    }
}

impl AsRef<[u8]> for PartHeader {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl std::fmt::Debug for PartHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartHeader")
            .field("content_length", &self.content_length)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_header_layout() {
        let header = PartHeader::new(1000).unwrap();
        let text = std::str::from_utf8(header.as_bytes()).unwrap();

        assert_eq!(
            text,
            "\r\n--123456789000000000000987654321\r\n\
             Content-Type: image/jpeg\r\n\
             Content-Length: 1000\r\n\r\n"
        );
        assert_eq!(header.content_length(), 1000);
    }

    #[test]
    fn test_content_type_names_boundary() {
        assert_eq!(
            CONTENT_TYPE,
            "multipart/x-mixed-replace;boundary=123456789000000000000987654321"
        );
        assert!(CONTENT_TYPE.ends_with(BOUNDARY));
    }

    #[test]
    fn test_header_fits_buffer_across_length_range() {
        let mut len = 0usize;
        loop {
            let header = PartHeader::new(len).unwrap();
            assert!(header.as_bytes().len() <= PART_HEADER_CAPACITY);
            assert!(header.as_bytes().len() <= MAX_PART_HEADER_LEN);
            if len == MAX_FRAME_LEN {
                break;
            }
            len = (len * 10 + 9).min(MAX_FRAME_LEN);
        }

        let largest = PartHeader::new(MAX_FRAME_LEN).unwrap();
        assert_eq!(largest.as_bytes().len(), MAX_PART_HEADER_LEN);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let err = PartHeader::new(MAX_FRAME_LEN + 1).unwrap_err();
        assert_eq!(err.len, MAX_FRAME_LEN + 1);
        assert_eq!(err.max, MAX_FRAME_LEN);
    }

    #[test]
    fn test_announced_length_parses_back() {
        for len in [0usize, 1, 1500, 65_535, 1_048_576] {
            let header = PartHeader::new(len).unwrap();
            let text = std::str::from_utf8(header.as_bytes()).unwrap();
            let value = text
                .lines()
                .find_map(|line| line.strip_prefix("Content-Length: "))
                .unwrap();
            assert_eq!(value.parse::<usize>().unwrap(), len);
        }
    }
}
