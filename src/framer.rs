//! Incremental request framing.
//!
//! A request is complete once the bytes accumulated for a connection end with
//! a blank line. Only the first line is kept; header lines are skipped and
//! bodies are not supported.

use crate::error::FrameError;

/// The blank line that ends a request head.
pub const TERMINATOR: &[u8; 4] = b"\r\n\r\n";

/// Outcome of inspecting a connection's buffer after a read.
#[derive(Debug, PartialEq, Eq)]
pub enum Frame {
    /// Keep the connection open and wait for more bytes.
    Incomplete,
    /// The request line, without its line ending.
    Complete(String),
}

/// Inspects the filled region of a connection buffer.
///
/// `capacity` is the size of the buffer the bytes live in. A region that
/// fills the buffer without ending in [`TERMINATOR`] can never complete and
/// is reported as [`FrameError::Oversized`].
pub fn inspect(filled: &[u8], capacity: usize) -> Result<Frame, FrameError> {
    if filled.ends_with(TERMINATOR) {
        return Ok(Frame::Complete(request_line(filled)));
    }
    if filled.len() >= capacity {
        return Err(FrameError::Oversized { capacity });
    }
    Ok(Frame::Incomplete)
}

/// Everything before the first carriage return.
fn request_line(filled: &[u8]) -> String {
    let end = filled
        .iter()
        .position(|&b| b == b'\r')
        .unwrap_or(filled.len());
    String::from_utf8_lossy(&filled[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incomplete_without_terminator() {
        assert_eq!(inspect(b"GET /index.html\r\n", 1024), Ok(Frame::Incomplete));
        assert_eq!(inspect(b"", 1024), Ok(Frame::Incomplete));
    }

    #[test]
    fn test_complete_request_line() {
        let frame = inspect(b"GET /index.html\r\n\r\n", 1024).unwrap();
        assert_eq!(frame, Frame::Complete("GET /index.html".to_owned()));
    }

    /// Header lines after the request line are dropped.
    #[test]
    fn test_headers_are_skipped() {
        let raw = b"GET /a.txt HTTP/1.1\r\nHost: localhost\r\nAccept: */*\r\n\r\n";
        let frame = inspect(raw, 1024).unwrap();
        assert_eq!(frame, Frame::Complete("GET /a.txt HTTP/1.1".to_owned()));
    }

    /// The terminator only counts at the tail of the filled region.
    #[test]
    fn test_terminator_must_be_at_tail() {
        assert_eq!(inspect(b"GET /\r\n\r\nextra", 1024), Ok(Frame::Incomplete));
    }

    #[test]
    fn test_full_buffer_without_terminator_is_oversized() {
        let raw = vec![b'a'; 16];
        assert_eq!(inspect(&raw, 16), Err(FrameError::Oversized { capacity: 16 }));
    }

    /// A request that exactly fills the buffer still completes.
    #[test]
    fn test_exact_fit_completes() {
        let raw = b"GET /abcdefg\r\n\r\n";
        let frame = inspect(raw, raw.len()).unwrap();
        assert_eq!(frame, Frame::Complete("GET /abcdefg".to_owned()));
    }

    #[test]
    fn test_invalid_utf8_is_lossy() {
        let frame = inspect(b"GET /\xff\r\n\r\n", 64).unwrap();
        assert_eq!(frame, Frame::Complete("GET /\u{fffd}".to_owned()));
    }
}
