//! Reply framing over an unframed byte stream.
//!
//! The controller sends no lengths or checksums, so a reply is complete when
//! either the expected number of delimiter-terminated lines has arrived or
//! the line has gone quiet for `idle_timeout`, whichever happens first.

use beamrig_common::consts::{LINE_DELIMITER, SENTINEL_BYTE};
use std::io::{self, ErrorKind, Read};
use std::net::TcpStream;
use std::time::Duration;
use tracing::trace;

/// Chunk size for a single read.
const READ_CHUNK: usize = 1024;

/// A byte source whose reads can be bounded in time.
pub trait TimedRead {
    /// Read into `buf`, blocking at most `wait`.
    ///
    /// A bounded wait that expires must surface as `WouldBlock` or `TimedOut`.
    fn read_within(&mut self, buf: &mut [u8], wait: Duration) -> io::Result<usize>;
}

impl TimedRead for TcpStream {
    fn read_within(&mut self, buf: &mut [u8], wait: Duration) -> io::Result<usize> {
        // A zero timeout is rejected by the socket API.
        self.set_read_timeout(Some(wait.max(Duration::from_millis(1))))?;
        self.read(buf)
    }
}

/// Termination policy for one reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSpec {
    /// Stop as soon as this many delimiters are buffered (`None`: silence only).
    pub expected_lines: Option<usize>,
    pub delimiter: u8,
    /// Wait for the first byte of the reply.
    pub response_timeout: Duration,
    /// Silence after the last byte that ends the reply.
    pub idle_timeout: Duration,
}

impl FrameSpec {
    pub fn lines(expected_lines: usize, response_timeout: Duration, idle_timeout: Duration) -> Self {
        Self {
            expected_lines: Some(expected_lines),
            delimiter: LINE_DELIMITER,
            response_timeout,
            idle_timeout,
        }
    }
}

/// `true` for the error kinds a bounded read reports when its wait expires.
pub fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

/// Accumulate one reply from `source` according to `spec`.
///
/// Returns `Ok(None)` when nothing meaningful arrived (silence, or a reply
/// consisting only of noise and whitespace). Peer EOF before any byte is an
/// `UnexpectedEof` error; EOF after some bytes ends the reply normally.
pub fn read_frame<R: TimedRead + ?Sized>(
    source: &mut R,
    spec: &FrameSpec,
) -> io::Result<Option<String>> {
    let mut buffer: Vec<u8> = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];
    let mut line_count = 0usize;

    loop {
        let wait = if buffer.is_empty() {
            spec.response_timeout
        } else {
            spec.idle_timeout
        };

        match source.read_within(&mut chunk, wait) {
            Ok(0) => {
                if buffer.is_empty() {
                    return Err(io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "peer closed the connection",
                    ));
                }
                break;
            }
            Ok(n) => {
                trace!("rx {:02x?}", &chunk[..n]);
                line_count += chunk[..n].iter().filter(|b| **b == spec.delimiter).count();
                buffer.extend_from_slice(&chunk[..n]);
                if spec.expected_lines.is_some_and(|expected| line_count >= expected) {
                    break;
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if is_timeout(&e) => break,
            Err(e) => return Err(e),
        }
    }

    Ok(finish(buffer))
}

/// Strip sentinel bytes, decode leniently and trim.
pub fn finish(mut buffer: Vec<u8>) -> Option<String> {
    buffer.retain(|b| *b != SENTINEL_BYTE);
    let text = String::from_utf8_lossy(&buffer);
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
