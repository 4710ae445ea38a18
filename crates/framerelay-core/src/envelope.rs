//! Self-delimiting wire envelope for one encoded frame.
//!
//! # Layout
//!
//! ```text
//! --frame\r\n
//! Content-Type: image/jpeg\r\n
//! Content-Length: <N>\r\n
//! X-Frame-Index: <index>\r\n
//! X-Timestamp: <seconds>\r\n
//! X-Orientation: <exif code>\r\n
//! \r\n
//! <N payload bytes>\r\n
//! ```
//!
//! The receiver parses the header block as text, then reads exactly
//! `Content-Length` bytes; it never scans the binary payload for a delimiter.
//! Envelopes are concatenated back to back on the stream.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};

use crate::errors::EnvelopeError;
use crate::types::Orientation;

// ── Constants ─────────────────────────────────────────────────────────────────

pub const BOUNDARY: &str = "--frame";
pub const TERMINATOR: &[u8] = b"\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";
/// Header blocks are a handful of short lines; anything larger is garbage.
pub const MAX_HEADER_BYTES: usize = 4 * 1024;

// ── Header ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct EnvelopeHeader {
    pub content_type: String,
    pub content_length: usize,
    pub frame_index: u64,
    pub timestamp: f64,
    pub orientation: Orientation,
}

// ── Builder ───────────────────────────────────────────────────────────────────

/// Wrap `payload` into an envelope.
///
/// Stateless: the caller owns and increments the frame index.
pub fn build_envelope(
    content_type: &str,
    payload: &[u8],
    index: u64,
    timestamp: f64,
    orientation: Orientation,
) -> Bytes {
    let header = format!(
        "{BOUNDARY}\r\n\
         Content-Type: {content_type}\r\n\
         Content-Length: {}\r\n\
         X-Frame-Index: {index}\r\n\
         X-Timestamp: {timestamp:.6}\r\n\
         X-Orientation: {}\r\n\
         \r\n",
        payload.len(),
        orientation.code(),
    );

    let mut buf = BytesMut::with_capacity(header.len() + payload.len() + TERMINATOR.len());
    buf.put_slice(header.as_bytes());
    buf.put_slice(payload);
    buf.put_slice(TERMINATOR);
    buf.freeze()
}

// ── Parser ────────────────────────────────────────────────────────────────────

/// One envelope parsed out of a byte buffer.
#[derive(Debug)]
pub struct ParsedEnvelope<'a> {
    pub header: EnvelopeHeader,
    pub payload: &'a [u8],
    /// Bytes of `buf` taken by this envelope, trailer included.
    pub consumed: usize,
}

/// Parse the envelope at the start of `buf`.
///
/// Returns [`EnvelopeError::Incomplete`] when `buf` holds only a prefix, so
/// callers can accumulate more bytes and retry.
pub fn parse_envelope(buf: &[u8]) -> Result<ParsedEnvelope<'_>, EnvelopeError> {
    let Some(header_len) = find(buf, HEADER_END) else {
        if buf.len() > MAX_HEADER_BYTES {
            return Err(EnvelopeError::HeaderTooLarge { max: MAX_HEADER_BYTES });
        }
        if !BOUNDARY.as_bytes().starts_with(&buf[..buf.len().min(BOUNDARY.len())]) {
            return Err(EnvelopeError::MissingBoundary);
        }
        return Err(EnvelopeError::Incomplete { needed: HEADER_END.len() });
    };

    let text = std::str::from_utf8(&buf[..header_len]).map_err(|_| EnvelopeError::MalformedHeader {
        line: String::from_utf8_lossy(&buf[..header_len]).into_owned(),
    })?;
    let header = parse_header_block(text.split("\r\n"))?;

    let body_start = header_len + HEADER_END.len();
    let (body_end, total) = body_start
        .checked_add(header.content_length)
        .and_then(|end| Some((end, end.checked_add(TERMINATOR.len())?)))
        .ok_or(EnvelopeError::MissingContentLength)?;
    if buf.len() < total {
        return Err(EnvelopeError::Incomplete { needed: total - buf.len() });
    }
    if &buf[body_end..total] != TERMINATOR {
        return Err(EnvelopeError::TrailerMismatch);
    }

    Ok(ParsedEnvelope { payload: &buf[body_start..body_end], header, consumed: total })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn parse_header_block<'a>(
    mut lines: impl Iterator<Item = &'a str>,
) -> Result<EnvelopeHeader, EnvelopeError> {
    if lines.next().map(str::trim_end) != Some(BOUNDARY) {
        return Err(EnvelopeError::MissingBoundary);
    }

    let mut content_type = None;
    let mut content_length = None;
    let mut frame_index = 0;
    let mut timestamp = 0.0;
    let mut orientation = Orientation::Up;

    for line in lines {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| EnvelopeError::MalformedHeader { line: line.to_owned() })?;
        let value = value.trim();
        let malformed = || EnvelopeError::MalformedHeader { line: line.to_owned() };

        match key.trim().to_ascii_lowercase().as_str() {
            "content-type" => content_type = Some(value.to_owned()),
            "content-length" => {
                content_length =
                    Some(value.parse().map_err(|_| EnvelopeError::MissingContentLength)?)
            }
            "x-frame-index" => frame_index = value.parse().map_err(|_| malformed())?,
            "x-timestamp" => timestamp = value.parse().map_err(|_| malformed())?,
            "x-orientation" => {
                orientation = value
                    .parse()
                    .ok()
                    .and_then(Orientation::from_code)
                    .ok_or_else(malformed)?
            }
            // Unknown headers are tolerated for forward compatibility.
            _ => {}
        }
    }

    Ok(EnvelopeHeader {
        content_type: content_type.unwrap_or_default(),
        content_length: content_length.ok_or(EnvelopeError::MissingContentLength)?,
        frame_index,
        timestamp,
        orientation,
    })
}

// ── Async stream reader ───────────────────────────────────────────────────────

/// Reads concatenated envelopes from a byte stream (consumer side).
pub struct EnvelopeReader<R> {
    inner: BufReader<R>,
    max_payload: usize,
}

impl<R: tokio::io::AsyncRead + Unpin> EnvelopeReader<R> {
    pub fn new(reader: R) -> Self {
        Self { inner: BufReader::new(reader), max_payload: 64 * 1024 * 1024 }
    }

    /// Reject envelopes announcing more than `max` payload bytes.
    pub fn with_max_payload(mut self, max: usize) -> Self {
        self.max_payload = max;
        self
    }

    /// Read the next envelope. `Ok(None)` on a clean end of stream between
    /// envelopes.
    pub async fn next_envelope(&mut self) -> std::io::Result<Option<(EnvelopeHeader, Bytes)>> {
        let mut lines = Vec::new();
        let mut header_bytes = 0usize;
        loop {
            let mut line = String::new();
            // One byte past the remaining budget so an overlong line is detected
            // without buffering it whole.
            let budget = (MAX_HEADER_BYTES - header_bytes) as u64 + 1;
            let n = (&mut self.inner).take(budget).read_line(&mut line).await?;
            if n == 0 {
                if lines.is_empty() {
                    return Ok(None);
                }
                return Err(std::io::ErrorKind::UnexpectedEof.into());
            }
            header_bytes += n;
            if header_bytes > MAX_HEADER_BYTES {
                return Err(invalid(EnvelopeError::HeaderTooLarge { max: MAX_HEADER_BYTES }));
            }
            let line = line.trim_end_matches(['\r', '\n']).to_owned();
            if line.is_empty() {
                if lines.is_empty() {
                    // Tolerate stray blank lines between envelopes.
                    continue;
                }
                break;
            }
            lines.push(line);
        }

        let header = parse_header_block(lines.iter().map(String::as_str)).map_err(invalid)?;
        if header.content_length > self.max_payload {
            return Err(invalid(EnvelopeError::MalformedHeader {
                line: format!("Content-Length: {}", header.content_length),
            }));
        }

        let mut payload = vec![0u8; header.content_length];
        self.inner.read_exact(&mut payload).await?;

        let mut trailer = [0u8; 2];
        self.inner.read_exact(&mut trailer).await?;
        if trailer != TERMINATOR {
            return Err(invalid(EnvelopeError::TrailerMismatch));
        }

        Ok(Some((header, Bytes::from(payload))))
    }
}

fn invalid(err: EnvelopeError) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, err)
}
