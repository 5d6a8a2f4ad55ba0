//! JPEG payload framing over an unbounded byte stream.
//!
//! ESP32 cameras push JPEG images back to back with no length prefix. Payloads
//! are delimited purely by the SOI (`FF D8`) and EOI (`FF D9`) markers.

use std::io::Read;

use crate::error::FrameError;

pub const START_MARKER: [u8; 2] = [0xFF, 0xD8];
pub const END_MARKER: [u8; 2] = [0xFF, 0xD9];

/// Upper bound on undelimited bytes held for one connection.
pub const MAX_BUFFER_BYTES: usize = 10 * 1024 * 1024;

const READ_CHUNK_BYTES: usize = 8192;

/// Find the first complete payload in `buffer`.
///
/// Returns `(payload, remainder)` where `payload` runs from the first start
/// marker through its matching end marker inclusive and `remainder` is every
/// byte after that end marker. An end marker that appears before the first
/// start marker is never paired with it.
pub fn extract_payload(buffer: &[u8]) -> Option<(&[u8], &[u8])> {
    let start = find_marker(buffer, START_MARKER, 0)?;
    let end = find_marker(buffer, END_MARKER, start + 2)?;
    Some((&buffer[start..end + 2], &buffer[end + 2..]))
}

fn find_marker(buffer: &[u8], marker: [u8; 2], from: usize) -> Option<usize> {
    buffer
        .get(from..)?
        .windows(2)
        .position(|pair| pair == marker)
        .map(|pos| pos + from)
}

/// Growable accumulator for bytes read since the last extracted payload.
#[derive(Debug)]
pub struct StreamBuffer {
    bytes: Vec<u8>,
    cap: usize,
}

impl Default for StreamBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamBuffer {
    pub fn new() -> Self {
        Self::with_cap(MAX_BUFFER_BYTES)
    }

    pub fn with_cap(cap: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(64 * 1024),
            cap: cap.max(2),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    /// Append newly read bytes. The cap is enforced by `take_payload` once it
    /// knows no complete payload is buffered.
    pub fn push(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    /// Remove and return the next complete payload, keeping the remainder.
    ///
    /// When nothing complete is buffered, bytes ahead of the first start
    /// marker are discarded, and a partial payload that has outgrown the cap
    /// is dropped. A trailing `FF` is kept in both cases so a marker split
    /// across reads still survives.
    pub fn take_payload(&mut self) -> Option<Vec<u8>> {
        if let Some((payload, remainder)) = extract_payload(&self.bytes) {
            let payload = payload.to_vec();
            let consumed = self.bytes.len() - remainder.len();
            self.bytes.drain(..consumed);
            return Some(payload);
        }
        self.discard_unusable();
        None
    }

    fn discard_unusable(&mut self) {
        let start = find_marker(&self.bytes, START_MARKER, 0);
        let junk = match start {
            Some(start) => start,
            None => self.bytes.len() - self.trailing_marker_byte(),
        };
        if junk > 0 {
            self.bytes.drain(..junk);
        }
        if self.bytes.len() > self.cap {
            let keep = self.trailing_marker_byte();
            let drain_len = self.bytes.len() - keep;
            log::warn!(
                "StreamBuffer: no complete payload within {} bytes, dropping {} bytes",
                self.cap,
                drain_len
            );
            self.bytes.drain(..drain_len);
        }
    }

    fn trailing_marker_byte(&self) -> usize {
        usize::from(self.bytes.last() == Some(&0xFF))
    }

    /// Read from `reader` until one complete payload is available.
    pub fn read_payload<R: Read + ?Sized>(&mut self, reader: &mut R) -> Result<Vec<u8>, FrameError> {
        let mut chunk = [0u8; READ_CHUNK_BYTES];
        loop {
            if let Some(payload) = self.take_payload() {
                return Ok(payload);
            }
            let read = reader.read(&mut chunk).map_err(|err| FrameError::from_io(&err))?;
            if read == 0 {
                return Err(FrameError::Io("stream ended".to_string()));
            }
            self.push(&chunk[..read]);
        }
    }
}
