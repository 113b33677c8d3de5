//! Reassembles backend frames from arbitrary byte chunks.

use dbwire_core::{Error, Result};

use super::{BackendMessage, Frame, MAX_FRAME_LEN};

/// Buffers received bytes and hands out complete frames.
///
/// Bytes can arrive split anywhere, down to one byte per chunk; a frame is
/// only produced once all of it has been fed.
#[derive(Debug, Default)]
pub struct MessageReader {
    buf: Vec<u8>,
}

impl MessageReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes received but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Consume one raw byte (the SSLRequest answer has no framing).
    pub fn take_byte(&mut self) -> Option<u8> {
        if self.buf.is_empty() {
            return None;
        }
        Some(self.buf.remove(0))
    }

    /// Next complete frame, or `None` if more bytes are needed.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.buf.len() < 5 {
            return Ok(None);
        }
        let tag = self.buf[0];
        let declared = i32::from_be_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]]);
        let Ok(len) = usize::try_from(declared) else {
            return Err(Error::protocol(format!(
                "negative length {declared} in '{}' frame",
                char::from(tag)
            )));
        };
        if len < 4 || len > MAX_FRAME_LEN {
            return Err(Error::protocol(format!(
                "invalid length {len} in '{}' frame",
                char::from(tag)
            )));
        }
        let total = 1 + len;
        if self.buf.len() < total {
            return Ok(None);
        }
        let payload = self.buf[5..total].to_vec();
        self.buf.drain(..total);
        Ok(Some(Frame { tag, payload }))
    }

    /// Next complete frame, parsed.
    pub fn next_message(&mut self) -> Result<Option<BackendMessage>> {
        match self.next_frame()? {
            Some(frame) => BackendMessage::parse(&frame).map(Some),
            None => Ok(None),
        }
    }
}
