//! MySQL packet reading utilities.
//!
//! [`PacketReader`] walks the fields of one payload, including
//! length-encoded integers and strings. [`PacketBuffer`] cuts packets out of
//! the inbound byte stream.

use std::mem;

use crate::protocol::{MAX_PACKET_SIZE, Packet, PacketHeader};

/// A reader for MySQL protocol data.
#[derive(Debug)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Peek at the next byte without advancing.
    pub fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        let byte = self.data.get(self.pos)?;
        self.pos += 1;
        Some(*byte)
    }

    pub fn read_u16_le(&mut self) -> Option<u16> {
        let bytes = self.read_bytes(2)?;
        Some(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Read a u24 (little-endian, 3 bytes).
    pub fn read_u24_le(&mut self) -> Option<u32> {
        let bytes = self.read_bytes(3)?;
        Some(u32::from(bytes[0]) | (u32::from(bytes[1]) << 8) | (u32::from(bytes[2]) << 16))
    }

    pub fn read_u32_le(&mut self) -> Option<u32> {
        let bytes = self.read_bytes(4)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_u64_le(&mut self) -> Option<u64> {
        let low = self.read_u32_le()?;
        let high = self.read_u32_le()?;
        Some(u64::from(low) | (u64::from(high) << 32))
    }

    /// Read a length-encoded integer.
    ///
    /// MySQL uses a variable-length integer encoding:
    /// - 0x00-0xFA: 1-byte value
    /// - 0xFC: 2-byte value follows
    /// - 0xFD: 3-byte value follows
    /// - 0xFE: 8-byte value follows
    /// - 0xFB: NULL (only meaningful in rows, see [`read_lenenc_cell`](Self::read_lenenc_cell))
    pub fn read_lenenc_int(&mut self) -> Option<u64> {
        let first = self.read_u8()?;
        match first {
            0x00..=0xFA => Some(u64::from(first)),
            0xFC => self.read_u16_le().map(u64::from),
            0xFD => self.read_u24_le().map(u64::from),
            0xFE => self.read_u64_le(),
            0xFB | 0xFF => None,
        }
    }

    pub fn read_lenenc_string(&mut self) -> Option<String> {
        let len = usize::try_from(self.read_lenenc_int()?).ok()?;
        self.read_string(len)
    }

    pub fn read_lenenc_bytes(&mut self) -> Option<&'a [u8]> {
        let len = usize::try_from(self.read_lenenc_int()?).ok()?;
        self.read_bytes(len)
    }

    /// Read one text-protocol row cell: `Some(None)` for the `0xFB` NULL marker.
    pub fn read_lenenc_cell(&mut self) -> Option<Option<&'a [u8]>> {
        if self.peek() == Some(0xFB) {
            self.pos += 1;
            return Some(None);
        }
        self.read_lenenc_bytes().map(Some)
    }

    /// Read a null-terminated string. A missing terminator ends the string at
    /// the end of the payload.
    pub fn read_null_string(&mut self) -> Option<String> {
        let rest = self.data.get(self.pos..)?;
        let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
        let s = String::from_utf8_lossy(&rest[..end]).into_owned();
        self.pos += (end + 1).min(rest.len());
        Some(s)
    }

    pub fn read_string(&mut self, len: usize) -> Option<String> {
        let bytes = self.read_bytes(len)?;
        Some(String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn read_rest_string(&mut self) -> String {
        String::from_utf8_lossy(self.read_rest()).into_owned()
    }

    pub fn read_bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        if self.remaining() < len {
            return None;
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Some(bytes)
    }

    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = self.data.get(self.pos..).unwrap_or_default();
        self.pos = self.data.len();
        rest
    }

    /// Skip up to `n` bytes; returns false if fewer were available.
    pub fn skip(&mut self, n: usize) -> bool {
        if self.remaining() >= n {
            self.pos += n;
            true
        } else {
            self.pos = self.data.len();
            false
        }
    }
}

/// Accumulates inbound bytes and yields complete packets.
///
/// Payloads of exactly `MAX_PACKET_SIZE` bytes continue in the next packet;
/// those pieces are joined before the packet is returned.
#[derive(Debug, Default)]
pub struct PacketBuffer {
    buf: Vec<u8>,
    partial: Vec<u8>,
}

impl PacketBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes received but not yet returned as a packet.
    pub fn buffered(&self) -> usize {
        self.buf.len() + self.partial.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.partial.clear();
    }

    /// Next complete packet, or `None` until more bytes arrive.
    pub fn next_packet(&mut self) -> Option<Packet> {
        loop {
            let header_bytes: &[u8; 4] = self.buf.get(..PacketHeader::SIZE)?.try_into().ok()?;
            let header = PacketHeader::from_bytes(header_bytes);
            let len = header.payload_length as usize;
            let total = PacketHeader::SIZE + len;
            if self.buf.len() < total {
                return None;
            }

            self.partial
                .extend_from_slice(&self.buf[PacketHeader::SIZE..total]);
            self.buf.drain(..total);

            if len == MAX_PACKET_SIZE {
                continue;
            }
            return Some(Packet {
                sequence_id: header.sequence_id,
                payload: mem::take(&mut self.partial),
            });
        }
    }
}
