//! MySQL wire protocol implementation.
//!
//! MySQL packets have a 4-byte header:
//! - 3 bytes: payload length (little-endian)
//! - 1 byte: sequence number
//!
//! Maximum packet payload is 2^24 - 1 (16MB - 1). Larger payloads
//! are split into multiple packets.

pub mod reader;
pub mod writer;

use dbwire_core::error::{QueryError, QueryErrorKind};
use dbwire_core::{Error, Result};

pub use reader::{PacketBuffer, PacketReader};
pub use writer::{PacketWriter, build_packets};

/// Maximum payload size for a single MySQL packet (2^24 - 1 bytes).
pub const MAX_PACKET_SIZE: usize = 0xFF_FF_FF;

/// Largest packet this client accepts, announced in the handshake response.
pub const CLIENT_MAX_PACKET: u32 = 0x0100_0000;

/// MySQL capability flags (client and server).
pub mod capabilities {
    pub const CLIENT_LONG_PASSWORD: u32 = 1;
    pub const CLIENT_CONNECT_WITH_DB: u32 = 1 << 3;
    pub const CLIENT_PROTOCOL_41: u32 = 1 << 9;
    pub const CLIENT_SSL: u32 = 1 << 11;
    pub const CLIENT_TRANSACTIONS: u32 = 1 << 13;
    pub const CLIENT_SECURE_CONNECTION: u32 = 1 << 15;
    pub const CLIENT_MULTI_RESULTS: u32 = 1 << 17;
    pub const CLIENT_PLUGIN_AUTH: u32 = 1 << 19;
    pub const CLIENT_DEPRECATE_EOF: u32 = 1 << 24;

    /// Flags sent in every handshake response.
    pub const DEFAULT_CLIENT_FLAGS: u32 = CLIENT_PROTOCOL_41
        | CLIENT_SECURE_CONNECTION
        | CLIENT_LONG_PASSWORD
        | CLIENT_TRANSACTIONS
        | CLIENT_MULTI_RESULTS
        | CLIENT_PLUGIN_AUTH
        | CLIENT_DEPRECATE_EOF;
}

/// MySQL command codes (COM_xxx) this client sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Quit = 0x01,
    /// Text protocol query
    Query = 0x03,
}

/// MySQL server status flags.
pub mod server_status {
    pub const SERVER_STATUS_IN_TRANS: u16 = 0x0001;
    pub const SERVER_STATUS_AUTOCOMMIT: u16 = 0x0002;
    pub const SERVER_MORE_RESULTS_EXISTS: u16 = 0x0008;
}

/// MySQL character set codes.
pub mod charset {
    pub const BINARY: u16 = 63;
    pub const UTF8MB4_GENERAL_CI: u8 = 45;
}

/// A MySQL packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Payload length (3 bytes, max 16MB - 1)
    pub payload_length: u32,
    /// Sequence number (wraps at 255)
    pub sequence_id: u8,
}

impl PacketHeader {
    pub const SIZE: usize = 4;

    pub fn from_bytes(bytes: &[u8; 4]) -> Self {
        let payload_length =
            u32::from(bytes[0]) | (u32::from(bytes[1]) << 8) | (u32::from(bytes[2]) << 16);
        Self {
            payload_length,
            sequence_id: bytes[3],
        }
    }

    pub fn to_bytes(&self) -> [u8; 4] {
        [
            (self.payload_length & 0xFF) as u8,
            ((self.payload_length >> 8) & 0xFF) as u8,
            ((self.payload_length >> 16) & 0xFF) as u8,
            self.sequence_id,
        ]
    }
}

/// One logical packet, reassembled if the server split it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Sequence number of the last physical packet
    pub sequence_id: u8,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn first_byte(&self) -> Option<u8> {
        self.payload.first().copied()
    }

    pub fn is_err(&self) -> bool {
        self.first_byte() == Some(0xFF)
    }

    pub fn is_ok(&self) -> bool {
        self.first_byte() == Some(0x00)
    }

    /// Classic EOF marker: `0xFE` with a payload shorter than 9 bytes.
    pub fn is_eof(&self) -> bool {
        self.first_byte() == Some(0xFE) && self.payload.len() < 9
    }

    /// Row-stream terminator when `CLIENT_DEPRECATE_EOF` is in effect: an OK
    /// packet with the `0xFE` header.
    pub fn is_eof_ok(&self) -> bool {
        self.first_byte() == Some(0xFE) && self.payload.len() < MAX_PACKET_SIZE
    }
}

/// Parsed OK packet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OkPacket {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: u16,
    pub warnings: u16,
    pub info: String,
}

impl OkPacket {
    /// Parse an OK packet, header byte (`0x00` or `0xFE`) included.
    ///
    /// OK packet format (protocol 4.1+):
    /// - header byte
    /// - affected_rows: lenenc int
    /// - last_insert_id: lenenc int
    /// - status_flags: 2 bytes
    /// - warnings: 2 bytes
    /// - info: rest of packet (optional)
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut reader = PacketReader::new(payload);
        reader.skip(1);
        let truncated = || Error::protocol("truncated OK packet");

        let affected_rows = reader.read_lenenc_int().ok_or_else(truncated)?;
        let last_insert_id = reader.read_lenenc_int().ok_or_else(truncated)?;
        let status_flags = reader.read_u16_le().unwrap_or(0);
        let warnings = reader.read_u16_le().unwrap_or(0);
        let info = reader.read_rest_string();

        Ok(Self {
            affected_rows,
            last_insert_id,
            status_flags,
            warnings,
            info,
        })
    }
}

/// Parsed Error packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrPacket {
    pub error_code: u16,
    /// SQL state (5 characters), empty when the server sent none
    pub sql_state: String,
    pub error_message: String,
}

impl ErrPacket {
    /// Parse an ERR packet, `0xFF` header included.
    ///
    /// ERR packet format (protocol 4.1+):
    /// - 0xFF header
    /// - error_code: 2 bytes
    /// - optional '#' marker + sql_state: 5 bytes
    /// - error_message: rest of packet
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut reader = PacketReader::new(payload);
        reader.skip(1);
        let error_code = reader
            .read_u16_le()
            .ok_or_else(|| Error::protocol("truncated ERR packet"))?;

        let sql_state = if reader.peek() == Some(b'#') {
            reader.skip(1);
            reader
                .read_string(5)
                .ok_or_else(|| Error::protocol("truncated SQL state in ERR packet"))?
        } else {
            String::new()
        };

        Ok(Self {
            error_code,
            sql_state,
            error_message: reader.read_rest_string(),
        })
    }

    /// Server-reported error carrying the code, state and message.
    pub fn into_error(self) -> Error {
        let kind = match self.error_code {
            1062 | 1451 | 1452 => QueryErrorKind::Constraint,
            1044 | 1045 | 1142 => QueryErrorKind::Permission,
            1049 | 1054 | 1146 => QueryErrorKind::NotFound,
            1064 => QueryErrorKind::Syntax,
            _ if !self.sql_state.is_empty() => QueryErrorKind::from_sqlstate(&self.sql_state),
            _ => QueryErrorKind::Database,
        };
        Error::Query(QueryError {
            kind,
            sql: None,
            sqlstate: (!self.sql_state.is_empty()).then_some(self.sql_state),
            code: Some(i64::from(self.error_code)),
            message: self.error_message,
            detail: None,
            hint: None,
        })
    }
}

/// Parsed EOF packet (replaced by OK when `CLIENT_DEPRECATE_EOF` is negotiated).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EofPacket {
    pub warnings: u16,
    pub status_flags: u16,
}

impl EofPacket {
    pub fn parse(payload: &[u8]) -> Self {
        let mut reader = PacketReader::new(payload);
        reader.skip(1);
        Self {
            warnings: reader.read_u16_le().unwrap_or(0),
            status_flags: reader.read_u16_le().unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_header_roundtrip() {
        let header = PacketHeader {
            payload_length: 0x0012_3456,
            sequence_id: 7,
        };
        assert_eq!(PacketHeader::from_bytes(&header.to_bytes()), header);
    }

    #[test]
    fn test_packet_header_max_size() {
        let header = PacketHeader {
            payload_length: MAX_PACKET_SIZE as u32,
            sequence_id: 255,
        };
        assert_eq!(header.to_bytes(), [0xFF, 0xFF, 0xFF, 255]);
    }

    #[test]
    fn test_packet_classification() {
        let packet = |payload: Vec<u8>| Packet {
            sequence_id: 0,
            payload,
        };
        assert!(packet(vec![0x00, 0, 0, 2, 0, 0, 0]).is_ok());
        assert!(packet(vec![0xFF, 0x15, 0x04]).is_err());
        assert!(packet(vec![0xFE, 0, 0, 2, 0]).is_eof());
        assert!(!packet(vec![0xFE; 9]).is_eof());
        assert!(packet(vec![0xFE; 9]).is_eof_ok());
        assert!(!packet(vec![0x03, b'a', b'b', b'c']).is_eof_ok());
    }

    #[test]
    fn test_parse_ok_packet() {
        // affected_rows=1, last_insert_id=42, status=2, warnings=0
        let ok = OkPacket::parse(&[0x00, 0x01, 0x2A, 0x02, 0x00, 0x00, 0x00]).unwrap();
        assert_eq!(ok.affected_rows, 1);
        assert_eq!(ok.last_insert_id, 42);
        assert_eq!(ok.status_flags, 2);
        assert_eq!(ok.warnings, 0);

        assert!(OkPacket::parse(&[0x00]).is_err());
    }

    #[test]
    fn test_parse_err_packet() {
        let mut data = vec![0xFF, 0x15, 0x04, b'#'];
        data.extend_from_slice(b"28000");
        data.extend_from_slice(b"Access denied");
        let err = ErrPacket::parse(&data).unwrap();
        assert_eq!(err.error_code, 1045);
        assert_eq!(err.sql_state, "28000");
        assert_eq!(err.error_message, "Access denied");

        let error = err.into_error();
        assert_eq!(error.sqlstate(), Some("28000"));
        assert!(matches!(
            &error,
            Error::Query(q) if q.code == Some(1045) && q.kind == QueryErrorKind::Permission
        ));
    }

    #[test]
    fn test_parse_err_packet_without_state() {
        let mut data = vec![0xFF, 0x69, 0x04];
        data.extend_from_slice(b"Host '10.0.0.9' is blocked");
        let err = ErrPacket::parse(&data).unwrap();
        assert_eq!(err.error_code, 1129);
        assert!(err.sql_state.is_empty());
        assert_eq!(err.into_error().sqlstate(), None);
    }

    #[test]
    fn test_parse_eof_packet() {
        let eof = EofPacket::parse(&[0xFE, 0x01, 0x00, 0x0A, 0x00]);
        assert_eq!(eof.warnings, 1);
        assert_eq!(eof.status_flags, 0x0A);
    }
}
