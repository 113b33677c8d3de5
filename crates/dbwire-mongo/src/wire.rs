//! `OP_MSG` framing.
//!
//! ```text
//! +-------------+------------+------------+---------+
//! | length: i32 | request_id | response_to| op_code |   16-byte header
//! +-------------+------------+------------+---------+
//! | flag_bits: u32 | kind: u8 (0) | BSON body        |
//! +----------------+--------------+------------------+
//! ```
//!
//! Only single-document (kind 0) sections are produced or accepted.

use dbwire_bson::{BsonDocument, decode_document, encode_into};
use dbwire_core::{Error, Result};

pub const OP_MSG: i32 = 2013;
pub const HEADER_LEN: usize = 16;
/// Header, flag bits and the section kind byte.
pub const BODY_OFFSET: usize = HEADER_LEN + 5;
/// Server default `maxMessageSizeBytes`.
pub const MAX_MESSAGE_SIZE: usize = 48_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub length: i32,
    pub request_id: i32,
    pub response_to: i32,
    pub op_code: i32,
}

impl MessageHeader {
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let field = |at: usize| {
            let b = bytes.get(at..at + 4)?;
            Some(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        };
        Some(Self {
            length: field(0)?,
            request_id: field(4)?,
            response_to: field(8)?,
            op_code: field(12)?,
        })
    }
}

/// A decoded server reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub header: MessageHeader,
    pub flags: u32,
    pub document: BsonDocument,
}

/// Frame `command` as an `OP_MSG` with a single kind-0 section.
pub fn encode_op_msg(request_id: i32, command: &BsonDocument) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(128);
    buf.extend_from_slice(&[0; 4]);
    buf.extend_from_slice(&request_id.to_le_bytes());
    buf.extend_from_slice(&0i32.to_le_bytes());
    buf.extend_from_slice(&OP_MSG.to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes());
    buf.push(0);
    encode_into(command, &mut buf)?;

    let length = i32::try_from(buf.len())
        .map_err(|_| Error::protocol("command exceeds the maximum message size"))?;
    buf[..4].copy_from_slice(&length.to_le_bytes());
    Ok(buf)
}

/// Decode one complete `OP_MSG` frame.
pub fn decode_op_msg(frame: &[u8]) -> Result<Reply> {
    let header = MessageHeader::parse(frame)
        .ok_or_else(|| Error::protocol("truncated message header"))?;
    if header.op_code != OP_MSG {
        return Err(Error::protocol(format!(
            "unsupported reply opcode {}",
            header.op_code
        )));
    }
    if frame.len() < BODY_OFFSET {
        return Err(Error::protocol("OP_MSG reply too short"));
    }
    let flags = u32::from_le_bytes([frame[16], frame[17], frame[18], frame[19]]);
    let kind = frame[HEADER_LEN + 4];
    if kind != 0 {
        return Err(Error::protocol(format!(
            "unsupported OP_MSG section kind {kind}"
        )));
    }
    let (document, _) = decode_document(frame, BODY_OFFSET)?;
    Ok(Reply {
        header,
        flags,
        document,
    })
}

/// Accumulates transport chunks until a whole message is available.
#[derive(Debug, Default)]
pub struct MessageReader {
    buf: Vec<u8>,
}

impl MessageReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Next complete reply, `Ok(None)` while the message is still partial.
    pub fn next_reply(&mut self) -> Result<Option<Reply>> {
        let Some(prefix) = self.buf.get(..4) else {
            return Ok(None);
        };
        let declared = i32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
        let length = usize::try_from(declared)
            .ok()
            .filter(|len| (BODY_OFFSET..=MAX_MESSAGE_SIZE).contains(len))
            .ok_or_else(|| Error::protocol(format!("invalid message length {declared}")))?;
        if self.buf.len() < length {
            return Ok(None);
        }
        let frame: Vec<u8> = self.buf.drain(..length).collect();
        decode_op_msg(&frame).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbwire_bson::BsonValue;

    fn as_reply(request_id: i32, response_to: i32, doc: &BsonDocument) -> Vec<u8> {
        let mut bytes = encode_op_msg(request_id, doc).unwrap();
        bytes[8..12].copy_from_slice(&response_to.to_le_bytes());
        bytes
    }

    #[test]
    fn test_encode_layout() {
        let doc = BsonDocument::new().with("ping", 1).with("$db", "admin");
        let bytes = encode_op_msg(7, &doc).unwrap();

        let header = MessageHeader::parse(&bytes).unwrap();
        assert_eq!(header.length as usize, bytes.len());
        assert_eq!(header.request_id, 7);
        assert_eq!(header.response_to, 0);
        assert_eq!(header.op_code, 2013);
        assert_eq!(&bytes[16..20], &[0, 0, 0, 0]);
        assert_eq!(bytes[20], 0);
        assert_eq!(&bytes[21..], dbwire_bson::encode(&doc).unwrap().as_slice());
    }

    #[test]
    fn test_reader_waits_for_whole_message() {
        let doc = BsonDocument::new()
            .with("ok", 1.0)
            .with("n", BsonValue::Int32(3));
        let bytes = as_reply(100, 1, &doc);

        let mut reader = MessageReader::new();
        for (i, byte) in bytes.iter().enumerate() {
            assert!(reader.next_reply().unwrap().is_none(), "complete at byte {i}");
            reader.feed(&[*byte]);
        }
        let reply = reader.next_reply().unwrap().unwrap();
        assert_eq!(reply.header.response_to, 1);
        assert_eq!(reply.document, doc);
        assert_eq!(reader.buffered(), 0);
    }

    #[test]
    fn test_two_messages_in_one_chunk() {
        let first = BsonDocument::new().with("a", 1);
        let second = BsonDocument::new().with("b", 2);
        let mut reader = MessageReader::new();
        reader.feed(&as_reply(1, 1, &first));
        reader.feed(&as_reply(2, 2, &second));

        assert_eq!(reader.next_reply().unwrap().unwrap().document, first);
        assert_eq!(reader.next_reply().unwrap().unwrap().document, second);
        assert!(reader.next_reply().unwrap().is_none());
    }

    #[test]
    fn test_rejects_other_section_kinds() {
        let mut bytes = as_reply(1, 1, &BsonDocument::new().with("ok", 1));
        bytes[20] = 1;
        let err = decode_op_msg(&bytes).unwrap_err();
        assert!(err.to_string().contains("section kind 1"), "{err}");
    }

    #[test]
    fn test_rejects_legacy_opcode_and_bad_length() {
        let mut bytes = as_reply(1, 1, &BsonDocument::new().with("ok", 1));
        bytes[12..16].copy_from_slice(&1i32.to_le_bytes());
        assert!(decode_op_msg(&bytes).is_err());

        let mut reader = MessageReader::new();
        reader.feed(&(-5i32).to_le_bytes());
        assert!(reader.next_reply().is_err());
    }
}
