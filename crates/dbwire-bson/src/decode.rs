//! BSON bytes to document.

use crate::document::{BsonDocument, BsonValue, Timestamp};
use crate::error::{BsonError, Result};
use crate::oid::ObjectId;
use crate::tag::{ElementType, BINARY_OLD};

const MAX_DEPTH: usize = 100;

/// Decode the single document that fills `bytes`.
pub fn decode(bytes: &[u8]) -> Result<BsonDocument> {
    let (doc, _) = decode_document(bytes, 0)?;
    Ok(doc)
}

/// Decode the document starting at `offset`, returning it together with
/// the number of bytes it occupied.
pub fn decode_document(bytes: &[u8], offset: usize) -> Result<(BsonDocument, usize)> {
    let mut reader = Reader { bytes, pos: offset };
    let mut doc = BsonDocument::new();
    reader.read_elements(0, |key, value| doc.insert(key, value))?;
    Ok((doc, reader.pos - offset))
}

/// Length of the document starting at `offset`, if its header is present.
pub fn peek_document_len(bytes: &[u8], offset: usize) -> Option<usize> {
    let header = bytes.get(offset..offset + 4)?;
    let len = i32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    usize::try_from(len).ok()
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|&end| end <= self.bytes.len());
        match end {
            Some(end) => {
                let slice = &self.bytes[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(BsonError::UnexpectedEof {
                offset: self.pos,
                needed: n - self.bytes.len().saturating_sub(self.pos),
            }),
        }
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_i32(&mut self) -> Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_8(&mut self) -> Result<[u8; 8]> {
        let b = self.take(8)?;
        let mut out = [0u8; 8];
        out.copy_from_slice(b);
        Ok(out)
    }

    /// A length header that must be at least `min` and fit the input.
    fn read_len(&mut self, min: i32) -> Result<usize> {
        let offset = self.pos;
        let len = self.read_i32()?;
        if len < min {
            return Err(BsonError::InvalidLength {
                offset,
                length: i64::from(len),
            });
        }
        Ok(len as usize)
    }

    fn read_cstring(&mut self) -> Result<String> {
        let start = self.pos;
        let rest = self.bytes.get(start..).unwrap_or_default();
        let Some(nul) = rest.iter().position(|&b| b == 0) else {
            return Err(BsonError::MissingTerminator { offset: start });
        };
        let s = std::str::from_utf8(&rest[..nul])
            .map_err(|_| BsonError::InvalidUtf8 { offset: start })?
            .to_string();
        self.pos = start + nul + 1;
        Ok(s)
    }

    fn read_string(&mut self) -> Result<String> {
        let len = self.read_len(1)?;
        let start = self.pos;
        let raw = self.take(len)?;
        let (body, terminator) = raw.split_at(len - 1);
        if terminator != [0] {
            return Err(BsonError::MissingTerminator {
                offset: start + len - 1,
            });
        }
        std::str::from_utf8(body)
            .map(str::to_string)
            .map_err(|_| BsonError::InvalidUtf8 { offset: start })
    }

    /// Walk the elements of the document at the cursor, handing each one to
    /// `sink`, and leave the cursor just past its terminator.
    fn read_elements(
        &mut self,
        depth: usize,
        mut sink: impl FnMut(String, BsonValue),
    ) -> Result<()> {
        if depth > MAX_DEPTH {
            return Err(BsonError::TooDeep);
        }
        let start = self.pos;
        let len = self.read_len(5)?;
        let end = start + len;
        if end > self.bytes.len() {
            return Err(BsonError::UnexpectedEof {
                offset: start,
                needed: end - self.bytes.len(),
            });
        }

        while self.pos < end - 1 {
            let tag = self.read_u8()?;
            let key = self.read_cstring()?;
            let value = self.read_value(tag, &key, depth)?;
            sink(key, value);
        }
        if self.pos != end - 1 || self.bytes[end - 1] != 0 {
            return Err(BsonError::MissingTerminator { offset: end - 1 });
        }
        self.pos = end;
        Ok(())
    }

    fn read_value(&mut self, tag: u8, key: &str, depth: usize) -> Result<BsonValue> {
        let Some(kind) = ElementType::from_u8(tag) else {
            return Err(BsonError::UnsupportedType {
                tag,
                key: key.to_string(),
            });
        };

        Ok(match kind {
            ElementType::Double => BsonValue::Double(f64::from_le_bytes(self.read_8()?)),
            ElementType::String => BsonValue::String(self.read_string()?),
            ElementType::Document => {
                let mut doc = BsonDocument::new();
                self.read_elements(depth + 1, |k, v| doc.insert(k, v))?;
                BsonValue::Document(doc)
            }
            ElementType::Array => {
                let mut items = Vec::new();
                self.read_elements(depth + 1, |_, v| items.push(v))?;
                BsonValue::Array(items)
            }
            ElementType::Binary => BsonValue::Binary(self.read_binary()?),
            ElementType::ObjectId => {
                let mut id = [0u8; 12];
                id.copy_from_slice(self.take(12)?);
                BsonValue::ObjectId(ObjectId::from_bytes(id))
            }
            ElementType::Boolean => BsonValue::Boolean(self.read_u8()? != 0),
            ElementType::DateTime => BsonValue::DateTime(i64::from_le_bytes(self.read_8()?)),
            ElementType::Null => BsonValue::Null,
            ElementType::Int32 => BsonValue::Int32(self.read_i32()?),
            ElementType::Timestamp => {
                let packed = u64::from_le_bytes(self.read_8()?);
                BsonValue::Timestamp(Timestamp {
                    time: (packed >> 32) as u32,
                    increment: (packed & 0xffff_ffff) as u32,
                })
            }
            ElementType::Int64 => BsonValue::Int64(i64::from_le_bytes(self.read_8()?)),
        })
    }

    fn read_binary(&mut self) -> Result<Vec<u8>> {
        let len = self.read_len(0)?;
        let subtype = self.read_u8()?;
        let data = self.take(len)?;
        if subtype == BINARY_OLD && data.len() >= 4 {
            return Ok(data[4..].to_vec());
        }
        Ok(data.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::encode;

    fn every_variant() -> BsonDocument {
        let id = ObjectId::parse_str("65a1b2c3d4e5f60718293a4b").unwrap();
        let inner = BsonDocument::new()
            .with("pi", 3.25)
            .with("when", BsonValue::DateTime(1_700_000_000_123))
            .with("blob", BsonValue::Binary(vec![0, 1, 2, 255]))
            .with("ts", BsonValue::Timestamp(Timestamp { time: 1_700_000_000, increment: 7 }))
            .with("deeper", BsonDocument::new().with("id", id).with("nil", BsonValue::Null));

        BsonDocument::new()
            .with("_id", id)
            .with("name", "Ada")
            .with("active", true)
            .with("age", 36)
            .with("score", -0.5)
            .with("missing", BsonValue::Null)
            .with("profile", inner.clone())
            .with(
                "tags",
                vec![
                    BsonValue::from("x"),
                    BsonValue::Int32(2),
                    BsonValue::Document(inner),
                    BsonValue::Array(vec![BsonValue::Boolean(false)]),
                ],
            )
            .with("empty", BsonDocument::new())
    }

    #[test]
    fn test_round_trip_every_encodable_variant() {
        let doc = every_variant();
        let bytes = encode(&doc).unwrap();
        let (decoded, consumed) = decode_document(&bytes, 0).unwrap();
        assert_eq!(decoded, doc);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn test_round_trip_preserves_key_order() {
        let doc = BsonDocument::new()
            .with("a", 1)
            .with("b", "x")
            .with("c", BsonValue::Null);
        let decoded = decode(&encode(&doc).unwrap()).unwrap();
        assert_eq!(decoded, doc);
        assert_eq!(decoded.keys().collect::<Vec<_>>(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_int64_decodes_but_encodes_narrow() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&16i32.to_le_bytes());
        bytes.extend_from_slice(&[0x12, b'n', 0]);
        bytes.extend_from_slice(&(1i64 << 40).to_le_bytes());
        bytes.push(0);

        let doc = decode(&bytes).unwrap();
        assert_eq!(doc.get("n"), Some(&BsonValue::Int64(1 << 40)));

        let again = decode(&encode(&doc).unwrap()).unwrap();
        assert_eq!(again.get("n"), Some(&BsonValue::Double((1i64 << 40) as f64)));

        let small = BsonDocument::new().with("n", 5i64);
        let again = decode(&encode(&small).unwrap()).unwrap();
        assert_eq!(again.get("n"), Some(&BsonValue::Int32(5)));
    }

    #[test]
    fn test_unsupported_type_is_fatal() {
        // 0x13 is decimal128, which this codec does not read.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&24i32.to_le_bytes());
        bytes.extend_from_slice(&[0x13, b'd', 0]);
        bytes.extend_from_slice(&[0; 16]);
        bytes.push(0);

        let err = decode(&bytes).unwrap_err();
        assert_eq!(
            err,
            BsonError::UnsupportedType {
                tag: 0x13,
                key: "d".into()
            }
        );
        assert!(err.to_string().contains("unsupported BSON type"));
    }

    #[test]
    fn test_truncated_input() {
        let bytes = encode(&every_variant()).unwrap();
        for cut in [0, 3, 10, bytes.len() - 1] {
            assert!(decode(&bytes[..cut]).is_err(), "cut at {cut}");
        }
    }

    #[test]
    fn test_decode_at_offset() {
        let doc = BsonDocument::new().with("ok", 1.0);
        let mut bytes = vec![0xAA; 21];
        bytes.extend(encode(&doc).unwrap());
        assert_eq!(peek_document_len(&bytes, 21), Some(bytes.len() - 21));
        let (decoded, consumed) = decode_document(&bytes, 21).unwrap();
        assert_eq!(decoded, doc);
        assert_eq!(consumed, bytes.len() - 21);
    }

    #[test]
    fn test_old_binary_subtype_strips_inner_length() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&19i32.to_le_bytes());
        bytes.extend_from_slice(&[0x05, b'b', 0]);
        bytes.extend_from_slice(&6i32.to_le_bytes());
        bytes.push(0x02);
        bytes.extend_from_slice(&2i32.to_le_bytes());
        bytes.extend_from_slice(&[7, 9]);
        bytes.push(0);

        let doc = decode(&bytes).unwrap();
        assert_eq!(doc.get("b"), Some(&BsonValue::Binary(vec![7, 9])));
    }

    #[test]
    fn test_nesting_limit() {
        let mut doc = BsonDocument::new();
        for _ in 0..(MAX_DEPTH + 2) {
            doc = BsonDocument::new().with("d", doc);
        }
        let bytes = encode(&doc).unwrap();
        assert_eq!(decode(&bytes).unwrap_err(), BsonError::TooDeep);
    }
}
