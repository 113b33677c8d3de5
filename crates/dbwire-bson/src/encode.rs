//! Document to BSON bytes.

use crate::document::{BsonDocument, BsonValue};
use crate::error::{BsonError, Result};
use crate::tag::{ElementType, BINARY_GENERIC};

/// Encode a document into a fresh buffer.
pub fn encode(doc: &BsonDocument) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(64);
    encode_into(doc, &mut buf)?;
    Ok(buf)
}

/// Append the encoding of `doc` to `buf`.
pub fn encode_into(doc: &BsonDocument, buf: &mut Vec<u8>) -> Result<()> {
    write_document(buf, doc.iter())
}

fn write_document<'a>(
    buf: &mut Vec<u8>,
    elements: impl Iterator<Item = (&'a str, &'a BsonValue)>,
) -> Result<()> {
    let start = buf.len();
    buf.extend_from_slice(&[0; 4]);
    for (key, value) in elements {
        write_element(buf, key, value)?;
    }
    buf.push(0);
    patch_length(buf, start);
    Ok(())
}

fn write_array(buf: &mut Vec<u8>, items: &[BsonValue]) -> Result<()> {
    let start = buf.len();
    buf.extend_from_slice(&[0; 4]);
    for (i, item) in items.iter().enumerate() {
        write_element(buf, &i.to_string(), item)?;
    }
    buf.push(0);
    patch_length(buf, start);
    Ok(())
}

fn patch_length(buf: &mut [u8], start: usize) {
    let len = (buf.len() - start) as i32;
    buf[start..start + 4].copy_from_slice(&len.to_le_bytes());
}

fn write_element(buf: &mut Vec<u8>, key: &str, value: &BsonValue) -> Result<()> {
    buf.push(element_type(value) as u8);
    write_cstring(buf, key)?;

    match value {
        BsonValue::Double(v) => buf.extend_from_slice(&v.to_le_bytes()),
        BsonValue::String(s) => write_string(buf, s),
        BsonValue::Document(doc) => write_document(buf, doc.iter())?,
        BsonValue::Array(items) => write_array(buf, items)?,
        BsonValue::Binary(bytes) => {
            buf.extend_from_slice(&(bytes.len() as i32).to_le_bytes());
            buf.push(BINARY_GENERIC);
            buf.extend_from_slice(bytes);
        }
        BsonValue::ObjectId(id) => buf.extend_from_slice(&id.bytes()),
        BsonValue::Boolean(b) => buf.push(u8::from(*b)),
        BsonValue::DateTime(ms) => buf.extend_from_slice(&ms.to_le_bytes()),
        BsonValue::Null => {}
        BsonValue::Int32(v) => buf.extend_from_slice(&v.to_le_bytes()),
        BsonValue::Timestamp(ts) => {
            let packed = (u64::from(ts.time) << 32) | u64::from(ts.increment);
            buf.extend_from_slice(&packed.to_le_bytes());
        }
        BsonValue::Int64(v) => match i32::try_from(*v) {
            Ok(small) => buf.extend_from_slice(&small.to_le_bytes()),
            Err(_) => buf.extend_from_slice(&(*v as f64).to_le_bytes()),
        },
    }
    Ok(())
}

/// Wire tag for a value. Int64 never gets its own tag on encode.
fn element_type(value: &BsonValue) -> ElementType {
    match value {
        BsonValue::Double(_) => ElementType::Double,
        BsonValue::String(_) => ElementType::String,
        BsonValue::Document(_) => ElementType::Document,
        BsonValue::Array(_) => ElementType::Array,
        BsonValue::Binary(_) => ElementType::Binary,
        BsonValue::ObjectId(_) => ElementType::ObjectId,
        BsonValue::Boolean(_) => ElementType::Boolean,
        BsonValue::DateTime(_) => ElementType::DateTime,
        BsonValue::Null => ElementType::Null,
        BsonValue::Int32(_) => ElementType::Int32,
        BsonValue::Timestamp(_) => ElementType::Timestamp,
        BsonValue::Int64(v) if i32::try_from(*v).is_ok() => ElementType::Int32,
        BsonValue::Int64(_) => ElementType::Double,
    }
}

fn write_cstring(buf: &mut Vec<u8>, s: &str) -> Result<()> {
    if s.as_bytes().contains(&0) {
        return Err(BsonError::KeyContainsNul(s.to_string()));
    }
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
    Ok(())
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&((s.len() + 1) as i32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
}
