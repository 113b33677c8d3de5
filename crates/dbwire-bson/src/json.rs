//! Conversion between JSON command text and BSON documents.
//!
//! Object key order is kept (`serde_json` is built with `preserve_order`),
//! so the command name written first stays first. A small subset of
//! extended JSON is understood:
//!
//! | JSON | BSON |
//! |------|------|
//! | `{"$oid": "<24 hex>"}` | ObjectId |
//! | `{"$date": <ms>}` / `{"$date": {"$numberLong": "<ms>"}}` | DateTime |
//! | `{"$numberLong": "<n>"}` | Int64 |
//! | integer fitting `i32` | Int32 |
//! | other integer | Int64 |
//! | float | Double |

use serde_json::{Map, Number, Value as Json};

use crate::document::{BsonDocument, BsonValue};
use crate::error::{BsonError, Result};
use crate::oid::ObjectId;

/// Parse JSON text whose top level must be an object.
pub fn parse_document(text: &str) -> Result<BsonDocument> {
    let json: Json = serde_json::from_str(text).map_err(|e| BsonError::Json(e.to_string()))?;
    document_from_json(&json)
}

/// Convert a JSON object into a document.
pub fn document_from_json(json: &Json) -> Result<BsonDocument> {
    match json {
        Json::Object(map) => object_to_document(map),
        other => Err(BsonError::Json(format!(
            "expected a JSON object, found {}",
            json_kind(other)
        ))),
    }
}

/// Convert any JSON value.
pub fn value_from_json(json: &Json) -> Result<BsonValue> {
    Ok(match json {
        Json::Null => BsonValue::Null,
        Json::Bool(b) => BsonValue::Boolean(*b),
        Json::Number(n) => number_to_bson(n)?,
        Json::String(s) => BsonValue::String(s.clone()),
        Json::Array(items) => BsonValue::Array(
            items
                .iter()
                .map(value_from_json)
                .collect::<Result<Vec<_>>>()?,
        ),
        Json::Object(map) => match extended(map)? {
            Some(value) => value,
            None => BsonValue::Document(object_to_document(map)?),
        },
    })
}

/// Render a value as relaxed extended JSON.
pub fn value_to_json(value: &BsonValue) -> Json {
    match value {
        BsonValue::Double(v) => Number::from_f64(*v).map_or(Json::Null, Json::Number),
        BsonValue::String(s) => Json::String(s.clone()),
        BsonValue::Document(doc) => document_to_json(doc),
        BsonValue::Array(items) => Json::Array(items.iter().map(value_to_json).collect()),
        BsonValue::Binary(bytes) => Json::Array(bytes.iter().map(|b| Json::from(*b)).collect()),
        BsonValue::ObjectId(id) => single("$oid", Json::String(id.to_hex())),
        BsonValue::Boolean(b) => Json::Bool(*b),
        BsonValue::DateTime(ms) => single("$date", Json::from(*ms)),
        BsonValue::Null => Json::Null,
        BsonValue::Int32(v) => Json::from(*v),
        BsonValue::Int64(v) => Json::from(*v),
        BsonValue::Timestamp(ts) => single(
            "$timestamp",
            serde_json::json!({ "t": ts.time, "i": ts.increment }),
        ),
    }
}

pub fn document_to_json(doc: &BsonDocument) -> Json {
    Json::Object(
        doc.iter()
            .map(|(k, v)| (k.to_string(), value_to_json(v)))
            .collect(),
    )
}

fn single(key: &str, value: Json) -> Json {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    Json::Object(map)
}

fn object_to_document(map: &Map<String, Json>) -> Result<BsonDocument> {
    let mut doc = BsonDocument::new();
    for (key, value) in map {
        doc.insert(key.as_str(), value_from_json(value)?);
    }
    Ok(doc)
}

fn number_to_bson(n: &Number) -> Result<BsonValue> {
    if let Some(i) = n.as_i64() {
        return Ok(match i32::try_from(i) {
            Ok(small) => BsonValue::Int32(small),
            Err(_) => BsonValue::Int64(i),
        });
    }
    if n.is_u64() {
        return Err(BsonError::Json(format!("integer {} out of range", n)));
    }
    n.as_f64()
        .map(BsonValue::Double)
        .ok_or_else(|| BsonError::Json(format!("unrepresentable number {}", n)))
}

/// Recognise single-key `$oid` / `$date` / `$numberLong` wrappers.
fn extended(map: &Map<String, Json>) -> Result<Option<BsonValue>> {
    if map.len() != 1 {
        return Ok(None);
    }
    let Some((key, value)) = map.iter().next() else {
        return Ok(None);
    };
    let converted = match (key.as_str(), value) {
        ("$oid", Json::String(hex)) => BsonValue::ObjectId(ObjectId::parse_str(hex)?),
        ("$date", Json::Number(n)) => match n.as_i64() {
            Some(ms) => BsonValue::DateTime(ms),
            None => return Err(BsonError::Json(format!("invalid $date {}", n))),
        },
        ("$date", Json::Object(inner)) => match extended(inner)? {
            Some(BsonValue::Int64(ms)) => BsonValue::DateTime(ms),
            _ => return Err(BsonError::Json("invalid $date".to_string())),
        },
        ("$numberLong", Json::String(s)) => BsonValue::Int64(
            s.parse()
                .map_err(|_| BsonError::Json(format!("invalid $numberLong '{}'", s)))?,
        ),
        _ => return Ok(None),
    };
    Ok(Some(converted))
}

fn json_kind(json: &Json) -> &'static str {
    match json {
        Json::Null => "null",
        Json::Bool(_) => "a boolean",
        Json::Number(_) => "a number",
        Json::String(_) => "a string",
        Json::Array(_) => "an array",
        Json::Object(_) => "an object",
    }
}
