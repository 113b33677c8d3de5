//! BSON values and insertion-ordered documents.

use dbwire_core::Value;

use crate::oid::ObjectId;

/// MongoDB internal timestamp: seconds plus an ordinal within that second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timestamp {
    pub time: u32,
    pub increment: u32,
}

/// One BSON element value.
#[derive(Debug, Clone, PartialEq)]
pub enum BsonValue {
    Double(f64),
    String(String),
    Document(BsonDocument),
    Array(Vec<BsonValue>),
    /// Generic binary (subtype 0x00 on encode)
    Binary(Vec<u8>),
    ObjectId(ObjectId),
    Boolean(bool),
    /// Milliseconds since the Unix epoch
    DateTime(i64),
    Null,
    Int32(i32),
    Timestamp(Timestamp),
    /// Decoded from 0x12; encoded as int32 or double
    Int64(i64),
}

impl BsonValue {
    /// Type label used for column inference.
    pub const fn type_name(&self) -> &'static str {
        match self {
            BsonValue::Null => "null",
            BsonValue::ObjectId(_) => "objectId",
            BsonValue::DateTime(_) => "date",
            BsonValue::Binary(_) => "binary",
            BsonValue::Array(_) => "array",
            BsonValue::Document(_) => "document",
            BsonValue::Int32(_) | BsonValue::Int64(_) => "int",
            BsonValue::Double(_) => "double",
            BsonValue::Boolean(_) => "bool",
            BsonValue::String(_) => "string",
            BsonValue::Timestamp(_) => "timestamp",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            BsonValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&BsonDocument> {
        match self {
            BsonValue::Document(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[BsonValue]> {
        match self {
            BsonValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            BsonValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Numeric value as i64 (doubles are truncated when integral).
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            BsonValue::Int32(v) => Some(i64::from(*v)),
            BsonValue::Int64(v) => Some(*v),
            BsonValue::Double(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            _ => None,
        }
    }

    /// Numeric value as f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            BsonValue::Double(v) => Some(*v),
            BsonValue::Int32(v) => Some(f64::from(*v)),
            BsonValue::Int64(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Convert into the driver-neutral cell value.
    pub fn to_value(&self) -> Value {
        match self {
            BsonValue::Double(v) => Value::Double(*v),
            BsonValue::String(s) => Value::Text(s.clone()),
            BsonValue::Document(doc) => doc.to_value(),
            BsonValue::Array(items) => Value::Array(items.iter().map(BsonValue::to_value).collect()),
            BsonValue::Binary(bytes) => Value::Bytes(bytes.clone()),
            BsonValue::ObjectId(id) => Value::ObjectId(id.to_hex()),
            BsonValue::Boolean(b) => Value::Bool(*b),
            BsonValue::DateTime(ms) => Value::Date(*ms),
            BsonValue::Null => Value::Null,
            BsonValue::Int32(v) => Value::Int(i64::from(*v)),
            BsonValue::Int64(v) => Value::Int(*v),
            BsonValue::Timestamp(ts) => Value::Document(vec![
                ("t".to_string(), Value::Int(i64::from(ts.time))),
                ("i".to_string(), Value::Int(i64::from(ts.increment))),
            ]),
        }
    }
}

impl From<&str> for BsonValue {
    fn from(s: &str) -> Self {
        BsonValue::String(s.to_string())
    }
}

impl From<String> for BsonValue {
    fn from(s: String) -> Self {
        BsonValue::String(s)
    }
}

impl From<i32> for BsonValue {
    fn from(v: i32) -> Self {
        BsonValue::Int32(v)
    }
}

impl From<i64> for BsonValue {
    fn from(v: i64) -> Self {
        BsonValue::Int64(v)
    }
}

impl From<f64> for BsonValue {
    fn from(v: f64) -> Self {
        BsonValue::Double(v)
    }
}

impl From<bool> for BsonValue {
    fn from(b: bool) -> Self {
        BsonValue::Boolean(b)
    }
}

impl From<ObjectId> for BsonValue {
    fn from(id: ObjectId) -> Self {
        BsonValue::ObjectId(id)
    }
}

impl From<BsonDocument> for BsonValue {
    fn from(doc: BsonDocument) -> Self {
        BsonValue::Document(doc)
    }
}

impl From<Vec<BsonValue>> for BsonValue {
    fn from(items: Vec<BsonValue>) -> Self {
        BsonValue::Array(items)
    }
}

/// String-keyed BSON document that preserves insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BsonDocument {
    entries: Vec<(String, BsonValue)>,
}

impl BsonDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key`, replacing an existing value in place or appending.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<BsonValue>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Chained [`insert`](Self::insert).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<BsonValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&BsonValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(BsonValue::as_str)
    }

    pub fn get_document(&self, key: &str) -> Option<&BsonDocument> {
        self.get(key).and_then(BsonValue::as_document)
    }

    pub fn get_array(&self, key: &str) -> Option<&[BsonValue]> {
        self.get(key).and_then(BsonValue::as_array)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&mut self, key: &str) -> Option<BsonValue> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BsonValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Name of the first key; for a command document, the command name.
    pub fn first_key(&self) -> Option<&str> {
        self.entries.first().map(|(k, _)| k.as_str())
    }

    pub fn to_value(&self) -> Value {
        Value::Document(
            self.entries
                .iter()
                .map(|(k, v)| (k.clone(), v.to_value()))
                .collect(),
        )
    }
}

impl IntoIterator for BsonDocument {
    type Item = (String, BsonValue);
    type IntoIter = std::vec::IntoIter<(String, BsonValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<K: Into<String>, V: Into<BsonValue>> FromIterator<(K, V)> for BsonDocument {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut doc = BsonDocument::new();
        for (k, v) in iter {
            doc.insert(k, v);
        }
        doc
    }
}
