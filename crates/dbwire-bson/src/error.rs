//! BSON codec errors.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BsonError {
    /// Input ended before a value was complete.
    UnexpectedEof { offset: usize, needed: usize },
    /// Type byte with no decoder.
    UnsupportedType { tag: u8, key: String },
    /// Declared length is negative, too small, or overruns the input.
    InvalidLength { offset: usize, length: i64 },
    /// String or key bytes are not UTF-8.
    InvalidUtf8 { offset: usize },
    /// A document or string lacks its trailing NUL.
    MissingTerminator { offset: usize },
    /// Keys are C strings and cannot contain NUL.
    KeyContainsNul(String),
    /// Documents nested deeper than the decoder allows.
    TooDeep,
    InvalidObjectId(String),
    /// JSON input that cannot be represented.
    Json(String),
}

impl fmt::Display for BsonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BsonError::UnexpectedEof { offset, needed } => write!(
                f,
                "unexpected end of BSON at offset {} (needed {} more bytes)",
                offset, needed
            ),
            BsonError::UnsupportedType { tag, key } => {
                write!(f, "unsupported BSON type 0x{:02x} for key '{}'", tag, key)
            }
            BsonError::InvalidLength { offset, length } => {
                write!(f, "invalid BSON length {} at offset {}", length, offset)
            }
            BsonError::InvalidUtf8 { offset } => {
                write!(f, "invalid UTF-8 in BSON string at offset {}", offset)
            }
            BsonError::MissingTerminator { offset } => {
                write!(f, "missing NUL terminator at offset {}", offset)
            }
            BsonError::KeyContainsNul(key) => write!(f, "BSON key contains NUL: {:?}", key),
            BsonError::TooDeep => write!(f, "BSON document nested too deeply"),
            BsonError::InvalidObjectId(s) => write!(f, "invalid ObjectId '{}'", s),
            BsonError::Json(msg) => write!(f, "cannot convert JSON to BSON: {}", msg),
        }
    }
}

impl std::error::Error for BsonError {}

impl From<BsonError> for dbwire_core::Error {
    fn from(err: BsonError) -> Self {
        dbwire_core::Error::Protocol(dbwire_core::error::ProtocolError {
            message: err.to_string(),
            raw_data: None,
            source: Some(Box::new(err)),
        })
    }
}

pub type Result<T> = std::result::Result<T, BsonError>;
