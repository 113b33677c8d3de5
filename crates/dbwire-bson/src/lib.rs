//! BSON codec for the dbwire MongoDB driver.
//!
//! `dbwire-bson` encodes and decodes the subset of BSON that MongoDB command
//! traffic uses: doubles, strings, embedded documents and arrays, generic
//! binary, ObjectIds, booleans, UTC datetimes, null, 32/64-bit integers and
//! internal timestamps. Documents keep insertion order.
//!
//! # Integer encoding
//!
//! Integers are written as int32 when they fit and as doubles otherwise; the
//! int64 tag (0x12) is read but never written. Decoding an encoded
//! [`BsonValue::Int64`] therefore yields `Int32` or `Double`.
//!
//! ```
//! use dbwire_bson::{decode, encode, BsonDocument, BsonValue};
//!
//! let doc = BsonDocument::new().with("a", 1).with("b", "x").with("c", BsonValue::Null);
//! let bytes = encode(&doc).unwrap();
//! assert_eq!(decode(&bytes).unwrap(), doc);
//! ```

pub mod decode;
pub mod document;
pub mod encode;
pub mod error;
pub mod json;
pub mod oid;
pub mod tag;

pub use decode::{decode, decode_document, peek_document_len};
pub use document::{BsonDocument, BsonValue, Timestamp};
pub use encode::{encode, encode_into};
pub use error::{BsonError, Result};
pub use json::{document_from_json, document_to_json, parse_document, value_from_json, value_to_json};
pub use oid::ObjectId;
pub use tag::ElementType;
