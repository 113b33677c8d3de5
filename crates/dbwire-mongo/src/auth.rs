//! SCRAM-SHA-1 over `saslStart` / `saslContinue`.

use dbwire_bson::{BsonDocument, BsonValue};
use dbwire_core::{Error, Result};
use dbwire_crypto::{ScramSession, Sha1, hex, md5};

pub const MECHANISM: &str = "SCRAM-SHA-1";
/// Credentials are looked up in the `admin` database.
pub const AUTH_SOURCE: &str = "admin";

pub type MongoScram = ScramSession<Sha1>;

/// The password SCRAM-SHA-1 runs over: `hex(md5("<user>:mongo:<password>"))`.
pub fn password_digest(username: &str, password: &str) -> String {
    hex(&md5(format!("{username}:mongo:{password}").as_bytes()))
}

pub fn sasl_start(client_first: &str) -> BsonDocument {
    BsonDocument::new()
        .with("saslStart", 1)
        .with("mechanism", MECHANISM)
        .with("payload", BsonValue::Binary(client_first.as_bytes().to_vec()))
        .with("autoAuthorize", 1)
        .with("$db", AUTH_SOURCE)
}

pub fn sasl_continue(conversation_id: BsonValue, payload: &[u8]) -> BsonDocument {
    BsonDocument::new()
        .with("saslContinue", 1)
        .with("conversationId", conversation_id)
        .with("payload", BsonValue::Binary(payload.to_vec()))
        .with("$db", AUTH_SOURCE)
}

/// One step of the SASL conversation as returned by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct SaslReply {
    pub conversation_id: BsonValue,
    pub payload: Vec<u8>,
    pub done: bool,
}

impl SaslReply {
    pub fn parse(reply: &BsonDocument) -> Result<Self> {
        let conversation_id = reply
            .get("conversationId")
            .cloned()
            .ok_or_else(|| Error::protocol("SASL reply without conversationId"))?;
        let payload = match reply.get("payload") {
            Some(BsonValue::Binary(bytes)) => bytes.clone(),
            Some(BsonValue::String(text)) => text.as_bytes().to_vec(),
            _ => return Err(Error::protocol("SASL reply without payload")),
        };
        Ok(Self {
            conversation_id,
            payload,
            done: reply.get("done").and_then(BsonValue::as_bool).unwrap_or(false),
        })
    }
}
