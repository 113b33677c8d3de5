//! Client side of SCRAM (RFC 5802), parameterised over the hash.
//!
//! PostgreSQL negotiates `SCRAM-SHA-256` and MongoDB `SCRAM-SHA-1`; the
//! message flow is identical:
//!
//! 1. client-first: `n,,n=<user>,r=<client nonce>`
//! 2. server-first: `r=<client nonce + server nonce>,s=<salt b64>,i=<iterations>`
//! 3. client-final: `c=biws,r=<combined nonce>,p=<proof b64>`
//! 4. server-final: `v=<server signature b64>`
//!
//! Channel binding is never used, hence the fixed `c=biws` (base64 of `n,,`).

use std::fmt;
use std::marker::PhantomData;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rand::{Rng, distributions::Alphanumeric, thread_rng};
use subtle::ConstantTimeEq;

use crate::hash::HashFunction;
use crate::mac::{HmacKey, pbkdf2};
use crate::xor;

const NONCE_LEN: usize = 24;
const GS2_HEADER: &str = "n,,";
const CHANNEL_BINDING: &str = "c=biws";

/// Failure while running a SCRAM exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScramError {
    /// Server message was not valid UTF-8.
    InvalidUtf8,
    /// A required attribute (`r`, `s`, `i`, `v`) was absent.
    MissingAttribute(char),
    /// An attribute was present but unparseable.
    InvalidAttribute { name: char, value: String },
    /// Combined nonce does not extend the client nonce.
    NonceMismatch,
    /// Server-final signature differs from the expected one.
    SignatureMismatch,
    /// Server-final arrived before server-first was processed.
    OutOfOrder,
    /// Server reported `e=<message>`.
    Server(String),
}

impl ScramError {
    /// Whether the failure means the server could not be authenticated
    /// (as opposed to a malformed message).
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            ScramError::NonceMismatch | ScramError::SignatureMismatch | ScramError::Server(_)
        )
    }
}

impl fmt::Display for ScramError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScramError::InvalidUtf8 => write!(f, "SCRAM message is not valid UTF-8"),
            ScramError::MissingAttribute(name) => {
                write!(f, "SCRAM message is missing attribute '{}'", name)
            }
            ScramError::InvalidAttribute { name, value } => {
                write!(f, "Invalid SCRAM attribute '{}': {}", name, value)
            }
            ScramError::NonceMismatch => write!(f, "Server nonce does not extend client nonce"),
            ScramError::SignatureMismatch => write!(f, "Server signature mismatch"),
            ScramError::OutOfOrder => write!(f, "Server-final received before server-first"),
            ScramError::Server(msg) => write!(f, "Server rejected SCRAM exchange: {}", msg),
        }
    }
}

impl std::error::Error for ScramError {}

/// State of one SCRAM authentication attempt.
///
/// Created per connect; never reused across connections.
#[derive(Debug, Clone)]
pub struct ScramSession<H: HashFunction> {
    client_nonce: String,
    client_first_bare: String,
    expected_server_signature: Option<Vec<u8>>,
    _hash: PhantomData<H>,
}

impl<H: HashFunction> ScramSession<H> {
    /// Start a session with a fresh random nonce.
    pub fn new(username: &str) -> Self {
        let nonce: String = thread_rng()
            .sample_iter(&Alphanumeric)
            .take(NONCE_LEN)
            .map(char::from)
            .collect();
        Self::with_nonce(username, &nonce)
    }

    /// Start a session with a caller-chosen nonce.
    pub fn with_nonce(username: &str, client_nonce: &str) -> Self {
        let client_first_bare = format!("n={},r={}", escape_username(username), client_nonce);
        Self {
            client_nonce: client_nonce.to_string(),
            client_first_bare,
            expected_server_signature: None,
            _hash: PhantomData,
        }
    }

    pub fn client_nonce(&self) -> &str {
        &self.client_nonce
    }

    pub fn client_first_message_bare(&self) -> &str {
        &self.client_first_bare
    }

    /// `n,,` followed by the bare message.
    pub fn client_first_message(&self) -> String {
        format!("{}{}", GS2_HEADER, self.client_first_bare)
    }

    /// Consume server-first and produce client-final.
    pub fn handle_server_first(
        &mut self,
        password: &[u8],
        server_first: &[u8],
    ) -> Result<String, ScramError> {
        let msg = std::str::from_utf8(server_first).map_err(|_| ScramError::InvalidUtf8)?;

        let mut combined_nonce = None;
        let mut salt = None;
        let mut iterations = None;

        for part in msg.split(',') {
            if let Some(value) = part.strip_prefix("e=") {
                return Err(ScramError::Server(value.to_string()));
            } else if let Some(value) = part.strip_prefix("r=") {
                combined_nonce = Some(value);
            } else if let Some(value) = part.strip_prefix("s=") {
                salt = Some(BASE64.decode(value).map_err(|_| ScramError::InvalidAttribute {
                    name: 's',
                    value: value.to_string(),
                })?);
            } else if let Some(value) = part.strip_prefix("i=") {
                let parsed: u32 = value.parse().map_err(|_| ScramError::InvalidAttribute {
                    name: 'i',
                    value: value.to_string(),
                })?;
                if parsed == 0 {
                    return Err(ScramError::InvalidAttribute {
                        name: 'i',
                        value: value.to_string(),
                    });
                }
                iterations = Some(parsed);
            }
        }

        let combined_nonce = combined_nonce.ok_or(ScramError::MissingAttribute('r'))?;
        let salt = salt.ok_or(ScramError::MissingAttribute('s'))?;
        let iterations = iterations.ok_or(ScramError::MissingAttribute('i'))?;

        if !combined_nonce.starts_with(&self.client_nonce) {
            return Err(ScramError::NonceMismatch);
        }

        let salted_password = pbkdf2::<H>(password, &salt, iterations, H::OUTPUT_LEN);
        let salted_key = HmacKey::<H>::new(&salted_password);

        let client_final_without_proof = format!("{},r={}", CHANNEL_BINDING, combined_nonce);
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare, msg, client_final_without_proof
        );

        let client_key = salted_key.mac(b"Client Key");
        let stored_key = H::digest(&client_key);
        let client_signature = HmacKey::<H>::new(&stored_key).mac(auth_message.as_bytes());
        let client_proof = xor(&client_key, &client_signature);

        let server_key = salted_key.mac(b"Server Key");
        self.expected_server_signature =
            Some(HmacKey::<H>::new(&server_key).mac(auth_message.as_bytes()));

        Ok(format!(
            "{},p={}",
            client_final_without_proof,
            BASE64.encode(client_proof)
        ))
    }

    /// Check the server's `v=` signature in constant time.
    pub fn verify_server_final(&self, server_final: &[u8]) -> Result<(), ScramError> {
        let msg = std::str::from_utf8(server_final).map_err(|_| ScramError::InvalidUtf8)?;
        let expected = self
            .expected_server_signature
            .as_ref()
            .ok_or(ScramError::OutOfOrder)?;

        let mut signature = None;
        for part in msg.split(',') {
            if let Some(value) = part.strip_prefix("e=") {
                return Err(ScramError::Server(value.to_string()));
            } else if let Some(value) = part.strip_prefix("v=") {
                signature = Some(value);
            }
        }
        let signature = signature.ok_or(ScramError::MissingAttribute('v'))?;
        let received = BASE64
            .decode(signature)
            .map_err(|_| ScramError::InvalidAttribute {
                name: 'v',
                value: signature.to_string(),
            })?;

        if received.len() == expected.len() && bool::from(received.ct_eq(expected)) {
            Ok(())
        } else {
            Err(ScramError::SignatureMismatch)
        }
    }
}

/// `=` and `,` are the only characters SCRAM requires escaping in `n=`.
fn escape_username(username: &str) -> String {
    username.replace('=', "=3D").replace(',', "=2C")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Sha1, Sha256};

    const SHA256_SERVER_FIRST: &str = "r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";

    #[test]
    fn test_scram_sha256_rfc7677() {
        let mut session = ScramSession::<Sha256>::with_nonce("user", "rOprNGfwEbeRWgbNEkqO");
        assert_eq!(
            session.client_first_message(),
            "n,,n=user,r=rOprNGfwEbeRWgbNEkqO"
        );

        let client_final = session
            .handle_server_first(b"pencil", SHA256_SERVER_FIRST.as_bytes())
            .unwrap();
        assert_eq!(
            client_final,
            "c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ="
        );

        session
            .verify_server_final(b"v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=")
            .unwrap();
    }

    #[test]
    fn test_scram_sha1_rfc5802() {
        let mut session = ScramSession::<Sha1>::with_nonce("user", "fyko+d2lbbFgONRv9qkxdawL");
        assert_eq!(
            session.client_first_message_bare(),
            "n=user,r=fyko+d2lbbFgONRv9qkxdawL"
        );

        let client_final = session
            .handle_server_first(
                b"pencil",
                b"r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,s=QSXCR+Q6sek8bf92,i=4096",
            )
            .unwrap();
        assert_eq!(
            client_final,
            "c=biws,r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,p=v0X8v3Bz2T0CJGbJQyF0X+HI4Ts="
        );

        session
            .verify_server_final(b"v=rmF9pqV8S7suAoZWja4dJRkFsKQ=")
            .unwrap();
    }

    #[test]
    fn test_tampered_server_signature_rejected() {
        let mut session = ScramSession::<Sha256>::with_nonce("user", "rOprNGfwEbeRWgbNEkqO");
        session
            .handle_server_first(b"pencil", SHA256_SERVER_FIRST.as_bytes())
            .unwrap();

        let err = session
            .verify_server_final(b"v=7rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=")
            .unwrap_err();
        assert_eq!(err, ScramError::SignatureMismatch);
        assert!(err.is_authentication_failure());
    }

    #[test]
    fn test_foreign_nonce_rejected() {
        let mut session = ScramSession::<Sha256>::with_nonce("user", "abc");
        let err = session
            .handle_server_first(b"pencil", b"r=xyz123,s=QSXCR+Q6sek8bf92,i=4096")
            .unwrap_err();
        assert_eq!(err, ScramError::NonceMismatch);
    }

    #[test]
    fn test_missing_and_invalid_attributes() {
        let mut session = ScramSession::<Sha256>::with_nonce("user", "abc");
        assert_eq!(
            session
                .handle_server_first(b"pencil", b"r=abcdef,i=4096")
                .unwrap_err(),
            ScramError::MissingAttribute('s')
        );
        assert!(matches!(
            session
                .handle_server_first(b"pencil", b"r=abcdef,s=QSXCR+Q6sek8bf92,i=many")
                .unwrap_err(),
            ScramError::InvalidAttribute { name: 'i', .. }
        ));
    }

    #[test]
    fn test_server_error_attribute() {
        let session = ScramSession::<Sha1>::with_nonce("user", "abc");
        assert_eq!(
            session.verify_server_final(b"e=invalid-proof").unwrap_err(),
            ScramError::OutOfOrder
        );

        let mut session = ScramSession::<Sha1>::with_nonce("user", "abc");
        assert_eq!(
            session
                .handle_server_first(b"pencil", b"e=unknown-user")
                .unwrap_err(),
            ScramError::Server("unknown-user".to_string())
        );
    }

    #[test]
    fn test_username_escaping() {
        let session = ScramSession::<Sha256>::with_nonce("a=b,c", "n1");
        assert_eq!(session.client_first_message_bare(), "n=a=3Db=2Cc,r=n1");
    }

    #[test]
    fn test_random_nonce_shape() {
        let a = ScramSession::<Sha256>::new("user");
        let b = ScramSession::<Sha256>::new("user");
        assert_eq!(a.client_nonce().len(), NONCE_LEN);
        assert!(a.client_nonce().chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a.client_nonce(), b.client_nonce());
    }
}
