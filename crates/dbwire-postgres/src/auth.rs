//! Password authentication helpers.

use dbwire_crypto::{Sha256, ScramSession, hex, md5};

/// The only SASL mechanism this client speaks.
pub const SCRAM_SHA_256: &str = "SCRAM-SHA-256";

pub type PgScram = ScramSession<Sha256>;

/// Response to `AuthenticationMD5Password`:
/// `"md5" + hex(md5(hex(md5(password + user)) + salt))`.
pub fn md5_password(user: &str, password: &str, salt: [u8; 4]) -> String {
    let inner = hex(&md5(format!("{password}{user}").as_bytes()));

    let mut outer_input = inner.into_bytes();
    outer_input.extend_from_slice(&salt);
    format!("md5{}", hex(&md5(&outer_input)))
}

/// Pick SCRAM-SHA-256 from the offered mechanisms, if present.
pub fn select_mechanism(offered: &[String]) -> Option<&'static str> {
    offered
        .iter()
        .any(|m| m == SCRAM_SHA_256)
        .then_some(SCRAM_SHA_256)
}
