//! MySQL authentication plugins.
//!
//! - `mysql_native_password`: SHA1-based (legacy, MySQL < 8.0 default)
//! - `caching_sha2_password`: SHA256-based (MySQL 8.0+ default)
//! - `mysql_clear_password`: plaintext, only over TLS
//!
//! # mysql_native_password
//!
//! ```text
//! SHA1(password) XOR SHA1(scramble + SHA1(SHA1(password)))
//! ```
//!
//! # caching_sha2_password
//!
//! Fast auth (if cached on server):
//! ```text
//! XOR(SHA256(password), SHA256(SHA256(SHA256(password)) + scramble))
//! ```
//!
//! Full auth sends the password itself and therefore needs TLS.

use dbwire_crypto::{sha1, sha256, xor};

/// Well-known authentication plugin names.
pub mod plugins {
    pub const MYSQL_NATIVE_PASSWORD: &str = "mysql_native_password";
    pub const CACHING_SHA2_PASSWORD: &str = "caching_sha2_password";
    pub const MYSQL_CLEAR_PASSWORD: &str = "mysql_clear_password";
}

/// Status bytes inside a caching_sha2_password `AuthMoreData` packet.
pub mod caching_sha2 {
    pub const FAST_AUTH_SUCCESS: u8 = 0x03;
    pub const PERFORM_FULL_AUTH: u8 = 0x04;
}

/// The plugins this client can answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPlugin {
    NativePassword,
    CachingSha2Password,
    ClearPassword,
}

impl AuthPlugin {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            plugins::MYSQL_NATIVE_PASSWORD => Some(AuthPlugin::NativePassword),
            plugins::CACHING_SHA2_PASSWORD => Some(AuthPlugin::CachingSha2Password),
            plugins::MYSQL_CLEAR_PASSWORD => Some(AuthPlugin::ClearPassword),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            AuthPlugin::NativePassword => plugins::MYSQL_NATIVE_PASSWORD,
            AuthPlugin::CachingSha2Password => plugins::CACHING_SHA2_PASSWORD,
            AuthPlugin::ClearPassword => plugins::MYSQL_CLEAR_PASSWORD,
        }
    }

    /// Whether the plugin reveals the password and so needs an encrypted session.
    pub const fn requires_secure_transport(self) -> bool {
        matches!(self, AuthPlugin::ClearPassword)
    }

    /// Auth response for `password` against the server's scramble.
    pub fn response(self, password: &str, scramble: &[u8]) -> Vec<u8> {
        match self {
            AuthPlugin::NativePassword => mysql_native_password(password, scramble),
            AuthPlugin::CachingSha2Password => caching_sha2_password(password, scramble),
            AuthPlugin::ClearPassword => clear_password(password),
        }
    }
}

/// The 20-byte seed, without the NUL some servers append.
fn seed(scramble: &[u8]) -> &[u8] {
    let scramble = scramble.strip_suffix(&[0]).unwrap_or(scramble);
    &scramble[..scramble.len().min(20)]
}

/// `mysql_native_password` response; empty for an empty password.
pub fn mysql_native_password(password: &str, scramble: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let stage1 = sha1(password.as_bytes());
    let stage2 = sha1(&stage1);

    let mut input = seed(scramble).to_vec();
    input.extend_from_slice(&stage2);
    xor(&stage1, &sha1(&input))
}

/// `caching_sha2_password` fast-auth response; empty for an empty password.
pub fn caching_sha2_password(password: &str, scramble: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let digest1 = sha256(password.as_bytes());
    let digest2 = sha256(&digest1);

    let mut input = digest2.to_vec();
    input.extend_from_slice(seed(scramble));
    xor(&digest1, &sha256(&input))
}

/// Password followed by NUL, as sent by `mysql_clear_password` and by
/// caching_sha2 full authentication.
pub fn clear_password(password: &str) -> Vec<u8> {
    let mut bytes = password.as_bytes().to_vec();
    bytes.push(0);
    bytes
}
