//! Cryptographic primitives for dbwire authentication handshakes.
//!
//! The wire-protocol drivers cannot assume a platform crypto API, so every
//! primitive the handshakes touch is implemented here as a pure function over
//! byte slices:
//!
//! - [`md5`], [`sha1`], [`sha256`] - Merkle-Damgard digests with 64-byte blocks
//! - [`hmac`] - keyed MAC over any [`HashFunction`]
//! - [`pbkdf2`] - password-based key derivation built on [`hmac`]
//! - [`scram`] - the client side of SCRAM (RFC 5802 / RFC 7677), generic over
//!   the hash, used by PostgreSQL (SHA-256) and MongoDB (SHA-1)
//!
//! # Example
//!
//! ```
//! use dbwire_crypto::{Sha256, hex, pbkdf2, sha256};
//!
//! assert_eq!(
//!     hex(&sha256(b"abc")),
//!     "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
//! );
//! let key = pbkdf2::<Sha256>(b"password", b"salt", 1, 32);
//! assert_eq!(key.len(), 32);
//! ```

mod block;
mod hash;
mod mac;
pub mod scram;

pub use hash::{HashFunction, Md5, Sha1, Sha256, md5, sha1, sha256};
pub use mac::{HmacKey, hmac, pbkdf2};
pub use scram::{ScramError, ScramSession};

/// Render bytes as lowercase hexadecimal.
pub fn hex(bytes: &[u8]) -> String {
    const DIGITS: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        out.push(DIGITS[usize::from(b >> 4)] as char);
        out.push(DIGITS[usize::from(b & 0x0f)] as char);
    }
    out
}

/// XOR two equally sized byte strings.
///
/// Extra bytes in the longer input are ignored.
pub fn xor(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b.iter()).map(|(x, y)| x ^ y).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_renders_lowercase() {
        assert_eq!(hex(&[0x00, 0x0f, 0xab, 0xff]), "000fabff");
        assert_eq!(hex(&[]), "");
    }

    #[test]
    fn xor_truncates_to_shorter() {
        assert_eq!(xor(&[0xff, 0x0f, 0x01], &[0x0f, 0x0f]), vec![0xf0, 0x00]);
    }
}
