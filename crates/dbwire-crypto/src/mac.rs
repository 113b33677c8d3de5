//! HMAC (RFC 2104) and PBKDF2 (RFC 8018).

use crate::hash::HashFunction;

/// HMAC with the key already absorbed into inner and outer hash states.
///
/// Reusing a keyed instance avoids re-hashing the pads on every call, which
/// matters for PBKDF2 where the same key is applied thousands of times.
#[derive(Debug, Clone)]
pub struct HmacKey<H: HashFunction> {
    inner: H,
    outer: H,
}

impl<H: HashFunction> HmacKey<H> {
    pub fn new(key: &[u8]) -> Self {
        let mut block = vec![0u8; H::BLOCK_LEN];
        if key.len() > H::BLOCK_LEN {
            let digest = H::digest(key);
            block[..digest.len()].copy_from_slice(&digest);
        } else {
            block[..key.len()].copy_from_slice(key);
        }

        let ipad: Vec<u8> = block.iter().map(|b| b ^ 0x36).collect();
        let opad: Vec<u8> = block.iter().map(|b| b ^ 0x5c).collect();

        let mut inner = H::default();
        inner.update(&ipad);
        let mut outer = H::default();
        outer.update(&opad);
        Self { inner, outer }
    }

    /// MAC over the concatenation of `parts`.
    pub fn mac_parts(&self, parts: &[&[u8]]) -> Vec<u8> {
        let mut inner = self.inner.clone();
        for part in parts {
            inner.update(part);
        }
        let inner_digest = inner.finalize();

        let mut outer = self.outer.clone();
        outer.update(&inner_digest);
        outer.finalize()
    }

    pub fn mac(&self, message: &[u8]) -> Vec<u8> {
        self.mac_parts(&[message])
    }
}

/// `H((K' ^ opad) || H((K' ^ ipad) || message))`.
pub fn hmac<H: HashFunction>(key: &[u8], message: &[u8]) -> Vec<u8> {
    HmacKey::<H>::new(key).mac(message)
}

/// Derive `key_len` bytes from `password` and `salt` with HMAC-`H`.
///
/// An iteration count of zero is treated as one.
pub fn pbkdf2<H: HashFunction>(
    password: &[u8],
    salt: &[u8],
    iterations: u32,
    key_len: usize,
) -> Vec<u8> {
    let prf = HmacKey::<H>::new(password);
    let mut derived = Vec::with_capacity(key_len);
    let mut block_index: u32 = 1;

    while derived.len() < key_len {
        let mut u = prf.mac_parts(&[salt, &block_index.to_be_bytes()]);
        let mut t = u.clone();
        for _ in 1..iterations {
            u = prf.mac(&u);
            for (acc, b) in t.iter_mut().zip(&u) {
                *acc ^= b;
            }
        }

        let take = (key_len - derived.len()).min(t.len());
        derived.extend_from_slice(&t[..take]);
        block_index = block_index.wrapping_add(1);
    }

    derived
}
