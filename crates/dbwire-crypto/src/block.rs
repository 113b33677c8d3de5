//! Shared 64-byte block buffering and padding for the Merkle-Damgard digests.

pub(crate) const BLOCK_LEN: usize = 64;

/// Byte order of the trailing message-length field.
#[derive(Debug, Clone, Copy)]
pub(crate) enum LengthOrder {
    /// MD5
    Little,
    /// SHA-1, SHA-256
    Big,
}

/// Accumulates input until whole blocks are available for compression.
#[derive(Debug, Clone)]
pub(crate) struct BlockBuffer {
    block: [u8; BLOCK_LEN],
    filled: usize,
    total_len: u64,
}

impl BlockBuffer {
    pub(crate) const fn new() -> Self {
        Self {
            block: [0; BLOCK_LEN],
            filled: 0,
            total_len: 0,
        }
    }

    /// Feed bytes, invoking `compress` for every completed block.
    pub(crate) fn update(&mut self, mut data: &[u8], mut compress: impl FnMut(&[u8; BLOCK_LEN])) {
        self.total_len = self.total_len.wrapping_add(data.len() as u64);

        if self.filled > 0 {
            let take = (BLOCK_LEN - self.filled).min(data.len());
            self.block[self.filled..self.filled + take].copy_from_slice(&data[..take]);
            self.filled += take;
            data = &data[take..];
            if self.filled < BLOCK_LEN {
                return;
            }
            compress(&self.block);
            self.filled = 0;
        }

        let mut chunks = data.chunks_exact(BLOCK_LEN);
        for chunk in &mut chunks {
            let mut block = [0u8; BLOCK_LEN];
            block.copy_from_slice(chunk);
            compress(&block);
        }

        let rest = chunks.remainder();
        self.block[..rest.len()].copy_from_slice(rest);
        self.filled = rest.len();
    }

    /// Append the `0x80` marker, zero padding and the 64-bit bit length,
    /// compressing the final one or two blocks.
    pub(crate) fn finish(mut self, order: LengthOrder, mut compress: impl FnMut(&[u8; BLOCK_LEN])) {
        let bit_len = self.total_len.wrapping_mul(8);

        self.block[self.filled] = 0x80;
        self.filled += 1;

        if self.filled > BLOCK_LEN - 8 {
            self.block[self.filled..].fill(0);
            compress(&self.block);
            self.filled = 0;
        }

        self.block[self.filled..BLOCK_LEN - 8].fill(0);
        let len_bytes = match order {
            LengthOrder::Little => bit_len.to_le_bytes(),
            LengthOrder::Big => bit_len.to_be_bytes(),
        };
        self.block[BLOCK_LEN - 8..].copy_from_slice(&len_bytes);
        compress(&self.block);
    }
}
