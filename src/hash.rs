// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 rhythmcache
// https://github.com/rhythmcache/payload-dumper-rust

//! A SHA-256 hasher whose internal state can be snapshotted to a byte
//! string and restored later, so that hashing of a partition can resume
//! after a crash instead of restarting from offset zero.
//!
//! Built directly on `sha2`'s low-level compression function rather than
//! wrapping `Sha256` itself, since the standard digest API has no way to
//! export its Merkle-Damgard state.

use sha2::digest::generic_array::GenericArray;
use sha2::digest::typenum::U64;

const BLOCK_SIZE: usize = 64;
const STATE_WORDS: usize = 8;

const INITIAL_STATE: [u32; STATE_WORDS] = [
    0x6a09e667, 0xbb67ae85, 0x3c6ef372, 0xa54ff53a, 0x510e527f, 0x9b05688c, 0x1f83d9ab, 0x5be0cd19,
];

/// Fixed-width snapshot: 8 state words (32 bytes) + total length (8 bytes)
/// + buffered-but-unprocessed bytes (0..64, length-prefixed by 1 byte).
/// Resolves the open question of how `sha256_context` round-trips to a
/// string for the resume journal: encoded as hex via the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumableSha256 {
    state: [u32; STATE_WORDS],
    total_len: u64,
    buffer: Vec<u8>,
}

impl Default for ResumableSha256 {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot SHA-256 over a fully-buffered input, for callers that don't
/// need a resumable context (source-data integrity checks on an
/// already-read block range).
pub fn sha256(data: &[u8]) -> [u8; 32] {
    use sha2::Digest;
    sha2::Sha256::digest(data).into()
}

impl ResumableSha256 {
    pub fn new() -> Self {
        ResumableSha256 {
            state: INITIAL_STATE,
            total_len: 0,
            buffer: Vec::with_capacity(BLOCK_SIZE),
        }
    }

    pub fn update(&mut self, mut data: &[u8]) {
        self.total_len += data.len() as u64;

        if !self.buffer.is_empty() {
            let needed = BLOCK_SIZE - self.buffer.len();
            let take = needed.min(data.len());
            self.buffer.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.buffer.len() == BLOCK_SIZE {
                let block = GenericArray::clone_from_slice(&self.buffer);
                sha2::compress256(&mut self.state, std::slice::from_ref(&block));
                self.buffer.clear();
            } else {
                return;
            }
        }

        let chunks = data.chunks_exact(BLOCK_SIZE);
        let remainder = chunks.remainder();
        let blocks: Vec<_> = chunks
            .map(GenericArray::<u8, U64>::clone_from_slice)
            .collect();
        if !blocks.is_empty() {
            sha2::compress256(&mut self.state, &blocks);
        }
        self.buffer.extend_from_slice(remainder);
    }

    /// Consumes the hasher, applying Merkle-Damgard padding, and returns
    /// the final 32-byte digest. Mirrors `Sha256::finalize`.
    pub fn finalize(mut self) -> [u8; 32] {
        let bit_len = self.total_len.wrapping_mul(8);
        self.buffer.push(0x80);
        while self.buffer.len() % BLOCK_SIZE != 56 {
            self.buffer.push(0);
        }
        self.buffer.extend_from_slice(&bit_len.to_be_bytes());

        let blocks: Vec<_> = self
            .buffer
            .chunks_exact(BLOCK_SIZE)
            .map(GenericArray::<u8, U64>::clone_from_slice)
            .collect();
        sha2::compress256(&mut self.state, &blocks);

        let mut out = [0u8; 32];
        for (chunk, word) in out.chunks_exact_mut(4).zip(self.state.iter()) {
            chunk.copy_from_slice(&word.to_be_bytes());
        }
        out
    }

    /// Serializes state + total length + pending buffer into a compact
    /// byte string, suitable for hex-encoding into the resume journal.
    pub fn to_context_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 * STATE_WORDS + 8 + 1 + BLOCK_SIZE);
        for word in &self.state {
            out.extend_from_slice(&word.to_be_bytes());
        }
        out.extend_from_slice(&self.total_len.to_be_bytes());
        out.push(self.buffer.len() as u8);
        out.extend_from_slice(&self.buffer);
        out
    }

    pub fn from_context_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 4 * STATE_WORDS + 8 + 1 {
            return None;
        }
        let mut state = [0u32; STATE_WORDS];
        for (i, word) in state.iter_mut().enumerate() {
            let offset = i * 4;
            *word = u32::from_be_bytes(bytes[offset..offset + 4].try_into().ok()?);
        }
        let mut offset = 4 * STATE_WORDS;
        let total_len = u64::from_be_bytes(bytes[offset..offset + 8].try_into().ok()?);
        offset += 8;
        let buffer_len = bytes[offset] as usize;
        offset += 1;
        if buffer_len >= BLOCK_SIZE || bytes.len() < offset + buffer_len {
            return None;
        }
        let buffer = bytes[offset..offset + buffer_len].to_vec();
        Some(ResumableSha256 {
            state,
            total_len,
            buffer,
        })
    }

    pub fn to_context_hex(&self) -> String {
        hex::encode(self.to_context_bytes())
    }

    pub fn from_context_hex(hex_str: &str) -> Option<Self> {
        let bytes = hex::decode(hex_str).ok()?;
        Self::from_context_bytes(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::Digest;

    fn reference(data: &[u8]) -> [u8; 32] {
        sha2::Sha256::digest(data).into()
    }

    #[test]
    fn matches_reference_for_small_input() {
        let mut hasher = ResumableSha256::new();
        hasher.update(b"hello world");
        assert_eq!(hasher.finalize(), reference(b"hello world"));
    }

    #[test]
    fn matches_reference_across_block_boundary() {
        let data = vec![0x42u8; 200];
        let mut hasher = ResumableSha256::new();
        hasher.update(&data[..30]);
        hasher.update(&data[30..130]);
        hasher.update(&data[130..]);
        assert_eq!(hasher.finalize(), reference(&data));
    }

    #[test]
    fn context_round_trip_resumes_correctly() {
        let data = vec![0x7eu8; 500];
        let mut hasher = ResumableSha256::new();
        hasher.update(&data[..300]);

        let hex_ctx = hasher.to_context_hex();
        let mut resumed = ResumableSha256::from_context_hex(&hex_ctx).unwrap();
        resumed.update(&data[300..]);

        assert_eq!(resumed.finalize(), reference(&data));
    }

    #[test]
    fn empty_input_matches_reference() {
        let hasher = ResumableSha256::new();
        assert_eq!(hasher.finalize(), reference(b""));
    }
}
