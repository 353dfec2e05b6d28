// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 rhythmcache
// https://github.com/rhythmcache/payload-dumper-rust

//! Post-apply filesystem verification: hash the written partition and
//! compare it against the manifest's expected hash.
//!
//! Grounded in `FilesystemVerifierAction`'s two-step verification order
//! (`kVerifyTargetHash` then, only if that fails, `kVerifySourceHash` to
//! tell a corrupt write apart from a source that was already bad before
//! the update started) and in the teacher's own streaming-hash idiom in
//! `cli/verification/verify.rs` (1 MiB read buffer, incremental SHA-256).

use thiserror::Error;

use crate::platform::BlockDevice;

const READ_BUFFER_SIZE: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum FsVerifierError {
    #[error("I/O error while hashing partition: {0}")]
    Io(#[from] std::io::Error),
    #[error("verification canceled")]
    Canceled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyStep {
    VerifyTargetHash,
    VerifySourceHash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Matched,
    Mismatched,
}

/// Streams `size` bytes from `device`, starting at offset 0, through
/// SHA-256, calling `is_cancelled` between chunks so a caller embedded in
/// a cooperative executor can abort a long hash without a background
/// thread.
pub fn hash_partition(
    device: &mut dyn BlockDevice,
    size: u64,
    mut is_cancelled: impl FnMut() -> bool,
) -> Result<[u8; 32], FsVerifierError> {
    use sha2::Digest;

    let mut hasher = sha2::Sha256::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut offset = 0u64;

    while offset < size {
        if is_cancelled() {
            return Err(FsVerifierError::Canceled);
        }
        let chunk_len = (size - offset).min(READ_BUFFER_SIZE as u64) as usize;
        device.read_at(offset, &mut buf[..chunk_len])?;
        hasher.update(&buf[..chunk_len]);
        offset += chunk_len as u64;
    }

    Ok(hasher.finalize().into())
}

/// Hashes `device` and compares the result to `expected_hash`. Returns
/// [`VerifyOutcome::Mismatched`] rather than an error on a hash mismatch;
/// only I/O failures and cancellation are propagated as errors, since a
/// mismatch is an expected, handled outcome (the caller falls back to
/// `VerifySourceHash` or reports `FilesystemVerifierError`). `step`
/// identifies which of the two verification stages this call performs, for
/// diagnostics only.
pub fn verify_partition(
    device: &mut dyn BlockDevice,
    size: u64,
    expected_hash: &[u8],
    step: VerifyStep,
    is_cancelled: impl FnMut() -> bool,
) -> Result<VerifyOutcome, FsVerifierError> {
    tracing::debug!(?step, size, "verifying partition hash");
    let actual = hash_partition(device, size, is_cancelled)?;
    Ok(if actual.as_slice() == expected_hash {
        VerifyOutcome::Matched
    } else {
        VerifyOutcome::Mismatched
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MemoryBlockDevice;

    #[test]
    fn matching_hash_is_reported() {
        let mut device = MemoryBlockDevice::from_vec(vec![0x11u8; 64]);
        let expected = {
            use sha2::Digest;
            sha2::Sha256::digest([0x11u8; 64])
        };
        let outcome = verify_partition(&mut device, 64, &expected, VerifyStep::VerifyTargetHash, || false).unwrap();
        assert_eq!(outcome, VerifyOutcome::Matched);
    }

    #[test]
    fn mismatching_hash_is_reported_not_errored() {
        let mut device = MemoryBlockDevice::from_vec(vec![0x22u8; 64]);
        let outcome = verify_partition(&mut device, 64, &[0u8; 32], VerifyStep::VerifyTargetHash, || false).unwrap();
        assert_eq!(outcome, VerifyOutcome::Mismatched);
    }

    #[test]
    fn cancellation_short_circuits() {
        let mut device = MemoryBlockDevice::new(READ_BUFFER_SIZE * 3);
        let result = hash_partition(&mut device, (READ_BUFFER_SIZE * 3) as u64, || true);
        assert!(matches!(result, Err(FsVerifierError::Canceled)));
    }

    #[test]
    fn hashes_across_multiple_read_buffers() {
        let size = READ_BUFFER_SIZE * 2 + 17;
        let mut device = MemoryBlockDevice::from_vec(vec![0x33u8; size]);
        let expected = {
            use sha2::Digest;
            sha2::Sha256::digest(vec![0x33u8; size])
        };
        let hash = hash_partition(&mut device, size as u64, || false).unwrap();
        assert_eq!(hash.as_slice(), expected.as_slice());
    }
}
