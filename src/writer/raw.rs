// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 rhythmcache
// https://github.com/rhythmcache/payload-dumper-rust

//! Writes install operations directly to a statically-partitioned target
//! block device. Grounded in `PartitionWriter`'s `Perform*Operation`
//! methods for a non-dynamic (non-Virtual-A/B) partition.

use std::io;

use crate::extent::BlockIterator;
use crate::hash::sha256;
use crate::platform::{read_with_ecc_fallback, BlockDevice, Ecc};
use crate::wire::Extent;

pub struct RawWriter<'a> {
    target: &'a mut dyn BlockDevice,
    source: Option<&'a mut dyn BlockDevice>,
    ecc: Option<&'a mut dyn Ecc>,
    block_size: u32,
}

impl<'a> RawWriter<'a> {
    pub fn new(
        target: &'a mut dyn BlockDevice,
        source: Option<&'a mut dyn BlockDevice>,
        ecc: Option<&'a mut dyn Ecc>,
        block_size: u32,
    ) -> Self {
        RawWriter {
            target,
            source,
            ecc,
            block_size,
        }
    }

    fn dst_extents_total_len(&self, dst_extents: &[Extent]) -> usize {
        dst_extents
            .iter()
            .map(|e| e.num_blocks as usize * self.block_size as usize)
            .sum()
    }

    pub fn perform_replace_operation(&mut self, data: &[u8], dst_extents: &[Extent]) -> io::Result<()> {
        let expected = self.dst_extents_total_len(dst_extents);
        if data.len() != expected {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("replace data is {} bytes, destination extents cover {expected}", data.len()),
            ));
        }
        let mut cursor = 0usize;
        for extent in dst_extents {
            let len = extent.num_blocks as usize * self.block_size as usize;
            let offset = extent.start_block * self.block_size as u64;
            self.target.write_at(offset, &data[cursor..cursor + len])?;
            cursor += len;
        }
        Ok(())
    }

    /// `DISCARD` is treated identically to `ZERO` at this layer: without a
    /// real TRIM-capable block device beneath `target`, the safest
    /// observable behavior is to actually zero the blocks.
    pub fn perform_zero_or_discard_operation(&mut self, dst_extents: &[Extent]) -> io::Result<()> {
        let zero_block = vec![0u8; self.block_size as usize];
        for extent in dst_extents {
            for i in 0..extent.num_blocks {
                let offset = (extent.start_block + i) * self.block_size as u64;
                self.target.write_at(offset, &zero_block)?;
            }
        }
        Ok(())
    }

    fn read_source_blocks(&mut self, src_extents: &[Extent], force_ecc: bool) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; BlockIterator::new(src_extents).count() * self.block_size as usize];
        let mut cursor = 0usize;
        for extent in src_extents {
            let len = extent.num_blocks as usize * self.block_size as usize;
            let offset = extent.start_block * self.block_size as u64;
            let chunk = &mut buf[cursor..cursor + len];
            if force_ecc {
                let ecc = self.ecc.as_deref_mut().ok_or_else(|| {
                    io::Error::new(io::ErrorKind::InvalidData, "no ECC fallback available to recover corrupted source data")
                })?;
                if !ecc.recover_at(offset, chunk)? {
                    return Err(io::Error::new(io::ErrorKind::InvalidData, "ECC recovery failed for corrupted source blocks"));
                }
            } else {
                let source = self.source.as_deref_mut().ok_or_else(|| {
                    io::Error::new(io::ErrorKind::NotFound, "no source device for delta operation")
                })?;
                read_with_ecc_fallback(source, self.ecc.as_deref_mut(), offset, chunk)?;
            }
            cursor += len;
        }
        Ok(buf)
    }

    /// Reads `src_extents`, verifying against `expected_hash` when
    /// non-empty. If the first read's content doesn't match, retries the
    /// whole range through the error-corrected device before giving up,
    /// mirroring `PartitionWriter::ChooseSourceFD`'s ECC retry on a
    /// corrupted (not just unreadable) source.
    fn read_and_verify_source(&mut self, src_extents: &[Extent], expected_hash: &[u8]) -> io::Result<Vec<u8>> {
        let data = self.read_source_blocks(src_extents, false)?;
        if expected_hash.is_empty() || sha256(&data).as_slice() == expected_hash {
            return Ok(data);
        }

        tracing::warn!(
            blocks = BlockIterator::new(src_extents).count(),
            "source data hash mismatch, retrying through ECC"
        );
        let recovered = self.read_source_blocks(src_extents, true)?;
        if sha256(&recovered).as_slice() == expected_hash {
            tracing::info!("source data recovered via ECC");
            Ok(recovered)
        } else {
            Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "source data does not match its declared hash, even after ECC recovery",
            ))
        }
    }

    pub fn perform_source_copy_operation(
        &mut self,
        src_extents: &[Extent],
        dst_extents: &[Extent],
        expected_hash: &[u8],
    ) -> io::Result<()> {
        // Read the full source content before writing any destination
        // block, so that self-overlapping source/destination ranges on
        // the same device never read back partially-written data.
        let data = self.read_and_verify_source(src_extents, expected_hash)?;
        self.perform_replace_operation(&data, dst_extents)
    }

    pub fn perform_patched_operation(&mut self, patched: &[u8], dst_extents: &[Extent]) -> io::Result<()> {
        self.perform_replace_operation(patched, dst_extents)
    }

    pub fn read_source_for_diff(&mut self, src_extents: &[Extent], expected_hash: &[u8]) -> io::Result<Vec<u8>> {
        self.read_and_verify_source(src_extents, expected_hash)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.target.flush()
    }
}
