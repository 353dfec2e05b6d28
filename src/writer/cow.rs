// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 rhythmcache
// https://github.com/rhythmcache/payload-dumper-rust

//! Writes install operations into a Virtual-A/B Copy-on-Write snapshot
//! instead of directly onto the target partition. Grounded in
//! `VABCPartitionWriter`: `Init` pre-converts every `SOURCE_COPY` /
//! `COW_COPY` operation for the partition into CoW directives up front;
//! everything else is written block-by-block as it streams in.

use std::io;

use crate::cow_convert::{convert_to_cow_operations, CowOperation};
use crate::platform::{read_with_ecc_fallback, BlockDevice, Ecc, SnapshotWriter};
use crate::wire::{CowMergeOperation, Extent, InstallOperation};

pub struct CowWriter<'a> {
    snapshot: &'a mut dyn SnapshotWriter,
    source: Option<&'a mut dyn BlockDevice>,
    ecc: Option<&'a mut dyn Ecc>,
    block_size: u32,
}

impl<'a> CowWriter<'a> {
    pub fn new(
        snapshot: &'a mut dyn SnapshotWriter,
        source: Option<&'a mut dyn BlockDevice>,
        ecc: Option<&'a mut dyn Ecc>,
        block_size: u32,
    ) -> Self {
        CowWriter {
            snapshot,
            source,
            ecc,
            block_size,
        }
    }

    /// Replays every `SOURCE_COPY`/`COW_COPY` directive for the partition
    /// into the snapshot. Must run once, before any streamed operation is
    /// applied, since later operations may depend on these blocks having
    /// already moved.
    pub fn init(
        &mut self,
        operations: &[InstallOperation],
        merge_operations: &[CowMergeOperation],
    ) -> io::Result<()> {
        for cow_op in convert_to_cow_operations(operations, merge_operations) {
            match cow_op {
                CowOperation::CowCopy { src_block, dst_block } => {
                    self.snapshot.add_copy(dst_block, src_block)?;
                }
                CowOperation::CowReplace { src_block, dst_block } => {
                    let mut buf = vec![0u8; self.block_size as usize];
                    let source = self.source.as_deref_mut().ok_or_else(|| {
                        io::Error::new(io::ErrorKind::NotFound, "no source device for CowReplace")
                    })?;
                    read_with_ecc_fallback(
                        source,
                        self.ecc.as_deref_mut(),
                        src_block * self.block_size as u64,
                        &mut buf,
                    )?;
                    self.snapshot.add_raw_blocks(dst_block, &buf)?;
                }
            }
        }
        Ok(())
    }

    pub fn perform_replace_operation(&mut self, data: &[u8], dst_extents: &[Extent]) -> io::Result<()> {
        let mut cursor = 0usize;
        for extent in dst_extents {
            for i in 0..extent.num_blocks {
                let block_bytes = self.block_size as usize;
                let chunk = &data[cursor..cursor + block_bytes];
                self.snapshot.add_raw_blocks(extent.start_block + i, chunk)?;
                cursor += block_bytes;
            }
        }
        Ok(())
    }

    pub fn perform_zero_or_discard_operation(&mut self, dst_extents: &[Extent]) -> io::Result<()> {
        for extent in dst_extents {
            self.snapshot.add_zero_blocks(extent.start_block, extent.num_blocks)?;
        }
        Ok(())
    }

    /// `SOURCE_COPY` is a no-op here: every such operation for the
    /// partition was already folded into the snapshot by [`Self::init`],
    /// which has no per-block expected hash to check against, so there is
    /// nothing for `expected_hash` to verify at this layer.
    pub fn perform_source_copy_operation(
        &mut self,
        _src_extents: &[Extent],
        _dst_extents: &[Extent],
        _expected_hash: &[u8],
    ) -> io::Result<()> {
        Ok(())
    }

    pub fn perform_patched_operation(&mut self, patched: &[u8], dst_extents: &[Extent]) -> io::Result<()> {
        self.perform_replace_operation(patched, dst_extents)
    }

    fn read_source_blocks(&mut self, src_extents: &[Extent], force_ecc: bool) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; crate::extent::block_count(src_extents) as usize * self.block_size as usize];
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
                    io::Error::new(io::ErrorKind::NotFound, "no source device for diff operation")
                })?;
                read_with_ecc_fallback(source, self.ecc.as_deref_mut(), offset, chunk)?;
            }
            cursor += len;
        }
        Ok(buf)
    }

    pub fn read_source_for_diff(&mut self, src_extents: &[Extent], expected_hash: &[u8]) -> io::Result<Vec<u8>> {
        let data = self.read_source_blocks(src_extents, false)?;
        if expected_hash.is_empty() || crate::hash::sha256(&data).as_slice() == expected_hash {
            return Ok(data);
        }

        tracing::warn!("diff source hash mismatch, retrying through ECC");
        let recovered = self.read_source_blocks(src_extents, true)?;
        if crate::hash::sha256(&recovered).as_slice() == expected_hash {
            Ok(recovered)
        } else {
            Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "source data does not match its declared hash, even after ECC recovery",
            ))
        }
    }

    /// No-op: nothing buffered at this layer needs flushing before the
    /// snapshot is finalized.
    pub fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    pub fn finalize(&mut self) -> io::Result<()> {
        self.snapshot.finalize()
    }
}
