// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 rhythmcache
// https://github.com/rhythmcache/payload-dumper-rust

//! The two ways an install operation's result can be committed: directly
//! to a statically-partitioned block device, or into a Virtual-A/B CoW
//! snapshot. The original models this with a `PartitionWriter` /
//! `VABCPartitionWriter` class hierarchy and virtual dispatch; here the
//! set of writer kinds is closed and known at compile time, so a plain
//! enum with a `match` in each method is both simpler and lets the
//! compiler check exhaustiveness.

pub mod cow;
pub mod raw;

use std::io;

use crate::wire::{CowMergeOperation, Extent, InstallOperation};

pub enum Writer<'a> {
    Raw(raw::RawWriter<'a>),
    Cow(cow::CowWriter<'a>),
}

impl<'a> Writer<'a> {
    /// Only meaningful for [`Writer::Cow`]; a no-op for [`Writer::Raw`],
    /// which performs `SOURCE_COPY` operations inline as they stream in.
    pub fn init(
        &mut self,
        operations: &[InstallOperation],
        merge_operations: &[CowMergeOperation],
    ) -> io::Result<()> {
        match self {
            Writer::Raw(_) => Ok(()),
            Writer::Cow(writer) => writer.init(operations, merge_operations),
        }
    }

    pub fn perform_replace_operation(&mut self, data: &[u8], dst_extents: &[Extent]) -> io::Result<()> {
        match self {
            Writer::Raw(writer) => writer.perform_replace_operation(data, dst_extents),
            Writer::Cow(writer) => writer.perform_replace_operation(data, dst_extents),
        }
    }

    pub fn perform_zero_or_discard_operation(&mut self, dst_extents: &[Extent]) -> io::Result<()> {
        match self {
            Writer::Raw(writer) => writer.perform_zero_or_discard_operation(dst_extents),
            Writer::Cow(writer) => writer.perform_zero_or_discard_operation(dst_extents),
        }
    }

    pub fn perform_source_copy_operation(
        &mut self,
        src_extents: &[Extent],
        dst_extents: &[Extent],
        expected_hash: &[u8],
    ) -> io::Result<()> {
        match self {
            Writer::Raw(writer) => writer.perform_source_copy_operation(src_extents, dst_extents, expected_hash),
            Writer::Cow(writer) => writer.perform_source_copy_operation(src_extents, dst_extents, expected_hash),
        }
    }

    pub fn perform_patched_operation(&mut self, patched: &[u8], dst_extents: &[Extent]) -> io::Result<()> {
        match self {
            Writer::Raw(writer) => writer.perform_patched_operation(patched, dst_extents),
            Writer::Cow(writer) => writer.perform_patched_operation(patched, dst_extents),
        }
    }

    pub fn read_source_for_diff(&mut self, src_extents: &[Extent], expected_hash: &[u8]) -> io::Result<Vec<u8>> {
        match self {
            Writer::Raw(writer) => writer.read_source_for_diff(src_extents, expected_hash),
            Writer::Cow(writer) => writer.read_source_for_diff(src_extents, expected_hash),
        }
    }

    pub fn flush(&mut self) -> io::Result<()> {
        match self {
            Writer::Raw(writer) => writer.flush(),
            Writer::Cow(writer) => writer.flush(),
        }
    }

    /// Only meaningful for [`Writer::Cow`]; a no-op for [`Writer::Raw`].
    pub fn finalize(&mut self) -> io::Result<()> {
        match self {
            Writer::Raw(_) => Ok(()),
            Writer::Cow(writer) => writer.finalize(),
        }
    }
}
