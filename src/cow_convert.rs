// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 rhythmcache
// https://github.com/rhythmcache/payload-dumper-rust

//! Converts `SOURCE_COPY` install operations and `COW_COPY` merge
//! operations into a flat list of CoW-writer directives.
//!
//! Ported directly from AOSP's `ConvertToCowOperations` (see
//! `common/cow_operation_convert.cc`): COW_COPY merge operations are
//! emitted first, in reverse block order (snapused prefers that order
//! when replaying copies that alias their own source), tracking which
//! destination blocks they cover. SOURCE_COPY operations are then emitted
//! as CowReplace entries, but only for destination blocks not already
//! covered by a merge operation's copy.

use crate::extent::{BlockIterator, ExtentRanges};
use crate::wire::{CowMergeOperationType, InstallOperation, InstallOperationType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CowOperation {
    /// Copy the content already at `dst_block` to `src_block` within the
    /// CoW snapshot (the source and destination partition are the same
    /// device; this aliases a block that must move before being
    /// overwritten).
    CowCopy { src_block: u64, dst_block: u64 },
    /// Read `src_block` from the source partition and store it as
    /// `dst_block`'s raw replacement content in the CoW snapshot.
    CowReplace { src_block: u64, dst_block: u64 },
}

/// Converts `merge_operations` and `operations` for a single partition
/// into the CoW directive list a [`crate::writer::cow::CowWriter`]
/// replays in order.
pub fn convert_to_cow_operations(
    operations: &[InstallOperation],
    merge_operations: &[crate::wire::CowMergeOperation],
) -> Vec<CowOperation> {
    let mut merge_extents = ExtentRanges::new();
    let mut converted = Vec::new();

    for merge_op in merge_operations {
        if merge_op.r#type != CowMergeOperationType::CowCopy as i32 {
            continue;
        }
        let Some(dst_extent) = merge_op.dst_extent.as_ref() else {
            continue;
        };
        let Some(src_extent) = merge_op.src_extent.as_ref() else {
            continue;
        };
        merge_extents.add_extent(dst_extent);

        // Reverse order: snapused prefers replaying copies back-to-front
        // so that a block is never overwritten before it has been copied
        // out from under itself.
        for i in (0..src_extent.num_blocks).rev() {
            let src_block = src_extent.start_block + i;
            let dst_block = dst_extent.start_block + i;
            converted.push(CowOperation::CowCopy {
                src_block,
                dst_block,
            });
        }
    }

    for operation in operations {
        if operation.r#type != InstallOperationType::SourceCopy as i32 {
            continue;
        }
        let mut src_it = BlockIterator::new(&operation.src_extents);
        let mut dst_it = BlockIterator::new(&operation.dst_extents);
        loop {
            let (Some(src_block), Some(dst_block)) = (src_it.next(), dst_it.next()) else {
                break;
            };
            if !merge_extents.contains_block(dst_block) {
                converted.push(CowOperation::CowReplace {
                    src_block,
                    dst_block,
                });
            }
        }
    }

    converted
}
