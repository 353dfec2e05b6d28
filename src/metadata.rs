// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 rhythmcache
// https://github.com/rhythmcache/payload-dumper-rust
//
// Human-readable JSON dump of a parsed manifest, for the `--list`/metadata
// CLI path. Not used by the install pipeline itself.

use crate::structs::*;
use crate::utils::format_size;
use crate::wire::{CowMergeOperationType, DeltaArchiveManifest};
use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::path::Path;

pub fn handle_metadata_extraction(
    manifest: &DeltaArchiveManifest,
    out_dir: &std::path::Path,
    full_mode: bool,
    images_filter: &str,
    is_stdout: bool,
) -> Result<()> {
    let filter_partitions = if !images_filter.is_empty() {
        let images: HashSet<&str> = images_filter.split(',').collect();
        Some(images)
    } else {
        None
    };

    let json = save_metadata(manifest, out_dir, full_mode, filter_partitions.as_ref())?;

    if is_stdout {
        println!("{}", json);
    } else {
        let mode_str = if full_mode { " (full mode)" } else { "" };
        let filter_str = if filter_partitions.is_some() {
            format!(" for {} partition(s)", images_filter.split(',').count())
        } else {
            String::new()
        };
        println!(
            "metadata{}{} saved to: {}/payload_metadata.json",
            mode_str,
            filter_str,
            out_dir.display()
        );
    }

    Ok(())
}

fn save_metadata(
    manifest: &DeltaArchiveManifest,
    output_dir: &Path,
    full_mode: bool,
    filter_partitions: Option<&HashSet<&str>>,
) -> Result<String> {
    let mut partitions = Vec::new();
    let mut total_payload_size = 0u64;
    let mut total_operations = 0usize;
    let mut global_op_stats: HashMap<String, (usize, u64)> = HashMap::new();

    for partition in &manifest.partitions {
        if let Some(filter) = filter_partitions
            && !filter.contains(partition.partition_name.as_str())
        {
            continue;
        }

        let Some(info) = &partition.new_partition_info else {
            continue;
        };

        let size_in_bytes = info.size;
        let hash = (!info.hash.is_empty()).then(|| hex::encode(&info.hash));

        let mut operations_list = Vec::new();
        let mut op_type_stats: HashMap<String, (usize, u64)> = HashMap::new();
        let mut total_data_size = 0u64;
        let mut num_src_extents = 0usize;
        let mut num_dst_extents = 0usize;

        for (idx, op) in partition.operations.iter().enumerate() {
            let op_type_name = op.r#type().as_str_name().to_string();
            let data_len = op.data_length;

            if full_mode {
                let src_extents: Vec<ExtentInfo> = op
                    .src_extents
                    .iter()
                    .map(|ext| ExtentInfo {
                        start_block: ext.start_block,
                        num_blocks: ext.num_blocks,
                    })
                    .collect();

                let dst_extents: Vec<ExtentInfo> = op
                    .dst_extents
                    .iter()
                    .map(|ext| ExtentInfo {
                        start_block: ext.start_block,
                        num_blocks: ext.num_blocks,
                    })
                    .collect();

                operations_list.push(InstallOperationInfo {
                    operation_type: op_type_name.clone(),
                    operation_index: idx,
                    data_offset: op.data_offset,
                    data_length: op.data_length,
                    data_length_readable: format_size(op.data_length),
                    src_extents,
                    src_length: op.src_length,
                    dst_extents,
                    dst_length: op.dst_length,
                    data_sha256_hash: (!op.data_sha256_hash.is_empty())
                        .then(|| hex::encode(&op.data_sha256_hash)),
                    src_sha256_hash: (!op.src_sha256_hash.is_empty())
                        .then(|| hex::encode(&op.src_sha256_hash)),
                });
            }

            num_src_extents += op.src_extents.len();
            num_dst_extents += op.dst_extents.len();

            let entry = op_type_stats.entry(op_type_name.clone()).or_insert((0, 0));
            entry.0 += 1;
            entry.1 += data_len;

            let global_entry = global_op_stats.entry(op_type_name).or_insert((0, 0));
            global_entry.0 += 1;
            global_entry.1 += data_len;

            total_data_size += data_len;
        }

        total_payload_size += total_data_size;
        total_operations += partition.operations.len();

        let operation_type_stats: Vec<OperationTypeStats> = op_type_stats
            .into_iter()
            .map(|(op_type, (count, size))| OperationTypeStats {
                operation_type: op_type,
                count,
                total_data_size: size,
            })
            .collect();

        let old_partition_info = partition
            .old_partition_info
            .as_ref()
            .map(|old_info| PartitionInfoDetails {
                size: old_info.size,
                hash: (!old_info.hash.is_empty()).then(|| hex::encode(&old_info.hash)),
            });

        let merge_operations: Vec<MergeOperationInfo> = partition
            .merge_operations
            .iter()
            .map(|merge_op| {
                let op_type = CowMergeOperationType::try_from(merge_op.r#type)
                    .map(|t| t.as_str_name().to_string())
                    .unwrap_or_else(|_| "UNKNOWN".to_string());

                MergeOperationInfo {
                    operation_type: op_type,
                    src_extent: merge_op.src_extent.as_ref().map(|ext| ExtentInfo {
                        start_block: ext.start_block,
                        num_blocks: ext.num_blocks,
                    }),
                    dst_extent: merge_op.dst_extent.as_ref().map(|ext| ExtentInfo {
                        start_block: ext.start_block,
                        num_blocks: ext.num_blocks,
                    }),
                    src_offset: merge_op.src_offset,
                }
            })
            .collect();

        let estimate_cow_size =
            (partition.estimate_cow_size > 0).then_some(partition.estimate_cow_size);
        let estimate_cow_size_readable = estimate_cow_size.map(format_size);
        let estimate_op_count_max =
            (partition.estimate_op_count_max > 0).then_some(partition.estimate_op_count_max);

        partitions.push(PartitionMetadata {
            partition_name: partition.partition_name.clone(),
            size_in_bytes,
            size_readable: format_size(size_in_bytes),
            hash,
            partition_type: partition.partition_name.clone(),
            operations_count: partition.operations.len(),
            block_size: manifest.block_size as u64,
            run_postinstall: Some(partition.run_postinstall),
            postinstall_path: (!partition.postinstall_path.is_empty())
                .then(|| partition.postinstall_path.clone()),
            filesystem_type: (!partition.filesystem_type.is_empty())
                .then(|| partition.filesystem_type.clone()),
            version: partition.version,
            old_partition_info,
            estimate_cow_size,
            estimate_cow_size_readable,
            estimate_op_count_max,
            operations: operations_list,
            merge_operations,
            merge_operations_count: partition.merge_operations.len(),
            operation_type_stats,
            total_data_size,
            total_data_size_readable: format_size(total_data_size),
            num_src_extents,
            num_dst_extents,
        });
    }

    let dynamic_partition_metadata =
        manifest.dynamic_partition_metadata.as_ref().map(|dpm| {
            let groups: Vec<DynamicPartitionGroupInfo> = dpm
                .groups
                .iter()
                .map(|group| DynamicPartitionGroupInfo {
                    name: group.name.clone(),
                    size: group.size,
                    size_readable: format_size(group.size),
                    partition_names: group.partition_names.clone(),
                    partition_count: group.partition_names.len(),
                })
                .collect();

            let vabc_feature_set = dpm.vabc_feature_set.as_ref().map(|fs| VabcFeatureSetInfo {
                threaded: fs.threaded,
                batch_writes: fs.batch_writes,
            });

            DynamicPartitionInfo {
                groups_count: dpm.groups.len(),
                groups,
                snapshot_enabled: dpm.snapshot_enabled,
                vabc_enabled: dpm.vabc_enabled,
                vabc_compression_param: dpm.vabc_compression_param.clone(),
                vabc_feature_set,
            }
        });

    let apex_info: Vec<ApexInfoMetadata> = manifest
        .apex_info
        .iter()
        .map(|info| ApexInfoMetadata {
            package_name: info.package_name.clone(),
            version: info.version,
            is_compressed: info.is_compressed,
            decompressed_size: info.decompressed_size,
            decompressed_size_readable: format_size(info.decompressed_size),
        })
        .collect();

    let global_operation_stats: Vec<OperationTypeStats> = global_op_stats
        .into_iter()
        .map(|(op_type, (count, size))| OperationTypeStats {
            operation_type: op_type,
            count,
            total_data_size: size,
        })
        .collect();

    let payload_metadata = PayloadMetadata {
        security_patch_level: manifest.security_patch_level.clone(),
        block_size: manifest.block_size,
        minor_version: manifest.minor_version,
        max_timestamp: manifest.max_timestamp,
        dynamic_partition_metadata,
        partial_update: manifest.partial_update,
        apex_info_count: manifest.apex_info.len(),
        apex_info,
        partitions_count: partitions.len(),
        partitions,
        signatures_offset: manifest.signatures_offset,
        signatures_size: manifest.signatures_size,
        total_payload_size,
        total_payload_size_readable: format_size(total_payload_size),
        total_operations_count: total_operations,
        global_operation_stats,
    };

    let json = serde_json::to_string_pretty(&payload_metadata)?;

    if output_dir.to_string_lossy() == "-" {
        return Ok(json);
    }

    let metadata_path = output_dir.join("payload_metadata.json");
    std::fs::write(metadata_path, &json)?;

    Ok(json)
}
