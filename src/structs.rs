// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 rhythmcache
// https://github.com/rhythmcache/payload-dumper-rust

use serde::Serialize;

#[derive(Serialize, Clone)]
pub struct ExtentInfo {
    pub start_block: u64,
    pub num_blocks: u64,
}

#[derive(Serialize)]
pub struct PartitionInfoDetails {
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

#[derive(Serialize)]
pub struct InstallOperationInfo {
    pub operation_type: String,
    pub operation_index: usize,
    pub data_offset: u64,
    pub data_length: u64,
    pub data_length_readable: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub src_extents: Vec<ExtentInfo>,
    pub src_length: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dst_extents: Vec<ExtentInfo>,
    pub dst_length: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_sha256_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_sha256_hash: Option<String>,
}

#[derive(Serialize)]
pub struct OperationTypeStats {
    pub operation_type: String,
    pub count: usize,
    pub total_data_size: u64,
}

#[derive(Serialize)]
pub struct MergeOperationInfo {
    pub operation_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_extent: Option<ExtentInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dst_extent: Option<ExtentInfo>,
    pub src_offset: u32,
}

#[derive(Serialize)]
pub struct PartitionMetadata {
    pub partition_name: String,
    pub size_in_bytes: u64,
    pub size_readable: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    pub partition_type: String,
    pub operations_count: usize,
    pub block_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_postinstall: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postinstall_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filesystem_type: Option<String>,
    pub version: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_partition_info: Option<PartitionInfoDetails>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimate_cow_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimate_cow_size_readable: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimate_op_count_max: Option<u64>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub operations: Vec<InstallOperationInfo>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub merge_operations: Vec<MergeOperationInfo>,
    pub merge_operations_count: usize,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub operation_type_stats: Vec<OperationTypeStats>,
    pub total_data_size: u64,
    pub total_data_size_readable: String,
    pub num_src_extents: usize,
    pub num_dst_extents: usize,
}

#[derive(Serialize)]
pub struct DynamicPartitionGroupInfo {
    pub name: String,
    pub size: u64,
    pub size_readable: String,
    pub partition_names: Vec<String>,
    pub partition_count: usize,
}

#[derive(Serialize)]
pub struct VabcFeatureSetInfo {
    pub threaded: bool,
    pub batch_writes: bool,
}

#[derive(Serialize)]
pub struct DynamicPartitionInfo {
    pub groups: Vec<DynamicPartitionGroupInfo>,
    pub groups_count: usize,
    pub snapshot_enabled: bool,
    pub vabc_enabled: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub vabc_compression_param: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vabc_feature_set: Option<VabcFeatureSetInfo>,
}

#[derive(Serialize)]
pub struct ApexInfoMetadata {
    pub package_name: String,
    pub version: i64,
    pub is_compressed: bool,
    pub decompressed_size: u64,
    pub decompressed_size_readable: String,
}

#[derive(Serialize)]
pub struct PayloadMetadata {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub security_patch_level: String,
    pub block_size: u32,
    pub minor_version: u64,
    pub max_timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dynamic_partition_metadata: Option<DynamicPartitionInfo>,
    pub partial_update: bool,
    pub apex_info: Vec<ApexInfoMetadata>,
    pub apex_info_count: usize,
    pub partitions: Vec<PartitionMetadata>,
    pub partitions_count: usize,

    pub signatures_offset: u64,
    pub signatures_size: u64,

    pub total_payload_size: u64,
    pub total_payload_size_readable: String,
    pub total_operations_count: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub global_operation_stats: Vec<OperationTypeStats>,
}
