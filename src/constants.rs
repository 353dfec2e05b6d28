// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 rhythmcache
// https://github.com/rhythmcache/payload-dumper-rust

// Payload
pub const PAYLOAD_MAGIC: &[u8; 4] = crate::wire::PAYLOAD_MAGIC;
pub const SUPPORTED_PAYLOAD_VERSION: u64 = crate::wire::SUPPORTED_PAYLOAD_VERSION;
