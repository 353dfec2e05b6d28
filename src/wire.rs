// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 rhythmcache
// https://github.com/rhythmcache/payload-dumper-rust

//! Payload wire format: the CrAU container header plus the protobuf
//! manifest it wraps.
//!
//! ```text
//! | magic(4) | version(u64 BE) | manifest_size(u64 BE) | metadata_signature_size(u32 BE) |
//! | manifest (manifest_size bytes, protobuf) |
//! | metadata signature (metadata_signature_size bytes, protobuf Signatures) |
//! | data blobs ... |
//! | payload signature (referenced by manifest.signatures_offset/size, relative to end of data blobs) |
//! ```

use std::io::{Read, Seek, SeekFrom};

use prost::Message;
use thiserror::Error;

pub mod proto {
    #![allow(clippy::all)]
    include!(concat!(env!("OUT_DIR"), "/chromeos_update_engine.rs"));
}

pub use proto::install_operation::Type as InstallOperationType;
pub use proto::cow_merge_operation::Type as CowMergeOperationType;
pub use proto::{
    ApexInfo, ApexInfoList, DeltaArchiveManifest, DynamicPartitionGroup,
    DynamicPartitionMetadata, Extent, InstallOperation, CowMergeOperation, PartitionInfo,
    PartitionUpdate, Signature, Signatures, VABCFeatureSet,
};

pub const PAYLOAD_MAGIC: &[u8; 4] = b"CrAU";
pub const SUPPORTED_PAYLOAD_VERSION: u64 = 2;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("I/O error reading payload: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid payload file: magic 'CrAU' not found")]
    BadMagic,
    #[error("unsupported payload version {0} (expected {SUPPORTED_PAYLOAD_VERSION})")]
    UnsupportedVersion(u64),
    #[error("failed to decode manifest protobuf: {0}")]
    DecodeManifest(#[from] prost::DecodeError),
    #[error("manifest declares zero block size")]
    ZeroBlockSize,
}

/// The fixed-size CrAU header, read first from any payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadHeader {
    pub version: u64,
    pub manifest_size: u64,
    pub metadata_signature_size: u32,
}

/// Size, in bytes, of the header fields preceding the manifest.
pub const HEADER_SIZE: u64 = 4 + 8 + 8 + 4;

pub fn read_header<R: Read>(reader: &mut R) -> Result<PayloadHeader, WireError> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != PAYLOAD_MAGIC {
        return Err(WireError::BadMagic);
    }

    let mut buf8 = [0u8; 8];
    reader.read_exact(&mut buf8)?;
    let version = u64::from_be_bytes(buf8);
    if version != SUPPORTED_PAYLOAD_VERSION {
        return Err(WireError::UnsupportedVersion(version));
    }

    reader.read_exact(&mut buf8)?;
    let manifest_size = u64::from_be_bytes(buf8);

    let mut buf4 = [0u8; 4];
    reader.read_exact(&mut buf4)?;
    let metadata_signature_size = u32::from_be_bytes(buf4);

    Ok(PayloadHeader {
        version,
        manifest_size,
        metadata_signature_size,
    })
}

/// Everything about the payload layout that the metadata verifier and
/// executor need: the decoded manifest, the raw header and manifest bytes
/// (together the signed region for metadata signature verification, per
/// `ValidateMetadataSignature`'s "hash the first `metadata_size` bytes" —
/// the fixed header plus the manifest, not the manifest alone), the
/// metadata signature bytes, and the absolute offset at which
/// install-operation data blobs begin.
pub struct ParsedPayload {
    pub header: PayloadHeader,
    pub manifest: DeltaArchiveManifest,
    pub header_bytes: Vec<u8>,
    pub manifest_bytes: Vec<u8>,
    pub metadata_signature_bytes: Vec<u8>,
    pub data_offset: u64,
}

impl ParsedPayload {
    /// The exact byte range a metadata signature is computed over:
    /// the fixed `CrAU` header followed by the manifest.
    pub fn signed_metadata(&self) -> Vec<u8> {
        let mut signed = Vec::with_capacity(self.header_bytes.len() + self.manifest_bytes.len());
        signed.extend_from_slice(&self.header_bytes);
        signed.extend_from_slice(&self.manifest_bytes);
        signed
    }
}

/// Parses the CrAU header and manifest from a seekable reader positioned
/// anywhere; always seeks to the start first.
pub fn parse_payload<R: Read + Seek>(reader: &mut R) -> Result<ParsedPayload, WireError> {
    reader.seek(SeekFrom::Start(0))?;

    let mut header_bytes = vec![0u8; HEADER_SIZE as usize];
    reader.read_exact(&mut header_bytes)?;
    let header = read_header(&mut std::io::Cursor::new(&header_bytes))?;

    let mut manifest_bytes = vec![0u8; header.manifest_size as usize];
    reader.read_exact(&mut manifest_bytes)?;

    let mut metadata_signature_bytes = vec![0u8; header.metadata_signature_size as usize];
    reader.read_exact(&mut metadata_signature_bytes)?;

    let data_offset = HEADER_SIZE + header.manifest_size + header.metadata_signature_size as u64;

    let manifest = DeltaArchiveManifest::decode(&manifest_bytes[..])?;
    if manifest.block_size == 0 {
        return Err(WireError::ZeroBlockSize);
    }

    Ok(ParsedPayload {
        header,
        manifest,
        header_bytes,
        manifest_bytes,
        metadata_signature_bytes,
        data_offset,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_manifest_bytes() -> Vec<u8> {
        let manifest = DeltaArchiveManifest {
            block_size: 4096,
            ..Default::default()
        };
        manifest.encode_to_vec()
    }

    fn build_payload(manifest_bytes: &[u8], metadata_sig: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(PAYLOAD_MAGIC);
        out.extend_from_slice(&SUPPORTED_PAYLOAD_VERSION.to_be_bytes());
        out.extend_from_slice(&(manifest_bytes.len() as u64).to_be_bytes());
        out.extend_from_slice(&(metadata_sig.len() as u32).to_be_bytes());
        out.extend_from_slice(manifest_bytes);
        out.extend_from_slice(metadata_sig);
        out.extend_from_slice(b"DATA BLOB HERE");
        out
    }

    #[test]
    fn parses_well_formed_payload() {
        let manifest_bytes = sample_manifest_bytes();
        let bytes = build_payload(&manifest_bytes, b"sig");
        let mut cursor = Cursor::new(bytes);

        let parsed = parse_payload(&mut cursor).unwrap();
        assert_eq!(parsed.manifest.block_size, 4096);
        assert_eq!(parsed.header.metadata_signature_size, 3);
        assert_eq!(
            parsed.data_offset,
            HEADER_SIZE + manifest_bytes.len() as u64 + 3
        );
    }

    #[test]
    fn rejects_bad_magic() {
        let mut cursor = Cursor::new(b"NOPE0000000000000000".to_vec());
        assert!(matches!(parse_payload(&mut cursor), Err(WireError::BadMagic)));
    }

    #[test]
    fn rejects_unsupported_version() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(PAYLOAD_MAGIC);
        bytes.extend_from_slice(&99u64.to_be_bytes());
        bytes.extend_from_slice(&0u64.to_be_bytes());
        bytes.extend_from_slice(&0u32.to_be_bytes());
        let mut cursor = Cursor::new(bytes);
        assert!(matches!(
            parse_payload(&mut cursor),
            Err(WireError::UnsupportedVersion(99))
        ));
    }
}
