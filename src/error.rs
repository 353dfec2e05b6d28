// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 rhythmcache
// https://github.com/rhythmcache/payload-dumper-rust

//! Stable, named error codes for everything that can go wrong while
//! verifying and applying a payload, modeled on AOSP update_engine's
//! `ErrorCode` enum: callers (and resume logic) branch on the code, not
//! on the error message.

use thiserror::Error;

/// A stable identifier for a failure category, independent of the
/// human-readable message carried alongside it. Kept as a separate enum
/// (rather than matching on `ConsumerError` variants) so that callers can
/// persist it, e.g. into a report sent back to an update server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Success,
    DownloadTransferError,
    DownloadInvalidMetadataMagicString,
    DownloadMetadataSignatureMismatch,
    DownloadMetadataSignatureMissingError,
    DownloadStateInitializationError,
    DownloadManifestParseError,
    DownloadNewPartitionInfoError,
    DownloadOperationHashMismatch,
    DownloadOperationHashMissingError,
    DownloadOperationExecutionError,
    PayloadMismatchedType,
    InstallDeviceOpenError,
    KernelDeviceOpenError,
    FilesystemCopierError,
    NewRootfsVerificationError,
    NewKernelVerificationError,
    SignedDeltaPayloadExpectedError,
    DownloadPayloadPubKeyVerificationError,
    NotEnoughSpace,
    DeviceCorrupted,
    UpdatedButNotActive,
    UnsupportedMajorPayloadVersion,
    UnsupportedMinorPayloadVersion,
    OmahaRequestXMLHasEntityDecl,
    FilesystemVerifierError,
    UserCanceled,
    NonCriticalUpdateInFailureState,
    OversizedUpdate,
    InternalLibCurlError,
}

impl ErrorCode {
    /// Numeric value matching AOSP's `update_engine::ErrorCode` where a
    /// directly corresponding variant exists, used when reporting status
    /// to anything that expects the original wire values.
    pub fn code(self) -> i32 {
        match self {
            ErrorCode::Success => 0,
            ErrorCode::DownloadTransferError => 9,
            ErrorCode::DownloadInvalidMetadataMagicString => 11,
            ErrorCode::DownloadMetadataSignatureMismatch => 13,
            ErrorCode::DownloadMetadataSignatureMissingError => 39,
            ErrorCode::DownloadStateInitializationError => 20,
            ErrorCode::DownloadManifestParseError => 14,
            ErrorCode::DownloadNewPartitionInfoError => 15,
            ErrorCode::DownloadOperationHashMismatch => 16,
            ErrorCode::DownloadOperationHashMissingError => 19,
            ErrorCode::DownloadOperationExecutionError => 18,
            ErrorCode::PayloadMismatchedType => 21,
            ErrorCode::InstallDeviceOpenError => 22,
            ErrorCode::KernelDeviceOpenError => 23,
            ErrorCode::FilesystemCopierError => 24,
            ErrorCode::NewRootfsVerificationError => 31,
            ErrorCode::NewKernelVerificationError => 32,
            ErrorCode::SignedDeltaPayloadExpectedError => 33,
            ErrorCode::DownloadPayloadPubKeyVerificationError => 34,
            ErrorCode::NotEnoughSpace => 35,
            ErrorCode::DeviceCorrupted => 36,
            ErrorCode::UpdatedButNotActive => 37,
            ErrorCode::UnsupportedMajorPayloadVersion => 39,
            ErrorCode::UnsupportedMinorPayloadVersion => 40,
            ErrorCode::OmahaRequestXMLHasEntityDecl => 51,
            ErrorCode::FilesystemVerifierError => 52,
            ErrorCode::UserCanceled => 48,
            ErrorCode::NonCriticalUpdateInFailureState => 56,
            ErrorCode::OversizedUpdate => 57,
            ErrorCode::InternalLibCurlError => 58,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("[{code:?}] payload wire format error: {source}")]
    Wire {
        code: ErrorCode,
        #[source]
        source: crate::wire::WireError,
    },

    #[error("[{code:?}] metadata signature verification failed")]
    SignatureVerification { code: ErrorCode },

    #[error("[{code:?}] signed payload carries no metadata signature")]
    MetadataSignatureMissing { code: ErrorCode },

    #[error("[{code:?}] operation {operation_index} in partition '{partition}' failed its data hash check")]
    OperationHashMismatch {
        code: ErrorCode,
        partition: String,
        operation_index: usize,
    },

    #[error("[{code:?}] operation {operation_index} in partition '{partition}' carried no expected data hash")]
    OperationHashMissing {
        code: ErrorCode,
        partition: String,
        operation_index: usize,
    },

    #[error("[{code:?}] failed to execute operation {operation_index} in partition '{partition}': {message}")]
    OperationExecution {
        code: ErrorCode,
        partition: String,
        operation_index: usize,
        message: String,
    },

    #[error("[{code:?}] target partition '{partition}' failed filesystem verification")]
    TargetVerificationFailed { code: ErrorCode, partition: String },

    #[error("[{code:?}] source partition '{partition}' failed filesystem verification")]
    SourceVerificationFailed { code: ErrorCode, partition: String },

    #[error("[{code:?}] unsupported minor payload version {version}")]
    UnsupportedMinorVersion { code: ErrorCode, version: u64 },

    #[error("[{code:?}] I/O error on '{device}': {source}")]
    Device {
        code: ErrorCode,
        device: String,
        #[source]
        source: std::io::Error,
    },

    #[error("[{code:?}] resume journal error: {source}")]
    Journal {
        code: ErrorCode,
        #[source]
        source: crate::journal::JournalError,
    },

    #[error("[{code:?}] update was canceled")]
    Canceled { code: ErrorCode },

    #[error("[{code:?}] {message}")]
    Other { code: ErrorCode, message: String },
}

impl ConsumerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ConsumerError::Wire { code, .. }
            | ConsumerError::SignatureVerification { code }
            | ConsumerError::MetadataSignatureMissing { code }
            | ConsumerError::OperationHashMismatch { code, .. }
            | ConsumerError::OperationHashMissing { code, .. }
            | ConsumerError::OperationExecution { code, .. }
            | ConsumerError::TargetVerificationFailed { code, .. }
            | ConsumerError::SourceVerificationFailed { code, .. }
            | ConsumerError::UnsupportedMinorVersion { code, .. }
            | ConsumerError::Device { code, .. }
            | ConsumerError::Journal { code, .. }
            | ConsumerError::Canceled { code }
            | ConsumerError::Other { code, .. } => *code,
        }
    }
}

pub type Result<T> = std::result::Result<T, ConsumerError>;
