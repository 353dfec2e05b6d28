// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 rhythmcache
// https://github.com/rhythmcache/payload-dumper-rust

//! The fixed action sequence that applies a payload to a device:
//! `VerifySource -> Download+Apply -> VerifyTarget -> Finalize`, driven
//! as a synchronous, single-threaded, cooperative state machine rather
//! than a chain of async tasks or callback-based actions.
//!
//! Grounded in the teacher's `cli/entry.rs::run` sequencing (detect ->
//! parse -> extract -> verify -> report) for the overall phase order, and
//! in `install_plan.h` for the plan fields carried between phases. Data
//! arrives via repeated [`ActionPipeline::feed`] calls; [`ActionPipeline::poll`]
//! reports how much more is needed and when a phase completes, so a
//! caller streaming a payload over a slow link never has to block this
//! crate on I/O.

use std::collections::HashMap;

use crate::error::{ConsumerError, ErrorCode};
use crate::executor;
use crate::hash::ResumableSha256;
use crate::journal::{keys, Journal};
use crate::platform::BlockDevice;
use crate::verifier::{self, TrustedKey};
use crate::verifier_fs::{self, VerifyOutcome, VerifyStep};
use crate::wire::{DeltaArchiveManifest, InstallOperation};
use crate::writer::Writer;

/// Everything needed to check a payload's metadata signature before any
/// operation is applied: the exact signed byte range (header + manifest,
/// see `ParsedPayload::signed_metadata`), the metadata signature blob, and
/// the key to check it against. Passing `None` to [`ActionPipeline::new`]
/// skips this phase entirely — meant only for unsigned test fixtures, since
/// every real major payload version is signed.
pub struct SignatureConfig {
    pub signed_metadata: Vec<u8>,
    pub metadata_signature_bytes: Vec<u8>,
    pub key: TrustedKey,
}

/// Carried between phases, analogous to AOSP's `InstallPlan`.
#[derive(Debug, Clone)]
pub struct InstallPlan {
    pub is_resume: bool,
    pub source_slot: String,
    pub target_slot: String,
    pub hash_checks_mandatory: bool,
    pub powerwash_required: bool,
}

impl Default for InstallPlan {
    fn default() -> Self {
        InstallPlan {
            is_resume: false,
            source_slot: "a".to_string(),
            target_slot: "b".to_string(),
            hash_checks_mandatory: true,
            powerwash_required: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    VerifySignature,
    VerifySource,
    Apply,
    VerifyTarget,
    Finalize,
    Done,
}

/// A single operation together with the partition it belongs to,
/// flattened out of the manifest's per-partition operation lists into one
/// globally-ordered sequence. The resume journal's `next_operation` key
/// indexes into this flattened sequence.
struct FlatOperation {
    partition: String,
    operation: InstallOperation,
}

fn flatten_operations(manifest: &DeltaArchiveManifest) -> Vec<FlatOperation> {
    manifest
        .partitions
        .iter()
        .flat_map(|partition| {
            partition.operations.iter().map(|op| FlatOperation {
                partition: partition.partition_name.clone(),
                operation: op.clone(),
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollResult {
    /// The pipeline needs at least `want` more bytes fed in via
    /// [`ActionPipeline::feed`] before it can make further progress on
    /// the current operation.
    NeedData { want: usize },
    /// An operation was applied; useful for progress reporting.
    OperationApplied {
        operations_done: usize,
        operations_total: usize,
    },
    /// The current phase finished; the pipeline has advanced to the next
    /// one (or to [`PollResult::Done`] if that was the last phase).
    PhaseComplete,
    Done,
}

pub struct ActionPipeline<'a> {
    manifest: DeltaArchiveManifest,
    plan: InstallPlan,
    journal: Journal,
    signature_config: Option<SignatureConfig>,
    operations: Vec<FlatOperation>,
    next_operation: usize,
    pending: Vec<u8>,
    phase: Phase,
    cancelled: bool,
    writers: HashMap<String, Writer<'a>>,
    target_devices: HashMap<String, &'a mut dyn BlockDevice>,
    source_devices: HashMap<String, &'a mut dyn BlockDevice>,
}

impl<'a> ActionPipeline<'a> {
    pub fn new(
        manifest: DeltaArchiveManifest,
        plan: InstallPlan,
        journal: Journal,
        signature_config: Option<SignatureConfig>,
        mut writers: HashMap<String, Writer<'a>>,
        target_devices: HashMap<String, &'a mut dyn BlockDevice>,
        source_devices: HashMap<String, &'a mut dyn BlockDevice>,
    ) -> Result<Self, ConsumerError> {
        let operations = flatten_operations(&manifest);
        let next_operation = if plan.is_resume {
            journal.get_u64(keys::NEXT_OPERATION).unwrap_or(0) as usize
        } else {
            0
        };
        let phase = if plan.is_resume {
            Phase::Apply
        } else {
            Phase::VerifySignature
        };

        // Fold every SOURCE_COPY/COW_COPY for each partition into its
        // writer up front; a no-op for raw writers.
        for partition in &manifest.partitions {
            if let Some(writer) = writers.get_mut(&partition.partition_name) {
                writer
                    .init(&partition.operations, &partition.merge_operations)
                    .map_err(|source| ConsumerError::Device {
                        code: ErrorCode::InstallDeviceOpenError,
                        device: partition.partition_name.clone(),
                        source,
                    })?;
            }
        }

        Ok(ActionPipeline {
            manifest,
            plan,
            journal,
            signature_config,
            operations,
            next_operation,
            pending: Vec::new(),
            phase,
            cancelled: false,
            writers,
            target_devices,
            source_devices,
        })
    }

    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    fn check_cancelled(&self) -> Result<(), ConsumerError> {
        if self.cancelled {
            Err(ConsumerError::Canceled {
                code: ErrorCode::UserCanceled,
            })
        } else {
            Ok(())
        }
    }

    /// Feeds additional payload data blob bytes into the pipeline. Only
    /// meaningful during [`Phase::Apply`]; ignored otherwise.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<(), ConsumerError> {
        self.check_cancelled()?;
        if self.phase == Phase::Apply {
            self.pending.extend_from_slice(bytes);
        }
        Ok(())
    }

    /// Advances the state machine as far as currently-buffered data
    /// allows, returning what happened. Call in a loop, feeding more data
    /// whenever [`PollResult::NeedData`] is returned, until
    /// [`PollResult::Done`].
    pub fn poll(&mut self) -> Result<PollResult, ConsumerError> {
        self.check_cancelled()?;
        match self.phase {
            Phase::VerifySignature => self.poll_verify_signature(),
            Phase::VerifySource => self.poll_verify_source(),
            Phase::Apply => self.poll_apply(),
            Phase::VerifyTarget => self.poll_verify_target(),
            Phase::Finalize => self.poll_finalize(),
            Phase::Done => Ok(PollResult::Done),
        }
    }

    /// Verifies the payload's metadata signature before any operation runs,
    /// matching `DeltaPerformer::ValidateMetadataSignature`'s position
    /// ahead of applying any operation. A missing or invalid signature
    /// clears the resume journal, since nothing has been written yet and a
    /// caller must not resume into a payload that never passed this check.
    fn poll_verify_signature(&mut self) -> Result<PollResult, ConsumerError> {
        if let Some(config) = &self.signature_config {
            if config.metadata_signature_bytes.is_empty() {
                tracing::error!("signed payload carries no metadata signature");
                self.journal.clear_progress();
                return Err(ConsumerError::MetadataSignatureMissing {
                    code: ErrorCode::DownloadMetadataSignatureMissingError,
                });
            }
            if let Err(source) = verifier::verify_signatures(
                &config.signed_metadata,
                &config.metadata_signature_bytes,
                &config.key,
            ) {
                tracing::error!(%source, "metadata signature verification failed");
                self.journal.clear_progress();
                return Err(ConsumerError::SignatureVerification {
                    code: ErrorCode::DownloadMetadataSignatureMismatch,
                });
            }
            self.journal.set_bool(keys::SIGNATURE_CHECKED, true);
        }
        tracing::debug!("metadata signature verified, moving to source verification");
        self.phase = Phase::VerifySource;
        Ok(PollResult::PhaseComplete)
    }

    fn poll_verify_source(&mut self) -> Result<PollResult, ConsumerError> {
        for partition in &self.manifest.partitions {
            let Some(old_info) = partition.old_partition_info.as_ref() else {
                continue;
            };
            if old_info.hash.is_empty() {
                continue;
            }
            let Some(device) = self.source_devices.get_mut(&partition.partition_name) else {
                continue;
            };
            let outcome = verifier_fs::verify_partition(
                *device,
                old_info.size,
                &old_info.hash,
                VerifyStep::VerifySourceHash,
                || self.cancelled,
            )
            .map_err(|source| ConsumerError::Other {
                code: ErrorCode::FilesystemVerifierError,
                message: source.to_string(),
            })?;
            if outcome == VerifyOutcome::Mismatched {
                tracing::error!(partition = %partition.partition_name, "source verification failed");
                return Err(ConsumerError::SourceVerificationFailed {
                    code: ErrorCode::NewRootfsVerificationError,
                    partition: partition.partition_name.clone(),
                });
            }
        }
        tracing::debug!("source verification complete, moving to apply phase");
        self.phase = Phase::Apply;
        Ok(PollResult::PhaseComplete)
    }

    fn poll_apply(&mut self) -> Result<PollResult, ConsumerError> {
        if self.next_operation >= self.operations.len() {
            tracing::debug!("all operations applied, moving to target verification");
            self.phase = Phase::VerifyTarget;
            return Ok(PollResult::PhaseComplete);
        }

        let data_length = self.operations[self.next_operation].operation.data_length as usize;
        if self.pending.len() < data_length {
            return Ok(PollResult::NeedData {
                want: data_length - self.pending.len(),
            });
        }

        let data: Vec<u8> = self.pending.drain(..data_length).collect();
        let flat_op = &self.operations[self.next_operation];

        if self.plan.hash_checks_mandatory && !flat_op.operation.data_sha256_hash.is_empty() {
            let mut hasher = ResumableSha256::new();
            hasher.update(&data);
            if hasher.finalize().as_slice() != flat_op.operation.data_sha256_hash.as_slice() {
                tracing::error!(
                    partition = %flat_op.partition,
                    operation_index = self.next_operation,
                    "operation data hash mismatch"
                );
                return Err(ConsumerError::OperationHashMismatch {
                    code: ErrorCode::DownloadOperationHashMismatch,
                    partition: flat_op.partition.clone(),
                    operation_index: self.next_operation,
                });
            }
        } else if self.plan.hash_checks_mandatory && flat_op.operation.data_length > 0 {
            return Err(ConsumerError::OperationHashMissing {
                code: ErrorCode::DownloadOperationHashMissingError,
                partition: flat_op.partition.clone(),
                operation_index: self.next_operation,
            });
        }

        let writer = self.writers.get_mut(&flat_op.partition).ok_or_else(|| {
            ConsumerError::Other {
                code: ErrorCode::InstallDeviceOpenError,
                message: format!("no writer configured for partition '{}'", flat_op.partition),
            }
        })?;

        executor::apply_operation(&flat_op.operation, &data, writer).map_err(|source| {
            ConsumerError::OperationExecution {
                code: ErrorCode::DownloadOperationExecutionError,
                partition: flat_op.partition.clone(),
                operation_index: self.next_operation,
                message: source.to_string(),
            }
        })?;

        self.next_operation += 1;
        self.journal.set_u64(keys::NEXT_OPERATION, self.next_operation as u64);

        Ok(PollResult::OperationApplied {
            operations_done: self.next_operation,
            operations_total: self.operations.len(),
        })
    }

    /// Two-stage verification, per `FilesystemVerifierAction`: a target
    /// mismatch alone means the write went wrong (`NewRootfsVerificationError`);
    /// a target mismatch *and* a source mismatch against `old_partition_info`
    /// means the source partition was already corrupt before this update
    /// touched it (`DownloadStateInitializationError`), which is useful for
    /// an embedder deciding whether a retry is worth attempting.
    fn poll_verify_target(&mut self) -> Result<PollResult, ConsumerError> {
        for partition in &self.manifest.partitions {
            let Some(new_info) = partition.new_partition_info.as_ref() else {
                continue;
            };
            if new_info.hash.is_empty() {
                continue;
            }
            let Some(device) = self.target_devices.get_mut(&partition.partition_name) else {
                continue;
            };
            let outcome = verifier_fs::verify_partition(
                *device,
                new_info.size,
                &new_info.hash,
                VerifyStep::VerifyTargetHash,
                || self.cancelled,
            )
            .map_err(|source| ConsumerError::Other {
                code: ErrorCode::FilesystemVerifierError,
                message: source.to_string(),
            })?;
            if outcome == VerifyOutcome::Mismatched {
                let source_also_corrupt = partition
                    .old_partition_info
                    .as_ref()
                    .filter(|old_info| !old_info.hash.is_empty())
                    .zip(self.source_devices.get_mut(&partition.partition_name))
                    .map(|(old_info, source_device)| {
                        verifier_fs::verify_partition(
                            *source_device,
                            old_info.size,
                            &old_info.hash,
                            VerifyStep::VerifySourceHash,
                            || self.cancelled,
                        )
                    })
                    .transpose()
                    .map_err(|source| ConsumerError::Other {
                        code: ErrorCode::FilesystemVerifierError,
                        message: source.to_string(),
                    })?
                    == Some(VerifyOutcome::Mismatched);

                let code = if source_also_corrupt {
                    ErrorCode::DownloadStateInitializationError
                } else {
                    ErrorCode::NewRootfsVerificationError
                };
                tracing::error!(
                    partition = %partition.partition_name,
                    source_also_corrupt,
                    "target verification failed"
                );
                return Err(ConsumerError::TargetVerificationFailed {
                    code,
                    partition: partition.partition_name.clone(),
                });
            }
        }
        tracing::debug!("target verification complete, finalizing");
        self.phase = Phase::Finalize;
        Ok(PollResult::PhaseComplete)
    }

    fn poll_finalize(&mut self) -> Result<PollResult, ConsumerError> {
        for writer in self.writers.values_mut() {
            writer.flush().map_err(|source| ConsumerError::Device {
                code: ErrorCode::FilesystemCopierError,
                device: "target".to_string(),
                source,
            })?;
            writer.finalize().map_err(|source| ConsumerError::Device {
                code: ErrorCode::FilesystemCopierError,
                device: "target".to_string(),
                source,
            })?;
        }
        self.journal.clear_progress();
        self.phase = Phase::Done;
        tracing::info!("install plan finalized");
        Ok(PollResult::Done)
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Describes the operation the pipeline is currently waiting on data
    /// for, as `(partition_name, data_offset, data_length)` where
    /// `data_offset` is relative to the start of the payload's data blob
    /// region. A caller driving the pipeline from a seekable payload file
    /// uses this to read exactly the right bytes before calling
    /// [`Self::feed`], independent of where a resumed update left off.
    pub fn current_operation(&self) -> Option<(&str, u64, u64)> {
        self.operations.get(self.next_operation).map(|flat_op| {
            (
                flat_op.partition.as_str(),
                flat_op.operation.data_offset,
                flat_op.operation.data_length,
            )
        })
    }
}
