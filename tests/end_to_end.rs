// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 rhythmcache
// https://github.com/rhythmcache/payload-dumper-rust

//! The six literal scenarios that seed this crate's test suite: CoW
//! conversion with and without a replace fallback, self-overlapping
//! `SOURCE_COPY`, crash-and-resume, source corruption recovered through
//! ECC, and a tampered metadata signature.

use std::cell::RefCell;
use std::rc::Rc;

use payload_consumer::cow_convert::{convert_to_cow_operations, CowOperation};
use payload_consumer::executor;
use payload_consumer::hash::sha256;
use payload_consumer::journal::{keys, Journal};
use payload_consumer::pipeline::{ActionPipeline, InstallPlan, PollResult};
use payload_consumer::platform::{Ecc, MemoryBlockDevice};
use payload_consumer::verifier::{verify_signatures, TrustedKey};
use payload_consumer::wire::{
    CowMergeOperation, CowMergeOperationType, DeltaArchiveManifest, Extent, InstallOperation,
    InstallOperationType, PartitionInfo, PartitionUpdate, Signature, Signatures,
};
use payload_consumer::writer::raw::RawWriter;
use payload_consumer::writer::Writer;

fn extent(start: u64, num: u64) -> Extent {
    Extent {
        start_block: start,
        num_blocks: num,
    }
}

fn source_copy(src: Extent, dst: Extent) -> InstallOperation {
    InstallOperation {
        r#type: InstallOperationType::SourceCopy as i32,
        src_extents: vec![src],
        dst_extents: vec![dst],
        ..Default::default()
    }
}

fn cow_copy_merge(src: Extent, dst: Extent) -> CowMergeOperation {
    CowMergeOperation {
        r#type: CowMergeOperationType::CowCopy as i32,
        src_extent: Some(src),
        dst_extent: Some(dst),
        src_offset: 0,
    }
}

/// Scenario 1: no conflict. Three one-block `SOURCE_COPY`s with matching
/// merge operations convert to three `CowCopy` entries, source == dest.
#[test]
fn scenario_1_no_conflict() {
    let ops = vec![
        source_copy(extent(20, 1), extent(30, 1)),
        source_copy(extent(10, 1), extent(20, 1)),
        source_copy(extent(0, 1), extent(10, 1)),
    ];
    let merges = vec![
        cow_copy_merge(extent(20, 1), extent(30, 1)),
        cow_copy_merge(extent(10, 1), extent(20, 1)),
        cow_copy_merge(extent(0, 1), extent(10, 1)),
    ];

    let converted = convert_to_cow_operations(&ops, &merges);

    assert_eq!(
        converted,
        vec![
            CowOperation::CowCopy {
                src_block: 20,
                dst_block: 30
            },
            CowOperation::CowCopy {
                src_block: 10,
                dst_block: 20
            },
            CowOperation::CowCopy {
                src_block: 0,
                dst_block: 10
            },
        ]
    );
}

/// Scenario 2: CoW replace fallback. A 4th `SOURCE_COPY(30->0)` has no
/// matching merge operation, so it must surface as exactly one
/// `CowReplace`, alongside the three `CowCopy`s from scenario 1.
#[test]
fn scenario_2_cow_replace_fallback() {
    let ops = vec![
        source_copy(extent(20, 1), extent(30, 1)),
        source_copy(extent(10, 1), extent(20, 1)),
        source_copy(extent(0, 1), extent(10, 1)),
        source_copy(extent(30, 1), extent(0, 1)),
    ];
    let merges = vec![
        cow_copy_merge(extent(20, 1), extent(30, 1)),
        cow_copy_merge(extent(10, 1), extent(20, 1)),
        cow_copy_merge(extent(0, 1), extent(10, 1)),
    ];

    let converted = convert_to_cow_operations(&ops, &merges);

    let copies: Vec<_> = converted
        .iter()
        .filter(|op| matches!(op, CowOperation::CowCopy { .. }))
        .collect();
    let replaces: Vec<_> = converted
        .iter()
        .filter(|op| matches!(op, CowOperation::CowReplace { .. }))
        .collect();

    assert_eq!(copies.len(), 3);
    assert_eq!(
        replaces,
        vec![&CowOperation::CowReplace {
            src_block: 30,
            dst_block: 0
        }]
    );
}

/// Scenario 3: self-overlapping `SOURCE_COPY` `20..30 -> 25..35` with a
/// matching `COW_COPY` over the same ranges converts to 10 `CowCopy`
/// entries in strict reverse block order, and no `CowReplace` at all.
#[test]
fn scenario_3_self_overlapping_source_copy() {
    let ops = vec![source_copy(extent(20, 10), extent(25, 10))];
    let merges = vec![cow_copy_merge(extent(20, 10), extent(25, 10))];

    let converted = convert_to_cow_operations(&ops, &merges);

    let expected: Vec<_> = (0..10)
        .map(|i| CowOperation::CowCopy {
            src_block: 29 - i,
            dst_block: 34 - i,
        })
        .collect();
    assert_eq!(converted, expected);
    assert!(converted.iter().all(|op| matches!(op, CowOperation::CowCopy { .. })));
}

const BLOCK_SIZE: u32 = 4;

fn manifest_with_replace_ops(partition_name: &str, blocks: &[Vec<u8>]) -> (DeltaArchiveManifest, Vec<u8>) {
    let mut data = Vec::new();
    let mut operations = Vec::new();
    for (i, block) in blocks.iter().enumerate() {
        assert_eq!(block.len(), BLOCK_SIZE as usize);
        operations.push(InstallOperation {
            r#type: InstallOperationType::Replace as i32,
            data_offset: data.len() as u64,
            data_length: block.len() as u64,
            dst_extents: vec![extent(i as u64, 1)],
            data_sha256_hash: sha256(block).to_vec(),
            ..Default::default()
        });
        data.extend_from_slice(block);
    }
    let mut final_image = Vec::new();
    for block in blocks {
        final_image.extend_from_slice(block);
    }
    let new_hash = sha256(&final_image).to_vec();

    let manifest = DeltaArchiveManifest {
        block_size: BLOCK_SIZE,
        partitions: vec![PartitionUpdate {
            partition_name: partition_name.to_string(),
            new_partition_info: Some(PartitionInfo {
                size: final_image.len() as u64,
                hash: new_hash,
            }),
            operations,
            ..Default::default()
        }],
        ..Default::default()
    };
    (manifest, data)
}

/// Scenario 4: resume after crash. Five operations on one partition; the
/// process terminates after operation 2 is applied (operation index 2,
/// i.e. the third operation) and before the 4th's blob is consumed. A
/// fresh pipeline built from the saved journal picks up at operation 3
/// and the final target hash still matches.
#[test]
fn scenario_4_resume_after_crash() {
    let blocks: Vec<Vec<u8>> = (0u8..5).map(|i| vec![i; BLOCK_SIZE as usize]).collect();
    let (manifest, data) = manifest_with_replace_ops("system", &blocks);

    let mut target = MemoryBlockDevice::new(BLOCK_SIZE as u64 * 5);
    let journal = {
        let mut writer = Writer::Raw(RawWriter::new(&mut target, None, None, BLOCK_SIZE));
        let mut writers = std::collections::HashMap::new();
        writers.insert("system".to_string(), writer);
        let plan = InstallPlan {
            is_resume: false,
            hash_checks_mandatory: true,
            ..Default::default()
        };
        let mut pipeline = ActionPipeline::new(
            manifest.clone(),
            plan,
            Journal::new(),
            None,
            writers,
            std::collections::HashMap::new(),
            std::collections::HashMap::new(),
        )
        .unwrap();

        // Drive through VerifySignature (no key configured) and VerifySource
        // (no old_partition_info), both no-op phase-completes here, then
        // apply exactly 3 operations.
        let mut applied = 0;
        loop {
            match pipeline.poll().unwrap() {
                PollResult::NeedData { want } => {
                    let offset = manifest.partitions[0].operations[applied].data_offset as usize;
                    pipeline.feed(&data[offset..offset + want]).unwrap();
                }
                PollResult::OperationApplied { operations_done, .. } => {
                    applied = operations_done;
                    if applied == 3 {
                        break;
                    }
                }
                PollResult::PhaseComplete => {}
                PollResult::Done => panic!("finished before crash point"),
            }
        }
        pipeline.journal().clone()
    };

    assert_eq!(journal.get_u64(keys::NEXT_OPERATION), Some(3));

    // Simulate the restart: a fresh pipeline resuming from the saved
    // journal, reading the target through a brand-new writer handle onto
    // the same backing block device.
    let mut writers = std::collections::HashMap::new();
    writers.insert(
        "system".to_string(),
        Writer::Raw(RawWriter::new(&mut target, None, None, BLOCK_SIZE)),
    );
    let plan = InstallPlan {
        is_resume: true,
        hash_checks_mandatory: true,
        ..Default::default()
    };
    let mut pipeline = ActionPipeline::new(
        manifest.clone(),
        plan,
        journal,
        None,
        writers,
        std::collections::HashMap::new(),
        std::collections::HashMap::new(),
    )
    .unwrap();

    assert_eq!(pipeline.current_operation().unwrap().0, "system");

    loop {
        match pipeline.poll().unwrap() {
            PollResult::NeedData { want } => {
                let (_, offset, _) = pipeline.current_operation().unwrap();
                let offset = offset as usize;
                pipeline.feed(&data[offset..offset + want]).unwrap();
            }
            PollResult::Done => break,
            _ => {}
        }
    }

    let mut final_image = Vec::new();
    for block in &blocks {
        final_image.extend_from_slice(block);
    }
    assert_eq!(target.as_slice(), final_image.as_slice());
}

struct RecoveringEcc {
    data: Vec<u8>,
    recovered_count: Rc<RefCell<u32>>,
}

impl Ecc for RecoveringEcc {
    fn recover_at(&mut self, offset: u64, buf: &mut [u8]) -> std::io::Result<bool> {
        let offset = offset as usize;
        buf.copy_from_slice(&self.data[offset..offset + buf.len()]);
        *self.recovered_count.borrow_mut() += 1;
        Ok(true)
    }
}

/// Scenario 5: source corruption with FEC available. The plain source
/// device returns bytes that don't match the operation's declared
/// `src_sha256_hash`; the executor falls through to the error-corrected
/// device, which returns the right bytes, and the operation completes.
/// The recovery is counted once by the `Ecc` implementation (the
/// "ecc-recovered operations" telemetry counter is the embedder's own, per
/// `platform::Ecc::recover_at`'s contract).
#[test]
fn scenario_5_source_corruption_recovered_via_ecc() {
    let good_source = vec![9u8; BLOCK_SIZE as usize];
    let corrupt_source = vec![0xffu8; BLOCK_SIZE as usize];
    let expected_hash = sha256(&good_source);

    let mut source = MemoryBlockDevice::from_vec(corrupt_source);
    let recovered_count = Rc::new(RefCell::new(0u32));
    let mut ecc = RecoveringEcc {
        data: good_source.clone(),
        recovered_count: recovered_count.clone(),
    };
    let mut target = MemoryBlockDevice::new(BLOCK_SIZE as u64);

    let op = InstallOperation {
        r#type: InstallOperationType::SourceCopy as i32,
        src_extents: vec![extent(0, 1)],
        dst_extents: vec![extent(0, 1)],
        src_sha256_hash: expected_hash.to_vec(),
        ..Default::default()
    };

    {
        let mut writer = Writer::Raw(RawWriter::new(&mut target, Some(&mut source), Some(&mut ecc), BLOCK_SIZE));
        executor::apply_operation(&op, &[], &mut writer).unwrap();
    }

    assert_eq!(target.as_slice(), good_source.as_slice());
    assert_eq!(*recovered_count.borrow(), 1);
}

/// Scenario 6: metadata signature mismatch. A single flipped byte in the
/// signed manifest region is enough to invalidate every candidate
/// signature, since the RSA verification runs over a SHA-256 digest of
/// the full region, not a field-by-field comparison.
#[test]
fn scenario_6_metadata_signature_mismatch() {
    use rsa::pkcs1v15::SigningKey;
    use rsa::signature::hazmat::PrehashSigner;
    use rsa::RsaPrivateKey;
    use sha2::Digest;

    let mut rng = rand::thread_rng();
    let private = RsaPrivateKey::new(&mut rng, 2048).unwrap();
    let public = private.to_public_key();

    let manifest_bytes = b"some manifest bytes representing the signed region".to_vec();
    let digest: [u8; 32] = sha2::Sha256::digest(&manifest_bytes).into();
    let signing_key = SigningKey::<sha2::Sha256>::new(private);
    let signature = signing_key.sign_prehash(&digest).unwrap();

    let signatures = Signatures {
        signatures: vec![Signature {
            version: 2,
            data: signature.to_vec(),
        }],
    };
    let signatures_bytes = {
        use prost::Message;
        signatures.encode_to_vec()
    };

    let key_pem = {
        use rsa::pkcs8::EncodePublicKey;
        public.to_public_key_pem(Default::default()).unwrap()
    };
    let trusted = TrustedKey::from_pem(&key_pem).unwrap();

    // Unmutated bytes verify fine.
    verify_signatures(&manifest_bytes, &signatures_bytes, &trusted).unwrap();

    // Flip a single byte in the manifest region and re-verify.
    let mut mutated = manifest_bytes.clone();
    mutated[10] ^= 0x01;
    assert!(verify_signatures(&mutated, &signatures_bytes, &trusted).is_err());
}
