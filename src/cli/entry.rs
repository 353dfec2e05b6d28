// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 rhythmcache
// https://github.com/rhythmcache/payload-dumper-rust

use std::collections::{HashMap, HashSet};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use clap::Parser;

use payload_consumer::journal::Journal;
use payload_consumer::pipeline::{ActionPipeline, InstallPlan, PollResult, SignatureConfig};
use payload_consumer::platform::{BlockDevice, FileBlockDevice};
use payload_consumer::utils::format_elapsed_time;
use payload_consumer::verifier::{self, TrustedKey};
use payload_consumer::wire::{self, ParsedPayload};
use payload_consumer::writer::raw::RawWriter;
use payload_consumer::writer::Writer;

use crate::cli::args::Args;
use crate::cli::commands::list::list_partitions;
use crate::cli::ui::UiOutput;

pub fn run() -> Result<()> {
    let args = Args::parse();
    let _ = tracing_subscriber::fmt::try_init();

    let mut payload_file = std::fs::File::open(&args.payload)
        .with_context(|| format!("opening payload {}", args.payload.display()))?;
    let parsed =
        wire::parse_payload(&mut payload_file).context("parsing payload header and manifest")?;

    if args.list {
        list_partitions(&parsed.manifest);
        return Ok(());
    }

    if let Some(out_dir) = &args.dump_metadata {
        let images_filter = args.partitions.clone().unwrap_or_default();
        let is_stdout = out_dir.to_string_lossy() == "-";
        payload_consumer::metadata::handle_metadata_extraction(
            &parsed.manifest,
            out_dir,
            args.full,
            &images_filter,
            is_stdout,
        )?;
        return Ok(());
    }

    let ui = UiOutput::new(args.quiet, false);

    let trusted_key = args
        .public_key
        .as_ref()
        .map(|key_path| load_trusted_key(key_path))
        .transpose()?;

    if let Some(key) = &trusted_key {
        verify_full_payload_signature(&mut payload_file, &parsed, key)?;
        ui.println("payload signature verification passed");
    }

    apply_payload(&args, &mut payload_file, &parsed, trusted_key.as_ref(), &ui)
}

fn load_trusted_key(key_path: &Path) -> Result<TrustedKey> {
    let key_bytes = std::fs::read(key_path)
        .with_context(|| format!("reading public key {}", key_path.display()))?;
    if key_bytes.starts_with(b"-----BEGIN") {
        let pem = String::from_utf8(key_bytes).context("public key is not valid UTF-8 PEM")?;
        TrustedKey::from_pem(&pem)
    } else {
        TrustedKey::from_der(&key_bytes)
    }
    .map_err(|e| anyhow!("invalid public key: {e}"))
}

/// Checks the trailing whole-payload signature (manifest + metadata
/// signature + all data blobs, per `signatures_offset`/`signatures_size`).
/// The metadata signature over the header and manifest alone is checked by
/// [`ActionPipeline`] as a mandatory phase, not here.
fn verify_full_payload_signature(
    payload_file: &mut std::fs::File,
    parsed: &ParsedPayload,
    key: &TrustedKey,
) -> Result<()> {
    if parsed.manifest.signatures_size == 0 {
        return Ok(());
    }

    let signature_offset = parsed.data_offset + parsed.manifest.signatures_offset;

    let mut signature_bytes = vec![0u8; parsed.manifest.signatures_size as usize];
    payload_file.seek(SeekFrom::Start(signature_offset))?;
    payload_file.read_exact(&mut signature_bytes)?;

    let mut signed_region = vec![0u8; signature_offset as usize];
    payload_file.seek(SeekFrom::Start(0))?;
    payload_file.read_exact(&mut signed_region)?;

    verifier::verify_signatures(&signed_region, &signature_bytes, key)
        .map_err(|e| anyhow!("payload signature verification failed: {e}"))?;

    Ok(())
}

fn partition_image_path(dir: &Path, partition_name: &str) -> PathBuf {
    dir.join(format!("{partition_name}.img"))
}

fn open_or_create_target(path: &Path, size: u64) -> Result<FileBlockDevice> {
    if !path.exists() {
        let file = std::fs::File::create(path)
            .with_context(|| format!("creating target image {}", path.display()))?;
        file.set_len(size)
            .with_context(|| format!("sizing target image {}", path.display()))?;
    }
    FileBlockDevice::open(path, true)
        .with_context(|| format!("opening target image {}", path.display()))
}

/// Drives the apply workflow: opens per-partition image files, wires up
/// writers and the resume journal, then feeds payload data blobs through
/// the pipeline until done.
///
/// Each partition's image file is opened multiple times (once for the
/// writer, once per verification phase) rather than shared behind a
/// single handle: `ActionPipeline` takes writers and verification devices
/// as independently-owned borrows, mirroring how a real embedder might
/// route writes and dm-verity-backed verification reads through entirely
/// different device handles.
fn apply_payload(
    args: &Args,
    payload_file: &mut std::fs::File,
    parsed: &ParsedPayload,
    trusted_key: Option<&TrustedKey>,
    ui: &UiOutput,
) -> Result<()> {
    let target_dir = args
        .target_dir
        .as_ref()
        .ok_or_else(|| anyhow!("--target-dir is required to apply a payload"))?;
    std::fs::create_dir_all(target_dir)
        .with_context(|| format!("creating target directory {}", target_dir.display()))?;

    let partitions_filter: Option<HashSet<&str>> =
        args.partitions.as_deref().map(|s| s.split(',').collect());
    let selected_partitions: Vec<_> = parsed
        .manifest
        .partitions
        .iter()
        .filter(|p| {
            partitions_filter
                .as_ref()
                .is_none_or(|f| f.contains(p.partition_name.as_str()))
        })
        .collect();

    let mut writer_targets: HashMap<String, FileBlockDevice> = HashMap::new();
    let mut writer_sources: HashMap<String, FileBlockDevice> = HashMap::new();
    let mut verify_targets: HashMap<String, FileBlockDevice> = HashMap::new();
    let mut verify_sources: HashMap<String, FileBlockDevice> = HashMap::new();

    for partition in &selected_partitions {
        let size = partition
            .new_partition_info
            .as_ref()
            .map(|info| info.size)
            .unwrap_or(0);
        let target_path = partition_image_path(target_dir, &partition.partition_name);

        writer_targets.insert(
            partition.partition_name.clone(),
            open_or_create_target(&target_path, size)?,
        );
        verify_targets.insert(
            partition.partition_name.clone(),
            FileBlockDevice::open(&target_path, false)
                .with_context(|| format!("reopening target image {}", target_path.display()))?,
        );

        if let Some(source_dir) = &args.source_dir {
            let source_path = partition_image_path(source_dir, &partition.partition_name);
            if source_path.exists() {
                writer_sources.insert(
                    partition.partition_name.clone(),
                    FileBlockDevice::open(&source_path, false).with_context(|| {
                        format!("opening source image {}", source_path.display())
                    })?,
                );
                verify_sources.insert(
                    partition.partition_name.clone(),
                    FileBlockDevice::open(&source_path, false).with_context(|| {
                        format!("reopening source image {}", source_path.display())
                    })?,
                );
            }
        }
    }

    let block_size = parsed.manifest.block_size;
    let mut writers: HashMap<String, Writer> = HashMap::new();
    for partition in &selected_partitions {
        let target = writer_targets
            .get_mut(&partition.partition_name)
            .expect("just inserted above");
        let source = writer_sources.get_mut(&partition.partition_name);
        let writer = Writer::Raw(RawWriter::new(
            target,
            source.map(|d| d as &mut dyn BlockDevice),
            None,
            block_size,
        ));
        writers.insert(partition.partition_name.clone(), writer);
    }

    let target_devices: HashMap<String, &mut dyn BlockDevice> = verify_targets
        .iter_mut()
        .map(|(name, dev)| (name.clone(), dev as &mut dyn BlockDevice))
        .collect();
    let source_devices: HashMap<String, &mut dyn BlockDevice> = verify_sources
        .iter_mut()
        .map(|(name, dev)| (name.clone(), dev as &mut dyn BlockDevice))
        .collect();

    let journal_path = args
        .journal
        .clone()
        .unwrap_or_else(|| target_dir.join("update_state"));
    let journal = Journal::load(&journal_path).context("loading resume journal")?;

    let plan = InstallPlan {
        is_resume: args.resume,
        hash_checks_mandatory: !args.no_verify,
        ..InstallPlan::default()
    };

    let signature_config = trusted_key.map(|key| SignatureConfig {
        signed_metadata: parsed.signed_metadata(),
        metadata_signature_bytes: parsed.metadata_signature_bytes.clone(),
        key: key.clone(),
    });

    let mut pipeline = ActionPipeline::new(
        parsed.manifest.clone(),
        plan,
        journal,
        signature_config,
        writers,
        target_devices,
        source_devices,
    )?;

    let total_operations = parsed
        .manifest
        .partitions
        .iter()
        .map(|p| p.operations.len())
        .sum::<usize>();
    let progress = ui.create_apply_progress(total_operations as u64, "applying payload");
    let start_time = Instant::now();

    loop {
        match pipeline.poll()? {
            PollResult::NeedData { .. } => {
                let Some((_partition, data_offset, data_length)) = pipeline.current_operation()
                else {
                    break;
                };
                let absolute_offset = parsed.data_offset + data_offset;
                let mut buf = vec![0u8; data_length as usize];
                payload_file.seek(SeekFrom::Start(absolute_offset))?;
                payload_file.read_exact(&mut buf)?;
                pipeline.feed(&buf)?;
            }
            PollResult::OperationApplied {
                operations_done,
                operations_total,
            } => {
                progress.set_position(operations_done as u64);
                progress.set_message(format!("{operations_done}/{operations_total} operations"));
                pipeline
                    .journal()
                    .save(&journal_path)
                    .context("saving resume journal")?;
            }
            PollResult::PhaseComplete => {}
            PollResult::Done => break,
        }
    }

    progress.finish_with_message("done");
    pipeline
        .journal()
        .save(&journal_path)
        .context("saving resume journal")?;
    ui.println_final(&format!(
        "payload applied successfully in {}",
        format_elapsed_time(start_time.elapsed())
    ));

    Ok(())
}
