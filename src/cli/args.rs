// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 rhythmcache
// https://github.com/rhythmcache/payload-dumper-rust

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    version,
    about = "Verifies and applies an A/B (dual-slot) update payload"
)]
#[command(next_line_help = true)]
pub struct Args {
    #[arg(value_name = "PAYLOAD", help = "Path to the update payload (payload.bin)")]
    pub payload: PathBuf,

    #[arg(
        long,
        help = "List the partitions named in the payload manifest and exit"
    )]
    pub list: bool,

    #[arg(
        long,
        value_name = "DIR",
        help = "Write payload_metadata.json (or print to stdout for '-') describing the manifest, and exit"
    )]
    pub dump_metadata: Option<PathBuf>,

    #[arg(long, help = "Include full per-operation detail in --dump-metadata output")]
    pub full: bool,

    #[arg(
        long,
        value_name = "DIR",
        help = "Directory holding one <partition>.img file per target partition, created as needed"
    )]
    pub target_dir: Option<PathBuf>,

    #[arg(
        long,
        value_name = "DIR",
        help = "Directory holding one <partition>.img file per source partition, required for delta operations"
    )]
    pub source_dir: Option<PathBuf>,

    #[arg(long, value_name = "NAMES", help = "Comma-separated partition names to apply (default: all)")]
    pub partitions: Option<String>,

    #[arg(long, value_name = "FILE", help = "PEM or DER RSA public key used to verify payload signatures")]
    pub public_key: Option<PathBuf>,

    #[arg(long, value_name = "FILE", help = "Resume journal path (default: <target-dir>/update_state)")]
    pub journal: Option<PathBuf>,

    #[arg(long, help = "Resume a previously interrupted apply using the resume journal")]
    pub resume: bool,

    #[arg(long, help = "Skip per-operation and filesystem hash verification")]
    pub no_verify: bool,

    #[arg(long, help = "Suppress progress output")]
    pub quiet: bool,
}
