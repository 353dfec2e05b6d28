// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 rhythmcache
// https://github.com/rhythmcache/payload-dumper-rust

//! Payload metadata verification and install-operation execution core for
//! an A/B (dual-slot) update engine.
//!
//! The crate is a synchronous, single-threaded, cooperative state
//! machine: nothing here spawns a thread, blocks on a runtime, or owns an
//! I/O loop. A caller (the bundled CLI, or an embedder's own update
//! agent) feeds payload bytes in and polls for progress; see
//! [`pipeline::ActionPipeline`] for the top-level driver.

pub mod constants;
pub mod cow_convert;
pub mod error;
pub mod executor;
pub mod extent;
pub mod hash;
pub mod journal;
#[cfg(feature = "metadata")]
pub mod metadata;
pub mod pipeline;
pub mod platform;
#[cfg(feature = "metadata")]
pub mod structs;
pub mod utils;
pub mod verifier;
pub mod verifier_fs;
pub mod wire;
pub mod writer;

pub use error::{ConsumerError, ErrorCode, Result};
pub use pipeline::{ActionPipeline, InstallPlan, PollResult};
pub use wire::DeltaArchiveManifest;
