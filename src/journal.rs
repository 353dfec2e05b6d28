// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 rhythmcache
// https://github.com/rhythmcache/payload-dumper-rust

//! Flat `key=value` resume journal, format-compatible with AOSP's
//! `simple_key_value_store`. Used to persist progress across a crash or
//! reboot so an update can resume instead of restarting from scratch.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("failed to read journal {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write journal {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Keys used by the action pipeline. Stored verbatim as strings so that
/// callers can add their own keys without changing this type.
pub mod keys {
    pub const NEXT_OPERATION: &str = "UPDATE_STATE_NEXT_OPERATION";
    pub const NEXT_DATA_OFFSET: &str = "UPDATE_STATE_NEXT_DATA_OFFSET";
    pub const SHA256_CONTEXT: &str = "UPDATE_STATE_SHA256_CONTEXT";
    pub const SIGNATURE_CHECKED: &str = "UPDATE_STATE_SIGNATURE_CHECKED";
    pub const SIGNED_SIZE: &str = "UPDATE_STATE_SIGNED_SIZE";
    pub const SOURCE_SLOT: &str = "CURRENT_SLOT";
    pub const TARGET_SLOT: &str = "TARGET_SLOT";
    /// Prefix applied to every key above to produce its powerwash-safe
    /// mirror, which survives a `/data` wipe because it lives under the
    /// misc partition's "powerwash-safe" region.
    pub const POWERWASH_SAFE_PREFIX: &str = "pw_";
}

/// An in-memory, ordered view of the on-disk journal. Mirrors
/// `KeyValueStore`: load the whole file into a map, mutate, save the whole
/// map back out.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Journal {
    store: BTreeMap<String, String>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `key=value` lines, one per line. Blank lines and lines
    /// starting with `#` are ignored. A malformed line (no `=`) is
    /// silently skipped, matching the original's tolerant loader.
    pub fn parse(contents: &str) -> Self {
        let mut store = BTreeMap::new();
        for line in contents.split('\n') {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                store.insert(key.to_string(), value.to_string());
            }
        }
        Journal { store }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, JournalError> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => {
                let journal = Self::parse(&contents);
                tracing::debug!(entries = journal.store.len(), "loaded resume journal");
                Ok(journal)
            }
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(source) => Err(JournalError::Read {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), JournalError> {
        let path = path.as_ref();
        let mut contents = String::new();
        for (key, value) in &self.store {
            contents.push_str(key);
            contents.push('=');
            contents.push_str(value);
            contents.push('\n');
        }
        fs::write(path, contents).map_err(|source| JournalError::Write {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.store.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.store.insert(key.into(), value.into());
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    pub fn set_u64(&mut self, key: &str, value: u64) {
        self.set(key, value.to_string());
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key) {
            Some("true") => Some(true),
            Some("false") => Some(false),
            _ => None,
        }
    }

    pub fn set_bool(&mut self, key: &str, value: bool) {
        self.set(key, if value { "true" } else { "false" });
    }

    /// Removes every key tracked by [`keys`], including their powerwash-safe
    /// mirrors. Called once an update finishes applying successfully.
    pub fn clear_progress(&mut self) {
        for key in [
            keys::NEXT_OPERATION,
            keys::NEXT_DATA_OFFSET,
            keys::SHA256_CONTEXT,
            keys::SIGNATURE_CHECKED,
            keys::SIGNED_SIZE,
        ] {
            self.store.remove(key);
            self.store.remove(&format!("{}{key}", keys::POWERWASH_SAFE_PREFIX));
        }
    }

    /// Writes `key` and its `pw_`-prefixed mirror together, as the original
    /// does for anything that must survive a powerwash.
    pub fn set_mirrored(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        self.store.insert(key.to_string(), value.clone());
        self.store
            .insert(format!("{}{key}", keys::POWERWASH_SAFE_PREFIX), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_value_lines() {
        let journal = Journal::parse("a=1\nb=2\n# comment\n\nc=hello=world\n");
        assert_eq!(journal.get("a"), Some("1"));
        assert_eq!(journal.get("b"), Some("2"));
        assert_eq!(journal.get("c"), Some("hello=world"));
        assert_eq!(journal.get("comment"), None);
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state");

        let mut journal = Journal::new();
        journal.set_u64(keys::NEXT_OPERATION, 42);
        journal.set_bool(keys::SIGNATURE_CHECKED, true);
        journal.save(&path).unwrap();

        let loaded = Journal::load(&path).unwrap();
        assert_eq!(loaded.get_u64(keys::NEXT_OPERATION), Some(42));
        assert_eq!(loaded.get_bool(keys::SIGNATURE_CHECKED), Some(true));
    }

    #[test]
    fn missing_file_loads_empty() {
        let journal = Journal::load("/nonexistent/path/does/not/exist").unwrap();
        assert_eq!(journal, Journal::new());
    }

    #[test]
    fn mirrored_keys_write_both_entries() {
        let mut journal = Journal::new();
        journal.set_mirrored(keys::TARGET_SLOT, "b");
        assert_eq!(journal.get(keys::TARGET_SLOT), Some("b"));
        assert_eq!(journal.get("pw_TARGET_SLOT"), Some("b"));
    }

    #[test]
    fn clear_progress_removes_mirrors() {
        let mut journal = Journal::new();
        journal.set_mirrored(keys::NEXT_OPERATION, "7");
        journal.clear_progress();
        assert_eq!(journal.get(keys::NEXT_OPERATION), None);
        assert_eq!(journal.get("pw_UPDATE_STATE_NEXT_OPERATION"), None);
    }
}
