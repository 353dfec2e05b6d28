// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 rhythmcache
// https://github.com/rhythmcache/payload-dumper-rust

//! Narrow traits the executor and verifiers depend on, instead of a
//! global `SystemState` singleton. Each trait covers exactly one concern
//! (block I/O, error-corrected reads, CoW snapshot writes) so that a
//! caller wiring this crate into a real updater only has to implement
//! the handful of methods its environment actually supports; tests
//! substitute in-memory fakes.

use std::io;

/// A block device the executor reads from and writes to by absolute byte
/// offset. Both the source and target partitions are presented through
/// this trait; for a full (non-delta) update the source may be absent.
pub trait BlockDevice {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()>;
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()>;
    fn flush(&mut self) -> io::Result<()>;
    /// Total addressable size of the device, in bytes.
    fn size(&self) -> u64;
}

/// Optional error-corrected fallback for a source block device. When a
/// `SOURCE_*` operation's source hash check fails, the writer reopens the
/// source through this trait before giving up, mirroring
/// `PartitionWriter::ChooseSourceFD`'s ECC retry.
pub trait Ecc {
    /// Re-reads `offset..offset+buf.len()` through error correction,
    /// filling `buf` on success. Returns `Ok(false)` if no correction was
    /// possible (the caller should treat this the same as the original
    /// read failing), and increments an internal recovered-failure
    /// counter on success.
    fn recover_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<bool>;
}

/// A snapshot writer backing a dynamic (Virtual A/B) partition update,
/// corresponding to libsnapshot's `ICowWriter`. The CoW partition writer
/// drives one of these per partition instead of writing the target block
/// device directly.
pub trait SnapshotWriter {
    /// Copies `dst_block`'s current content from `src_block`, both within
    /// the snapshot's own block space.
    fn add_copy(&mut self, dst_block: u64, src_block: u64) -> io::Result<()>;
    /// Stores `data` (exactly one block) as `dst_block`'s new content.
    fn add_raw_blocks(&mut self, dst_block: u64, data: &[u8]) -> io::Result<()>;
    /// Marks `num_blocks` starting at `dst_block` as zero-filled.
    fn add_zero_blocks(&mut self, dst_block: u64, num_blocks: u64) -> io::Result<()>;
    /// Flushes and seals the snapshot so it can later be merged into the
    /// base device.
    fn finalize(&mut self) -> io::Result<()>;
}

/// An in-memory block device, used by tests and as a reference
/// implementation for callers without a real block layer yet.
pub struct MemoryBlockDevice {
    data: Vec<u8>,
}

impl MemoryBlockDevice {
    pub fn new(size: u64) -> Self {
        MemoryBlockDevice {
            data: vec![0u8; size as usize],
        }
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        MemoryBlockDevice { data }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl BlockDevice for MemoryBlockDevice {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let start = offset as usize;
        let end = start + buf.len();
        if end > self.data.len() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "read past end of device"));
        }
        buf.copy_from_slice(&self.data[start..end]);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        let start = offset as usize;
        let end = start + buf.len();
        if end > self.data.len() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "write past end of device"));
        }
        self.data[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// A block device backed by a real file or block special file, used by
/// the CLI binary to apply a payload to an actual target/source device
/// (or a plain `.img` file standing in for one during testing).
pub struct FileBlockDevice {
    file: std::fs::File,
    size: u64,
}

impl FileBlockDevice {
    pub fn open(path: impl AsRef<std::path::Path>, writable: bool) -> io::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(writable)
            .open(path)?;
        let size = file.metadata()?.len();
        Ok(FileBlockDevice { file, size })
    }
}

impl BlockDevice for FileBlockDevice {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        use std::io::{Read, Seek, SeekFrom};
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        use std::io::{Seek, SeekFrom, Write};
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        use std::io::Write;
        self.file.flush()
    }

    fn size(&self) -> u64 {
        self.size
    }
}

/// Reads `buf.len()` bytes at `offset` from `device`, retrying through
/// `ecc` (if present) on failure. Mirrors `PartitionWriter::ChooseSourceFD`:
/// a plain read failure is not fatal as long as an error-corrected reopen
/// of the same region succeeds.
pub fn read_with_ecc_fallback(
    device: &mut dyn BlockDevice,
    ecc: Option<&mut dyn Ecc>,
    offset: u64,
    buf: &mut [u8],
) -> io::Result<()> {
    match device.read_at(offset, buf) {
        Ok(()) => Ok(()),
        Err(primary_err) => match ecc {
            Some(ecc) => match ecc.recover_at(offset, buf) {
                Ok(true) => Ok(()),
                Ok(false) => Err(primary_err),
                Err(_) => Err(primary_err),
            },
            None => Err(primary_err),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_device_round_trips() {
        let mut dev = MemoryBlockDevice::new(16);
        dev.write_at(4, b"abcd").unwrap();
        let mut buf = [0u8; 4];
        dev.read_at(4, &mut buf).unwrap();
        assert_eq!(&buf, b"abcd");
    }

    #[test]
    fn memory_device_rejects_out_of_bounds() {
        let mut dev = MemoryBlockDevice::new(4);
        let mut buf = [0u8; 4];
        assert!(dev.read_at(2, &mut buf).is_err());
    }

    struct FakeEcc {
        recovered: Vec<u8>,
    }

    impl Ecc for FakeEcc {
        fn recover_at(&mut self, _offset: u64, buf: &mut [u8]) -> io::Result<bool> {
            buf.copy_from_slice(&self.recovered[..buf.len()]);
            Ok(true)
        }
    }

    #[test]
    fn ecc_fallback_recovers_failed_read() {
        let mut dev = MemoryBlockDevice::new(4);
        let mut ecc = FakeEcc {
            recovered: vec![9, 9, 9, 9, 9, 9],
        };
        let mut buf = [0u8; 4];
        // offset 2 with a 4-byte buffer overruns the 4-byte device.
        read_with_ecc_fallback(&mut dev, Some(&mut ecc), 2, &mut buf).unwrap();
        assert_eq!(buf, [9, 9, 9, 9]);
    }

    #[test]
    fn no_ecc_propagates_primary_error() {
        let mut dev = MemoryBlockDevice::new(4);
        let mut buf = [0u8; 4];
        assert!(read_with_ecc_fallback(&mut dev, None, 2, &mut buf).is_err());
    }
}
