//! Common utilities for tests
#![allow(dead_code)]

use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use monofs::*;
use parking_lot::Mutex;

pub const ORANGE: &str = "\x1b[38;5;214m";
pub const RESET: &str = "\x1b[0m";

pub const BS: usize = 512;

/// Provides a macro for logging messages during tests.
/// e.g. log!("placeholder") -> println!("[test] placeholder");
#[macro_export]
macro_rules! log {
    ($msg:expr) => {
        println!("{}[test] {}{}", crate::common::ORANGE, $msg, crate::common::RESET)
    };
    ($msg:expr, $($arg:tt)*) => {
        println!("{}[test] {}{}", crate::common::ORANGE, format!($msg, $($arg)*), crate::common::RESET)
    };
}

/// Dense in-memory disk whose writes can be switched to fail.
pub struct RamDisk {
    inner: Mutex<Vec<u8>>,
    block_size: usize,
    num_blocks: usize,
    fail_writes: AtomicBool,
    /// Writes to let through before failing; `usize::MAX` disarms.
    fail_in: AtomicUsize,
    /// Once `fail_in` runs out, keep failing instead of failing just once.
    fail_sticky: AtomicBool,
}

impl RamDisk {
    pub fn new(block_size: usize, num_blocks: usize) -> Self {
        RamDisk {
            inner: Mutex::new(vec![0u8; block_size * num_blocks]),
            block_size,
            num_blocks,
            fail_writes: AtomicBool::new(false),
            fail_in: AtomicUsize::new(usize::MAX),
            fail_sticky: AtomicBool::new(false),
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Lets `n` more writes succeed, fails the next one, then behaves again.
    pub fn fail_write_after(&self, n: usize) {
        self.fail_sticky.store(false, Ordering::SeqCst);
        self.fail_in.store(n, Ordering::SeqCst);
    }

    /// Lets `n` more writes succeed, then fails every write until `fail_writes(false)`.
    pub fn fail_writes_after(&self, n: usize) {
        self.fail_sticky.store(true, Ordering::SeqCst);
        self.fail_in.store(n, Ordering::SeqCst);
    }

    fn write_should_fail(&self) -> bool {
        if self.fail_writes.load(Ordering::SeqCst) {
            return true;
        }
        match self.fail_in.load(Ordering::SeqCst) {
            usize::MAX => false,
            0 => {
                self.fail_in.store(usize::MAX, Ordering::SeqCst);
                if self.fail_sticky.load(Ordering::SeqCst) {
                    self.fail_writes(true);
                }
                true
            }
            n => {
                self.fail_in.store(n - 1, Ordering::SeqCst);
                false
            }
        }
    }

    /// Overwrites raw bytes, bypassing the store.
    pub fn poke(&self, offset: usize, bytes: &[u8]) {
        self.inner.lock()[offset..offset + bytes.len()].copy_from_slice(bytes);
    }
}

impl BlockDevice for RamDisk {
    fn num_blocks(&self) -> usize {
        self.num_blocks
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn read_block(&self, block_id: u32, buf: &mut [u8]) -> Result<()> {
        let start = block_id as usize * self.block_size;
        if block_id as usize >= self.num_blocks || buf.len() != self.block_size {
            return Err(Error::InvalidArgument(format!("bad read of block {block_id}")));
        }
        buf.copy_from_slice(&self.inner.lock()[start..start + self.block_size]);
        Ok(())
    }

    fn write_block(&self, block_id: u32, buf: &[u8]) -> Result<()> {
        if self.write_should_fail() {
            return Err(std::io::Error::other("injected write failure").into());
        }
        let start = block_id as usize * self.block_size;
        if block_id as usize >= self.num_blocks || buf.len() != self.block_size {
            return Err(Error::InvalidArgument(format!("bad write of block {block_id}")));
        }
        self.inner.lock()[start..start + self.block_size].copy_from_slice(buf);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

pub fn config(blocks: u32) -> StoreConfig {
    StoreConfig::default()
        .with_block_size(BS)
        .with_max_bytes(blocks as u64 * BS as u64)
}

/// A freshly formatted store of `blocks` blocks on a sparse memory device.
pub fn fresh(blocks: u32) -> FileSystem<MemDevice> {
    let device = Arc::new(MemDevice::new(BS, blocks as usize));
    FileSystem::format(device, config(blocks)).unwrap()
}

pub fn p(path: &str) -> Vec<&str> {
    components(path)
}

pub fn write_file<D: BlockDevice>(fs: &mut FileSystem<D>, path: &str, data: &[u8]) {
    let mut ch = fs
        .new_byte_channel(&p(path), OpenOptions::CREATE | OpenOptions::WRITE)
        .unwrap();
    assert_eq!(fs.write(&mut ch, data).unwrap(), data.len());
    ch.close();
}

pub fn read_file<D: BlockDevice>(fs: &mut FileSystem<D>, path: &str) -> Vec<u8> {
    let mut ch = fs.new_byte_channel(&p(path), OpenOptions::READ).unwrap();
    let mut out = Vec::new();
    fs.channel_io(&mut ch).read_to_end(&mut out).unwrap();
    out
}

pub fn list<D: BlockDevice>(fs: &FileSystem<D>, path: &str) -> Vec<String> {
    fs.new_directory_stream(&p(path)).unwrap().iter().unwrap().collect()
}

/// Deterministic, non-repeating-per-block test bytes.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
