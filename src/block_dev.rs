//! The backing extent: a flat run of fixed-size blocks.
//! The store never looks at host directories, only at block addresses.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::trace;
use parking_lot::Mutex;

use crate::{Error, Result};

pub trait BlockDevice: Send + Sync {
    /// Returns the number of blocks in the block device.
    fn num_blocks(&self) -> usize;

    /// Returns the size of each block in bytes.
    fn block_size(&self) -> usize;

    /// Reads a block of data from the block device.
    /// buf.len() must be equal to block_size().
    fn read_block(&self, block_id: u32, buf: &mut [u8]) -> Result<()>;

    /// Writes a block of data to the block device.
    /// buf.len() must be equal to block_size().
    fn write_block(&self, block_id: u32, buf: &[u8]) -> Result<()>;

    /// Flushes any buffered data to the underlying medium.
    fn flush(&self) -> Result<()>;
}

fn check_access(block_id: u32, len: usize, num_blocks: usize, block_size: usize) -> Result<()> {
    if block_id as usize >= num_blocks {
        return Err(Error::InvalidArgument(format!(
            "block {block_id} is outside a device of {num_blocks} blocks"
        )));
    }
    if len != block_size {
        return Err(Error::InvalidArgument(format!(
            "buffer of {len} bytes does not match the {block_size}-byte block size"
        )));
    }
    Ok(())
}

/// Sparse in-memory device. Blocks that were never written read as zeros,
/// so a large extent costs nothing until it is used.
#[derive(Debug)]
pub struct MemDevice {
    blocks: Mutex<HashMap<u32, Box<[u8]>>>,
    block_size: usize,
    num_blocks: usize,
}

impl MemDevice {
    pub fn new(block_size: usize, num_blocks: usize) -> Self {
        Self {
            blocks: Mutex::new(HashMap::new()),
            block_size,
            num_blocks,
        }
    }

    /// Number of blocks that have been written at least once.
    pub fn touched_blocks(&self) -> usize {
        self.blocks.lock().len()
    }
}

impl BlockDevice for MemDevice {
    fn num_blocks(&self) -> usize {
        self.num_blocks
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn read_block(&self, block_id: u32, buf: &mut [u8]) -> Result<()> {
        check_access(block_id, buf.len(), self.num_blocks, self.block_size)?;
        match self.blocks.lock().get(&block_id) {
            Some(data) => buf.copy_from_slice(data),
            None => buf.fill(0),
        }
        Ok(())
    }

    fn write_block(&self, block_id: u32, buf: &[u8]) -> Result<()> {
        check_access(block_id, buf.len(), self.num_blocks, self.block_size)?;
        self.blocks.lock().insert(block_id, buf.into());
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// A host file used as the backing extent.
/// The file grows as blocks are written; blocks past its end read as zeros.
#[derive(Debug)]
pub struct FileDevice {
    inner: Mutex<File>,
    block_size: usize,
    num_blocks: usize,
}

impl FileDevice {
    /// Creates (or truncates) the backing file.
    pub fn create(path: impl AsRef<Path>, block_size: usize, num_blocks: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;
        Ok(Self::from_file(file, block_size, num_blocks))
    }

    /// Opens an existing backing file without touching its contents.
    pub fn open(path: impl AsRef<Path>, block_size: usize, num_blocks: usize) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path.as_ref())?;
        Ok(Self::from_file(file, block_size, num_blocks))
    }

    pub fn from_file(file: File, block_size: usize, num_blocks: usize) -> Self {
        Self {
            inner: Mutex::new(file),
            block_size,
            num_blocks,
        }
    }
}

impl BlockDevice for FileDevice {
    fn num_blocks(&self) -> usize {
        self.num_blocks
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn read_block(&self, block_id: u32, buf: &mut [u8]) -> Result<()> {
        check_access(block_id, buf.len(), self.num_blocks, self.block_size)?;
        let start = block_id as u64 * self.block_size as u64;
        let mut file = self.inner.lock();
        file.seek(SeekFrom::Start(start))?;
        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        if filled < buf.len() {
            trace!("block {block_id} lies past the end of the backing file, zero-filling");
            buf[filled..].fill(0);
        }
        Ok(())
    }

    fn write_block(&self, block_id: u32, buf: &[u8]) -> Result<()> {
        check_access(block_id, buf.len(), self.num_blocks, self.block_size)?;
        let start = block_id as u64 * self.block_size as u64;
        let mut file = self.inner.lock();
        file.seek(SeekFrom::Start(start))?;
        file.write_all(buf)?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        let mut file = self.inner.lock();
        file.flush()?;
        file.sync_data()?;
        Ok(())
    }
}
