use crate::{Error, Result};

pub const DEFAULT_BLOCK_SIZE: usize = 1024;
pub const DEFAULT_MAX_BYTES: u64 = 1024 * 1024 * 1024; // 1 GiB
pub const MIN_BLOCK_SIZE: usize = 512;

pub const ROOT_ADDRESS: u32 = 0; // Primary header block of the root directory
pub const CHAIN_END: u32 = u32::MAX; // "-1" terminator of a header chain
pub const ADDRESS_SIZE: usize = 4;
pub const MAX_NAME_LEN: usize = 255;

/// nameLength + nextHeaderAddress + byteLength + isDirectory + contentBlockCount
pub const HEAD_FIXED_SIZE: usize = 4 + 4 + 4 + 1 + 4;
/// nextHeaderAddress at the start of every overflow block
pub const CHAIN_FIXED_SIZE: usize = 4;

/// Whether opening a store lays down a fresh root or replays the tree already on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitMode {
    #[default]
    Format,
    Recover,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    pub block_size: usize,
    pub max_bytes: u64,
    /// Upper bound on the content blocks a single file may hold.
    pub max_file_blocks: u32,
    pub mode: InitMode,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            max_bytes: DEFAULT_MAX_BYTES,
            max_file_blocks: byte_len_limit(DEFAULT_BLOCK_SIZE),
            mode: InitMode::Format,
        }
    }
}

/// Largest block count whose byte length still fits the 4-byte length field.
fn byte_len_limit(block_size: usize) -> u32 {
    (u32::MAX as u64 / block_size as u64) as u32
}

impl StoreConfig {
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        // Keep the file limit tied to the block size unless it was lowered explicitly.
        if self.max_file_blocks == byte_len_limit(self.block_size) && block_size > 0 {
            self.max_file_blocks = byte_len_limit(block_size);
        }
        self.block_size = block_size;
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn with_max_file_blocks(mut self, max_file_blocks: u32) -> Self {
        self.max_file_blocks = max_file_blocks;
        self
    }

    pub fn with_mode(mut self, mode: InitMode) -> Self {
        self.mode = mode;
        self
    }

    /// Number of addressable blocks in the store.
    pub fn capacity(&self) -> u64 {
        if self.block_size == 0 {
            return 0;
        }
        self.max_bytes / self.block_size as u64
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_size < MIN_BLOCK_SIZE {
            return Err(Error::InvalidConfig(format!(
                "block size {} is below the minimum of {MIN_BLOCK_SIZE}",
                self.block_size
            )));
        }
        let capacity = self.capacity();
        if capacity == 0 {
            return Err(Error::InvalidConfig(format!(
                "store of {} bytes holds no {}-byte block",
                self.max_bytes, self.block_size
            )));
        }
        // CHAIN_END must never be a usable address.
        if capacity >= CHAIN_END as u64 {
            return Err(Error::InvalidConfig(format!(
                "{capacity} blocks exceed the 32-bit address space"
            )));
        }
        if self.max_file_blocks == 0 {
            return Err(Error::InvalidConfig("max_file_blocks must be positive".into()));
        }
        if self.max_file_blocks > byte_len_limit(self.block_size) {
            return Err(Error::InvalidConfig(format!(
                "max_file_blocks {} overflows the 32-bit byte length at block size {}",
                self.max_file_blocks, self.block_size
            )));
        }
        Ok(())
    }
}
