//! Monofs is a small hierarchical file store kept inside a single extent of
//! fixed-size blocks, such as one host file or a buffer in memory.
//! No permissions, links or timestamps are stored.
//!
//! Monofs's block layout:
//! - Block 0: header of the root directory
//! - Any other block: a file header, a header overflow block, or content
//!
//! Block occupancy is not persisted. Recovery walks the tree from block 0
//! and rebuilds it.
//!
//! Monofs's layers (from bottom to top):
//! 1. Block Device: fixed-size blocks by index.              | User implemented or `MemDevice`/`FileDevice`
//! 2. Allocator: which blocks are in use.                   | Fs implemented
//! 3. Head: file metadata and its chained on-disk encoding.  | Fs implemented
//! 4. File: positioned reads/writes over a head's blocks.    | Fs implemented
//! 5. Tree/Directory: names, children and their listing.     | Fs implemented
//! 6. FileSystem: paths, channels, copy/move, recovery.      | User facing

#![forbid(unsafe_code)]

mod config;
mod block_dev;
mod structs;
mod bitmap;
pub mod head;
mod file;
mod directory;
mod tree;
mod path;
mod channel;
mod attributes;
mod fs;
mod error;

pub use block_dev::{BlockDevice, FileDevice, MemDevice};
pub use config::*;
pub use structs::*;
pub use bitmap::{BlockAllocator, Exhausted};
pub use file::*;
pub use directory::*;
pub use tree::{Node, Tree};
pub use path::*;
pub use channel::{ByteChannel, ChannelIo};
pub use attributes::*;
pub use fs::*;
pub use error::FsError as Error;
pub use error::Result;
