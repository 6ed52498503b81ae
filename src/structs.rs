use bitflags::bitflags;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Regular = 0,
    Directory = 1,
}

impl FileKind {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(FileKind::Regular),
            1 => Some(FileKind::Directory),
            _ => None,
        }
    }
}

/// Metadata of one file or directory.
///
/// The head owns its content-block list outright; I/O code borrows it for a
/// single call and never keeps a reference around.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHead {
    pub(crate) name: String,
    pub(crate) kind: FileKind,
    pub(crate) byte_len: u32,
    /// Content blocks in file order.
    pub(crate) blocks: Vec<u32>,
    /// Primary header block.
    pub(crate) address: u32,
    /// Overflow header blocks, in chain order.
    pub(crate) chain: Vec<u32>,
}

impl FileHead {
    pub fn new(name: impl Into<String>, kind: FileKind, address: u32) -> Self {
        Self {
            name: name.into(),
            kind,
            byte_len: 0,
            blocks: Vec::new(),
            address,
            chain: Vec::new(),
        }
    }

    /// Builds a head from already-known parts, e.g. in tests of the serializer.
    pub fn with_blocks(
        name: impl Into<String>,
        kind: FileKind,
        address: u32,
        byte_len: u32,
        blocks: Vec<u32>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            byte_len,
            blocks,
            address,
            chain: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    pub fn is_directory(&self) -> bool {
        self.kind == FileKind::Directory
    }

    pub fn byte_len(&self) -> u32 {
        self.byte_len
    }

    pub fn blocks(&self) -> &[u32] {
        &self.blocks
    }

    pub fn address(&self) -> u32 {
        self.address
    }

    pub fn chain(&self) -> &[u32] {
        &self.chain
    }

    /// Every block this head occupies: primary, overflow chain and content.
    pub fn all_blocks(&self) -> impl Iterator<Item = u32> + '_ {
        core::iter::once(self.address)
            .chain(self.chain.iter().copied())
            .chain(self.blocks.iter().copied())
    }
}

bitflags! {
    /// Options understood by `FileSystem::new_byte_channel`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OpenOptions: u8 {
        const READ = 0b0000_0001;
        const WRITE = 0b0000_0010;
        const APPEND = 0b0000_0100;
        const CREATE = 0b0000_1000;
        const CREATE_NEW = 0b0001_0000;
        const TRUNCATE_EXISTING = 0b0010_0000;
    }
}

impl OpenOptions {
    /// Channel may read. With no access flag at all the channel is read-write.
    pub fn readable(self) -> bool {
        self.contains(Self::READ) || !self.intersects(Self::WRITE | Self::APPEND)
    }

    pub fn writable(self) -> bool {
        self.intersects(Self::WRITE | Self::APPEND) || !self.contains(Self::READ)
    }
}

bitflags! {
    /// Options understood by `FileSystem::copy` and `FileSystem::rename`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CopyOptions: u8 {
        const REPLACE_EXISTING = 0b0000_0001;
    }
}
