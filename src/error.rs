use thiserror::Error;

/// Every failure a store operation can report.
///
/// Nothing is retried internally; each variant reaches the caller as-is.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("no such file or directory: {0}")]
    NotFound(String),
    #[error("file already exists: {0}")]
    AlreadyExists(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("is a directory: {0}")]
    IsADirectory(String),
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),
    #[error("no free blocks left in the store")]
    OutOfSpace,
    /// Content or header would exceed the largest representable block count.
    #[error("file too large: {requested} blocks requested, at most {max} allowed")]
    TooLarge { requested: u64, max: u64 },
    #[error("store or channel is closed")]
    Closed,
    /// A header chain ended before the advertised number of addresses was read.
    #[error("malformed header chain at block {address}: expected {expected} addresses, found {found}")]
    MalformedChain {
        address: u32,
        expected: u32,
        found: u32,
    },
    #[error("corrupt metadata at block {address}: {detail}")]
    Corruption { address: u32, detail: String },
    #[error("invalid file name: {0:?}")]
    InvalidName(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    #[error("channel is not open for reading")]
    NotReadable,
    #[error("channel is not open for writing")]
    NotWritable,
    #[error("invalid store configuration: {0}")]
    InvalidConfig(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FsError {
    /// POSIX errno for the adapter layer. Exhaustive on purpose: a new variant
    /// does not compile until it has an errno.
    pub fn errno(&self) -> i32 {
        match self {
            Self::NotFound(_) => 2,             // ENOENT
            Self::AlreadyExists(_) => 17,       // EEXIST
            Self::NotADirectory(_) => 20,       // ENOTDIR
            Self::IsADirectory(_) => 21,        // EISDIR
            Self::DirectoryNotEmpty(_) => 39,   // ENOTEMPTY
            Self::OutOfSpace => 28,             // ENOSPC
            Self::TooLarge { .. } => 27,        // EFBIG
            Self::Closed => 9,                  // EBADF
            Self::MalformedChain { .. } => 5,   // EIO
            Self::Corruption { .. } => 5,       // EIO
            Self::InvalidName(_) => 22,         // EINVAL
            Self::InvalidArgument(_) => 22,     // EINVAL
            Self::InvalidState(_) => 22,        // EINVAL
            Self::NotReadable => 9,             // EBADF
            Self::NotWritable => 9,             // EBADF
            Self::InvalidConfig(_) => 22,       // EINVAL
            Self::Io(_) => 5,                   // EIO
        }
    }
}

impl From<FsError> for std::io::Error {
    fn from(e: FsError) -> Self {
        use std::io::ErrorKind;
        if let FsError::Io(inner) = e {
            return inner;
        }
        let kind = match &e {
            FsError::NotFound(_) => ErrorKind::NotFound,
            FsError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            FsError::NotADirectory(_) => ErrorKind::NotADirectory,
            FsError::IsADirectory(_) => ErrorKind::IsADirectory,
            FsError::DirectoryNotEmpty(_) => ErrorKind::DirectoryNotEmpty,
            FsError::OutOfSpace => ErrorKind::StorageFull,
            FsError::TooLarge { .. } => ErrorKind::FileTooLarge,
            FsError::InvalidName(_) | FsError::InvalidArgument(_) => ErrorKind::InvalidInput,
            FsError::MalformedChain { .. } | FsError::Corruption { .. } => ErrorKind::InvalidData,
            _ => ErrorKind::Other,
        };
        std::io::Error::new(kind, e)
    }
}

pub type Result<T> = core::result::Result<T, FsError>;
