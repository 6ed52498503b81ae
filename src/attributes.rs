use std::collections::BTreeMap;
use std::time::SystemTime;

use crate::{BlockDevice, FileHead, FileKind, FileSystem, Result};

/// What `stat` reports. No timestamps are tracked; every time is the epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasicAttributes {
    kind: FileKind,
    size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeValue {
    Bool(bool),
    U64(u64),
}

impl BasicAttributes {
    pub(crate) fn of(head: &FileHead) -> Self {
        Self {
            kind: head.kind(),
            size: head.byte_len() as u64,
        }
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    pub fn is_regular_file(&self) -> bool {
        self.kind == FileKind::Regular
    }

    pub fn is_directory(&self) -> bool {
        self.kind == FileKind::Directory
    }

    pub fn is_symbolic_link(&self) -> bool {
        false
    }

    pub fn is_other(&self) -> bool {
        false
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn last_modified_time(&self) -> SystemTime {
        SystemTime::UNIX_EPOCH
    }

    pub fn last_access_time(&self) -> SystemTime {
        SystemTime::UNIX_EPOCH
    }

    pub fn creation_time(&self) -> SystemTime {
        SystemTime::UNIX_EPOCH
    }

    pub fn to_map(&self) -> BTreeMap<&'static str, AttributeValue> {
        BTreeMap::from([
            ("isRegularFile", AttributeValue::Bool(self.is_regular_file())),
            ("isDirectory", AttributeValue::Bool(self.is_directory())),
            ("isSymbolicLink", AttributeValue::Bool(false)),
            ("isOther", AttributeValue::Bool(false)),
            ("size", AttributeValue::U64(self.size)),
        ])
    }
}

/// The "basic" attribute view of one path. Attributes are read fresh on
/// every call, so the view follows later writes to the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicAttributeView {
    path: Vec<String>,
}

impl BasicAttributeView {
    pub(crate) fn new(path: Vec<String>) -> Self {
        Self { path }
    }

    pub fn name(&self) -> &'static str {
        "basic"
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn read_attributes<D: BlockDevice>(&self, fs: &FileSystem<D>) -> Result<BasicAttributes> {
        fs.read_attributes(&self.path)
    }

    /// Timestamps are not stored; accepted and dropped.
    pub fn set_times(
        &self,
        _last_modified: Option<SystemTime>,
        _last_access: Option<SystemTime>,
        _created: Option<SystemTime>,
    ) -> Result<()> {
        Ok(())
    }
}
