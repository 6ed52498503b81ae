//! Byte channels.
//!
//! A channel is a plain value: the path it was opened on, a position and its
//! access flags. It holds no reference into the store, so a file can be moved
//! or deleted under an open channel; the next operation then fails with
//! `NotFound` instead of touching a stale head.

use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::file::ReadOutcome;
use crate::{BlockDevice, Error, FileSystem, OpenOptions, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteChannel {
    pub(crate) path: Vec<String>,
    pub(crate) position: u64,
    pub(crate) options: OpenOptions,
    open: bool,
}

impl ByteChannel {
    pub(crate) fn new(path: Vec<String>, options: OpenOptions) -> Self {
        Self {
            path,
            position: 0,
            options,
            open: true,
        }
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if !self.open {
            return Err(Error::Closed);
        }
        Ok(())
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn options(&self) -> OpenOptions {
        self.options
    }

    pub fn position(&self) -> Result<u64> {
        self.ensure_open()?;
        Ok(self.position)
    }

    /// Any position is accepted; writing past the end zero-fills the gap.
    pub fn set_position(&mut self, position: u64) -> Result<()> {
        self.ensure_open()?;
        self.position = position;
        Ok(())
    }

    /// Whether `close` has been called. See `FileSystem::is_channel_open`
    /// for a check that also covers the store.
    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn close(&mut self) {
        self.open = false;
    }
}

/// A channel bound to its store, usable wherever `std::io` traits are expected.
pub struct ChannelIo<'a, D: BlockDevice> {
    fs: &'a mut FileSystem<D>,
    channel: &'a mut ByteChannel,
}

impl<'a, D: BlockDevice> ChannelIo<'a, D> {
    pub(crate) fn new(fs: &'a mut FileSystem<D>, channel: &'a mut ByteChannel) -> Self {
        Self { fs, channel }
    }
}

impl<D: BlockDevice> Read for ChannelIo<'_, D> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.fs.read(self.channel, buf)? {
            ReadOutcome::Data(n) => Ok(n),
            ReadOutcome::EndOfFile => Ok(0),
        }
    }
}

impl<D: BlockDevice> Write for ChannelIo<'_, D> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.fs.write(self.channel, buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(self.fs.flush()?)
    }
}

impl<D: BlockDevice> Seek for ChannelIo<'_, D> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(n) => self.fs.size(self.channel)?.checked_add_signed(n),
            SeekFrom::Current(n) => self.channel.position()?.checked_add_signed(n),
        }
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "seek before start of file"))?;
        self.channel.set_position(target)?;
        Ok(target)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn closed_channel_rejects_position() {
        let mut ch = ByteChannel::new(vec!["f".into()], OpenOptions::READ);
        ch.set_position(7).unwrap();
        assert_eq!(ch.position().unwrap(), 7);
        ch.close();
        assert!(!ch.is_open());
        assert!(matches!(ch.position(), Err(Error::Closed)));
        assert!(matches!(ch.set_position(1), Err(Error::Closed)));
    }
}
