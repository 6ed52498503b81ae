use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::attributes::{AttributeValue, BasicAttributeView, BasicAttributes};
use crate::bitmap::BlockAllocator;
use crate::channel::{ByteChannel, ChannelIo};
use crate::config::*;
use crate::directory::{DirectoryStream, decode_children, encode_children};
use crate::file::{ReadOutcome, read_all, read_at, rewrite, truncate, write_at};
use crate::head::{deserialize, serialize};
use crate::path::{display, validate_name};
use crate::structs::*;
use crate::tree::{Node, Tree};
use crate::{BlockDevice, Error, Result};

/// Block usage of an open store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreUsage {
    pub block_size: usize,
    pub capacity: u32,
    pub used: u32,
}

/// An open store: the directory tree, the allocator, and the extent they live in.
///
/// Every method runs to completion on the caller's thread. There is no
/// internal locking; callers sharing a store must serialize access.
#[derive(Debug)]
pub struct FileSystem<D: BlockDevice> {
    device: Arc<D>,
    config: StoreConfig,
    allocator: BlockAllocator,
    tree: Tree,
    open: bool,
}

fn owned<S: AsRef<str>>(path: &[S]) -> Vec<String> {
    path.iter().map(|s| s.as_ref().to_owned()).collect()
}

fn same_path<S: AsRef<str>, T: AsRef<str>>(a: &[S], b: &[T]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.as_ref() == y.as_ref())
}

/// Marks every block of `head` as used; a block claimed twice means the image is corrupt.
fn claim(allocator: &mut BlockAllocator, head: &FileHead) -> Result<()> {
    for block in head.all_blocks() {
        if !allocator.mark_used(block) {
            return Err(Error::Corruption {
                address: head.address(),
                detail: format!("block {block} is out of range or referenced twice"),
            });
        }
    }
    Ok(())
}

/// Child addresses listed in a directory's content.
fn listed_children(device: &impl BlockDevice, dir: &FileHead) -> Result<Vec<u32>> {
    let content = read_all(device, dir)?;
    decode_children(dir.address(), &content)
}

fn adopt(dir: &mut Node, child: Node) -> Result<()> {
    debug!(
        "recovered {:?} at block {} under {:?}",
        child.head().name(),
        child.head().address(),
        dir.head().name()
    );
    let name = child.head().name().to_owned();
    if !dir.add_child(child) {
        return Err(Error::Corruption {
            address: dir.head().address(),
            detail: format!("duplicate child name {name:?}"),
        });
    }
    Ok(())
}

/// Rebuilds the tree under `root` depth first. Directories still being filled
/// wait on an explicit stack, so nesting depth is bounded by the heap only.
fn load_tree(device: &impl BlockDevice, allocator: &mut BlockAllocator, root: FileHead) -> Result<Tree> {
    let pending = listed_children(device, &root)?.into_iter();
    let mut stack = vec![(Node::new(root), pending)];
    loop {
        let Some((mut dir, mut pending)) = stack.pop() else {
            return Err(Error::InvalidState("recovery lost the root directory"));
        };
        let Some(address) = pending.next() else {
            match stack.last_mut() {
                Some((parent, _)) => adopt(parent, dir)?,
                None => return Ok(Tree::from_root(dir)),
            }
            continue;
        };
        let head = deserialize(device, address)?;
        claim(allocator, &head)?;
        if head.is_directory() {
            let children = listed_children(device, &head)?.into_iter();
            stack.push((dir, pending));
            stack.push((Node::new(head), children));
        } else {
            adopt(&mut dir, Node::new(head))?;
            stack.push((dir, pending));
        }
    }
}

impl<D: BlockDevice> FileSystem<D> {
    /// Formats or recovers, depending on `config.mode`.
    pub fn open(device: Arc<D>, config: StoreConfig) -> Result<Self> {
        match config.mode {
            InitMode::Format => Self::format(device, config),
            InitMode::Recover => Self::mount(device, config),
        }
    }

    fn check_device(device: &D, config: &StoreConfig) -> Result<u32> {
        config.validate()?;
        if device.block_size() != config.block_size {
            return Err(Error::InvalidConfig(format!(
                "device block size {} differs from configured {}",
                device.block_size(),
                config.block_size
            )));
        }
        let capacity = config.capacity();
        if (device.num_blocks() as u64) < capacity {
            return Err(Error::InvalidConfig(format!(
                "device holds {} blocks, store needs {capacity}",
                device.num_blocks()
            )));
        }
        Ok(capacity as u32)
    }

    /// Lays down an empty root directory at `ROOT_ADDRESS`.
    pub fn format(device: Arc<D>, config: StoreConfig) -> Result<Self> {
        let capacity = Self::check_device(&device, &config)?;
        let mut allocator = BlockAllocator::new(capacity);
        if !allocator.mark_used(ROOT_ADDRESS) {
            return Err(Error::InvalidState("root address unavailable on a fresh allocator"));
        }

        let mut fs = Self {
            device,
            config,
            allocator,
            tree: Tree::new(FileHead::new("", FileKind::Directory, ROOT_ADDRESS)),
            open: true,
        };
        fs.persist_directory::<&str>(&[])?;
        fs.device.flush()?;
        info!(
            "formatted store: {capacity} blocks of {} bytes",
            fs.config.block_size
        );
        Ok(fs)
    }

    /// Rebuilds the tree and the allocator from the blocks already on the device.
    pub fn mount(device: Arc<D>, config: StoreConfig) -> Result<Self> {
        let capacity = Self::check_device(&device, &config)?;
        let mut allocator = BlockAllocator::new(capacity);

        let recovered = (|| -> Result<Tree> {
            let root = deserialize(&*device, ROOT_ADDRESS)?;
            if !root.is_directory() {
                return Err(Error::Corruption {
                    address: ROOT_ADDRESS,
                    detail: "root head is not a directory".into(),
                });
            }
            claim(&mut allocator, &root)?;
            load_tree(&*device, &mut allocator, root)
        })();
        let tree = match recovered {
            Ok(tree) => tree,
            Err(e) => {
                warn!("store recovery failed: {e}");
                return Err(e);
            }
        };

        info!(
            "mounted store: {} of {capacity} blocks in use",
            allocator.used()
        );
        Ok(Self {
            device,
            config,
            allocator,
            tree,
            open: true,
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if !self.open {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Rewrites a directory's content from its current children.
    fn persist_directory<S: AsRef<str>>(&mut self, dir: &[S]) -> Result<()> {
        let max = self.config.max_file_blocks;
        let node = self
            .tree
            .resolve_mut(dir)
            .ok_or_else(|| Error::NotFound(display(dir)))?;
        let content = encode_children(&node.child_addresses());
        rewrite(&*self.device, &mut self.allocator, node.head_mut(), &content, max)?;
        debug!(
            "persisted directory {} ({} children)",
            display(dir),
            node.children().len()
        );
        Ok(())
    }

    /// Gives back the header blocks of `head`, and its content blocks if `content` is set.
    fn release(&mut self, head: &FileHead, content: bool) {
        self.allocator.free(head.address());
        for &block in head.chain() {
            self.allocator.free(block);
        }
        if content {
            for &block in head.blocks() {
                self.allocator.free(block);
            }
        }
    }

    /// Checks that `path` is free and its parent is a directory; returns the new name.
    fn check_vacant<'p, S: AsRef<str>>(&self, path: &'p [S]) -> Result<&'p str> {
        let Some((name, parent)) = path.split_last() else {
            return Err(Error::AlreadyExists(display(path)));
        };
        if self.tree.exists(path) {
            return Err(Error::AlreadyExists(display(path)));
        }
        match self.tree.resolve(parent) {
            None => return Err(Error::NotFound(display(parent))),
            Some(node) if !node.is_directory() => return Err(Error::NotADirectory(display(parent))),
            Some(_) => {}
        }
        validate_name(name.as_ref())?;
        Ok(name.as_ref())
    }

    /// Inserts an already-written head and persists its parent. On failure the
    /// tree is restored and the head's blocks are released.
    fn attach<S: AsRef<str>>(&mut self, path: &[S], head: FileHead, owns_content: bool) -> Result<()> {
        if !self.tree.insert(path, head) {
            return Err(Error::InvalidState("entry changed between check and insert"));
        }
        let parent = &path[..path.len() - 1];
        if let Err(e) = self.persist_directory(parent) {
            if let Ok(head) = self.tree.remove(path) {
                self.release(&head, owns_content);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Takes a freshly attached head back out of its parent. If the parent cannot
    /// be rewritten the head stays listed and keeps its blocks.
    fn undo_attach<S: AsRef<str>>(&mut self, path: &[S]) {
        let Ok((index, head)) = self.tree.detach(path) else {
            return;
        };
        match self.persist_directory(&path[..path.len() - 1]) {
            Ok(()) => self.release(&head, false),
            Err(e) => {
                warn!("could not withdraw {}: {e}", display(path));
                self.tree.reattach(path, index, head);
            }
        }
    }

    fn create_entry<S: AsRef<str>>(&mut self, path: &[S], kind: FileKind) -> Result<()> {
        let name = self.check_vacant(path)?;
        let address = self.allocator.allocate()?;
        let mut head = FileHead::new(name, kind, address);
        let written = match kind {
            FileKind::Directory => rewrite(
                &*self.device,
                &mut self.allocator,
                &mut head,
                &encode_children(&[]),
                self.config.max_file_blocks,
            ),
            FileKind::Regular => serialize(&*self.device, &mut self.allocator, &mut head),
        };
        if let Err(e) = written {
            self.release(&head, true);
            return Err(e);
        }
        self.attach(path, head, true)?;
        debug!("created {:?} {} at block {address}", kind, display(path));
        Ok(())
    }

    /// Opens a byte channel on a regular file, creating it if the options say so.
    pub fn new_byte_channel<S: AsRef<str>>(
        &mut self,
        path: &[S],
        options: OpenOptions,
    ) -> Result<ByteChannel> {
        self.ensure_open()?;
        match self.tree.resolve(path) {
            Some(_) if options.contains(OpenOptions::CREATE_NEW) => {
                return Err(Error::AlreadyExists(display(path)));
            }
            Some(node) if node.is_directory() => return Err(Error::IsADirectory(display(path))),
            Some(_) => {
                if options.contains(OpenOptions::TRUNCATE_EXISTING) && options.writable() {
                    let node = self
                        .tree
                        .resolve_mut(path)
                        .ok_or_else(|| Error::NotFound(display(path)))?;
                    truncate(&*self.device, &mut self.allocator, node.head_mut(), 0, 0)?;
                }
            }
            None if options.intersects(OpenOptions::CREATE | OpenOptions::CREATE_NEW) => {
                self.create_entry(path, FileKind::Regular)?;
            }
            None => return Err(Error::NotFound(display(path))),
        }

        let mut channel = ByteChannel::new(owned(path), options);
        if options.contains(OpenOptions::APPEND) {
            channel.position = self.file_head(&channel.path)?.byte_len() as u64;
        }
        Ok(channel)
    }

    fn file_head(&self, path: &[String]) -> Result<&FileHead> {
        let node = self
            .tree
            .resolve(path)
            .ok_or_else(|| Error::NotFound(display(path)))?;
        if node.is_directory() {
            return Err(Error::IsADirectory(display(path)));
        }
        Ok(node.head())
    }

    /// Reads at the channel's position and advances it.
    pub fn read(&mut self, channel: &mut ByteChannel, buf: &mut [u8]) -> Result<ReadOutcome> {
        self.ensure_open()?;
        channel.ensure_open()?;
        if !channel.options.readable() {
            return Err(Error::NotReadable);
        }
        let head = self.file_head(&channel.path)?;
        let outcome = read_at(&*self.device, head, channel.position, buf)?;
        if let ReadOutcome::Data(n) = outcome {
            channel.position += n as u64;
        }
        Ok(outcome)
    }

    /// Writes at the channel's position (or at the end, for append channels) and advances it.
    pub fn write(&mut self, channel: &mut ByteChannel, buf: &[u8]) -> Result<usize> {
        self.ensure_open()?;
        channel.ensure_open()?;
        if !channel.options.writable() {
            return Err(Error::NotWritable);
        }
        let max = self.config.max_file_blocks;
        let node = self
            .tree
            .resolve_mut(&channel.path)
            .ok_or_else(|| Error::NotFound(display(&channel.path)))?;
        if node.is_directory() {
            return Err(Error::IsADirectory(display(&channel.path)));
        }
        let head = node.head_mut();
        if channel.options.contains(OpenOptions::APPEND) {
            channel.position = head.byte_len() as u64;
        }
        let written = write_at(
            &*self.device,
            &mut self.allocator,
            head,
            channel.position,
            buf,
            max,
        )?;
        channel.position += written as u64;
        Ok(written)
    }

    /// Truncates the channel's file to `size` bytes and clamps the channel's position.
    pub fn truncate(&mut self, channel: &mut ByteChannel, size: u64) -> Result<()> {
        self.ensure_open()?;
        channel.ensure_open()?;
        if !channel.options.writable() {
            return Err(Error::NotWritable);
        }
        let node = self
            .tree
            .resolve_mut(&channel.path)
            .ok_or_else(|| Error::NotFound(display(&channel.path)))?;
        if node.is_directory() {
            return Err(Error::IsADirectory(display(&channel.path)));
        }
        channel.position = truncate(
            &*self.device,
            &mut self.allocator,
            node.head_mut(),
            channel.position,
            size,
        )?;
        Ok(())
    }

    /// Current byte length of the channel's file.
    pub fn size(&self, channel: &ByteChannel) -> Result<u64> {
        self.ensure_open()?;
        channel.ensure_open()?;
        Ok(self.file_head(&channel.path)?.byte_len() as u64)
    }

    pub fn is_channel_open(&self, channel: &ByteChannel) -> bool {
        self.open && channel.is_open()
    }

    /// `std::io` view of a channel, for use with `io::copy`, `read_to_end` and friends.
    pub fn channel_io<'a>(&'a mut self, channel: &'a mut ByteChannel) -> ChannelIo<'a, D> {
        ChannelIo::new(self, channel)
    }

    pub fn new_directory_stream<S: AsRef<str>>(&self, path: &[S]) -> Result<DirectoryStream> {
        self.ensure_open()?;
        let node = self
            .tree
            .resolve(path)
            .ok_or_else(|| Error::NotFound(display(path)))?;
        if !node.is_directory() {
            return Err(Error::NotADirectory(display(path)));
        }
        Ok(DirectoryStream::new(owned(path), node.child_names()))
    }

    pub fn exists<S: AsRef<str>>(&self, path: &[S]) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.tree.exists(path))
    }

    pub fn create_directory<S: AsRef<str>>(&mut self, path: &[S]) -> Result<()> {
        self.ensure_open()?;
        self.create_entry(path, FileKind::Directory)
    }

    /// Removes a file or an empty directory and frees all of its blocks.
    /// Blocks are freed only once the parent no longer lists the entry.
    pub fn delete<S: AsRef<str>>(&mut self, path: &[S]) -> Result<()> {
        self.ensure_open()?;
        let (index, head) = self.tree.detach(path)?;
        if let Err(e) = self.persist_directory(&path[..path.len() - 1]) {
            self.tree.reattach(path, index, head);
            return Err(e);
        }
        self.release(&head, true);
        debug!("deleted {}", display(path));
        Ok(())
    }

    /// Copies `source` to `target` byte by byte. A directory copies as an empty directory.
    pub fn copy<S: AsRef<str>, T: AsRef<str>>(
        &mut self,
        source: &[S],
        target: &[T],
        options: CopyOptions,
    ) -> Result<()> {
        self.ensure_open()?;
        let is_directory = self
            .tree
            .resolve(source)
            .ok_or_else(|| Error::NotFound(display(source)))?
            .is_directory();
        if same_path(source, target) {
            return Ok(());
        }
        if self.tree.exists(target) {
            if !options.contains(CopyOptions::REPLACE_EXISTING) {
                return Err(Error::AlreadyExists(display(target)));
            }
            self.delete(target)?;
        }

        if is_directory {
            return self.create_entry(target, FileKind::Directory);
        }
        self.create_entry(target, FileKind::Regular)?;
        if let Err(e) = self.copy_content(&owned(source), &owned(target)) {
            // Do not leave a half-copied file behind.
            if let Err(cleanup) = self.delete(target) {
                warn!("could not remove partial copy {}: {cleanup}", display(target));
            }
            return Err(e);
        }
        debug!("copied {} to {}", display(source), display(target));
        Ok(())
    }

    fn copy_content(&mut self, source: &[String], target: &[String]) -> Result<()> {
        let max = self.config.max_file_blocks;
        let mut buf = vec![0u8; self.config.block_size * 16];
        let mut position = 0u64;
        loop {
            let n = match read_at(&*self.device, self.file_head(source)?, position, &mut buf)? {
                ReadOutcome::EndOfFile => return Ok(()),
                ReadOutcome::Data(n) => n,
            };
            let node = self
                .tree
                .resolve_mut(target)
                .ok_or_else(|| Error::NotFound(display(target)))?;
            write_at(
                &*self.device,
                &mut self.allocator,
                node.head_mut(),
                position,
                &buf[..n],
                max,
            )?;
            position += n as u64;
        }
    }

    /// Moves `source` to `target`. The head gets a fresh primary address and
    /// header chain; its content blocks move with it untouched.
    pub fn rename<S: AsRef<str>, T: AsRef<str>>(
        &mut self,
        source: &[S],
        target: &[T],
        options: CopyOptions,
    ) -> Result<()> {
        self.ensure_open()?;
        if source.is_empty() {
            return Err(Error::InvalidArgument("the root directory cannot be moved".into()));
        }
        let node = self
            .tree
            .resolve(source)
            .ok_or_else(|| Error::NotFound(display(source)))?;
        if same_path(source, target) {
            return Ok(());
        }
        if target.len() > source.len() && same_path(source, &target[..source.len()]) {
            return Err(Error::InvalidArgument(format!(
                "cannot move {} into itself",
                display(source)
            )));
        }
        if !node.children().is_empty() {
            return Err(Error::DirectoryNotEmpty(display(source)));
        }
        let mut head = node.head().clone();

        if self.tree.exists(target) {
            if !options.contains(CopyOptions::REPLACE_EXISTING) {
                return Err(Error::AlreadyExists(display(target)));
            }
            self.delete(target)?;
        }
        let name = self.check_vacant(target)?.to_owned();

        // Write the head under its new address first; the old one stays valid until the swap.
        let address = self.allocator.allocate()?;
        head.name = name;
        head.address = address;
        head.chain.clear();
        if let Err(e) = serialize(&*self.device, &mut self.allocator, &mut head) {
            self.release(&head, false);
            return Err(e);
        }
        self.attach(target, head, false)?;

        let (index, old) = self.tree.detach(source)?;
        if let Err(e) = self.persist_directory(&source[..source.len() - 1]) {
            self.tree.reattach(source, index, old);
            self.undo_attach(target);
            return Err(e);
        }
        self.release(&old, false);
        debug!(
            "moved {} to {} (block {} -> {address})",
            display(source),
            display(target),
            old.address()
        );
        Ok(())
    }

    pub fn read_attributes<S: AsRef<str>>(&self, path: &[S]) -> Result<BasicAttributes> {
        self.ensure_open()?;
        Ok(BasicAttributes::of(self.head(path)?))
    }

    pub fn read_attributes_map<S: AsRef<str>>(
        &self,
        path: &[S],
    ) -> Result<BTreeMap<&'static str, AttributeValue>> {
        Ok(self.read_attributes(path)?.to_map())
    }

    pub fn attribute_view<S: AsRef<str>>(&self, path: &[S]) -> Result<BasicAttributeView> {
        self.ensure_open()?;
        self.head(path)?;
        Ok(BasicAttributeView::new(owned(path)))
    }

    /// Attributes are derived from the head; setting one is accepted and ignored.
    pub fn set_attribute<S: AsRef<str>>(
        &mut self,
        path: &[S],
        name: &str,
        _value: AttributeValue,
    ) -> Result<()> {
        self.ensure_open()?;
        self.head(path)?;
        debug!("ignoring attribute {name:?} on {}", display(path));
        Ok(())
    }

    /// The head stored at `path`.
    pub fn head<S: AsRef<str>>(&self, path: &[S]) -> Result<&FileHead> {
        self.ensure_open()?;
        self.tree
            .resolve(path)
            .map(Node::head)
            .ok_or_else(|| Error::NotFound(display(path)))
    }

    /// Block usage at the time of the call. Stays readable after `close` so
    /// callers can report the final state.
    pub fn usage(&self) -> StoreUsage {
        StoreUsage {
            block_size: self.config.block_size,
            capacity: self.allocator.capacity(),
            used: self.allocator.used(),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn device(&self) -> Arc<D> {
        Arc::clone(&self.device)
    }

    pub fn flush(&self) -> Result<()> {
        self.ensure_open()?;
        self.device.flush()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Flushes the device and refuses every later operation. Closing twice is fine.
    pub fn close(&mut self) -> Result<()> {
        if self.open {
            self.device.flush()?;
            self.open = false;
            info!("closed store ({} blocks in use)", self.allocator.used());
        }
        Ok(())
    }
}
