//! Positioned reads, writes and truncation over a head's content blocks.
//! Every successful mutation re-serializes the head before returning.

use log::trace;

use crate::bitmap::BlockAllocator;
use crate::head::{chain_len, serialize};
use crate::{BlockDevice, Error, FileHead, Result};

/// Result of a positioned read. `EndOfFile` is distinct from reading zero bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Data(usize),
    EndOfFile,
}

fn content_block(head: &FileHead, index: usize) -> Result<u32> {
    head.blocks.get(index).copied().ok_or_else(|| Error::Corruption {
        address: head.address,
        detail: format!(
            "content block {index} missing ({} held for {} bytes)",
            head.blocks.len(),
            head.byte_len
        ),
    })
}

/// Reads from `position` into `buffer`, never past the head's byte length.
pub fn read_at(
    device: &impl BlockDevice,
    head: &FileHead,
    position: u64,
    buffer: &mut [u8],
) -> Result<ReadOutcome> {
    let len = head.byte_len as u64;
    if position >= len {
        return Ok(ReadOutcome::EndOfFile);
    }

    let block_size = device.block_size();
    let mut block_buf = vec![0u8; block_size];
    let mut bytes_read = 0;
    let mut current = position;

    while bytes_read < buffer.len() && current < len {
        let index = (current / block_size as u64) as usize;
        let offset = (current % block_size as u64) as usize;
        device.read_block(content_block(head, index)?, &mut block_buf)?;

        let n = (block_size - offset)
            .min(buffer.len() - bytes_read)
            .min((len - current) as usize);
        buffer[bytes_read..bytes_read + n].copy_from_slice(&block_buf[offset..offset + n]);
        bytes_read += n;
        current += n as u64;
    }

    Ok(ReadOutcome::Data(bytes_read))
}

/// Zeroes `[from, to)`, the hole a write beyond the end of file leaves behind.
/// Blocks at or past `old_count` were just allocated and are written whole.
fn zero_gap(
    device: &impl BlockDevice,
    head: &FileHead,
    from: u64,
    to: u64,
    old_count: usize,
) -> Result<()> {
    let block_size = device.block_size() as u64;
    let mut block_buf = vec![0u8; block_size as usize];

    let first = (from / block_size) as usize;
    if from % block_size != 0 && first < old_count {
        device.read_block(content_block(head, first)?, &mut block_buf)?;
        let start = (from % block_size) as usize;
        let end = (to - first as u64 * block_size).min(block_size) as usize;
        block_buf[start..end].fill(0);
        device.write_block(content_block(head, first)?, &block_buf)?;
        block_buf.fill(0);
    }

    let last = (to / block_size) as usize; // the write itself starts in this block
    for index in old_count.max(first)..last {
        device.write_block(content_block(head, index)?, &block_buf)?;
    }
    Ok(())
}

/// Fills the head's content blocks for a write at `position`. The block list
/// must already cover `position + buffer.len()`.
fn write_content(
    device: &impl BlockDevice,
    head: &FileHead,
    position: u64,
    buffer: &[u8],
    old_count: usize,
) -> Result<usize> {
    let block_size = device.block_size();
    let old_len = head.byte_len as u64;
    if position > old_len {
        zero_gap(device, head, old_len, position, old_count)?;
    }

    let mut block_buf = vec![0u8; block_size];
    let mut written = 0;
    let mut current = position;
    while written < buffer.len() {
        let index = (current / block_size as u64) as usize;
        let offset = (current % block_size as u64) as usize;
        let n = (block_size - offset).min(buffer.len() - written);
        let block = content_block(head, index)?;

        if n == block_size {
            device.write_block(block, &buffer[written..written + n])?;
        } else {
            if index >= old_count {
                block_buf.fill(0);
            } else {
                device.read_block(block, &mut block_buf)?;
            }
            block_buf[offset..offset + n].copy_from_slice(&buffer[written..written + n]);
            device.write_block(block, &block_buf)?;
        }
        written += n;
        current += n as u64;
    }
    Ok(written)
}

/// Writes `buffer` at `position`, growing the block list first.
/// On any error the head's length and block lists are left as they were and
/// the blocks this call allocated are released.
pub fn write_at(
    device: &impl BlockDevice,
    allocator: &mut BlockAllocator,
    head: &mut FileHead,
    position: u64,
    buffer: &[u8],
    max_file_blocks: u32,
) -> Result<usize> {
    if buffer.is_empty() {
        return Ok(0);
    }

    let block_size = device.block_size();
    let end = position.saturating_add(buffer.len() as u64);
    let needed = end.div_ceil(block_size as u64);
    if needed > max_file_blocks as u64 || end > u32::MAX as u64 {
        return Err(Error::TooLarge {
            requested: needed,
            max: max_file_blocks as u64,
        });
    }
    let needed = needed as usize;

    let old_len = head.byte_len;
    let old_count = head.blocks.len();
    let old_chain = head.chain.len();
    if needed > old_count {
        let chain_extra =
            chain_len(block_size, head.name.len(), needed).saturating_sub(old_chain);
        let fresh = allocator.allocate_many(needed - old_count + chain_extra)?;
        let (content, chain) = fresh.split_at(needed - old_count);
        head.blocks.extend_from_slice(content);
        head.chain.extend_from_slice(chain);
        trace!(
            "grew {:?} by {} content and {} overflow blocks",
            head.name,
            content.len(),
            chain.len()
        );
    }

    let result = write_content(device, head, position, buffer, old_count).and_then(|written| {
        head.byte_len = (old_len as u64).max(end) as u32;
        serialize(device, allocator, head).map(|()| written)
    });
    if result.is_err() {
        head.byte_len = old_len;
        for block in head.blocks.drain(old_count..).chain(head.chain.drain(old_chain..)) {
            allocator.free(block);
        }
        trace!("rolled {:?} back to {} blocks after a failed write", head.name, old_count);
    }
    result
}

/// Shrinks the head to `new_size` bytes, freeing trailing blocks.
/// Never grows the file. Returns `position` clamped to the new size.
pub fn truncate(
    device: &impl BlockDevice,
    allocator: &mut BlockAllocator,
    head: &mut FileHead,
    position: u64,
    new_size: u64,
) -> Result<u64> {
    if new_size < head.byte_len as u64 {
        let keep = new_size.div_ceil(device.block_size() as u64) as usize;
        while head.blocks.len() > keep {
            if let Some(block) = head.blocks.pop() {
                allocator.free(block);
            }
        }
        head.byte_len = new_size as u32;
        serialize(device, allocator, head)?;
    }
    Ok(position.min(new_size))
}

/// Reads the whole content of a head.
pub fn read_all(device: &impl BlockDevice, head: &FileHead) -> Result<Vec<u8>> {
    let mut out = vec![0u8; head.byte_len as usize];
    if let ReadOutcome::Data(n) = read_at(device, head, 0, &mut out)? {
        out.truncate(n);
    }
    Ok(out)
}

/// Replaces the whole content of a head with `bytes`.
pub fn rewrite(
    device: &impl BlockDevice,
    allocator: &mut BlockAllocator,
    head: &mut FileHead,
    bytes: &[u8],
    max_file_blocks: u32,
) -> Result<()> {
    write_at(device, allocator, head, 0, bytes, max_file_blocks)?;
    truncate(device, allocator, head, 0, bytes.len() as u64)?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::head::deserialize;
    use crate::{FileKind, MemDevice};

    const BS: usize = 512;

    fn setup(capacity: u32) -> (MemDevice, BlockAllocator, FileHead) {
        let dev = MemDevice::new(BS, capacity as usize);
        let mut alloc = BlockAllocator::new(capacity);
        let address = alloc.allocate().unwrap();
        (dev, alloc, FileHead::new("f", FileKind::Regular, address))
    }

    #[test]
    fn read_stops_at_byte_length() {
        let (dev, mut alloc, mut head) = setup(16);
        // Leave garbage after the end of file inside the block.
        write_at(&dev, &mut alloc, &mut head, 0, &[9u8; 100], u32::MAX / BS as u32).unwrap();
        truncate(&dev, &mut alloc, &mut head, 0, 10).unwrap();

        let mut buf = [0u8; 64];
        assert_eq!(read_at(&dev, &head, 0, &mut buf).unwrap(), ReadOutcome::Data(10));
        assert_eq!(read_at(&dev, &head, 10, &mut buf).unwrap(), ReadOutcome::EndOfFile);
    }

    #[test]
    fn write_across_block_boundary() {
        let (dev, mut alloc, mut head) = setup(16);
        let data: Vec<u8> = (0..1000u32).map(|i| i as u8).collect();
        assert_eq!(write_at(&dev, &mut alloc, &mut head, 300, &data, 100).unwrap(), 1000);
        assert_eq!(head.byte_len(), 1300);
        assert_eq!(head.blocks().len(), 3);

        let mut buf = vec![0u8; 1000];
        assert_eq!(read_at(&dev, &head, 300, &mut buf).unwrap(), ReadOutcome::Data(1000));
        assert_eq!(buf, data);
        // The head on disk matches the head in memory after every write.
        assert_eq!(deserialize(&dev, head.address()).unwrap(), head);
    }

    #[test]
    fn gap_reads_back_as_zero() {
        let (dev, mut alloc, mut head) = setup(16);
        write_at(&dev, &mut alloc, &mut head, 0, &[0xEE; 600], 100).unwrap();
        truncate(&dev, &mut alloc, &mut head, 0, 3).unwrap();
        write_at(&dev, &mut alloc, &mut head, 1500, &[1, 2, 3], 100).unwrap();

        let mut buf = vec![0xAAu8; 1503];
        assert_eq!(read_at(&dev, &head, 0, &mut buf).unwrap(), ReadOutcome::Data(1503));
        assert_eq!(&buf[..3], &[0xEE; 3]);
        assert!(buf[3..1500].iter().all(|&b| b == 0));
        assert_eq!(&buf[1500..], &[1, 2, 3]);
    }

    #[test]
    fn out_of_space_leaves_head_untouched() {
        let (dev, mut alloc, mut head) = setup(4);
        write_at(&dev, &mut alloc, &mut head, 0, &[1; 10], 100).unwrap();
        let before = head.clone();
        let used = alloc.used();

        let err = write_at(&dev, &mut alloc, &mut head, 0, &[2; 5 * BS], 100).unwrap_err();
        assert!(matches!(err, Error::OutOfSpace));
        assert_eq!(head, before);
        assert_eq!(alloc.used(), used);
    }

    #[test]
    fn too_large_is_checked_before_allocation() {
        let (dev, mut alloc, mut head) = setup(16);
        let err = write_at(&dev, &mut alloc, &mut head, 0, &[1; 3 * BS + 1], 3).unwrap_err();
        assert!(matches!(err, Error::TooLarge { requested: 4, max: 3 }));
        assert_eq!(alloc.used(), 1);
    }

    #[test]
    fn truncate_frees_and_clamps() {
        let (dev, mut alloc, mut head) = setup(16);
        write_at(&dev, &mut alloc, &mut head, 0, &[5; 4 * BS], 100).unwrap();
        assert_eq!(alloc.used(), 5);
        assert_eq!(truncate(&dev, &mut alloc, &mut head, 2000, 700).unwrap(), 700);
        assert_eq!(head.blocks().len(), 2);
        assert_eq!(alloc.used(), 3);
        // Growing through truncate is a no-op.
        assert_eq!(truncate(&dev, &mut alloc, &mut head, 10, 5000).unwrap(), 10);
        assert_eq!(head.byte_len(), 700);
    }

    #[test]
    fn rewrite_shrinks_content() {
        let (dev, mut alloc, mut head) = setup(16);
        rewrite(&dev, &mut alloc, &mut head, &[1; 1000], 100).unwrap();
        rewrite(&dev, &mut alloc, &mut head, &[2; 4], 100).unwrap();
        assert_eq!(read_all(&dev, &head).unwrap(), vec![2; 4]);
        assert_eq!(head.blocks().len(), 1);
    }
}
