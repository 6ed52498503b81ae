//! On-disk layout of file heads.
//!
//! Primary block:
//! `[nameLength:4][name][next:4][byteLength:4][isDirectory:1][blockCount:4][block...]`
//!
//! Overflow block, used when the block list does not fit in the primary:
//! `[next:4][block...]`
//!
//! `next` is the address of the following overflow block, or `CHAIN_END` on
//! the last one. All integers are big-endian.

use log::trace;

use crate::bitmap::BlockAllocator;
use crate::config::*;
use crate::{BlockDevice, Error, FileHead, FileKind, Result};

/// How many block addresses fit in a primary block after a name of `name_len` bytes.
pub fn primary_capacity(block_size: usize, name_len: usize) -> usize {
    block_size.saturating_sub(HEAD_FIXED_SIZE + name_len) / ADDRESS_SIZE
}

/// How many block addresses fit in one overflow block.
pub fn overflow_capacity(block_size: usize) -> usize {
    (block_size - CHAIN_FIXED_SIZE) / ADDRESS_SIZE
}

/// Number of overflow blocks needed for a head holding `count` content blocks.
pub fn chain_len(block_size: usize, name_len: usize, count: usize) -> usize {
    let first = primary_capacity(block_size, name_len);
    if count <= first {
        0
    } else {
        (count - first).div_ceil(overflow_capacity(block_size))
    }
}

fn put_u32(buf: &mut [u8], at: &mut usize, value: u32) {
    buf[*at..*at + 4].copy_from_slice(&value.to_be_bytes());
    *at += 4;
}

/// Encodes a head into one buffer per header block, primary first.
/// The head's overflow chain must already have the length the block list needs.
pub fn encode(head: &FileHead, block_size: usize) -> Result<Vec<Vec<u8>>> {
    let name = head.name.as_bytes();
    if name.len() > MAX_NAME_LEN {
        return Err(Error::InvalidName(head.name.clone()));
    }
    if head.chain.len() != chain_len(block_size, name.len(), head.blocks.len()) {
        return Err(Error::InvalidState("header chain length does not match the block list"));
    }

    let next_of = |i: usize| head.chain.get(i).copied().unwrap_or(CHAIN_END);
    let mut out = Vec::with_capacity(1 + head.chain.len());

    let mut primary = vec![0u8; block_size];
    let mut at = 0;
    put_u32(&mut primary, &mut at, name.len() as u32);
    primary[at..at + name.len()].copy_from_slice(name);
    at += name.len();
    put_u32(&mut primary, &mut at, next_of(0));
    put_u32(&mut primary, &mut at, head.byte_len);
    primary[at] = head.kind as u8;
    at += 1;
    put_u32(&mut primary, &mut at, head.blocks.len() as u32);

    let first = primary_capacity(block_size, name.len()).min(head.blocks.len());
    for &block in &head.blocks[..first] {
        put_u32(&mut primary, &mut at, block);
    }
    out.push(primary);

    for (i, chunk) in head.blocks[first..]
        .chunks(overflow_capacity(block_size))
        .enumerate()
    {
        let mut overflow = vec![0u8; block_size];
        let mut at = 0;
        put_u32(&mut overflow, &mut at, next_of(i + 1));
        for &block in chunk {
            put_u32(&mut overflow, &mut at, block);
        }
        out.push(overflow);
    }

    Ok(out)
}

struct Reader<'a> {
    buf: &'a [u8],
    at: usize,
    address: u32,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8], address: u32) -> Self {
        Self { buf, at: 0, address }
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.at + n;
        let slice = self.buf.get(self.at..end).ok_or_else(|| Error::Corruption {
            address: self.address,
            detail: format!("header field at offset {} runs past the block", self.at),
        })?;
        self.at = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        let raw = self.bytes(4)?;
        Ok(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn addresses(&mut self, n: usize, into: &mut Vec<u32>) -> Result<()> {
        for _ in 0..n {
            into.push(self.u32()?);
        }
        Ok(())
    }
}

/// Decodes the head stored at `address`. `next_block` loads an overflow block by address.
pub fn decode(
    address: u32,
    primary: &[u8],
    mut next_block: impl FnMut(u32) -> Result<Vec<u8>>,
) -> Result<FileHead> {
    let block_size = primary.len();
    let corrupt = |detail: String| Error::Corruption { address, detail };

    let mut reader = Reader::new(primary, address);
    let name_len = reader.u32()? as usize;
    if name_len > MAX_NAME_LEN {
        return Err(corrupt(format!("name length {name_len} exceeds {MAX_NAME_LEN}")));
    }
    let name = core::str::from_utf8(reader.bytes(name_len)?)
        .map_err(|_| corrupt("name is not valid UTF-8".into()))?
        .to_owned();
    let mut next = reader.u32()?;
    let byte_len = reader.u32()?;
    let kind_byte = reader.u8()?;
    let kind = FileKind::from_byte(kind_byte)
        .ok_or_else(|| corrupt(format!("unknown kind byte {kind_byte}")))?;
    let count = reader.u32()?;

    let expected_blocks = (byte_len as u64).div_ceil(block_size as u64);
    if count as u64 != expected_blocks {
        return Err(corrupt(format!(
            "{count} content blocks recorded for a length of {byte_len} bytes"
        )));
    }

    let count = count as usize;
    let mut blocks = Vec::with_capacity(count);
    reader.addresses(primary_capacity(block_size, name_len).min(count), &mut blocks)?;

    let max_chain = chain_len(block_size, name_len, count);
    let mut chain = Vec::with_capacity(max_chain);
    let mut last = address;
    while blocks.len() < count {
        if next == CHAIN_END || chain.len() >= max_chain {
            return Err(Error::MalformedChain {
                address: last,
                expected: count as u32,
                found: blocks.len() as u32,
            });
        }
        let buf = next_block(next)?;
        chain.push(next);
        last = next;

        let mut reader = Reader::new(&buf, next);
        next = reader.u32()?;
        let take = overflow_capacity(block_size).min(count - blocks.len());
        reader.addresses(take, &mut blocks)?;
    }
    if next != CHAIN_END {
        return Err(Error::Corruption {
            address: last,
            detail: format!("header chain continues to block {next} after the last address"),
        });
    }

    Ok(FileHead {
        name,
        kind,
        byte_len,
        blocks,
        address,
        chain,
    })
}

/// Writes a head to its primary block and overflow chain, first growing or
/// shrinking the chain to fit the current block list.
pub fn serialize(
    device: &impl BlockDevice,
    allocator: &mut BlockAllocator,
    head: &mut FileHead,
) -> Result<()> {
    let block_size = device.block_size();
    let wanted = chain_len(block_size, head.name.len(), head.blocks.len());
    while head.chain.len() > wanted {
        if let Some(block) = head.chain.pop() {
            allocator.free(block);
        }
    }
    if head.chain.len() < wanted {
        let extra = allocator.allocate_many(wanted - head.chain.len())?;
        head.chain.extend(extra);
    }

    let encoded = encode(head, block_size)?;
    // Chain first, so the primary never points at an overflow block that was not written yet.
    for (block, buf) in head.chain.iter().zip(encoded.iter().skip(1)) {
        device.write_block(*block, buf)?;
    }
    device.write_block(head.address, &encoded[0])?;
    trace!(
        "wrote head {:?} at block {} ({} content blocks, {} overflow blocks)",
        head.name,
        head.address,
        head.blocks.len(),
        head.chain.len()
    );
    Ok(())
}

/// Reads the head whose primary block is `address`, following its chain.
pub fn deserialize(device: &impl BlockDevice, address: u32) -> Result<FileHead> {
    let block_size = device.block_size();
    let mut primary = vec![0u8; block_size];
    device.read_block(address, &mut primary)?;
    decode(address, &primary, |block| {
        let mut buf = vec![0u8; block_size];
        device.read_block(block, &mut buf)?;
        Ok(buf)
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::MemDevice;

    const BS: usize = 512;

    fn decode_all(encoded: &[Vec<u8>], head: &FileHead) -> Result<FileHead> {
        decode(head.address, &encoded[0], |block| {
            let i = head.chain.iter().position(|&b| b == block).unwrap();
            Ok(encoded[i + 1].clone())
        })
    }

    #[test]
    fn capacities() {
        assert_eq!(primary_capacity(BS, 4), (512 - 17 - 4) / 4);
        assert_eq!(overflow_capacity(BS), 127);
        assert_eq!(chain_len(BS, 4, 122), 0);
        assert_eq!(chain_len(BS, 4, 123), 1);
        assert_eq!(chain_len(BS, 4, 122 + 127), 1);
        assert_eq!(chain_len(BS, 4, 122 + 128), 2);
    }

    #[test]
    fn single_block_layout_is_big_endian() {
        let head = FileHead::with_blocks("ab", FileKind::Directory, 3, 600, vec![5, 6]);
        let encoded = encode(&head, BS).unwrap();
        assert_eq!(encoded.len(), 1);
        let b = &encoded[0];
        assert_eq!(&b[0..4], &[0, 0, 0, 2]);
        assert_eq!(&b[4..6], b"ab");
        assert_eq!(&b[6..10], &[0xFF; 4]);
        assert_eq!(&b[10..14], &600u32.to_be_bytes());
        assert_eq!(b[14], 1);
        assert_eq!(&b[15..19], &[0, 0, 0, 2]);
        assert_eq!(&b[19..23], &[0, 0, 0, 5]);
        assert_eq!(&b[23..27], &[0, 0, 0, 6]);
    }

    #[test]
    fn encode_decode_with_overflow() {
        let blocks: Vec<u32> = (1000..1300).rev().collect();
        let mut head = FileHead::with_blocks(
            "test",
            FileKind::Regular,
            0,
            (300 * BS - 7) as u32,
            blocks,
        );
        head.chain = vec![40, 41, 42];
        assert_eq!(chain_len(BS, 4, 300), 2);
        assert!(encode(&head, BS).is_err());
        head.chain.truncate(2);

        let encoded = encode(&head, BS).unwrap();
        assert_eq!(encoded.len(), 3);
        assert_eq!(decode_all(&encoded, &head).unwrap(), head);
    }

    #[test]
    fn early_chain_end_is_malformed() {
        let blocks: Vec<u32> = (0..200).collect();
        let mut head = FileHead::with_blocks("x", FileKind::Regular, 0, (200 * BS) as u32, blocks);
        head.chain = vec![77];
        let mut encoded = encode(&head, BS).unwrap();
        // Cut the chain after the primary block.
        let at = 4 + 1;
        encoded[0][at..at + 4].copy_from_slice(&CHAIN_END.to_be_bytes());
        let err = decode_all(&encoded, &head).unwrap_err();
        assert!(matches!(
            err,
            Error::MalformedChain { address: 0, expected: 200, .. }
        ));
    }

    #[test]
    fn rejects_inconsistent_length() {
        let head = FileHead::with_blocks("x", FileKind::Regular, 0, 10, vec![1, 2]);
        let encoded = encode(&head, BS).unwrap();
        assert!(matches!(
            decode_all(&encoded, &head),
            Err(Error::Corruption { address: 0, .. })
        ));
    }

    #[test]
    fn serialize_grows_and_shrinks_chain() {
        let dev = MemDevice::new(BS, 64);
        let mut alloc = BlockAllocator::new(64);
        let address = alloc.allocate().unwrap();

        let blocks: Vec<u32> = (100..400).collect();
        let mut head = FileHead::with_blocks("big", FileKind::Regular, address, (300 * BS) as u32, blocks);
        serialize(&dev, &mut alloc, &mut head).unwrap();
        assert_eq!(head.chain.len(), 2);
        assert_eq!(alloc.used(), 3);
        assert_eq!(deserialize(&dev, address).unwrap(), head);

        head.blocks.truncate(10);
        head.byte_len = (10 * BS) as u32;
        serialize(&dev, &mut alloc, &mut head).unwrap();
        assert!(head.chain.is_empty());
        assert_eq!(alloc.used(), 1);
        assert_eq!(deserialize(&dev, address).unwrap(), head);
    }
}
