//! Free-space tracking for the backing extent.
//! One bit per block; allocation scans forward from the last allocated block
//! and wraps around, so freed blocks get picked up again without a free list.

use log::trace;

use crate::Error;

/// The allocator could not satisfy a request. A normal outcome, not a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exhausted;

impl From<Exhausted> for Error {
    fn from(_: Exhausted) -> Self {
        Error::OutOfSpace
    }
}

#[derive(Debug, Clone)]
pub struct BlockAllocator {
    bits: Vec<u8>,
    capacity: u32,
    used: u32,
    cursor: u32,
}

fn bit_get(bits: &[u8], idx: u32) -> bool {
    bits[(idx / 8) as usize] & (1 << (idx % 8)) != 0
}

fn bit_set(bits: &mut [u8], idx: u32, value: bool) {
    let byte = &mut bits[(idx / 8) as usize];
    if value {
        *byte |= 1 << (idx % 8);
    } else {
        *byte &= !(1 << (idx % 8));
    }
}

impl BlockAllocator {
    pub fn new(capacity: u32) -> Self {
        Self {
            bits: vec![0; capacity.div_ceil(8) as usize],
            capacity,
            used: 0,
            cursor: 0,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn free_count(&self) -> u32 {
        self.capacity - self.used
    }

    pub fn is_used(&self, addr: u32) -> bool {
        addr < self.capacity && bit_get(&self.bits, addr)
    }

    /// Claims the next free block after the last one handed out.
    /// Caller must have checked that at least one block is free.
    fn take_next(&mut self) -> u32 {
        while bit_get(&self.bits, self.cursor) {
            self.cursor = (self.cursor + 1) % self.capacity;
        }
        let addr = self.cursor;
        bit_set(&mut self.bits, addr, true);
        self.used += 1;
        addr
    }

    pub fn allocate(&mut self) -> Result<u32, Exhausted> {
        if self.used == self.capacity {
            return Err(Exhausted);
        }
        let addr = self.take_next();
        trace!("allocated block {addr}");
        Ok(addr)
    }

    /// All-or-nothing: either `n` distinct blocks or nothing changes.
    pub fn allocate_many(&mut self, n: usize) -> Result<Vec<u32>, Exhausted> {
        if n > self.free_count() as usize {
            return Err(Exhausted);
        }
        let blocks: Vec<u32> = (0..n).map(|_| self.take_next()).collect();
        trace!("allocated {n} blocks");
        Ok(blocks)
    }

    /// Returns a block to the pool. Freeing a free or out-of-range block is a no-op.
    pub fn free(&mut self, addr: u32) {
        if self.is_used(addr) {
            bit_set(&mut self.bits, addr, false);
            self.used -= 1;
            trace!("freed block {addr}");
        }
    }

    /// Marks a specific block as used, as recovery does for every reachable block.
    /// Returns false if the address is out of range or already taken.
    pub fn mark_used(&mut self, addr: u32) -> bool {
        if addr >= self.capacity || bit_get(&self.bits, addr) {
            return false;
        }
        bit_set(&mut self.bits, addr, true);
        self.used += 1;
        true
    }
}
