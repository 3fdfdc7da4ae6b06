//! Linear memory
//!
//! A byte buffer sized in 64KiB pages. Every access is bounds-checked
//! against the current size; addresses are 33-bit effective addresses
//! (`u32` base plus `u32` offset) so the sum can never wrap.

use byteorder::{ByteOrder, LittleEndian};

use super::Trap;
use crate::parser::module::Limits;

/// WebAssembly page size in bytes (64KiB)
pub const PAGE_SIZE: usize = 65536;

/// Maximum number of pages addressable with 32-bit indices (4GiB)
pub const MAX_PAGES: u32 = 65536;

#[derive(Debug)]
pub struct Memory {
    data: Vec<u8>,
    max_pages: Option<u32>,
}

impl Memory {
    /// Allocate `limits.min` zeroed pages. Returns `None` if the host cannot
    /// provide the bytes or the limits exceed the addressable range.
    pub fn new(limits: Limits) -> Option<Self> {
        if limits.min > MAX_PAGES || limits.max.map_or(false, |max| max < limits.min) {
            return None;
        }
        let bytes = limits.min as usize * PAGE_SIZE;
        let mut data = Vec::new();
        data.try_reserve_exact(bytes).ok()?;
        data.resize(bytes, 0);
        Some(Memory {
            data,
            max_pages: limits.max,
        })
    }

    /// Current size in pages
    pub fn size(&self) -> u32 {
        (self.data.len() / PAGE_SIZE) as u32
    }

    /// Current size in bytes
    pub fn byte_len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn max_pages(&self) -> Option<u32> {
        self.max_pages
    }

    /// Limits as seen by an importer: the current size is the minimum.
    pub fn limits(&self) -> Limits {
        Limits {
            min: self.size(),
            max: self.max_pages,
        }
    }

    /// Grow by `delta` pages, returning the previous size, or -1 when the
    /// result would pass the declared maximum, the host `ceiling` or the
    /// addressable range, or the allocation fails. Growth is all or nothing.
    pub fn grow(&mut self, delta: u32, ceiling: Option<u32>) -> i32 {
        let current = self.size();
        let Some(new_pages) = current.checked_add(delta) else {
            return -1;
        };
        let limit = [self.max_pages, ceiling]
            .into_iter()
            .flatten()
            .fold(MAX_PAGES, u32::min);
        if new_pages > limit {
            return -1;
        }
        let new_bytes = new_pages as usize * PAGE_SIZE;
        if self.data.try_reserve_exact(new_bytes - self.data.len()).is_err() {
            return -1;
        }
        self.data.resize(new_bytes, 0);
        current as i32
    }

    /// Start of a `width` byte access at `address`, or a trap if any byte of
    /// it lies outside the memory.
    #[inline]
    fn check(&self, address: u64, width: u64) -> Result<usize, Trap> {
        match address.checked_add(width) {
            Some(end) if end <= self.byte_len() => Ok(address as usize),
            _ => Err(Trap::MemoryOutOfBounds {
                address,
                width,
                size: self.byte_len(),
            }),
        }
    }

    pub fn read_u8(&self, address: u64) -> Result<u8, Trap> {
        let at = self.check(address, 1)?;
        Ok(self.data[at])
    }

    pub fn read_u16(&self, address: u64) -> Result<u16, Trap> {
        let at = self.check(address, 2)?;
        Ok(LittleEndian::read_u16(&self.data[at..]))
    }

    pub fn read_u32(&self, address: u64) -> Result<u32, Trap> {
        let at = self.check(address, 4)?;
        Ok(LittleEndian::read_u32(&self.data[at..]))
    }

    pub fn read_u64(&self, address: u64) -> Result<u64, Trap> {
        let at = self.check(address, 8)?;
        Ok(LittleEndian::read_u64(&self.data[at..]))
    }

    pub fn write_u8(&mut self, address: u64, value: u8) -> Result<(), Trap> {
        let at = self.check(address, 1)?;
        self.data[at] = value;
        Ok(())
    }

    pub fn write_u16(&mut self, address: u64, value: u16) -> Result<(), Trap> {
        let at = self.check(address, 2)?;
        LittleEndian::write_u16(&mut self.data[at..], value);
        Ok(())
    }

    pub fn write_u32(&mut self, address: u64, value: u32) -> Result<(), Trap> {
        let at = self.check(address, 4)?;
        LittleEndian::write_u32(&mut self.data[at..], value);
        Ok(())
    }

    pub fn write_u64(&mut self, address: u64, value: u64) -> Result<(), Trap> {
        let at = self.check(address, 8)?;
        LittleEndian::write_u64(&mut self.data[at..], value);
        Ok(())
    }

    pub fn read_bytes(&self, address: u64, len: usize) -> Result<&[u8], Trap> {
        let at = self.check(address, len as u64)?;
        Ok(&self.data[at..at + len])
    }

    pub fn write_bytes(&mut self, address: u64, bytes: &[u8]) -> Result<(), Trap> {
        let at = self.check(address, bytes.len() as u64)?;
        self.data[at..at + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// `memory.fill`: traps before writing anything if the range is out of bounds.
    pub fn fill(&mut self, address: u64, value: u8, len: u64) -> Result<(), Trap> {
        let at = self.check(address, len)?;
        self.data[at..at + len as usize].fill(value);
        Ok(())
    }

    /// `memory.copy`: overlapping ranges behave as if copied through a buffer.
    pub fn copy_within(&mut self, dst: u64, src: u64, len: u64) -> Result<(), Trap> {
        let from = self.check(src, len)?;
        let to = self.check(dst, len)?;
        self.data.copy_within(from..from + len as usize, to);
        Ok(())
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}
