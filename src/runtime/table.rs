//! Function reference tables

use super::store::FuncAddr;
use super::Trap;
use crate::parser::module::{Limits, TableType, ValueType};

/// A resizable sequence of nullable function references. The size never
/// passes the declared maximum.
#[derive(Debug, Clone)]
pub struct Table {
    elements: Vec<Option<FuncAddr>>,
    max: Option<u32>,
}

impl Table {
    /// Create a table of `limits.min` null entries
    pub fn new(table_type: &TableType) -> Self {
        Table {
            elements: vec![None; table_type.limits.min as usize],
            max: table_type.limits.max,
        }
    }

    pub fn size(&self) -> u32 {
        self.elements.len() as u32
    }

    pub fn ref_type(&self) -> ValueType {
        ValueType::FuncRef
    }

    /// Limits as seen by an importer: the current size is the minimum.
    pub fn limits(&self) -> Limits {
        Limits {
            min: self.size(),
            max: self.max,
        }
    }

    pub fn table_type(&self) -> TableType {
        TableType {
            ref_type: self.ref_type(),
            limits: self.limits(),
        }
    }

    pub fn get(&self, index: u32) -> Result<Option<FuncAddr>, Trap> {
        self.elements
            .get(index as usize)
            .copied()
            .ok_or(Trap::TableOutOfBounds {
                index,
                size: self.size(),
            })
    }

    /// Every slot in index order, null ones included
    pub fn entries(&self) -> impl Iterator<Item = Option<FuncAddr>> + '_ {
        self.elements.iter().copied()
    }

    /// Whether `len` entries starting at `offset` fit in the table
    pub fn fits(&self, offset: u32, len: usize) -> bool {
        (offset as u64) + (len as u64) <= self.elements.len() as u64
    }

    /// Copy `entries` in at `offset`. Writes nothing if they do not fit.
    pub fn init(&mut self, offset: u32, entries: &[Option<FuncAddr>]) -> Result<(), Trap> {
        if !self.fits(offset, entries.len()) {
            return Err(Trap::TableOutOfBounds {
                index: offset.saturating_add(entries.len() as u32),
                size: self.size(),
            });
        }
        let start = offset as usize;
        self.elements[start..start + entries.len()].copy_from_slice(entries);
        Ok(())
    }
}
