//! Import maps and extern values

use std::collections::HashMap;
use std::fmt;

use super::instance::ModuleInstance;
use super::store::{FuncAddr, GlobalAddr, MemoryAddr, Store, TableAddr};
use super::ExportError;

/// Anything that can be imported or exported: an address into the Store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExternValue {
    Function(FuncAddr),
    Table(TableAddr),
    Memory(MemoryAddr),
    Global(GlobalAddr),
}

impl ExternValue {
    pub fn kind(&self) -> &'static str {
        match self {
            ExternValue::Function(_) => "function",
            ExternValue::Table(_) => "table",
            ExternValue::Memory(_) => "memory",
            ExternValue::Global(_) => "global",
        }
    }

    pub fn as_function(&self) -> Option<FuncAddr> {
        match self {
            ExternValue::Function(addr) => Some(*addr),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<TableAddr> {
        match self {
            ExternValue::Table(addr) => Some(*addr),
            _ => None,
        }
    }

    pub fn as_memory(&self) -> Option<MemoryAddr> {
        match self {
            ExternValue::Memory(addr) => Some(*addr),
            _ => None,
        }
    }

    pub fn as_global(&self) -> Option<GlobalAddr> {
        match self {
            ExternValue::Global(addr) => Some(*addr),
            _ => None,
        }
    }
}

impl fmt::Display for ExternValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExternValue::Function(addr) => write!(f, "function@{}", addr.0),
            ExternValue::Table(addr) => write!(f, "table@{}", addr.0),
            ExternValue::Memory(addr) => write!(f, "memory@{}", addr.0),
            ExternValue::Global(addr) => write!(f, "global@{}", addr.0),
        }
    }
}

/// Host-supplied map from `(module, name)` to the value satisfying that import
#[derive(Debug, Clone, Default)]
pub struct Imports {
    items: HashMap<(String, String), ExternValue>,
}

impl Imports {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define (or replace) one import
    pub fn define(&mut self, module: impl Into<String>, name: impl Into<String>, value: ExternValue) -> &mut Self {
        self.items.insert((module.into(), name.into()), value);
        self
    }

    /// Builder form of [`Imports::define`]
    pub fn with(mut self, module: impl Into<String>, name: impl Into<String>, value: ExternValue) -> Self {
        self.define(module, name, value);
        self
    }

    pub fn get(&self, module: &str, name: &str) -> Option<ExternValue> {
        self.items.get(&(module.to_string(), name.to_string())).copied()
    }

    /// Make every export of `instance` importable under `module`, so one
    /// instance can link against another.
    pub fn define_instance(
        &mut self,
        store: &Store,
        module: &str,
        instance: &ModuleInstance,
    ) -> Result<&mut Self, ExportError> {
        for name in instance.export_names() {
            let value = store.get_export(instance, name)?;
            self.define(module, name, value);
        }
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, ExternValue)> + '_ {
        self.items
            .iter()
            .map(|((module, name), value)| (module.as_str(), name.as_str(), *value))
    }
}
