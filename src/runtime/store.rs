//! The Store: every runtime entity, addressed by index
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                        Store                          │
//! │  functions: [0] Host { add }                          │
//! │             [1] Interpreted { instance A, body 0 }    │
//! │             [2] <released>                            │
//! │  tables:    [0] funcref × 4                           │
//! │  memories:  [0] 1 page                                │
//! │  globals:   [0] mut i32                               │
//! └───────────────────────────────────────────────────────┘
//!         ▲                         ▲
//!   ModuleInstance A          Imports / ExternValue
//!   (address vectors)         (single addresses)
//! ```
//!
//! Entries are owned by value in four arenas. Instances, imports and exports
//! only ever hold addresses. An address is never reused: releasing an
//! instance leaves a tombstone in each slot it owned, and any later use of
//! such an address traps with [`Trap::DanglingAddress`].
//!
//! Dropping a [`ModuleInstance`] queues its entries for release; the queue
//! is drained at the next outermost [`Store::instantiate`] or
//! [`Store::call`], or explicitly with [`Store::reclaim`].

use std::cell::RefCell;
use std::ops::Range;
use std::rc::Rc;

use log::debug;

use super::executor;
use super::host::HostFunc;
use super::imports::{ExternValue, Imports};
use super::instance::{self, InstanceRecord, ModuleInstance};
use super::{ExportError, Global, InstantiationError, InstantiationTrap, Memory, Table, Trap, Value};
use crate::parser::module::{FunctionType, GlobalType, MemoryType, Module, TableType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncAddr(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableAddr(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemoryAddr(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlobalAddr(pub usize);

/// Resource limits applied to everything running in a Store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    /// Frames (interpreted and host) that may be active at once
    pub max_call_depth: usize,
    /// Instructions one outermost `invoke` may execute; `None` is unlimited
    pub instruction_budget: Option<u64>,
    /// Host ceiling on memory size in pages, below the declared maximum
    pub max_memory_pages: Option<u32>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            max_call_depth: 1024,
            instruction_budget: None,
            max_memory_pages: None,
        }
    }
}

impl StoreConfig {
    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    pub fn with_instruction_budget(mut self, budget: u64) -> Self {
        self.instruction_budget = Some(budget);
        self
    }

    pub fn with_max_memory_pages(mut self, pages: u32) -> Self {
        self.max_memory_pages = Some(pages);
        self
    }
}

/// A function in the Store: either bytecode of some instance or a host
/// callback. The set of kinds is closed so call sites can match exhaustively.
#[derive(Debug, Clone)]
pub enum FunctionInstance {
    Interpreted {
        func_type: FunctionType,
        /// Address space of the defining instance
        instance: Rc<InstanceRecord>,
        /// Index into the module's code section
        body_idx: usize,
    },
    Host {
        func_type: FunctionType,
        host: HostFunc,
    },
}

impl FunctionInstance {
    pub fn func_type(&self) -> &FunctionType {
        match self {
            FunctionInstance::Interpreted { func_type, .. } | FunctionInstance::Host { func_type, .. } => func_type,
        }
    }
}

/// Arena lengths at one point in time. Everything allocated between two
/// marks belongs to one instantiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct AllocMark {
    pub functions: usize,
    pub tables: usize,
    pub memories: usize,
    pub globals: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct AllocRange {
    pub start: AllocMark,
    pub end: AllocMark,
}

/// Ranges of instances dropped since the last reclaim
pub(crate) type ReleaseQueue = Rc<RefCell<Vec<AllocRange>>>;

pub struct Store {
    config: StoreConfig,
    functions: Vec<Option<FunctionInstance>>,
    tables: Vec<Option<Table>>,
    memories: Vec<Option<Memory>>,
    globals: Vec<Option<Global>>,
    /// Active frames across all nested engine runs
    pub(crate) depth: usize,
    /// Remaining instructions of the current outermost invoke
    pub(crate) fuel: Option<u64>,
    dropped: ReleaseQueue,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    pub fn with_config(config: StoreConfig) -> Self {
        Store {
            config,
            functions: Vec::new(),
            tables: Vec::new(),
            memories: Vec::new(),
            globals: Vec::new(),
            depth: 0,
            fuel: None,
            dropped: ReleaseQueue::default(),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /* ALLOCATION *************************************************/

    pub fn alloc_host_function(&mut self, host: HostFunc) -> FuncAddr {
        let func_type = host.func_type().clone();
        self.push_function(FunctionInstance::Host { func_type, host })
    }

    pub fn alloc_table(&mut self, table_type: TableType) -> TableAddr {
        self.push_table(Table::new(&table_type))
    }

    pub fn alloc_memory(&mut self, memory_type: MemoryType) -> Result<MemoryAddr, InstantiationTrap> {
        let memory = self.new_memory(&memory_type)?;
        Ok(self.push_memory(memory))
    }

    /// Allocate a global holding `value`, which must be of the declared type.
    pub fn alloc_global(&mut self, global_type: GlobalType, value: Value) -> Result<GlobalAddr, Trap> {
        let global = Global::new(global_type, value).ok_or_else(|| Trap::ArgumentMismatch {
            expected: global_type.value_type.to_string(),
            actual: value.typ().to_string(),
        })?;
        Ok(self.push_global(global))
    }

    pub(crate) fn new_memory(&self, memory_type: &MemoryType) -> Result<Memory, InstantiationTrap> {
        let limits = memory_type.limits;
        if let Some(ceiling) = self.config.max_memory_pages {
            if limits.min > ceiling {
                return Err(InstantiationTrap::ResourceLimit(format!(
                    "memory of {} pages exceeds the host limit of {} pages",
                    limits.min, ceiling
                )));
            }
        }
        Memory::new(limits).ok_or_else(|| {
            InstantiationTrap::ResourceLimit(format!("cannot allocate memory of {} pages", limits.min))
        })
    }

    pub(crate) fn push_function(&mut self, function: FunctionInstance) -> FuncAddr {
        self.functions.push(Some(function));
        FuncAddr(self.functions.len() - 1)
    }

    pub(crate) fn push_table(&mut self, table: Table) -> TableAddr {
        self.tables.push(Some(table));
        TableAddr(self.tables.len() - 1)
    }

    pub(crate) fn push_memory(&mut self, memory: Memory) -> MemoryAddr {
        self.memories.push(Some(memory));
        MemoryAddr(self.memories.len() - 1)
    }

    pub(crate) fn push_global(&mut self, global: Global) -> GlobalAddr {
        self.globals.push(Some(global));
        GlobalAddr(self.globals.len() - 1)
    }

    pub(crate) fn mark(&self) -> AllocMark {
        AllocMark {
            functions: self.functions.len(),
            tables: self.tables.len(),
            memories: self.memories.len(),
            globals: self.globals.len(),
        }
    }

    /// Tombstone every entry allocated inside `range`.
    pub(crate) fn tombstone(&mut self, range: AllocRange) {
        fn clear<T>(slots: &mut [Option<T>], range: Range<usize>) {
            let end = range.end.min(slots.len());
            for slot in &mut slots[range.start.min(end)..end] {
                *slot = None;
            }
        }
        let AllocRange { start, end } = range;
        clear(&mut self.functions, start.functions..end.functions);
        clear(&mut self.tables, start.tables..end.tables);
        clear(&mut self.memories, start.memories..end.memories);
        clear(&mut self.globals, start.globals..end.globals);
    }

    pub(crate) fn release_queue(&self) -> ReleaseQueue {
        Rc::clone(&self.dropped)
    }

    /// Tombstone the entries of every instance dropped since the last
    /// reclaim. Does nothing while a call is running.
    pub fn reclaim(&mut self) {
        if self.depth > 0 {
            return;
        }
        let ranges = match self.dropped.try_borrow_mut() {
            Ok(mut queue) => std::mem::take(&mut *queue),
            Err(_) => return,
        };
        for range in ranges {
            debug!("reclaiming dropped instance: functions {:?}", range.start.functions..range.end.functions);
            self.tombstone(range);
        }
    }

    /* ACCESS *****************************************************/

    pub fn function(&self, addr: FuncAddr) -> Result<&FunctionInstance, Trap> {
        self.functions
            .get(addr.0)
            .and_then(Option::as_ref)
            .ok_or(Trap::DanglingAddress {
                kind: "function",
                index: addr.0,
            })
    }

    pub fn function_type(&self, addr: FuncAddr) -> Result<&FunctionType, Trap> {
        Ok(self.function(addr)?.func_type())
    }

    pub fn table(&self, addr: TableAddr) -> Result<&Table, Trap> {
        self.tables
            .get(addr.0)
            .and_then(Option::as_ref)
            .ok_or(Trap::DanglingAddress {
                kind: "table",
                index: addr.0,
            })
    }

    pub fn table_mut(&mut self, addr: TableAddr) -> Result<&mut Table, Trap> {
        self.tables
            .get_mut(addr.0)
            .and_then(Option::as_mut)
            .ok_or(Trap::DanglingAddress {
                kind: "table",
                index: addr.0,
            })
    }

    pub fn memory(&self, addr: MemoryAddr) -> Result<&Memory, Trap> {
        self.memories
            .get(addr.0)
            .and_then(Option::as_ref)
            .ok_or(Trap::DanglingAddress {
                kind: "memory",
                index: addr.0,
            })
    }

    pub fn memory_mut(&mut self, addr: MemoryAddr) -> Result<&mut Memory, Trap> {
        self.memories
            .get_mut(addr.0)
            .and_then(Option::as_mut)
            .ok_or(Trap::DanglingAddress {
                kind: "memory",
                index: addr.0,
            })
    }

    pub fn global(&self, addr: GlobalAddr) -> Result<&Global, Trap> {
        self.globals
            .get(addr.0)
            .and_then(Option::as_ref)
            .ok_or(Trap::DanglingAddress {
                kind: "global",
                index: addr.0,
            })
    }

    pub fn global_value(&self, addr: GlobalAddr) -> Result<Value, Trap> {
        Ok(self.global(addr)?.get())
    }

    /// Host-side write of a mutable global. Immutable globals and values of
    /// the wrong type are rejected.
    pub fn set_global(&mut self, addr: GlobalAddr, value: Value) -> Result<(), Trap> {
        let global = self
            .globals
            .get_mut(addr.0)
            .and_then(Option::as_mut)
            .ok_or(Trap::DanglingAddress {
                kind: "global",
                index: addr.0,
            })?;
        let global_type = global.global_type();
        if !global_type.mutable {
            return Err(Trap::ImmutableGlobal(addr.0));
        }
        if value.typ() != global_type.value_type {
            return Err(Trap::TypeMismatch {
                opcode: "global.set",
                expected: global_type.value_type,
                actual: value.typ(),
            });
        }
        global.set_unchecked(value);
        Ok(())
    }

    /// False once the entry behind `value` has been released.
    pub(crate) fn is_live(&self, value: ExternValue) -> bool {
        match value {
            ExternValue::Function(addr) => self.function(addr).is_ok(),
            ExternValue::Table(addr) => self.table(addr).is_ok(),
            ExternValue::Memory(addr) => self.memory(addr).is_ok(),
            ExternValue::Global(addr) => self.global(addr).is_ok(),
        }
    }

    /// Number of function slots ever allocated, released ones included
    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    pub fn memory_count(&self) -> usize {
        self.memories.len()
    }

    pub fn global_count(&self) -> usize {
        self.globals.len()
    }

    /* EMBEDDING API **********************************************/

    /// Link and initialize `module`. On any failure nothing allocated by
    /// this call stays reachable.
    pub fn instantiate(&mut self, module: Rc<Module>, imports: &Imports) -> Result<ModuleInstance, InstantiationError> {
        self.reclaim();
        instance::instantiate(self, module, imports)
    }

    pub fn get_export(&self, instance: &ModuleInstance, name: &str) -> Result<ExternValue, ExportError> {
        instance
            .export(name)
            .ok_or_else(|| ExportError::NotFound(name.to_string()))
    }

    /// Call the exported function `name` of `instance`.
    pub fn invoke(&mut self, instance: &ModuleInstance, name: &str, args: &[Value]) -> Result<Vec<Value>, Trap> {
        let value = self
            .get_export(instance, name)
            .map_err(|_| Trap::UnknownExport(name.to_string()))?;
        let addr = value
            .as_function()
            .ok_or_else(|| Trap::NotAFunction(name.to_string()))?;
        debug!("invoke {} (function {})", name, addr.0);
        self.call(addr, args)
    }

    /// Call any function by address, interpreted or host.
    pub fn call(&mut self, addr: FuncAddr, args: &[Value]) -> Result<Vec<Value>, Trap> {
        self.reclaim();
        executor::execute(self, addr, args)
    }

    /// Drop an instance and tombstone the entries it allocated right away.
    /// Entries it imported are untouched; other instances that imported its
    /// exports will trap if they use them.
    pub fn release(&mut self, mut instance: ModuleInstance) {
        let range = instance.take_owned();
        debug!(
            "releasing instance: functions {:?}, tables {:?}, memories {:?}, globals {:?}",
            range.start.functions..range.end.functions,
            range.start.tables..range.end.tables,
            range.start.memories..range.end.memories,
            range.start.globals..range.end.globals
        );
        self.tombstone(range);
    }

    /// Charge one instruction against the budget of the current invoke.
    #[inline]
    pub(crate) fn consume_fuel(&mut self) -> Result<(), Trap> {
        match self.fuel.as_mut() {
            None => Ok(()),
            Some(0) => Err(Trap::InstructionBudgetExhausted),
            Some(fuel) => {
                *fuel -= 1;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::module::{Limits, ValueType};
    use crate::runtime::HostFunc;

    #[test]
    fn test_config_builder() {
        let config = StoreConfig::default()
            .with_max_call_depth(10)
            .with_instruction_budget(500)
            .with_max_memory_pages(2);
        assert_eq!(config.max_call_depth, 10);
        assert_eq!(config.instruction_budget, Some(500));
        assert_eq!(config.max_memory_pages, Some(2));
        assert_eq!(StoreConfig::default().max_call_depth, 1024);
    }

    #[test]
    fn test_allocations_get_sequential_addresses() {
        let mut store = Store::new();
        let f0 = store.alloc_host_function(HostFunc::wrap("a", || {}));
        let f1 = store.alloc_host_function(HostFunc::wrap("b", || {}));
        assert_eq!((f0, f1), (FuncAddr(0), FuncAddr(1)));

        let m = store
            .alloc_memory(MemoryType {
                limits: Limits { min: 1, max: None },
            })
            .unwrap();
        assert_eq!(m, MemoryAddr(0));
        assert_eq!(store.memory(m).unwrap().size(), 1);
        assert!(store.memory(MemoryAddr(1)).is_err());
    }

    #[test]
    fn test_memory_ceiling_applies_to_allocation() {
        let mut store = Store::with_config(StoreConfig::default().with_max_memory_pages(1));
        let result = store.alloc_memory(MemoryType {
            limits: Limits { min: 2, max: None },
        });
        assert!(matches!(result, Err(InstantiationTrap::ResourceLimit(_))));
    }

    #[test]
    fn test_globals() {
        let mut store = Store::new();
        let mutable = GlobalType {
            value_type: ValueType::I32,
            mutable: true,
        };
        let constant = GlobalType {
            value_type: ValueType::I32,
            mutable: false,
        };
        let g = store.alloc_global(mutable, Value::I32(1)).unwrap();
        let c = store.alloc_global(constant, Value::I32(2)).unwrap();
        assert!(store.alloc_global(constant, Value::F32(2.0)).is_err());

        store.set_global(g, Value::I32(5)).unwrap();
        assert_eq!(store.global_value(g), Ok(Value::I32(5)));
        assert_eq!(store.set_global(c, Value::I32(3)), Err(Trap::ImmutableGlobal(c.0)));
        assert!(matches!(
            store.set_global(g, Value::I64(3)),
            Err(Trap::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_tombstones_are_never_reused() {
        let mut store = Store::new();
        let start = store.mark();
        let f = store.alloc_host_function(HostFunc::wrap("a", || {}));
        let end = store.mark();
        store.tombstone(AllocRange { start, end });

        assert_eq!(
            store.function(f).map(|_| ()),
            Err(Trap::DanglingAddress {
                kind: "function",
                index: 0
            })
        );
        assert!(!store.is_live(ExternValue::Function(f)));
        let g = store.alloc_host_function(HostFunc::wrap("b", || {}));
        assert_eq!(g, FuncAddr(1));
        assert_eq!(store.function_count(), 2);
    }

    #[test]
    fn test_reclaim_waits_for_outermost_call() {
        let mut store = Store::new();
        let start = store.mark();
        let f = store.alloc_host_function(HostFunc::wrap("a", || {}));
        let end = store.mark();
        store.release_queue().borrow_mut().push(AllocRange { start, end });

        store.depth = 1;
        store.reclaim();
        assert!(store.function(f).is_ok());

        store.depth = 0;
        store.reclaim();
        assert!(store.function(f).is_err());
        assert!(store.release_queue().borrow().is_empty());
    }

    #[test]
    fn test_fuel() {
        let mut store = Store::new();
        assert!(store.consume_fuel().is_ok());
        store.fuel = Some(1);
        assert!(store.consume_fuel().is_ok());
        assert_eq!(store.consume_fuel(), Err(Trap::InstructionBudgetExhausted));
    }
}
