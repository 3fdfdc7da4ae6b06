//! Module instances and instantiation
//!
//! Instantiating a module runs in two phases:
//!
//! 1. **Linking** resolves every import against the supplied [`Imports`] and
//!    checks it against the declared type. Nothing is allocated until every
//!    import has been resolved, so a [`LinkError`] leaves the Store as it was.
//! 2. **Initializing** allocates the module's own functions, tables,
//!    memories and globals, evaluates global initializers, bounds-checks
//!    every active element and data segment and only then writes them, and
//!    finally runs the start function.
//!
//! If initialization fails, every entry it allocated is tombstoned. Writes
//! already made through imported tables, memories or globals before a start
//! function traps are not rolled back. When one of those writes left a
//! reference to one of the instance's functions in an imported table or
//! global, the instance's entries stay live so that reference still works.

use std::rc::Rc;

use log::debug;

use super::imports::{ExternValue, Imports};
use super::store::{
    AllocMark, AllocRange, FuncAddr, FunctionInstance, GlobalAddr, MemoryAddr, ReleaseQueue, Store, TableAddr,
};
use super::{InstantiationError, InstantiationTrap, LinkError, Trap, Value};
use crate::parser::module::{ConstExpr, DataMode, ElementMode, ExportIndex, ExternalKind, Import, Module};

/// The address space of one instance: module index `i` of each kind maps
/// to entry `i` of the matching vector. Imports come first, in import order.
#[derive(Debug)]
pub struct InstanceRecord {
    module: Rc<Module>,
    pub(crate) funcs: Vec<FuncAddr>,
    pub(crate) tables: Vec<TableAddr>,
    pub(crate) memories: Vec<MemoryAddr>,
    pub(crate) globals: Vec<GlobalAddr>,
    exports: Vec<(String, ExternValue)>,
    /// Store entries allocated by (and released with) this instance
    owned: AllocRange,
}

impl InstanceRecord {
    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn func(&self, idx: u32) -> Result<FuncAddr, Trap> {
        self.funcs.get(idx as usize).copied().ok_or(Trap::InvalidIndex {
            kind: "function",
            index: idx,
        })
    }

    pub fn table(&self, idx: u32) -> Result<TableAddr, Trap> {
        self.tables.get(idx as usize).copied().ok_or(Trap::InvalidIndex {
            kind: "table",
            index: idx,
        })
    }

    pub fn memory(&self, idx: u32) -> Result<MemoryAddr, Trap> {
        self.memories.get(idx as usize).copied().ok_or(Trap::InvalidIndex {
            kind: "memory",
            index: idx,
        })
    }

    pub fn global(&self, idx: u32) -> Result<GlobalAddr, Trap> {
        self.globals.get(idx as usize).copied().ok_or(Trap::InvalidIndex {
            kind: "global",
            index: idx,
        })
    }
}

/// Handle to an instantiated module, returned by [`Store::instantiate`].
/// Dropping it queues what it allocated for release by its Store;
/// [`Store::release`] frees the entries immediately.
#[derive(Debug)]
pub struct ModuleInstance {
    record: Rc<InstanceRecord>,
    /// `None` once the entries have been handed back
    release: Option<ReleaseQueue>,
}

impl ModuleInstance {
    pub fn module(&self) -> &Module {
        self.record.module()
    }

    pub fn export(&self, name: &str) -> Option<ExternValue> {
        self.record
            .exports
            .iter()
            .find(|(export_name, _)| export_name == name)
            .map(|(_, value)| *value)
    }

    /// Export names in declaration order
    pub fn export_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.record.exports.iter().map(|(name, _)| name.as_str())
    }

    pub fn exports(&self) -> impl Iterator<Item = (&str, ExternValue)> + '_ {
        self.record.exports.iter().map(|(name, value)| (name.as_str(), *value))
    }

    /// Default memory (index 0), if the module has one
    pub fn memory(&self) -> Option<MemoryAddr> {
        self.record.memories.first().copied()
    }

    /// The entries this instance owns; dropping it afterwards frees nothing.
    pub(crate) fn take_owned(&mut self) -> AllocRange {
        self.release = None;
        self.record.owned
    }
}

impl Drop for ModuleInstance {
    fn drop(&mut self) {
        if let Some(queue) = self.release.take() {
            if let Ok(mut queue) = queue.try_borrow_mut() {
                queue.push(self.record.owned);
            }
        }
    }
}

/// Imports resolved to addresses, grouped by kind in import order
#[derive(Debug, Default)]
struct Resolved {
    funcs: Vec<FuncAddr>,
    tables: Vec<TableAddr>,
    memories: Vec<MemoryAddr>,
    globals: Vec<GlobalAddr>,
}

pub(crate) fn instantiate(
    store: &mut Store,
    module: Rc<Module>,
    imports: &Imports,
) -> Result<ModuleInstance, InstantiationError> {
    debug!("instantiating {}", module);
    let resolved = link(store, &module, imports)?;
    debug!(
        "linked {} imports: {} functions, {} tables, {} memories, {} globals",
        module.imports.len(),
        resolved.funcs.len(),
        resolved.tables.len(),
        resolved.memories.len(),
        resolved.globals.len()
    );

    let start = store.mark();
    let record = match initialize(store, module, resolved, start) {
        Ok(record) => record,
        Err(err) => {
            debug!("initialization failed, releasing partial allocations: {}", err);
            let end = store.mark();
            store.tombstone(AllocRange { start, end });
            return Err(err.into());
        }
    };

    if let Some(start_idx) = record.module().start {
        let result = record.func(start_idx).and_then(|addr| {
            debug!("running start function {} (function {})", start_idx, addr.0);
            store.call(addr, &[])
        });
        if let Err(trap) = result {
            debug!("start function trapped: {}", trap);
            if escapes_through_imports(store, &record) {
                debug!("imports refer to functions of the failed instance, keeping its entries");
            } else {
                store.tombstone(record.owned);
            }
            return Err(InstantiationError::Start(trap));
        }
    }

    debug!("instance ready with {} exports", record.exports.len());
    Ok(ModuleInstance {
        record,
        release: Some(store.release_queue()),
    })
}

/// Whether an imported table or global now holds a reference to one of the
/// instance's own functions.
fn escapes_through_imports(store: &Store, record: &InstanceRecord) -> bool {
    let owned = record.owned.start.functions..record.owned.end.functions;
    let module = record.module();

    let imported_tables = module.imported_tables().count();
    let in_tables = record.tables.iter().take(imported_tables).any(|addr| {
        store
            .table(*addr)
            .map_or(false, |table| table.entries().flatten().any(|func| owned.contains(&func.0)))
    });

    let imported_globals = module.imported_globals().count();
    let in_globals = record.globals.iter().take(imported_globals).any(|addr| {
        matches!(store.global_value(*addr), Ok(Value::FuncRef(Some(func))) if owned.contains(&func.0))
    });

    in_tables || in_globals
}

/* LINKING ****************************************************/

fn link(store: &Store, module: &Module, imports: &Imports) -> Result<Resolved, LinkError> {
    let mut resolved = Resolved::default();
    for import in &module.imports {
        let value = imports
            .get(&import.module, &import.name)
            .ok_or_else(|| LinkError::MissingImport {
                module: import.module.clone(),
                name: import.name.clone(),
            })?;
        if value.kind() != import.external_kind.name() {
            return Err(LinkError::KindMismatch {
                module: import.module.clone(),
                name: import.name.clone(),
                expected: import.external_kind.name(),
                actual: value.kind(),
            });
        }
        if !store.is_live(value) {
            return Err(LinkError::DanglingImport {
                module: import.module.clone(),
                name: import.name.clone(),
                kind: value.kind(),
            });
        }
        check_import(store, module, import, value)?;

        match value {
            ExternValue::Function(addr) => resolved.funcs.push(addr),
            ExternValue::Table(addr) => resolved.tables.push(addr),
            ExternValue::Memory(addr) => resolved.memories.push(addr),
            ExternValue::Global(addr) => resolved.globals.push(addr),
        }
    }
    Ok(resolved)
}

/// Check a live extern value of the right kind against the import's type.
fn check_import(store: &Store, module: &Module, import: &Import, value: ExternValue) -> Result<(), LinkError> {
    let dangling = || LinkError::DanglingImport {
        module: import.module.clone(),
        name: import.name.clone(),
        kind: value.kind(),
    };
    match (&import.external_kind, value) {
        (ExternalKind::Function(type_idx), ExternValue::Function(addr)) => {
            let expected = module.types.get(*type_idx as usize).cloned().unwrap_or_default();
            let actual = store.function_type(addr).map_err(|_| dangling())?;
            if *actual != expected {
                return Err(LinkError::FunctionTypeMismatch {
                    module: import.module.clone(),
                    name: import.name.clone(),
                    expected,
                    actual: actual.clone(),
                });
            }
        }
        (ExternalKind::Table(declared), ExternValue::Table(addr)) => {
            let actual = store.table(addr).map_err(|_| dangling())?.table_type();
            if actual.ref_type != declared.ref_type || !actual.limits.is_compatible_with(&declared.limits) {
                return Err(LinkError::IncompatibleLimits {
                    module: import.module.clone(),
                    name: import.name.clone(),
                    expected: declared.to_string(),
                    actual: actual.to_string(),
                });
            }
        }
        (ExternalKind::Memory(declared), ExternValue::Memory(addr)) => {
            let actual = store.memory(addr).map_err(|_| dangling())?.limits();
            if !actual.is_compatible_with(&declared.limits) {
                return Err(LinkError::IncompatibleLimits {
                    module: import.module.clone(),
                    name: import.name.clone(),
                    expected: declared.limits.to_string(),
                    actual: actual.to_string(),
                });
            }
        }
        (ExternalKind::Global(declared), ExternValue::Global(addr)) => {
            let actual = store.global(addr).map_err(|_| dangling())?.global_type();
            if actual != *declared {
                return Err(LinkError::GlobalTypeMismatch {
                    module: import.module.clone(),
                    name: import.name.clone(),
                    expected: *declared,
                    actual,
                });
            }
        }
        (kind, value) => {
            return Err(LinkError::KindMismatch {
                module: import.module.clone(),
                name: import.name.clone(),
                expected: kind.name(),
                actual: value.kind(),
            })
        }
    }
    Ok(())
}

/* INITIALIZATION *********************************************/

fn initialize(
    store: &mut Store,
    module: Rc<Module>,
    resolved: Resolved,
    start: AllocMark,
) -> Result<Rc<InstanceRecord>, InstantiationTrap> {
    let Resolved {
        mut funcs,
        mut tables,
        mut memories,
        mut globals,
    } = resolved;

    // Local functions are pushed once the record exists, but their
    // addresses are needed before that (ref.func in initializers, exports).
    let first_local = store.function_count();
    funcs.extend((0..module.functions.len()).map(|i| FuncAddr(first_local + i)));

    for table_type in &module.tables {
        tables.push(store.alloc_table(*table_type));
    }
    for memory_type in &module.memories {
        memories.push(store.alloc_memory(*memory_type)?);
    }
    for (idx, global) in module.globals.iter().enumerate() {
        let value = eval_const(store, &globals, &funcs, &global.init)?;
        let addr = store.alloc_global(global.global_type, value).map_err(|trap| {
            InstantiationTrap::ConstantExpression(format!("global {}: {}", idx, trap))
        })?;
        globals.push(addr);
    }

    let exports = module
        .exports
        .iter()
        .map(|export| {
            let value = match export.index {
                ExportIndex::Function(idx) => funcs.get(idx as usize).copied().map(ExternValue::Function),
                ExportIndex::Table(idx) => tables.get(idx as usize).copied().map(ExternValue::Table),
                ExportIndex::Memory(idx) => memories.get(idx as usize).copied().map(ExternValue::Memory),
                ExportIndex::Global(idx) => globals.get(idx as usize).copied().map(ExternValue::Global),
            };
            value
                .map(|value| (export.name.clone(), value))
                .ok_or_else(|| InstantiationTrap::ConstantExpression(format!("export {:?} out of range", export.name)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let end = AllocMark {
        functions: first_local + module.functions.len(),
        tables: store.table_count(),
        memories: store.memory_count(),
        globals: store.global_count(),
    };
    let record = Rc::new(InstanceRecord {
        module: Rc::clone(&module),
        funcs,
        tables,
        memories,
        globals,
        exports,
        owned: AllocRange { start, end },
    });

    for (body_idx, type_idx) in module.functions.iter().enumerate() {
        let func_type = module
            .types
            .get(*type_idx as usize)
            .cloned()
            .ok_or_else(|| InstantiationTrap::ConstantExpression(format!("unknown type {}", type_idx)))?;
        let addr = store.push_function(FunctionInstance::Interpreted {
            func_type,
            instance: Rc::clone(&record),
            body_idx,
        });
        debug_assert_eq!(addr, record.funcs[record.funcs.len() - module.functions.len() + body_idx]);
    }

    initialize_segments(store, &record)?;
    Ok(record)
}

/// A segment write that has passed its bounds check
enum SegmentWrite {
    Table {
        addr: TableAddr,
        offset: u32,
        entries: Vec<Option<FuncAddr>>,
    },
    Memory {
        addr: MemoryAddr,
        offset: u32,
        segment: usize,
    },
}

/// Check every active segment against its target, then write them all.
fn initialize_segments(store: &mut Store, record: &InstanceRecord) -> Result<(), InstantiationTrap> {
    let module = record.module();
    let mut writes = Vec::new();

    for (segment, element) in module.elements.iter().enumerate() {
        let ElementMode::Active { table_index, offset } = &element.mode else {
            continue;
        };
        let offset = eval_offset(store, record, offset)?;
        let entries = element
            .init
            .iter()
            .map(|expr| match eval_const(store, &record.globals, &record.funcs, expr)? {
                Value::FuncRef(addr) => Ok(addr),
                other => Err(InstantiationTrap::ConstantExpression(format!(
                    "element segment {} entry has type {}",
                    segment,
                    other.typ()
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?;
        let addr = record.table(*table_index).map_err(const_trap)?;
        let table = store.table(addr).map_err(const_trap)?;
        if !table.fits(offset, entries.len()) {
            return Err(InstantiationTrap::ElementSegmentOutOfBounds {
                segment,
                offset,
                len: entries.len(),
                size: table.size(),
            });
        }
        writes.push(SegmentWrite::Table { addr, offset, entries });
    }

    for (segment, data) in module.data.iter().enumerate() {
        let DataMode::Active { memory_index, offset } = &data.mode else {
            continue;
        };
        let offset = eval_offset(store, record, offset)?;
        let addr = record.memory(*memory_index).map_err(const_trap)?;
        let size = store.memory(addr).map_err(const_trap)?.byte_len();
        if offset as u64 + data.init.len() as u64 > size {
            return Err(InstantiationTrap::DataSegmentOutOfBounds {
                segment,
                offset,
                len: data.init.len(),
                size,
            });
        }
        writes.push(SegmentWrite::Memory { addr, offset, segment });
    }

    debug!("applying {} segments", writes.len());
    for write in writes {
        match write {
            SegmentWrite::Table { addr, offset, entries } => {
                store
                    .table_mut(addr)
                    .and_then(|table| table.init(offset, &entries))
                    .map_err(const_trap)?;
            }
            SegmentWrite::Memory { addr, offset, segment } => {
                let bytes = &module.data[segment].init;
                store
                    .memory_mut(addr)
                    .and_then(|memory| memory.write_bytes(offset as u64, bytes))
                    .map_err(const_trap)?;
            }
        }
    }
    Ok(())
}

fn const_trap(trap: Trap) -> InstantiationTrap {
    InstantiationTrap::ConstantExpression(trap.to_string())
}

/// Evaluate an initializer. `global.get` may only see the globals resolved
/// so far, which is the imports plus earlier definitions.
fn eval_const(
    store: &Store,
    globals: &[GlobalAddr],
    funcs: &[FuncAddr],
    expr: &ConstExpr,
) -> Result<Value, InstantiationTrap> {
    let value = match expr {
        ConstExpr::I32(v) => Value::I32(*v),
        ConstExpr::I64(v) => Value::I64(*v),
        ConstExpr::F32(v) => Value::F32(*v),
        ConstExpr::F64(v) => Value::F64(*v),
        ConstExpr::RefNull => Value::FuncRef(None),
        ConstExpr::RefFunc(idx) => {
            let addr = funcs.get(*idx as usize).ok_or_else(|| {
                InstantiationTrap::ConstantExpression(format!("ref.func {} out of range", idx))
            })?;
            Value::FuncRef(Some(*addr))
        }
        ConstExpr::GlobalGet(idx) => {
            let addr = globals.get(*idx as usize).ok_or_else(|| {
                InstantiationTrap::ConstantExpression(format!("global.get {} out of range", idx))
            })?;
            store.global_value(*addr).map_err(const_trap)?
        }
    };
    Ok(value)
}

fn eval_offset(store: &Store, record: &InstanceRecord, expr: &ConstExpr) -> Result<u32, InstantiationTrap> {
    match eval_const(store, &record.globals, &record.funcs, expr)? {
        Value::I32(offset) => Ok(offset as u32),
        other => Err(InstantiationTrap::ConstantExpression(format!(
            "segment offset has type {}",
            other.typ()
        ))),
    }
}
