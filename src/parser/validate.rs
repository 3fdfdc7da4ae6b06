//! Structural validation of a decoded module.
//!
//! Checks that every index refers to something that exists, that constant
//! expressions have the right type, that branch depths stay inside their
//! enclosing blocks and that immutable globals are never assigned. Operand
//! types are not checked here; the engine traps on a mismatch instead.

use std::collections::HashSet;

use thiserror::Error;

use super::instruction::{BlockType, InstructionKind};
use super::limits::MAX_MEMORY_PAGES;
use super::module::{
    ConstExpr, DataMode, ElementMode, ExportIndex, ExternalKind, FunctionBody, Limits, Module,
    ValueType,
};
use super::DecodeError;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("unknown type {0}")]
    UnknownType(u32),

    #[error("unknown function {0}")]
    UnknownFunction(u32),

    #[error("unknown table {0}")]
    UnknownTable(u32),

    #[error("unknown memory {0}")]
    UnknownMemory(u32),

    #[error("unknown global {0}")]
    UnknownGlobal(u32),

    #[error("unknown local {local} in function {func}")]
    UnknownLocal { func: u32, local: u32 },

    #[error("unknown label {label} in function {func}")]
    UnknownLabel { func: u32, label: u32 },

    #[error("global is immutable: {0}")]
    ImmutableGlobal(u32),

    #[error("multiple {0}")]
    Multiple(&'static str),

    #[error("duplicate export name {0:?}")]
    DuplicateExport(String),

    #[error("start function {0} must have type () -> ()")]
    StartFunction(u32),

    #[error("size minimum must not be greater than maximum")]
    LimitsOrder,

    #[error("memory size must be at most 65536 pages (4GiB)")]
    MemoryTooLarge,

    #[error("alignment must not be larger than natural")]
    BadAlignment,
}

impl From<ValidationError> for DecodeError {
    fn from(err: ValidationError) -> Self {
        DecodeError::Validation(err.to_string())
    }
}

pub fn validate_module(module: &Module) -> Result<(), ValidationError> {
    let total_functions = module.total_functions();

    for import in &module.imports {
        match &import.external_kind {
            ExternalKind::Function(type_idx) => check_type_index(module, *type_idx)?,
            ExternalKind::Table(table_type) => check_limits(&table_type.limits)?,
            ExternalKind::Memory(memory_type) => check_memory_limits(&memory_type.limits)?,
            ExternalKind::Global(_) => {}
        }
    }
    for type_idx in &module.functions {
        check_type_index(module, *type_idx)?;
    }

    if module.total_tables() > 1 {
        return Err(ValidationError::Multiple("tables"));
    }
    if module.total_memories() > 1 {
        return Err(ValidationError::Multiple("memories"));
    }
    for table in &module.tables {
        check_limits(&table.limits)?;
    }
    for memory in &module.memories {
        check_memory_limits(&memory.limits)?;
    }

    let imported_globals = module.imported_globals().count() as u32;
    for (idx, global) in module.globals.iter().enumerate() {
        // initializers may only read globals defined before them
        let visible = imported_globals + idx as u32;
        let actual = const_expr_type(module, &global.init, visible)?;
        if actual != global.global_type.value_type {
            return Err(ValidationError::TypeMismatch(format!(
                "global {} is {} but its initializer is {}",
                visible, global.global_type.value_type, actual
            )));
        }
    }

    let mut names = HashSet::new();
    for export in &module.exports {
        if !names.insert(export.name.as_str()) {
            return Err(ValidationError::DuplicateExport(export.name.clone()));
        }
        match export.index {
            ExportIndex::Function(idx) if idx >= total_functions => {
                return Err(ValidationError::UnknownFunction(idx))
            }
            ExportIndex::Table(idx) if idx >= module.total_tables() => {
                return Err(ValidationError::UnknownTable(idx))
            }
            ExportIndex::Memory(idx) if idx >= module.total_memories() => {
                return Err(ValidationError::UnknownMemory(idx))
            }
            ExportIndex::Global(idx) if idx >= module.total_globals() => {
                return Err(ValidationError::UnknownGlobal(idx))
            }
            _ => {}
        }
    }

    if let Some(start) = module.start {
        let func_type = module
            .function_type(start)
            .ok_or(ValidationError::UnknownFunction(start))?;
        if !func_type.parameters.is_empty() || !func_type.return_types.is_empty() {
            return Err(ValidationError::StartFunction(start));
        }
    }

    for element in &module.elements {
        if let ElementMode::Active { table_index, offset } = &element.mode {
            if *table_index >= module.total_tables() {
                return Err(ValidationError::UnknownTable(*table_index));
            }
            expect_offset_type(module, offset)?;
        }
        for init in &element.init {
            let actual = const_expr_type(module, init, module.total_globals())?;
            if actual != ValueType::FuncRef {
                return Err(ValidationError::TypeMismatch(format!(
                    "element entry is {}, expected funcref",
                    actual
                )));
            }
        }
    }

    for data in &module.data {
        if let DataMode::Active { memory_index, offset } = &data.mode {
            if *memory_index >= module.total_memories() {
                return Err(ValidationError::UnknownMemory(*memory_index));
            }
            expect_offset_type(module, offset)?;
        }
    }

    let imported_functions = module.imported_functions().count() as u32;
    for (idx, body) in module.code.iter().enumerate() {
        validate_body(module, imported_functions + idx as u32, body)?;
    }

    Ok(())
}

fn check_type_index(module: &Module, type_idx: u32) -> Result<(), ValidationError> {
    if (type_idx as usize) < module.types.len() {
        Ok(())
    } else {
        Err(ValidationError::UnknownType(type_idx))
    }
}

fn check_limits(limits: &Limits) -> Result<(), ValidationError> {
    match limits.max {
        Some(max) if max < limits.min => Err(ValidationError::LimitsOrder),
        _ => Ok(()),
    }
}

fn check_memory_limits(limits: &Limits) -> Result<(), ValidationError> {
    if limits.min > MAX_MEMORY_PAGES || limits.max.map_or(false, |max| max > MAX_MEMORY_PAGES) {
        return Err(ValidationError::MemoryTooLarge);
    }
    check_limits(limits)
}

/// Type produced by a constant expression that may read the first
/// `visible_globals` globals of the index space.
fn const_expr_type(
    module: &Module,
    expr: &ConstExpr,
    visible_globals: u32,
) -> Result<ValueType, ValidationError> {
    Ok(match expr {
        ConstExpr::I32(_) => ValueType::I32,
        ConstExpr::I64(_) => ValueType::I64,
        ConstExpr::F32(_) => ValueType::F32,
        ConstExpr::F64(_) => ValueType::F64,
        ConstExpr::RefNull => ValueType::FuncRef,
        ConstExpr::RefFunc(func_idx) => {
            if *func_idx >= module.total_functions() {
                return Err(ValidationError::UnknownFunction(*func_idx));
            }
            ValueType::FuncRef
        }
        ConstExpr::GlobalGet(global_idx) => {
            if *global_idx >= visible_globals {
                return Err(ValidationError::UnknownGlobal(*global_idx));
            }
            module
                .global_type(*global_idx)
                .ok_or(ValidationError::UnknownGlobal(*global_idx))?
                .value_type
        }
    })
}

fn expect_offset_type(module: &Module, offset: &ConstExpr) -> Result<(), ValidationError> {
    match const_expr_type(module, offset, module.total_globals())? {
        ValueType::I32 => Ok(()),
        actual => Err(ValidationError::TypeMismatch(format!(
            "segment offset is {}, expected i32",
            actual
        ))),
    }
}

/// log2 of the access width of a load or store.
fn natural_alignment(instruction: &InstructionKind) -> u32 {
    use InstructionKind::*;
    match instruction {
        I32Load8S { .. } | I32Load8U { .. } | I64Load8S { .. } | I64Load8U { .. }
        | I32Store8 { .. } | I64Store8 { .. } => 0,
        I32Load16S { .. } | I32Load16U { .. } | I64Load16S { .. } | I64Load16U { .. }
        | I32Store16 { .. } | I64Store16 { .. } => 1,
        I32Load { .. } | F32Load { .. } | I64Load32S { .. } | I64Load32U { .. }
        | I32Store { .. } | F32Store { .. } | I64Store32 { .. } => 2,
        _ => 3,
    }
}

fn validate_body(module: &Module, func_idx: u32, body: &FunctionBody) -> Result<(), ValidationError> {
    let func_type = module
        .function_type(func_idx)
        .ok_or(ValidationError::UnknownFunction(func_idx))?;
    let total_locals = func_type.parameters.len() as u64 + body.locals.len();
    let has_memory = module.total_memories() > 0;

    // the function body itself is label 0 when nothing else is open
    let mut depth: u32 = 0;
    let check_label = |label: u32, depth: u32| {
        if label > depth {
            Err(ValidationError::UnknownLabel { func: func_idx, label })
        } else {
            Ok(())
        }
    };
    let check_local = |local: u32| {
        if (local as u64) < total_locals {
            Ok(())
        } else {
            Err(ValidationError::UnknownLocal { func: func_idx, local })
        }
    };

    for instruction in &body.instructions {
        use InstructionKind::*;
        match instruction {
            Block { block_type } | Loop { block_type } | If { block_type } => {
                if let BlockType::FuncType(type_idx) = block_type {
                    check_type_index(module, *type_idx)?;
                }
                depth += 1;
            }
            End => depth = depth.saturating_sub(1),
            Br { label_idx } | BrIf { label_idx } => check_label(*label_idx, depth)?,
            BrTable { labels, default } => {
                for label in labels {
                    check_label(*label, depth)?;
                }
                check_label(*default, depth)?;
            }
            Call { func_idx } | RefFunc { func_idx } => {
                if *func_idx >= module.total_functions() {
                    return Err(ValidationError::UnknownFunction(*func_idx));
                }
            }
            CallIndirect { type_idx, table_idx } => {
                check_type_index(module, *type_idx)?;
                if *table_idx >= module.total_tables() {
                    return Err(ValidationError::UnknownTable(*table_idx));
                }
            }
            LocalGet { local_idx } | LocalSet { local_idx } | LocalTee { local_idx } => {
                check_local(*local_idx)?
            }
            GlobalGet { global_idx } => {
                if module.global_type(*global_idx).is_none() {
                    return Err(ValidationError::UnknownGlobal(*global_idx));
                }
            }
            GlobalSet { global_idx } => {
                let global_type = module
                    .global_type(*global_idx)
                    .ok_or(ValidationError::UnknownGlobal(*global_idx))?;
                if !global_type.mutable {
                    return Err(ValidationError::ImmutableGlobal(*global_idx));
                }
            }
            MemorySize | MemoryGrow | MemoryCopy | MemoryFill if !has_memory => {
                return Err(ValidationError::UnknownMemory(0))
            }
            _ => {
                if let Some(memarg) = instruction.memarg() {
                    if !has_memory {
                        return Err(ValidationError::UnknownMemory(0));
                    }
                    if memarg.align > natural_alignment(instruction) {
                        return Err(ValidationError::BadAlignment);
                    }
                }
            }
        }
    }

    Ok(())
}
