//! Runtime: the Store, instantiation and the execution engine
//!
//! A [`Store`] owns every function, table, memory and global ever allocated.
//! Instances, imports and exports refer to those entries by address only.
//! [`Store::instantiate`] links a decoded module against an [`Imports`] map
//! and [`Store::invoke`] runs one of its exports to completion or to a
//! [`Trap`].

pub mod control;
pub mod executor;
pub mod frame;
pub mod global;
pub mod host;
pub mod imports;
pub mod instance;
pub mod memory;
pub mod ops;
pub mod stack;
pub mod store;
pub mod table;
pub mod test_utils;
pub mod value;

pub use global::Global;
pub use host::{HostError, HostFunc, WasmType};
pub use imports::{ExternValue, Imports};
pub use instance::ModuleInstance;
pub use memory::Memory;
pub use store::{FuncAddr, FunctionInstance, GlobalAddr, MemoryAddr, Store, StoreConfig, TableAddr};
pub use table::Table;
pub use value::Value;

use crate::parser::module::{FunctionType, GlobalType, ValueType};

/// A runtime fault. Aborts the current `invoke` without corrupting the Store;
/// side effects of instructions completed before the fault are kept.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Trap {
    #[error("unreachable")]
    Unreachable,
    #[error("integer divide by zero")]
    IntegerDivideByZero,
    #[error("integer overflow")]
    IntegerOverflow,
    #[error("invalid conversion to integer")]
    InvalidConversionToInteger,
    #[error("out of bounds memory access: address {address} width {width} memory size {size}")]
    MemoryOutOfBounds { address: u64, width: u64, size: u64 },
    #[error("out of bounds table access: index {index} table size {size}")]
    TableOutOfBounds { index: u32, size: u32 },
    #[error("uninitialized element {index}")]
    UndefinedElement { index: u32 },
    #[error("indirect call type mismatch: expected {expected}, got {actual}")]
    IndirectCallTypeMismatch {
        expected: FunctionType,
        actual: FunctionType,
    },
    #[error("call stack exhausted at depth {depth}")]
    CallStackExhausted { depth: usize },
    #[error("instruction budget exhausted")]
    InstructionBudgetExhausted,
    #[error("operand stack underflow in {opcode}")]
    StackUnderflow { opcode: &'static str },
    #[error("type mismatch in {opcode}: expected {expected}, got {actual}")]
    TypeMismatch {
        opcode: &'static str,
        expected: ValueType,
        actual: ValueType,
    },
    #[error("global {0} is immutable")]
    ImmutableGlobal(usize),
    #[error("invalid {kind} index {index}")]
    InvalidIndex { kind: &'static str, index: u32 },
    #[error("host function {function} failed: {message}")]
    Host { function: String, message: String },
    #[error("host function {function} returned {actual}, declared {expected}")]
    HostResultMismatch {
        function: String,
        expected: String,
        actual: String,
    },
    #[error("argument mismatch: expected {expected}, got {actual}")]
    ArgumentMismatch { expected: String, actual: String },
    #[error("unknown export {0:?}")]
    UnknownExport(String),
    #[error("export {0:?} is not a function")]
    NotAFunction(String),
    #[error("dangling {kind} address {index}")]
    DanglingAddress { kind: &'static str, index: usize },
    #[error("{0} is not a numeric instruction")]
    NotNumeric(&'static str),
}

impl Trap {
    /// Attach the executing opcode to operand-stack faults raised below the
    /// instruction level.
    pub(crate) fn at(self, opcode: &'static str) -> Trap {
        match self {
            Trap::StackUnderflow { opcode: "" } => Trap::StackUnderflow { opcode },
            Trap::TypeMismatch {
                opcode: "",
                expected,
                actual,
            } => Trap::TypeMismatch {
                opcode,
                expected,
                actual,
            },
            other => other,
        }
    }
}

/// An import could not be resolved against the supplied [`Imports`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LinkError {
    #[error("unknown import {module}.{name}")]
    MissingImport { module: String, name: String },
    #[error("incompatible import type for {module}.{name}: expected {expected}, got {actual}")]
    KindMismatch {
        module: String,
        name: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("incompatible import type for {module}.{name}: expected func {expected}, got {actual}")]
    FunctionTypeMismatch {
        module: String,
        name: String,
        expected: FunctionType,
        actual: FunctionType,
    },
    #[error("incompatible import type for {module}.{name}: expected limits {expected}, got {actual}")]
    IncompatibleLimits {
        module: String,
        name: String,
        expected: String,
        actual: String,
    },
    #[error("incompatible import type for {module}.{name}: expected global {expected}, got {actual}")]
    GlobalTypeMismatch {
        module: String,
        name: String,
        expected: GlobalType,
        actual: GlobalType,
    },
    #[error("import {module}.{name} refers to a released {kind}")]
    DanglingImport {
        module: String,
        name: String,
        kind: &'static str,
    },
}

/// A failure while initializing a linked module, before it became runnable.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InstantiationTrap {
    #[error("out of bounds table access: element segment {segment} writes {len} entries at {offset}, table size {size}")]
    ElementSegmentOutOfBounds {
        segment: usize,
        offset: u32,
        len: usize,
        size: u32,
    },
    #[error("out of bounds memory access: data segment {segment} writes {len} bytes at {offset}, memory size {size}")]
    DataSegmentOutOfBounds {
        segment: usize,
        offset: u32,
        len: usize,
        size: u64,
    },
    #[error("constant expression: {0}")]
    ConstantExpression(String),
    #[error("resource limit exceeded: {0}")]
    ResourceLimit(String),
}

/// Why [`Store::instantiate`] gave up, by phase.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InstantiationError {
    #[error("link error: {0}")]
    Link(#[from] LinkError),
    #[error("instantiation trap: {0}")]
    Init(#[from] InstantiationTrap),
    #[error("start function trapped: {0}")]
    Start(Trap),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExportError {
    #[error("unknown export {0:?}")]
    NotFound(String),
}
