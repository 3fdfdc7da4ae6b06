use std::fmt;

use super::instruction::{BlockType, InstructionKind};
use super::structure::BlockMap;
use super::DecodeError;

/// A decoded module. Immutable once produced by [`super::parse`]; shared
/// read-only (behind an `Rc`) by every instance created from it.
#[derive(Debug, Default)]
pub struct Module {
    pub magic: u32,
    pub version: u32,

    pub types: Vec<FunctionType>,
    pub imports: Vec<Import>,
    /// Type index of every locally defined function, in declaration order.
    pub functions: Vec<u32>,
    pub tables: Vec<TableType>,
    pub memories: Vec<MemoryType>,
    pub globals: Vec<Global>,
    pub exports: Vec<Export>,
    pub start: Option<u32>,
    pub elements: Vec<Element>,
    pub code: Vec<FunctionBody>,
    pub data: Vec<Data>,
    pub custom_sections: Vec<CustomSection>,
}

impl Module {
    pub fn imported_functions(&self) -> impl Iterator<Item = u32> + '_ {
        self.imports.iter().filter_map(|import| match import.external_kind {
            ExternalKind::Function(type_idx) => Some(type_idx),
            _ => None,
        })
    }

    pub fn imported_tables(&self) -> impl Iterator<Item = &TableType> + '_ {
        self.imports.iter().filter_map(|import| match &import.external_kind {
            ExternalKind::Table(table_type) => Some(table_type),
            _ => None,
        })
    }

    pub fn imported_memories(&self) -> impl Iterator<Item = &MemoryType> + '_ {
        self.imports.iter().filter_map(|import| match &import.external_kind {
            ExternalKind::Memory(memory_type) => Some(memory_type),
            _ => None,
        })
    }

    pub fn imported_globals(&self) -> impl Iterator<Item = &GlobalType> + '_ {
        self.imports.iter().filter_map(|import| match &import.external_kind {
            ExternalKind::Global(global_type) => Some(global_type),
            _ => None,
        })
    }

    /// Size of the function index space (imports first, then local definitions).
    pub fn total_functions(&self) -> u32 {
        (self.imported_functions().count() + self.functions.len()) as u32
    }

    pub fn total_tables(&self) -> u32 {
        (self.imported_tables().count() + self.tables.len()) as u32
    }

    pub fn total_memories(&self) -> u32 {
        (self.imported_memories().count() + self.memories.len()) as u32
    }

    pub fn total_globals(&self) -> u32 {
        (self.imported_globals().count() + self.globals.len()) as u32
    }

    /// Type index of a function in the module's function index space.
    pub fn function_type_index(&self, func_idx: u32) -> Option<u32> {
        let imported = self.imported_functions().count();
        let idx = func_idx as usize;
        if idx < imported {
            self.imported_functions().nth(idx)
        } else {
            self.functions.get(idx - imported).copied()
        }
    }

    pub fn function_type(&self, func_idx: u32) -> Option<&FunctionType> {
        self.function_type_index(func_idx)
            .and_then(|type_idx| self.types.get(type_idx as usize))
    }

    pub fn global_type(&self, global_idx: u32) -> Option<&GlobalType> {
        let imported = self.imported_globals().count();
        let idx = global_idx as usize;
        if idx < imported {
            self.imported_globals().nth(idx)
        } else {
            self.globals.get(idx - imported).map(|g| &g.global_type)
        }
    }

    pub fn table_type(&self, table_idx: u32) -> Option<&TableType> {
        self.imported_tables()
            .chain(self.tables.iter())
            .nth(table_idx as usize)
    }

    pub fn memory_type(&self, memory_idx: u32) -> Option<&MemoryType> {
        self.imported_memories()
            .chain(self.memories.iter())
            .nth(memory_idx as usize)
    }

    pub fn get_export(&self, name: &str) -> Option<&Export> {
        self.exports.iter().find(|export| export.name == name)
    }

    /// Resolve a block type to its (params, results).
    pub fn block_signature(&self, block_type: &BlockType) -> Option<(Vec<ValueType>, Vec<ValueType>)> {
        match block_type {
            BlockType::Empty => Some((vec![], vec![])),
            BlockType::Value(vt) => Some((vec![], vec![*vt])),
            BlockType::FuncType(idx) => self
                .types
                .get(*idx as usize)
                .map(|ft| (ft.parameters.clone(), ft.return_types.clone())),
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Module magic = 0x{:08x}", self.magic)?;
        write!(f, " version = {}", self.version)?;
        write!(f, " types = {}", self.types.len())?;
        write!(f, " imports = {}", self.imports.len())?;
        write!(f, " functions = {}", self.functions.len())?;
        write!(f, " tables = {}", self.tables.len())?;
        write!(f, " memories = {}", self.memories.len())?;
        write!(f, " globals = {}", self.globals.len())?;
        write!(f, " exports = {}", self.exports.len())?;
        match self.start {
            Some(start) => write!(f, " start = {}", start)?,
            None => write!(f, " start = none")?,
        }
        write!(f, " elements = {}", self.elements.len())?;
        write!(f, " data = {}", self.data.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    I32,
    I64,
    F32,
    F64,
    FuncRef,
}

impl ValueType {
    pub fn decode(byte: u8, offset: usize) -> Result<Self, DecodeError> {
        match byte {
            0x7f => Ok(ValueType::I32),
            0x7e => Ok(ValueType::I64),
            0x7d => Ok(ValueType::F32),
            0x7c => Ok(ValueType::F64),
            0x70 => Ok(ValueType::FuncRef),
            _ => Err(DecodeError::InvalidKind {
                what: "value type",
                byte,
                offset,
            }),
        }
    }

    pub fn is_value_type_byte(byte: u8) -> bool {
        matches!(byte, 0x7f | 0x7e | 0x7d | 0x7c | 0x70)
    }

    pub fn is_num(&self) -> bool {
        !matches!(self, ValueType::FuncRef)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            ValueType::I32 => "i32",
            ValueType::I64 => "i64",
            ValueType::F32 => "f32",
            ValueType::F64 => "f64",
            ValueType::FuncRef => "funcref",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FunctionType {
    pub parameters: Vec<ValueType>,
    pub return_types: Vec<ValueType>,
}

impl FunctionType {
    pub fn new(parameters: Vec<ValueType>, return_types: Vec<ValueType>) -> Self {
        FunctionType {
            parameters,
            return_types,
        }
    }
}

fn join_types(types: &[ValueType]) -> String {
    types
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<String>>()
        .join(", ")
}

impl fmt::Display for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "({}) -> ({})",
            join_types(&self.parameters),
            join_types(&self.return_types)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub min: u32,
    pub max: Option<u32>,
}

impl Limits {
    /// An entity with `self` limits can stand in for an import declared with
    /// `declared` limits.
    pub fn is_compatible_with(&self, declared: &Limits) -> bool {
        if self.min < declared.min {
            return false;
        }
        match declared.max {
            None => true,
            Some(declared_max) => matches!(self.max, Some(actual_max) if actual_max <= declared_max),
        }
    }
}

impl fmt::Display for Limits {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.max {
            Some(max) => write!(f, "min = {}, max = {}", self.min, max),
            None => write!(f, "min = {}", self.min),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableType {
    pub ref_type: ValueType,
    pub limits: Limits,
}

impl fmt::Display for TableType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.ref_type, self.limits)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryType {
    pub limits: Limits,
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "pages {}", self.limits)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalType {
    pub value_type: ValueType,
    pub mutable: bool,
}

impl fmt::Display for GlobalType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.mutable {
            write!(f, "mut {}", self.value_type)
        } else {
            write!(f, "{}", self.value_type)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExternalKind {
    Function(u32),
    Table(TableType),
    Memory(MemoryType),
    Global(GlobalType),
}

impl ExternalKind {
    pub fn name(&self) -> &'static str {
        match self {
            ExternalKind::Function(_) => "function",
            ExternalKind::Table(_) => "table",
            ExternalKind::Memory(_) => "memory",
            ExternalKind::Global(_) => "global",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Import {
    pub module: String,
    pub name: String,
    pub external_kind: ExternalKind,
}

impl fmt::Display for Import {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.external_kind {
            ExternalKind::Function(type_index) => {
                write!(f, "func sig={} <- {}.{}", type_index, self.module, self.name)
            }
            ExternalKind::Table(t) => write!(f, "table {} <- {}.{}", t, self.module, self.name),
            ExternalKind::Memory(m) => write!(f, "memory {} <- {}.{}", m, self.module, self.name),
            ExternalKind::Global(g) => write!(f, "global {} <- {}.{}", g, self.module, self.name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportIndex {
    Function(u32),
    Table(u32),
    Memory(u32),
    Global(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Export {
    pub name: String,
    pub index: ExportIndex,
}

/// Constant expressions: the single-instruction initializers allowed for
/// globals and segment offsets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstExpr {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    GlobalGet(u32),
    RefNull,
    RefFunc(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Global {
    pub global_type: GlobalType,
    pub init: ConstExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ElementMode {
    Passive,
    Declarative,
    Active { table_index: u32, offset: ConstExpr },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub ref_type: ValueType,
    /// Each entry is `RefFunc` or `RefNull` (or `GlobalGet` of a funcref global).
    pub init: Vec<ConstExpr>,
    pub mode: ElementMode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataMode {
    Passive,
    Active { memory_index: u32, offset: ConstExpr },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Data {
    pub mode: DataMode,
    pub init: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CustomSection {
    pub name: String,
    pub data: Vec<u8>,
}

/// Run-length encoded local declarations.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Locals {
    entries: Vec<(u32, ValueType)>,
}

impl Locals {
    // Initialize with a list of count+ValueType pairs
    pub fn new(entries: Vec<(u32, ValueType)>) -> Self {
        Self { entries }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> u64 {
        self.entries.iter().map(|(count, _)| *count as u64).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, (u32, ValueType)> {
        self.entries.iter()
    }

    /// Expanded types of the declared locals (parameters not included).
    pub fn types(&self) -> impl Iterator<Item = ValueType> + '_ {
        self.entries
            .iter()
            .flat_map(|(count, vt)| std::iter::repeat(*vt).take(*count as usize))
    }
}

/// A decoded function body: its locals, its opcode stream and the jump
/// targets of every structured instruction in it.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionBody {
    pub locals: Locals,
    pub instructions: Vec<InstructionKind>,
    pub blocks: BlockMap,
}

impl FunctionBody {
    pub fn new(locals: Locals, instructions: Vec<InstructionKind>) -> Result<Self, DecodeError> {
        let blocks = BlockMap::build(&instructions)?;
        Ok(FunctionBody {
            locals,
            instructions,
            blocks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_compatibility() {
        let declared = Limits { min: 1, max: Some(4) };
        assert!(Limits { min: 1, max: Some(4) }.is_compatible_with(&declared));
        assert!(Limits { min: 2, max: Some(3) }.is_compatible_with(&declared));
        assert!(!Limits { min: 0, max: Some(4) }.is_compatible_with(&declared));
        assert!(!Limits { min: 1, max: None }.is_compatible_with(&declared));
        assert!(!Limits { min: 1, max: Some(5) }.is_compatible_with(&declared));

        let open = Limits { min: 1, max: None };
        assert!(Limits { min: 3, max: None }.is_compatible_with(&open));
        assert!(Limits { min: 3, max: Some(9) }.is_compatible_with(&open));
    }

    #[test]
    fn test_index_spaces_put_imports_first() {
        let module = Module {
            types: vec![
                FunctionType::new(vec![ValueType::I32], vec![]),
                FunctionType::new(vec![], vec![ValueType::I64]),
            ],
            imports: vec![
                Import {
                    module: "env".to_string(),
                    name: "log".to_string(),
                    external_kind: ExternalKind::Function(0),
                },
                Import {
                    module: "env".to_string(),
                    name: "g".to_string(),
                    external_kind: ExternalKind::Global(GlobalType {
                        value_type: ValueType::F32,
                        mutable: false,
                    }),
                },
            ],
            functions: vec![1],
            globals: vec![Global {
                global_type: GlobalType {
                    value_type: ValueType::I32,
                    mutable: true,
                },
                init: ConstExpr::I32(0),
            }],
            ..Default::default()
        };

        assert_eq!(module.total_functions(), 2);
        assert_eq!(module.function_type_index(0), Some(0));
        assert_eq!(module.function_type_index(1), Some(1));
        assert_eq!(module.function_type_index(2), None);
        assert_eq!(module.global_type(0).map(|g| g.value_type), Some(ValueType::F32));
        assert_eq!(module.global_type(1).map(|g| g.mutable), Some(true));
        assert_eq!(module.total_globals(), 2);
    }

    #[test]
    fn test_display() {
        let ft = FunctionType::new(vec![ValueType::I32, ValueType::I32], vec![ValueType::I32]);
        assert_eq!(ft.to_string(), "(i32, i32) -> (i32)");
        let gt = GlobalType {
            value_type: ValueType::I64,
            mutable: true,
        };
        assert_eq!(gt.to_string(), "mut i64");
    }
}
