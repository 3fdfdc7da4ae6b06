//! Binary format decoder.
//!
//! [`parse`] turns a module's bytes into a [`module::Module`]. Sections must
//! appear in canonical order, at most once each; custom sections and unknown
//! section ids are skipped. All counts and indices are strict LEB128 values
//! and function bodies are decoded into instruction streams, but nothing is
//! executed here.

pub mod instruction;
pub mod limits;
pub mod module;
pub mod reader;
pub mod structure;
mod validate;

use log::debug;

use self::instruction::decode::decode_expression;
use self::instruction::InstructionKind;
use self::module::{
    ConstExpr, CustomSection, Data, DataMode, Element, ElementMode, Export, ExportIndex,
    ExternalKind, FunctionBody, FunctionType, Global, GlobalType, Import, Limits, Locals,
    MemoryType, Module, TableType, ValueType,
};
use self::reader::Reader;

/// `\0asm`, read little-endian
pub const MAGIC: u32 = 0x6d736100;
pub const VERSION: u32 = 1;

const SECTION_CUSTOM: u8 = 0;
const SECTION_TYPE: u8 = 1;
const SECTION_IMPORT: u8 = 2;
const SECTION_FUNCTION: u8 = 3;
const SECTION_TABLE: u8 = 4;
const SECTION_MEMORY: u8 = 5;
const SECTION_GLOBAL: u8 = 6;
const SECTION_EXPORT: u8 = 7;
const SECTION_START: u8 = 8;
const SECTION_ELEMENT: u8 = 9;
const SECTION_CODE: u8 = 10;
const SECTION_DATA: u8 = 11;

/// Error type for module decoding
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unexpected end of input at offset {offset}")]
    UnexpectedEof { offset: usize },
    #[error("magic header not detected: found {found}")]
    BadMagic { found: String },
    #[error("unknown binary version: {0}")]
    UnsupportedVersion(u32),
    #[error("section {id} out of order (follows section {previous})")]
    SectionOutOfOrder { id: u8, previous: u8 },
    #[error("duplicate section {0}")]
    DuplicateSection(u8),
    #[error("section {id} size mismatch: declared {declared} bytes, consumed {consumed}")]
    SectionSizeMismatch {
        id: u8,
        declared: usize,
        consumed: usize,
    },
    #[error("integer too large at offset {offset}")]
    IntegerTooLarge { offset: usize },
    #[error("integer representation too long at offset {offset}")]
    IntegerRepresentationTooLong { offset: usize },
    #[error("invalid {what} 0x{byte:02x} at offset {offset}")]
    InvalidKind {
        what: &'static str,
        byte: u8,
        offset: usize,
    },
    #[error("illegal opcode 0x{opcode:02x} at offset {offset}")]
    UnknownOpcode { opcode: u8, offset: usize },
    #[error("illegal opcode 0x{prefix:02x} {sub} at offset {offset}")]
    UnknownPrefixedOpcode { prefix: u8, sub: u32, offset: usize },
    #[error("malformed UTF-8 encoding at offset {offset}")]
    InvalidUtf8 { offset: usize },
    #[error("function and code section have inconsistent lengths: {functions} functions, {bodies} bodies")]
    FunctionCodeMismatch { functions: usize, bodies: usize },
    #[error("too many {what}: {count}")]
    LimitExceeded { what: &'static str, count: u32 },
    #[error("malformed module: {0}")]
    Malformed(String),
    #[error("invalid module: {0}")]
    Validation(String),
}

/// Decode a binary module.
pub fn parse(bytes: &[u8]) -> Result<Module, DecodeError> {
    let mut reader = Reader::new(bytes);
    let mut module = Module::default();

    read_header(&mut reader, &mut module)?;

    let mut previous: u8 = 0;
    while !reader.is_empty() {
        let sec_id = reader.read_byte()?;
        let sec_len = reader.read_vu32()? as usize;
        let start = reader.offset();
        let payload = reader.read_bytes(sec_len)?;
        let mut section = Reader::with_base(payload, start);

        debug!("section #{} at 0x{:06x}, len = {}", sec_id, start, sec_len);

        if sec_id == SECTION_CUSTOM {
            module.custom_sections.push(read_section_custom(&mut section)?);
            continue;
        }
        if sec_id > SECTION_DATA {
            debug!("skipping unknown section #{}", sec_id);
            continue;
        }
        if sec_id == previous {
            return Err(DecodeError::DuplicateSection(sec_id));
        }
        if sec_id < previous {
            return Err(DecodeError::SectionOutOfOrder {
                id: sec_id,
                previous,
            });
        }
        previous = sec_id;

        read_section(sec_id, &mut section, &mut module)?;

        if !section.is_empty() {
            return Err(DecodeError::SectionSizeMismatch {
                id: sec_id,
                declared: sec_len,
                consumed: section.pos(),
            });
        }
    }

    if module.functions.len() != module.code.len() {
        return Err(DecodeError::FunctionCodeMismatch {
            functions: module.functions.len(),
            bodies: module.code.len(),
        });
    }

    validate::validate_module(&module)?;
    debug!("decoded {}", module);

    Ok(module)
}

fn read_header(reader: &mut Reader, module: &mut Module) -> Result<(), DecodeError> {
    if !reader.has_at_least(4) {
        return Err(DecodeError::BadMagic {
            found: hex::encode(reader.read_bytes(reader.remaining())?),
        });
    }
    module.magic = reader.read_u32()?;
    if module.magic != MAGIC {
        return Err(DecodeError::BadMagic {
            found: hex::encode(module.magic.to_le_bytes()),
        });
    }
    module.version = reader.read_u32()?;
    if module.version != VERSION {
        return Err(DecodeError::UnsupportedVersion(module.version));
    }
    Ok(())
}

fn read_section(sec_id: u8, reader: &mut Reader, module: &mut Module) -> Result<(), DecodeError> {
    match sec_id {
        SECTION_TYPE => module.types = read_section_type(reader)?,
        SECTION_IMPORT => module.imports = read_section_import(reader)?,
        SECTION_FUNCTION => module.functions = read_section_function(reader)?,
        SECTION_TABLE => module.tables = read_vec(reader, limits::MAX_TABLES, "tables", read_table_type)?,
        SECTION_MEMORY => {
            module.memories = read_vec(reader, limits::MAX_MEMORIES, "memories", |r| {
                Ok(MemoryType {
                    limits: read_limits(r)?,
                })
            })?
        }
        SECTION_GLOBAL => module.globals = read_vec(reader, limits::MAX_GLOBALS, "globals", read_global)?,
        SECTION_EXPORT => module.exports = read_vec(reader, limits::MAX_EXPORTS, "exports", read_export)?,
        SECTION_START => module.start = Some(reader.read_vu32()?),
        SECTION_ELEMENT => {
            module.elements = read_vec(reader, limits::MAX_ELEMENT_SEGMENTS, "element segments", read_element)?
        }
        SECTION_CODE => module.code = read_vec(reader, limits::MAX_FUNCTIONS, "function bodies", read_function_body)?,
        SECTION_DATA => module.data = read_vec(reader, limits::MAX_DATA_SEGMENTS, "data segments", read_data)?,
        _ => return Err(DecodeError::Malformed(format!("unknown section {}", sec_id))),
    }
    Ok(())
}

/* SECTION READERS ************************************************/

fn read_count(reader: &mut Reader, max: u32, what: &'static str) -> Result<u32, DecodeError> {
    let count = reader.read_vu32()?;
    if count > max {
        return Err(DecodeError::LimitExceeded { what, count });
    }
    Ok(count)
}

fn read_vec<T, F>(reader: &mut Reader, max: u32, what: &'static str, mut read_item: F) -> Result<Vec<T>, DecodeError>
where
    F: FnMut(&mut Reader) -> Result<T, DecodeError>,
{
    let count = read_count(reader, max, what)?;
    // cap the preallocation; the bytes may run out long before `count`
    let mut items = Vec::with_capacity((count as usize).min(reader.remaining()));
    for _ in 0..count {
        items.push(read_item(reader)?);
    }
    Ok(items)
}

fn read_value_type(reader: &mut Reader) -> Result<ValueType, DecodeError> {
    let offset = reader.offset();
    ValueType::decode(reader.read_byte()?, offset)
}

fn read_result_types(reader: &mut Reader) -> Result<Vec<ValueType>, DecodeError> {
    read_vec(reader, limits::MAX_FUNCTION_ARITY, "function parameters or results", read_value_type)
}

fn read_section_custom(reader: &mut Reader) -> Result<CustomSection, DecodeError> {
    let name = reader.read_name()?;
    let data = reader.read_bytes(reader.remaining())?.to_vec();
    debug!("custom section '{}' ({} bytes)", name, data.len());
    Ok(CustomSection { name, data })
}

fn read_section_type(reader: &mut Reader) -> Result<Vec<FunctionType>, DecodeError> {
    read_vec(reader, limits::MAX_TYPES, "types", |reader| {
        let offset = reader.offset();
        let form = reader.read_byte()?;
        if form != 0x60 {
            return Err(DecodeError::InvalidKind {
                what: "function type form",
                byte: form,
                offset,
            });
        }
        let parameters = read_result_types(reader)?;
        let return_types = read_result_types(reader)?;
        Ok(FunctionType {
            parameters,
            return_types,
        })
    })
}

fn read_section_import(reader: &mut Reader) -> Result<Vec<Import>, DecodeError> {
    read_vec(reader, limits::MAX_IMPORTS, "imports", |reader| {
        let module = reader.read_name()?;
        let name = reader.read_name()?;
        let offset = reader.offset();
        let external_kind = match reader.read_byte()? {
            0x00 => ExternalKind::Function(reader.read_vu32()?),
            0x01 => ExternalKind::Table(read_table_type(reader)?),
            0x02 => ExternalKind::Memory(MemoryType {
                limits: read_limits(reader)?,
            }),
            0x03 => ExternalKind::Global(read_global_type(reader)?),
            byte => {
                return Err(DecodeError::InvalidKind {
                    what: "import kind",
                    byte,
                    offset,
                })
            }
        };
        Ok(Import {
            module,
            name,
            external_kind,
        })
    })
}

fn read_section_function(reader: &mut Reader) -> Result<Vec<u32>, DecodeError> {
    read_vec(reader, limits::MAX_FUNCTIONS, "functions", |reader| reader.read_vu32())
}

fn read_limits(reader: &mut Reader) -> Result<Limits, DecodeError> {
    let offset = reader.offset();
    match reader.read_byte()? {
        0x00 => Ok(Limits {
            min: reader.read_vu32()?,
            max: None,
        }),
        0x01 => {
            let min = reader.read_vu32()?;
            let max = reader.read_vu32()?;
            Ok(Limits { min, max: Some(max) })
        }
        byte => Err(DecodeError::InvalidKind {
            what: "limits flag",
            byte,
            offset,
        }),
    }
}

fn read_table_type(reader: &mut Reader) -> Result<TableType, DecodeError> {
    let offset = reader.offset();
    let byte = reader.read_byte()?;
    let ref_type = ValueType::decode(byte, offset)?;
    if ref_type != ValueType::FuncRef {
        return Err(DecodeError::InvalidKind {
            what: "table element type",
            byte,
            offset,
        });
    }
    Ok(TableType {
        ref_type,
        limits: read_limits(reader)?,
    })
}

fn read_global_type(reader: &mut Reader) -> Result<GlobalType, DecodeError> {
    let value_type = read_value_type(reader)?;
    let offset = reader.offset();
    let mutable = match reader.read_byte()? {
        0x00 => false,
        0x01 => true,
        byte => {
            return Err(DecodeError::InvalidKind {
                what: "global mutability",
                byte,
                offset,
            })
        }
    };
    Ok(GlobalType { value_type, mutable })
}

/// A constant expression: exactly one constant instruction followed by `end`.
fn read_const_expr(reader: &mut Reader) -> Result<ConstExpr, DecodeError> {
    let offset = reader.offset();
    let expr = match InstructionKind::decode(reader)? {
        InstructionKind::I32Const { value } => ConstExpr::I32(value),
        InstructionKind::I64Const { value } => ConstExpr::I64(value),
        InstructionKind::F32Const { value } => ConstExpr::F32(value),
        InstructionKind::F64Const { value } => ConstExpr::F64(value),
        InstructionKind::GlobalGet { global_idx } => ConstExpr::GlobalGet(global_idx),
        InstructionKind::RefNull => ConstExpr::RefNull,
        InstructionKind::RefFunc { func_idx } => ConstExpr::RefFunc(func_idx),
        other => {
            return Err(DecodeError::Validation(format!(
                "constant expression required, found {} at offset {}",
                other.mnemonic(),
                offset
            )))
        }
    };
    match InstructionKind::decode(reader)? {
        InstructionKind::End => Ok(expr),
        other => Err(DecodeError::Validation(format!(
            "constant expression required, found trailing {}",
            other.mnemonic()
        ))),
    }
}

fn read_global(reader: &mut Reader) -> Result<Global, DecodeError> {
    let global_type = read_global_type(reader)?;
    let init = read_const_expr(reader)?;
    Ok(Global { global_type, init })
}

fn read_export(reader: &mut Reader) -> Result<Export, DecodeError> {
    let name = reader.read_name()?;
    let offset = reader.offset();
    let kind = reader.read_byte()?;
    let idx = reader.read_vu32()?;
    let index = match kind {
        0x00 => ExportIndex::Function(idx),
        0x01 => ExportIndex::Table(idx),
        0x02 => ExportIndex::Memory(idx),
        0x03 => ExportIndex::Global(idx),
        byte => {
            return Err(DecodeError::InvalidKind {
                what: "export kind",
                byte,
                offset,
            })
        }
    };
    Ok(Export { name, index })
}

fn read_elem_kind(reader: &mut Reader) -> Result<ValueType, DecodeError> {
    let offset = reader.offset();
    match reader.read_byte()? {
        0x00 => Ok(ValueType::FuncRef),
        byte => Err(DecodeError::InvalidKind {
            what: "element kind",
            byte,
            offset,
        }),
    }
}

fn read_func_indices(reader: &mut Reader) -> Result<Vec<ConstExpr>, DecodeError> {
    read_vec(reader, limits::MAX_TABLE_SIZE, "element entries", |r| {
        Ok(ConstExpr::RefFunc(r.read_vu32()?))
    })
}

fn read_init_exprs(reader: &mut Reader) -> Result<Vec<ConstExpr>, DecodeError> {
    read_vec(reader, limits::MAX_TABLE_SIZE, "element entries", read_const_expr)
}

fn read_element(reader: &mut Reader) -> Result<Element, DecodeError> {
    let offset = reader.offset();
    let flags = reader.read_vu32()?;
    let (mode, ref_type, init) = match flags {
        0 => {
            let offset = read_const_expr(reader)?;
            let init = read_func_indices(reader)?;
            (ElementMode::Active { table_index: 0, offset }, ValueType::FuncRef, init)
        }
        1 => {
            let ref_type = read_elem_kind(reader)?;
            (ElementMode::Passive, ref_type, read_func_indices(reader)?)
        }
        2 => {
            let table_index = reader.read_vu32()?;
            let offset = read_const_expr(reader)?;
            let ref_type = read_elem_kind(reader)?;
            let init = read_func_indices(reader)?;
            (ElementMode::Active { table_index, offset }, ref_type, init)
        }
        3 => {
            let ref_type = read_elem_kind(reader)?;
            (ElementMode::Declarative, ref_type, read_func_indices(reader)?)
        }
        4 => {
            let offset = read_const_expr(reader)?;
            let init = read_init_exprs(reader)?;
            (ElementMode::Active { table_index: 0, offset }, ValueType::FuncRef, init)
        }
        5 => {
            let ref_type = read_table_ref_type(reader)?;
            (ElementMode::Passive, ref_type, read_init_exprs(reader)?)
        }
        6 => {
            let table_index = reader.read_vu32()?;
            let offset = read_const_expr(reader)?;
            let ref_type = read_table_ref_type(reader)?;
            let init = read_init_exprs(reader)?;
            (ElementMode::Active { table_index, offset }, ref_type, init)
        }
        7 => {
            let ref_type = read_table_ref_type(reader)?;
            (ElementMode::Declarative, ref_type, read_init_exprs(reader)?)
        }
        _ => {
            return Err(DecodeError::Malformed(format!(
                "invalid element segment flags {} at offset {}",
                flags, offset
            )))
        }
    };
    Ok(Element { ref_type, init, mode })
}

fn read_table_ref_type(reader: &mut Reader) -> Result<ValueType, DecodeError> {
    let offset = reader.offset();
    let byte = reader.read_byte()?;
    match ValueType::decode(byte, offset)? {
        ValueType::FuncRef => Ok(ValueType::FuncRef),
        _ => Err(DecodeError::InvalidKind {
            what: "reference type",
            byte,
            offset,
        }),
    }
}

fn read_function_body(reader: &mut Reader) -> Result<FunctionBody, DecodeError> {
    let size = reader.read_vu32()? as usize;
    let start = reader.offset();
    let mut body = Reader::with_base(reader.read_bytes(size)?, start);

    let mut total_locals: u64 = 0;
    let entries = read_vec(&mut body, limits::MAX_FUNCTION_LOCALS, "local declarations", |r| {
        let count = r.read_vu32()?;
        let value_type = read_value_type(r)?;
        Ok((count, value_type))
    })?;
    for (count, _) in &entries {
        total_locals += *count as u64;
        if total_locals > limits::MAX_FUNCTION_LOCALS as u64 {
            return Err(DecodeError::LimitExceeded {
                what: "locals",
                count: total_locals.min(u32::MAX as u64) as u32,
            });
        }
    }

    let instructions = decode_expression(&mut body)?;
    if !body.is_empty() {
        return Err(DecodeError::SectionSizeMismatch {
            id: SECTION_CODE,
            declared: size,
            consumed: body.pos(),
        });
    }

    FunctionBody::new(Locals::new(entries), instructions)
}

fn read_data(reader: &mut Reader) -> Result<Data, DecodeError> {
    let offset = reader.offset();
    let mode = match reader.read_vu32()? {
        0 => DataMode::Active {
            memory_index: 0,
            offset: read_const_expr(reader)?,
        },
        1 => DataMode::Passive,
        2 => {
            let memory_index = reader.read_vu32()?;
            DataMode::Active {
                memory_index,
                offset: read_const_expr(reader)?,
            }
        }
        flags => {
            return Err(DecodeError::Malformed(format!(
                "invalid data segment flags {} at offset {}",
                flags, offset
            )))
        }
    };
    let init = reader.read_u8vec()?;
    Ok(Data { mode, init })
}
