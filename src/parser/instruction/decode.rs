//! Instruction decoding from binary format

use super::{BlockType, InstructionKind, MemArg};
use crate::parser::limits;
use crate::parser::module::ValueType;
use crate::parser::reader::Reader;
use crate::parser::DecodeError;

impl MemArg {
    /// Decode a memory argument from the reader
    pub fn decode(reader: &mut Reader) -> Result<Self, DecodeError> {
        let align = reader.read_vu32()?;
        let offset = reader.read_vu32()?;
        Ok(MemArg { align, offset })
    }
}

impl BlockType {
    /// Decode a block type from the reader
    pub fn decode(reader: &mut Reader) -> Result<Self, DecodeError> {
        let offset = reader.offset();
        match reader.peek_byte() {
            Some(0x40) => {
                reader.read_byte()?;
                Ok(BlockType::Empty)
            }
            Some(b) if ValueType::is_value_type_byte(b) => {
                reader.read_byte()?;
                Ok(BlockType::Value(ValueType::decode(b, offset)?))
            }
            Some(_) => {
                let type_idx = reader.read_vs33()?;
                if type_idx < 0 {
                    return Err(DecodeError::Malformed(format!(
                        "negative block type index {} at offset {}",
                        type_idx, offset
                    )));
                }
                Ok(BlockType::FuncType(type_idx as u32))
            }
            None => Err(DecodeError::UnexpectedEof { offset }),
        }
    }
}

fn read_reserved_zero(reader: &mut Reader, what: &'static str) -> Result<(), DecodeError> {
    let offset = reader.offset();
    let byte = reader.read_byte()?;
    if byte != 0x00 {
        return Err(DecodeError::InvalidKind { what, byte, offset });
    }
    Ok(())
}

impl InstructionKind {
    /// Decode an instruction from the reader
    pub fn decode(reader: &mut Reader) -> Result<Self, DecodeError> {
        let offset = reader.offset();
        let opcode = reader.read_byte()?;

        use InstructionKind::*;
        let kind = match opcode {
            // Control instructions (0x00-0x11)
            0x00 => Unreachable,
            0x01 => Nop,
            0x02 => Block {
                block_type: BlockType::decode(reader)?,
            },
            0x03 => Loop {
                block_type: BlockType::decode(reader)?,
            },
            0x04 => If {
                block_type: BlockType::decode(reader)?,
            },
            0x05 => Else,
            0x0B => End,
            0x0C => Br {
                label_idx: reader.read_vu32()?,
            },
            0x0D => BrIf {
                label_idx: reader.read_vu32()?,
            },
            0x0E => {
                let count = reader.read_vu32()?;
                if count > limits::MAX_BR_TABLE_LABELS {
                    return Err(DecodeError::LimitExceeded {
                        what: "br_table labels",
                        count,
                    });
                }
                let mut labels = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    labels.push(reader.read_vu32()?);
                }
                let default = reader.read_vu32()?;
                BrTable { labels, default }
            }
            0x0F => Return,
            0x10 => Call {
                func_idx: reader.read_vu32()?,
            },
            0x11 => CallIndirect {
                type_idx: reader.read_vu32()?,
                table_idx: reader.read_vu32()?,
            },

            // Reference instructions (0xD0-0xD2)
            0xD0 => {
                let type_offset = reader.offset();
                let byte = reader.read_byte()?;
                if ValueType::decode(byte, type_offset)? != ValueType::FuncRef {
                    return Err(DecodeError::InvalidKind {
                        what: "reference type",
                        byte,
                        offset: type_offset,
                    });
                }
                RefNull
            }
            0xD1 => RefIsNull,
            0xD2 => RefFunc {
                func_idx: reader.read_vu32()?,
            },

            // Parametric instructions (0x1A-0x1C)
            0x1A => Drop,
            0x1B => Select,
            0x1C => {
                let count = reader.read_vu32()?;
                if count != 1 {
                    return Err(DecodeError::Malformed(format!(
                        "typed select expects exactly one type, got {}",
                        count
                    )));
                }
                let type_offset = reader.offset();
                SelectTyped {
                    val_type: ValueType::decode(reader.read_byte()?, type_offset)?,
                }
            }

            // Variable instructions (0x20-0x24)
            0x20 => LocalGet {
                local_idx: reader.read_vu32()?,
            },
            0x21 => LocalSet {
                local_idx: reader.read_vu32()?,
            },
            0x22 => LocalTee {
                local_idx: reader.read_vu32()?,
            },
            0x23 => GlobalGet {
                global_idx: reader.read_vu32()?,
            },
            0x24 => GlobalSet {
                global_idx: reader.read_vu32()?,
            },

            // Memory instructions (0x28-0x40)
            0x28..=0x3E => decode_memory_access(opcode, MemArg::decode(reader)?),
            0x3F => {
                read_reserved_zero(reader, "memory.size reserved byte")?;
                MemorySize
            }
            0x40 => {
                read_reserved_zero(reader, "memory.grow reserved byte")?;
                MemoryGrow
            }

            // Numeric instructions (0x41-0xC4)
            0x41 => I32Const {
                value: reader.read_vs32()?,
            },
            0x42 => I64Const {
                value: reader.read_vs64()?,
            },
            0x43 => F32Const {
                value: reader.read_f32()?,
            },
            0x44 => F64Const {
                value: reader.read_f64()?,
            },
            0x45..=0xC4 => decode_numeric(opcode),

            0xFC => {
                let subopcode = reader.read_vu32()?;
                decode_0xfc(subopcode, offset, reader)?
            }

            _ => return Err(DecodeError::UnknownOpcode { opcode, offset }),
        };

        Ok(kind)
    }
}

fn decode_memory_access(opcode: u8, memarg: MemArg) -> InstructionKind {
    use InstructionKind::*;
    match opcode {
        0x28 => I32Load { memarg },
        0x29 => I64Load { memarg },
        0x2A => F32Load { memarg },
        0x2B => F64Load { memarg },
        0x2C => I32Load8S { memarg },
        0x2D => I32Load8U { memarg },
        0x2E => I32Load16S { memarg },
        0x2F => I32Load16U { memarg },
        0x30 => I64Load8S { memarg },
        0x31 => I64Load8U { memarg },
        0x32 => I64Load16S { memarg },
        0x33 => I64Load16U { memarg },
        0x34 => I64Load32S { memarg },
        0x35 => I64Load32U { memarg },
        0x36 => I32Store { memarg },
        0x37 => I64Store { memarg },
        0x38 => F32Store { memarg },
        0x39 => F64Store { memarg },
        0x3A => I32Store8 { memarg },
        0x3B => I32Store16 { memarg },
        0x3C => I64Store8 { memarg },
        0x3D => I64Store16 { memarg },
        _ => I64Store32 { memarg },
    }
}

// Table indexed by `opcode - 0x45`, covering the immediate-free numeric
// opcodes 0x45..=0xC4.
const NUMERIC_OPS: [InstructionKind; 128] = {
    use InstructionKind::*;
    [
        I32Eqz, I32Eq, I32Ne, I32LtS, I32LtU, I32GtS, I32GtU, I32LeS, I32LeU, I32GeS, I32GeU,
        I64Eqz, I64Eq, I64Ne, I64LtS, I64LtU, I64GtS, I64GtU, I64LeS, I64LeU, I64GeS, I64GeU,
        F32Eq, F32Ne, F32Lt, F32Gt, F32Le, F32Ge, F64Eq, F64Ne, F64Lt, F64Gt, F64Le, F64Ge,
        I32Clz, I32Ctz, I32Popcnt, I32Add, I32Sub, I32Mul, I32DivS, I32DivU, I32RemS, I32RemU,
        I32And, I32Or, I32Xor, I32Shl, I32ShrS, I32ShrU, I32Rotl, I32Rotr, I64Clz, I64Ctz,
        I64Popcnt, I64Add, I64Sub, I64Mul, I64DivS, I64DivU, I64RemS, I64RemU, I64And, I64Or,
        I64Xor, I64Shl, I64ShrS, I64ShrU, I64Rotl, I64Rotr, F32Abs, F32Neg, F32Ceil, F32Floor,
        F32Trunc, F32Nearest, F32Sqrt, F32Add, F32Sub, F32Mul, F32Div, F32Min, F32Max,
        F32Copysign, F64Abs, F64Neg, F64Ceil, F64Floor, F64Trunc, F64Nearest, F64Sqrt, F64Add,
        F64Sub, F64Mul, F64Div, F64Min, F64Max, F64Copysign, I32WrapI64, I32TruncF32S,
        I32TruncF32U, I32TruncF64S, I32TruncF64U, I64ExtendI32S, I64ExtendI32U, I64TruncF32S,
        I64TruncF32U, I64TruncF64S, I64TruncF64U, F32ConvertI32S, F32ConvertI32U,
        F32ConvertI64S, F32ConvertI64U, F32DemoteF64, F64ConvertI32S, F64ConvertI32U,
        F64ConvertI64S, F64ConvertI64U, F64PromoteF32, I32ReinterpretF32, I64ReinterpretF64,
        F32ReinterpretI32, F64ReinterpretI64, I32Extend8S, I32Extend16S, I64Extend8S,
        I64Extend16S, I64Extend32S,
    ]
};

fn decode_numeric(opcode: u8) -> InstructionKind {
    NUMERIC_OPS[(opcode - 0x45) as usize].clone()
}

/// Decode 0xFC prefix instructions
fn decode_0xfc(subopcode: u32, offset: usize, reader: &mut Reader) -> Result<InstructionKind, DecodeError> {
    use InstructionKind::*;

    match subopcode {
        // Saturating truncation instructions
        0x00 => Ok(I32TruncSatF32S),
        0x01 => Ok(I32TruncSatF32U),
        0x02 => Ok(I32TruncSatF64S),
        0x03 => Ok(I32TruncSatF64U),
        0x04 => Ok(I64TruncSatF32S),
        0x05 => Ok(I64TruncSatF32U),
        0x06 => Ok(I64TruncSatF64S),
        0x07 => Ok(I64TruncSatF64U),

        0x0A => {
            read_reserved_zero(reader, "memory.copy destination memory")?;
            read_reserved_zero(reader, "memory.copy source memory")?;
            Ok(MemoryCopy)
        }
        0x0B => {
            read_reserved_zero(reader, "memory.fill memory")?;
            Ok(MemoryFill)
        }

        _ => Err(DecodeError::UnknownPrefixedOpcode {
            prefix: 0xFC,
            sub: subopcode,
            offset,
        }),
    }
}

/// Decode an expression up to and including the `end` that closes its
/// outermost block.
pub fn decode_expression(reader: &mut Reader) -> Result<Vec<InstructionKind>, DecodeError> {
    let mut instructions = Vec::new();
    let mut depth: usize = 0;

    loop {
        let instruction = InstructionKind::decode(reader)?;
        match instruction {
            InstructionKind::Block { .. }
            | InstructionKind::Loop { .. }
            | InstructionKind::If { .. } => depth += 1,
            InstructionKind::End => {
                if depth == 0 {
                    instructions.push(instruction);
                    return Ok(instructions);
                }
                depth -= 1;
            }
            _ => {}
        }
        instructions.push(instruction);
    }
}
