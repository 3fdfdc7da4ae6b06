//! Memory instructions: loads, stores, size, grow, fill and copy
//!
//! The effective address of an access is the popped `u32` base plus the
//! static offset, computed in 64 bits so it cannot wrap; the access traps
//! unless every byte of it lies below the current memory size.

use super::{MemArg, Memory, Stack, Trap, Value};

/// Pop the base address and add the static offset
fn effective_address(stack: &mut Stack, memarg: &MemArg) -> Result<u64, Trap> {
    let base = stack.pop_i32()? as u32;
    Ok(base as u64 + memarg.offset as u64)
}

/// Generate a load of `$read` width extended to the result type
macro_rules! load {
    ($name:ident, $read:ident, $variant:ident, |$raw:ident| $extend:expr) => {
        pub fn $name(stack: &mut Stack, memory: &Memory, memarg: &MemArg) -> Result<(), Trap> {
            let address = effective_address(stack, memarg)?;
            let $raw = memory.$read(address)?;
            stack.push(Value::$variant($extend));
            Ok(())
        }
    };
}

/// Generate a store of the low `$write` bits of the operand
macro_rules! store {
    ($name:ident, $pop:ident, $write:ident, |$value:ident| $wrap:expr) => {
        pub fn $name(stack: &mut Stack, memory: &mut Memory, memarg: &MemArg) -> Result<(), Trap> {
            let $value = stack.$pop()?;
            let address = effective_address(stack, memarg)?;
            memory.$write(address, $wrap)
        }
    };
}

load!(i32_load, read_u32, I32, |raw| raw as i32);
load!(i64_load, read_u64, I64, |raw| raw as i64);
load!(f32_load, read_u32, F32, |raw| f32::from_bits(raw));
load!(f64_load, read_u64, F64, |raw| f64::from_bits(raw));
load!(i32_load8_s, read_u8, I32, |raw| raw as i8 as i32);
load!(i32_load8_u, read_u8, I32, |raw| raw as i32);
load!(i32_load16_s, read_u16, I32, |raw| raw as i16 as i32);
load!(i32_load16_u, read_u16, I32, |raw| raw as i32);
load!(i64_load8_s, read_u8, I64, |raw| raw as i8 as i64);
load!(i64_load8_u, read_u8, I64, |raw| raw as i64);
load!(i64_load16_s, read_u16, I64, |raw| raw as i16 as i64);
load!(i64_load16_u, read_u16, I64, |raw| raw as i64);
load!(i64_load32_s, read_u32, I64, |raw| raw as i32 as i64);
load!(i64_load32_u, read_u32, I64, |raw| raw as i64);

store!(i32_store, pop_i32, write_u32, |value| value as u32);
store!(i64_store, pop_i64, write_u64, |value| value as u64);
store!(f32_store, pop_f32, write_u32, |value| value.to_bits());
store!(f64_store, pop_f64, write_u64, |value| value.to_bits());
store!(i32_store8, pop_i32, write_u8, |value| value as u8);
store!(i32_store16, pop_i32, write_u16, |value| value as u16);
store!(i64_store8, pop_i64, write_u8, |value| value as u8);
store!(i64_store16, pop_i64, write_u16, |value| value as u16);
store!(i64_store32, pop_i64, write_u32, |value| value as u32);

/// memory.size: current size in pages
pub fn memory_size(stack: &mut Stack, memory: &Memory) -> Result<(), Trap> {
    stack.push(Value::I32(memory.size() as i32));
    Ok(())
}

/// memory.grow: pushes the old size in pages, or -1 if the memory could not
/// grow. Failure to grow is not a trap.
pub fn memory_grow(stack: &mut Stack, memory: &mut Memory, ceiling: Option<u32>) -> Result<(), Trap> {
    let delta = stack.pop_i32()? as u32;
    stack.push(Value::I32(memory.grow(delta, ceiling)));
    Ok(())
}

/// memory.fill: [dst, value, len] -> []
pub fn memory_fill(stack: &mut Stack, memory: &mut Memory) -> Result<(), Trap> {
    let len = stack.pop_i32()? as u32;
    let value = stack.pop_i32()?;
    let dst = stack.pop_i32()? as u32;
    memory.fill(dst as u64, value as u8, len as u64)
}

/// memory.copy: [dst, src, len] -> []
pub fn memory_copy(stack: &mut Stack, memory: &mut Memory) -> Result<(), Trap> {
    let len = stack.pop_i32()? as u32;
    let src = stack.pop_i32()? as u32;
    let dst = stack.pop_i32()? as u32;
    memory.copy_within(dst as u64, src as u64, len as u64)
}
