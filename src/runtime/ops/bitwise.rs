//! Bitwise operators
//!
//! Shift and rotate counts are taken modulo the operand width.

use super::{Stack, Trap, Value};

pub fn i32_and(stack: &mut Stack) -> Result<(), Trap> {
    let b = stack.pop_i32()?;
    let a = stack.pop_i32()?;
    stack.push(Value::I32(a & b));
    Ok(())
}

pub fn i32_or(stack: &mut Stack) -> Result<(), Trap> {
    let b = stack.pop_i32()?;
    let a = stack.pop_i32()?;
    stack.push(Value::I32(a | b));
    Ok(())
}

pub fn i32_xor(stack: &mut Stack) -> Result<(), Trap> {
    let b = stack.pop_i32()?;
    let a = stack.pop_i32()?;
    stack.push(Value::I32(a ^ b));
    Ok(())
}

pub fn i32_shl(stack: &mut Stack) -> Result<(), Trap> {
    let count = stack.pop_i32()?;
    let value = stack.pop_i32()?;
    stack.push(Value::I32(value.wrapping_shl(count as u32)));
    Ok(())
}

/// i32.shr_s: arithmetic shift, the sign bit is replicated
pub fn i32_shr_s(stack: &mut Stack) -> Result<(), Trap> {
    let count = stack.pop_i32()?;
    let value = stack.pop_i32()?;
    stack.push(Value::I32(value.wrapping_shr(count as u32)));
    Ok(())
}

/// i32.shr_u: logical shift, zeros are shifted in
pub fn i32_shr_u(stack: &mut Stack) -> Result<(), Trap> {
    let count = stack.pop_i32()?;
    let value = stack.pop_i32()? as u32;
    stack.push(Value::I32(value.wrapping_shr(count as u32) as i32));
    Ok(())
}

pub fn i32_rotl(stack: &mut Stack) -> Result<(), Trap> {
    let count = stack.pop_i32()?;
    let value = stack.pop_i32()?;
    stack.push(Value::I32(value.rotate_left(count as u32 & 31)));
    Ok(())
}

pub fn i32_rotr(stack: &mut Stack) -> Result<(), Trap> {
    let count = stack.pop_i32()?;
    let value = stack.pop_i32()?;
    stack.push(Value::I32(value.rotate_right(count as u32 & 31)));
    Ok(())
}

pub fn i64_and(stack: &mut Stack) -> Result<(), Trap> {
    let b = stack.pop_i64()?;
    let a = stack.pop_i64()?;
    stack.push(Value::I64(a & b));
    Ok(())
}

pub fn i64_or(stack: &mut Stack) -> Result<(), Trap> {
    let b = stack.pop_i64()?;
    let a = stack.pop_i64()?;
    stack.push(Value::I64(a | b));
    Ok(())
}

pub fn i64_xor(stack: &mut Stack) -> Result<(), Trap> {
    let b = stack.pop_i64()?;
    let a = stack.pop_i64()?;
    stack.push(Value::I64(a ^ b));
    Ok(())
}

pub fn i64_shl(stack: &mut Stack) -> Result<(), Trap> {
    let count = stack.pop_i64()?;
    let value = stack.pop_i64()?;
    stack.push(Value::I64(value.wrapping_shl(count as u32)));
    Ok(())
}

pub fn i64_shr_s(stack: &mut Stack) -> Result<(), Trap> {
    let count = stack.pop_i64()?;
    let value = stack.pop_i64()?;
    stack.push(Value::I64(value.wrapping_shr(count as u32)));
    Ok(())
}

pub fn i64_shr_u(stack: &mut Stack) -> Result<(), Trap> {
    let count = stack.pop_i64()?;
    let value = stack.pop_i64()? as u64;
    stack.push(Value::I64(value.wrapping_shr(count as u32) as i64));
    Ok(())
}

pub fn i64_rotl(stack: &mut Stack) -> Result<(), Trap> {
    let count = stack.pop_i64()?;
    let value = stack.pop_i64()?;
    stack.push(Value::I64(value.rotate_left((count & 63) as u32)));
    Ok(())
}

pub fn i64_rotr(stack: &mut Stack) -> Result<(), Trap> {
    let count = stack.pop_i64()?;
    let value = stack.pop_i64()?;
    stack.push(Value::I64(value.rotate_right((count & 63) as u32)));
    Ok(())
}
