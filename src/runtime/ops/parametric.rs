//! Parametric instructions: drop and select

use super::{Stack, Trap};
use crate::parser::module::ValueType;

/// drop
pub fn drop(stack: &mut Stack) -> Result<(), Trap> {
    stack.pop()?;
    Ok(())
}

/// select: pops a condition and two values of the same type and pushes the
/// first if the condition is non-zero, the second otherwise. The typed form
/// also fixes what that type must be.
pub fn select(stack: &mut Stack, val_type: Option<ValueType>) -> Result<(), Trap> {
    let condition = stack.pop_i32()?;
    let val2 = stack.pop()?;
    let val1 = match val_type {
        Some(expected) => stack.pop_typed(expected)?,
        None => stack.pop()?,
    };
    if val1.typ() != val2.typ() {
        return Err(Trap::TypeMismatch {
            opcode: "",
            expected: val1.typ(),
            actual: val2.typ(),
        });
    }
    stack.push(if condition != 0 { val1 } else { val2 });
    Ok(())
}
