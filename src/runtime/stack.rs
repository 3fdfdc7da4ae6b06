//! Operand stack

use super::{Trap, Value};
use crate::parser::module::ValueType;

/// The operand stack shared by every frame of one engine run. Frames and
/// labels record heights into it rather than owning separate stacks.
#[derive(Debug, Default)]
pub struct Stack {
    values: Vec<Value>,
}

impl Stack {
    pub fn new() -> Self {
        Stack { values: Vec::new() }
    }

    pub fn push(&mut self, value: Value) {
        self.values.push(value);
    }

    pub fn push_all(&mut self, values: impl IntoIterator<Item = Value>) {
        self.values.extend(values);
    }

    pub fn pop(&mut self) -> Result<Value, Trap> {
        self.values.pop().ok_or(Trap::StackUnderflow { opcode: "" })
    }

    /// Pop a value and check its type
    pub fn pop_typed(&mut self, expected: ValueType) -> Result<Value, Trap> {
        let value = self.pop()?;
        if value.typ() != expected {
            return Err(Trap::TypeMismatch {
                opcode: "",
                expected,
                actual: value.typ(),
            });
        }
        Ok(value)
    }

    pub fn pop_i32(&mut self) -> Result<i32, Trap> {
        match self.pop()? {
            Value::I32(v) => Ok(v),
            other => Err(mismatch(ValueType::I32, &other)),
        }
    }

    pub fn pop_i64(&mut self) -> Result<i64, Trap> {
        match self.pop()? {
            Value::I64(v) => Ok(v),
            other => Err(mismatch(ValueType::I64, &other)),
        }
    }

    pub fn pop_f32(&mut self) -> Result<f32, Trap> {
        match self.pop()? {
            Value::F32(v) => Ok(v),
            other => Err(mismatch(ValueType::F32, &other)),
        }
    }

    pub fn pop_f64(&mut self) -> Result<f64, Trap> {
        match self.pop()? {
            Value::F64(v) => Ok(v),
            other => Err(mismatch(ValueType::F64, &other)),
        }
    }

    /// Pop the top `n` values, preserving their order.
    pub fn pop_n(&mut self, n: usize) -> Result<Vec<Value>, Trap> {
        if n > self.values.len() {
            return Err(Trap::StackUnderflow { opcode: "" });
        }
        Ok(self.values.split_off(self.values.len() - n))
    }

    /// Discard everything between `height` and the top `keep` values. Used
    /// when unwinding to a label or returning from a frame.
    pub fn unwind(&mut self, height: usize, keep: usize) -> Result<(), Trap> {
        let len = self.values.len();
        if len < height + keep {
            return Err(Trap::StackUnderflow { opcode: "" });
        }
        self.values.drain(height..len - keep);
        Ok(())
    }

    pub fn height(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn mismatch(expected: ValueType, actual: &Value) -> Trap {
    Trap::TypeMismatch {
        opcode: "",
        expected,
        actual: actual.typ(),
    }
}
