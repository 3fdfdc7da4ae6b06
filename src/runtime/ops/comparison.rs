//! Tests and comparisons
//!
//! All of them push an i32: 1 for true, 0 for false. Float comparisons
//! follow IEEE 754, so every comparison with NaN is false except `ne`.

use super::{Stack, Trap, Value};

/// Generate a comparison of two operands of one type
macro_rules! relop {
    ($name:ident, $pop:ident, |$a:ident, $b:ident| $cond:expr) => {
        pub fn $name(stack: &mut Stack) -> Result<(), Trap> {
            let $b = stack.$pop()?;
            let $a = stack.$pop()?;
            stack.push(Value::I32($cond as i32));
            Ok(())
        }
    };
}

/// i32.eqz
pub fn i32_eqz(stack: &mut Stack) -> Result<(), Trap> {
    let value = stack.pop_i32()?;
    stack.push(Value::I32((value == 0) as i32));
    Ok(())
}

/// i64.eqz; the result is an i32
pub fn i64_eqz(stack: &mut Stack) -> Result<(), Trap> {
    let value = stack.pop_i64()?;
    stack.push(Value::I32((value == 0) as i32));
    Ok(())
}

relop!(i32_eq, pop_i32, |a, b| a == b);
relop!(i32_ne, pop_i32, |a, b| a != b);
relop!(i32_lt_s, pop_i32, |a, b| a < b);
relop!(i32_lt_u, pop_i32, |a, b| (a as u32) < (b as u32));
relop!(i32_gt_s, pop_i32, |a, b| a > b);
relop!(i32_gt_u, pop_i32, |a, b| (a as u32) > (b as u32));
relop!(i32_le_s, pop_i32, |a, b| a <= b);
relop!(i32_le_u, pop_i32, |a, b| (a as u32) <= (b as u32));
relop!(i32_ge_s, pop_i32, |a, b| a >= b);
relop!(i32_ge_u, pop_i32, |a, b| (a as u32) >= (b as u32));

relop!(i64_eq, pop_i64, |a, b| a == b);
relop!(i64_ne, pop_i64, |a, b| a != b);
relop!(i64_lt_s, pop_i64, |a, b| a < b);
relop!(i64_lt_u, pop_i64, |a, b| (a as u64) < (b as u64));
relop!(i64_gt_s, pop_i64, |a, b| a > b);
relop!(i64_gt_u, pop_i64, |a, b| (a as u64) > (b as u64));
relop!(i64_le_s, pop_i64, |a, b| a <= b);
relop!(i64_le_u, pop_i64, |a, b| (a as u64) <= (b as u64));
relop!(i64_ge_s, pop_i64, |a, b| a >= b);
relop!(i64_ge_u, pop_i64, |a, b| (a as u64) >= (b as u64));

relop!(f32_eq, pop_f32, |a, b| a == b);
relop!(f32_ne, pop_f32, |a, b| a != b);
relop!(f32_lt, pop_f32, |a, b| a < b);
relop!(f32_gt, pop_f32, |a, b| a > b);
relop!(f32_le, pop_f32, |a, b| a <= b);
relop!(f32_ge, pop_f32, |a, b| a >= b);

relop!(f64_eq, pop_f64, |a, b| a == b);
relop!(f64_ne, pop_f64, |a, b| a != b);
relop!(f64_lt, pop_f64, |a, b| a < b);
relop!(f64_gt, pop_f64, |a, b| a > b);
relop!(f64_le, pop_f64, |a, b| a <= b);
relop!(f64_ge, pop_f64, |a, b| a >= b);
