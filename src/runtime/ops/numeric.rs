//! Arithmetic: integer and float binary and unary operators
//!
//! Every operator pops its operands (the second operand is on top), checks
//! their types and pushes one result. Integer arithmetic wraps; only
//! division and remainder can trap.

use super::{Stack, Trap, Value};

/// Generate a binary operator over one value type
macro_rules! binop {
    ($(#[$doc:meta])* $name:ident, $pop:ident, $variant:ident, |$c1:ident, $c2:ident| $body:expr) => {
        $(#[$doc])*
        pub fn $name(stack: &mut Stack) -> Result<(), Trap> {
            let $c2 = stack.$pop()?;
            let $c1 = stack.$pop()?;
            stack.push(Value::$variant($body));
            Ok(())
        }
    };
}

/// Generate a unary operator over one value type
macro_rules! unop {
    ($(#[$doc:meta])* $name:ident, $pop:ident, $variant:ident, |$c:ident| $body:expr) => {
        $(#[$doc])*
        pub fn $name(stack: &mut Stack) -> Result<(), Trap> {
            let $c = stack.$pop()?;
            stack.push(Value::$variant($body));
            Ok(())
        }
    };
}

// ============================================================================
// Integer arithmetic
// ============================================================================

binop!(
    /// i32.add: c1 + c2 modulo 2^32
    i32_add, pop_i32, I32, |c1, c2| c1.wrapping_add(c2)
);
binop!(i32_sub, pop_i32, I32, |c1, c2| c1.wrapping_sub(c2));
binop!(i32_mul, pop_i32, I32, |c1, c2| c1.wrapping_mul(c2));
binop!(
    /// i64.add: c1 + c2 modulo 2^64
    i64_add, pop_i64, I64, |c1, c2| c1.wrapping_add(c2)
);
binop!(i64_sub, pop_i64, I64, |c1, c2| c1.wrapping_sub(c2));
binop!(i64_mul, pop_i64, I64, |c1, c2| c1.wrapping_mul(c2));

/// i32.div_s: traps on a zero divisor and on `i32::MIN / -1`, whose
/// result is not representable.
pub fn i32_div_s(stack: &mut Stack) -> Result<(), Trap> {
    let c2 = stack.pop_i32()?;
    let c1 = stack.pop_i32()?;
    if c2 == 0 {
        return Err(Trap::IntegerDivideByZero);
    }
    let result = c1.checked_div(c2).ok_or(Trap::IntegerOverflow)?;
    stack.push(Value::I32(result));
    Ok(())
}

pub fn i32_div_u(stack: &mut Stack) -> Result<(), Trap> {
    let c2 = stack.pop_i32()? as u32;
    let c1 = stack.pop_i32()? as u32;
    if c2 == 0 {
        return Err(Trap::IntegerDivideByZero);
    }
    stack.push(Value::I32((c1 / c2) as i32));
    Ok(())
}

/// i32.rem_s: the sign follows the dividend; `i32::MIN % -1` is 0 rather
/// than a trap.
pub fn i32_rem_s(stack: &mut Stack) -> Result<(), Trap> {
    let c2 = stack.pop_i32()?;
    let c1 = stack.pop_i32()?;
    if c2 == 0 {
        return Err(Trap::IntegerDivideByZero);
    }
    stack.push(Value::I32(c1.wrapping_rem(c2)));
    Ok(())
}

pub fn i32_rem_u(stack: &mut Stack) -> Result<(), Trap> {
    let c2 = stack.pop_i32()? as u32;
    let c1 = stack.pop_i32()? as u32;
    if c2 == 0 {
        return Err(Trap::IntegerDivideByZero);
    }
    stack.push(Value::I32((c1 % c2) as i32));
    Ok(())
}

pub fn i64_div_s(stack: &mut Stack) -> Result<(), Trap> {
    let c2 = stack.pop_i64()?;
    let c1 = stack.pop_i64()?;
    if c2 == 0 {
        return Err(Trap::IntegerDivideByZero);
    }
    let result = c1.checked_div(c2).ok_or(Trap::IntegerOverflow)?;
    stack.push(Value::I64(result));
    Ok(())
}

pub fn i64_div_u(stack: &mut Stack) -> Result<(), Trap> {
    let c2 = stack.pop_i64()? as u64;
    let c1 = stack.pop_i64()? as u64;
    if c2 == 0 {
        return Err(Trap::IntegerDivideByZero);
    }
    stack.push(Value::I64((c1 / c2) as i64));
    Ok(())
}

pub fn i64_rem_s(stack: &mut Stack) -> Result<(), Trap> {
    let c2 = stack.pop_i64()?;
    let c1 = stack.pop_i64()?;
    if c2 == 0 {
        return Err(Trap::IntegerDivideByZero);
    }
    stack.push(Value::I64(c1.wrapping_rem(c2)));
    Ok(())
}

pub fn i64_rem_u(stack: &mut Stack) -> Result<(), Trap> {
    let c2 = stack.pop_i64()? as u64;
    let c1 = stack.pop_i64()? as u64;
    if c2 == 0 {
        return Err(Trap::IntegerDivideByZero);
    }
    stack.push(Value::I64((c1 % c2) as i64));
    Ok(())
}

unop!(
    /// i32.clz: count of leading zero bits
    i32_clz, pop_i32, I32, |c| c.leading_zeros() as i32
);
unop!(i32_ctz, pop_i32, I32, |c| c.trailing_zeros() as i32);
unop!(i32_popcnt, pop_i32, I32, |c| c.count_ones() as i32);
unop!(i64_clz, pop_i64, I64, |c| c.leading_zeros() as i64);
unop!(i64_ctz, pop_i64, I64, |c| c.trailing_zeros() as i64);
unop!(i64_popcnt, pop_i64, I64, |c| c.count_ones() as i64);

// ============================================================================
// Float arithmetic
// ============================================================================

binop!(f32_add, pop_f32, F32, |c1, c2| c1 + c2);
binop!(f32_sub, pop_f32, F32, |c1, c2| c1 - c2);
binop!(f32_mul, pop_f32, F32, |c1, c2| c1 * c2);
binop!(
    /// f32.div: IEEE 754 division, never traps (x/0 is ±inf or NaN)
    f32_div, pop_f32, F32, |c1, c2| c1 / c2
);
binop!(f32_min, pop_f32, F32, |c1, c2| min_f32(c1, c2));
binop!(f32_max, pop_f32, F32, |c1, c2| max_f32(c1, c2));
binop!(f32_copysign, pop_f32, F32, |c1, c2| c1.copysign(c2));
binop!(f64_add, pop_f64, F64, |c1, c2| c1 + c2);
binop!(f64_sub, pop_f64, F64, |c1, c2| c1 - c2);
binop!(f64_mul, pop_f64, F64, |c1, c2| c1 * c2);
binop!(f64_div, pop_f64, F64, |c1, c2| c1 / c2);
binop!(f64_min, pop_f64, F64, |c1, c2| min_f64(c1, c2));
binop!(f64_max, pop_f64, F64, |c1, c2| max_f64(c1, c2));
binop!(f64_copysign, pop_f64, F64, |c1, c2| c1.copysign(c2));

unop!(f32_abs, pop_f32, F32, |c| c.abs());
unop!(f32_neg, pop_f32, F32, |c| -c);
unop!(f32_sqrt, pop_f32, F32, |c| c.sqrt());
unop!(f32_ceil, pop_f32, F32, |c| c.ceil());
unop!(f32_floor, pop_f32, F32, |c| c.floor());
unop!(f32_trunc, pop_f32, F32, |c| c.trunc());
unop!(
    /// f32.nearest: round half to even
    f32_nearest, pop_f32, F32, |c| c.round_ties_even()
);
unop!(f64_abs, pop_f64, F64, |c| c.abs());
unop!(f64_neg, pop_f64, F64, |c| -c);
unop!(f64_sqrt, pop_f64, F64, |c| c.sqrt());
unop!(f64_ceil, pop_f64, F64, |c| c.ceil());
unop!(f64_floor, pop_f64, F64, |c| c.floor());
unop!(f64_trunc, pop_f64, F64, |c| c.trunc());
unop!(f64_nearest, pop_f64, F64, |c| c.round_ties_even());

// Rust's min/max return the non-NaN operand and treat -0.0 == +0.0; the
// instructions propagate NaN and order -0.0 below +0.0.

fn min_f32(c1: f32, c2: f32) -> f32 {
    if c1.is_nan() || c2.is_nan() {
        f32::NAN
    } else if c1 == 0.0 && c2 == 0.0 {
        if c1.is_sign_negative() {
            c1
        } else {
            c2
        }
    } else {
        c1.min(c2)
    }
}

fn max_f32(c1: f32, c2: f32) -> f32 {
    if c1.is_nan() || c2.is_nan() {
        f32::NAN
    } else if c1 == 0.0 && c2 == 0.0 {
        if c1.is_sign_negative() {
            c2
        } else {
            c1
        }
    } else {
        c1.max(c2)
    }
}

fn min_f64(c1: f64, c2: f64) -> f64 {
    if c1.is_nan() || c2.is_nan() {
        f64::NAN
    } else if c1 == 0.0 && c2 == 0.0 {
        if c1.is_sign_negative() {
            c1
        } else {
            c2
        }
    } else {
        c1.min(c2)
    }
}

fn max_f64(c1: f64, c2: f64) -> f64 {
    if c1.is_nan() || c2.is_nan() {
        f64::NAN
    } else if c1 == 0.0 && c2 == 0.0 {
        if c1.is_sign_negative() {
            c2
        } else {
            c1
        }
    } else {
        c1.max(c2)
    }
}
