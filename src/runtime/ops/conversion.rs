//! Conversions between value types
//!
//! Wrap, extend, promote, demote, int/float conversion, reinterpretation and
//! truncation. The trapping truncations fail on NaN and on results outside
//! the target range; the saturating forms clamp instead (which is exactly
//! what Rust's float-to-int `as` does).

use super::{Stack, Trap, Value};

/// Generate a conversion from one value type to another
macro_rules! convert {
    ($name:ident, $pop:ident, $variant:ident, |$c:ident| $body:expr) => {
        pub fn $name(stack: &mut Stack) -> Result<(), Trap> {
            let $c = stack.$pop()?;
            stack.push(Value::$variant($body));
            Ok(())
        }
    };
}

/// Generate a trapping truncation into the half-open range `[$min, $max)`
macro_rules! trunc {
    ($name:ident, $pop:ident, $variant:ident, $int:ty, $min:expr, $max:expr) => {
        pub fn $name(stack: &mut Stack) -> Result<(), Trap> {
            let value = stack.$pop()? as f64;
            let truncated = checked_trunc(value, $min, $max)?;
            stack.push(Value::$variant(truncated as $int as _));
            Ok(())
        }
    };
}

/// Truncate toward zero, trapping if the result leaves `[min, max)`.
fn checked_trunc(value: f64, min: f64, max: f64) -> Result<f64, Trap> {
    if value.is_nan() {
        return Err(Trap::InvalidConversionToInteger);
    }
    let truncated = value.trunc();
    if !(min..max).contains(&truncated) {
        return Err(Trap::IntegerOverflow);
    }
    Ok(truncated)
}

const I32_MIN: f64 = -2147483648.0;
const I32_END: f64 = 2147483648.0;
const U32_END: f64 = 4294967296.0;
const I64_MIN: f64 = -9223372036854775808.0;
const I64_END: f64 = 9223372036854775808.0;
const U64_END: f64 = 18446744073709551616.0;

// ============================================================================
// Integer width
// ============================================================================

convert!(i32_wrap_i64, pop_i64, I32, |c| c as i32);
convert!(i64_extend_i32_s, pop_i32, I64, |c| c as i64);
convert!(i64_extend_i32_u, pop_i32, I64, |c| c as u32 as i64);

convert!(i32_extend8_s, pop_i32, I32, |c| c as i8 as i32);
convert!(i32_extend16_s, pop_i32, I32, |c| c as i16 as i32);
convert!(i64_extend8_s, pop_i64, I64, |c| c as i8 as i64);
convert!(i64_extend16_s, pop_i64, I64, |c| c as i16 as i64);
convert!(i64_extend32_s, pop_i64, I64, |c| c as i32 as i64);

// ============================================================================
// Float width and reinterpretation
// ============================================================================

convert!(f32_demote_f64, pop_f64, F32, |c| c as f32);
convert!(f64_promote_f32, pop_f32, F64, |c| c as f64);

convert!(i32_reinterpret_f32, pop_f32, I32, |c| c.to_bits() as i32);
convert!(i64_reinterpret_f64, pop_f64, I64, |c| c.to_bits() as i64);
convert!(f32_reinterpret_i32, pop_i32, F32, |c| f32::from_bits(c as u32));
convert!(f64_reinterpret_i64, pop_i64, F64, |c| f64::from_bits(c as u64));

// ============================================================================
// Integer to float (round to nearest)
// ============================================================================

convert!(f32_convert_i32_s, pop_i32, F32, |c| c as f32);
convert!(f32_convert_i32_u, pop_i32, F32, |c| c as u32 as f32);
convert!(f32_convert_i64_s, pop_i64, F32, |c| c as f32);
convert!(f32_convert_i64_u, pop_i64, F32, |c| c as u64 as f32);
convert!(f64_convert_i32_s, pop_i32, F64, |c| c as f64);
convert!(f64_convert_i32_u, pop_i32, F64, |c| c as u32 as f64);
convert!(f64_convert_i64_s, pop_i64, F64, |c| c as f64);
convert!(f64_convert_i64_u, pop_i64, F64, |c| c as u64 as f64);

// ============================================================================
// Float to integer
// ============================================================================

trunc!(i32_trunc_f32_s, pop_f32, I32, i32, I32_MIN, I32_END);
trunc!(i32_trunc_f32_u, pop_f32, I32, u32, 0.0, U32_END);
trunc!(i32_trunc_f64_s, pop_f64, I32, i32, I32_MIN, I32_END);
trunc!(i32_trunc_f64_u, pop_f64, I32, u32, 0.0, U32_END);
trunc!(i64_trunc_f32_s, pop_f32, I64, i64, I64_MIN, I64_END);
trunc!(i64_trunc_f32_u, pop_f32, I64, u64, 0.0, U64_END);
trunc!(i64_trunc_f64_s, pop_f64, I64, i64, I64_MIN, I64_END);
trunc!(i64_trunc_f64_u, pop_f64, I64, u64, 0.0, U64_END);

convert!(i32_trunc_sat_f32_s, pop_f32, I32, |c| c as i32);
convert!(i32_trunc_sat_f32_u, pop_f32, I32, |c| c as u32 as i32);
convert!(i32_trunc_sat_f64_s, pop_f64, I32, |c| c as i32);
convert!(i32_trunc_sat_f64_u, pop_f64, I32, |c| c as u32 as i32);
convert!(i64_trunc_sat_f32_s, pop_f32, I64, |c| c as i64);
convert!(i64_trunc_sat_f32_u, pop_f32, I64, |c| c as u64 as i64);
convert!(i64_trunc_sat_f64_s, pop_f64, I64, |c| c as i64);
convert!(i64_trunc_sat_f64_u, pop_f64, I64, |c| c as u64 as i64);
