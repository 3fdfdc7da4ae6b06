//! Host functions
//!
//! A [`HostFunc`] is a Rust closure with a declared [`FunctionType`]. To the
//! engine it looks exactly like an interpreted function: arguments are popped
//! from the operand stack, the closure runs synchronously and its results are
//! checked against the declared type before they are pushed. Errors returned
//! by the closure become [`Trap::Host`].

use std::fmt;
use std::rc::Rc;

use log::{trace, warn};

use super::store::Store;
use super::value::describe_types;
use super::{Trap, Value};
use crate::parser::module::{FunctionType, ValueType};

/// Failure reported by a host callback
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct HostError {
    pub message: String,
}

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        HostError {
            message: message.into(),
        }
    }
}

impl From<&str> for HostError {
    fn from(message: &str) -> Self {
        HostError::new(message)
    }
}

impl From<String> for HostError {
    fn from(message: String) -> Self {
        HostError::new(message)
    }
}

/// Lets a host callback propagate a trap from a nested `invoke` with `?`.
impl From<Trap> for HostError {
    fn from(trap: Trap) -> Self {
        HostError::new(trap.to_string())
    }
}

type HostCallback = dyn Fn(&mut Store, &[Value]) -> Result<Vec<Value>, HostError>;

/// A named host callback and its signature
#[derive(Clone)]
pub struct HostFunc {
    name: String,
    func_type: FunctionType,
    callback: Rc<HostCallback>,
}

impl HostFunc {
    /// A callback over raw values. The callback receives the Store so it can
    /// read memory or call back into the VM.
    pub fn new<F>(name: impl Into<String>, func_type: FunctionType, callback: F) -> Self
    where
        F: Fn(&mut Store, &[Value]) -> Result<Vec<Value>, HostError> + 'static,
    {
        HostFunc {
            name: name.into(),
            func_type,
            callback: Rc::new(callback),
        }
    }

    /// A typed closure; the signature is derived from its parameter and
    /// result types.
    ///
    /// ```
    /// use kasm_vm::runtime::HostFunc;
    ///
    /// let add = HostFunc::wrap("add", |a: i32, b: i32| a.wrapping_add(b));
    /// assert_eq!(add.func_type().to_string(), "(i32, i32) -> (i32)");
    /// ```
    pub fn wrap<Params, Results, F>(name: impl Into<String>, callback: F) -> Self
    where
        F: IntoHostFunc<Params, Results>,
    {
        callback.into_host_func(name.into())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn func_type(&self) -> &FunctionType {
        &self.func_type
    }

    /// Run the callback with arguments already checked against the signature.
    pub(crate) fn call(&self, store: &mut Store, args: &[Value]) -> Result<Vec<Value>, Trap> {
        trace!("host call {}{}", self.name, describe_types(args));
        let results = (self.callback)(store, args).map_err(|err| {
            warn!("host function {} failed: {}", self.name, err);
            Trap::Host {
                function: self.name.clone(),
                message: err.message,
            }
        })?;

        let matches = results.len() == self.func_type.return_types.len()
            && results
                .iter()
                .zip(&self.func_type.return_types)
                .all(|(value, expected)| value.typ() == *expected);
        if !matches {
            warn!("host function {} returned {}", self.name, describe_types(&results));
            return Err(Trap::HostResultMismatch {
                function: self.name.clone(),
                expected: self.func_type.to_string(),
                actual: describe_types(&results),
            });
        }
        Ok(results)
    }
}

impl fmt::Debug for HostFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunc")
            .field("name", &self.name)
            .field("func_type", &self.func_type)
            .finish_non_exhaustive()
    }
}

/// Rust types that map one-to-one onto a numeric value type
pub trait WasmType: Sized {
    const TYPE: ValueType;
    fn from_value(value: Value) -> Option<Self>;
    fn into_value(self) -> Value;
}

macro_rules! wasm_type {
    ($ty:ty, $variant:ident) => {
        impl WasmType for $ty {
            const TYPE: ValueType = ValueType::$variant;

            fn from_value(value: Value) -> Option<Self> {
                match value {
                    Value::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn into_value(self) -> Value {
                Value::$variant(self)
            }
        }
    };
}

wasm_type!(i32, I32);
wasm_type!(i64, I64);
wasm_type!(f32, F32);
wasm_type!(f64, F64);

/// Return types of typed host closures: nothing, one value, or either of
/// those wrapped in a `Result`
pub trait WasmResults {
    fn types() -> Vec<ValueType>;
    fn into_values(self) -> Result<Vec<Value>, HostError>;
}

impl WasmResults for () {
    fn types() -> Vec<ValueType> {
        vec![]
    }

    fn into_values(self) -> Result<Vec<Value>, HostError> {
        Ok(vec![])
    }
}

impl<T: WasmType> WasmResults for T {
    fn types() -> Vec<ValueType> {
        vec![T::TYPE]
    }

    fn into_values(self) -> Result<Vec<Value>, HostError> {
        Ok(vec![self.into_value()])
    }
}

impl<R: WasmResults> WasmResults for Result<R, HostError> {
    fn types() -> Vec<ValueType> {
        R::types()
    }

    fn into_values(self) -> Result<Vec<Value>, HostError> {
        self?.into_values()
    }
}

/// Closures that [`HostFunc::wrap`] accepts
pub trait IntoHostFunc<Params, Results> {
    fn into_host_func(self, name: String) -> HostFunc;
}

macro_rules! into_host_func {
    ($($param:ident $arg:ident),*) => {
        impl<F, R, $($param,)*> IntoHostFunc<($($param,)*), R> for F
        where
            F: Fn($($param),*) -> R + 'static,
            R: WasmResults + 'static,
            $($param: WasmType + 'static,)*
        {
            #[allow(unused_mut, unused_variables)]
            fn into_host_func(self, name: String) -> HostFunc {
                let func_type = FunctionType::new(vec![$($param::TYPE),*], R::types());
                HostFunc::new(name, func_type, move |_store: &mut Store, args: &[Value]| {
                    let mut args = args.iter().copied();
                    $(
                        let $arg = args
                            .next()
                            .and_then($param::from_value)
                            .ok_or_else(|| HostError::new("argument type mismatch"))?;
                    )*
                    (self)($($arg),*).into_values()
                })
            }
        }
    };
}

into_host_func!();
into_host_func!(A a);
into_host_func!(A a, B b);
into_host_func!(A a, B b, C c);
