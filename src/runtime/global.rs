//! Global variables

use super::Value;
use crate::parser::module::GlobalType;

/// One typed value plus its mutability. The value's kind always matches
/// `global_type.value_type`.
#[derive(Debug, Clone, PartialEq)]
pub struct Global {
    global_type: GlobalType,
    value: Value,
}

impl Global {
    /// Returns `None` if `value` is not of the declared type.
    pub fn new(global_type: GlobalType, value: Value) -> Option<Self> {
        (value.typ() == global_type.value_type).then_some(Global { global_type, value })
    }

    pub fn global_type(&self) -> GlobalType {
        self.global_type
    }

    pub fn get(&self) -> Value {
        self.value
    }

    /// Replace the value; the type has been checked by the caller.
    pub(crate) fn set_unchecked(&mut self, value: Value) {
        self.value = value;
    }
}
