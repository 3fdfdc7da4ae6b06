//! A small WebAssembly-style virtual machine.
//!
//! kasm-vm decodes binary modules, links them against host-supplied imports
//! and runs their functions in a stack-machine interpreter with strict
//! isolation: every memory and table access is bounds-checked, calls are
//! depth-limited and a fault in guest code surfaces as a [`Trap`] instead of
//! taking the host down.
//!
//! # Modules
//!
//! - [`parser`] -- Binary format decoder. Reads module bytes into a [`Module`].
//! - [`runtime`] -- The [`Store`], instantiation, host functions and the interpreter.
//!
//! # Example
//!
//! Decode a module whose exported `addTwo(x)` calls an imported host
//! `env.add` with `(x, 2)`, link it and call it:
//!
//! ```
//! use std::rc::Rc;
//! use kasm_vm::{load, ExternValue, HostFunc, Imports, Store, Value};
//!
//! let bytes = [
//!     0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00, // header
//!     0x01, 0x0c, 0x02, 0x60, 0x02, 0x7f, 0x7f, 0x01, 0x7f, // type 0: (i32, i32) -> i32
//!     0x60, 0x01, 0x7f, 0x01, 0x7f, // type 1: (i32) -> i32
//!     0x02, 0x0b, 0x01, 0x03, b'e', b'n', b'v', 0x03, b'a', b'd', b'd', 0x00, 0x00, // import env.add
//!     0x03, 0x02, 0x01, 0x01, // one function of type 1
//!     0x07, 0x0a, 0x01, 0x06, b'a', b'd', b'd', b'T', b'w', b'o', 0x00, 0x01, // export "addTwo"
//!     0x0a, 0x0a, 0x01, 0x08, 0x00, 0x20, 0x00, 0x41, 0x02, 0x10, 0x00, 0x0b, // add(local 0, 2)
//! ];
//!
//! let module = load(&bytes).unwrap();
//! let mut store = Store::new();
//! let add = store.alloc_host_function(HostFunc::wrap("add", |a: i32, b: i32| a.wrapping_add(b)));
//! let imports = Imports::new().with("env", "add", ExternValue::Function(add));
//! let instance = store.instantiate(Rc::new(module), &imports).unwrap();
//! let results = store.invoke(&instance, "addTwo", &[Value::I32(5)]).unwrap();
//! assert_eq!(results, vec![Value::I32(7)]);
//! ```
//!
//! # Errors
//!
//! Each stage has its own error type: [`DecodeError`] from [`load`],
//! [`InstantiationError`] (wrapping a [`LinkError`], an [`InstantiationTrap`]
//! or a trapping start function) from [`Store::instantiate`] and [`Trap`] from
//! [`Store::invoke`].

pub mod parser;
pub mod runtime;

pub use parser::module::Module;
pub use parser::DecodeError;
pub use runtime::{
    ExportError, ExternValue, HostError, HostFunc, Imports, InstantiationError, InstantiationTrap, LinkError,
    ModuleInstance, Store, StoreConfig, Trap, Value,
};

/// Decode and validate a binary module. Nothing is allocated in any Store;
/// the result can be instantiated any number of times.
pub fn load(bytes: &[u8]) -> Result<Module, DecodeError> {
    parser::parse(bytes)
}
