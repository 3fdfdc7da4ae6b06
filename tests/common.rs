//! Common test utilities shared between integration tests
//!
//! [`ModuleBuilder`] assembles exact binary module images section by section,
//! so tests can control every byte the decoder sees.

#![allow(dead_code)]

pub const I32: u8 = 0x7f;
pub const I64: u8 = 0x7e;
pub const F32: u8 = 0x7d;
pub const F64: u8 = 0x7c;
pub const FUNCREF: u8 = 0x70;

/// Opcodes used by the tests
pub mod op {
    pub const UNREACHABLE: u8 = 0x00;
    pub const BLOCK: u8 = 0x02;
    pub const LOOP: u8 = 0x03;
    pub const IF: u8 = 0x04;
    pub const ELSE: u8 = 0x05;
    pub const END: u8 = 0x0b;
    pub const BR: u8 = 0x0c;
    pub const BR_IF: u8 = 0x0d;
    pub const RETURN: u8 = 0x0f;
    pub const CALL: u8 = 0x10;
    pub const CALL_INDIRECT: u8 = 0x11;
    pub const DROP: u8 = 0x1a;
    pub const LOCAL_GET: u8 = 0x20;
    pub const LOCAL_SET: u8 = 0x21;
    pub const LOCAL_TEE: u8 = 0x22;
    pub const GLOBAL_GET: u8 = 0x23;
    pub const GLOBAL_SET: u8 = 0x24;
    pub const I32_LOAD: u8 = 0x28;
    pub const I32_LOAD8_U: u8 = 0x2d;
    pub const I32_STORE: u8 = 0x36;
    pub const I32_STORE8: u8 = 0x3a;
    pub const MEMORY_SIZE: u8 = 0x3f;
    pub const MEMORY_GROW: u8 = 0x40;
    pub const I32_CONST: u8 = 0x41;
    pub const I64_CONST: u8 = 0x42;
    pub const I32_EQZ: u8 = 0x45;
    pub const I64_EQZ: u8 = 0x50;
    pub const I32_ADD: u8 = 0x6a;
    pub const I32_SUB: u8 = 0x6b;
    pub const I32_MUL: u8 = 0x6c;
    pub const I32_DIV_S: u8 = 0x6d;
    pub const I32_REM_U: u8 = 0x70;
    pub const I32_XOR: u8 = 0x73;
    pub const I32_ROTL: u8 = 0x77;
    pub const I64_SUB: u8 = 0x7d;
    pub const I64_MUL: u8 = 0x7e;
}

pub fn leb_u32(mut value: u32) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return out;
        }
        out.push(byte | 0x80);
    }
}

pub fn leb_i64(mut value: i64) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
        if done {
            out.push(byte);
            return out;
        }
        out.push(byte | 0x80);
    }
}

pub fn name(s: &str) -> Vec<u8> {
    let mut out = leb_u32(s.len() as u32);
    out.extend_from_slice(s.as_bytes());
    out
}

/// `i32.const value`
pub fn i32_const(value: i32) -> Vec<u8> {
    let mut out = vec![op::I32_CONST];
    out.extend(leb_i64(value as i64));
    out
}

/// `i64.const value`
pub fn i64_const(value: i64) -> Vec<u8> {
    let mut out = vec![op::I64_CONST];
    out.extend(leb_i64(value));
    out
}

/// A memory access immediate: alignment exponent and offset
pub fn memarg(align: u32, offset: u32) -> Vec<u8> {
    let mut out = leb_u32(align);
    out.extend(leb_u32(offset));
    out
}

fn limits(min: u32, max: Option<u32>) -> Vec<u8> {
    match max {
        Some(max) => {
            let mut out = vec![0x01];
            out.extend(leb_u32(min));
            out.extend(leb_u32(max));
            out
        }
        None => {
            let mut out = vec![0x00];
            out.extend(leb_u32(min));
            out
        }
    }
}

/// One section: id, LEB128 length, payload
pub fn section(id: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![id];
    out.extend(leb_u32(payload.len() as u32));
    out.extend_from_slice(payload);
    out
}

fn vector(entries: &[Vec<u8>]) -> Vec<u8> {
    let mut out = leb_u32(entries.len() as u32);
    for entry in entries {
        out.extend_from_slice(entry);
    }
    out
}

/// Header bytes followed by `sections`
pub fn with_header(sections: &[u8]) -> Vec<u8> {
    let mut out = b"\0asm".to_vec();
    out.extend_from_slice(&[1, 0, 0, 0]);
    out.extend_from_slice(sections);
    out
}

#[derive(Default)]
pub struct ModuleBuilder {
    types: Vec<Vec<u8>>,
    imports: Vec<Vec<u8>>,
    imported_functions: u32,
    functions: Vec<Vec<u8>>,
    tables: Vec<Vec<u8>>,
    memories: Vec<Vec<u8>>,
    globals: Vec<Vec<u8>>,
    exports: Vec<Vec<u8>>,
    start: Option<u32>,
    elements: Vec<Vec<u8>>,
    code: Vec<Vec<u8>>,
    data: Vec<Vec<u8>>,
}

impl ModuleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a function type, returning its index
    pub fn func_type(&mut self, params: &[u8], results: &[u8]) -> u32 {
        let mut entry = vec![0x60];
        entry.extend(leb_u32(params.len() as u32));
        entry.extend_from_slice(params);
        entry.extend(leb_u32(results.len() as u32));
        entry.extend_from_slice(results);
        self.types.push(entry);
        self.types.len() as u32 - 1
    }

    fn import(&mut self, module: &str, field: &str, desc: Vec<u8>) {
        let mut entry = name(module);
        entry.extend(name(field));
        entry.extend(desc);
        self.imports.push(entry);
    }

    /// Import a function, returning its function index. Imports must be
    /// added before any local function.
    pub fn import_func(&mut self, module: &str, field: &str, type_idx: u32) -> u32 {
        assert!(self.functions.is_empty(), "imports come first in the function index space");
        let mut desc = vec![0x00];
        desc.extend(leb_u32(type_idx));
        self.import(module, field, desc);
        self.imported_functions += 1;
        self.imported_functions - 1
    }

    pub fn import_table(&mut self, module: &str, field: &str, min: u32, max: Option<u32>) {
        let mut desc = vec![0x01, FUNCREF];
        desc.extend(limits(min, max));
        self.import(module, field, desc);
    }

    pub fn import_memory(&mut self, module: &str, field: &str, min: u32, max: Option<u32>) {
        let mut desc = vec![0x02];
        desc.extend(limits(min, max));
        self.import(module, field, desc);
    }

    pub fn import_global(&mut self, module: &str, field: &str, value_type: u8, mutable: bool) {
        self.import(module, field, vec![0x03, value_type, mutable as u8]);
    }

    /// Define a function with the given locals and body (without the final
    /// `end`), returning its function index
    pub fn function(&mut self, type_idx: u32, locals: &[(u32, u8)], body: &[u8]) -> u32 {
        self.functions.push(leb_u32(type_idx));

        let mut func = leb_u32(locals.len() as u32);
        for (count, value_type) in locals {
            func.extend(leb_u32(*count));
            func.push(*value_type);
        }
        func.extend_from_slice(body);
        func.push(op::END);

        let mut entry = leb_u32(func.len() as u32);
        entry.extend(func);
        self.code.push(entry);
        self.imported_functions + self.functions.len() as u32 - 1
    }

    pub fn table(&mut self, min: u32, max: Option<u32>) {
        let mut entry = vec![FUNCREF];
        entry.extend(limits(min, max));
        self.tables.push(entry);
    }

    pub fn memory(&mut self, min: u32, max: Option<u32>) {
        self.memories.push(limits(min, max));
    }

    /// Define a global; `init` is the constant expression without its `end`
    pub fn global(&mut self, value_type: u8, mutable: bool, init: &[u8]) {
        let mut entry = vec![value_type, mutable as u8];
        entry.extend_from_slice(init);
        entry.push(op::END);
        self.globals.push(entry);
    }

    fn export(&mut self, field: &str, kind: u8, idx: u32) {
        let mut entry = name(field);
        entry.push(kind);
        entry.extend(leb_u32(idx));
        self.exports.push(entry);
    }

    pub fn export_func(&mut self, field: &str, idx: u32) {
        self.export(field, 0x00, idx);
    }

    pub fn export_table(&mut self, field: &str, idx: u32) {
        self.export(field, 0x01, idx);
    }

    pub fn export_memory(&mut self, field: &str, idx: u32) {
        self.export(field, 0x02, idx);
    }

    pub fn export_global(&mut self, field: &str, idx: u32) {
        self.export(field, 0x03, idx);
    }

    pub fn start(&mut self, func_idx: u32) {
        self.start = Some(func_idx);
    }

    /// Active element segment for table 0 at a constant offset
    pub fn elements(&mut self, offset: i32, funcs: &[u32]) {
        let mut entry = vec![0x00];
        entry.extend(i32_const(offset));
        entry.push(op::END);
        entry.extend(leb_u32(funcs.len() as u32));
        for func in funcs {
            entry.extend(leb_u32(*func));
        }
        self.elements.push(entry);
    }

    /// Active data segment for memory 0 at a constant offset
    pub fn data(&mut self, offset: i32, bytes: &[u8]) {
        let mut entry = vec![0x00];
        entry.extend(i32_const(offset));
        entry.push(op::END);
        entry.extend(leb_u32(bytes.len() as u32));
        entry.extend_from_slice(bytes);
        self.data.push(entry);
    }

    pub fn build(&self) -> Vec<u8> {
        let mut sections = Vec::new();
        push_section(&mut sections, 1, &self.types);
        push_section(&mut sections, 2, &self.imports);
        push_section(&mut sections, 3, &self.functions);
        push_section(&mut sections, 4, &self.tables);
        push_section(&mut sections, 5, &self.memories);
        push_section(&mut sections, 6, &self.globals);
        push_section(&mut sections, 7, &self.exports);
        if let Some(start) = self.start {
            sections.extend(section(8, &leb_u32(start)));
        }
        push_section(&mut sections, 9, &self.elements);
        push_section(&mut sections, 10, &self.code);
        push_section(&mut sections, 11, &self.data);
        with_header(&sections)
    }
}

fn push_section(out: &mut Vec<u8>, id: u8, entries: &[Vec<u8>]) {
    if !entries.is_empty() {
        out.extend(section(id, &vector(entries)));
    }
}

/// Concatenate instruction fragments into one body
pub fn code(parts: &[&[u8]]) -> Vec<u8> {
    parts.concat()
}
