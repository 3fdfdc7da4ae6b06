//! Activation records

use std::rc::Rc;

use super::control::LabelStack;
use super::instance::InstanceRecord;
use super::store::FuncAddr;
use super::Value;

/// One in-progress call of an interpreted function
#[derive(Debug)]
pub struct Frame {
    pub func_addr: FuncAddr,
    /// Address space of the defining instance
    pub instance: Rc<InstanceRecord>,
    /// Index into the module's code section
    pub body_idx: usize,
    /// Parameters followed by declared locals
    pub locals: Vec<Value>,
    /// Next instruction to execute
    pub pc: usize,
    /// Number of results returned to the caller
    pub arity: usize,
    /// Operand-stack height when the frame was entered
    pub height: usize,
    pub labels: LabelStack,
}

impl Frame {
    pub fn local(&self, idx: u32) -> Option<&Value> {
        self.locals.get(idx as usize)
    }

    pub fn local_mut(&mut self, idx: u32) -> Option<&mut Value> {
        self.locals.get_mut(idx as usize)
    }
}
