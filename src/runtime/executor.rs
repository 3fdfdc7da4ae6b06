//! The execution engine
//!
//! Function bodies are run as flat instruction streams. Structured control
//! flow is tracked with an explicit label stack per frame and calls push an
//! explicit [`Frame`], so nesting depth in the guest never grows the host
//! stack. The only host recursion is a host function calling back into the
//! Store, and that is bounded by the shared call-depth limit.
//!
//! ```text
//!   operand stack:  [ .. caller values | args→locals | block values .. ]
//!                                      ▲ frame.height   ▲ label.height
//!   frames:         [ outer, .., current ]
//!   current.labels: [ block, loop, if .. ]   (innermost last)
//! ```
//!
//! A branch to label `n` keeps the top `arity` values, drops everything
//! down to that label's height and continues at its continuation: past the
//! `end` for blocks and ifs, back at the first body instruction for loops.
//! Branching to the label one past the outermost is a return.

use std::rc::Rc;

use log::trace;

use super::control::{Label, LabelKind, LabelStack};
use super::frame::Frame;
use super::instance::InstanceRecord;
use super::memory::Memory;
use super::ops;
use super::stack::Stack;
use super::store::{FuncAddr, FunctionInstance, Store};
use super::value::describe_types;
use super::{Trap, Value};
use crate::parser::instruction::{BlockType, InstructionKind};
use crate::parser::module::{FunctionBody, Module, ValueType};

/// Run `func` to completion. Used by every entry point into the engine,
/// including host functions calling back in.
pub(crate) fn execute(store: &mut Store, func: FuncAddr, args: &[Value]) -> Result<Vec<Value>, Trap> {
    let func_type = store.function_type(func)?.clone();
    check_values(&func_type.parameters, args)?;

    // An outermost call gets a fresh instruction budget; calls made from
    // host functions keep spending the budget of the call that made them.
    if store.depth == 0 {
        store.fuel = store.config().instruction_budget;
    }
    let entry_depth = store.depth;
    let result = Executor::new().run(store, func, args, func_type.return_types.len());
    store.depth = entry_depth;

    let results = result?;
    if let Some((expected, actual)) = first_mismatch(&func_type.return_types, &results) {
        return Err(Trap::TypeMismatch {
            opcode: "return",
            expected,
            actual,
        });
    }
    Ok(results)
}

/// What the run loop does after an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    /// Continue with the next instruction
    Next,
    /// Continue at the given instruction of the current frame
    Jump(usize),
    /// A new frame was pushed
    Call,
    /// The current frame was popped
    Return,
}

pub(crate) struct Executor {
    stack: Stack,
    frames: Vec<Frame>,
}

impl Executor {
    pub fn new() -> Self {
        Executor {
            stack: Stack::new(),
            frames: Vec::new(),
        }
    }

    fn run(&mut self, store: &mut Store, func: FuncAddr, args: &[Value], arity: usize) -> Result<Vec<Value>, Trap> {
        self.stack.push_all(args.iter().copied());
        if self.call(store, func)? == Flow::Call {
            self.run_frames(store)?;
        }
        let results = self.stack.pop_n(arity)?;
        debug_assert!(self.stack.is_empty());
        Ok(results)
    }

    /// Execute instructions until the frame stack is empty.
    fn run_frames(&mut self, store: &mut Store) -> Result<(), Trap> {
        'frames: while let Some(frame) = self.frames.last() {
            let instance = Rc::clone(&frame.instance);
            let body_idx = frame.body_idx;
            let mut pc = frame.pc;
            let body = function_body(instance.module(), body_idx)?;

            loop {
                let instruction = body.instructions.get(pc).ok_or(Trap::InvalidIndex {
                    kind: "instruction",
                    index: pc as u32,
                })?;
                store.consume_fuel()?;
                trace!("{:>5}: {}", pc, instruction);

                #[cfg(debug_assertions)]
                let expected_height = instruction
                    .stack_effect()
                    .and_then(|(pops, pushes)| self.stack.height().checked_sub(pops).map(|h| h + pushes));

                let flow = self
                    .step(store, &instance, body, pc, instruction)
                    .map_err(|trap| trap.at(instruction.mnemonic()))?;

                #[cfg(debug_assertions)]
                {
                    if let Some(expected) = expected_height {
                        debug_assert_eq!(self.stack.height(), expected, "stack effect of {}", instruction);
                    }
                }

                match flow {
                    Flow::Next => pc += 1,
                    Flow::Jump(target) => pc = target,
                    Flow::Call | Flow::Return => continue 'frames,
                }
            }
        }
        Ok(())
    }

    fn step(
        &mut self,
        store: &mut Store,
        instance: &InstanceRecord,
        body: &FunctionBody,
        pc: usize,
        instruction: &InstructionKind,
    ) -> Result<Flow, Trap> {
        use InstructionKind::*;
        let module = instance.module();

        match instruction {
            Unreachable => return Err(Trap::Unreachable),
            Nop => {}

            // Control
            Block { block_type } => {
                let end_pc = block_end(body, pc)?;
                self.enter_block(module, LabelKind::Block, block_type, end_pc + 1)?;
            }
            Loop { block_type } => self.enter_block(module, LabelKind::Loop, block_type, pc + 1)?,
            If { block_type } => {
                let condition = self.stack.pop_i32()?;
                let target = *body.blocks.get(pc).ok_or(Trap::InvalidIndex {
                    kind: "block",
                    index: pc as u32,
                })?;
                self.enter_block(module, LabelKind::If, block_type, target.end_pc + 1)?;
                if condition == 0 {
                    // Into the else arm, or straight to the end (which pops the label)
                    let next = target.else_pc.map_or(target.end_pc, |else_pc| else_pc + 1);
                    return Ok(Flow::Jump(next));
                }
            }
            // Reached only by falling off the end of a then arm
            Else => return Ok(Flow::Jump(block_end(body, pc)?)),
            End => {
                if current(&mut self.frames)?.labels.pop().is_none() {
                    return self.return_from_frame(store);
                }
            }
            Br { label_idx } => return self.branch(store, *label_idx),
            BrIf { label_idx } => {
                if self.stack.pop_i32()? != 0 {
                    return self.branch(store, *label_idx);
                }
            }
            BrTable { labels, default } => {
                let idx = self.stack.pop_i32()? as u32;
                let label_idx = labels.get(idx as usize).copied().unwrap_or(*default);
                return self.branch(store, label_idx);
            }
            Return => return self.return_from_frame(store),
            Call { func_idx } => {
                let addr = instance.func(*func_idx)?;
                current(&mut self.frames)?.pc = pc + 1;
                return self.call(store, addr);
            }
            CallIndirect { type_idx, table_idx } => {
                let expected = module.types.get(*type_idx as usize).ok_or(Trap::InvalidIndex {
                    kind: "type",
                    index: *type_idx,
                })?;
                let table_addr = instance.table(*table_idx)?;
                let elem = self.stack.pop_i32()? as u32;
                let addr = store
                    .table(table_addr)?
                    .get(elem)?
                    .ok_or(Trap::UndefinedElement { index: elem })?;
                let actual = store.function_type(addr)?;
                if actual != expected {
                    return Err(Trap::IndirectCallTypeMismatch {
                        expected: expected.clone(),
                        actual: actual.clone(),
                    });
                }
                current(&mut self.frames)?.pc = pc + 1;
                return self.call(store, addr);
            }

            // References
            RefNull => self.stack.push(Value::FuncRef(None)),
            RefIsNull => {
                let reference = self.stack.pop_typed(ValueType::FuncRef)?;
                self.stack.push(Value::I32(matches!(reference, Value::FuncRef(None)) as i32));
            }
            RefFunc { func_idx } => self.stack.push(Value::FuncRef(Some(instance.func(*func_idx)?))),

            // Parametric
            Drop => ops::parametric::drop(&mut self.stack)?,
            Select => ops::parametric::select(&mut self.stack, None)?,
            SelectTyped { val_type } => ops::parametric::select(&mut self.stack, Some(*val_type))?,

            // Variables
            LocalGet { local_idx } => ops::variable::local_get(&mut self.stack, current(&mut self.frames)?, *local_idx)?,
            LocalSet { local_idx } => ops::variable::local_set(&mut self.stack, current(&mut self.frames)?, *local_idx)?,
            LocalTee { local_idx } => ops::variable::local_tee(&mut self.stack, current(&mut self.frames)?, *local_idx)?,
            GlobalGet { global_idx } => ops::variable::global_get(&mut self.stack, store, instance.global(*global_idx)?)?,
            GlobalSet { global_idx } => ops::variable::global_set(&mut self.stack, store, instance.global(*global_idx)?)?,

            // Memory
            I32Load { memarg } => ops::memory::i32_load(&mut self.stack, memory(store, instance)?, memarg)?,
            I64Load { memarg } => ops::memory::i64_load(&mut self.stack, memory(store, instance)?, memarg)?,
            F32Load { memarg } => ops::memory::f32_load(&mut self.stack, memory(store, instance)?, memarg)?,
            F64Load { memarg } => ops::memory::f64_load(&mut self.stack, memory(store, instance)?, memarg)?,
            I32Load8S { memarg } => ops::memory::i32_load8_s(&mut self.stack, memory(store, instance)?, memarg)?,
            I32Load8U { memarg } => ops::memory::i32_load8_u(&mut self.stack, memory(store, instance)?, memarg)?,
            I32Load16S { memarg } => ops::memory::i32_load16_s(&mut self.stack, memory(store, instance)?, memarg)?,
            I32Load16U { memarg } => ops::memory::i32_load16_u(&mut self.stack, memory(store, instance)?, memarg)?,
            I64Load8S { memarg } => ops::memory::i64_load8_s(&mut self.stack, memory(store, instance)?, memarg)?,
            I64Load8U { memarg } => ops::memory::i64_load8_u(&mut self.stack, memory(store, instance)?, memarg)?,
            I64Load16S { memarg } => ops::memory::i64_load16_s(&mut self.stack, memory(store, instance)?, memarg)?,
            I64Load16U { memarg } => ops::memory::i64_load16_u(&mut self.stack, memory(store, instance)?, memarg)?,
            I64Load32S { memarg } => ops::memory::i64_load32_s(&mut self.stack, memory(store, instance)?, memarg)?,
            I64Load32U { memarg } => ops::memory::i64_load32_u(&mut self.stack, memory(store, instance)?, memarg)?,
            I32Store { memarg } => ops::memory::i32_store(&mut self.stack, memory_mut(store, instance)?, memarg)?,
            I64Store { memarg } => ops::memory::i64_store(&mut self.stack, memory_mut(store, instance)?, memarg)?,
            F32Store { memarg } => ops::memory::f32_store(&mut self.stack, memory_mut(store, instance)?, memarg)?,
            F64Store { memarg } => ops::memory::f64_store(&mut self.stack, memory_mut(store, instance)?, memarg)?,
            I32Store8 { memarg } => ops::memory::i32_store8(&mut self.stack, memory_mut(store, instance)?, memarg)?,
            I32Store16 { memarg } => ops::memory::i32_store16(&mut self.stack, memory_mut(store, instance)?, memarg)?,
            I64Store8 { memarg } => ops::memory::i64_store8(&mut self.stack, memory_mut(store, instance)?, memarg)?,
            I64Store16 { memarg } => ops::memory::i64_store16(&mut self.stack, memory_mut(store, instance)?, memarg)?,
            I64Store32 { memarg } => ops::memory::i64_store32(&mut self.stack, memory_mut(store, instance)?, memarg)?,
            MemorySize => ops::memory::memory_size(&mut self.stack, memory(store, instance)?)?,
            MemoryGrow => {
                let ceiling = store.config().max_memory_pages;
                ops::memory::memory_grow(&mut self.stack, memory_mut(store, instance)?, ceiling)?;
            }
            MemoryCopy => ops::memory::memory_copy(&mut self.stack, memory_mut(store, instance)?)?,
            MemoryFill => ops::memory::memory_fill(&mut self.stack, memory_mut(store, instance)?)?,

            numeric => ops::execute_numeric(numeric, &mut self.stack)?,
        }
        Ok(Flow::Next)
    }

    /// Call a function with its arguments on top of the operand stack.
    /// Host functions run to completion here; interpreted functions get a
    /// new frame and run when the loop picks it up.
    fn call(&mut self, store: &mut Store, addr: FuncAddr) -> Result<Flow, Trap> {
        match store.function(addr)? {
            FunctionInstance::Host { func_type, host } => {
                let host = host.clone();
                let args = self.stack.pop_n(func_type.parameters.len())?;
                check_values(&func_type.parameters, &args)?;
                enter(store)?;
                let results = host.call(store, &args);
                store.depth -= 1;
                self.stack.push_all(results?);
                Ok(Flow::Next)
            }
            FunctionInstance::Interpreted {
                func_type,
                instance,
                body_idx,
            } => {
                let instance = Rc::clone(instance);
                let body_idx = *body_idx;
                let arity = func_type.return_types.len();
                let mut locals = self.stack.pop_n(func_type.parameters.len())?;
                check_values(&func_type.parameters, &locals)?;

                let body = function_body(instance.module(), body_idx)?;
                locals.extend(body.locals.types().map(Value::default_for));
                enter(store)?;
                trace!(
                    "call function {}{} at depth {}",
                    addr.0,
                    describe_types(&locals),
                    store.depth
                );

                self.frames.push(Frame {
                    func_addr: addr,
                    instance,
                    body_idx,
                    locals,
                    pc: 0,
                    arity,
                    height: self.stack.height(),
                    labels: LabelStack::new(),
                });
                Ok(Flow::Call)
            }
        }
    }

    fn return_from_frame(&mut self, store: &mut Store) -> Result<Flow, Trap> {
        let frame = self.frames.pop().ok_or(Trap::InvalidIndex { kind: "frame", index: 0 })?;
        self.stack.unwind(frame.height, frame.arity)?;
        store.depth = store.depth.saturating_sub(1);
        trace!("return from function {}", frame.func_addr.0);
        Ok(Flow::Return)
    }

    fn enter_block(
        &mut self,
        module: &Module,
        kind: LabelKind,
        block_type: &BlockType,
        continuation: usize,
    ) -> Result<(), Trap> {
        let (params, results) = block_arity(module, block_type)?;
        let height = self
            .stack
            .height()
            .checked_sub(params)
            .ok_or(Trap::StackUnderflow { opcode: "" })?;
        let arity = match kind {
            LabelKind::Loop => params,
            LabelKind::Block | LabelKind::If => results,
        };
        current(&mut self.frames)?.labels.push(Label {
            kind,
            arity,
            height,
            continuation,
        });
        Ok(())
    }

    fn branch(&mut self, store: &mut Store, depth: u32) -> Result<Flow, Trap> {
        let frame = current(&mut self.frames)?;
        if depth as usize == frame.labels.depth() {
            return self.return_from_frame(store);
        }
        let label = frame.labels.get(depth).cloned().ok_or(Trap::InvalidIndex {
            kind: "label",
            index: depth,
        })?;
        self.stack.unwind(label.height, label.arity)?;
        // A loop label survives a branch to it; any other target is exited.
        let exited = match label.kind {
            LabelKind::Loop => depth as usize,
            LabelKind::Block | LabelKind::If => depth as usize + 1,
        };
        frame.labels.drop_innermost(exited);
        Ok(Flow::Jump(label.continuation))
    }
}

fn current(frames: &mut [Frame]) -> Result<&mut Frame, Trap> {
    frames.last_mut().ok_or(Trap::InvalidIndex { kind: "frame", index: 0 })
}

fn enter(store: &mut Store) -> Result<(), Trap> {
    if store.depth >= store.config().max_call_depth {
        return Err(Trap::CallStackExhausted { depth: store.depth });
    }
    store.depth += 1;
    Ok(())
}

fn function_body(module: &Module, body_idx: usize) -> Result<&FunctionBody, Trap> {
    module.code.get(body_idx).ok_or(Trap::InvalidIndex {
        kind: "function body",
        index: body_idx as u32,
    })
}

fn block_end(body: &FunctionBody, pc: usize) -> Result<usize, Trap> {
    body.blocks
        .get(pc)
        .map(|target| target.end_pc)
        .ok_or(Trap::InvalidIndex {
            kind: "block",
            index: pc as u32,
        })
}

/// (parameter count, result count) of a block type
fn block_arity(module: &Module, block_type: &BlockType) -> Result<(usize, usize), Trap> {
    match block_type {
        BlockType::Empty => Ok((0, 0)),
        BlockType::Value(_) => Ok((0, 1)),
        BlockType::FuncType(idx) => module
            .types
            .get(*idx as usize)
            .map(|ft| (ft.parameters.len(), ft.return_types.len()))
            .ok_or(Trap::InvalidIndex {
                kind: "type",
                index: *idx,
            }),
    }
}

fn memory<'s>(store: &'s Store, instance: &InstanceRecord) -> Result<&'s Memory, Trap> {
    store.memory(instance.memory(0)?)
}

fn memory_mut<'s>(store: &'s mut Store, instance: &InstanceRecord) -> Result<&'s mut Memory, Trap> {
    store.memory_mut(instance.memory(0)?)
}

fn first_mismatch(expected: &[ValueType], values: &[Value]) -> Option<(ValueType, ValueType)> {
    expected
        .iter()
        .zip(values)
        .find(|(expected, value)| value.typ() != **expected)
        .map(|(expected, value)| (*expected, value.typ()))
}

/// Arguments must match the parameter types exactly, in count and type.
fn check_values(expected: &[ValueType], values: &[Value]) -> Result<(), Trap> {
    if expected.len() != values.len() || first_mismatch(expected, values).is_some() {
        let expected: Vec<String> = expected.iter().map(ToString::to_string).collect();
        return Err(Trap::ArgumentMismatch {
            expected: format!("({})", expected.join(", ")),
            actual: describe_types(values),
        });
    }
    Ok(())
}
