//! Jump targets for structured control flow.
//!
//! The engine runs a flat instruction stream, so every `block`, `loop`, `if`
//! and `else` needs to know where its matching `else`/`end` lives. The map is
//! computed once per function body when the body is decoded.

use super::instruction::InstructionKind;
use super::DecodeError;

/// Resolved targets of one structured instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockTarget {
    /// Position of the matching `else`, for an `if` that has one.
    pub else_pc: Option<usize>,
    /// Position of the matching `end`.
    pub end_pc: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockMap {
    targets: Vec<Option<BlockTarget>>,
}

impl BlockMap {
    /// Match every structured instruction with its `else`/`end`. The stream
    /// must be closed by exactly one trailing `end` for the function body.
    pub fn build(instructions: &[InstructionKind]) -> Result<BlockMap, DecodeError> {
        let mut targets = vec![None; instructions.len()];
        // (pc of opener, pc of else if seen)
        let mut open: Vec<(usize, Option<usize>)> = Vec::new();

        for (pc, instruction) in instructions.iter().enumerate() {
            match instruction {
                InstructionKind::Block { .. }
                | InstructionKind::Loop { .. }
                | InstructionKind::If { .. } => open.push((pc, None)),
                InstructionKind::Else => {
                    let top = open.last_mut().ok_or_else(|| {
                        DecodeError::Malformed(format!("else without if at instruction {}", pc))
                    })?;
                    let is_if = matches!(instructions[top.0], InstructionKind::If { .. });
                    if !is_if || top.1.is_some() {
                        return Err(DecodeError::Malformed(format!(
                            "else without matching if at instruction {}",
                            pc
                        )));
                    }
                    top.1 = Some(pc);
                }
                InstructionKind::End => match open.pop() {
                    Some((opener, else_pc)) => {
                        targets[opener] = Some(BlockTarget { else_pc, end_pc: pc });
                        if let Some(else_pc) = else_pc {
                            targets[else_pc] = Some(BlockTarget {
                                else_pc: None,
                                end_pc: pc,
                            });
                        }
                    }
                    None => {
                        if pc + 1 != instructions.len() {
                            return Err(DecodeError::Malformed(format!(
                                "instructions after the final end at instruction {}",
                                pc
                            )));
                        }
                        return Ok(BlockMap { targets });
                    }
                },
                _ => {}
            }
        }

        Err(DecodeError::Malformed(
            "function body is missing its final end".to_string(),
        ))
    }

    pub fn get(&self, pc: usize) -> Option<&BlockTarget> {
        self.targets.get(pc).and_then(Option::as_ref)
    }
}
