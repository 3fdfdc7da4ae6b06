//! Local and global variable access

use super::{Stack, Trap, Value};
use crate::runtime::frame::Frame;
use crate::runtime::store::{GlobalAddr, Store};

fn local_slot(frame: &mut Frame, local_idx: u32) -> Result<&mut Value, Trap> {
    frame.local_mut(local_idx).ok_or(Trap::InvalidIndex {
        kind: "local",
        index: local_idx,
    })
}

/// local.get x
pub fn local_get(stack: &mut Stack, frame: &Frame, local_idx: u32) -> Result<(), Trap> {
    let value = frame.local(local_idx).copied().ok_or(Trap::InvalidIndex {
        kind: "local",
        index: local_idx,
    })?;
    stack.push(value);
    Ok(())
}

/// local.set x: the value must have the local's declared type
pub fn local_set(stack: &mut Stack, frame: &mut Frame, local_idx: u32) -> Result<(), Trap> {
    let slot = local_slot(frame, local_idx)?;
    let value = stack.pop_typed(slot.typ())?;
    *slot = value;
    Ok(())
}

/// local.tee x: local.set that leaves the value on the stack
pub fn local_tee(stack: &mut Stack, frame: &mut Frame, local_idx: u32) -> Result<(), Trap> {
    let slot = local_slot(frame, local_idx)?;
    let value = stack.pop_typed(slot.typ())?;
    *slot = value;
    stack.push(value);
    Ok(())
}

/// global.get x, with `x` already resolved to a Store address
pub fn global_get(stack: &mut Stack, store: &Store, addr: GlobalAddr) -> Result<(), Trap> {
    stack.push(store.global_value(addr)?);
    Ok(())
}

/// global.set x; immutable globals trap
pub fn global_set(stack: &mut Stack, store: &mut Store, addr: GlobalAddr) -> Result<(), Trap> {
    let value = stack.pop()?;
    store.set_global(addr, value)
}
