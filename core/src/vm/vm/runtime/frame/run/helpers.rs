use anyhow::Result;

use crate::types::{Outcome, exceptions};
use crate::val::Value;
use crate::vm::bytecode::ArgId;
use crate::vm::vm::frame::{Frame, Signal, VarInfo};

#[inline(always)]
pub(super) fn next(pc: usize) -> Signal {
    Signal::Continue(pc + 1)
}

#[inline(always)]
pub(super) fn relative(pc: usize, offset: i32) -> i64 {
    pc as i64 + offset as i64
}

/// Reads every operand, or `None` if any is not ready.
pub(super) fn read_all(frame: &Frame, ids: &[ArgId]) -> Result<Option<Vec<Value>>> {
    let mut values = Vec::with_capacity(ids.len());
    for id in ids {
        match frame.get_argument(*id)? {
            Some(value) => values.push(value),
            None => return Ok(None),
        }
    }
    Ok(Some(values))
}

/// Declared type and name of a VAR op. The type operand is informational;
/// only string or type constants name a type.
pub(super) fn var_info(frame: &Frame, ty: ArgId, name: Option<ArgId>) -> Result<VarInfo> {
    let ty = frame.constant(ty).ok().and_then(|c| c.as_name().cloned());
    let name = match name {
        Some(id) => Some(frame.constant_name(id)?),
        None => None,
    };
    Ok(VarInfo { ty, name })
}

/// Delivers a capability result: assigns on success, raises otherwise.
pub(super) fn deliver(frame: &mut Frame, pc: usize, outcome: Outcome, ret: ArgId) -> Result<Signal> {
    match outcome {
        Outcome::Done(value) => {
            frame.assign_value(ret, value)?;
            Ok(next(pc))
        }
        Outcome::Raise(exc) => frame.raise_exception(Value::Exception(exc)),
    }
}

pub(super) fn truthy(value: &Value) -> Outcome<bool> {
    match value {
        Value::Bool(b) => Outcome::Done(*b),
        other => Outcome::raise(
            exceptions::ILLEGAL_ARGUMENT,
            format!("expected a Boolean condition, found {}", other.type_name()),
        ),
    }
}
