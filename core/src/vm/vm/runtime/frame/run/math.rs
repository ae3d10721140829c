//! Generic operator and property dispatch. Nothing here looks at concrete
//! value types; every action goes through the target's `TypeSupport`.

use std::cmp::Ordering;
use std::sync::Arc;

use anyhow::Result;

use crate::types::{BinaryAction, Outcome, Property, TypeSupport, UnaryAction, unsupported};
use crate::val::Value;
use crate::vm::bytecode::{ArgId, Relation, Test};
use crate::vm::vm::frame::{Frame, Signal};

use super::helpers::{deliver, next};

/// Which value an in-place op also writes to its result operand.
#[derive(Debug, Clone, Copy)]
pub(super) enum Yield {
    Nothing,
    /// The value before the update (post-increment).
    Old(ArgId),
    /// The value after the update (pre-increment).
    New(ArgId),
}

fn raise(frame: &mut Frame, exc: crate::val::ExceptionHandle) -> Result<Signal> {
    frame.raise_exception(Value::Exception(exc))
}

pub(super) fn binary(
    frame: &mut Frame,
    pc: usize,
    action: BinaryAction,
    target: ArgId,
    arg: ArgId,
    ret: ArgId,
) -> Result<Signal> {
    let lhs = ready!(frame.get_argument(target));
    let rhs = ready!(frame.get_argument(arg));
    let support = frame.support_for(pc, &lhs)?;
    let outcome = support.binary(action, &lhs, &rhs)?;
    deliver(frame, pc, outcome, ret)
}

pub(super) fn unary(frame: &mut Frame, pc: usize, action: UnaryAction, target: ArgId, ret: ArgId) -> Result<Signal> {
    let value = ready!(frame.get_argument(target));
    let support = frame.support_for(pc, &value)?;
    let outcome = support.unary(action, &value)?;
    deliver(frame, pc, outcome, ret)
}

pub(super) fn div_rem(
    frame: &mut Frame,
    pc: usize,
    target: ArgId,
    arg: ArgId,
    quotient: ArgId,
    remainder: ArgId,
) -> Result<Signal> {
    let lhs = ready!(frame.get_argument(target));
    let rhs = ready!(frame.get_argument(arg));
    let support = frame.support_for(pc, &lhs)?;
    match support.div_rem(&lhs, &rhs)? {
        Outcome::Done((q, r)) => {
            frame.assign_value(quotient, q)?;
            frame.assign_value(remainder, r)?;
            Ok(next(pc))
        }
        Outcome::Raise(exc) => raise(frame, exc),
    }
}

pub(super) fn compare(frame: &mut Frame, pc: usize, a: ArgId, b: ArgId) -> Result<Option<Outcome<Ordering>>> {
    let Some(lhs) = frame.get_argument(a)? else {
        return Ok(None);
    };
    let Some(rhs) = frame.get_argument(b)? else {
        return Ok(None);
    };
    let support = frame.support_for(pc, &lhs)?;
    Ok(Some(support.compare(&lhs, &rhs)?))
}

pub(super) fn relation(frame: &mut Frame, pc: usize, rel: Relation, a: ArgId, b: ArgId) -> Result<Option<Outcome<bool>>> {
    if matches!(rel, Relation::Eq | Relation::NEq) {
        let Some(lhs) = frame.get_argument(a)? else {
            return Ok(None);
        };
        let Some(rhs) = frame.get_argument(b)? else {
            return Ok(None);
        };
        let support = frame.support_for(pc, &lhs)?;
        let negate = rel == Relation::NEq;
        return Ok(Some(support.equals(&lhs, &rhs)?.map(|eq| eq != negate)));
    }
    Ok(compare(frame, pc, a, b)?.map(|outcome| outcome.map(|ord| rel.holds(ord))))
}

pub(super) fn test(frame: &mut Frame, pc: usize, test: Test, arg: ArgId) -> Result<Option<Outcome<bool>>> {
    let Some(value) = frame.get_argument(arg)? else {
        return Ok(None);
    };
    Ok(Some(match test {
        Test::Null => Outcome::Done(value.is_null()),
        Test::NNull => Outcome::Done(!value.is_null()),
        Test::Zero | Test::NZero => {
            let support = frame.support_for(pc, &value)?;
            let negate = test == Test::NZero;
            support.is_zero(&value)?.map(|zero| zero != negate)
        }
    }))
}

/// Writes a boolean outcome to `ret`.
pub(super) fn store_bool(frame: &mut Frame, pc: usize, outcome: Outcome<bool>, ret: ArgId) -> Result<Signal> {
    deliver(frame, pc, outcome.map(Value::Bool), ret)
}

/// Jumps by `offset` when the outcome holds.
pub(super) fn branch(frame: &mut Frame, pc: usize, outcome: Outcome<bool>, offset: i32) -> Result<Signal> {
    match outcome {
        Outcome::Done(true) => frame.jump(super::helpers::relative(pc, offset)),
        Outcome::Done(false) => Ok(next(pc)),
        Outcome::Raise(exc) => raise(frame, exc),
    }
}

fn write_yield(frame: &mut Frame, mode: Yield, old: Value, new: Value) -> Result<()> {
    match mode {
        Yield::Nothing => Ok(()),
        Yield::Old(ret) => frame.assign_value(ret, old),
        Yield::New(ret) => frame.assign_value(ret, new),
    }
}

/// IP_INC / IP_DEC and their A/B forms.
pub(super) fn in_place_unary(
    frame: &mut Frame,
    pc: usize,
    action: UnaryAction,
    target: ArgId,
    mode: Yield,
) -> Result<Signal> {
    let old = ready!(frame.get_argument(target));
    let support = frame.support_for(pc, &old)?;
    match support.unary(action, &old)? {
        Outcome::Done(new) => {
            frame.assign_value(target, new.clone())?;
            write_yield(frame, mode, old, new)?;
            Ok(next(pc))
        }
        Outcome::Raise(exc) => raise(frame, exc),
    }
}

/// IP_ADD .. IP_XOR: `target = target <action> arg`.
pub(super) fn in_place_binary(frame: &mut Frame, pc: usize, action: BinaryAction, target: ArgId, arg: ArgId) -> Result<Signal> {
    binary(frame, pc, action, target, arg, target)
}

pub(super) struct PropertySite {
    target: Value,
    support: Arc<dyn TypeSupport>,
    property: Property,
}

/// Resolves the property named by constant `prop` on the value of `target`
/// against the target type's property table.
pub(super) fn resolve_property(
    frame: &mut Frame,
    pc: usize,
    prop: ArgId,
    target: ArgId,
) -> Result<Option<Outcome<PropertySite>>> {
    let name = frame.constant_name(prop)?;
    let Some(value) = frame.get_argument(target)? else {
        return Ok(None);
    };
    let support = frame.support_for(pc, &value)?;
    let property = support.properties().and_then(|table| table.lookup(&name)).cloned();
    Ok(Some(match property {
        Some(property) => Outcome::Done(PropertySite {
            target: value,
            support,
            property,
        }),
        None => unsupported(support.name(), &format!("property '{name}'")),
    }))
}

pub(super) fn get_property(frame: &mut Frame, pc: usize, prop: ArgId, target: ArgId, ret: ArgId) -> Result<Signal> {
    let site = match ready!(resolve_property(frame, pc, prop, target)) {
        Outcome::Done(site) => site,
        Outcome::Raise(exc) => return raise(frame, exc),
    };
    let outcome = site.support.get_property(&site.target, &site.property)?;
    deliver(frame, pc, outcome, ret)
}

pub(super) fn set_property(frame: &mut Frame, pc: usize, prop: ArgId, target: ArgId, value: ArgId) -> Result<Signal> {
    let value = ready!(frame.get_argument(value));
    let resolved = ready!(resolve_property(frame, pc, prop, target));
    let site = match resolved {
        Outcome::Done(site) => site,
        Outcome::Raise(exc) => return raise(frame, exc),
    };
    match site.support.set_property(&site.target, &site.property, value)? {
        Outcome::Done(()) => Ok(next(pc)),
        Outcome::Raise(exc) => raise(frame, exc),
    }
}

/// Read-modify-write of a property: `update` computes the new value from
/// the old one through the old value's own support.
fn update_property(
    frame: &mut Frame,
    pc: usize,
    prop: ArgId,
    target: ArgId,
    arg: Option<ArgId>,
    update: impl FnOnce(&dyn TypeSupport, &Value, Option<&Value>) -> Result<Outcome>,
    mode: Yield,
) -> Result<Signal> {
    let operand = match arg {
        Some(id) => Some(ready!(frame.get_argument(id))),
        None => None,
    };
    let resolved = ready!(resolve_property(frame, pc, prop, target));
    let site = match resolved {
        Outcome::Done(site) => site,
        Outcome::Raise(exc) => return raise(frame, exc),
    };
    let old = match site.support.get_property(&site.target, &site.property)? {
        Outcome::Done(old) => old,
        Outcome::Raise(exc) => return raise(frame, exc),
    };
    let program = Arc::clone(frame.program());
    let value_support = program.types().support_for(&old)?;
    let new = match update(&**value_support, &old, operand.as_ref())? {
        Outcome::Done(new) => new,
        Outcome::Raise(exc) => return raise(frame, exc),
    };
    if let Outcome::Raise(exc) = site.support.set_property(&site.target, &site.property, new.clone())? {
        return raise(frame, exc);
    }
    write_yield(frame, mode, old, new)?;
    Ok(next(pc))
}

/// PIP_INC / PIP_DEC and their A/B forms.
pub(super) fn property_unary(
    frame: &mut Frame,
    pc: usize,
    action: UnaryAction,
    prop: ArgId,
    target: ArgId,
    mode: Yield,
) -> Result<Signal> {
    update_property(frame, pc, prop, target, None, |support, old, _| support.unary(action, old), mode)
}

/// PIP_ADD .. PIP_XOR.
pub(super) fn property_binary(
    frame: &mut Frame,
    pc: usize,
    action: BinaryAction,
    prop: ArgId,
    target: ArgId,
    arg: ArgId,
) -> Result<Signal> {
    update_property(
        frame,
        pc,
        prop,
        target,
        Some(arg),
        |support, old, operand| match operand {
            Some(operand) => support.binary(action, old, operand),
            None => Ok(Outcome::Done(old.clone())),
        },
        Yield::Nothing,
    )
}
