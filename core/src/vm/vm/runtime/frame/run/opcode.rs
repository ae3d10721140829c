use anyhow::{Result, bail};

use crate::types::{Outcome, UnaryAction, exceptions};
use crate::val::{ExceptionHandle, Value};
use crate::vm::bytecode::Op;
use crate::vm::error::VmFault;
use crate::vm::vm::frame::{Frame, Signal, VarInfo, VarStyle};
use crate::vm::vm::guards::{Guard, GuardKind, Handler};

use super::helpers::{deliver, next, read_all, relative, truthy, var_info};
use super::invoke::{call, construct};
use super::math::{self, Yield};

impl Op {
    /// Executes this op at `pc` and says where control goes next. An op that
    /// signals [`Signal::Repeat`] has not touched the frame.
    pub fn process(&self, frame: &mut Frame, pc: usize) -> Result<Signal> {
        frame.pc = pc;
        match self {
            Op::Nop => Ok(next(pc)),
            Op::Line1 | Op::Line2 | Op::Line3 | Op::LineN(_) => {
                frame.line += match self {
                    Op::Line1 => 1,
                    Op::Line2 => 2,
                    Op::Line3 => 3,
                    Op::LineN(delta) => *delta as i64,
                    _ => 0,
                };
                Ok(next(pc))
            }
            Op::Enter => {
                frame.enter_scope(0)?;
                Ok(next(pc))
            }
            Op::Exit => {
                frame.exit_scope()?;
                Ok(next(pc))
            }
            Op::Guard(clauses) => {
                let mut handlers = Vec::with_capacity(clauses.len());
                for clause in clauses {
                    handlers.push(Handler {
                        type_name: frame.constant_name(clause.type_const)?,
                        var_name: frame.constant_name(clause.name_const)?,
                        address: relative(pc, clause.offset) as usize,
                    });
                }
                open_guard(frame, pc, GuardKind::Catch(handlers))
            }
            Op::GuardAll(offset) => {
                let address = relative(pc, *offset) as usize;
                open_guard(frame, pc, GuardKind::Finally { address })
            }
            Op::GuardEnd(offset) => {
                let depth = frame.depth();
                match frame.pop_guard()? {
                    Guard {
                        kind: GuardKind::Catch(_),
                        scope,
                        ..
                    } if scope == depth => {}
                    other => bail!(VmFault::GuardNesting {
                        detail: format!("GUARD_END at {pc} does not close the top guard {other:?}"),
                    }),
                }
                frame.exit_scope()?;
                frame.jump(relative(pc, *offset))
            }
            Op::Catch => frame.enter_catch(pc),
            Op::CatchEnd(offset) => {
                frame.exit_scope()?;
                frame.jump(relative(pc, *offset))
            }
            Op::Finally => frame.enter_finally(pc),
            Op::FinallyEnd => frame.exit_finally(pc),
            Op::Throw(arg) => {
                let value = ready!(frame.get_argument(*arg));
                frame.raise_exception(value)
            }
            Op::Goto(address) => frame.jump(*address as i64),
            Op::Jmp(offset) => frame.jump(relative(pc, *offset)),

            Op::Call { fun, args, result } => call(frame, *fun, args, result),
            Op::New0 { class, ret } => construct(frame, pc, *class, &[], *ret),
            Op::New1 { class, arg, ret } => construct(frame, pc, *class, &[*arg], *ret),
            Op::NewN { class, args, ret } => construct(frame, pc, *class, args, *ret),

            Op::Return0 => frame.return_values(Vec::new()),
            Op::Return1(arg) => {
                let value = ready!(frame.get_argument(*arg));
                frame.return_value(value)
            }
            Op::ReturnN(args) => {
                let values = ready!(read_all(frame, args));
                frame.return_values(values)
            }
            Op::ReturnT(arg) => {
                let tuple = ready!(frame.get_argument(*arg));
                frame.return_tuple(tuple)
            }

            Op::Var { ty } => declare(frame, pc, var_info(frame, *ty, None)?, VarStyle::Standard, None),
            Op::VarI { ty, init } => {
                let init = ready!(frame.get_argument(*init));
                declare(frame, pc, var_info(frame, *ty, None)?, VarStyle::Standard, Some(init))
            }
            Op::VarN { ty, name } => declare(frame, pc, var_info(frame, *ty, Some(*name))?, VarStyle::Standard, None),
            Op::VarIN { ty, name, init } => {
                let init = ready!(frame.get_argument(*init));
                declare(frame, pc, var_info(frame, *ty, Some(*name))?, VarStyle::Standard, Some(init))
            }
            Op::VarD { ty } => declare(frame, pc, var_info(frame, *ty, None)?, VarStyle::Dynamic, None),
            Op::VarDN { ty, name } => declare(frame, pc, var_info(frame, *ty, Some(*name))?, VarStyle::Dynamic, None),
            Op::VarT { ty, values } => {
                let values = ready!(read_all(frame, values));
                let info = var_info(frame, *ty, None)?;
                declare(frame, pc, info, VarStyle::Standard, Some(Value::tuple(values)))
            }
            Op::VarTN { ty, name, values } => {
                let values = ready!(read_all(frame, values));
                let info = var_info(frame, *ty, Some(*name))?;
                declare(frame, pc, info, VarStyle::Standard, Some(Value::tuple(values)))
            }

            Op::Mov { from, to } => {
                let value = ready!(frame.get_argument(*from));
                frame.assign_value(*to, value)?;
                Ok(next(pc))
            }
            Op::Cmp { a, b, ret } => {
                let outcome = ready!(math::compare(frame, pc, *a, *b));
                deliver(frame, pc, outcome.map(|ord| Value::Int(ord as i64)), *ret)
            }
            Op::IsTest { test, arg, ret } => {
                let outcome = ready!(math::test(frame, pc, *test, *arg));
                math::store_bool(frame, pc, outcome, *ret)
            }
            Op::IsCmp { rel, a, b, ret } => {
                let outcome = ready!(math::relation(frame, pc, *rel, *a, *b));
                math::store_bool(frame, pc, outcome, *ret)
            }
            Op::IsNot { arg, ret } => {
                let value = ready!(frame.get_argument(*arg));
                math::store_bool(frame, pc, truthy(&value).map(|b| !b), *ret)
            }
            Op::JmpTrue { arg, offset } => {
                let value = ready!(frame.get_argument(*arg));
                math::branch(frame, pc, truthy(&value), *offset)
            }
            Op::JmpFalse { arg, offset } => {
                let value = ready!(frame.get_argument(*arg));
                math::branch(frame, pc, truthy(&value).map(|b| !b), *offset)
            }
            Op::JmpTest { test, arg, offset } => {
                let outcome = ready!(math::test(frame, pc, *test, *arg));
                math::branch(frame, pc, outcome, *offset)
            }
            Op::JmpCmp { rel, a, b, offset } => {
                let outcome = ready!(math::relation(frame, pc, *rel, *a, *b));
                math::branch(frame, pc, outcome, *offset)
            }
            Op::Assert(arg) => {
                let value = ready!(frame.get_argument(*arg));
                match truthy(&value) {
                    Outcome::Done(true) => Ok(next(pc)),
                    Outcome::Done(false) => frame.raise_exception(Value::Exception(ExceptionHandle::new(
                        exceptions::ASSERTION,
                        format!("assertion failed at pc {pc}"),
                    ))),
                    Outcome::Raise(exc) => frame.raise_exception(Value::Exception(exc)),
                }
            }

            Op::GpBinary {
                action,
                target,
                arg,
                ret,
            } => math::binary(frame, pc, *action, *target, *arg, *ret),
            Op::GpDivRem {
                target,
                arg,
                quotient,
                remainder,
            } => math::div_rem(frame, pc, *target, *arg, *quotient, *remainder),
            Op::GpNeg { target, ret } => math::unary(frame, pc, UnaryAction::Neg, *target, *ret),
            Op::GpCompl { target, ret } => math::unary(frame, pc, UnaryAction::Compl, *target, *ret),

            Op::PGet { prop, target, ret } => math::get_property(frame, pc, *prop, *target, *ret),
            Op::PSet { prop, target, value } => math::set_property(frame, pc, *prop, *target, *value),

            Op::IpInc(target) => math::in_place_unary(frame, pc, UnaryAction::Next, *target, Yield::Nothing),
            Op::IpDec(target) => math::in_place_unary(frame, pc, UnaryAction::Prev, *target, Yield::Nothing),
            Op::IpIncA { target, ret } => math::in_place_unary(frame, pc, UnaryAction::Next, *target, Yield::Old(*ret)),
            Op::IpDecA { target, ret } => math::in_place_unary(frame, pc, UnaryAction::Prev, *target, Yield::Old(*ret)),
            Op::IpIncB { target, ret } => math::in_place_unary(frame, pc, UnaryAction::Next, *target, Yield::New(*ret)),
            Op::IpDecB { target, ret } => math::in_place_unary(frame, pc, UnaryAction::Prev, *target, Yield::New(*ret)),
            Op::IpBinary { action, target, arg } => math::in_place_binary(frame, pc, *action, *target, *arg),

            Op::PipInc { prop, target } => {
                math::property_unary(frame, pc, UnaryAction::Next, *prop, *target, Yield::Nothing)
            }
            Op::PipDec { prop, target } => {
                math::property_unary(frame, pc, UnaryAction::Prev, *prop, *target, Yield::Nothing)
            }
            Op::PipIncA { prop, target, ret } => {
                math::property_unary(frame, pc, UnaryAction::Next, *prop, *target, Yield::Old(*ret))
            }
            Op::PipDecA { prop, target, ret } => {
                math::property_unary(frame, pc, UnaryAction::Prev, *prop, *target, Yield::Old(*ret))
            }
            Op::PipIncB { prop, target, ret } => {
                math::property_unary(frame, pc, UnaryAction::Next, *prop, *target, Yield::New(*ret))
            }
            Op::PipDecB { prop, target, ret } => {
                math::property_unary(frame, pc, UnaryAction::Prev, *prop, *target, Yield::New(*ret))
            }
            Op::PipBinary {
                action,
                prop,
                target,
                arg,
            } => math::property_binary(frame, pc, *action, *prop, *target, *arg),
        }
    }
}

fn open_guard(frame: &mut Frame, pc: usize, kind: GuardKind) -> Result<Signal> {
    let Some(end) = frame.function().layout().guard_end(pc) else {
        bail!(VmFault::GuardNesting {
            detail: format!("guard at {pc} has no verified end"),
        });
    };
    frame.enter_scope(0)?;
    let guard = Guard {
        start: pc,
        end,
        scope: frame.depth(),
        kind,
    };
    frame.push_guard(guard)?;
    Ok(next(pc))
}

fn declare(
    frame: &mut Frame,
    pc: usize,
    info: VarInfo,
    style: VarStyle,
    init: Option<Value>,
) -> Result<Signal> {
    frame.introduce_variable(info, style, init)?;
    Ok(next(pc))
}
