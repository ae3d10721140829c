use std::sync::Arc;

use anyhow::{Result, bail};

use crate::val::Value;
use crate::vm::bytecode::{ArgId, CallArgs, CallResult};
use crate::vm::error::VmFault;
use crate::vm::vm::frame::{CallRequest, Frame, ReturnDescriptor, Signal};

use super::helpers::{deliver, read_all};

/// CALL_xy: resolves the callee and its arguments, introduces the result
/// registers, and hands the call to the VM.
pub(super) fn call(frame: &mut Frame, fun: ArgId, args: &CallArgs, result: &CallResult) -> Result<Signal> {
    let callee = ready!(frame.get_argument(fun));
    let args = match args {
        CallArgs::None => Vec::new(),
        CallArgs::One(arg) => vec![ready!(frame.get_argument(*arg))],
        CallArgs::Many(ids) => ready!(read_all(frame, ids)),
        CallArgs::Tuple(arg) => match ready!(frame.get_argument(*arg)) {
            Value::Tuple(items) => items.to_vec(),
            _ => bail!(VmFault::InvalidOperand { operand: *arg }),
        },
    };
    let Value::Function(function) = callee else {
        bail!(VmFault::NotCallable {
            found: callee.type_name().to_string(),
        });
    };
    let target = Arc::clone(frame.program().function(function)?);
    if args.len() != target.params() {
        bail!(VmFault::ArgumentCount {
            function: target.name().to_string(),
            expected: target.params(),
            got: args.len(),
        });
    }
    match result {
        CallResult::Unused => {}
        CallResult::One(ret) | CallResult::Tuple(ret) => frame.introduce_result(*ret)?,
        CallResult::Many(rets) => {
            for ret in rets {
                frame.introduce_result(*ret)?;
            }
        }
    }
    Ok(Signal::Call(Box::new(CallRequest {
        function,
        args,
        descriptor: ReturnDescriptor::for_call(result),
    })))
}

/// NEW_x: instantiates the class named by constant `class`.
pub(super) fn construct(frame: &mut Frame, pc: usize, class: ArgId, args: &[ArgId], ret: ArgId) -> Result<Signal> {
    let name = frame.constant_name(class)?;
    let args = ready!(read_all(frame, args));
    let program = Arc::clone(frame.program());
    let outcome = program.types().construct(&name, args)?;
    deliver(frame, pc, outcome, ret)
}
