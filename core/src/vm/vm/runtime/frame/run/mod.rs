use anyhow::{Context, Result, bail};

use crate::val::{ExceptionHandle, Value};
use crate::vm::error::VmFault;
use crate::vm::vm::frame::{CallRequest, Frame, Signal};

/// Unwraps a "not ready" operand into a repeat signal.
macro_rules! ready {
    ($e:expr) => {
        match $e? {
            Some(value) => value,
            None => return Ok(Signal::Repeat),
        }
    };
}

mod helpers;
mod invoke;
mod math;
mod opcode;

/// Why [`run_frame`] handed control back to the VM.
#[derive(Debug)]
pub(crate) enum FrameExit {
    Return(Vec<Value>),
    Call(Box<CallRequest>),
    Threw(ExceptionHandle),
    Repeat,
}

/// Runs `frame` until it returns, calls, throws out, or needs a repeat. An
/// exception already in flight is unwound first.
pub(crate) fn run_frame(frame: &mut Frame) -> Result<FrameExit> {
    let function = std::sync::Arc::clone(frame.function());
    let code = function.code();
    let layout = function.layout();
    loop {
        if let Some(exc) = frame.exception.take() {
            match frame.unwind(exc.clone())? {
                Some(address) => frame.pc = address,
                None => return Ok(FrameExit::Threw(exc)),
            }
        }
        let pc = frame.pc;
        let Some(op) = code.get(pc) else {
            bail!(VmFault::PcOutOfRange {
                pc: pc as i64,
                len: code.len(),
            });
        };
        let expected = layout.depth_at(pc).unwrap_or_default();
        if frame.depth() != expected {
            bail!(VmFault::LayoutDivergence {
                pc,
                expected,
                actual: frame.depth(),
            });
        }
        tracing::trace!(target: "xvm::vm::dispatch", pc, op = ?op, "dispatch");
        let signal = op
            .process(frame, pc)
            .with_context(|| format!("{op:?} at pc {pc} in `{}` (line {})", function.name(), frame.line))?;
        match signal {
            Signal::Continue(next) => frame.pc = next,
            Signal::Exception => {}
            Signal::Return => return Ok(FrameExit::Return(frame.take_returned())),
            Signal::Call(request) => return Ok(FrameExit::Call(request)),
            Signal::Repeat => return Ok(FrameExit::Repeat),
        }
    }
}
