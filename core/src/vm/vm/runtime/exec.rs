use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};

use crate::val::{ExceptionHandle, Value};
use crate::vm::bytecode::Function;
use crate::vm::error::VmFault;
use crate::vm::layout::ScopeEvent;
use crate::vm::program::Program;
use crate::vm::vm::Vm;
use crate::vm::vm::frame::{CallRequest, Frame, ReturnDescriptor};
use crate::vm::vm::runtime::frame::{FrameExit, run_frame};

/// How a top-level execution ended.
#[derive(Debug, Clone)]
pub enum Completion {
    /// The entry function's return values.
    Returned(Vec<Value>),
    /// An exception escaped the entry function.
    Threw(ExceptionHandle),
}

impl Completion {
    pub fn values(&self) -> Option<&[Value]> {
        match self {
            Completion::Returned(values) => Some(values),
            Completion::Threw(_) => None,
        }
    }

    pub fn exception(&self) -> Option<&ExceptionHandle> {
        match self {
            Completion::Threw(exc) => Some(exc),
            Completion::Returned(_) => None,
        }
    }
}

/// What outlives a popped frame.
struct Retired {
    function: Arc<Function>,
    trace: Option<Vec<ScopeEvent>>,
}

/// Consecutive repeats of the same op.
struct RepeatState {
    site: (usize, usize),
    attempts: u32,
}

impl Vm {
    /// Runs the program's entry function.
    pub fn exec(&mut self, program: &Arc<Program>, args: Vec<Value>) -> Result<Completion> {
        let entry = program.entry().ok_or_else(|| anyhow!("program declares no entry function"))?;
        self.exec_named(program, entry, args)
    }

    pub fn exec_named(&mut self, program: &Arc<Program>, name: &str, args: Vec<Value>) -> Result<Completion> {
        let id = program
            .function_id(name)
            .ok_or_else(|| anyhow!("function `{name}` is not defined"))?;
        self.exec_function(program, id, None, args)
    }

    /// Runs function `id` to completion with the caller-side descriptor of a
    /// tuple result; the tuple is flattened into [`Completion::Returned`].
    pub fn exec_function(
        &mut self,
        program: &Arc<Program>,
        id: u32,
        this: Option<Value>,
        args: Vec<Value>,
    ) -> Result<Completion> {
        let key = Arc::as_ptr(program) as usize;
        if self.cache_program != key {
            self.cache_pool.clear();
            self.cache_program = key;
        }
        let len = program.function(id)?.code().len();
        let cache = self.take_cache(id, len);
        let mut frame = Frame::new(Arc::clone(program), id, ReturnDescriptor::Tuple, args)?.with_cache(cache);
        if let Some(this) = this {
            frame = frame.with_this(this);
        }
        if self.config.trace_scopes {
            frame = frame.with_trace();
        }
        let base = self.frames.len();
        self.frames.push(frame);
        let result = self.drive(base);
        if result.is_err() {
            while self.frames.len() > base {
                self.retire_top();
            }
        }
        result
    }

    fn drive(&mut self, base: usize) -> Result<Completion> {
        let mut repeat: Option<RepeatState> = None;
        loop {
            let Some(frame) = self.frames.last_mut() else {
                bail!("no frame to run");
            };
            match run_frame(frame)? {
                FrameExit::Repeat => {
                    let pc = frame.pc();
                    let site = (self.frames.len(), pc);
                    let attempts = match &repeat {
                        Some(state) if state.site == site => state.attempts + 1,
                        _ => 1,
                    };
                    if attempts > self.config.max_repeats {
                        bail!(VmFault::UnreadyOperand {
                            pc: site.1,
                            attempts: attempts - 1,
                        });
                    }
                    repeat = Some(RepeatState { site, attempts });
                    let Some((target, value)) = self.deferred.pop_front() else {
                        bail!(VmFault::UnreadyOperand { pc: site.1, attempts });
                    };
                    tracing::debug!(target: "xvm::vm::dispatch", pc = site.1, attempts, "repeat after binding");
                    target.bind(value);
                }
                FrameExit::Call(request) => {
                    repeat = None;
                    self.push_call(*request)?;
                }
                FrameExit::Return(values) => {
                    repeat = None;
                    let retired = self.retire_top();
                    if self.frames.len() == base {
                        self.finish_entry(retired);
                        return Ok(Completion::Returned(flatten(values)));
                    }
                    if let Some(caller) = self.frames.last_mut() {
                        caller.complete_call(values).with_context(|| match &retired {
                            Some(retired) => format!("returning from `{}`", retired.function.name()),
                            None => "returning from a call".to_string(),
                        })?;
                    }
                }
                FrameExit::Threw(exc) => {
                    repeat = None;
                    let retired = self.retire_top();
                    if self.frames.len() == base {
                        self.finish_entry(retired);
                        return Ok(Completion::Threw(exc));
                    }
                    if let Some(retired) = &retired {
                        tracing::debug!(
                            target: "xvm::vm::call",
                            function = %retired.function.name(),
                            exception = %exc,
                            "exception escapes to caller"
                        );
                    }
                    if let Some(caller) = self.frames.last_mut() {
                        caller.raise_exception(Value::Exception(exc))?;
                    }
                }
            }
        }
    }

    fn push_call(&mut self, request: CallRequest) -> Result<()> {
        if self.frames.len() >= self.config.max_call_depth {
            bail!(VmFault::CallDepthExceeded {
                limit: self.config.max_call_depth,
            });
        }
        let Some(caller) = self.frames.last() else {
            bail!("call with no caller frame");
        };
        let program = Arc::clone(caller.program());
        let len = program.function(request.function)?.code().len();
        tracing::debug!(
            target: "xvm::vm::call",
            caller = %caller.function().name(),
            callee = request.function,
            depth = self.frames.len(),
            "call"
        );
        let cache = self.take_cache(request.function, len);
        let callee = Frame::new(program, request.function, request.descriptor, request.args)?.with_cache(cache);
        self.frames.push(callee);
        Ok(())
    }

    /// Pops the top frame and returns its dispatch cache to the pool.
    fn retire_top(&mut self) -> Option<Retired> {
        let mut frame = self.frames.pop()?;
        let retired = Retired {
            function: Arc::clone(frame.function()),
            trace: frame.trace.take(),
        };
        self.release_cache(frame.function_id(), frame.into_cache());
        Some(retired)
    }

    fn finish_entry(&mut self, retired: Option<Retired>) {
        self.last_trace = retired.and_then(|r| r.trace).unwrap_or_default();
    }
}

fn flatten(values: Vec<Value>) -> Vec<Value> {
    match values.as_slice() {
        [Value::Tuple(items)] => items.to_vec(),
        _ => values,
    }
}
