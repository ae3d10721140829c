use std::sync::Arc;

use anyhow::{Result, bail, ensure};

use crate::types::TypeSupport;
use crate::val::{ExceptionHandle, RefHandle, Value};
use crate::vm::bytecode::{A_IGNORE, A_THIS, ArgId, CallResult, Constant, Function, Op, const_index};
use crate::vm::config::VmConfig;
use crate::vm::error::VmFault;
use crate::vm::layout::ScopeEvent;
use crate::vm::program::Program;

use super::caches::DispatchCache;
use super::guards::Guard;

/// How a frame hands its result back, fixed when the frame is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnDescriptor {
    /// The frame must not return a value.
    None,
    Single,
    /// Any returned value is discarded.
    Unused,
    /// Exactly this many values.
    Multi(usize),
    /// All returned values packed into one tuple.
    Tuple,
}

impl ReturnDescriptor {
    pub fn for_call(result: &CallResult) -> Self {
        match result {
            CallResult::Unused => ReturnDescriptor::Unused,
            CallResult::One(_) => ReturnDescriptor::Single,
            CallResult::Many(targets) => ReturnDescriptor::Multi(targets.len()),
            CallResult::Tuple(_) => ReturnDescriptor::Tuple,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            ReturnDescriptor::None => "no-value",
            ReturnDescriptor::Single => "single",
            ReturnDescriptor::Unused => "unused",
            ReturnDescriptor::Multi(_) => "multi",
            ReturnDescriptor::Tuple => "tuple",
        }
    }
}

/// What the dispatch loop does after an op.
#[derive(Debug)]
pub enum Signal {
    /// Continue at this absolute address.
    Continue(usize),
    Return,
    /// An exception is in flight; unwind.
    Exception,
    Call(Box<CallRequest>),
    /// An operand is not ready; retry the same op. Nothing was mutated.
    Repeat,
}

#[derive(Debug)]
pub struct CallRequest {
    pub function: u32,
    pub args: Vec<Value>,
    pub descriptor: ReturnDescriptor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarStyle {
    Standard,
    /// Holds a dynamic reference that a later write binds.
    Dynamic,
}

/// Declared type and name of a register, fixed at allocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VarInfo {
    pub ty: Option<Arc<str>>,
    pub name: Option<Arc<str>>,
}

#[derive(Debug, Clone, Default)]
pub(super) struct Slot {
    pub(super) value: Option<Value>,
    pub(super) info: VarInfo,
}

/// One in-progress call.
pub struct Frame {
    pub(super) program: Arc<Program>,
    pub(super) function: Arc<Function>,
    pub(super) function_id: u32,
    pub(super) pc: usize,
    pub(super) line: i64,
    pub(super) registers: Vec<Slot>,
    /// Next free register per scope depth; index 0 is the function scope.
    pub(super) next_var: Vec<usize>,
    pub(super) guards: Vec<Guard>,
    /// Raised and not yet handled.
    pub(super) exception: Option<ExceptionHandle>,
    /// Matched by a guard, waiting for its CATCH or FINALLY op.
    pub(super) caught: Option<(ExceptionHandle, Option<Arc<str>>)>,
    pub(super) descriptor: ReturnDescriptor,
    pub(super) returned: Option<Vec<Value>>,
    pub(super) this: Option<Value>,
    pub(super) cache: DispatchCache,
    pub(super) trace: Option<Vec<ScopeEvent>>,
}

impl Frame {
    pub fn new(program: Arc<Program>, function_id: u32, descriptor: ReturnDescriptor, args: Vec<Value>) -> Result<Self> {
        let function = Arc::clone(program.function(function_id)?);
        if args.len() != function.params() {
            bail!(VmFault::ArgumentCount {
                function: function.name().to_string(),
                expected: function.params(),
                got: args.len(),
            });
        }
        let mut registers = vec![Slot::default(); function.layout().max_vars().max(args.len())];
        for (slot, arg) in registers.iter_mut().zip(args) {
            slot.value = Some(arg);
        }
        let cache = DispatchCache::new(function.code().len(), VmConfig::default().dispatch_cache);
        Ok(Self {
            next_var: vec![function.params()],
            program,
            function,
            function_id,
            pc: 0,
            line: 0,
            registers,
            guards: Vec::new(),
            exception: None,
            caught: None,
            descriptor,
            returned: None,
            this: None,
            cache,
            trace: None,
        })
    }

    pub fn with_this(mut self, this: Value) -> Self {
        self.this = Some(this);
        self
    }

    /// Records enter/exit/alloc events, see [`Frame::scope_events`].
    pub fn with_trace(mut self) -> Self {
        self.trace = Some(Vec::new());
        self
    }

    /// Turns the per-op dispatch cache on or off for this frame.
    pub fn with_dispatch_cache(mut self, enabled: bool) -> Self {
        self.cache = DispatchCache::new(self.function.code().len(), enabled);
        self
    }

    /// Dispatch cache hits and misses so far.
    pub fn dispatch_stats(&self) -> (u64, u64) {
        self.cache.stats()
    }

    pub(super) fn with_cache(mut self, cache: DispatchCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn function(&self) -> &Arc<Function> {
        &self.function
    }

    pub fn function_id(&self) -> u32 {
        self.function_id
    }

    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn set_pc(&mut self, pc: usize) {
        self.pc = pc;
    }

    /// Line counter advanced by the LINE_* markers.
    pub fn line(&self) -> i64 {
        self.line
    }

    pub fn depth(&self) -> usize {
        self.next_var.len() - 1
    }

    pub fn next_var(&self) -> usize {
        self.next_var.last().copied().unwrap_or_default()
    }

    /// First register of the current scope.
    pub fn scope_base(&self) -> usize {
        match self.next_var.len() {
            0 | 1 => 0,
            n => self.next_var[n - 2],
        }
    }

    pub fn guards(&self) -> &[Guard] {
        &self.guards
    }

    pub fn pending_exception(&self) -> Option<&ExceptionHandle> {
        self.exception.as_ref()
    }

    pub fn scope_events(&self) -> Option<&[ScopeEvent]> {
        self.trace.as_deref()
    }

    pub fn descriptor(&self) -> &ReturnDescriptor {
        &self.descriptor
    }

    /// Values handed back by the last return op, shaped by the descriptor.
    pub fn returned(&self) -> Option<&[Value]> {
        self.returned.as_deref()
    }

    pub(super) fn take_returned(&mut self) -> Vec<Value> {
        self.returned.take().unwrap_or_default()
    }

    /// Raw register contents; `None` when unassigned. Dynamic references are
    /// not followed.
    pub fn register(&self, index: usize) -> Option<&Value> {
        self.registers.get(index).and_then(|slot| slot.value.as_ref())
    }

    pub fn variable_info(&self, index: usize) -> Option<&VarInfo> {
        (index < self.next_var()).then(|| &self.registers[index].info)
    }

    fn record(&mut self, event: ScopeEvent) {
        if let Some(trace) = self.trace.as_mut() {
            trace.push(event);
        }
    }

    /// Allocates the next free register of the current scope.
    pub fn introduce_variable(&mut self, info: VarInfo, style: VarStyle, init: Option<Value>) -> Result<usize> {
        let Some(top) = self.next_var.last_mut() else {
            bail!(VmFault::ScopeUnderflow);
        };
        let slot = *top;
        *top += 1;
        if slot >= self.registers.len() {
            self.registers.resize(slot + 1, Slot::default());
        }
        let value = match style {
            VarStyle::Standard => init,
            VarStyle::Dynamic => {
                let handle = RefHandle::unbound();
                if let Some(value) = init {
                    handle.bind(value);
                }
                Some(Value::Ref(handle))
            }
        };
        self.registers[slot] = Slot { value, info };
        self.record(ScopeEvent::Alloc(slot));
        Ok(slot)
    }

    /// Pushes a scope, reserving `reserved` unassigned registers in it.
    pub fn enter_scope(&mut self, reserved: usize) -> Result<()> {
        let next = self.next_var();
        self.next_var.push(next);
        self.record(ScopeEvent::Enter(self.depth()));
        tracing::trace!(target: "xvm::vm::scope", depth = self.depth(), reserved, "enter");
        for _ in 0..reserved {
            self.introduce_variable(VarInfo::default(), VarStyle::Standard, None)?;
        }
        Ok(())
    }

    /// Pops the current scope and clears the registers it allocated.
    pub fn exit_scope(&mut self) -> Result<()> {
        let depth = self.depth();
        ensure!(depth > 0, VmFault::ScopeUnderflow);
        if self.guards.last().is_some_and(|g| g.scope == depth) {
            bail!(VmFault::GuardOwnsScope { depth });
        }
        self.record(ScopeEvent::Exit(depth));
        tracing::trace!(target: "xvm::vm::scope", depth, "exit");
        let top = self.next_var();
        self.next_var.pop();
        let base = self.next_var();
        let len = self.registers.len();
        for slot in &mut self.registers[base..top.min(len)] {
            *slot = Slot::default();
        }
        Ok(())
    }

    /// Discards every register allocated in scope `depth` and deeper, keeping
    /// the scope itself open. No scope event is recorded: the scope stays
    /// open until the FINALLY op exits it, which records the same exit the
    /// layout pass placed there.
    pub(super) fn reset_scope(&mut self, depth: usize) {
        debug_assert!(depth > 0 && depth <= self.depth());
        let top = self.next_var();
        let base = self.next_var[depth - 1];
        self.next_var.truncate(depth + 1);
        self.next_var[depth] = base;
        let len = self.registers.len();
        for slot in &mut self.registers[base..top.max(base).min(len)] {
            *slot = Slot::default();
        }
    }

    /// Introduces `target` when it names the next free register.
    pub fn introduce_result(&mut self, target: ArgId) -> Result<()> {
        if target >= 0 && target as usize == self.next_var() {
            self.introduce_variable(VarInfo::default(), VarStyle::Standard, None)?;
        }
        Ok(())
    }

    /// Writes a register. The next free register is introduced on the fly; a
    /// register holding a dynamic reference binds it.
    pub fn assign_value(&mut self, target: ArgId, value: Value) -> Result<()> {
        if target == A_IGNORE {
            return Ok(());
        }
        if target < 0 {
            bail!(VmFault::InvalidOperand { operand: target });
        }
        let index = target as usize;
        let next = self.next_var();
        if index > next {
            bail!(VmFault::RegisterSkip { register: target, next });
        }
        if index == next {
            self.introduce_variable(VarInfo::default(), VarStyle::Standard, Some(value))?;
            return Ok(());
        }
        let slot = &mut self.registers[index];
        match &slot.value {
            Some(Value::Ref(handle)) => handle.bind(value),
            _ => slot.value = Some(value),
        }
        Ok(())
    }

    /// Resolves an operand. `Ok(None)` means "not ready": the operand is an
    /// unbound dynamic reference.
    pub fn get_argument(&self, id: ArgId) -> Result<Option<Value>> {
        if id >= 0 {
            let index = id as usize;
            let value = if index < self.next_var() {
                self.registers[index].value.as_ref()
            } else {
                None
            };
            return match value {
                Some(Value::Ref(handle)) => Ok(handle.get()),
                Some(value) => Ok(Some(value.clone())),
                None => bail!(VmFault::UnassignedRegister { register: id }),
            };
        }
        if id == A_THIS {
            return match &self.this {
                Some(this) => Ok(Some(this.clone())),
                None => bail!(VmFault::InvalidOperand { operand: id }),
            };
        }
        Ok(Some(self.constant(id)?.to_value()))
    }

    pub fn constant(&self, id: ArgId) -> Result<&Constant> {
        let Some(index) = const_index(id) else {
            bail!(VmFault::InvalidOperand { operand: id });
        };
        self.function
            .constant(index)
            .ok_or_else(|| VmFault::UnknownConstant { index }.into())
    }

    /// Name carried by a string or type constant.
    pub fn constant_name(&self, id: ArgId) -> Result<Arc<str>> {
        match self.constant(id)?.as_name() {
            Some(name) => Ok(Arc::clone(name)),
            None => bail!(VmFault::InvalidOperand { operand: id }),
        }
    }

    fn finish(&mut self, values: Vec<Value>) -> Result<Signal> {
        self.returned = Some(values);
        Ok(Signal::Return)
    }

    fn shape_fault(&self, detail: String) -> anyhow::Error {
        VmFault::IllegalCallShape {
            descriptor: self.descriptor.name(),
            detail,
        }
        .into()
    }

    /// Completes the call with one value.
    pub fn return_value(&mut self, value: Value) -> Result<Signal> {
        match self.descriptor {
            ReturnDescriptor::None => Err(self.shape_fault("returned a value".into())),
            ReturnDescriptor::Single => self.finish(vec![value]),
            ReturnDescriptor::Unused => self.finish(Vec::new()),
            ReturnDescriptor::Multi(1) => self.finish(vec![value]),
            ReturnDescriptor::Multi(n) => Err(self.shape_fault(format!("returned 1 value where {n} are expected"))),
            ReturnDescriptor::Tuple => self.finish(vec![Value::tuple(vec![value])]),
        }
    }

    /// Completes the call with a list of values (RETURN_0, RETURN_N).
    pub fn return_values(&mut self, values: Vec<Value>) -> Result<Signal> {
        match self.descriptor {
            ReturnDescriptor::Unused => self.finish(Vec::new()),
            ReturnDescriptor::Tuple => self.finish(vec![Value::tuple(values)]),
            ReturnDescriptor::None if values.is_empty() => self.finish(values),
            ReturnDescriptor::Single if values.len() == 1 => self.finish(values),
            ReturnDescriptor::Multi(n) if values.len() == n => self.finish(values),
            _ => Err(self.shape_fault(format!("returned {} value(s)", values.len()))),
        }
    }

    /// Completes the call with the elements of a tuple (RETURN_T).
    pub fn return_tuple(&mut self, tuple: Value) -> Result<Signal> {
        if self.descriptor == ReturnDescriptor::Unused {
            return self.finish(Vec::new());
        }
        let Value::Tuple(items) = &tuple else {
            return Err(self.shape_fault(format!("returned {} as a tuple", tuple.type_name())));
        };
        match self.descriptor {
            ReturnDescriptor::Tuple => self.finish(vec![tuple.clone()]),
            ReturnDescriptor::None if items.is_empty() => self.finish(Vec::new()),
            ReturnDescriptor::Single if items.len() == 1 => self.finish(items.to_vec()),
            ReturnDescriptor::Multi(n) if items.len() == n => self.finish(items.to_vec()),
            _ => Err(self.shape_fault(format!("returned a tuple of {} value(s)", items.len()))),
        }
    }

    /// Starts unwinding with `value`, which must be an exception.
    pub fn raise_exception(&mut self, value: Value) -> Result<Signal> {
        match value {
            Value::Exception(exc) => {
                tracing::debug!(target: "xvm::vm::guard", pc = self.pc, exception = %exc, "raise");
                self.exception = Some(exc);
                Ok(Signal::Exception)
            }
            other => bail!(VmFault::MalformedThrow {
                found: type_label(&other)
            }),
        }
    }

    /// Jumps to `target`, leaving any scopes the target is outside of.
    pub fn jump(&mut self, target: i64) -> Result<Signal> {
        let len = self.function.code().len();
        if target < 0 || target as usize >= len {
            bail!(VmFault::PcOutOfRange { pc: target, len });
        }
        let target = target as usize;
        let want = self.function.layout().depth_at(target).unwrap_or_default();
        if want > self.depth() {
            bail!(VmFault::LayoutDivergence {
                pc: target,
                expected: want,
                actual: self.depth(),
            });
        }
        while self.depth() > want {
            let depth = self.depth();
            while self.guards.last().is_some_and(|g| g.scope == depth) {
                self.pop_guard()?;
            }
            self.exit_scope()?;
        }
        Ok(Signal::Continue(target))
    }

    /// Delivers a callee's values into the result registers of the call at
    /// the current address, then moves past it.
    pub(super) fn complete_call(&mut self, values: Vec<Value>) -> Result<()> {
        let function = Arc::clone(&self.function);
        let Some(Op::Call { result, .. }) = function.code().get(self.pc) else {
            bail!(VmFault::PcOutOfRange {
                pc: self.pc as i64,
                len: function.code().len(),
            });
        };
        match result {
            CallResult::Unused => {}
            CallResult::One(target) | CallResult::Tuple(target) => {
                let Some(value) = values.into_iter().next() else {
                    bail!(VmFault::IllegalCallShape {
                        descriptor: "single",
                        detail: "callee returned nothing".into(),
                    });
                };
                self.assign_value(*target, value)?;
            }
            CallResult::Many(targets) => {
                ensure!(
                    values.len() == targets.len(),
                    VmFault::IllegalCallShape {
                        descriptor: "multi",
                        detail: format!("callee returned {} of {} value(s)", values.len(), targets.len()),
                    }
                );
                for (target, value) in targets.iter().zip(values) {
                    self.assign_value(*target, value)?;
                }
            }
        }
        self.pc += 1;
        Ok(())
    }

    pub(super) fn support_for(&mut self, pc: usize, value: &Value) -> Result<Arc<dyn TypeSupport>> {
        self.cache.lookup(pc, self.program.types(), value)
    }

    pub(super) fn into_cache(self) -> DispatchCache {
        self.cache
    }
}

fn type_label(value: &Value) -> &'static str {
    match value {
        Value::Null => "Null",
        Value::Bool(_) => "Boolean",
        Value::Int(_) => "Int",
        Value::Str(_) => "String",
        Value::Tuple(_) => "Tuple",
        Value::Range(_) => "Range",
        Value::Object(_) => "Object",
        Value::Exception(_) => "Exception",
        Value::Function(_) => "Function",
        Value::Ref(_) => "Ref",
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("function", self.function.name())
            .field("pc", &self.pc)
            .field("depth", &self.depth())
            .field("guards", &self.guards.len())
            .finish()
    }
}
