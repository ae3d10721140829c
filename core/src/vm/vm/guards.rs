use std::sync::Arc;

use anyhow::{Result, bail};

use crate::types::TypeRegistry;
use crate::val::{ExceptionHandle, Value};
use crate::vm::error::VmFault;

use super::frame::{Frame, Signal, VarInfo, VarStyle};

#[derive(Debug, Clone, PartialEq)]
pub struct Handler {
    pub type_name: Arc<str>,
    pub var_name: Arc<str>,
    /// Address of the handler's CATCH op.
    pub address: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GuardKind {
    Catch(Vec<Handler>),
    Finally { address: usize },
}

/// Active try region of a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Guard {
    /// Address of the GUARD / GUARD_ALL op.
    pub start: usize,
    /// Address of the matching GUARD_END / FINALLY op.
    pub end: usize,
    /// Scope depth the guard opened.
    pub scope: usize,
    pub kind: GuardKind,
}

impl Guard {
    pub fn covers(&self, pc: usize) -> bool {
        self.start <= pc && pc < self.end
    }

    fn encloses(&self, inner: &Guard) -> bool {
        self.start <= inner.start && inner.end <= self.end && self.scope < inner.scope
    }

    /// Landing address for `exc`, if this guard takes it.
    fn target_for(&self, exc: &ExceptionHandle, types: &TypeRegistry) -> Option<(usize, Option<Arc<str>>)> {
        match &self.kind {
            GuardKind::Catch(handlers) => handlers
                .iter()
                .find(|h| types.is_a(exc.type_name(), &h.type_name))
                .map(|h| (h.address, Some(Arc::clone(&h.var_name)))),
            GuardKind::Finally { address } => Some((*address, None)),
        }
    }
}

impl Frame {
    /// Registers a guard. It must lie inside the guard below it.
    pub fn push_guard(&mut self, guard: Guard) -> Result<()> {
        if let Some(outer) = self.guards.last()
            && !outer.encloses(&guard)
        {
            bail!(VmFault::GuardNesting {
                detail: format!(
                    "guard [{}, {}) is not inside [{}, {})",
                    guard.start, guard.end, outer.start, outer.end
                ),
            });
        }
        tracing::trace!(target: "xvm::vm::guard", start = guard.start, end = guard.end, scope = guard.scope, "push");
        self.guards.push(guard);
        Ok(())
    }

    pub fn pop_guard(&mut self) -> Result<Guard> {
        match self.guards.pop() {
            Some(guard) => Ok(guard),
            None => bail!(VmFault::GuardNesting {
                detail: "guard stack is empty".into(),
            }),
        }
    }

    /// Searches the guards innermost first for one covering the current
    /// address that takes `exc`. On a match the scopes and guards above it
    /// are discarded and the handler address is returned; the exception is
    /// handed to the CATCH or FINALLY op found there.
    pub fn unwind(&mut self, exc: ExceptionHandle) -> Result<Option<usize>> {
        let pc = self.pc;
        let program = Arc::clone(&self.program);
        let found = self.guards.iter().enumerate().rev().find_map(|(index, guard)| {
            if !guard.covers(pc) {
                return None;
            }
            guard.target_for(&exc, program.types()).map(|target| (index, target))
        });
        let Some((index, (address, var_name))) = found else {
            tracing::debug!(target: "xvm::vm::guard", pc, exception = %exc, "no handler in frame");
            self.guards.clear();
            return Ok(None);
        };

        let guard = self.guards[index].clone();
        self.guards.truncate(index);
        match guard.kind {
            GuardKind::Catch(_) => {
                while self.depth() >= guard.scope {
                    self.exit_scope()?;
                }
            }
            GuardKind::Finally { .. } => {
                while self.depth() > guard.scope {
                    self.exit_scope()?;
                }
                self.reset_scope(guard.scope);
            }
        }
        tracing::debug!(
            target: "xvm::vm::guard",
            pc,
            handler = address,
            depth = self.depth(),
            exception = %exc,
            "unwind"
        );
        self.caught = Some((exc, var_name));
        Ok(Some(address))
    }

    /// CATCH: opens the handler scope and binds the caught exception.
    pub(crate) fn enter_catch(&mut self, pc: usize) -> Result<Signal> {
        let Some((exc, var_name)) = self.caught.take() else {
            bail!(VmFault::GuardNesting {
                detail: format!("CATCH at {pc} reached without a caught exception"),
            });
        };
        self.enter_scope(0)?;
        let info = VarInfo {
            ty: Some(Arc::from(exc.type_name())),
            name: var_name,
        };
        self.introduce_variable(info, VarStyle::Standard, Some(Value::Exception(exc)))?;
        Ok(Signal::Continue(pc + 1))
    }

    /// FINALLY: closes the guarded scope and opens the finally scope with its
    /// reserved slot. The slot holds the exception only when arriving by
    /// unwind; on fall-through it stays unassigned.
    pub(crate) fn enter_finally(&mut self, pc: usize) -> Result<Signal> {
        let caught = self.caught.take();
        if caught.is_none() {
            let depth = self.depth();
            match self.pop_guard()? {
                Guard {
                    kind: GuardKind::Finally { address },
                    scope,
                    ..
                } if address == pc && scope == depth => {}
                other => bail!(VmFault::GuardNesting {
                    detail: format!("FINALLY at {pc} does not close the top guard {other:?}"),
                }),
            }
        }
        self.exit_scope()?;
        self.enter_scope(1)?;
        if let Some((exc, _)) = caught {
            let slot = self.scope_base();
            self.registers[slot].value = Some(Value::Exception(exc));
        }
        Ok(Signal::Continue(pc + 1))
    }

    /// FINALLY_END: closes the finally scope and re-raises the exception it
    /// was entered with, if any.
    pub(crate) fn exit_finally(&mut self, pc: usize) -> Result<Signal> {
        let pending = match self.registers.get(self.scope_base()).and_then(|s| s.value.as_ref()) {
            Some(Value::Exception(exc)) => Some(exc.clone()),
            _ => None,
        };
        self.exit_scope()?;
        match pending {
            Some(exc) => {
                tracing::debug!(target: "xvm::vm::guard", pc, exception = %exc, "re-raise after finally");
                self.raise_exception(Value::Exception(exc))
            }
            None => Ok(Signal::Continue(pc + 1)),
        }
    }
}
