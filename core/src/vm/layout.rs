//! Static scope simulation.
//!
//! Walks a function's code once, in address order, replaying the scope
//! effect of every op. The result gives the register file size, the scope
//! depth in force before each address, and the end address of every guard.
//! The runtime frame records the same events when scope tracing is on, and
//! for straight-line code the two sequences are identical.

use anyhow::{Result, bail, ensure};

use crate::util::fast_map::{FastHashMap, fast_hash_map_new};
use crate::vm::bytecode::{A_IGNORE, ArgId, Op, arith_index};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeEvent {
    /// Entered the scope at this depth.
    Enter(usize),
    /// Left the scope at this depth.
    Exit(usize),
    /// Register slot allocated in the current scope.
    Alloc(usize),
}

/// Simulated scope stack: one next-free-register mark per depth.
#[derive(Debug, Clone)]
pub struct Scope {
    next_var: Vec<usize>,
    max_vars: usize,
    events: Vec<ScopeEvent>,
}

impl Scope {
    pub fn new(params: usize) -> Self {
        Self {
            next_var: vec![params],
            max_vars: params,
            events: Vec::new(),
        }
    }

    pub fn depth(&self) -> usize {
        self.next_var.len() - 1
    }

    pub fn next_var(&self) -> usize {
        self.next_var.last().copied().unwrap_or_default()
    }

    pub fn enter(&mut self, reserved: usize) {
        let next = self.next_var();
        self.next_var.push(next);
        self.events.push(ScopeEvent::Enter(self.depth()));
        for _ in 0..reserved {
            self.alloc();
        }
    }

    pub fn exit(&mut self) -> Result<()> {
        ensure!(self.next_var.len() > 1, "scope exit below the function scope");
        self.events.push(ScopeEvent::Exit(self.depth()));
        self.next_var.pop();
        Ok(())
    }

    pub fn alloc(&mut self) -> usize {
        let slot = self.next_var();
        if let Some(top) = self.next_var.last_mut() {
            *top += 1;
        }
        self.max_vars = self.max_vars.max(slot + 1);
        self.events.push(ScopeEvent::Alloc(slot));
        slot
    }

    /// A result operand naming the next free register introduces it.
    pub fn introduce_result(&mut self, ret: ArgId) -> Result<()> {
        if ret == A_IGNORE {
            return Ok(());
        }
        ensure!(ret >= 0, "result operand {ret} is not a register");
        let next = self.next_var();
        match (ret as usize).cmp(&next) {
            std::cmp::Ordering::Less => Ok(()),
            std::cmp::Ordering::Equal => {
                self.alloc();
                Ok(())
            }
            std::cmp::Ordering::Greater => bail!("result register r{ret} skips ahead of next free register r{next}"),
        }
    }
}

impl Op {
    /// Applies this op's scope effect to the simulated stack.
    pub fn simulate(&self, scope: &mut Scope) -> Result<()> {
        match self {
            Op::Enter | Op::Guard(_) | Op::GuardAll(_) => scope.enter(0),
            Op::Exit | Op::GuardEnd(_) | Op::CatchEnd(_) | Op::FinallyEnd => scope.exit()?,
            Op::Catch => {
                scope.enter(0);
                scope.alloc();
            }
            Op::Finally => {
                scope.exit()?;
                scope.enter(1);
            }
            Op::Var { .. }
            | Op::VarI { .. }
            | Op::VarN { .. }
            | Op::VarIN { .. }
            | Op::VarD { .. }
            | Op::VarDN { .. }
            | Op::VarT { .. }
            | Op::VarTN { .. } => {
                scope.alloc();
            }
            Op::IpBinary { action, .. } | Op::PipBinary { action, .. } => {
                ensure!(arith_index(*action).is_some(), "in-place {} is not an instruction", action.name());
            }
            _ => {
                for ret in self.results() {
                    scope.introduce_result(ret)?;
                }
            }
        }
        Ok(())
    }
}

/// Verified scope layout of one function.
#[derive(Debug, Clone, Default)]
pub struct ScopeLayout {
    depth_at: Vec<usize>,
    max_vars: usize,
    guard_ends: FastHashMap<usize, usize>,
    events: Vec<ScopeEvent>,
}

impl ScopeLayout {
    /// Register file size, parameters included.
    pub fn max_vars(&self) -> usize {
        self.max_vars
    }

    /// Scope depth in force before the op at `pc` executes.
    pub fn depth_at(&self, pc: usize) -> Option<usize> {
        self.depth_at.get(pc).copied()
    }

    /// End of the region protected by the GUARD or GUARD_ALL at `start`:
    /// the matching GUARD_END or FINALLY address.
    pub fn guard_end(&self, start: usize) -> Option<usize> {
        self.guard_ends.get(&start).copied()
    }

    pub fn events(&self) -> &[ScopeEvent] {
        &self.events
    }
}

#[derive(Debug, Clone, Copy)]
enum Open {
    Catch { start: usize, depth: usize },
    Finally { start: usize, depth: usize, finally_pc: i64 },
    Handler { depth: usize },
    FinallyBody { depth: usize },
}

impl Open {
    fn depth(self) -> usize {
        match self {
            Open::Catch { depth, .. }
            | Open::Finally { depth, .. }
            | Open::Handler { depth }
            | Open::FinallyBody { depth } => depth,
        }
    }
}

/// Runs the layout pass over `code` for a function with `params` parameters.
pub fn simulate(code: &[Op], params: usize) -> Result<ScopeLayout> {
    let mut scope = Scope::new(params);
    let mut depth_at = Vec::with_capacity(code.len());
    let mut guard_ends = fast_hash_map_new();
    let mut open: Vec<Open> = Vec::new();

    for (pc, op) in code.iter().enumerate() {
        depth_at.push(scope.depth());
        let depth = scope.depth();
        let top = open.last().copied();
        let owns_scope = top.is_some_and(|o| o.depth() == depth);
        match op {
            Op::Guard(_) => open.push(Open::Catch {
                start: pc,
                depth: depth + 1,
            }),
            Op::GuardAll(ofs) => open.push(Open::Finally {
                start: pc,
                depth: depth + 1,
                finally_pc: pc as i64 + *ofs as i64,
            }),
            Op::GuardEnd(_) => match top {
                Some(Open::Catch { start, depth: d }) if d == depth => {
                    open.pop();
                    guard_ends.insert(start, pc);
                }
                _ => bail!("GUARD_END at {pc} does not close a GUARD"),
            },
            Op::Catch => open.push(Open::Handler { depth: depth + 1 }),
            Op::CatchEnd(_) => match top {
                Some(Open::Handler { depth: d }) if d == depth => {
                    open.pop();
                }
                _ => bail!("CATCH_END at {pc} does not close a CATCH"),
            },
            Op::Finally => match top {
                Some(Open::Finally {
                    start,
                    depth: d,
                    finally_pc,
                }) if d == depth && finally_pc == pc as i64 => {
                    open.pop();
                    guard_ends.insert(start, pc);
                    open.push(Open::FinallyBody { depth });
                }
                _ => bail!("FINALLY at {pc} is not the target of an enclosing GUARD_ALL"),
            },
            Op::FinallyEnd => match top {
                Some(Open::FinallyBody { depth: d }) if d == depth => {
                    open.pop();
                }
                _ => bail!("FINALLY_END at {pc} does not close a FINALLY"),
            },
            Op::Exit if owns_scope => {
                bail!("EXIT at {pc} would close a scope owned by an open guard or handler")
            }
            _ => {}
        }
        op.simulate(&mut scope).map_err(|e| e.context(format!("at pc {pc}")))?;
    }
    if let Some(unclosed) = open.last() {
        bail!("guard structure left open at end of code: {unclosed:?}");
    }

    let layout = ScopeLayout {
        depth_at,
        max_vars: scope.max_vars,
        guard_ends,
        events: scope.events,
    };
    verify_targets(code, &layout)?;
    Ok(layout)
}

fn verify_targets(code: &[Op], layout: &ScopeLayout) -> Result<()> {
    let in_range = |target: i64| -> Option<usize> {
        if target >= 0 && (target as usize) < code.len() {
            Some(target as usize)
        } else {
            None
        }
    };
    for (pc, op) in code.iter().enumerate() {
        let depth = layout.depth_at[pc];
        if let Some(target) = op.jump_target(pc) {
            let Some(target) = in_range(target) else {
                bail!("{op:?} at {pc} jumps outside the code (target {target})");
            };
            let target_depth = layout.depth_at[target];
            match op {
                Op::GuardEnd(_) | Op::CatchEnd(_) => ensure!(
                    target_depth + 1 == depth,
                    "{op:?} at {pc} lands at depth {target_depth}, expected {}",
                    depth - 1
                ),
                _ => ensure!(
                    target_depth <= depth,
                    "{op:?} at {pc} jumps into a deeper scope (depth {target_depth} from {depth})"
                ),
            }
        }
        if let Op::Guard(clauses) = op {
            ensure!(!clauses.is_empty(), "GUARD at {pc} has no catch clauses");
            let end = layout.guard_end(pc).unwrap_or(pc);
            for clause in clauses {
                let target = pc as i64 + clause.offset as i64;
                let Some(addr) = in_range(target) else {
                    bail!("catch handler for GUARD at {pc} is outside the code (target {target})");
                };
                ensure!(
                    matches!(code[addr], Op::Catch) && addr > end,
                    "catch handler for GUARD at {pc} must be a CATCH after the guarded region, found {:?} at {addr}",
                    code[addr]
                );
                ensure!(
                    layout.depth_at[addr] == depth,
                    "CATCH at {addr} is not at the depth of its GUARD at {pc}"
                );
            }
        }
    }
    Ok(())
}
