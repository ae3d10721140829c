use std::fmt;

use super::bytecode::{Arg, ArgId};

/// Internal-consistency fault. Carried inside `anyhow::Error`; never seen by
/// guest guards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmFault {
    /// A return op does not fit the frame's return descriptor.
    IllegalCallShape { descriptor: &'static str, detail: String },
    /// THROW of a value that is not an exception.
    MalformedThrow { found: &'static str },
    ScopeUnderflow,
    /// EXIT of a scope that still owns a guard.
    GuardOwnsScope { depth: usize },
    GuardNesting { detail: String },
    RegisterSkip { register: ArgId, next: usize },
    UnassignedRegister { register: ArgId },
    InvalidOperand { operand: ArgId },
    UnknownConstant { index: usize },
    PcOutOfRange { pc: i64, len: usize },
    CallDepthExceeded { limit: usize },
    NotCallable { found: String },
    ArgumentCount { function: String, expected: usize, got: usize },
    /// Repeat signalled with no binding left to make the operand ready.
    UnreadyOperand { pc: usize, attempts: u32 },
    /// Runtime scope depth disagrees with the verified layout.
    LayoutDivergence { pc: usize, expected: usize, actual: usize },
}

impl fmt::Display for VmFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmFault::IllegalCallShape { descriptor, detail } => {
                write!(f, "illegal call shape: {detail} for a {descriptor} return")
            }
            VmFault::MalformedThrow { found } => write!(f, "malformed throw: expected an exception, found {found}"),
            VmFault::ScopeUnderflow => f.write_str("scope exit below the function scope"),
            VmFault::GuardOwnsScope { depth } => write!(f, "scope {depth} is still owned by an active guard"),
            VmFault::GuardNesting { detail } => write!(f, "guard nesting violated: {detail}"),
            VmFault::RegisterSkip { register, next } => write!(
                f,
                "register {} assigned before it was introduced (next free register is r{next})",
                Arg(*register)
            ),
            VmFault::UnassignedRegister { register } => write!(f, "read of unassigned register {}", Arg(*register)),
            VmFault::InvalidOperand { operand } => write!(f, "operand {} is not valid here", Arg(*operand)),
            VmFault::UnknownConstant { index } => write!(f, "constant k{index} is out of range"),
            VmFault::PcOutOfRange { pc, len } => write!(f, "program counter {pc} outside code of length {len}"),
            VmFault::CallDepthExceeded { limit } => write!(f, "call depth exceeded the limit of {limit}"),
            VmFault::NotCallable { found } => write!(f, "value of type {found} is not callable"),
            VmFault::ArgumentCount {
                function,
                expected,
                got,
            } => write!(f, "`{function}` expects {expected} argument(s), got {got}"),
            VmFault::UnreadyOperand { pc, attempts } => {
                write!(f, "operand at pc {pc} still not ready after {attempts} attempt(s)")
            }
            VmFault::LayoutDivergence { pc, expected, actual } => write!(
                f,
                "scope depth {actual} at pc {pc} diverges from the verified layout ({expected})"
            ),
        }
    }
}

impl std::error::Error for VmFault {}
