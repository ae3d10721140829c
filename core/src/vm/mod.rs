//! Register bytecode VM subsystem
//!
//! Op definitions, the scope layout pass, the XVMB container codec, and the
//! frame interpreter that executes them.

mod bytecode;
mod config;
mod error;
mod layout;
mod packed;
mod program;
#[allow(clippy::module_inception)]
mod vm;
mod xvmb;

pub use bytecode::*;
pub use config::VmConfig;
pub use error::VmFault;
pub use layout::{Scope, ScopeEvent, ScopeLayout, simulate};
pub use packed::{read_magnitude, read_packed, read_packed_i32, write_packed};
pub use program::{FunctionSource, Program, ProgramSource};
pub use vm::*;
pub use xvmb::*;

#[cfg(test)]
mod vm_test;
