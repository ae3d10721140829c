use std::sync::Arc;

pub(super) use crate::{
    types::{BinaryAction, ClassDecl, PropertyDecl, TypeRegistry, exceptions},
    val::{ExceptionHandle, RefHandle, Value},
    vm::{
        A_IGNORE, CallArgs, CallResult, CatchClause, Completion, Constant, Frame, Function, Guard, GuardKind, Op,
        Program, Relation, ReturnDescriptor, ScopeEvent, Signal, Test, Vm, VmConfig, VmFault, const_arg,
    },
};

pub(super) fn func(name: &str, params: usize, consts: Vec<Constant>, code: Vec<Op>) -> Function {
    Function::new(name, params, consts, code).unwrap()
}

pub(super) fn program(functions: Vec<Function>) -> Arc<Program> {
    program_with(functions, TypeRegistry::with_builtins())
}

pub(super) fn program_with(functions: Vec<Function>, types: TypeRegistry) -> Arc<Program> {
    Arc::new(Program::new(functions, types).unwrap())
}

/// Runs `main` of a one-function program with no arguments.
pub(super) fn run_main(consts: Vec<Constant>, code: Vec<Op>) -> Completion {
    run_program(vec![func("main", 0, consts, code)])
}

pub(super) fn run_program(functions: Vec<Function>) -> Completion {
    Vm::new().exec(&program(functions), Vec::new()).unwrap()
}

pub(super) fn returned(completion: Completion) -> Vec<Value> {
    match completion {
        Completion::Returned(values) => values,
        Completion::Threw(exc) => panic!("unexpected exception {exc}"),
    }
}

pub(super) fn thrown(completion: Completion) -> ExceptionHandle {
    match completion {
        Completion::Threw(exc) => exc,
        Completion::Returned(values) => panic!("expected an exception, got {values:?}"),
    }
}

pub(super) fn fault(err: &anyhow::Error) -> &VmFault {
    err.downcast_ref::<VmFault>()
        .unwrap_or_else(|| panic!("not a VM fault: {err:#}"))
}

pub(super) fn nops(n: usize) -> impl Iterator<Item = Op> {
    std::iter::repeat_n(Op::Nop, n)
}

/// Frame over `main` with the given descriptor, for driving ops by hand.
pub(super) fn frame_for(consts: Vec<Constant>, code: Vec<Op>, descriptor: ReturnDescriptor) -> Frame {
    let program = program(vec![func("main", 0, consts, code)]);
    Frame::new(program, 0, descriptor, Vec::new()).unwrap()
}

pub(super) fn int(v: i64) -> Constant {
    Constant::Int(v)
}

pub(super) fn name(s: &str) -> Constant {
    Constant::Str(Arc::from(s))
}

mod control_flow;
mod guards;
mod operators;
mod properties;
mod repeat;
mod returns;
mod scopes;
