use super::*;

fn traced_vm() -> Vm {
    Vm::with_config(VmConfig {
        trace_scopes: true,
        ..VmConfig::default()
    })
}

#[test]
fn test_vm_runtime_scope_events_match_layout() {
    // { r0 = 7; { r1; r2 = r0 + 7 } } try { r0 = 1 } finally { } return
    let code = vec![
        Op::Enter,
        Op::VarI {
            ty: const_arg(0),
            init: const_arg(1),
        },
        Op::Enter,
        Op::Var { ty: const_arg(0) },
        Op::GpBinary {
            action: BinaryAction::Add,
            target: 0,
            arg: const_arg(1),
            ret: 2,
        },
        Op::Exit,
        Op::Exit,
        Op::GuardAll(3),
        Op::VarI {
            ty: const_arg(0),
            init: const_arg(2),
        },
        Op::Nop,
        Op::Finally,
        Op::FinallyEnd,
        Op::Return0,
    ];
    let program = program(vec![func("main", 0, vec![name("Int"), int(7), int(1)], code)]);
    let mut vm = traced_vm();
    vm.exec(&program, Vec::new()).unwrap();

    let layout = program.functions()[0].layout();
    assert_eq!(vm.last_scope_trace(), layout.events());
    assert_eq!(
        layout.events(),
        &[
            ScopeEvent::Enter(1),
            ScopeEvent::Alloc(0),
            ScopeEvent::Enter(2),
            ScopeEvent::Alloc(1),
            ScopeEvent::Alloc(2),
            ScopeEvent::Exit(2),
            ScopeEvent::Exit(1),
            ScopeEvent::Enter(1),
            ScopeEvent::Alloc(0),
            ScopeEvent::Exit(1),
            ScopeEvent::Enter(1),
            ScopeEvent::Alloc(0),
            ScopeEvent::Exit(1),
        ]
    );
    assert_eq!(layout.max_vars(), 3);
}

#[test]
fn test_vm_unwound_catch_events_match_layout() {
    // Unwinding out of the try scope records the exit GUARD_END would have.
    let code = vec![
        Op::Guard(vec![CatchClause {
            type_const: const_arg(0),
            name_const: const_arg(1),
            offset: 4,
        }]),
        Op::New1 {
            class: const_arg(2),
            arg: const_arg(3),
            ret: 0,
        },
        Op::Throw(0),
        Op::GuardEnd(3),
        Op::Catch,
        Op::CatchEnd(1),
        Op::Return0,
    ];
    let consts = vec![name("Exception"), name("e"), name("IllegalState"), name("boom")];
    let program = program(vec![func("main", 0, consts, code)]);
    let mut vm = traced_vm();
    vm.exec(&program, Vec::new()).unwrap();
    assert_eq!(vm.last_scope_trace(), program.functions()[0].layout().events());
    assert_eq!(
        vm.last_scope_trace(),
        &[
            ScopeEvent::Enter(1),
            ScopeEvent::Alloc(0),
            ScopeEvent::Exit(1),
            ScopeEvent::Enter(1),
            ScopeEvent::Alloc(0),
            ScopeEvent::Exit(1),
        ]
    );
}

#[test]
fn test_vm_exit_below_function_scope_faults() {
    let mut frame = frame_for(vec![], vec![Op::Return0], ReturnDescriptor::Tuple);
    let err = Op::Exit.process(&mut frame, 0).unwrap_err();
    assert_eq!(fault(&err), &VmFault::ScopeUnderflow);
}

#[test]
fn test_vm_registers_cleared_on_scope_exit() {
    let code = vec![
        Op::Enter,
        Op::VarI {
            ty: const_arg(0),
            init: const_arg(1),
        },
        Op::Exit,
        Op::Var { ty: const_arg(0) },
        Op::Return1(0),
    ];
    let err = Vm::new()
        .exec(&program(vec![func("main", 0, vec![name("Int"), int(5)], code)]), Vec::new())
        .unwrap_err();
    assert_eq!(fault(&err), &VmFault::UnassignedRegister { register: 0 });
}

#[test]
fn test_vm_result_register_cannot_skip_ahead() {
    let mut frame = frame_for(vec![int(1)], vec![Op::Return0], ReturnDescriptor::Tuple);
    let op = Op::Mov {
        from: const_arg(0),
        to: 3,
    };
    let err = op.process(&mut frame, 0).unwrap_err();
    assert_eq!(fault(&err), &VmFault::RegisterSkip { register: 3, next: 0 });
}

#[test]
fn test_vm_layout_rejects_unbalanced_guards() {
    let err = Function::new("bad", 0, vec![], vec![Op::GuardAll(2), Op::Nop, Op::Return0]).unwrap_err();
    assert!(format!("{err:#}").contains("left open"));

    let err = Function::new("bad", 0, vec![], vec![Op::Exit, Op::Return0]).unwrap_err();
    assert!(format!("{err:#}").contains("scope exit below the function scope"));
}

#[test]
fn test_vm_parameters_occupy_first_registers() {
    let code = vec![
        Op::GpBinary {
            action: BinaryAction::Mul,
            target: 0,
            arg: 1,
            ret: 2,
        },
        Op::Return1(2),
    ];
    let program = program(vec![func("main", 2, vec![], code)]);
    let done = Vm::new().exec(&program, vec![Value::Int(6), Value::Int(7)]).unwrap();
    assert_eq!(returned(done), vec![Value::Int(42)]);
}

#[test]
fn test_vm_unwound_finally_events_match_layout() {
    // try { r0 = IllegalState("boom"); throw r0 } finally { }
    let code = vec![
        Op::GuardAll(3),
        Op::New1 {
            class: const_arg(0),
            arg: const_arg(1),
            ret: 0,
        },
        Op::Throw(0),
        Op::Finally,
        Op::FinallyEnd,
        Op::Return0,
    ];
    let program = program(vec![func("main", 0, vec![name("IllegalState"), name("boom")], code)]);
    let mut vm = traced_vm();
    let exc = thrown(vm.exec(&program, Vec::new()).unwrap());
    assert_eq!(exc.type_name(), "IllegalState");
    assert_eq!(vm.last_scope_trace(), program.functions()[0].layout().events());
    assert_eq!(
        vm.last_scope_trace(),
        &[
            ScopeEvent::Enter(1),
            ScopeEvent::Alloc(0),
            ScopeEvent::Exit(1),
            ScopeEvent::Enter(1),
            ScopeEvent::Alloc(0),
            ScopeEvent::Exit(1),
        ]
    );
}
