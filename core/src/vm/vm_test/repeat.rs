use super::*;

/// main(r0): return r0 + 1
fn add_one() -> Arc<Program> {
    let code = vec![
        Op::GpBinary {
            action: BinaryAction::Add,
            target: 0,
            arg: const_arg(0),
            ret: 1,
        },
        Op::Return1(1),
    ];
    program(vec![func("main", 1, vec![int(1)], code)])
}

#[test]
fn test_vm_unready_operand_repeats_without_side_effects() {
    let program = add_one();
    let handle = RefHandle::unbound();
    let mut frame = Frame::new(Arc::clone(&program), 0, ReturnDescriptor::Tuple, vec![Value::Ref(handle.clone())])
        .unwrap();
    let op = &program.functions()[0].code()[0];

    assert!(matches!(op.process(&mut frame, 0).unwrap(), Signal::Repeat));
    assert_eq!(frame.next_var(), 1);
    assert!(frame.register(1).is_none());

    handle.bind(Value::Int(41));
    assert!(matches!(op.process(&mut frame, 0).unwrap(), Signal::Continue(1)));
    assert_eq!(frame.register(1), Some(&Value::Int(42)));
}

#[test]
fn test_vm_deferred_binding_resumes_execution() {
    let program = add_one();
    let handle = RefHandle::unbound();
    let mut vm = Vm::new();
    vm.defer_binding(handle.clone(), Value::Int(9));
    assert_eq!(vm.pending_bindings(), 1);
    let done = vm.exec(&program, vec![Value::Ref(handle)]).unwrap();
    assert_eq!(returned(done), vec![Value::Int(10)]);
    assert_eq!(vm.pending_bindings(), 0);
}

#[test]
fn test_vm_unready_operand_without_binding_faults() {
    let err = Vm::new()
        .exec(&add_one(), vec![Value::Ref(RefHandle::unbound())])
        .unwrap_err();
    assert_eq!(fault(&err), &VmFault::UnreadyOperand { pc: 0, attempts: 1 });
}

#[test]
fn test_vm_repeat_limit() {
    let mut vm = Vm::with_config(VmConfig {
        max_repeats: 2,
        ..VmConfig::default()
    });
    for _ in 0..3 {
        vm.defer_binding(RefHandle::unbound(), Value::Null);
    }
    let err = vm.exec(&add_one(), vec![Value::Ref(RefHandle::unbound())]).unwrap_err();
    assert_eq!(fault(&err), &VmFault::UnreadyOperand { pc: 0, attempts: 2 });
    assert_eq!(vm.pending_bindings(), 1);
}

#[test]
fn test_vm_dynamic_variable_binds_on_write() {
    // r0: dynamic; r0 = 5; return r0
    let code = vec![
        Op::VarD { ty: const_arg(0) },
        Op::Mov {
            from: const_arg(1),
            to: 0,
        },
        Op::Return1(0),
    ];
    let consts = vec![name("Int"), int(5)];
    let mut frame = frame_for(consts.clone(), code.clone(), ReturnDescriptor::Tuple);
    code[0].process(&mut frame, 0).unwrap();
    let Some(Value::Ref(handle)) = frame.register(0).cloned() else {
        panic!("expected a dynamic reference in r0");
    };
    assert!(!handle.is_bound());
    code[1].process(&mut frame, 1).unwrap();
    assert!(handle.is_bound());

    assert_eq!(returned(run_main(consts, code)), vec![Value::Int(5)]);
}
