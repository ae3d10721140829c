use super::*;

#[test]
fn test_vm_goto_is_absolute() {
    let mut code = vec![Op::Goto(100)];
    code.extend(nops(99));
    code.push(Op::Return1(const_arg(0)));
    let mut frame = frame_for(vec![int(1)], code.clone(), ReturnDescriptor::Tuple);
    match Op::Goto(100).process(&mut frame, 0).unwrap() {
        Signal::Continue(target) => assert_eq!(target, 100),
        other => panic!("unexpected signal {other:?}"),
    }
    assert_eq!(returned(run_main(vec![int(1)], code)), vec![Value::Int(1)]);
}

#[test]
fn test_vm_jump_is_relative() {
    // 0: GOTO 50; 45: return 45; 50: JMP -5
    let mut code = vec![Op::Goto(50)];
    code.extend(nops(44));
    code.push(Op::Return1(const_arg(0)));
    code.extend(nops(4));
    code.push(Op::Jmp(-5));
    assert_eq!(code.len(), 51);
    let mut frame = frame_for(vec![int(45)], code.clone(), ReturnDescriptor::Tuple);
    match Op::Jmp(-5).process(&mut frame, 50).unwrap() {
        Signal::Continue(target) => assert_eq!(target, 45),
        other => panic!("unexpected signal {other:?}"),
    }
    assert_eq!(returned(run_main(vec![int(45)], code)), vec![Value::Int(45)]);
}

#[test]
fn test_vm_counting_loop() {
    // r0 = 0; while r0 < 5 { r0++ }; return r0
    let code = vec![
        Op::VarI {
            ty: const_arg(0),
            init: const_arg(1),
        },
        Op::JmpCmp {
            rel: Relation::Gte,
            a: 0,
            b: const_arg(2),
            offset: 3,
        },
        Op::IpInc(0),
        Op::Jmp(-2),
        Op::Return1(0),
    ];
    let values = returned(run_main(vec![name("Int"), int(0), int(5)], code));
    assert_eq!(values, vec![Value::Int(5)]);
}

#[test]
fn test_vm_conditional_branches() {
    // r0 = true; r1 = r0 is null; every wrong turn lands on `return 0` at 6
    let code = vec![
        Op::VarI {
            ty: const_arg(0),
            init: const_arg(1),
        },
        Op::JmpFalse { arg: 0, offset: 5 },
        Op::IsTest {
            test: Test::Null,
            arg: 0,
            ret: 1,
        },
        Op::JmpTrue { arg: 1, offset: 3 },
        Op::JmpTest {
            test: Test::NNull,
            arg: 0,
            offset: 3,
        },
        Op::Nop,
        Op::Return1(const_arg(3)),
        Op::Return1(const_arg(2)),
    ];
    let values = returned(run_main(vec![name("Boolean"), Constant::Bool(true), int(1), int(0)], code));
    assert_eq!(values, vec![Value::Int(1)]);
}

#[test]
fn test_vm_non_boolean_condition_raises() {
    let code = vec![
        Op::JmpTrue {
            arg: const_arg(0),
            offset: 1,
        },
        Op::Return0,
    ];
    let exc = thrown(run_main(vec![int(1)], code));
    assert_eq!(exc.type_name(), exceptions::ILLEGAL_ARGUMENT);
}

#[test]
fn test_vm_jump_leaves_inner_scopes() {
    // { r0 = 7; { r1 = 8; goto 7 } } 7: return 1
    let code = vec![
        Op::Enter,
        Op::VarI {
            ty: const_arg(0),
            init: const_arg(1),
        },
        Op::Enter,
        Op::VarI {
            ty: const_arg(0),
            init: const_arg(2),
        },
        Op::Goto(7),
        Op::Exit,
        Op::Exit,
        Op::Return1(const_arg(3)),
    ];
    let mut frame = frame_for(
        vec![name("Int"), int(7), int(8), int(1)],
        code.clone(),
        ReturnDescriptor::Tuple,
    );
    for (pc, op) in code.iter().enumerate().take(4) {
        op.process(&mut frame, pc).unwrap();
    }
    assert_eq!(frame.depth(), 2);
    match Op::Goto(7).process(&mut frame, 4).unwrap() {
        Signal::Continue(7) => {}
        other => panic!("unexpected signal {other:?}"),
    }
    assert_eq!(frame.depth(), 0);
    assert_eq!(frame.next_var(), 0);
    assert!(frame.register(0).is_none());

    let values = returned(run_main(vec![name("Int"), int(7), int(8), int(1)], code));
    assert_eq!(values, vec![Value::Int(1)]);
}

#[test]
fn test_vm_jump_out_of_range_faults() {
    let mut frame = frame_for(vec![], vec![Op::Return0], ReturnDescriptor::Tuple);
    let err = Op::Jmp(-3).process(&mut frame, 0).unwrap_err();
    assert_eq!(fault(&err), &VmFault::PcOutOfRange { pc: -3, len: 1 });
}

#[test]
fn test_vm_line_markers_track_source_lines() {
    let code = vec![Op::Line1, Op::Line3, Op::LineN(10), Op::Nop, Op::Return0];
    let mut frame = frame_for(vec![], code.clone(), ReturnDescriptor::Tuple);
    for (pc, op) in code.iter().enumerate().take(4) {
        op.process(&mut frame, pc).unwrap();
    }
    assert_eq!(frame.line(), 14);
}

#[test]
fn test_vm_assert_raises_on_false() {
    let code = vec![Op::Assert(const_arg(0)), Op::Return0];
    let exc = thrown(run_main(vec![Constant::Bool(false)], code));
    assert_eq!(exc.type_name(), exceptions::ASSERTION);

    let code = vec![Op::Assert(const_arg(0)), Op::Return0];
    assert!(returned(run_main(vec![Constant::Bool(true)], code)).is_empty());
}
