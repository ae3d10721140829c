use super::*;

fn catch(type_const: u32, name_const: u32, offset: i32) -> Op {
    Op::Guard(vec![CatchClause {
        type_const: const_arg(type_const),
        name_const: const_arg(name_const),
        offset,
    }])
}

/// k0 IllegalState, k1 "X", k2 "boom", k3 Int type name, k4 0, k5 7
fn try_consts() -> Vec<Constant> {
    vec![name("IllegalState"), name("X"), name("boom"), name("Int"), int(0), int(7)]
}

/// try [10, 20) with its handler at 25; the raise happens at 15.
fn try_region_code() -> Vec<Op> {
    let mut code = vec![Op::VarI {
        ty: const_arg(3),
        init: const_arg(4),
    }];
    code.extend(nops(9));
    code.push(catch(0, 1, 15)); // 10
    code.push(Op::VarI {
        ty: const_arg(3),
        init: const_arg(5),
    }); // 11: r1 = 7
    code.extend(nops(2));
    code.push(Op::New1 {
        class: const_arg(0),
        arg: const_arg(2),
        ret: 2,
    }); // 14
    code.push(Op::Throw(2)); // 15
    code.extend(nops(4));
    code.push(Op::GuardEnd(10)); // 20 -> 30
    code.extend(nops(4));
    code.push(Op::Catch); // 25
    code.push(Op::Return1(1)); // 26
    code.push(Op::CatchEnd(4)); // 27 -> 31
    code.extend(nops(2));
    code.push(Op::Return1(0)); // 30
    code.push(Op::Return1(0)); // 31
    code
}

#[test]
fn test_vm_raise_lands_on_matching_handler() {
    let code = try_region_code();
    assert!(matches!(code[25], Op::Catch));
    assert!(matches!(code[15], Op::Throw(_)));

    let mut frame = frame_for(try_consts(), code.clone(), ReturnDescriptor::Tuple);
    for pc in [0, 10, 11, 14] {
        code[pc].process(&mut frame, pc).unwrap();
    }
    assert_eq!(frame.depth(), 1);
    assert_eq!(frame.next_var(), 3);
    assert_eq!(frame.guards().len(), 1);
    assert_eq!(frame.guards()[0].start, 10);
    assert_eq!(frame.guards()[0].end, 20);

    assert!(matches!(code[15].process(&mut frame, 15).unwrap(), Signal::Exception));
    let exc = frame.pending_exception().cloned().unwrap();
    assert_eq!(frame.unwind(exc).unwrap(), Some(25));
    // The try scope and its registers are gone.
    assert_eq!(frame.depth(), 0);
    assert_eq!(frame.next_var(), 1);
    assert!(frame.guards().is_empty());
    assert!(frame.register(1).is_none());
    assert!(frame.register(2).is_none());

    match code[25].process(&mut frame, 25).unwrap() {
        Signal::Continue(26) => {}
        other => panic!("unexpected signal {other:?}"),
    }
    assert_eq!(frame.depth(), 1);
    let bound = frame.register(1).and_then(Value::as_exception).unwrap();
    assert_eq!(bound.type_name(), "IllegalState");
    assert_eq!(frame.variable_info(1).and_then(|i| i.name.as_deref()), Some("X"));
    assert_eq!(frame.register(0), Some(&Value::Int(0)));
}

#[test]
fn test_vm_try_region_end_to_end() {
    let values = returned(run_main(try_consts(), try_region_code()));
    let [Value::Exception(exc)] = values.as_slice() else {
        panic!("expected the caught exception, got {values:?}");
    };
    assert_eq!(exc.type_name(), "IllegalState");
    assert_eq!(exc.message(), "boom");
}

#[test]
fn test_vm_try_registers_are_unreadable_in_handler() {
    let mut code = try_region_code();
    code[26] = Op::Return1(2);
    let err = Vm::new().exec(&program(vec![func("main", 0, try_consts(), code)]), Vec::new()).unwrap_err();
    assert_eq!(fault(&err), &VmFault::UnassignedRegister { register: 2 });
}

#[test]
fn test_vm_unmatched_type_escapes() {
    // The handler only takes DivisionByZero.
    let mut consts = try_consts();
    consts.push(name("DivisionByZero"));
    let mut code = try_region_code();
    code[10] = catch(6, 1, 15);
    let exc = thrown(run_main(consts, code));
    assert_eq!(exc.type_name(), "IllegalState");
}

#[test]
fn test_vm_guard_stack_is_lifo() {
    let code = vec![Op::Return0];
    let mut frame = frame_for(vec![], code, ReturnDescriptor::Tuple);
    let outer = Guard {
        start: 0,
        end: 20,
        scope: 1,
        kind: GuardKind::Finally { address: 20 },
    };
    let inner = Guard {
        start: 2,
        end: 10,
        scope: 2,
        kind: GuardKind::Catch(Vec::new()),
    };
    frame.push_guard(outer.clone()).unwrap();
    frame.push_guard(inner.clone()).unwrap();

    let stray = Guard {
        start: 15,
        end: 30,
        scope: 3,
        kind: GuardKind::Catch(Vec::new()),
    };
    let err = frame.push_guard(stray).unwrap_err();
    assert!(matches!(fault(&err), VmFault::GuardNesting { .. }));

    assert_eq!(frame.pop_guard().unwrap(), inner);
    assert_eq!(frame.pop_guard().unwrap(), outer);
    assert!(matches!(fault(&frame.pop_guard().unwrap_err()), VmFault::GuardNesting { .. }));
}

#[test]
fn test_vm_inner_guard_takes_precedence() {
    // try { try { throw } catch (IllegalState e) { return 1 } } catch (Exception e) { return 2 }
    let consts = vec![
        name("IllegalState"),
        name("e"),
        name("Exception"),
        int(1),
        int(2),
        name("boom"),
    ];
    let code = vec![
        catch(2, 1, 10), // 0 -> 10
        catch(0, 1, 5),  // 1 -> 6
        Op::New1 {
            class: const_arg(0),
            arg: const_arg(5),
            ret: 0,
        },
        Op::Throw(0),
        Op::GuardEnd(5), // 4 -> 9
        Op::Nop,
        Op::Catch, // 6
        Op::Return1(const_arg(3)),
        Op::CatchEnd(1), // 8 -> 9
        Op::GuardEnd(4), // 9 -> 13
        Op::Catch,       // 10
        Op::Return1(const_arg(4)),
        Op::CatchEnd(1), // 12 -> 13
        Op::Return0,     // 13
    ];
    assert_eq!(returned(run_main(consts, code)), vec![Value::Int(1)]);
}

/// try { r0 = new IllegalState; [throw r0] } finally { } return 1
fn finally_code(throw: bool) -> Vec<Op> {
    vec![
        Op::GuardAll(4),
        Op::New1 {
            class: const_arg(0),
            arg: const_arg(1),
            ret: 0,
        },
        if throw { Op::Throw(0) } else { Op::Nop },
        Op::Nop,
        Op::Finally, // 4
        Op::Nop,
        Op::FinallyEnd,
        Op::Return1(const_arg(2)),
    ]
}

fn finally_consts() -> Vec<Constant> {
    vec![name("IllegalState"), name("boom"), int(1)]
}

#[test]
fn test_vm_finally_reraises_exception() {
    let exc = thrown(run_main(finally_consts(), finally_code(true)));
    assert_eq!(exc.type_name(), "IllegalState");
    assert_eq!(exc.message(), "boom");
}

#[test]
fn test_vm_finally_falls_through_without_exception() {
    let code = finally_code(false);
    let mut frame = frame_for(finally_consts(), code.clone(), ReturnDescriptor::Tuple);
    for pc in 0..4 {
        code[pc].process(&mut frame, pc).unwrap();
    }
    code[4].process(&mut frame, 4).unwrap();
    assert!(frame.guards().is_empty());
    assert_eq!(frame.depth(), 1);
    // The reserved slot exists but holds nothing.
    assert_eq!(frame.next_var(), 1);
    assert!(frame.register(0).is_none());

    assert_eq!(returned(run_main(finally_consts(), code)), vec![Value::Int(1)]);
}

#[test]
fn test_vm_finally_slot_holds_caught_exception() {
    let code = finally_code(true);
    let mut frame = frame_for(finally_consts(), code.clone(), ReturnDescriptor::Tuple);
    for pc in 0..3 {
        code[pc].process(&mut frame, pc).unwrap();
    }
    let exc = frame.pending_exception().cloned().unwrap();
    assert_eq!(frame.unwind(exc.clone()).unwrap(), Some(4));
    code[4].process(&mut frame, 4).unwrap();
    let slot = frame.register(frame.scope_base()).and_then(Value::as_exception).unwrap();
    assert!(slot.ptr_eq(&exc));
    assert!(matches!(code[6].process(&mut frame, 6).unwrap(), Signal::Exception));
    assert_eq!(frame.depth(), 0);
}

#[test]
fn test_vm_exception_crosses_frames() {
    let thrower = func(
        "thrower",
        0,
        vec![name("IllegalState"), name("inner")],
        vec![
            Op::New1 {
                class: const_arg(0),
                arg: const_arg(1),
                ret: 0,
            },
            Op::Throw(0),
        ],
    );
    let main = func(
        "main",
        0,
        vec![Constant::Function(1), name("Exception"), name("e"), int(-1)],
        vec![
            Op::Guard(vec![CatchClause {
                type_const: const_arg(1),
                name_const: const_arg(2),
                offset: 3,
            }]),
            Op::Call {
                fun: const_arg(0),
                args: CallArgs::None,
                result: CallResult::Unused,
            },
            Op::GuardEnd(4), // 2 -> 6
            Op::Catch,       // 3
            Op::Return1(0),
            Op::CatchEnd(1),
            Op::Return1(const_arg(3)),
        ],
    );
    let values = returned(run_program(vec![main, thrower]));
    let [Value::Exception(exc)] = values.as_slice() else {
        panic!("expected the caught exception, got {values:?}");
    };
    assert_eq!(exc.message(), "inner");
}

#[test]
fn test_vm_exit_of_guarded_scope_faults() {
    let code = vec![Op::Return0];
    let mut frame = frame_for(vec![], code, ReturnDescriptor::Tuple);
    frame.enter_scope(0).unwrap();
    frame
        .push_guard(Guard {
            start: 0,
            end: 1,
            scope: 1,
            kind: GuardKind::Finally { address: 1 },
        })
        .unwrap();
    let err = Op::Exit.process(&mut frame, 0).unwrap_err();
    assert_eq!(fault(&err), &VmFault::GuardOwnsScope { depth: 1 });
}
