use super::*;

fn binary(action: BinaryAction, a: i64, b: i64) -> Completion {
    let code = vec![
        Op::GpBinary {
            action,
            target: const_arg(0),
            arg: const_arg(1),
            ret: 0,
        },
        Op::Return1(0),
    ];
    run_main(vec![int(a), int(b)], code)
}

#[test]
fn test_vm_arithmetic_dispatches_through_type_support() {
    let cases = [
        (BinaryAction::Add, 40, 2, 42),
        (BinaryAction::Sub, 40, 2, 38),
        (BinaryAction::Mul, 6, 7, 42),
        (BinaryAction::Div, 85, 2, 42),
        (BinaryAction::Mod, -7, 3, 2),
        (BinaryAction::Shl, 1, 4, 16),
        (BinaryAction::Xor, 6, 3, 5),
    ];
    for (action, a, b, expected) in cases {
        assert_eq!(returned(binary(action, a, b)), vec![Value::Int(expected)], "{action:?}");
    }
}

#[test]
fn test_vm_division_by_zero_is_catchable() {
    let exc = thrown(binary(BinaryAction::Div, 1, 0));
    assert_eq!(exc.type_name(), exceptions::DIVISION_BY_ZERO);

    let overflow = thrown(binary(BinaryAction::Add, i64::MAX, 1));
    assert_eq!(overflow.type_name(), exceptions::OUT_OF_BOUNDS);
}

#[test]
fn test_vm_unsupported_action_raises() {
    let code = vec![
        Op::GpBinary {
            action: BinaryAction::Sub,
            target: const_arg(0),
            arg: const_arg(1),
            ret: 0,
        },
        Op::Return1(0),
    ];
    let exc = thrown(run_main(vec![name("a"), name("b")], code));
    assert_eq!(exc.type_name(), exceptions::UNSUPPORTED);
}

#[test]
fn test_vm_range_operator() {
    let values = returned(binary(BinaryAction::RangeExclusive, 1, 5));
    assert_eq!(values.len(), 1);
    assert_eq!(values[0].to_string(), "1..<5");
}

#[test]
fn test_vm_div_rem_and_unary() {
    let code = vec![
        Op::GpDivRem {
            target: const_arg(0),
            arg: const_arg(1),
            quotient: 0,
            remainder: 1,
        },
        Op::GpNeg { target: 0, ret: 2 },
        Op::GpCompl { target: 1, ret: 3 },
        Op::ReturnN(vec![0, 1, 2, 3]),
    ];
    let values = returned(run_main(vec![int(17), int(5)], code));
    assert_eq!(values, vec![Value::Int(3), Value::Int(2), Value::Int(-3), Value::Int(!2)]);
}

#[test]
fn test_vm_compare_and_relations() {
    let code = vec![
        Op::Cmp {
            a: const_arg(0),
            b: const_arg(1),
            ret: 0,
        },
        Op::IsCmp {
            rel: Relation::Lt,
            a: const_arg(0),
            b: const_arg(1),
            ret: 1,
        },
        Op::IsCmp {
            rel: Relation::NEq,
            a: const_arg(0),
            b: const_arg(0),
            ret: 2,
        },
        Op::IsNot { arg: 1, ret: 3 },
        Op::IsTest {
            test: Test::Zero,
            arg: const_arg(2),
            ret: 4,
        },
        Op::ReturnN(vec![0, 1, 2, 3, 4]),
    ];
    let values = returned(run_main(vec![int(1), int(2), int(0)], code));
    assert_eq!(
        values,
        vec![
            Value::Int(-1),
            Value::Bool(true),
            Value::Bool(false),
            Value::Bool(false),
            Value::Bool(true),
        ]
    );
}

#[test]
fn test_vm_in_place_increments() {
    // r0 = 5; r1 = r0++; r2 = ++r0; r0--; r0 *= 3
    let code = vec![
        Op::VarI {
            ty: const_arg(0),
            init: const_arg(1),
        },
        Op::IpIncA { target: 0, ret: 1 },
        Op::IpIncB { target: 0, ret: 2 },
        Op::IpDec(0),
        Op::IpBinary {
            action: BinaryAction::Mul,
            target: 0,
            arg: const_arg(2),
        },
        Op::ReturnN(vec![0, 1, 2]),
    ];
    let values = returned(run_main(vec![name("Int"), int(5), int(3)], code));
    assert_eq!(values, vec![Value::Int(18), Value::Int(5), Value::Int(7)]);
}

#[test]
fn test_vm_dispatch_site_sees_a_new_type() {
    // r0 = 1; loop { r1 = r0 + 1; if r1 == "x1" break; r0 = "x" }; return r1
    let code = vec![
        Op::VarI {
            ty: const_arg(0),
            init: const_arg(1),
        },
        Op::GpBinary {
            action: BinaryAction::Add,
            target: 0,
            arg: const_arg(1),
            ret: 1,
        },
        Op::IsCmp {
            rel: Relation::Eq,
            a: 1,
            b: const_arg(3),
            ret: 2,
        },
        Op::JmpTrue { arg: 2, offset: 3 },
        Op::Mov {
            from: const_arg(2),
            to: 0,
        },
        Op::Jmp(-4),
        Op::Return1(1),
    ];
    let consts = vec![name("Any"), int(1), name("x"), name("x1")];
    let values = returned(run_main(consts, code));
    assert_eq!(values, vec![Value::str("x1")]);
}

fn repeat_string(count: i64) -> Completion {
    let code = vec![
        Op::GpBinary {
            action: BinaryAction::Mul,
            target: const_arg(0),
            arg: const_arg(1),
            ret: 0,
        },
        Op::Return1(0),
    ];
    run_main(vec![name("ab"), int(count)], code)
}

#[test]
fn test_vm_string_repeat_out_of_bounds() {
    assert_eq!(returned(repeat_string(3)), vec![Value::str("ababab")]);

    for count in [i64::MAX, 10_000_000_000, (crate::types::MAX_STRING_LEN / 2 + 1) as i64] {
        let exc = thrown(repeat_string(count));
        assert_eq!(exc.type_name(), exceptions::OUT_OF_BOUNDS, "count {count}");
    }
}

#[test]
fn test_vm_remainder_of_min_by_minus_one() {
    assert_eq!(returned(binary(BinaryAction::Mod, i64::MIN, -1)), vec![Value::Int(0)]);
    assert_eq!(thrown(binary(BinaryAction::Div, i64::MIN, -1)).type_name(), exceptions::OUT_OF_BOUNDS);
}

#[test]
fn test_vm_frame_dispatch_cache_toggle() {
    let code = vec![
        Op::IpBinary {
            action: BinaryAction::Add,
            target: 0,
            arg: const_arg(0),
        },
        Op::Return1(0),
    ];
    let program = program(vec![func("main", 1, vec![int(1)], code)]);
    let op = &program.functions()[0].code()[0];

    let mut cached = Frame::new(Arc::clone(&program), 0, ReturnDescriptor::Tuple, vec![Value::Int(0)])
        .unwrap()
        .with_dispatch_cache(true);
    op.process(&mut cached, 0).unwrap();
    op.process(&mut cached, 0).unwrap();
    assert_eq!(cached.dispatch_stats(), (1, 1));

    let mut uncached = Frame::new(Arc::clone(&program), 0, ReturnDescriptor::Tuple, vec![Value::Int(0)])
        .unwrap()
        .with_dispatch_cache(false);
    op.process(&mut uncached, 0).unwrap();
    op.process(&mut uncached, 0).unwrap();
    assert_eq!(uncached.dispatch_stats(), (0, 2));
    assert_eq!(uncached.register(0), Some(&Value::Int(2)));
}
