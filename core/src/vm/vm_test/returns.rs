use super::*;

fn pair() -> Value {
    Value::tuple(vec![Value::Int(1), Value::Int(2)])
}

fn bare_frame(descriptor: ReturnDescriptor) -> Frame {
    frame_for(vec![], vec![Op::Return0], descriptor)
}

#[test]
fn test_vm_return_tuple_to_unused_discards() {
    let mut frame = bare_frame(ReturnDescriptor::Unused);
    assert!(matches!(frame.return_tuple(pair()).unwrap(), Signal::Return));
    assert_eq!(frame.returned(), Some(&[][..]));
}

#[test]
fn test_vm_return_tuple_to_single_with_many_values_faults() {
    let mut frame = bare_frame(ReturnDescriptor::Single);
    let err = frame.return_tuple(pair()).unwrap_err();
    assert!(matches!(
        fault(&err),
        VmFault::IllegalCallShape {
            descriptor: "single",
            ..
        }
    ));
}

#[test]
fn test_vm_return_tuple_spreads_into_matching_shapes() {
    let mut frame = bare_frame(ReturnDescriptor::Multi(2));
    frame.return_tuple(pair()).unwrap();
    assert_eq!(frame.returned(), Some(&[Value::Int(1), Value::Int(2)][..]));

    let mut frame = bare_frame(ReturnDescriptor::Single);
    frame.return_tuple(Value::tuple(vec![Value::Int(9)])).unwrap();
    assert_eq!(frame.returned(), Some(&[Value::Int(9)][..]));

    let mut frame = bare_frame(ReturnDescriptor::Tuple);
    frame.return_tuple(pair()).unwrap();
    assert_eq!(frame.returned(), Some(&[pair()][..]));
}

#[test]
fn test_vm_return_value_shapes() {
    let mut frame = bare_frame(ReturnDescriptor::None);
    assert!(matches!(
        fault(&frame.return_value(Value::Int(1)).unwrap_err()),
        VmFault::IllegalCallShape {
            descriptor: "no-value",
            ..
        }
    ));
    let mut frame = bare_frame(ReturnDescriptor::None);
    frame.return_values(Vec::new()).unwrap();
    assert_eq!(frame.returned(), Some(&[][..]));

    let mut frame = bare_frame(ReturnDescriptor::Multi(2));
    assert!(frame.return_value(Value::Int(1)).is_err());

    let mut frame = bare_frame(ReturnDescriptor::Tuple);
    frame.return_value(Value::Int(3)).unwrap();
    assert_eq!(frame.returned(), Some(&[Value::tuple(vec![Value::Int(3)])][..]));
}

#[test]
fn test_vm_return_tuple_of_non_tuple_faults() {
    let mut frame = bare_frame(ReturnDescriptor::Single);
    assert!(matches!(
        fault(&frame.return_tuple(Value::Int(1)).unwrap_err()),
        VmFault::IllegalCallShape { .. }
    ));
}

#[test]
fn test_vm_return_tuple_of_non_tuple_to_unused_discards() {
    let mut frame = bare_frame(ReturnDescriptor::Unused);
    assert!(matches!(frame.return_tuple(Value::Int(5)).unwrap(), Signal::Return));
    assert_eq!(frame.returned(), Some(&[][..]));

    // RETURN_T of an Int from a callee whose result is unused.
    let callee = func("five", 0, vec![int(5)], vec![Op::ReturnT(const_arg(0))]);
    let main = func(
        "main",
        0,
        vec![Constant::Function(1)],
        vec![
            Op::Call {
                fun: const_arg(0),
                args: CallArgs::None,
                result: CallResult::Unused,
            },
            Op::Return0,
        ],
    );
    assert!(returned(run_program(vec![main, callee])).is_empty());
}

/// `pair` returns (1, 2) with RETURN_T; `main` calls it with `result`.
fn call_pair(result: CallResult, tail: Vec<Op>) -> Vec<Function> {
    let callee = func(
        "pair",
        0,
        vec![name("Tuple"), int(1), int(2)],
        vec![
            Op::VarT {
                ty: const_arg(0),
                values: vec![const_arg(1), const_arg(2)],
            },
            Op::ReturnT(0),
        ],
    );
    let mut code = vec![Op::Call {
        fun: const_arg(0),
        args: CallArgs::None,
        result,
    }];
    code.extend(tail);
    vec![func("main", 0, vec![Constant::Function(1)], code), callee]
}

#[test]
fn test_vm_call_shapes_end_to_end() {
    let unused = call_pair(CallResult::Unused, vec![Op::Return0]);
    assert!(returned(run_program(unused)).is_empty());

    let many = call_pair(CallResult::Many(vec![0, 1]), vec![Op::ReturnN(vec![1, 0])]);
    assert_eq!(returned(run_program(many)), vec![Value::Int(2), Value::Int(1)]);

    let tuple = call_pair(CallResult::Tuple(0), vec![Op::Return1(0)]);
    assert_eq!(returned(run_program(tuple)), vec![pair()]);

    let single = call_pair(CallResult::One(0), vec![Op::Return1(0)]);
    let err = Vm::new().exec(&program(single), Vec::new()).unwrap_err();
    assert!(matches!(
        fault(&err),
        VmFault::IllegalCallShape {
            descriptor: "single",
            ..
        }
    ));
}

#[test]
fn test_vm_entry_tuple_is_flattened() {
    let code = vec![Op::ReturnN(vec![const_arg(0), const_arg(1)])];
    assert_eq!(returned(run_main(vec![int(4), int(5)], code)), vec![Value::Int(4), Value::Int(5)]);
}

#[test]
fn test_vm_throw_of_non_exception_faults() {
    let err = Vm::new()
        .exec(
            &program(vec![func("main", 0, vec![int(1)], vec![Op::Throw(const_arg(0))])]),
            Vec::new(),
        )
        .unwrap_err();
    assert!(matches!(fault(&err), VmFault::MalformedThrow { .. }));
}
