use super::*;

fn point_types() -> TypeRegistry {
    let mut types = TypeRegistry::with_builtins();
    types
        .declare_class(ClassDecl {
            name: "Point".into(),
            parent: None,
            properties: vec![
                PropertyDecl {
                    name: "x".into(),
                    read_only: false,
                    default: int(0),
                },
                PropertyDecl {
                    name: "y".into(),
                    read_only: true,
                    default: int(3),
                },
            ],
        })
        .unwrap();
    types
}

/// k0 Point, k1 x, k2 y, k3 10, k4 5, k5 size, k6 "hello", k7 z
fn point_consts() -> Vec<Constant> {
    vec![
        name("Point"),
        name("x"),
        name("y"),
        int(10),
        int(5),
        name("size"),
        name("hello"),
        name("z"),
    ]
}

fn run_points(code: Vec<Op>) -> Completion {
    let program = program_with(vec![func("main", 0, point_consts(), code)], point_types());
    Vm::new().exec(&program, Vec::new()).unwrap()
}

fn new_point() -> Op {
    Op::New1 {
        class: const_arg(0),
        arg: const_arg(3),
        ret: 0,
    }
}

#[test]
fn test_vm_property_reads_and_updates() {
    let code = vec![
        new_point(),
        Op::PGet {
            prop: const_arg(1),
            target: 0,
            ret: 1,
        },
        Op::PipIncA {
            prop: const_arg(1),
            target: 0,
            ret: 2,
        },
        Op::PipBinary {
            action: BinaryAction::Add,
            prop: const_arg(1),
            target: 0,
            arg: const_arg(4),
        },
        Op::PGet {
            prop: const_arg(1),
            target: 0,
            ret: 3,
        },
        Op::PGet {
            prop: const_arg(2),
            target: 0,
            ret: 4,
        },
        Op::PGet {
            prop: const_arg(5),
            target: const_arg(6),
            ret: 5,
        },
        Op::ReturnN(vec![1, 2, 3, 4, 5]),
    ];
    let values = returned(run_points(code));
    assert_eq!(
        values,
        vec![Value::Int(10), Value::Int(10), Value::Int(16), Value::Int(3), Value::Int(5)]
    );
}

#[test]
fn test_vm_property_pre_and_post_forms() {
    let code = vec![
        new_point(),
        Op::PipDecB {
            prop: const_arg(1),
            target: 0,
            ret: 1,
        },
        Op::PipDecA {
            prop: const_arg(1),
            target: 0,
            ret: 2,
        },
        Op::PipInc {
            prop: const_arg(1),
            target: 0,
        },
        Op::PSet {
            prop: const_arg(1),
            target: 0,
            value: 1,
        },
        Op::PGet {
            prop: const_arg(1),
            target: 0,
            ret: 3,
        },
        Op::ReturnN(vec![1, 2, 3]),
    ];
    let values = returned(run_points(code));
    assert_eq!(values, vec![Value::Int(9), Value::Int(9), Value::Int(9)]);
}

#[test]
fn test_vm_read_only_property_raises() {
    let code = vec![
        new_point(),
        Op::PSet {
            prop: const_arg(2),
            target: 0,
            value: const_arg(3),
        },
        Op::Return0,
    ];
    let exc = thrown(run_points(code));
    assert_eq!(exc.type_name(), exceptions::READ_ONLY);

    let code = vec![
        new_point(),
        Op::PipInc {
            prop: const_arg(2),
            target: 0,
        },
        Op::Return0,
    ];
    assert_eq!(thrown(run_points(code)).type_name(), exceptions::READ_ONLY);
}

#[test]
fn test_vm_unknown_property_raises() {
    let code = vec![
        new_point(),
        Op::PGet {
            prop: const_arg(7),
            target: 0,
            ret: 1,
        },
        Op::Return0,
    ];
    assert_eq!(thrown(run_points(code)).type_name(), exceptions::UNSUPPORTED);

    // Int has no property table at all.
    let code = vec![
        Op::PGet {
            prop: const_arg(1),
            target: const_arg(3),
            ret: 0,
        },
        Op::Return0,
    ];
    assert_eq!(thrown(run_points(code)).type_name(), exceptions::UNSUPPORTED);
}

#[test]
fn test_vm_exception_properties() {
    let consts = vec![name("IllegalState"), name("boom"), name("message"), name("type")];
    let code = vec![
        Op::New1 {
            class: const_arg(0),
            arg: const_arg(1),
            ret: 0,
        },
        Op::PGet {
            prop: const_arg(2),
            target: 0,
            ret: 1,
        },
        Op::PGet {
            prop: const_arg(3),
            target: 0,
            ret: 2,
        },
        Op::ReturnN(vec![1, 2]),
    ];
    let values = returned(run_main(consts, code));
    assert_eq!(values, vec![Value::str("boom"), Value::str("IllegalState")]);
}

#[test]
fn test_vm_unready_property_value_leaves_dispatch_cache_alone() {
    let code = vec![
        Op::New1 {
            class: const_arg(0),
            arg: const_arg(3),
            ret: 1,
        },
        Op::PSet {
            prop: const_arg(1),
            target: 1,
            value: 0,
        },
        Op::Return0,
    ];
    let program = program_with(vec![func("main", 1, point_consts(), code)], point_types());
    let handle = RefHandle::unbound();
    let mut frame = Frame::new(Arc::clone(&program), 0, ReturnDescriptor::Tuple, vec![Value::Ref(handle.clone())])
        .unwrap()
        .with_dispatch_cache(true);
    let ops = program.functions()[0].code();

    assert!(matches!(ops[0].process(&mut frame, 0).unwrap(), Signal::Continue(1)));
    let before = frame.dispatch_stats();
    assert!(matches!(ops[1].process(&mut frame, 1).unwrap(), Signal::Repeat));
    assert_eq!(frame.dispatch_stats(), before);
    assert_eq!(frame.next_var(), 2);

    handle.bind(Value::Int(7));
    assert!(matches!(ops[1].process(&mut frame, 1).unwrap(), Signal::Continue(2)));
    assert_eq!(frame.dispatch_stats().1, before.1 + 1);
}
