//! Interpreter behavior over hand-assembled chunks.

use std::rc::Rc;

use magpie_vm::{
    Atom, Chunk, ChunkBuilder, Constant, CoreClass, HeapObject, Instruction, Method,
    NativeCtx, NativeOutcome, Opcode, Pattern, Value, Vm,
};

fn ins(op: Opcode, a: u16, b: u16, c: u16) -> Instruction {
    Instruction::new(op, a, b, c)
}

fn build(
    f: impl FnOnce(&mut ChunkBuilder),
    num_slots: usize,
    num_upvars: usize,
) -> Rc<Chunk> {
    let mut builder = ChunkBuilder::new();
    f(&mut builder);
    builder.build(num_slots, num_upvars).unwrap()
}

#[test]
fn constant_move_return() {
    let chunk = build(
        |b| {
            let k = b.add_constant(Constant::Int(7));
            b.write(ins(Opcode::Constant, k, 0, 0), 1);
            b.write(ins(Opcode::Move, 0, 1, 0), 1);
            b.write(ins(Opcode::Return, 1, 0, 0), 1);
        },
        2,
        0,
    );
    let mut vm = Vm::new();
    assert_eq!(vm.run_chunk(chunk), Some(Value::Int(7)));
}

#[test]
fn conditional_jumps_respect_truthiness() {
    let chunk = build(
        |b| {
            let k1 = b.add_constant(Constant::Int(1));
            let k2 = b.add_constant(Constant::Int(2));
            b.write(ins(Opcode::Atom, Atom::False as u16, 0, 0), 1);
            b.write(ins(Opcode::JumpIfFalse, 0, 2, 0), 1);
            b.write(ins(Opcode::Constant, k1, 1, 0), 1);
            b.write(ins(Opcode::Jump, 1, 1, 0), 1);
            b.write(ins(Opcode::Constant, k2, 1, 0), 1);
            b.write(ins(Opcode::Return, 1, 0, 0), 1);
        },
        2,
        0,
    );
    let mut vm = Vm::new();
    assert_eq!(vm.run_chunk(chunk), Some(Value::Int(2)));
}

#[test]
fn zero_is_truthy() {
    let chunk = build(
        |b| {
            let k0 = b.add_constant(Constant::Int(0));
            let k1 = b.add_constant(Constant::Int(1));
            let k2 = b.add_constant(Constant::Int(2));
            b.write(ins(Opcode::Constant, k0, 0, 0), 1);
            b.write(ins(Opcode::JumpIfTrue, 0, 2, 0), 1);
            b.write(ins(Opcode::Constant, k1, 1, 0), 1);
            b.write(ins(Opcode::Jump, 1, 1, 0), 1);
            b.write(ins(Opcode::Constant, k2, 1, 0), 1);
            b.write(ins(Opcode::Return, 1, 0, 0), 1);
        },
        2,
        0,
    );
    let mut vm = Vm::new();
    assert_eq!(vm.run_chunk(chunk), Some(Value::Int(2)));
}

#[test]
fn equal_compares_string_content() {
    let chunk = build(
        |b| {
            let ka = b.add_constant(Constant::Str("abc".to_string()));
            let kb = b.add_constant(Constant::Str("abc".to_string()));
            b.write(ins(Opcode::Constant, ka, 0, 0), 1);
            b.write(ins(Opcode::Constant, kb, 1, 0), 1);
            b.write(ins(Opcode::Equal, 0, 1, 2), 1);
            b.write(ins(Opcode::Return, 2, 0, 0), 1);
        },
        3,
        0,
    );
    let mut vm = Vm::new();
    assert_eq!(vm.run_chunk(chunk), Some(Value::Atom(Atom::True)));
}

#[test]
fn not_inverts_truthiness() {
    let chunk = build(
        |b| {
            b.write(ins(Opcode::Atom, Atom::Nothing as u16, 0, 0), 1);
            b.write(ins(Opcode::Not, 0, 0, 0), 1);
            b.write(ins(Opcode::Return, 0, 0, 0), 1);
        },
        1,
        0,
    );
    let mut vm = Vm::new();
    assert_eq!(vm.run_chunk(chunk), Some(Value::Atom(Atom::True)));
}

#[test]
fn record_then_get_field_round_trips() {
    let mut vm = Vm::new();
    let sx = vm.state.symbols.intern("x");
    let sy = vm.state.symbols.intern("y");
    let ty = vm.state.add_record_type(vec![sx, sy]);

    let chunk = build(
        |b| {
            let k1 = b.add_constant(Constant::Int(1));
            let k2 = b.add_constant(Constant::Int(2));
            b.write(ins(Opcode::Constant, k1, 0, 0), 1);
            b.write(ins(Opcode::Constant, k2, 1, 0), 1);
            b.write(ins(Opcode::Record, 0, ty as u16, 2), 1);
            b.write(ins(Opcode::GetField, 2, sy.as_u32() as u16, 3), 1);
            b.write(ins(Opcode::Return, 3, 0, 0), 1);
        },
        4,
        0,
    );
    assert_eq!(vm.run_chunk(chunk), Some(Value::Int(2)));
}

#[test]
fn get_field_on_missing_symbol_raises() {
    let mut vm = Vm::new();
    let sx = vm.state.symbols.intern("x");
    let ghost = vm.state.symbols.intern("ghost");
    let ty = vm.state.add_record_type(vec![sx]);

    let chunk = build(
        |b| {
            let k1 = b.add_constant(Constant::Int(1));
            b.write(ins(Opcode::Constant, k1, 0, 0), 1);
            b.write(ins(Opcode::Record, 0, ty as u16, 1), 1);
            b.write(ins(Opcode::GetField, 1, ghost.as_u32() as u16, 2), 1);
            b.write(ins(Opcode::Return, 2, 0, 0), 1);
        },
        3,
        0,
    );
    assert_eq!(vm.run_chunk(chunk), None);
    assert!(vm.state.had_uncaught_error);
}

#[test]
fn test_field_jumps_instead_of_raising() {
    let mut vm = Vm::new();
    let sa = vm.state.symbols.intern("a");
    let sb = vm.state.symbols.intern("b");
    let ty = vm.state.add_record_type(vec![sa]);

    let chunk = build(
        |b| {
            let k1 = b.add_constant(Constant::Int(1));
            b.write(ins(Opcode::Constant, k1, 0, 0), 1);
            b.write(ins(Opcode::Record, 0, ty as u16, 1), 1);
            b.write(ins(Opcode::TestField, 1, sb.as_u32() as u16, 2), 1);
            b.write(ins(Opcode::Jump, 1, 2, 0), 1);
            b.write(ins(Opcode::Atom, Atom::True as u16, 3, 0), 1);
            b.write(ins(Opcode::Jump, 1, 1, 0), 1);
            b.write(ins(Opcode::Atom, Atom::False as u16, 3, 0), 1);
            b.write(ins(Opcode::Return, 3, 0, 0), 1);
        },
        4,
        0,
    );
    // Field `b` is absent: the pseudo-jump is taken, no error raised.
    assert_eq!(vm.run_chunk(chunk), Some(Value::Atom(Atom::False)));
    assert!(!vm.state.had_uncaught_error);

    // Field `a` is present: falls through and stores the field.
    let chunk = build(
        |b| {
            let k1 = b.add_constant(Constant::Int(1));
            b.write(ins(Opcode::Constant, k1, 0, 0), 1);
            b.write(ins(Opcode::Record, 0, ty as u16, 1), 1);
            b.write(ins(Opcode::TestField, 1, sa.as_u32() as u16, 2), 1);
            b.write(ins(Opcode::Jump, 1, 1, 0), 1);
            b.write(ins(Opcode::Return, 2, 0, 0), 1);
            b.write(ins(Opcode::Return, 0, 0, 0), 1);
        },
        3,
        0,
    );
    assert_eq!(vm.run_chunk(chunk), Some(Value::Int(1)));
}

#[test]
fn list_builds_from_registers() {
    let chunk = build(
        |b| {
            let k1 = b.add_constant(Constant::Int(4));
            let k2 = b.add_constant(Constant::Int(5));
            b.write(ins(Opcode::Constant, k1, 0, 0), 1);
            b.write(ins(Opcode::Constant, k2, 1, 0), 1);
            b.write(ins(Opcode::List, 0, 2, 2), 1);
            b.write(ins(Opcode::Return, 2, 0, 0), 1);
        },
        3,
        0,
    );
    let mut vm = Vm::new();
    let result = vm.run_chunk(chunk).unwrap();
    let handle = result.handle().unwrap();
    match vm.state.heap.get(handle) {
        HeapObject::List(items) => {
            assert_eq!(items.as_slice(), &[Value::Int(4), Value::Int(5)]);
        }
        other => panic!("expected list, found {}", other.kind_name()),
    }
}

#[test]
fn module_variables_round_trip_and_raise_when_unset() {
    let mut vm = Vm::new();
    let index = vm
        .state
        .add_module(magpie_vm::Module::new("m", None));
    vm.state.module_mut(index).unwrap().declare_variable("x");

    // Reading the null slot raises UNDEFINED_VAR_ERROR.
    let chunk = build(
        |b| {
            b.write(ins(Opcode::GetVar, index as u16, 0, 0), 1);
            b.write(ins(Opcode::Return, 0, 0, 0), 1);
        },
        1,
        0,
    );
    assert_eq!(vm.run_chunk(chunk), None);
    assert!(vm.state.had_uncaught_error);
    vm.state.had_uncaught_error = false;

    // Set then get.
    let chunk = build(
        |b| {
            let k5 = b.add_constant(Constant::Int(5));
            b.write(ins(Opcode::Constant, k5, 0, 0), 1);
            b.write(ins(Opcode::SetVar, index as u16, 0, 0), 1);
            b.write(ins(Opcode::GetVar, index as u16, 0, 1), 1);
            b.write(ins(Opcode::Return, 1, 0, 0), 1);
        },
        2,
        0,
    );
    assert_eq!(vm.run_chunk(chunk), Some(Value::Int(5)));
    assert_eq!(
        vm.state.module(index).unwrap().get_variable(0),
        Some(Value::Int(5))
    );
}

#[test]
fn upvar_cells_are_shared_between_frame_and_closure() {
    // Inner closure returns the cell's value; the outer chunk mutates the
    // cell after capture, and the closure observes the new value.
    let inner = build(
        |b| {
            b.write(ins(Opcode::GetUpvar, 0, 0, 0), 1);
            b.write(ins(Opcode::Return, 0, 0, 0), 1);
        },
        1,
        1,
    );

    let mut vm = Vm::new();
    vm.state.natives.register("test.apply", |_, _| NativeOutcome::TailCall);
    let apply = vm.state.natives.find("test.apply").unwrap() as u16;

    let mut builder = ChunkBuilder::new();
    let nested = builder.add_chunk(inner);
    let k42 = builder.add_constant(Constant::Int(42));
    let k99 = builder.add_constant(Constant::Int(99));
    builder.write(ins(Opcode::Constant, k42, 1, 0), 1);
    builder.write(ins(Opcode::SetUpvar, 0, 1, 1), 1);
    builder.write(ins(Opcode::Function, nested, 0, 0), 1);
    builder.write(ins(Opcode::GetUpvar, 0, 0, 0), 1); // capture: reuse slot 0
    builder.write(ins(Opcode::Constant, k99, 1, 0), 2);
    builder.write(ins(Opcode::SetUpvar, 0, 1, 0), 2); // mutate the shared cell
    builder.write(ins(Opcode::Native, apply, 0, 1), 2);
    builder.write(ins(Opcode::Return, 1, 0, 0), 2);
    let outer = builder.build(2, 1).unwrap();

    assert_eq!(vm.run_chunk(outer), Some(Value::Int(99)));
}

#[test]
fn throw_unwinds_to_handler_in_same_frame() {
    let chunk = build(
        |b| {
            let kerr = b.add_constant(Constant::Str("boom".to_string()));
            b.write(ins(Opcode::EnterTry, 3, 0, 0), 1);
            b.write(ins(Opcode::Constant, kerr, 0, 0), 1);
            b.write(ins(Opcode::Throw, 0, 0, 0), 1);
            b.write(ins(Opcode::ExitTry, 0, 0, 0), 1);
            b.write(ins(Opcode::Move, 1, 1, 0), 1); // handler: error slot 1
            b.write(ins(Opcode::Return, 1, 0, 0), 1);
        },
        2,
        0,
    );
    let mut vm = Vm::new();
    let result = vm.run_chunk(chunk).unwrap();
    let handle = result.handle().unwrap();
    assert_eq!(vm.state.heap.str_value(handle), Some("boom"));
    assert!(!vm.state.had_uncaught_error);
}

#[test]
fn throw_unwinds_nested_call_frames() {
    let mut vm = Vm::new();

    // A method that throws a string.
    let throwing = build(
        |b| {
            let kerr = b.add_constant(Constant::Str("deep".to_string()));
            b.write(ins(Opcode::Constant, kerr, 0, 0), 1);
            b.write(ins(Opcode::Throw, 0, 0, 0), 1);
        },
        1,
        0,
    );
    let method = vm.state.add_method(Method::new(vec![], throwing));
    let mm = vm.state.declare_multimethod("explode");
    vm.state.define_method(mm, method);

    let chunk = build(
        |b| {
            b.write(ins(Opcode::EnterTry, 4, 0, 0), 1);
            b.write(ins(Opcode::Call, mm as u16, 2, 2), 1);
            b.write(ins(Opcode::ExitTry, 0, 0, 0), 1);
            b.write(ins(Opcode::Atom, Atom::True as u16, 1, 0), 1);
            b.write(ins(Opcode::Jump, 1, 2, 0), 1);
            b.write(ins(Opcode::Move, 1, 1, 0), 1); // handler: error slot 1
            b.write(ins(Opcode::Return, 1, 0, 0), 1);
            b.write(ins(Opcode::Return, 1, 0, 0), 1);
        },
        3,
        0,
    );
    let result = vm.run_chunk(chunk).unwrap();
    let handle = result.handle().unwrap();
    assert_eq!(vm.state.heap.str_value(handle), Some("deep"));
}

#[test]
fn uncaught_test_match_clears_the_fiber() {
    let chunk = build(
        |b| {
            b.write(ins(Opcode::TestMatch, 0, 0, 0), 1);
            b.write(ins(Opcode::Return, 0, 0, 0), 1);
        },
        1,
        0,
    );
    let mut vm = Vm::new();
    assert_eq!(vm.run_chunk(chunk), None);
    assert!(vm.state.had_uncaught_error);
}

#[test]
fn dispatch_picks_first_matching_method() {
    let mut vm = Vm::new();

    let returns = |n: i64| {
        build(
            |b| {
                let k = b.add_constant(Constant::Int(n));
                b.write(ins(Opcode::Constant, k, 0, 0), 1);
                b.write(ins(Opcode::Return, 0, 0, 0), 1);
            },
            1,
            0,
        )
    };

    let on_one = vm
        .state
        .add_method(Method::new(vec![Pattern::Int(1)], returns(10)));
    let on_any = vm
        .state
        .add_method(Method::new(vec![Pattern::Wildcard], returns(20)));
    let mm = vm.state.declare_multimethod("pick");
    vm.state.define_method(mm, on_one);
    vm.state.define_method(mm, on_any);

    let call_with = |vm: &mut Vm, arg: i64| {
        let chunk = build(
            |b| {
                let k = b.add_constant(Constant::Int(arg));
                b.write(ins(Opcode::Constant, k, 1, 0), 1);
                b.write(ins(Opcode::Call, mm as u16, 1, 0), 1);
                b.write(ins(Opcode::Return, 0, 0, 0), 1);
            },
            2,
            0,
        );
        vm.run_chunk(chunk)
    };

    assert_eq!(call_with(&mut vm, 1), Some(Value::Int(10)));
    assert_eq!(call_with(&mut vm, 5), Some(Value::Int(20)));
}

#[test]
fn dispatch_ties_break_by_insertion_order() {
    let mut vm = Vm::new();

    let returns = |n: i64| {
        build(
            |b| {
                let k = b.add_constant(Constant::Int(n));
                b.write(ins(Opcode::Constant, k, 0, 0), 1);
                b.write(ins(Opcode::Return, 0, 0, 0), 1);
            },
            1,
            0,
        )
    };

    let first = vm
        .state
        .add_method(Method::new(vec![Pattern::Wildcard], returns(1)));
    let second = vm
        .state
        .add_method(Method::new(vec![Pattern::Wildcard], returns(2)));
    let mm = vm.state.declare_multimethod("tie");
    vm.state.define_method(mm, first);
    vm.state.define_method(mm, second);

    let chunk = build(
        |b| {
            b.write(ins(Opcode::Atom, Atom::Nothing as u16, 1, 0), 1);
            b.write(ins(Opcode::Call, mm as u16, 1, 0), 1);
            b.write(ins(Opcode::Return, 0, 0, 0), 1);
        },
        2,
        0,
    );
    assert_eq!(vm.run_chunk(chunk), Some(Value::Int(1)));
}

#[test]
fn no_applicable_method_raises() {
    let mut vm = Vm::new();

    let body = build(
        |b| {
            b.write(ins(Opcode::Return, 0, 0, 0), 1);
        },
        1,
        0,
    );
    let only_ints = vm
        .state
        .add_method(Method::new(vec![Pattern::Int(7)], body));
    let mm = vm.state.declare_multimethod("narrow");
    vm.state.define_method(mm, only_ints);

    let chunk = build(
        |b| {
            let k = b.add_constant(Constant::Str("not seven".to_string()));
            b.write(ins(Opcode::Constant, k, 1, 0), 1);
            b.write(ins(Opcode::Call, mm as u16, 1, 0), 1);
            b.write(ins(Opcode::Return, 0, 0, 0), 1);
        },
        2,
        0,
    );
    assert_eq!(vm.run_chunk(chunk), None);
    assert!(vm.state.had_uncaught_error);
}

#[test]
fn call_return_register_plumbing() {
    // CALL from window k produces a frame at stack_start + k; RETURN r
    // lands in the register named by the call site's C field.
    let mut vm = Vm::new();

    let callee = build(
        |b| {
            let k = b.add_constant(Constant::Int(77));
            b.write(ins(Opcode::Constant, k, 1, 0), 1);
            b.write(ins(Opcode::Return, 1, 0, 0), 1);
        },
        2,
        0,
    );
    let method = vm.state.add_method(Method::new(vec![], callee));
    let mm = vm.state.declare_multimethod("deep");
    vm.state.define_method(mm, method);

    let chunk = build(
        |b| {
            let k = b.add_constant(Constant::Int(5));
            b.write(ins(Opcode::Constant, k, 0, 0), 1);
            b.write(ins(Opcode::Call, mm as u16, 3, 2), 1);
            // The callee must not disturb the caller's low registers.
            b.write(ins(Opcode::List, 0, 1, 1), 1);
            b.write(ins(Opcode::Return, 2, 0, 0), 1);
        },
        4,
        0,
    );
    assert_eq!(vm.run_chunk(chunk), Some(Value::Int(77)));
}

#[test]
fn class_and_is_test() {
    let mut vm = Vm::new();
    let base = vm.state.symbols.intern("Base");
    let derived = vm.state.symbols.intern("Derived");
    let other = vm.state.symbols.intern("Other");

    // Instantiates the class in args[0].
    fn native_new(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeOutcome {
        let class = args[0].handle().unwrap();
        let num_fields = ctx.state.heap.class(class).unwrap().num_fields as usize;
        let instance = ctx.state.heap.alloc(HeapObject::Instance {
            class,
            fields: vec![Value::nothing(); num_fields].into(),
        });
        NativeOutcome::Return(Value::Object(instance))
    }
    vm.state.natives.register("test.new", native_new);
    let new = vm.state.natives.find("test.new").unwrap() as u16;

    let chunk = build(
        |b| {
            b.write(ins(Opcode::Class, base.as_u32() as u16, 0, 0), 1);
            b.write(ins(Opcode::Move, 0, 0, 0), 1); // no superclasses
            b.write(ins(Opcode::Class, derived.as_u32() as u16, 0, 1), 2);
            b.write(ins(Opcode::Move, 0, 1, 0), 2); // super window: slot 0, count 1
            b.write(ins(Opcode::Class, other.as_u32() as u16, 0, 4), 3);
            b.write(ins(Opcode::Move, 0, 0, 0), 3);
            b.write(ins(Opcode::Move, 0, 2, 0), 4); // r2 = Base
            b.write(ins(Opcode::Move, 1, 0, 0), 4); // r0 = Derived
            b.write(ins(Opcode::Native, new, 0, 3), 4); // r3 = Derived instance
            b.write(ins(Opcode::Is, 3, 2, 5), 5); // instance is Base?
            b.write(ins(Opcode::Is, 3, 4, 6), 5); // instance is Other?
            b.write(ins(Opcode::List, 5, 2, 0), 5);
            b.write(ins(Opcode::Return, 0, 0, 0), 5);
        },
        7,
        0,
    );
    let result = vm.run_chunk(chunk).unwrap();
    let handle = result.handle().unwrap();
    match vm.state.heap.get(handle) {
        HeapObject::List(items) => {
            assert_eq!(
                items.as_slice(),
                &[Value::Atom(Atom::True), Value::Atom(Atom::False)]
            );
        }
        other => panic!("expected list, found {}", other.kind_name()),
    }
}

#[test]
fn is_with_non_class_operand_raises() {
    let chunk = build(
        |b| {
            let k = b.add_constant(Constant::Int(3));
            b.write(ins(Opcode::Constant, k, 0, 0), 1);
            b.write(ins(Opcode::Constant, k, 1, 0), 1);
            b.write(ins(Opcode::Is, 0, 1, 2), 1);
            b.write(ins(Opcode::Return, 2, 0, 0), 1);
        },
        3,
        0,
    );
    let mut vm = Vm::new();
    assert_eq!(vm.run_chunk(chunk), None);
    assert!(vm.state.had_uncaught_error);
}

#[test]
fn is_on_primitive_uses_core_classes() {
    let mut vm = Vm::new();

    // Pass the Int core class in as a module variable so the chunk can name
    // it without a class literal.
    let index = vm.state.add_module(magpie_vm::Module::new("m", None));
    let module = vm.state.module_mut(index).unwrap();
    let var = module.declare_variable("IntClass");
    let int_class = Value::Object(vm.state.core_class(CoreClass::Int));
    vm.state.module_mut(index).unwrap().set_variable(var, int_class);

    let chunk = build(
        |b| {
            let k = b.add_constant(Constant::Int(3));
            b.write(ins(Opcode::Constant, k, 0, 0), 1);
            b.write(ins(Opcode::GetVar, index as u16, var as u16, 1), 1);
            b.write(ins(Opcode::Is, 0, 1, 2), 1);
            b.write(ins(Opcode::Return, 2, 0, 0), 1);
        },
        3,
        0,
    );
    assert_eq!(vm.run_chunk(chunk), Some(Value::Atom(Atom::True)));
}

#[test]
fn native_throw_disposition_is_catchable() {
    let mut vm = Vm::new();
    vm.state.natives.register("test.fail", |ctx, _| {
        let error = ctx.state.make_error(CoreClass::OverflowError);
        NativeOutcome::Throw(error)
    });
    let fail = vm.state.natives.find("test.fail").unwrap() as u16;

    let chunk = build(
        |b| {
            b.write(ins(Opcode::EnterTry, 2, 0, 0), 1);
            b.write(ins(Opcode::Native, fail, 0, 0), 1);
            b.write(ins(Opcode::ExitTry, 0, 0, 0), 1);
            b.write(ins(Opcode::Move, 0, 0, 0), 1); // handler: error slot 0
            b.write(ins(Opcode::Return, 0, 0, 0), 1);
        },
        1,
        0,
    );
    let result = vm.run_chunk(chunk).unwrap();
    let class = vm.state.class_of(result);
    assert_eq!(class, vm.state.core_class(CoreClass::OverflowError));
}

#[test]
fn get_class_field_reads_generated_getter_layout() {
    let mut vm = Vm::new();
    let point = vm.state.symbols.intern("Point");

    fn native_new(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeOutcome {
        let class = args[0].handle().unwrap();
        let instance = ctx.state.heap.alloc(HeapObject::Instance {
            class,
            fields: vec![Value::Int(11), Value::Int(22)].into(),
        });
        NativeOutcome::Return(Value::Object(instance))
    }
    vm.state.natives.register("test.new2", native_new);
    let new = vm.state.natives.find("test.new2").unwrap() as u16;

    let chunk = build(
        |b| {
            b.write(ins(Opcode::Class, point.as_u32() as u16, 2, 0), 1);
            b.write(ins(Opcode::Move, 0, 0, 0), 1);
            b.write(ins(Opcode::Native, new, 0, 0), 1); // r0 = instance
            b.write(ins(Opcode::GetClassField, 1, 0, 0), 2); // r1 = field 1
            b.write(ins(Opcode::SetClassField, 0, 0, 0), 3); // field 0 = r1; r2 = r1
            b.write(ins(Opcode::GetClassField, 0, 0, 0), 4); // r1 = field 0
            b.write(ins(Opcode::Return, 1, 0, 0), 4);
        },
        3,
        0,
    );
    // Field 1 (22) was read, written into field 0, and read back.
    assert_eq!(vm.run_chunk(chunk), Some(Value::Int(22)));
}
