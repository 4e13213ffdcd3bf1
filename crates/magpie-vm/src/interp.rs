//! The bytecode interpreter.
//!
//! Runs one fiber until it completes, suspends in a native, hits the GC
//! threshold, or unwinds past its last catch frame. The checkpoint before
//! each instruction keeps every live reference rooted when a collection is
//! requested: the loop simply returns and the scheduler re-enters it on the
//! same fiber after collecting.

use std::rc::Rc;

use magpie_common::SymbolId;

use crate::chunk::{Chunk, Constant};
use crate::fiber::{CatchFrame, Fiber};
use crate::gc::Handle;
use crate::instruction::Opcode;
use crate::native::{NativeCtx, NativeOutcome};
use crate::object::{ClassObject, FunctionObject, HeapObject};
use crate::scheduler::Scheduler;
use crate::value::{Atom, Value};
use crate::vm::{CoreClass, VmState};

/// Why the dispatch loop stopped.
#[derive(Debug)]
pub enum FiberResult {
    /// The call stack emptied; the fiber's result value.
    Done(Value),
    /// A native parked the fiber.
    Suspend,
    /// The GC threshold was crossed at a checkpoint; collect and re-enter.
    DidGc,
    /// An exception unwound past the last catch frame. The error has
    /// already been delivered and the call stack cleared.
    UncaughtError,
}

/// Runs `fiber` to its next yield point.
pub fn run(state: &mut VmState, scheduler: &mut Scheduler, fiber: &mut Fiber) -> FiberResult {
    // Raising is always `throw`, then either re-enter the outer loop with
    // the unwound frame or finish the fiber.
    macro_rules! throw_value {
        ($label:lifetime, $error:expr) => {{
            if throw(state, scheduler, fiber, $error) {
                continue $label;
            }
            return FiberResult::UncaughtError
        }};
    }
    macro_rules! raise {
        ($label:lifetime, $kind:expr) => {{
            let error = state.make_error($kind);
            throw_value!($label, error)
        }};
    }

    'frames: loop {
        let Some(top) = fiber.frames.last() else {
            return FiberResult::Done(Value::nothing());
        };
        let chunk: Rc<Chunk> = state.heap.function(top.function).chunk.clone();

        loop {
            // GC checkpoint: the fiber's state is a valid root set right now.
            if state.heap.should_collect() {
                return FiberResult::DidGc;
            }

            let frame = *fiber.frames.last().expect("no active frame");
            let ins = chunk.code()[frame.pc];
            fiber.frames.last_mut().expect("no active frame").pc = frame.pc + 1;

            match ins.opcode() {
                Opcode::Move => {
                    let value = fiber.load(&frame, ins.a);
                    fiber.store(&frame, ins.b, value);
                }

                Opcode::Constant => {
                    let value = match chunk.constant(ins.a as usize) {
                        Constant::Int(n) => Value::Int(*n),
                        Constant::Float(n) => Value::Float(*n),
                        Constant::Char(c) => Value::Char(*c),
                        Constant::Str(s) => {
                            let s = s.clone();
                            Value::Object(state.heap.alloc(HeapObject::Str(s)))
                        }
                    };
                    fiber.store(&frame, ins.b, value);
                }

                Opcode::Atom => {
                    let atom = Atom::try_from(ins.a as u8).unwrap_or(Atom::Nothing);
                    fiber.store(&frame, ins.b, Value::Atom(atom));
                }

                Opcode::Method => {
                    state.define_method(ins.a as u32, ins.b as u32);
                }

                Opcode::Record => {
                    let type_id = ins.b as u32;
                    let Some(num_fields) =
                        state.get_record_type(type_id).map(|t| t.num_fields())
                    else {
                        raise!('frames, CoreClass::NoMatchError)
                    };
                    let start = frame.stack_start + ins.a as usize;
                    let Some(fields) = fiber.stack.get(start..start + num_fields) else {
                        raise!('frames, CoreClass::NoMatchError)
                    };
                    let fields: Box<[Value]> = fields.into();
                    let record = state.heap.alloc(HeapObject::Record { type_id, fields });
                    fiber.store(&frame, ins.c, Value::Object(record));
                }

                Opcode::List => {
                    let start = frame.stack_start + ins.a as usize;
                    let elements = fiber.stack[start..start + ins.b as usize].to_vec();
                    let list = state.heap.alloc(HeapObject::List(elements));
                    fiber.store(&frame, ins.c, Value::Object(list));
                }

                Opcode::Function => {
                    let function = load_function(state, fiber, &chunk, ins.a as usize);
                    fiber.store(&frame, ins.b, Value::Object(function));
                }

                Opcode::Async => {
                    let function = load_function(state, fiber, &chunk, ins.a as usize);
                    scheduler.spawn(&state.heap, function);
                }

                Opcode::Class => {
                    // A class definition is two words; the second names the
                    // superclass window.
                    let word = chunk.code()[frame.pc + 1];
                    fiber.frames.last_mut().expect("no active frame").pc = frame.pc + 2;

                    let first = frame.stack_start + word.a as usize;
                    let mut supers = Vec::with_capacity(word.b as usize);
                    let mut bad_super = false;
                    for i in 0..word.b as usize {
                        match fiber.stack[first + i]
                            .handle()
                            .filter(|&h| state.heap.class(h).is_some())
                        {
                            Some(handle) => supers.push(handle),
                            None => {
                                bad_super = true;
                                break;
                            }
                        }
                    }
                    if bad_super {
                        raise!('frames, CoreClass::NoMatchError)
                    }

                    let class = make_class(
                        state,
                        SymbolId::from_raw(ins.a as u32),
                        ins.b,
                        supers,
                    );
                    fiber.store(&frame, ins.c, Value::Object(class));
                }

                Opcode::GetField => {
                    match record_field(state, fiber.load(&frame, ins.a), ins.b) {
                        Some(value) => fiber.store(&frame, ins.c, value),
                        None => raise!('frames, CoreClass::NoMatchError),
                    }
                }

                Opcode::TestField => {
                    // The following word is a Jump-shaped pseudo-op taken
                    // when the field is absent.
                    let jump = chunk.code()[frame.pc + 1];
                    fiber.frames.last_mut().expect("no active frame").pc = frame.pc + 2;

                    match record_field(state, fiber.load(&frame, ins.a), ins.b) {
                        Some(value) => fiber.store(&frame, ins.c, value),
                        None => {
                            fiber.frames.last_mut().expect("no active frame").pc +=
                                jump.b as usize;
                        }
                    }
                }

                Opcode::GetClassField => {
                    // Generated getters fix the slot layout: receiver in 0,
                    // result in 1.
                    let field = match fiber.load(&frame, 0).handle().map(|h| state.heap.get(h))
                    {
                        Some(HeapObject::Instance { fields, .. }) => {
                            fields.get(ins.a as usize).copied()
                        }
                        _ => None,
                    };
                    match field {
                        Some(value) => fiber.store(&frame, 1, value),
                        None => raise!('frames, CoreClass::NoMatchError),
                    }
                }

                Opcode::SetClassField => {
                    let value = fiber.load(&frame, 1);
                    let stored = match fiber
                        .load(&frame, 0)
                        .handle()
                        .map(|h| state.heap.get_mut(h))
                    {
                        Some(HeapObject::Instance { fields, .. }) => {
                            match fields.get_mut(ins.a as usize) {
                                Some(slot) => {
                                    *slot = value;
                                    true
                                }
                                None => false,
                            }
                        }
                        _ => false,
                    };
                    if !stored {
                        raise!('frames, CoreClass::NoMatchError)
                    }
                    fiber.store(&frame, 2, value);
                }

                Opcode::GetVar => {
                    let value = state
                        .module(ins.a as usize)
                        .and_then(|module| module.get_variable(ins.b as usize));
                    match value {
                        Some(value) => fiber.store(&frame, ins.c, value),
                        None => raise!('frames, CoreClass::UndefinedVarError),
                    }
                }

                Opcode::SetVar => {
                    let value = fiber.load(&frame, ins.c);
                    if let Some(module) = state.module_mut(ins.a as usize) {
                        module.set_variable(ins.b as usize, value);
                    }
                }

                Opcode::GetUpvar => {
                    let cell = state
                        .heap
                        .function(frame.function)
                        .upvars
                        .get(ins.a as usize)
                        .copied()
                        .flatten();
                    match cell {
                        Some(cell) => {
                            let value = state.heap.upvar(cell);
                            fiber.store(&frame, ins.b, value);
                        }
                        None => raise!('frames, CoreClass::UndefinedVarError),
                    }
                }

                Opcode::SetUpvar => {
                    let cell = if ins.c == 1 {
                        fresh_upvar(state, frame.function, ins.a as usize)
                    } else {
                        let existing = state
                            .heap
                            .function(frame.function)
                            .upvars
                            .get(ins.a as usize)
                            .copied()
                            .flatten();
                        match existing {
                            Some(cell) => cell,
                            None => fresh_upvar(state, frame.function, ins.a as usize),
                        }
                    };
                    let value = fiber.load(&frame, ins.b);
                    state.heap.set_upvar(cell, value);
                }

                Opcode::Equal => {
                    let a = fiber.load(&frame, ins.a);
                    let b = fiber.load(&frame, ins.b);
                    fiber.store(&frame, ins.c, Value::bool(state.values_equal(a, b)));
                }

                Opcode::Not => {
                    let value = fiber.load(&frame, ins.a);
                    fiber.store(&frame, ins.a, Value::bool(!value.truthy()));
                }

                Opcode::Is => {
                    let expected = fiber
                        .load(&frame, ins.b)
                        .handle()
                        .filter(|&h| state.heap.class(h).is_some());
                    let Some(expected) = expected else {
                        raise!('frames, CoreClass::NoMatchError)
                    };
                    let class = state.class_of(fiber.load(&frame, ins.a));
                    let result = state
                        .heap
                        .class(class)
                        .is_some_and(|c| c.linearization.contains(&expected));
                    fiber.store(&frame, ins.c, Value::bool(result));
                }

                Opcode::Jump => {
                    let top = fiber.frames.last_mut().expect("no active frame");
                    if ins.a == 1 {
                        top.pc += ins.b as usize;
                    } else {
                        top.pc -= ins.b as usize;
                    }
                }

                Opcode::JumpIfFalse => {
                    if !fiber.load(&frame, ins.a).truthy() {
                        fiber.frames.last_mut().expect("no active frame").pc += ins.b as usize;
                    }
                }

                Opcode::JumpIfTrue => {
                    if fiber.load(&frame, ins.a).truthy() {
                        fiber.frames.last_mut().expect("no active frame").pc += ins.b as usize;
                    }
                }

                Opcode::Call => {
                    let window = frame.stack_start + ins.b as usize;
                    let selected = state.select_method(ins.a as u32, &fiber.stack[window..]);
                    let Some(method) = selected else {
                        raise!('frames, CoreClass::NoMethodError)
                    };
                    let function = state.method_function(method);
                    let num_slots = state.heap.function(function).chunk.num_slots();
                    fiber.call(function, num_slots, window);
                    continue 'frames;
                }

                Opcode::Native => {
                    let Some(native) = state.natives.get(ins.a as u32) else {
                        raise!('frames, CoreClass::NoMethodError)
                    };
                    let start = frame.stack_start;
                    let args = fiber.stack[start..start + frame.num_slots].to_vec();
                    let outcome = {
                        let mut ctx = NativeCtx {
                            state: &mut *state,
                            scheduler: &mut *scheduler,
                            fiber: &mut *fiber,
                        };
                        native(&mut ctx, &args)
                    };
                    match outcome {
                        NativeOutcome::Return(value) => fiber.store(&frame, ins.c, value),
                        NativeOutcome::Throw(error) => throw_value!('frames, error),
                        NativeOutcome::TailCall => {
                            // args[0] is the callable; the window that
                            // follows it becomes the callee's frame.
                            let window = start + 1;
                            match args.first().copied() {
                                Some(Value::Object(h))
                                    if matches!(
                                        state.heap.get(h),
                                        HeapObject::Function(_)
                                    ) =>
                                {
                                    let num_slots =
                                        state.heap.function(h).chunk.num_slots();
                                    fiber.call(h, num_slots, window);
                                    continue 'frames;
                                }
                                Some(Value::Multimethod(mm)) => {
                                    let selected =
                                        state.select_method(mm, &fiber.stack[window..]);
                                    let Some(method) = selected else {
                                        raise!('frames, CoreClass::NoMethodError)
                                    };
                                    let function = state.method_function(method);
                                    let num_slots =
                                        state.heap.function(function).chunk.num_slots();
                                    fiber.call(function, num_slots, window);
                                    continue 'frames;
                                }
                                _ => raise!('frames, CoreClass::NoMethodError),
                            }
                        }
                        NativeOutcome::Suspend => return FiberResult::Suspend,
                    }
                }

                Opcode::Return => {
                    let value = fiber.load(&frame, ins.a);
                    fiber.frames.pop();
                    // Discard try blocks owned by the popped frame.
                    while fiber
                        .catches
                        .last()
                        .is_some_and(|c| c.frame_index >= fiber.frames.len())
                    {
                        fiber.catches.pop();
                    }
                    if fiber.frames.is_empty() {
                        return FiberResult::Done(value);
                    }
                    fiber.store_return(&state.heap, value);
                    continue 'frames;
                }

                Opcode::Throw => {
                    let error = fiber.load(&frame, ins.a);
                    throw_value!('frames, error)
                }

                Opcode::EnterTry => {
                    fiber.catches.push(CatchFrame {
                        frame_index: fiber.frames.len() - 1,
                        handler_pc: frame.pc + 1 + ins.a as usize,
                    });
                }

                Opcode::ExitTry => {
                    fiber.catches.pop();
                }

                Opcode::TestMatch => {
                    if !fiber.load(&frame, ins.a).truthy() {
                        raise!('frames, CoreClass::NoMatchError)
                    }
                }

                Opcode::Invalid => unreachable!("chunk validated on construction"),
            }
        }
    }
}

/// Unwinds to the innermost catch frame, storing the error in the slot the
/// handler's leading Move-shaped word names. Returns false when nothing
/// catches: the error is delivered, a stack trace printed, and the fiber's
/// call stack cleared.
fn throw(
    state: &mut VmState,
    scheduler: &mut Scheduler,
    fiber: &mut Fiber,
    error: Value,
) -> bool {
    let Some(catch) = fiber.catches.pop() else {
        fiber.print_stack_trace(&state.heap);
        let id = fiber.id;
        state.report_uncaught(scheduler, id, error);
        fiber.frames.clear();
        return false;
    };

    // Unwind nested call frames above the one containing the handler.
    fiber.frames.truncate(catch.frame_index + 1);
    let index = fiber.frames.len() - 1;
    let function = fiber.frames[index].function;
    let chunk = state.heap.function(function).chunk.clone();

    let word = chunk.code()[catch.handler_pc];
    debug_assert_eq!(
        word.opcode(),
        Opcode::Move,
        "catch handler must start with its error-slot word"
    );
    fiber.frames[index].pc = catch.handler_pc + 1;
    let frame = fiber.frames[index];
    fiber.store(&frame, word.a, error);
    true
}

/// Materializes a closure from a nested chunk, consuming the capture
/// pseudo-instructions that follow the `Function`/`Async` word. A capture
/// word with `c == 1` creates a fresh cell shared with the enclosing
/// function; otherwise the enclosing function's existing cell is reused.
fn load_function(
    state: &mut VmState,
    fiber: &mut Fiber,
    chunk: &Rc<Chunk>,
    index: usize,
) -> Handle {
    let nested = chunk.nested(index).clone();
    let num_upvars = nested.num_upvars();
    let mut function = FunctionObject::new(nested);
    let enclosing = fiber.frames.last().expect("no active frame").function;

    for i in 0..num_upvars {
        let pc = fiber.frames.last().expect("no active frame").pc;
        let capture = chunk.code()[pc];
        fiber.frames.last_mut().expect("no active frame").pc = pc + 1;

        let slot = capture.a as usize;
        let cell = if capture.c == 1 {
            fresh_upvar(state, enclosing, slot)
        } else {
            let existing = state
                .heap
                .function(enclosing)
                .upvars
                .get(slot)
                .copied()
                .flatten();
            match existing {
                Some(cell) => cell,
                None => fresh_upvar(state, enclosing, slot),
            }
        };
        function.upvars[i] = Some(cell);
    }

    state.heap.alloc(HeapObject::Function(function))
}

/// Creates an empty upvar cell and installs it in a function's slot.
fn fresh_upvar(state: &mut VmState, function: Handle, slot: usize) -> Handle {
    let cell = state.heap.alloc(HeapObject::Upvar(Value::nothing()));
    let upvars = &mut state.heap.function_mut(function).upvars;
    if slot >= upvars.len() {
        upvars.resize(slot + 1, None);
    }
    upvars[slot] = Some(cell);
    cell
}

/// Builds a class object with its linearization: the class itself followed
/// by its superclasses' linearizations, deduplicated.
fn make_class(
    state: &mut VmState,
    name: SymbolId,
    num_fields: u16,
    supers: Vec<Handle>,
) -> Handle {
    let class = state.heap.alloc(HeapObject::Class(ClassObject {
        name,
        num_fields,
        supers: supers.clone(),
        linearization: Vec::new(),
    }));

    let mut linearization = vec![class];
    for superclass in supers {
        let entries = match state.heap.class(superclass) {
            Some(c) => c.linearization.clone(),
            None => continue,
        };
        for entry in entries {
            if !linearization.contains(&entry) {
                linearization.push(entry);
            }
        }
    }
    match state.heap.get_mut(class) {
        HeapObject::Class(c) => c.linearization = linearization,
        _ => unreachable!(),
    }
    class
}

/// Looks up a record field by symbol id.
fn record_field(state: &VmState, value: Value, symbol: u16) -> Option<Value> {
    let handle = value.handle()?;
    let HeapObject::Record { type_id, fields } = state.heap.get(handle) else {
        return None;
    };
    let index = state
        .record_type(*type_id)
        .field_index(SymbolId::from_raw(symbol as u32))?;
    fields.get(index).copied()
}
