//! Root scanning for collection.
//!
//! A collection may only run while every fiber is parked in the scheduler.
//! The root pass rewrites, in place, every handle reachable from the VM:
//! module variables, method tables, core classes, the error channel, and
//! each live fiber's active register prefix. Dead trailing stack slots are
//! null-cleared here; they may hold stale handles from earlier, deeper
//! calls.

use crate::fiber::{Fiber, FiberState};
use crate::gc::Heap;
use crate::multimethod::Pattern;
use crate::scheduler::Scheduler;
use crate::value::Value;
use crate::vm::VmState;

/// Runs a full collection: swap spaces, forward all roots, Cheney-scan.
pub fn collect(state: &mut VmState, scheduler: &mut Scheduler) {
    state.heap.begin_collect();

    let VmState {
        heap,
        modules,
        methods,
        core_classes,
        error_channel,
        ..
    } = state;

    for module in modules.values_mut() {
        for value in module.variables_mut().flatten() {
            heap.forward_value(value);
        }
    }

    for method in methods.iter_mut() {
        if let Some(function) = &mut method.function {
            heap.forward_handle(function);
        }
        for pattern in &mut method.patterns {
            forward_pattern(heap, pattern);
        }
    }

    for class in core_classes.iter_mut() {
        heap.forward_handle(class);
    }

    if let Some(channel) = error_channel {
        heap.forward_handle(channel);
    }

    for fiber in scheduler.live_fibers_mut() {
        forward_fiber(heap, fiber);
    }

    state.heap.finish_collect();
}

fn forward_pattern(heap: &mut Heap, pattern: &mut Pattern) {
    match pattern {
        Pattern::Class(class) => heap.forward_handle(class),
        Pattern::Record(fields) => {
            for (_, sub) in fields.iter_mut() {
                forward_pattern(heap, sub);
            }
        }
        _ => {}
    }
}

fn forward_fiber(heap: &mut Heap, fiber: &mut Fiber) {
    let active = fiber.num_active_slots();
    for value in &mut fiber.stack[..active] {
        heap.forward_value(value);
    }
    // Slots past the active bound are dead; clear them so stale handles from
    // popped frames cannot survive into the next cycle.
    for value in &mut fiber.stack[active..] {
        *value = Value::nothing();
    }

    for frame in &mut fiber.frames {
        heap.forward_handle(&mut frame.function);
    }

    if let Some(value) = &mut fiber.sending {
        heap.forward_value(value);
    }

    match &mut fiber.state {
        FiberState::WaitingSend(channel) | FiberState::WaitingReceive(channel) => {
            heap.forward_handle(channel);
        }
        _ => {}
    }
}
