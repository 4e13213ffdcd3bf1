//! File natives (`io.*`).

use std::fs;

use magpie_vm::{HeapObject, NativeCtx, NativeOutcome, NativeRegistry, Value};

pub fn register(registry: &mut NativeRegistry) {
    registry.register("io.readFile", native_read_file);
}

/// Reads a file into a string; `nothing` when the file cannot be read.
fn native_read_file(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeOutcome {
    let path = args
        .first()
        .and_then(|value| value.handle())
        .and_then(|handle| ctx.state.heap.str_value(handle))
        .map(str::to_string);
    let Some(path) = path else {
        return NativeOutcome::Return(Value::nothing());
    };

    match fs::read_to_string(&path) {
        Ok(text) => {
            let handle = ctx.state.heap.alloc(HeapObject::Str(text));
            NativeOutcome::Return(Value::Object(handle))
        }
        Err(_) => NativeOutcome::Return(Value::nothing()),
    }
}
