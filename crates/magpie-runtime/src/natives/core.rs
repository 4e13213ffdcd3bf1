//! Core natives: printing, arithmetic, strings, lists, channels, fibers.
//!
//! Arithmetic is checked: integer overflow (and division by zero) raises
//! `OverflowError`. Mixed int/float operands coerce to float, which then
//! follows IEEE-754.

use std::time::Duration;

use magpie_vm::{
    ChannelObject, CoreClass, HeapObject, NativeCtx, NativeOutcome, NativeRegistry,
    ReceiveOutcome, SendOutcome, Value,
};

pub fn register(registry: &mut NativeRegistry) {
    registry.register("core.print", native_print);
    registry.register("core.show", native_show);
    registry.register("core.apply", native_apply);

    registry.register("core.add", native_add);
    registry.register("core.sub", native_sub);
    registry.register("core.mul", native_mul);
    registry.register("core.div", native_div);
    registry.register("core.mod", native_mod);
    registry.register("core.neg", native_neg);
    registry.register("core.less", native_less);
    registry.register("core.lessEq", native_less_eq);
    registry.register("core.greater", native_greater);
    registry.register("core.greaterEq", native_greater_eq);

    registry.register("core.strConcat", native_str_concat);
    registry.register("core.strCount", native_str_count);
    registry.register("core.strSubstring", native_str_substring);
    registry.register("core.strIndex", native_str_index);
    registry.register("core.strReplace", native_str_replace);

    registry.register("core.listAdd", native_list_add);
    registry.register("core.listCount", native_list_count);
    registry.register("core.listGet", native_list_get);
    registry.register("core.listSet", native_list_set);
    registry.register("core.listInsert", native_list_insert);

    registry.register("core.newChannel", native_new_channel);
    registry.register("core.channelSend", native_channel_send);
    registry.register("core.channelReceive", native_channel_receive);
    registry.register("core.sleep", native_sleep);
}

#[inline]
fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).copied().unwrap_or(Value::nothing())
}

fn no_match(ctx: &mut NativeCtx<'_>) -> NativeOutcome {
    let error = ctx.state.make_error(CoreClass::NoMatchError);
    NativeOutcome::Throw(error)
}

fn overflow(ctx: &mut NativeCtx<'_>) -> NativeOutcome {
    let error = ctx.state.make_error(CoreClass::OverflowError);
    NativeOutcome::Throw(error)
}

fn str_arg(ctx: &NativeCtx<'_>, args: &[Value], index: usize) -> Option<String> {
    arg(args, index)
        .handle()
        .and_then(|handle| ctx.state.heap.str_value(handle))
        .map(str::to_string)
}

fn alloc_str(ctx: &mut NativeCtx<'_>, text: String) -> NativeOutcome {
    let handle = ctx.state.heap.alloc(HeapObject::Str(text));
    NativeOutcome::Return(Value::Object(handle))
}

// === Printing ===

fn native_print(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeOutcome {
    let line = ctx.state.show(arg(args, 0));
    ctx.state.output.write_line(&line);
    NativeOutcome::Return(Value::nothing())
}

fn native_show(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeOutcome {
    let shown = ctx.state.show(arg(args, 0));
    alloc_str(ctx, shown)
}

/// Higher-order call: `args[0]` is the callable, the rest its window.
fn native_apply(_ctx: &mut NativeCtx<'_>, _args: &[Value]) -> NativeOutcome {
    NativeOutcome::TailCall
}

// === Arithmetic ===

enum Numeric {
    Ints(i64, i64),
    Floats(f64, f64),
}

fn numeric_pair(a: Value, b: Value) -> Option<Numeric> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(Numeric::Ints(x, y)),
        (Value::Float(x), Value::Float(y)) => Some(Numeric::Floats(x, y)),
        (Value::Int(x), Value::Float(y)) => Some(Numeric::Floats(x as f64, y)),
        (Value::Float(x), Value::Int(y)) => Some(Numeric::Floats(x, y as f64)),
        _ => None,
    }
}

fn arith(
    ctx: &mut NativeCtx<'_>,
    args: &[Value],
    ints: fn(i64, i64) -> Option<i64>,
    floats: fn(f64, f64) -> f64,
) -> NativeOutcome {
    match numeric_pair(arg(args, 0), arg(args, 1)) {
        Some(Numeric::Ints(x, y)) => match ints(x, y) {
            Some(result) => NativeOutcome::Return(Value::Int(result)),
            None => overflow(ctx),
        },
        Some(Numeric::Floats(x, y)) => NativeOutcome::Return(Value::Float(floats(x, y))),
        None => no_match(ctx),
    }
}

fn compare(
    ctx: &mut NativeCtx<'_>,
    args: &[Value],
    ints: fn(&i64, &i64) -> bool,
    floats: fn(&f64, &f64) -> bool,
) -> NativeOutcome {
    match numeric_pair(arg(args, 0), arg(args, 1)) {
        Some(Numeric::Ints(x, y)) => NativeOutcome::Return(Value::bool(ints(&x, &y))),
        Some(Numeric::Floats(x, y)) => NativeOutcome::Return(Value::bool(floats(&x, &y))),
        None => no_match(ctx),
    }
}

fn native_add(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeOutcome {
    arith(ctx, args, i64::checked_add, |x, y| x + y)
}

fn native_sub(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeOutcome {
    arith(ctx, args, i64::checked_sub, |x, y| x - y)
}

fn native_mul(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeOutcome {
    arith(ctx, args, i64::checked_mul, |x, y| x * y)
}

fn native_div(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeOutcome {
    arith(ctx, args, i64::checked_div, |x, y| x / y)
}

fn native_mod(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeOutcome {
    arith(ctx, args, i64::checked_rem, |x, y| x % y)
}

fn native_neg(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeOutcome {
    match arg(args, 0) {
        Value::Int(x) => match x.checked_neg() {
            Some(result) => NativeOutcome::Return(Value::Int(result)),
            None => overflow(ctx),
        },
        Value::Float(x) => NativeOutcome::Return(Value::Float(-x)),
        _ => no_match(ctx),
    }
}

fn native_less(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeOutcome {
    compare(ctx, args, i64::lt, f64::lt)
}

fn native_less_eq(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeOutcome {
    compare(ctx, args, i64::le, f64::le)
}

fn native_greater(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeOutcome {
    compare(ctx, args, i64::gt, f64::gt)
}

fn native_greater_eq(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeOutcome {
    compare(ctx, args, i64::ge, f64::ge)
}

// === Strings ===

fn native_str_concat(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeOutcome {
    let (Some(mut left), Some(right)) = (str_arg(ctx, args, 0), str_arg(ctx, args, 1)) else {
        return no_match(ctx);
    };
    left.push_str(&right);
    alloc_str(ctx, left)
}

fn native_str_count(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeOutcome {
    match str_arg(ctx, args, 0) {
        Some(s) => NativeOutcome::Return(Value::Int(s.len() as i64)),
        None => no_match(ctx),
    }
}

/// Half-open `[start, end)` byte substring.
fn native_str_substring(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeOutcome {
    let Some(s) = str_arg(ctx, args, 0) else {
        return no_match(ctx);
    };
    let (Value::Int(start), Value::Int(end)) = (arg(args, 1), arg(args, 2)) else {
        return no_match(ctx);
    };
    if start < 0 || end < start || end as usize > s.len() {
        return no_match(ctx);
    }
    let text = String::from_utf8_lossy(&s.as_bytes()[start as usize..end as usize]).into_owned();
    alloc_str(ctx, text)
}

/// Byte subscript, returned as a character.
fn native_str_index(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeOutcome {
    let Some(s) = str_arg(ctx, args, 0) else {
        return no_match(ctx);
    };
    let Value::Int(index) = arg(args, 1) else {
        return no_match(ctx);
    };
    match usize::try_from(index).ok().and_then(|i| s.as_bytes().get(i)) {
        Some(&byte) => NativeOutcome::Return(Value::Char(byte as char)),
        None => no_match(ctx),
    }
}

fn native_str_replace(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeOutcome {
    let Some(s) = str_arg(ctx, args, 0) else {
        return no_match(ctx);
    };
    let (Value::Char(from), Value::Char(to)) = (arg(args, 1), arg(args, 2)) else {
        return no_match(ctx);
    };
    let replaced = s.replace(from, &to.to_string());
    alloc_str(ctx, replaced)
}

// === Lists ===

fn list_handle(ctx: &NativeCtx<'_>, args: &[Value]) -> Option<magpie_vm::Handle> {
    arg(args, 0)
        .handle()
        .filter(|&handle| matches!(ctx.state.heap.get(handle), HeapObject::List(_)))
}

fn native_list_add(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeOutcome {
    let Some(handle) = list_handle(ctx, args) else {
        return no_match(ctx);
    };
    let value = arg(args, 1);
    if let HeapObject::List(items) = ctx.state.heap.get_mut(handle) {
        items.push(value);
    }
    NativeOutcome::Return(Value::Object(handle))
}

fn native_list_count(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeOutcome {
    let Some(handle) = list_handle(ctx, args) else {
        return no_match(ctx);
    };
    let count = match ctx.state.heap.get(handle) {
        HeapObject::List(items) => items.len() as i64,
        _ => 0,
    };
    NativeOutcome::Return(Value::Int(count))
}

fn native_list_get(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeOutcome {
    let Some(handle) = list_handle(ctx, args) else {
        return no_match(ctx);
    };
    let Value::Int(index) = arg(args, 1) else {
        return no_match(ctx);
    };
    let value = match ctx.state.heap.get(handle) {
        HeapObject::List(items) => usize::try_from(index)
            .ok()
            .and_then(|i| items.get(i))
            .copied(),
        _ => None,
    };
    match value {
        Some(value) => NativeOutcome::Return(value),
        None => no_match(ctx),
    }
}

fn native_list_set(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeOutcome {
    let Some(handle) = list_handle(ctx, args) else {
        return no_match(ctx);
    };
    let Value::Int(index) = arg(args, 1) else {
        return no_match(ctx);
    };
    let value = arg(args, 2);
    let stored = match ctx.state.heap.get_mut(handle) {
        HeapObject::List(items) => usize::try_from(index)
            .ok()
            .and_then(|i| items.get_mut(i))
            .map(|slot| *slot = value)
            .is_some(),
        _ => false,
    };
    if stored {
        NativeOutcome::Return(value)
    } else {
        no_match(ctx)
    }
}

fn native_list_insert(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeOutcome {
    let Some(handle) = list_handle(ctx, args) else {
        return no_match(ctx);
    };
    let Value::Int(index) = arg(args, 1) else {
        return no_match(ctx);
    };
    let value = arg(args, 2);
    let inserted = match ctx.state.heap.get_mut(handle) {
        HeapObject::List(items) => match usize::try_from(index) {
            Ok(i) if i <= items.len() => {
                items.insert(i, value);
                true
            }
            _ => false,
        },
        _ => false,
    };
    if inserted {
        NativeOutcome::Return(value)
    } else {
        no_match(ctx)
    }
}

// === Channels and time ===

fn native_new_channel(ctx: &mut NativeCtx<'_>, _args: &[Value]) -> NativeOutcome {
    let handle = ctx
        .state
        .heap
        .alloc(HeapObject::Channel(ChannelObject::default()));
    NativeOutcome::Return(Value::Object(handle))
}

fn channel_handle(ctx: &NativeCtx<'_>, args: &[Value]) -> Option<magpie_vm::Handle> {
    arg(args, 0)
        .handle()
        .filter(|&handle| matches!(ctx.state.heap.get(handle), HeapObject::Channel(_)))
}

fn native_channel_send(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeOutcome {
    let Some(channel) = channel_handle(ctx, args) else {
        return no_match(ctx);
    };
    let value = arg(args, 1);
    match ctx
        .scheduler
        .channel_send(&mut ctx.state.heap, channel, value, ctx.fiber)
    {
        SendOutcome::Delivered => NativeOutcome::Return(Value::nothing()),
        SendOutcome::Parked => NativeOutcome::Suspend,
    }
}

fn native_channel_receive(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeOutcome {
    let Some(channel) = channel_handle(ctx, args) else {
        return no_match(ctx);
    };
    match ctx
        .scheduler
        .channel_receive(&mut ctx.state.heap, channel, ctx.fiber)
    {
        ReceiveOutcome::Received(value) => NativeOutcome::Return(value),
        ReceiveOutcome::Parked => NativeOutcome::Suspend,
    }
}

fn native_sleep(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeOutcome {
    let Value::Int(ms) = arg(args, 0) else {
        return no_match(ctx);
    };
    let duration = Duration::from_millis(ms.max(0) as u64);
    ctx.scheduler.sleep(ctx.fiber, duration);
    NativeOutcome::Suspend
}
