//! The cooperative fiber scheduler.
//!
//! Single-threaded: at most one fiber runs at a time. The scheduler owns
//! every fiber, keeps a FIFO ready queue and a deadline-ordered wheel of
//! sleepers, drives the interpreter, and performs channel rendezvous. It is
//! deliberately separate from `VmState` so the interpreter can borrow both
//! at once.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::thread;
use std::time::{Duration, Instant};

use crate::fiber::{Fiber, FiberId, FiberState};
use crate::gc::{Handle, Heap};
use crate::gc_roots;
use crate::interp::{self, FiberResult};
use crate::value::Value;
use crate::vm::VmState;

/// Why the scheduler stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quiescence {
    /// No runnable, sleeping, or parked fibers remain.
    Done,
    /// Fibers are parked on channels with no counterparty and no timer can
    /// wake them.
    Deadlocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// A receiver was waiting; the value crossed and the sender continues.
    Delivered,
    /// The sender parked until a receiver arrives.
    Parked,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReceiveOutcome {
    /// A sender was waiting; its value crossed and the sender was readied.
    Received(Value),
    /// The receiver parked until a sender arrives.
    Parked,
}

enum StepOutcome {
    Completed(Value),
    Yielded,
    Failed,
}

#[derive(Debug, PartialEq, Eq)]
struct Sleeper {
    deadline: Instant,
    /// Insertion sequence; keeps wake order stable for equal deadlines.
    seq: u64,
    fiber: FiberId,
}

impl Ord for Sleeper {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.deadline, self.seq).cmp(&(other.deadline, other.seq))
    }
}

impl PartialOrd for Sleeper {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
pub struct Scheduler {
    fibers: Vec<Option<Fiber>>,
    ready: VecDeque<FiberId>,
    sleeping: BinaryHeap<Reverse<Sleeper>>,
    next_seq: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a fiber running `function` from slot 0 and queues it.
    pub fn spawn(&mut self, heap: &Heap, function: Handle) -> FiberId {
        self.spawn_with_successor(heap, function, None)
    }

    /// Like [`Scheduler::spawn`], but the new fiber's completion value is
    /// delivered to `successor` (a compiler-synthesized join site).
    pub fn spawn_with_successor(
        &mut self,
        heap: &Heap,
        function: Handle,
        successor: Option<FiberId>,
    ) -> FiberId {
        let id = FiberId(self.fibers.len() as u32);
        let num_slots = heap.function(function).chunk.num_slots();
        let mut fiber = Fiber::new(id);
        fiber.call(function, num_slots, 0);
        fiber.successor = successor;
        self.fibers.push(Some(fiber));
        self.ready.push_back(id);
        id
    }

    pub fn fiber(&self, id: FiberId) -> Option<&Fiber> {
        self.fibers.get(id.0 as usize).and_then(Option::as_ref)
    }

    pub fn fiber_mut(&mut self, id: FiberId) -> Option<&mut Fiber> {
        self.fibers.get_mut(id.0 as usize).and_then(Option::as_mut)
    }

    pub(crate) fn live_fibers_mut(&mut self) -> impl Iterator<Item = &mut Fiber> {
        self.fibers.iter_mut().flatten()
    }

    /// Resumes a parked fiber with a value: the value lands in the register
    /// named by the call site it suspended at, and the fiber is queued.
    pub fn wake_with(&mut self, heap: &Heap, id: FiberId, value: Value) {
        if let Some(fiber) = self.fibers.get_mut(id.0 as usize).and_then(Option::as_mut) {
            fiber.store_return(heap, value);
            fiber.state = FiberState::Ready;
            self.ready.push_back(id);
        }
    }

    /// Parks a fiber until `now + duration`. Deadlines always fire; there is
    /// no cancellation.
    pub fn sleep(&mut self, fiber: &mut Fiber, duration: Duration) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.sleeping.push(Reverse(Sleeper {
            deadline: Instant::now() + duration,
            seq,
            fiber: fiber.id,
        }));
        fiber.state = FiberState::Sleeping;
    }

    /// Rendezvous send. `sender` is the currently running fiber, held
    /// outside its slot.
    pub fn channel_send(
        &mut self,
        heap: &mut Heap,
        channel: Handle,
        value: Value,
        sender: &mut Fiber,
    ) -> SendOutcome {
        let receiver = heap
            .channel_mut(channel)
            .and_then(|ch| ch.receivers.pop_front());
        if let Some(receiver) = receiver {
            self.wake_with(heap, receiver, value);
            return SendOutcome::Delivered;
        }

        if let Some(ch) = heap.channel_mut(channel) {
            ch.senders.push_back(sender.id);
        }
        sender.wait_to_send(value);
        sender.state = FiberState::WaitingSend(channel);
        SendOutcome::Parked
    }

    /// Rendezvous receive, symmetric to [`Scheduler::channel_send`].
    pub fn channel_receive(
        &mut self,
        heap: &mut Heap,
        channel: Handle,
        receiver: &mut Fiber,
    ) -> ReceiveOutcome {
        let sender = heap
            .channel_mut(channel)
            .and_then(|ch| ch.senders.pop_front());
        if let Some(sender) = sender {
            let value = match self.fiber_mut(sender) {
                Some(fiber) => fiber.take_sending(),
                None => Value::nothing(),
            };
            self.wake_with(heap, sender, Value::nothing());
            return ReceiveOutcome::Received(value);
        }

        if let Some(ch) = heap.channel_mut(channel) {
            ch.receivers.push_back(receiver.id);
        }
        receiver.state = FiberState::WaitingReceive(channel);
        ReceiveOutcome::Parked
    }

    /// Hands a value to a parked receiver on `channel`, if there is one.
    /// Used for uncaught-error delivery, where the producing fiber is dead
    /// and must not park.
    pub fn try_deliver(&mut self, heap: &mut Heap, channel: Handle, value: Value) -> bool {
        let receiver = heap
            .channel_mut(channel)
            .and_then(|ch| ch.receivers.pop_front());
        match receiver {
            Some(receiver) => {
                self.wake_with(heap, receiver, value);
                true
            }
            None => false,
        }
    }

    /// Runs fibers until nothing can make progress. Returns whether the
    /// program finished or deadlocked.
    pub fn run(&mut self, state: &mut VmState) -> Quiescence {
        loop {
            while let Some(id) = self.ready.pop_front() {
                self.step(state, id);
            }
            if self.wait_for_timers(state) {
                continue;
            }
            if self.has_channel_waiters() {
                return Quiescence::Deadlocked;
            }
            return Quiescence::Done;
        }
    }

    /// Runs fibers until `target` completes; other fibers interleave.
    /// Returns `None` if the target failed with an uncaught error or can
    /// never complete.
    pub fn run_until_done(&mut self, state: &mut VmState, target: FiberId) -> Option<Value> {
        loop {
            while let Some(id) = self.ready.pop_front() {
                let outcome = self.step(state, id);
                if id == target {
                    match outcome {
                        StepOutcome::Completed(value) => return Some(value),
                        StepOutcome::Failed => return None,
                        StepOutcome::Yielded => {}
                    }
                }
            }
            if !self.wait_for_timers(state) {
                return None;
            }
        }
    }

    /// Drives one fiber until it yields. GC yields re-enter the same fiber
    /// after a collection.
    fn step(&mut self, state: &mut VmState, id: FiberId) -> StepOutcome {
        let slot = id.0 as usize;
        let Some(mut fiber) = self.fibers.get_mut(slot).and_then(Option::take) else {
            return StepOutcome::Yielded;
        };
        fiber.state = FiberState::Running;

        loop {
            match interp::run(state, self, &mut fiber) {
                FiberResult::DidGc => {
                    // The fiber's stack is part of the root set; park it for
                    // the collection, then resume it in place.
                    self.fibers[slot] = Some(fiber);
                    gc_roots::collect(state, self);
                    fiber = self.fibers[slot].take().expect("fiber vanished during gc");
                }
                FiberResult::Done(value) => {
                    fiber.state = FiberState::Done;
                    if let Some(successor) = fiber.successor.take() {
                        self.wake_with(&state.heap, successor, value);
                    }
                    return StepOutcome::Completed(value);
                }
                FiberResult::Suspend => {
                    // The native that suspended already recorded what the
                    // fiber waits on.
                    self.fibers[slot] = Some(fiber);
                    return StepOutcome::Yielded;
                }
                FiberResult::UncaughtError => {
                    return StepOutcome::Failed;
                }
            }
        }
    }

    /// Blocks for the nearest sleep deadline, then readies every due
    /// sleeper in deadline order. Returns false when no sleepers exist.
    fn wait_for_timers(&mut self, state: &mut VmState) -> bool {
        let Some(Reverse(next)) = self.sleeping.peek() else {
            return false;
        };
        let now = Instant::now();
        if next.deadline > now {
            thread::sleep(next.deadline - now);
        }

        let now = Instant::now();
        while let Some(Reverse(sleeper)) = self.sleeping.peek() {
            if sleeper.deadline > now {
                break;
            }
            let Some(Reverse(sleeper)) = self.sleeping.pop() else {
                break;
            };
            self.wake_with(&state.heap, sleeper.fiber, Value::nothing());
        }
        true
    }

    fn has_channel_waiters(&self) -> bool {
        self.fibers.iter().flatten().any(|fiber| {
            matches!(
                fiber.state,
                FiberState::WaitingSend(_) | FiberState::WaitingReceive(_)
            )
        })
    }
}
