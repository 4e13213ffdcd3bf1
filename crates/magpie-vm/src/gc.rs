//! Semispace copying collector.
//!
//! Allocation bumps into to-space. A collection swaps the spaces, copies
//! every object reachable from the roots into the fresh to-space, and leaves
//! a forwarding handle in the old slot so later visits resolve to the copy.
//! The interpreter only ever sees [`Handle`]s, so moved objects are invisible
//! to it; root holders rewrite their handles during the root pass.
//!
//! Collections never start spontaneously: the interpreter polls
//! [`Heap::should_collect`] at its checkpoint and the scheduler runs the
//! collection while every fiber is parked.

use std::fmt;
use std::mem;

use crate::object::{ChannelObject, ClassObject, FunctionObject, HeapObject};
use crate::value::Value;

/// Default collection threshold: 2 MiB of live allocation.
pub const DEFAULT_THRESHOLD: usize = 2 * 1024 * 1024;

/// A GC-aware reference to a heap object. Indices are only meaningful
/// within the current semispace; the collector rewrites every rooted handle
/// when objects move.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u32);

impl Handle {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.0)
    }
}

enum Slot {
    Object(HeapObject),
    /// Forwarding address left behind once the object has been copied.
    Forwarded(Handle),
}

pub struct Heap {
    to_space: Vec<Slot>,
    from_space: Vec<Slot>,
    bytes: usize,
    threshold: usize,
    collections: usize,
}

impl Heap {
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_THRESHOLD)
    }

    pub fn with_threshold(threshold: usize) -> Self {
        Self {
            to_space: Vec::new(),
            from_space: Vec::new(),
            bytes: 0,
            threshold,
            collections: 0,
        }
    }

    /// Allocates an object and returns its handle. Never fails; pressure is
    /// relieved at the next interpreter checkpoint.
    pub fn alloc(&mut self, object: HeapObject) -> Handle {
        self.bytes += object.heap_size();
        let handle = Handle(self.to_space.len() as u32);
        self.to_space.push(Slot::Object(object));
        handle
    }

    /// True once allocation has crossed the threshold; the interpreter's
    /// checkpoint turns this into a `DID_GC` yield.
    #[inline]
    pub fn should_collect(&self) -> bool {
        self.bytes >= self.threshold
    }

    pub fn live_bytes(&self) -> usize {
        self.bytes
    }

    pub fn num_collections(&self) -> usize {
        self.collections
    }

    #[inline]
    pub fn get(&self, handle: Handle) -> &HeapObject {
        match &self.to_space[handle.index()] {
            Slot::Object(object) => object,
            Slot::Forwarded(_) => unreachable!("read through a stale handle"),
        }
    }

    #[inline]
    pub fn get_mut(&mut self, handle: Handle) -> &mut HeapObject {
        match &mut self.to_space[handle.index()] {
            Slot::Object(object) => object,
            Slot::Forwarded(_) => unreachable!("write through a stale handle"),
        }
    }

    // === Typed accessors ===

    pub fn str_value(&self, handle: Handle) -> Option<&str> {
        match self.get(handle) {
            HeapObject::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn function(&self, handle: Handle) -> &FunctionObject {
        match self.get(handle) {
            HeapObject::Function(function) => function,
            other => unreachable!("expected function, found {}", other.kind_name()),
        }
    }

    pub fn function_mut(&mut self, handle: Handle) -> &mut FunctionObject {
        match self.get_mut(handle) {
            HeapObject::Function(function) => function,
            other => unreachable!("expected function, found {}", other.kind_name()),
        }
    }

    pub fn class(&self, handle: Handle) -> Option<&ClassObject> {
        match self.get(handle) {
            HeapObject::Class(class) => Some(class),
            _ => None,
        }
    }

    pub fn channel_mut(&mut self, handle: Handle) -> Option<&mut ChannelObject> {
        match self.get_mut(handle) {
            HeapObject::Channel(channel) => Some(channel),
            _ => None,
        }
    }

    pub fn upvar(&self, handle: Handle) -> Value {
        match self.get(handle) {
            HeapObject::Upvar(value) => *value,
            other => unreachable!("expected upvar, found {}", other.kind_name()),
        }
    }

    pub fn set_upvar(&mut self, handle: Handle, value: Value) {
        match self.get_mut(handle) {
            HeapObject::Upvar(slot) => *slot = value,
            other => unreachable!("expected upvar, found {}", other.kind_name()),
        }
    }

    // === Collection ===

    /// Swaps semispaces. Until [`Heap::finish_collect`] runs, every handle
    /// held anywhere refers to from-space and must be passed through
    /// [`Heap::forward`].
    pub fn begin_collect(&mut self) {
        self.from_space = mem::take(&mut self.to_space);
        self.bytes = 0;
    }

    /// Copies the object behind a from-space handle into to-space (or chases
    /// the forwarding address if it was already copied) and returns the new
    /// handle.
    pub fn forward(&mut self, handle: Handle) -> Handle {
        match &self.from_space[handle.index()] {
            Slot::Forwarded(new) => *new,
            Slot::Object(_) => {
                let new = Handle(self.to_space.len() as u32);
                let slot = mem::replace(&mut self.from_space[handle.index()], Slot::Forwarded(new));
                let Slot::Object(object) = slot else {
                    unreachable!()
                };
                self.bytes += object.heap_size();
                self.to_space.push(Slot::Object(object));
                new
            }
        }
    }

    /// Rewrites a value in place if it references the heap.
    #[inline]
    pub fn forward_value(&mut self, value: &mut Value) {
        if let Value::Object(handle) = value {
            *handle = self.forward(*handle);
        }
    }

    #[inline]
    pub fn forward_handle(&mut self, handle: &mut Handle) {
        *handle = self.forward(*handle);
    }

    /// Cheney scan: walks the objects copied so far, forwarding their
    /// outgoing references (which copies more objects), until the scan
    /// pointer catches up with the allocation pointer. From-space is then
    /// abandoned and the threshold grows if occupancy stayed high.
    pub fn finish_collect(&mut self) {
        let mut scan = 0;
        while scan < self.to_space.len() {
            let slot = mem::replace(&mut self.to_space[scan], Slot::Forwarded(Handle(0)));
            let Slot::Object(mut object) = slot else {
                unreachable!()
            };
            self.scan_object(&mut object);
            self.to_space[scan] = Slot::Object(object);
            scan += 1;
        }

        self.from_space.clear();
        self.collections += 1;
        // Occupancy above the high-water mark grows the threshold until the
        // live set fits comfortably; otherwise the next checkpoint would
        // immediately demand another collection.
        while self.bytes > self.threshold / 4 * 3 {
            self.threshold *= 2;
        }
    }

    /// Forwards every outgoing reference of one object exactly once.
    fn scan_object(&mut self, object: &mut HeapObject) {
        match object {
            HeapObject::Str(_) => {}
            HeapObject::List(items) => {
                for item in items {
                    self.forward_value(item);
                }
            }
            HeapObject::Record { fields, .. } => {
                for field in fields.iter_mut() {
                    self.forward_value(field);
                }
            }
            HeapObject::Instance { class, fields } => {
                self.forward_handle(class);
                for field in fields.iter_mut() {
                    self.forward_value(field);
                }
            }
            HeapObject::Class(class) => {
                for superclass in &mut class.supers {
                    self.forward_handle(superclass);
                }
                for entry in &mut class.linearization {
                    self.forward_handle(entry);
                }
            }
            HeapObject::Function(function) => {
                for upvar in function.upvars.iter_mut().flatten() {
                    self.forward_handle(upvar);
                }
            }
            HeapObject::Upvar(value) => self.forward_value(value),
            // Channels queue fiber ids; a parked sender's value lives on the
            // fiber and is forwarded with the fiber's roots.
            HeapObject::Channel(_) => {}
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}
