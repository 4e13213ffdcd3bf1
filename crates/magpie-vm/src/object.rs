//! Heap object variants.
//!
//! Every reference value the program can touch is one of these variants.
//! The collector moves objects between semispaces, so nothing outside
//! `gc` holds pointers into them; everything goes through [`Handle`]s.

use std::collections::VecDeque;
use std::rc::Rc;

use magpie_common::SymbolId;

use crate::chunk::Chunk;
use crate::fiber::FiberId;
use crate::gc::Handle;
use crate::value::Value;

/// A user class: name, field count, direct superclasses, and the
/// precomputed linearization consulted by the `is` test. The linearization
/// always starts with the class itself.
#[derive(Debug)]
pub struct ClassObject {
    pub name: SymbolId,
    pub num_fields: u16,
    pub supers: Vec<Handle>,
    pub linearization: Vec<Handle>,
}

/// A closure: shared chunk plus captured upvar cells. Slots are filled by
/// the capture protocol that follows `Function`/`Async` instructions.
#[derive(Debug)]
pub struct FunctionObject {
    pub chunk: Rc<Chunk>,
    pub upvars: Vec<Option<Handle>>,
}

impl FunctionObject {
    pub fn new(chunk: Rc<Chunk>) -> Self {
        let upvars = vec![None; chunk.num_upvars()];
        Self { chunk, upvars }
    }
}

/// A synchronous rendezvous channel. Parked fibers queue here by id; a
/// waiting sender's value is stashed on the fiber itself.
#[derive(Debug, Default)]
pub struct ChannelObject {
    pub senders: VecDeque<FiberId>,
    pub receivers: VecDeque<FiberId>,
}

/// A structural record shape: a canonical sorted set of field symbol ids.
/// Two records have the same type iff their symbol sets are identical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordType {
    symbols: Vec<SymbolId>,
}

impl RecordType {
    /// Builds a type from field symbols, sorting them into canonical order.
    pub fn new(mut symbols: Vec<SymbolId>) -> Self {
        symbols.sort_unstable();
        symbols.dedup();
        Self { symbols }
    }

    #[inline]
    pub fn symbols(&self) -> &[SymbolId] {
        &self.symbols
    }

    #[inline]
    pub fn num_fields(&self) -> usize {
        self.symbols.len()
    }

    /// Field index of a symbol in canonical order.
    pub fn field_index(&self, symbol: SymbolId) -> Option<usize> {
        self.symbols.binary_search(&symbol).ok()
    }
}

/// A heap-allocated object.
#[derive(Debug)]
pub enum HeapObject {
    /// Immutable byte sequence; equality by content.
    Str(String),
    /// Growable ordered sequence.
    List(Vec<Value>),
    /// Instance of a record type; fields in the type's canonical order.
    Record { type_id: u32, fields: Box<[Value]> },
    /// Instance of a user class; fields in declaration order.
    Instance { class: Handle, fields: Box<[Value]> },
    Class(ClassObject),
    Function(FunctionObject),
    /// A mutable one-slot cell shared by an outer frame and the closures
    /// that captured it.
    Upvar(Value),
    Channel(ChannelObject),
}

impl HeapObject {
    /// Approximate heap footprint in bytes, used for the collection
    /// threshold.
    pub fn heap_size(&self) -> usize {
        const BASE: usize = 32;
        let value = std::mem::size_of::<Value>();
        match self {
            HeapObject::Str(s) => BASE + s.len(),
            HeapObject::List(items) => BASE + items.capacity() * value,
            HeapObject::Record { fields, .. } => BASE + fields.len() * value,
            HeapObject::Instance { fields, .. } => BASE + fields.len() * value,
            HeapObject::Class(class) => {
                BASE + (class.supers.len() + class.linearization.len()) * 8
            }
            HeapObject::Function(function) => BASE + function.upvars.len() * 8,
            HeapObject::Upvar(_) => BASE,
            HeapObject::Channel(channel) => {
                BASE + (channel.senders.len() + channel.receivers.len()) * 8
            }
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            HeapObject::Str(_) => "string",
            HeapObject::List(_) => "list",
            HeapObject::Record { .. } => "record",
            HeapObject::Instance { .. } => "instance",
            HeapObject::Class(_) => "class",
            HeapObject::Function(_) => "function",
            HeapObject::Upvar(_) => "upvar",
            HeapObject::Channel(_) => "channel",
        }
    }
}
