//! Multimethods and method dispatch.
//!
//! A multimethod is an ordered list of methods sharing a signature. The
//! compiler attaches an argument pattern to each method; dispatch walks the
//! list in insertion order and calls the first method whose pattern matches
//! the runtime arguments. Ties go to the earliest inserted method.

use std::rc::Rc;

use magpie_common::SymbolId;

use crate::chunk::Chunk;
use crate::gc::Handle;
use crate::object::HeapObject;
use crate::value::{Atom, Value};
use crate::vm::VmState;

/// A compiler-produced argument pattern. One entry per argument slot in the
/// call window.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Matches anything (a plain variable binding).
    Wildcard,
    Atom(Atom),
    Int(i64),
    Char(char),
    Str(String),
    /// Matches values whose class linearization contains this class.
    Class(Handle),
    /// Matches records that carry at least these fields, each matching its
    /// subpattern.
    Record(Vec<(SymbolId, Pattern)>),
}

impl Pattern {
    pub fn matches(&self, state: &VmState, value: Value) -> bool {
        match self {
            Pattern::Wildcard => true,
            Pattern::Atom(atom) => value == Value::Atom(*atom),
            Pattern::Int(expected) => match value {
                Value::Int(actual) => actual == *expected,
                Value::Float(actual) => actual == *expected as f64,
                _ => false,
            },
            Pattern::Char(expected) => value == Value::Char(*expected),
            Pattern::Str(expected) => value
                .handle()
                .and_then(|handle| state.heap.str_value(handle))
                .is_some_and(|actual| actual == expected),
            Pattern::Class(class) => {
                let actual = state.class_of(value);
                state
                    .heap
                    .class(actual)
                    .is_some_and(|c| c.linearization.contains(class))
            }
            Pattern::Record(fields) => {
                let Some(handle) = value.handle() else {
                    return false;
                };
                let HeapObject::Record { type_id, fields: values } = state.heap.get(handle)
                else {
                    return false;
                };
                let record_type = state.record_type(*type_id);
                fields.iter().all(|(symbol, pattern)| {
                    record_type
                        .field_index(*symbol)
                        .is_some_and(|index| pattern.matches(state, values[index]))
                })
            }
        }
    }
}

/// One implementation of a multimethod.
#[derive(Debug)]
pub struct Method {
    /// Patterns for the leading slots of the argument window.
    pub patterns: Vec<Pattern>,
    pub chunk: Rc<Chunk>,
    /// Lazily created function object for the chunk, cached across calls.
    pub function: Option<Handle>,
}

impl Method {
    pub fn new(patterns: Vec<Pattern>, chunk: Rc<Chunk>) -> Self {
        Self {
            patterns,
            chunk,
            function: None,
        }
    }

    pub fn matches(&self, state: &VmState, args: &[Value]) -> bool {
        self.patterns.iter().enumerate().all(|(index, pattern)| {
            args.get(index)
                .is_some_and(|&value| pattern.matches(state, value))
        })
    }
}

/// A named open function; implementations are appended, never removed, so
/// method ids baked into bytecode stay valid.
#[derive(Debug)]
pub struct Multimethod {
    pub signature: String,
    pub methods: Vec<u32>,
}

impl Multimethod {
    pub fn new(signature: impl Into<String>) -> Self {
        Self {
            signature: signature.into(),
            methods: Vec::new(),
        }
    }
}
