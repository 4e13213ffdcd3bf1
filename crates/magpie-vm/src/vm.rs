//! Process-wide VM state.
//!
//! `VmState` owns the heap and every append-only table: symbols, record
//! types, classes, methods, multimethods, modules, and natives. It is kept
//! separate from the [`Scheduler`] so the interpreter and natives can borrow
//! both halves at once.

use hashbrown::HashMap;
use indexmap::IndexMap;
use magpie_common::{SymbolId, SymbolTable};

use crate::fiber::FiberId;
use crate::gc::{Handle, Heap};
use crate::module::{Frontend, Module, ModuleError};
use crate::multimethod::{Method, Multimethod};
use crate::native::NativeRegistry;
use crate::object::{ClassObject, FunctionObject, HeapObject, RecordType};
use crate::scheduler::Scheduler;
use crate::value::{Atom, Value};

/// Sink for program-visible output (`core.print`). Stdout by default;
/// tests capture.
pub trait Output {
    fn write_line(&mut self, line: &str);
}

/// Writes through to stdout.
#[derive(Default)]
pub struct StdoutOutput;

impl Output for StdoutOutput {
    fn write_line(&mut self, line: &str) {
        println!("{}", line);
    }
}

/// Collects output lines for inspection. Clone the handle before installing.
#[derive(Default, Clone)]
pub struct CaptureOutput {
    lines: std::rc::Rc<std::cell::RefCell<Vec<String>>>,
}

impl CaptureOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.borrow().clone()
    }
}

impl Output for CaptureOutput {
    fn write_line(&mut self, line: &str) {
        self.lines.borrow_mut().push(line.to_string());
    }
}

/// Classes the runtime itself needs to name: primitive classes plus the
/// built-in error kinds. Bound from the `core` module when it loads;
/// materialized as bare classes before that so a library-embedded VM can
/// still raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum CoreClass {
    Bool,
    Int,
    Float,
    Char,
    String,
    List,
    Record,
    Class,
    Function,
    Channel,
    Fiber,
    Multimethod,
    Nothing,
    Done,
    NoMatchError,
    NoMethodError,
    UndefinedVarError,
    OverflowError,
}

impl CoreClass {
    pub const COUNT: usize = 18;

    pub const ALL: [CoreClass; Self::COUNT] = [
        CoreClass::Bool,
        CoreClass::Int,
        CoreClass::Float,
        CoreClass::Char,
        CoreClass::String,
        CoreClass::List,
        CoreClass::Record,
        CoreClass::Class,
        CoreClass::Function,
        CoreClass::Channel,
        CoreClass::Fiber,
        CoreClass::Multimethod,
        CoreClass::Nothing,
        CoreClass::Done,
        CoreClass::NoMatchError,
        CoreClass::NoMethodError,
        CoreClass::UndefinedVarError,
        CoreClass::OverflowError,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CoreClass::Bool => "Bool",
            CoreClass::Int => "Int",
            CoreClass::Float => "Float",
            CoreClass::Char => "Char",
            CoreClass::String => "String",
            CoreClass::List => "List",
            CoreClass::Record => "Record",
            CoreClass::Class => "Class",
            CoreClass::Function => "Function",
            CoreClass::Channel => "Channel",
            CoreClass::Fiber => "Fiber",
            CoreClass::Multimethod => "Multimethod",
            CoreClass::Nothing => "Nothing",
            CoreClass::Done => "Done",
            CoreClass::NoMatchError => "NoMatchError",
            CoreClass::NoMethodError => "NoMethodError",
            CoreClass::UndefinedVarError => "UndefinedVarError",
            CoreClass::OverflowError => "OverflowError",
        }
    }
}

pub struct VmState {
    pub heap: Heap,
    pub symbols: SymbolTable,
    pub natives: NativeRegistry,
    pub modules: IndexMap<String, Module>,
    pub methods: Vec<Method>,
    pub multimethods: Vec<Multimethod>,
    multimethod_index: HashMap<String, u32>,
    record_types: Vec<RecordType>,
    record_type_index: HashMap<Box<[SymbolId]>, u32>,
    pub(crate) core_classes: [Handle; CoreClass::COUNT],
    pub(crate) error_channel: Option<Handle>,
    pub output: Box<dyn Output>,
    pub had_uncaught_error: bool,
}

impl VmState {
    pub fn new() -> Self {
        Self::with_heap(Heap::new())
    }

    pub fn with_gc_threshold(threshold: usize) -> Self {
        Self::with_heap(Heap::with_threshold(threshold))
    }

    fn with_heap(mut heap: Heap) -> Self {
        let mut symbols = SymbolTable::new();
        let core_classes = CoreClass::ALL.map(|class| {
            let name = symbols.intern(class.name());
            bare_class(&mut heap, name)
        });
        Self {
            heap,
            symbols,
            natives: NativeRegistry::new(),
            modules: IndexMap::new(),
            methods: Vec::new(),
            multimethods: Vec::new(),
            multimethod_index: HashMap::new(),
            record_types: Vec::new(),
            record_type_index: HashMap::new(),
            core_classes,
            error_channel: None,
            output: Box::new(StdoutOutput),
            had_uncaught_error: false,
        }
    }

    // === Modules ===

    pub fn add_module(&mut self, module: Module) -> usize {
        let index = self.modules.len();
        self.modules.insert(module.name.clone(), module);
        index
    }

    pub fn module(&self, index: usize) -> Option<&Module> {
        self.modules.get_index(index).map(|(_, module)| module)
    }

    pub fn module_mut(&mut self, index: usize) -> Option<&mut Module> {
        self.modules.get_index_mut(index).map(|(_, module)| module)
    }

    pub fn find_module(&self, name: &str) -> Option<usize> {
        self.modules.get_index_of(name)
    }

    // === Record types ===

    /// Interns a record shape, returning the existing id when the symbol set
    /// was seen before. Symbols are canonicalized by sorting.
    pub fn add_record_type(&mut self, symbols: Vec<SymbolId>) -> u32 {
        let record_type = RecordType::new(symbols);
        let key: Box<[SymbolId]> = record_type.symbols().into();
        if let Some(&id) = self.record_type_index.get(&key) {
            return id;
        }
        let id = self.record_types.len() as u32;
        self.record_types.push(record_type);
        self.record_type_index.insert(key, id);
        id
    }

    pub fn record_type(&self, id: u32) -> &RecordType {
        &self.record_types[id as usize]
    }

    pub fn get_record_type(&self, id: u32) -> Option<&RecordType> {
        self.record_types.get(id as usize)
    }

    // === Multimethods and methods ===

    /// Declares a multimethod, returning the existing index for a known
    /// signature. Signatures are unique.
    pub fn declare_multimethod(&mut self, signature: &str) -> u32 {
        if let Some(&index) = self.multimethod_index.get(signature) {
            return index;
        }
        let index = self.multimethods.len() as u32;
        self.multimethods.push(Multimethod::new(signature));
        self.multimethod_index.insert(signature.to_string(), index);
        index
    }

    pub fn find_multimethod(&self, signature: &str) -> Option<u32> {
        self.multimethod_index.get(signature).copied()
    }

    pub fn add_method(&mut self, method: Method) -> u32 {
        let id = self.methods.len() as u32;
        self.methods.push(method);
        id
    }

    /// Appends a method to a multimethod's list. Insertion order is
    /// dispatch order.
    pub fn define_method(&mut self, multimethod: u32, method: u32) {
        if let Some(mm) = self.multimethods.get_mut(multimethod as usize) {
            if (method as usize) < self.methods.len() {
                mm.methods.push(method);
            }
        }
    }

    /// Walks a multimethod's methods in insertion order and returns the
    /// first whose pattern matches the argument window.
    pub fn select_method(&self, multimethod: u32, args: &[Value]) -> Option<u32> {
        let mm = self.multimethods.get(multimethod as usize)?;
        mm.methods
            .iter()
            .copied()
            .find(|&id| self.methods[id as usize].matches(self, args))
    }

    /// The cached function object for a method, created on first call.
    pub fn method_function(&mut self, method: u32) -> Handle {
        if let Some(handle) = self.methods[method as usize].function {
            return handle;
        }
        let chunk = self.methods[method as usize].chunk.clone();
        let handle = self
            .heap
            .alloc(HeapObject::Function(FunctionObject::new(chunk)));
        self.methods[method as usize].function = Some(handle);
        handle
    }

    // === Classes ===

    pub fn core_class(&self, class: CoreClass) -> Handle {
        self.core_classes[class as usize]
    }

    /// The class of any value. Instances carry theirs; everything else maps
    /// to a core class.
    pub fn class_of(&self, value: Value) -> Handle {
        let core = match value {
            Value::Atom(Atom::True) | Value::Atom(Atom::False) => CoreClass::Bool,
            Value::Atom(Atom::Nothing) => CoreClass::Nothing,
            Value::Atom(Atom::Done) => CoreClass::Done,
            Value::Atom(Atom::NoMethod) => CoreClass::NoMethodError,
            Value::Int(_) => CoreClass::Int,
            Value::Float(_) => CoreClass::Float,
            Value::Char(_) => CoreClass::Char,
            Value::Fiber(_) => CoreClass::Fiber,
            Value::Multimethod(_) => CoreClass::Multimethod,
            Value::Object(handle) => match self.heap.get(handle) {
                HeapObject::Str(_) => CoreClass::String,
                HeapObject::List(_) => CoreClass::List,
                HeapObject::Record { .. } => CoreClass::Record,
                HeapObject::Instance { class, .. } => return *class,
                HeapObject::Class(_) => CoreClass::Class,
                HeapObject::Function(_) => CoreClass::Function,
                HeapObject::Channel(_) => CoreClass::Channel,
                HeapObject::Upvar(_) => {
                    unreachable!("upvar cell is not a first-class value")
                }
            },
        };
        self.core_class(core)
    }

    /// Rebinds core classes to the classes the `core` module defines, where
    /// present. Called after the core module body has run.
    pub fn bind_core_classes(&mut self) {
        let Some(core_index) = self.find_module("core") else {
            return;
        };
        for kind in CoreClass::ALL {
            let bound = self
                .module(core_index)
                .and_then(|module| module.get_variable_by_name(kind.name()))
                .and_then(Value::handle)
                .filter(|&handle| self.heap.class(handle).is_some());
            if let Some(handle) = bound {
                self.core_classes[kind as usize] = handle;
            }
        }
    }

    /// A fresh instance of a built-in error class.
    pub fn make_error(&mut self, kind: CoreClass) -> Value {
        let class = self.core_class(kind);
        Value::Object(self.heap.alloc(HeapObject::Instance {
            class,
            fields: Box::new([]),
        }))
    }

    // === Value semantics ===

    /// Language-level equality: content for primitives and strings,
    /// identity for other heap objects. Int/float comparisons coerce to
    /// float.
    pub fn values_equal(&self, a: Value, b: Value) -> bool {
        match (a, b) {
            (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => {
                x as f64 == y
            }
            (Value::Object(x), Value::Object(y)) => {
                match (self.heap.str_value(x), self.heap.str_value(y)) {
                    (Some(x), Some(y)) => x == y,
                    _ => x == y,
                }
            }
            _ => a == b,
        }
    }

    /// Display form used by `core.print` and error reports.
    pub fn show(&self, value: Value) -> String {
        self.show_depth(value, 0)
    }

    fn show_depth(&self, value: Value, depth: usize) -> String {
        if depth > 8 {
            return "...".to_string();
        }
        match value {
            Value::Atom(atom) => atom.name().to_string(),
            Value::Int(n) => n.to_string(),
            Value::Float(n) => n.to_string(),
            Value::Char(c) => c.to_string(),
            Value::Fiber(id) => format!("[fiber {}]", id.0),
            Value::Multimethod(index) => {
                let signature = self
                    .multimethods
                    .get(index as usize)
                    .map(|mm| mm.signature.as_str())
                    .unwrap_or("?");
                format!("[multimethod {}]", signature)
            }
            Value::Object(handle) => match self.heap.get(handle) {
                HeapObject::Str(s) => s.clone(),
                HeapObject::List(items) => {
                    let items: Vec<String> = items
                        .iter()
                        .map(|&item| self.show_depth(item, depth + 1))
                        .collect();
                    format!("[{}]", items.join(", "))
                }
                HeapObject::Record { type_id, fields } => {
                    let record_type = self.record_type(*type_id);
                    let fields: Vec<String> = record_type
                        .symbols()
                        .iter()
                        .zip(fields.iter())
                        .map(|(&symbol, &field)| {
                            format!(
                                "{}: {}",
                                self.symbols.resolve(symbol),
                                self.show_depth(field, depth + 1)
                            )
                        })
                        .collect();
                    format!("({})", fields.join(", "))
                }
                HeapObject::Instance { class, .. } => {
                    let name = self
                        .heap
                        .class(*class)
                        .map(|c| self.symbols.resolve(c.name))
                        .unwrap_or("?");
                    format!("[instance of {}]", name)
                }
                HeapObject::Class(class) => {
                    format!("[class {}]", self.symbols.resolve(class.name))
                }
                HeapObject::Function(_) => "[fn]".to_string(),
                HeapObject::Upvar(_) => "[upvar]".to_string(),
                HeapObject::Channel(_) => "[channel]".to_string(),
            },
        }
    }

    // === Uncaught errors ===

    /// Delivers an uncaught error as a `[fiber, error]` pair on the core
    /// module's `_errorChannel`, falling back to stderr when no consumer is
    /// parked there.
    pub fn report_uncaught(&mut self, scheduler: &mut Scheduler, fiber: FiberId, error: Value) {
        self.had_uncaught_error = true;

        if self.error_channel.is_none() {
            self.error_channel = self
                .find_module("core")
                .and_then(|index| self.module(index))
                .and_then(|module| module.get_variable_by_name("_errorChannel"))
                .and_then(Value::handle)
                .filter(|&handle| {
                    matches!(self.heap.get(handle), HeapObject::Channel(_))
                });
        }

        if let Some(channel) = self.error_channel {
            let pair = self
                .heap
                .alloc(HeapObject::List(vec![Value::Fiber(fiber), error]));
            if scheduler.try_deliver(&mut self.heap, channel, Value::Object(pair)) {
                return;
            }
        }

        eprintln!("[fiber {}] uncaught error: {}", fiber.0, self.show(error));
    }
}

impl Default for VmState {
    fn default() -> Self {
        Self::new()
    }
}

fn bare_class(heap: &mut Heap, name: SymbolId) -> Handle {
    let handle = heap.alloc(HeapObject::Class(ClassObject {
        name,
        num_fields: 0,
        supers: Vec::new(),
        linearization: Vec::new(),
    }));
    match heap.get_mut(handle) {
        HeapObject::Class(class) => class.linearization.push(handle),
        _ => unreachable!(),
    }
    handle
}

/// A complete virtual machine: the shared state plus its scheduler.
pub struct Vm {
    pub state: VmState,
    pub scheduler: Scheduler,
}

impl Vm {
    pub fn new() -> Self {
        Self {
            state: VmState::new(),
            scheduler: Scheduler::new(),
        }
    }

    pub fn with_state(state: VmState) -> Self {
        Self {
            state,
            scheduler: Scheduler::new(),
        }
    }

    /// Spawns a fiber for a module's body and drives it to completion.
    /// Returns `None` when the body failed with an uncaught error or never
    /// completed.
    pub fn run_module(&mut self, index: usize) -> Option<Value> {
        let body = self.state.module(index)?.body.clone()?;
        self.run_chunk(body)
    }

    /// Spawns a fiber for a bare chunk and drives it to completion.
    pub fn run_chunk(&mut self, chunk: std::rc::Rc<crate::chunk::Chunk>) -> Option<Value> {
        let function = self
            .state
            .heap
            .alloc(HeapObject::Function(FunctionObject::new(chunk)));
        let fiber = self.scheduler.spawn(&self.state.heap, function);
        self.scheduler.run_until_done(&mut self.state, fiber)
    }

    /// Loads, compiles, and runs a program: modules execute in topological
    /// order, then remaining fibers drain to quiescence.
    pub fn run_program<F: Frontend>(
        &mut self,
        frontend: &mut F,
        path: &std::path::Path,
    ) -> Result<(), ModuleError> {
        let order = crate::module::load_program(&mut self.state, frontend, path)?;
        for index in order {
            let completed = self.run_module(index).is_some();
            let is_core = self
                .state
                .module(index)
                .is_some_and(|module| module.name == "core");
            if is_core {
                self.state.bind_core_classes();
            }
            if !completed && self.state.had_uncaught_error {
                return Ok(());
            }
        }
        self.scheduler.run(&mut self.state);
        Ok(())
    }

    /// Evaluates one expression in the sticky `<repl>` module.
    pub fn evaluate_expression<F: Frontend>(
        &mut self,
        frontend: &mut F,
        source: &str,
    ) -> Result<Option<Value>, ModuleError> {
        let index = crate::module::ensure_repl_module(&mut self.state);
        let chunk = frontend
            .compile_expression(&mut self.state, index, source)
            .map_err(ModuleError::Frontend)?;
        Ok(self.run_chunk(chunk))
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}
