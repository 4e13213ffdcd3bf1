//! Magpie core runtime.
//!
//! A register-based bytecode VM: tagged values on a semispace copying heap,
//! cooperative fibers driven by a single-threaded scheduler, multimethod
//! dispatch, synchronous channels, and a module loader with topological
//! import resolution. Parsing and compilation are external; they reach the
//! runtime through the [`module::Frontend`] seam and the chunk builder.

pub mod chunk;
pub mod fiber;
pub mod gc;
pub mod gc_roots;
pub mod instruction;
pub mod interp;
pub mod module;
pub mod multimethod;
pub mod native;
pub mod object;
pub mod scheduler;
pub mod value;
pub mod vm;

pub use chunk::{Chunk, ChunkBuilder, ChunkError, Constant};
pub use fiber::{CallFrame, CatchFrame, Fiber, FiberId, FiberState};
pub use gc::{Handle, Heap};
pub use instruction::{Instruction, Opcode};
pub use interp::FiberResult;
pub use module::{Frontend, FrontendError, Module, ModuleError};
pub use multimethod::{Method, Multimethod, Pattern};
pub use native::{NativeCtx, NativeFn, NativeOutcome, NativeRegistry};
pub use object::{ChannelObject, ClassObject, FunctionObject, HeapObject, RecordType};
pub use scheduler::{Quiescence, ReceiveOutcome, Scheduler, SendOutcome};
pub use value::{Atom, Value};
pub use vm::{CaptureOutput, CoreClass, Output, StdoutOutput, Vm, VmState};
