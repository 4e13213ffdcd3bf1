//! VM construction and the program driver for the Magpie runtime.
//!
//! This crate wires the native function implementations into a fresh VM and
//! exposes the program-level entry points: run a script through a frontend,
//! map the result onto the documented exit codes, and evaluate REPL
//! expressions.

pub mod natives;

use std::path::Path;

use magpie_vm::{Frontend, FrontendError, ModuleError, Vm, VmState};

/// A fresh VM state with every native registered.
pub fn create_state() -> VmState {
    let mut state = VmState::new();
    natives::register_all(&mut state.natives);
    state
}

/// A complete VM with all native functions registered.
pub fn create_vm() -> Vm {
    Vm::with_state(create_state())
}

/// How a program run ended. `exit_code` gives the process-level contract:
/// 0 success, 1 compile/parse error, 2 uncaught runtime error, 3 module
/// resolution or cycle error.
#[derive(Debug)]
pub enum ProgramOutcome {
    Completed,
    CompileError(FrontendError),
    RuntimeError,
    ResolutionError(ModuleError),
}

impl ProgramOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            ProgramOutcome::Completed => 0,
            ProgramOutcome::CompileError(_) => 1,
            ProgramOutcome::RuntimeError => 2,
            ProgramOutcome::ResolutionError(_) => 3,
        }
    }
}

/// Loads and runs the program rooted at `path` on an existing VM.
pub fn run_program<F: Frontend>(vm: &mut Vm, frontend: &mut F, path: &Path) -> ProgramOutcome {
    match vm.run_program(frontend, path) {
        Ok(()) => {
            if vm.state.had_uncaught_error {
                ProgramOutcome::RuntimeError
            } else {
                ProgramOutcome::Completed
            }
        }
        Err(ModuleError::Frontend(error)) => ProgramOutcome::CompileError(error),
        Err(error) => ProgramOutcome::ResolutionError(error),
    }
}

/// Convenience entry point: fresh VM, run, report.
pub fn run_file<F: Frontend>(frontend: &mut F, path: &Path) -> ProgramOutcome {
    let mut vm = create_vm();
    run_program(&mut vm, frontend, path)
}
