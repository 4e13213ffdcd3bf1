//! Program driver behavior: module bodies run in dependency order, and run
//! results map onto the documented exit codes (0 success, 1 compile error,
//! 2 uncaught runtime error, 3 resolution/cycle error).

use std::fs;
use std::path::Path;
use std::rc::Rc;

use magpie_common::SourceFile;
use magpie_runtime::{create_vm, run_program, ProgramOutcome};
use magpie_vm::{
    CaptureOutput, Chunk, ChunkBuilder, Constant, Frontend, FrontendError, Instruction,
    Opcode, Value, Vm, VmState,
};

fn ins(op: Opcode, a: u16, b: u16, c: u16) -> Instruction {
    Instruction::new(op, a, b, c)
}

/// A line-oriented frontend: `import NAME` pulls in a module; the remaining
/// directives compile to straight-line bytecode against the real natives.
struct LineFrontend;

struct LineAst {
    imports: Vec<String>,
    directives: Vec<String>,
}

impl LineFrontend {
    fn compile_lines(
        &self,
        state: &mut VmState,
        module: usize,
        lines: &[String],
    ) -> Result<Rc<Chunk>, FrontendError> {
        let add = state.natives.find("core.add").unwrap() as u16;
        let print = state.natives.find("core.print").unwrap() as u16;

        let mut b = ChunkBuilder::new();
        for line in lines {
            let mut words = line.split_whitespace();
            match words.next() {
                Some("print-sum") => {
                    let x: i64 = words.next().unwrap().parse().unwrap();
                    let y: i64 = words.next().unwrap().parse().unwrap();
                    let kx = b.add_constant(Constant::Int(x));
                    let ky = b.add_constant(Constant::Int(y));
                    b.write(ins(Opcode::Constant, kx, 0, 0), 1);
                    b.write(ins(Opcode::Constant, ky, 1, 0), 1);
                    b.write(ins(Opcode::Native, add, 0, 0), 1);
                    b.write(ins(Opcode::Native, print, 0, 1), 1);
                }
                Some("print") => {
                    let text = words.collect::<Vec<_>>().join(" ");
                    let k = b.add_constant(Constant::Str(text));
                    b.write(ins(Opcode::Constant, k, 0, 0), 1);
                    b.write(ins(Opcode::Native, print, 0, 1), 1);
                }
                Some("set") => {
                    let name = words.next().unwrap();
                    let value: i64 = words.next().unwrap().parse().unwrap();
                    let var = state
                        .module_mut(module)
                        .ok_or_else(|| FrontendError::new("unknown module"))?
                        .declare_variable(name);
                    let k = b.add_constant(Constant::Int(value));
                    b.write(ins(Opcode::Constant, k, 0, 0), 1);
                    b.write(ins(Opcode::SetVar, module as u16, var as u16, 0), 1);
                }
                Some("get") => {
                    let name = words.next().unwrap();
                    let var = state
                        .module(module)
                        .and_then(|m| m.find_variable(name))
                        .ok_or_else(|| {
                            FrontendError::new(format!("unknown variable {}", name))
                        })?;
                    b.write(ins(Opcode::GetVar, module as u16, var as u16, 0), 1);
                }
                Some("boom") => {
                    b.write(ins(Opcode::Atom, 0, 0, 0), 1);
                    b.write(ins(Opcode::TestMatch, 0, 0, 0), 1);
                }
                Some(other) => {
                    return Err(FrontendError::new(format!(
                        "unknown directive {}",
                        other
                    )));
                }
                None => {}
            }
        }
        b.write(ins(Opcode::Return, 0, 0, 0), 1);
        b.build(2, 0).map_err(|e| FrontendError::new(e.to_string()))
    }
}

impl Frontend for LineFrontend {
    type Ast = LineAst;

    fn parse(&mut self, source: &SourceFile) -> Result<LineAst, FrontendError> {
        if source.source().contains("syntax-error") {
            return Err(FrontendError::new("unexpected token"));
        }
        let mut imports = Vec::new();
        let mut directives = Vec::new();
        for line in source.source().lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match line.strip_prefix("import ") {
                Some(name) => imports.push(name.trim().to_string()),
                None => directives.push(line.to_string()),
            }
        }
        Ok(LineAst {
            imports,
            directives,
        })
    }

    fn imports(&self, ast: &LineAst) -> Vec<String> {
        ast.imports.clone()
    }

    fn compile_module(
        &mut self,
        state: &mut VmState,
        module: usize,
        ast: LineAst,
    ) -> Result<Rc<Chunk>, FrontendError> {
        self.compile_lines(state, module, &ast.directives)
    }

    fn compile_expression(
        &mut self,
        state: &mut VmState,
        module: usize,
        source: &str,
    ) -> Result<Rc<Chunk>, FrontendError> {
        self.compile_lines(state, module, &[source.to_string()])
    }
}

fn capture_vm() -> (Vm, CaptureOutput) {
    let mut vm = create_vm();
    let capture = CaptureOutput::new();
    vm.state.output = Box::new(capture.clone());
    (vm, capture)
}

fn write_module(dir: &Path, name: &str, contents: &str) {
    fs::write(dir.join(name), contents).unwrap();
}

#[test]
fn successful_program_exits_zero_and_prints() {
    let dir = tempfile::tempdir().unwrap();
    write_module(dir.path(), "core.mag", "");
    write_module(dir.path(), "main.mag", "print-sum 1 2\n");

    let (mut vm, capture) = capture_vm();
    let outcome = run_program(&mut vm, &mut LineFrontend, &dir.path().join("main.mag"));
    assert_eq!(outcome.exit_code(), 0);
    assert!(matches!(outcome, ProgramOutcome::Completed));
    assert_eq!(capture.lines(), vec!["3"]);
}

#[test]
fn module_bodies_run_in_dependency_order() {
    let dir = tempfile::tempdir().unwrap();
    write_module(dir.path(), "core.mag", "print core\n");
    write_module(dir.path(), "low.mag", "print low\n");
    write_module(dir.path(), "mid.mag", "import low\nprint mid\n");
    write_module(dir.path(), "main.mag", "import mid\nprint main\n");

    let (mut vm, capture) = capture_vm();
    let outcome = run_program(&mut vm, &mut LineFrontend, &dir.path().join("main.mag"));
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(capture.lines(), vec!["core", "low", "mid", "main"]);
}

#[test]
fn parse_error_exits_one() {
    let dir = tempfile::tempdir().unwrap();
    write_module(dir.path(), "core.mag", "");
    write_module(dir.path(), "main.mag", "syntax-error\n");

    let (mut vm, capture) = capture_vm();
    let outcome = run_program(&mut vm, &mut LineFrontend, &dir.path().join("main.mag"));
    assert_eq!(outcome.exit_code(), 1);
    assert!(matches!(outcome, ProgramOutcome::CompileError(_)));
    assert!(capture.lines().is_empty());
}

#[test]
fn uncaught_runtime_error_exits_two() {
    let dir = tempfile::tempdir().unwrap();
    write_module(dir.path(), "core.mag", "");
    write_module(dir.path(), "main.mag", "boom\n");

    let (mut vm, _capture) = capture_vm();
    let outcome = run_program(&mut vm, &mut LineFrontend, &dir.path().join("main.mag"));
    assert_eq!(outcome.exit_code(), 2);
    assert!(matches!(outcome, ProgramOutcome::RuntimeError));
}

#[test]
fn import_cycle_exits_three_and_runs_nothing() {
    let dir = tempfile::tempdir().unwrap();
    write_module(dir.path(), "core.mag", "");
    write_module(dir.path(), "a.mag", "import b\nprint a\n");
    write_module(dir.path(), "b.mag", "import a\nprint b\n");
    write_module(dir.path(), "main.mag", "import a\nprint main\n");

    let (mut vm, capture) = capture_vm();
    let outcome = run_program(&mut vm, &mut LineFrontend, &dir.path().join("main.mag"));
    assert_eq!(outcome.exit_code(), 3);
    assert!(matches!(outcome, ProgramOutcome::ResolutionError(_)));
    // No module body ran.
    assert!(capture.lines().is_empty());
}

#[test]
fn missing_module_exits_three() {
    let dir = tempfile::tempdir().unwrap();
    write_module(dir.path(), "core.mag", "");
    write_module(dir.path(), "main.mag", "import ghost\n");

    let (mut vm, _capture) = capture_vm();
    let outcome = run_program(&mut vm, &mut LineFrontend, &dir.path().join("main.mag"));
    assert_eq!(outcome.exit_code(), 3);
}

#[test]
fn repl_accumulates_variables_across_evaluations() {
    let (mut vm, capture) = capture_vm();
    let mut frontend = LineFrontend;

    assert_eq!(
        vm.evaluate_expression(&mut frontend, "set x 41").unwrap(),
        Some(Value::Int(41))
    );
    assert_eq!(
        vm.evaluate_expression(&mut frontend, "get x").unwrap(),
        Some(Value::Int(41))
    );
    // The printed sum lands in r0 before the body returns.
    assert_eq!(
        vm.evaluate_expression(&mut frontend, "print-sum 20 22").unwrap(),
        Some(Value::Int(42))
    );
    assert_eq!(capture.lines(), vec!["42"]);

    // An unknown variable is a compile error from the frontend seam.
    assert!(vm.evaluate_expression(&mut frontend, "get y").is_err());
}
