//! Modules and the import resolver.
//!
//! A module is a single compiled file: a body chunk plus parallel arrays of
//! variable names and values. The loader walks the import graph (every
//! non-core module implicitly imports `core`), topologically sorts it,
//! compiles bodies in dependency order, and reports cycles.
//!
//! Parsing and compiling belong to the external frontend; the [`Frontend`]
//! trait is the seam. ASTs are transient: held between parse and compile,
//! never stored in the module table.

use std::env;
use std::fs;
use std::path::{Path, PathBuf, MAIN_SEPARATOR_STR};
use std::rc::Rc;

use hashbrown::HashMap;
use magpie_common::SourceFile;
use thiserror::Error;

use crate::chunk::Chunk;
use crate::value::Value;
use crate::vm::VmState;

/// Environment variable overriding the core library directory.
pub const CORE_LIB_ENV: &str = "MAGPIE_CORE_LIB";

/// Extension of Magpie source files.
pub const SOURCE_EXTENSION: &str = "mag";

/// An error produced by the external parser or compiler.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct FrontendError {
    pub message: String,
}

impl FrontendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("could not find module \"{name}\"")]
    NotFound { name: String },
    #[error("could not read \"{path}\": {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Frontend(#[from] FrontendError),
    #[error("import cycle between modules: {}", names.join(", "))]
    ImportCycle { names: Vec<String> },
}

/// The external parser/compiler pair, seen through the narrowest interface
/// the loader needs.
pub trait Frontend {
    type Ast;

    /// Parses a module source into an AST.
    fn parse(&mut self, source: &SourceFile) -> Result<Self::Ast, FrontendError>;

    /// The module names the AST's import forms name, in order.
    fn imports(&self, ast: &Self::Ast) -> Vec<String>;

    /// Lowers a module body to a chunk, declaring the module's variables
    /// and interning what it needs in the VM tables.
    fn compile_module(
        &mut self,
        state: &mut VmState,
        module: usize,
        ast: Self::Ast,
    ) -> Result<Rc<Chunk>, FrontendError>;

    /// Compiles one REPL expression against a module's accumulated
    /// variables.
    fn compile_expression(
        &mut self,
        state: &mut VmState,
        module: usize,
        source: &str,
    ) -> Result<Rc<Chunk>, FrontendError>;
}

/// A single file of compiled Magpie code.
#[derive(Debug)]
pub struct Module {
    pub name: String,
    pub path: Option<PathBuf>,
    pub source: Option<Rc<SourceFile>>,
    /// The module body, compiled to a fake function so that loading a
    /// module is just a function call.
    pub body: Option<Rc<Chunk>>,
    /// Indices of imported modules, implicit `core` first.
    pub imports: Vec<usize>,
    variable_names: Vec<String>,
    variables: Vec<Option<Value>>,
}

impl Module {
    pub fn new(name: impl Into<String>, path: Option<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path,
            source: None,
            body: None,
            imports: Vec::new(),
            variable_names: Vec::new(),
            variables: Vec::new(),
        }
    }

    /// Declares a top-level variable and returns its index. Indices are
    /// assigned at compile time and stay stable for the module's lifetime.
    pub fn declare_variable(&mut self, name: &str) -> usize {
        if let Some(index) = self.find_variable(name) {
            return index;
        }
        self.variable_names.push(name.to_string());
        self.variables.push(None);
        self.variables.len() - 1
    }

    /// Index of a previously declared variable.
    pub fn find_variable(&self, name: &str) -> Option<usize> {
        self.variable_names.iter().position(|n| n == name)
    }

    /// Reads a variable slot; `None` for unset or undeclared slots.
    pub fn get_variable(&self, index: usize) -> Option<Value> {
        self.variables.get(index).copied().flatten()
    }

    pub fn get_variable_by_name(&self, name: &str) -> Option<Value> {
        self.find_variable(name).and_then(|i| self.get_variable(i))
    }

    pub fn set_variable(&mut self, index: usize, value: Value) {
        if let Some(slot) = self.variables.get_mut(index) {
            *slot = Some(value);
        }
    }

    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    pub fn variable_name(&self, index: usize) -> Option<&str> {
        self.variable_names.get(index).map(String::as_str)
    }

    pub(crate) fn variables_mut(&mut self) -> std::slice::IterMut<'_, Option<Value>> {
        self.variables.iter_mut()
    }
}

/// The core library directory: `MAGPIE_CORE_LIB` when set, otherwise
/// `core/` next to the executable.
pub fn core_lib_dir() -> PathBuf {
    if let Some(dir) = env::var_os(CORE_LIB_ENV) {
        return PathBuf::from(dir);
    }
    let exe_dir = env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));
    let dir = exe_dir.join("core");
    fs::canonicalize(&dir).unwrap_or(dir)
}

/// Resolves a module name to a path: `a.b.c` becomes `a/b/c.mag`, searched
/// in the program directory first and the core library second.
pub fn locate_module(
    program_dir: Option<&Path>,
    core_dir: &Path,
    name: &str,
) -> Option<PathBuf> {
    let mut relative = PathBuf::from(name.replace('.', MAIN_SEPARATOR_STR));
    relative.set_extension(SOURCE_EXTENSION);

    if let Some(dir) = program_dir {
        let path = dir.join(&relative);
        if path.is_file() {
            return Some(path);
        }
    }

    let path = core_dir.join(&relative);
    if path.is_file() {
        return Some(path);
    }
    None
}

struct Loader<'a, F: Frontend> {
    state: &'a mut VmState,
    frontend: &'a mut F,
    program_dir: Option<PathBuf>,
    core_dir: PathBuf,
    /// Parsed but not yet compiled module bodies.
    asts: Vec<(usize, F::Ast)>,
}

impl<F: Frontend> Loader<'_, F> {
    /// Registers a module (and, recursively, its imports). The module is
    /// registered before its imports are scanned so diamond imports resolve
    /// to one instance and re-entrant loads terminate.
    fn add_module(
        &mut self,
        name: Option<String>,
        path: Option<PathBuf>,
    ) -> Result<usize, ModuleError> {
        let name = match name {
            Some(name) => name,
            // The root module is named after its file.
            None => path
                .as_deref()
                .and_then(Path::file_stem)
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| "main".to_string()),
        };

        if let Some(index) = self.state.find_module(&name) {
            return Ok(index);
        }

        let path = match path {
            Some(path) => path,
            None => locate_module(self.program_dir.as_deref(), &self.core_dir, &name)
                .ok_or_else(|| ModuleError::NotFound { name: name.clone() })?,
        };

        let text = fs::read_to_string(&path).map_err(|source| ModuleError::Io {
            path: path.clone(),
            source,
        })?;
        let source = Rc::new(SourceFile::new(&path, text));
        let ast = self.frontend.parse(&source)?;

        let mut module = Module::new(name.clone(), Some(path));
        module.source = Some(source);
        let index = self.state.add_module(module);

        let mut imports = Vec::new();
        if name != "core" {
            imports.push(self.add_module(Some("core".to_string()), None)?);
        }
        for import in self.frontend.imports(&ast) {
            imports.push(self.add_module(Some(import), None)?);
        }
        if let Some(module) = self.state.module_mut(index) {
            module.imports = imports;
        }

        self.asts.push((index, ast));
        Ok(index)
    }
}

/// Topologically sorts the module table by imports: dependencies first,
/// insertion order breaking ties. Fails when the graph has a cycle.
pub fn topo_sort(state: &VmState) -> Result<Vec<usize>, ModuleError> {
    let count = state.modules.len();
    let mut in_degree = vec![0usize; count];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];

    for (index, module) in state.modules.values().enumerate() {
        for &import in &module.imports {
            dependents[import].push(index);
            in_degree[index] += 1;
        }
    }

    let mut queue: std::collections::VecDeque<usize> = (0..count)
        .filter(|&index| in_degree[index] == 0)
        .collect();
    let mut order = Vec::with_capacity(count);

    while let Some(index) = queue.pop_front() {
        order.push(index);
        for &dependent in &dependents[index] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                queue.push_back(dependent);
            }
        }
    }

    if order.len() < count {
        let names = state
            .modules
            .values()
            .enumerate()
            .filter(|&(index, _)| !order.contains(&index))
            .map(|(_, module)| module.name.clone())
            .collect();
        return Err(ModuleError::ImportCycle { names });
    }
    Ok(order)
}

/// Discovers, parses, sorts, and compiles the program rooted at `path`.
/// Returns module indices in execution order. No module body runs here.
pub fn load_program<F: Frontend>(
    state: &mut VmState,
    frontend: &mut F,
    path: &Path,
) -> Result<Vec<usize>, ModuleError> {
    let canonical = fs::canonicalize(path).map_err(|source| ModuleError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let program_dir = canonical.parent().map(Path::to_path_buf);

    let asts = {
        let mut loader = Loader {
            state: &mut *state,
            frontend: &mut *frontend,
            program_dir,
            core_dir: core_lib_dir(),
            asts: Vec::new(),
        };
        loader.add_module(None, Some(canonical))?;
        loader.asts
    };

    let order = topo_sort(state)?;

    let mut asts: HashMap<usize, F::Ast> = asts.into_iter().collect();
    for &index in &order {
        if let Some(ast) = asts.remove(&index) {
            let body = frontend.compile_module(state, index, ast)?;
            if let Some(module) = state.module_mut(index) {
                module.body = Some(body);
            }
        }
    }
    Ok(order)
}

/// The sticky REPL module: created on first use, importing `core` when it
/// is loaded, accumulating variables across evaluations.
pub fn ensure_repl_module(state: &mut VmState) -> usize {
    if let Some(index) = state.find_module("<repl>") {
        return index;
    }
    let mut module = Module::new("<repl>", None);
    if let Some(core) = state.find_module("core") {
        module.imports.push(core);
    }
    state.add_module(module)
}
