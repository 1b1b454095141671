//! The embeddable public surface, wiring the lexer, parser, resolver,
//! bytecode compiler and VM into one pipeline per script run.
//!
//! Shaped like the teacher's `Executor`: a struct built once from source and
//! run with a plain method call. This crate's host calls are synchronous
//! (`host::State::call` recurses straight into `Vm::call_value`), so none of
//! the teacher's `RunSnapshot`/`Snapshot`/`RunProgress` pause-and-resume
//! machinery for suspending at an external call carries over; there is
//! nothing here to pause for.

use std::path::{Path, PathBuf};

use crate::ast::Program;
use crate::error::{RuntimeError, ScriptError};
use crate::host::HostFn;
use crate::table::Table;
use crate::value::Value;
use crate::vm::Vm;

/// Tuning knobs for one [`Engine`].
pub struct EngineConfig {
    /// Bytes of allocation debt the incremental collector lets accrue
    /// before running a step. See `heap::Heap::step_size`.
    pub gc_step_size: usize,
    /// Extra directories `import` searches after the importing file's own
    /// directory and its `modules/` subdirectory.
    pub search_paths: Vec<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { gc_step_size: 1 << 16, search_paths: Vec::new() }
    }
}

/// One script instance: a heap, a globals table, and the module cache and
/// search configuration `import` resolves against.
pub struct Engine {
    vm: Vm,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let mut vm = Vm::new(config.gc_step_size);
        crate::builtins::install(&mut vm);
        vm.configure_modules(PathBuf::from("."), config.search_paths);
        Self { vm }
    }

    /// Direct access to the underlying VM, for callers that need to read or
    /// poke at globals/heap state `Engine`'s surface doesn't expose.
    pub fn vm(&mut self) -> &mut Vm {
        &mut self.vm
    }

    /// Registers a host function as a global, in addition to the builtins
    /// installed at construction.
    pub fn register(&mut self, entry: &HostFn) {
        let f = crate::host::make_native(&mut self.vm, entry);
        let name = self.vm.heap.alloc_str(entry.name);
        let globals = self.vm.globals_table();
        self.vm.heap.as_table_mut(globals).set(Value::Str(name), f).expect("string key is always valid");
    }

    /// Installs a table of native functions under `table_name` in globals,
    /// the same shape `builtins::install` uses for `math`.
    pub fn register_module(&mut self, table_name: &str, entries: &[HostFn]) {
        let table_id = self.vm.heap.alloc_table(Table::new());
        for entry in entries {
            let f = crate::host::make_native(&mut self.vm, entry);
            let name = self.vm.heap.alloc_str(entry.name);
            self.vm.heap.as_table_mut(table_id).set(Value::Str(name), f).expect("string key is always valid");
        }
        let key = self.vm.heap.alloc_str(table_name);
        let globals = self.vm.globals_table();
        self.vm.heap.as_table_mut(globals).set(Value::Str(key), Value::Table(table_id)).expect("string key is always valid");
    }

    /// Compiles and runs `source`, attributing errors to `filename`. Relative
    /// `import`s resolve against the current entry directory (`"."` unless
    /// `run_file` has been called on this engine before).
    pub fn eval(&mut self, source: &str, filename: &str) -> Result<Value, ScriptError> {
        self.run_program(source, filename)
    }

    /// Reads `path` from disk and runs it, pointing relative `import`s at
    /// its parent directory for the duration of the run (and for any later
    /// `eval`/`run_file` call on this engine, until changed again).
    pub fn run_file(&mut self, path: impl AsRef<Path>) -> Result<Value, ScriptError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| ScriptError::from(RuntimeError::host(format!("cannot read {}: {e}", path.display()))))?;
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
        self.vm.set_entry_dir(dir);
        self.run_program(&source, &path.to_string_lossy())
    }

    /// Runs the incremental collector to completion.
    pub fn collect_garbage(&mut self) {
        self.vm.collect_garbage();
    }

    fn run_program(&mut self, source: &str, filename: &str) -> Result<Value, ScriptError> {
        let mut program = Program::new(filename);
        crate::parser::parse(source, &mut program)?;
        crate::resolver::Resolver::new(&mut program).resolve()?;
        let proto = crate::bytecode::compiler::compile_program(&program)?;
        Ok(self.vm.run_proto(proto)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluates_arithmetic() {
        let mut engine = Engine::new(EngineConfig::default());
        let result = engine.eval("return 1 + 2 * 3;", "<test>").unwrap();
        assert!(matches!(result, Value::Int(7)));
    }

    #[test]
    fn registered_host_function_is_callable() {
        fn double(state: &mut crate::host::State) -> Result<i32, RuntimeError> {
            let n = state.check_int(0)?;
            Ok(state.push_int(n * 2))
        }
        let mut engine = Engine::new(EngineConfig::default());
        engine.register(&HostFn::new("double", double));
        let result = engine.eval("return double(21);", "<test>").unwrap();
        assert!(matches!(result, Value::Int(42)));
    }

    #[test]
    fn math_module_is_reachable_through_import() {
        let mut engine = Engine::new(EngineConfig::default());
        let result = engine.eval("const m = import(\"math\"); return m.floor(3.7);", "<test>").unwrap();
        assert!(matches!(result, Value::Int(3)));
    }

    #[test]
    fn userdata_check_rejects_wrong_type_tag() {
        fn make_box(state: &mut crate::host::State) -> Result<i32, RuntimeError> {
            state.push_userdata(42);
            Ok(1)
        }
        fn unbox(state: &mut crate::host::State) -> Result<i32, RuntimeError> {
            state.check_userdata(0, 42)?;
            Ok(state.push_bool(true))
        }
        fn unbox_wrong_tag(state: &mut crate::host::State) -> Result<i32, RuntimeError> {
            state.check_userdata(0, 7)?;
            Ok(state.push_bool(true))
        }
        let mut engine = Engine::new(EngineConfig::default());
        engine.register(&HostFn::new("make_box", make_box));
        engine.register(&HostFn::new("unbox", unbox));
        engine.register(&HostFn::new("unbox_wrong_tag", unbox_wrong_tag));
        let result = engine.eval("let b = make_box(); return unbox(b);", "<test>").unwrap();
        assert!(matches!(result, Value::Bool(true)));
        let err = engine.eval("let b = make_box(); return unbox_wrong_tag(b);", "<test>");
        assert!(err.is_err());
    }

    /// A `__gc` handler captured at `setmetatable` time (`builtins::core::
    /// setmetatable`) runs once an unreachable userdata is swept
    /// (`heap::Phase::Finalizing`, `Vm::run_finalizers`).
    #[test]
    fn userdata_finalizer_runs_on_collection() {
        fn make_box(state: &mut crate::host::State) -> Result<i32, RuntimeError> {
            state.push_userdata(1);
            Ok(1)
        }
        let mut engine = Engine::new(EngineConfig::default());
        engine.register(&HostFn::new("make_box", make_box));
        engine
            .eval(
                "finalized = false
                 function make() {
                     let b = make_box()
                     setmetatable(b, {__gc = function(u){ finalized = true }})
                 }
                 make()",
                "<test>",
            )
            .unwrap();
        engine.collect_garbage();
        let result = engine.eval("return finalized;", "<test>").unwrap();
        assert!(matches!(result, Value::Bool(true)), "got: {result:?}");
    }

    #[test]
    fn syntax_error_is_reported_as_compile_error() {
        let mut engine = Engine::new(EngineConfig::default());
        let err = engine.eval("let = ;", "<test>").unwrap_err();
        assert!(matches!(err, ScriptError::Compile(_)));
    }
}
