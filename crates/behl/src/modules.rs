//! `import` resolution: the builtin-cache/relative-file/search-path lookup
//! chain the `import` native drives, plus the cache that makes every module
//! run at most once per [`crate::vm::Vm`].
//!
//! There's no `ModuleLoader` trait or boxed closure here because
//! [`crate::closure::NativeFn`] is a plain `fn` pointer (see that type's
//! doc comment) — a native can't capture an engine or a cache by closing
//! over it. So the cache and search path live directly on `Vm` as
//! [`ModuleState`], reachable from the `import` native through
//! `host::State::vm`, the same way `globals` and `heap` are.

use std::path::{Path, PathBuf};

use ahash::AHashMap;

use crate::error::RuntimeError;
use crate::host::State;
use crate::value::Value;
use crate::vm::Vm;

/// Names resolved against the builtin table cache rather than the
/// filesystem. `import("math")` and the bare global `math` are the same
/// table.
const BUILTIN_MODULES: &[&str] = &["math"];

/// Per-`Vm` module cache and search configuration. Lives on [`Vm`] so the
/// `import` native (a plain `fn`, see module doc) can reach it.
pub struct ModuleState {
    /// Keyed by canonical path, so two different-looking import names that
    /// resolve to the same file share one run.
    cache: AHashMap<String, Value>,
    search_paths: Vec<PathBuf>,
    /// The directory imports currently resolve relative to, one entry per
    /// nesting level of `import`. Starts with the entry script's directory.
    dir_stack: Vec<PathBuf>,
}

impl ModuleState {
    pub fn new(entry_dir: PathBuf, search_paths: Vec<PathBuf>) -> Self {
        Self { cache: AHashMap::new(), search_paths, dir_stack: vec![entry_dir] }
    }

    fn current_dir(&self) -> PathBuf {
        self.dir_stack.last().cloned().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Replaces the base entry directory imports fall back to once any
    /// nested `import` calls have unwound, without touching the cache.
    /// Used when one `Engine` runs several top-level scripts in sequence.
    pub fn set_entry_dir(&mut self, dir: PathBuf) {
        if self.dir_stack.is_empty() {
            self.dir_stack.push(dir);
        } else {
            self.dir_stack[0] = dir;
        }
    }
}

/// The `import` native registered into every engine's globals.
pub(crate) fn import(state: &mut State) -> Result<i32, RuntimeError> {
    let name_id = state.check_str(0)?;
    let name = state.vm().heap.as_str(name_id).to_string();
    let value = resolve(state.vm(), &name)?;
    Ok(state.push(value))
}

fn is_relative_name(name: &str) -> bool {
    name.starts_with("./") || name.starts_with("../")
}

fn resolve(vm: &mut Vm, name: &str) -> Result<Value, RuntimeError> {
    if !is_relative_name(name) && BUILTIN_MODULES.contains(&name) {
        let globals = vm.globals_table();
        let key = vm.heap.alloc_str(name);
        return Ok(vm.heap.as_table(globals).get(Value::Str(key)));
    }

    let path = locate_file(vm, name)?;
    let canonical = std::fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
    let cache_key = canonical.to_string_lossy().into_owned();
    if let Some(v) = vm.modules.cache.get(&cache_key) {
        return Ok(*v);
    }

    let source = std::fs::read_to_string(&path)
        .map_err(|e| RuntimeError::host(format!("cannot read module '{name}' at {}: {e}", path.display())))?;
    let dir = path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
    vm.modules.dir_stack.push(dir);
    let result = run_module(vm, &source, &path);
    vm.modules.dir_stack.pop();
    let value = result?;

    vm.pin(value);
    vm.modules.cache.insert(cache_key, value);
    Ok(value)
}

/// Resolution order: `name.behl` next to the importing file, then
/// `modules/name.behl` next to it, then each configured search path. A
/// `./`/`../` prefix skips straight to the first form and never falls
/// through to `modules/` or the search path.
fn locate_file(vm: &Vm, name: &str) -> Result<PathBuf, RuntimeError> {
    let dir = vm.modules.current_dir();

    let direct = dir.join(format!("{name}.behl"));
    if direct.is_file() {
        return Ok(direct);
    }
    if is_relative_name(name) {
        return Err(RuntimeError::host(format!("module '{name}' not found (looked at {})", direct.display())));
    }

    let nested = dir.join("modules").join(format!("{name}.behl"));
    if nested.is_file() {
        return Ok(nested);
    }
    for search_dir in &vm.modules.search_paths {
        let candidate = search_dir.join(format!("{name}.behl"));
        if candidate.is_file() {
            return Ok(candidate);
        }
    }
    Err(RuntimeError::host(format!("module '{name}' not found")))
}

fn run_module(vm: &mut Vm, source: &str, path: &Path) -> Result<Value, RuntimeError> {
    let file = path.to_string_lossy().into_owned();
    let mut program = crate::ast::Program::new(file);
    crate::parser::parse(source, &mut program).map_err(|e| RuntimeError::host(e.to_string()))?;
    crate::resolver::Resolver::new(&mut program).resolve().map_err(|e| RuntimeError::host(e.to_string()))?;
    let proto = crate::bytecode::compiler::compile_program(&program).map_err(|e| RuntimeError::host(e.to_string()))?;
    vm.run_proto(proto)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_module_list_has_no_relative_entries() {
        assert!(BUILTIN_MODULES.iter().all(|n| !is_relative_name(n)));
    }

    #[test]
    fn relative_name_detection() {
        assert!(is_relative_name("./sibling"));
        assert!(is_relative_name("../up"));
        assert!(!is_relative_name("sibling"));
    }
}
