//! The host embedding surface: how Rust code registers native functions and
//! exchanges values with them.
//!
//! Modeled on the teacher's calling convention for builtins (`lib_core.cpp`
//! in `original_source/`, where a C function receives an interpreter handle
//! and an argument count and pushes results back onto a shared stack) rather
//! than a typed Rust closure per function: every [`closure::NativeFn`] has
//! the same signature, `fn(&mut State) -> Result<i32, RuntimeError>`, and
//! reads its arguments and writes its results through `State` the way a
//! Lua `lua_CFunction` does through `lua_State`. This keeps registering a
//! builtin a matter of writing one more `fn` and one `Engine::register`
//! call, with no generic dispatch machinery.

use crate::closure::{Native, NativeFn};
use crate::error::RuntimeError;
use crate::table::Table;
use crate::value::{HeapId, Value};
use crate::vm::Vm;

/// Handed to a native function for the duration of one call. Borrows the
/// `Vm` so builtins can allocate heap objects, raise errors with full
/// access to the heap, or recursively call back into script code (e.g.
/// `pcall`).
pub struct State<'vm> {
    vm: &'vm mut Vm,
    args: Vec<Value>,
    returns: Vec<Value>,
}

impl<'vm> State<'vm> {
    pub(crate) fn new(vm: &'vm mut Vm, args: Vec<Value>) -> Self {
        Self { vm, args, returns: Vec::new() }
    }

    pub(crate) fn into_returns(self) -> Vec<Value> {
        self.returns
    }

    #[must_use]
    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    #[must_use]
    pub fn arg(&self, index: usize) -> Value {
        self.args.get(index).copied().unwrap_or(Value::Nil)
    }

    #[must_use]
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn vm(&mut self) -> &mut Vm {
        self.vm
    }

    pub fn error(&self, message: impl Into<String>) -> RuntimeError {
        RuntimeError::host(message)
    }

    pub fn push(&mut self, value: Value) -> i32 {
        self.returns.push(value);
        self.returns.len() as i32
    }

    pub fn push_nil(&mut self) -> i32 {
        self.push(Value::Nil)
    }

    pub fn push_bool(&mut self, b: bool) -> i32 {
        self.push(Value::Bool(b))
    }

    pub fn push_int(&mut self, i: i64) -> i32 {
        self.push(Value::Int(i))
    }

    pub fn push_float(&mut self, f: f64) -> i32 {
        self.push(Value::Float(f))
    }

    pub fn push_str(&mut self, s: impl Into<String> + AsRef<str>) -> i32 {
        let id = self.vm.heap.alloc_str(s);
        self.push(Value::Str(id))
    }

    pub fn push_table(&mut self) -> HeapId {
        let id = self.vm.heap.alloc_table(Table::new());
        self.push(Value::Table(id));
        id
    }

    /// Allocates a new userdata tagged with `type_tag`, a caller-chosen id
    /// for telling host-defined userdata kinds apart (spec.md §4.5), pushes
    /// it as a return value, and hands back its heap id.
    pub fn push_userdata(&mut self, type_tag: u32) -> HeapId {
        let id = self.vm.heap.alloc_userdata(type_tag);
        self.push(Value::Userdata(id));
        id
    }

    /// Checks that argument `index` is userdata tagged with `type_tag`,
    /// returning its heap id.
    pub fn check_userdata(&self, index: usize, type_tag: u32) -> Result<HeapId, RuntimeError> {
        match self.arg(index) {
            Value::Userdata(id) if self.vm.heap.as_userdata(id).type_tag == type_tag => Ok(id),
            v => Err(self.error(format!("bad argument #{} (userdata expected, got {})", index + 1, v.kind()))),
        }
    }

    pub fn display_string(&mut self, v: Value) -> Result<String, RuntimeError> {
        self.vm.display_string(v)
    }

    pub fn call(&mut self, func: Value, args: &[Value]) -> Result<Value, RuntimeError> {
        self.vm.call_value(func, args)
    }

    /// Keeps `value` reachable across GC steps for the lifetime of the
    /// `Vm`, for natives that stash a value somewhere the GC can't see (a
    /// module cache entry, say) rather than a register or the globals
    /// table.
    pub fn pin(&mut self, value: Value) {
        self.vm.pin(value);
    }

    pub fn check_table(&self, index: usize) -> Result<HeapId, RuntimeError> {
        match self.arg(index) {
            Value::Table(id) => Ok(id),
            v => Err(self.error(format!("bad argument #{} (table expected, got {})", index + 1, v.kind()))),
        }
    }

    pub fn check_str(&self, index: usize) -> Result<HeapId, RuntimeError> {
        match self.arg(index) {
            Value::Str(id) => Ok(id),
            v => Err(self.error(format!("bad argument #{} (string expected, got {})", index + 1, v.kind()))),
        }
    }

    pub fn check_number(&self, index: usize) -> Result<f64, RuntimeError> {
        self.arg(index).as_f64().ok_or_else(|| {
            self.error(format!("bad argument #{} (number expected, got {})", index + 1, self.arg(index).kind()))
        })
    }

    pub fn check_int(&self, index: usize) -> Result<i64, RuntimeError> {
        match self.arg(index) {
            Value::Int(i) => Ok(i),
            Value::Float(f) if f.fract() == 0.0 => Ok(f as i64),
            v => Err(self.error(format!("bad argument #{} (integer expected, got {})", index + 1, v.kind()))),
        }
    }
}

/// A registered pair of (name, function), the unit `engine::Engine::register`
/// and `builtins::install` both work in terms of.
pub struct HostFn {
    pub name: &'static str,
    pub func: NativeFn,
}

impl HostFn {
    #[must_use]
    pub const fn new(name: &'static str, func: NativeFn) -> Self {
        Self { name, func }
    }
}

pub(crate) fn make_native(vm: &mut Vm, entry: &HostFn) -> Value {
    let id = vm.heap.alloc_native(Native { name: entry.name.to_string(), func: entry.func });
    Value::Function(id)
}
