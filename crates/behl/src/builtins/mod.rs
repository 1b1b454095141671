//! Standard library installed into every [`crate::Engine`]'s globals table.
//!
//! Grounded on `original_source/lib_core.cpp`'s builtin registration (a flat
//! table of name/function pairs installed into the global namespace at
//! startup) and the teacher's equivalent `builtins` module, generalized to
//! this language's value/table model.

mod core;
mod math;

use crate::host::{make_native, HostFn};
use crate::table::Table;
use crate::value::Value;
use crate::vm::Vm;

/// Installs every core builtin plus the `math` module table into `vm`'s
/// globals. Called once by `Engine::new`.
pub fn install(vm: &mut Vm) {
    for entry in core::ENTRIES {
        register_global(vm, entry);
    }

    let math_table = Table::new();
    let math_id = vm.heap.alloc_table(math_table);
    for entry in math::ENTRIES {
        let f = make_native(vm, entry);
        let name = vm.heap.alloc_str(entry.name);
        vm.heap.as_table_mut(math_id).set(Value::Str(name), f).expect("string key is always valid");
    }
    for (name, value) in math::CONSTANTS {
        let key = vm.heap.alloc_str(*name);
        vm.heap.as_table_mut(math_id).set(Value::Str(key), *value).expect("string key is always valid");
    }
    let math_name = vm.heap.alloc_str("math");
    let globals = vm.globals_table();
    vm.heap.as_table_mut(globals).set(Value::Str(math_name), Value::Table(math_id)).expect("string key is always valid");
}

fn register_global(vm: &mut Vm, entry: &HostFn) {
    let f = make_native(vm, entry);
    let name = vm.heap.alloc_str(entry.name);
    let globals = vm.globals_table();
    vm.heap.as_table_mut(globals).set(Value::Str(name), f).expect("string key is always valid");
}
