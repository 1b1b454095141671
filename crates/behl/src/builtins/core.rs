//! Core builtins: the functions available with no `import` in every script,
//! grounded on `original_source/lib_core.cpp`'s always-installed set
//! (`print`, `type`, `pairs`, `error`, `pcall`, ...).

use crate::error::RuntimeError;
use crate::host::{HostFn, State};
use crate::value::Value;
use crate::vm::compare::raw_eq;

pub static ENTRIES: &[HostFn] = &[
    HostFn::new("print", print),
    HostFn::new("type", type_of),
    HostFn::new("typeof", type_of),
    HostFn::new("typeid", typeid),
    HostFn::new("tostring", tostring),
    HostFn::new("tonumber", tonumber),
    HostFn::new("getmetatable", getmetatable),
    HostFn::new("setmetatable", setmetatable),
    HostFn::new("rawget", rawget),
    HostFn::new("rawset", rawset),
    HostFn::new("rawequal", rawequal),
    HostFn::new("rawlen", rawlen),
    HostFn::new("pairs", pairs),
    HostFn::new("ipairs", pairs),
    HostFn::new("assert", assert_fn),
    HostFn::new("error", error_fn),
    HostFn::new("pcall", pcall),
    HostFn::new("xpcall", xpcall),
    HostFn::new("select", select),
    HostFn::new("import", crate::modules::import),
];

fn print(state: &mut State) -> Result<i32, RuntimeError> {
    let mut parts = Vec::with_capacity(state.arg_count());
    for i in 0..state.arg_count() {
        parts.push(state.display_string(state.arg(i))?);
    }
    println!("{}", parts.join("\t"));
    Ok(0)
}

fn type_of(state: &mut State) -> Result<i32, RuntimeError> {
    Ok(state.push_str(state.arg(0).kind().to_string()))
}

/// Numeric counterpart to `type`/`typeof`: the `ValueKind` variant's
/// declaration order, stable for a given build, for code that wants to
/// branch on type without string comparison.
fn typeid(state: &mut State) -> Result<i32, RuntimeError> {
    use crate::value::ValueKind as K;
    let id = match state.arg(0).kind() {
        K::Nil => 0,
        K::Bool => 1,
        K::Int => 2,
        K::Float => 3,
        K::String => 4,
        K::Table => 5,
        K::Function => 6,
        K::Userdata => 7,
    };
    Ok(state.push_int(id))
}

fn tostring(state: &mut State) -> Result<i32, RuntimeError> {
    let s = state.display_string(state.arg(0))?;
    Ok(state.push_str(s))
}

fn tonumber(state: &mut State) -> Result<i32, RuntimeError> {
    let v = match state.arg(0) {
        Value::Int(_) | Value::Float(_) => state.arg(0),
        Value::Str(id) => {
            let s = state.vm().heap.as_str(id).trim().to_string();
            if let Ok(i) = s.parse::<i64>() {
                Value::Int(i)
            } else if let Ok(f) = s.parse::<f64>() {
                Value::Float(f)
            } else {
                Value::Nil
            }
        }
        _ => Value::Nil,
    };
    Ok(state.push(v))
}

fn getmetatable(state: &mut State) -> Result<i32, RuntimeError> {
    let metatable = match state.arg(0) {
        Value::Table(id) => state.vm().heap.as_table(id).metatable,
        Value::Userdata(id) => state.vm().heap.as_userdata(id).metatable,
        v => return Err(state.error(format!("bad argument #1 (table or userdata expected, got {})", v.kind()))),
    };
    let v = match metatable {
        Some(mt) => Value::Table(mt),
        None => Value::Nil,
    };
    Ok(state.push(v))
}

/// Setting a metatable on userdata also captures a `__gc` entry's function
/// id into `Userdata::finalizer` right away (spec.md §4.1: finalizers run
/// for userdata "whose metatable carried `__gc` *at the moment it was
/// set*", not re-checked when the GC later collects it).
fn setmetatable(state: &mut State) -> Result<i32, RuntimeError> {
    let target = state.arg(0);
    let mt = match state.arg(1) {
        Value::Table(mt) => Some(mt),
        Value::Nil => None,
        v => return Err(state.error(format!("bad argument #2 to 'setmetatable' (table or nil expected, got {})", v.kind()))),
    };
    match target {
        Value::Table(id) => {
            state.vm().heap.as_table_mut(id).metatable = mt;
        }
        Value::Userdata(id) => {
            let gc_name = state.vm().meta_gc_name();
            let finalizer = mt.and_then(|mt| match state.vm().heap.as_table(mt).get(Value::Str(gc_name)) {
                Value::Function(f) => Some(f),
                _ => None,
            });
            let ud = state.vm().heap.as_userdata_mut(id);
            ud.metatable = mt;
            ud.finalizer = finalizer;
        }
        v => return Err(state.error(format!("bad argument #1 (table or userdata expected, got {})", v.kind()))),
    }
    Ok(state.push(target))
}

fn rawget(state: &mut State) -> Result<i32, RuntimeError> {
    let id = state.check_table(0)?;
    let key = state.arg(1);
    let v = state.vm().heap.as_table(id).get(key);
    Ok(state.push(v))
}

fn rawset(state: &mut State) -> Result<i32, RuntimeError> {
    let id = state.check_table(0)?;
    let key = state.arg(1);
    let value = state.arg(2);
    state.vm().heap.as_table_mut(id).set(key, value).map_err(|e| state.error(e.message))?;
    Ok(state.push(Value::Table(id)))
}

fn rawequal(state: &mut State) -> Result<i32, RuntimeError> {
    Ok(state.push_bool(raw_eq(state.arg(0), state.arg(1))))
}

fn rawlen(state: &mut State) -> Result<i32, RuntimeError> {
    let n = match state.arg(0) {
        Value::Table(id) => state.vm().heap.as_table(id).raw_len(),
        Value::Str(id) => state.vm().heap.as_str(id).len() as i64,
        v => return Err(state.error(format!("table or string expected, got {}", v.kind()))),
    };
    Ok(state.push_int(n))
}

/// `pairs`/`ipairs` are both identity functions over their table argument:
/// `vm::mod::exec_tforcall` drives iteration directly off `Table::next_key`,
/// so the "iterator" a for-in loop calls is really just the table itself
/// (see that function's doc comment for the full rationale, including why
/// `ipairs` doesn't restrict to the array part the way Lua's does). A table
/// with a `__pairs` metamethod overrides this: it's called with the table
/// and must itself return a table for `exec_tforcall` to walk.
fn pairs(state: &mut State) -> Result<i32, RuntimeError> {
    let id = state.check_table(0)?;
    let result = state.vm().pairs_source(Value::Table(id))?;
    Ok(state.push(result))
}

fn assert_fn(state: &mut State) -> Result<i32, RuntimeError> {
    if state.arg(0).is_truthy() {
        return Ok(state.push(state.arg(0)));
    }
    let message = if state.arg_count() >= 2 { state.display_string(state.arg(1))? } else { "assertion failed!".to_string() };
    Err(state.error(message))
}

fn error_fn(state: &mut State) -> Result<i32, RuntimeError> {
    let message = state.display_string(state.arg(0))?;
    Err(state.error(message))
}

/// Returns a positional `{ok, result}` table rather than two separate
/// return values: calls here are single-value (see `bytecode::compiler`
/// module doc), so a caller that wants both halves destructures this table
/// via `let ok, msg = pcall(...)`, which the compiler's `LocalDecl` lowering
/// recognizes as a call result and unpacks accordingly.
fn pack_result(state: &mut State, ok: bool, value: Value) -> i32 {
    let id = state.push_table();
    state.vm().heap.as_table_mut(id).set(Value::Int(1), Value::Bool(ok)).expect("int key is always valid");
    state.vm().heap.as_table_mut(id).set(Value::Int(2), value).expect("int key is always valid");
    1
}

fn pcall(state: &mut State) -> Result<i32, RuntimeError> {
    let func = state.arg(0);
    let args: Vec<Value> = state.args()[1.min(state.arg_count())..].to_vec();
    match state.call(func, &args) {
        Ok(v) => Ok(pack_result(state, true, v)),
        Err(e) => {
            let message = Value::Str(state.vm().heap.alloc_str(e.message));
            Ok(pack_result(state, false, message))
        }
    }
}

fn xpcall(state: &mut State) -> Result<i32, RuntimeError> {
    let func = state.arg(0);
    let handler = state.arg(1);
    let args: Vec<Value> = state.args()[2.min(state.arg_count())..].to_vec();
    match state.call(func, &args) {
        Ok(v) => Ok(pack_result(state, true, v)),
        Err(e) => {
            let message = Value::Str(state.vm().heap.alloc_str(e.message));
            let handled = state.call(handler, &[message])?;
            Ok(pack_result(state, false, handled))
        }
    }
}

/// Simplified relative to Lua's variadic `select`: `select("#", ...)` still
/// returns the argument count, but `select(n, ...)` returns only the nth
/// argument rather than every argument from `n` onward, since calls here
/// are single-value (see `bytecode::compiler` module doc).
fn select(state: &mut State) -> Result<i32, RuntimeError> {
    let start = 1.min(state.arg_count());
    if let Value::Str(id) = state.arg(0) {
        if state.vm().heap.as_str(id) == "#" {
            let rest_len = state.arg_count() - start;
            return Ok(state.push_int(rest_len as i64));
        }
    }
    let n = state.check_int(0)?;
    if n < 1 {
        return Err(state.error("bad argument #1 to 'select' (index out of range)"));
    }
    let rest = &state.args()[start..];
    Ok(state.push(rest.get(n as usize - 1).copied().unwrap_or(Value::Nil)))
}
