//! Metamethod lookup.
//!
//! Arithmetic and comparison dispatch tries the left operand's metatable
//! first, then the right's (spec.md §4.1 "metamethod dispatch order").
//! `__index`/`__newindex` chaining (a metatable's `__index` can itself be a
//! table, not just a function) is handled inline in `vm::mod` since it needs
//! to loop.

use crate::heap::Heap;
use crate::value::{HeapId, Value};

/// Finds `name` (a heap string id from `Vm::meta_names`) on `value`'s
/// metatable, if it has one and the entry isn't itself nil. Tables and
/// userdata are the only value kinds that carry a metatable (spec.md §4.1:
/// "Each table or userdata optionally carries a metatable").
#[must_use]
pub fn lookup(heap: &Heap, value: Value, name: HeapId) -> Option<Value> {
    let mt_id = match value {
        Value::Table(id) => heap.as_table(id).metatable,
        Value::Userdata(id) => heap.as_userdata(id).metatable,
        _ => return None,
    }?;
    let v = heap.as_table(mt_id).get(Value::Str(name));
    if v.is_nil() {
        None
    } else {
        Some(v)
    }
}

#[must_use]
pub fn lookup_binary(heap: &Heap, lhs: Value, rhs: Value, name: HeapId) -> Option<Value> {
    lookup(heap, lhs, name).or_else(|| lookup(heap, rhs, name))
}
