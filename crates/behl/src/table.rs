//! Tables: the language's one composite data structure, with a dense array
//! part for small positive integer keys and an order-preserving hash part
//! for everything else.
//!
//! Grounded on the teacher's `types/dict.rs` (`IndexMap<u64, Vec<(Value,
//! Value)>>` for insertion-order iteration), generalized per spec.md §4.1:
//! numeric keys are identity-folded (`1` and `1.0` address the same slot),
//! `nil` and `NaN` are rejected as keys, and small contiguous integer keys
//! live in a separate `Vec` so that array-style tables (`{1, 2, 3}`) don't
//! pay hash-map overhead per element.

use indexmap::IndexMap;

use crate::error::RuntimeError;
use crate::value::{HeapId, NumKey, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TableKey {
    Bool(bool),
    Num(NumKey),
    /// Canonical heap id of an interned string (see `heap::Heap::intern_str`):
    /// two strings with equal content always share a `HeapId`, so comparing
    /// ids is equivalent to comparing content.
    Str(HeapId),
    /// Table or function identity key.
    Obj(HeapId),
}

fn to_table_key(value: Value) -> Result<TableKey, RuntimeError> {
    match value {
        Value::Nil => Err(RuntimeError::type_error("table index is nil")),
        Value::Bool(b) => Ok(TableKey::Bool(b)),
        Value::Int(i) => Ok(TableKey::Num(NumKey::Int(i))),
        Value::Float(f) => {
            NumKey::from_f64(f).map(TableKey::Num).ok_or_else(|| RuntimeError::type_error("table index is NaN"))
        }
        Value::Str(id) => Ok(TableKey::Str(id)),
        Value::Table(id) | Value::Function(id) => Ok(TableKey::Obj(id)),
        Value::Userdata(_) => Err(RuntimeError::type_error("table index is userdata")),
    }
}

#[derive(Debug, Clone, Default)]
pub struct Table {
    /// Slot `i` holds the value for integer key `i + 1`. A `Nil` entry is a
    /// hole; holes do not shrink `array`, matching the border ambiguity the
    /// language deliberately inherits around `#t` (spec.md §4.1 Open
    /// Question "array holes").
    array: Vec<Value>,
    hash: IndexMap<TableKey, Value, ahash::RandomState>,
    pub metatable: Option<HeapId>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: Value) -> Value {
        if let Value::Int(i) = key {
            if i >= 1 && (i as usize) <= self.array.len() {
                return self.array[i as usize - 1];
            }
        }
        let Ok(key) = to_table_key(key) else {
            return Value::Nil;
        };
        self.hash.get(&key).copied().unwrap_or(Value::Nil)
    }

    pub fn set(&mut self, key: Value, value: Value) -> Result<(), RuntimeError> {
        if let Value::Int(i) = key {
            if i >= 1 && (i as usize) <= self.array.len() {
                self.array[i as usize - 1] = value;
                return Ok(());
            }
            if i >= 1 && i as usize == self.array.len() + 1 && !value.is_nil() {
                self.array.push(value);
                self.absorb_from_hash();
                return Ok(());
            }
        }
        let key = to_table_key(key)?;
        if value.is_nil() {
            self.hash.shift_remove(&key);
        } else {
            self.hash.insert(key, value);
        }
        Ok(())
    }

    /// After appending to the array part, pull any now-contiguous integer
    /// keys out of the hash part (e.g. `t[4] = x` was set before `t[3]`
    /// existed, then `t[3] = y` makes key 4 eligible to migrate).
    fn absorb_from_hash(&mut self) {
        loop {
            let next = self.array.len() as i64 + 1;
            let key = TableKey::Num(NumKey::Int(next));
            match self.hash.shift_remove(&key) {
                Some(v) => self.array.push(v),
                None => break,
            }
        }
    }

    /// Raw length: the array part's length, ignoring any hash-part integer
    /// keys beyond it. Matches spec.md §4.1's `#` operator on array-like
    /// tables; tables with holes or sparse numeric keys have no single
    /// well-defined border, so this simplification is the documented
    /// behavior rather than an oversight.
    #[must_use]
    pub fn raw_len(&self) -> i64 {
        self.array.len() as i64
    }

    #[must_use]
    pub fn array_len(&self) -> usize {
        self.array.len()
    }

    /// Iterates in `pairs()` order: array part first (by index), then hash
    /// part in insertion order. Stable across calls as long as the table
    /// isn't mutated in between (spec.md §8 scenario 2).
    pub fn iter(&self) -> impl Iterator<Item = (Value, Value)> + '_ {
        self.array
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_nil())
            .map(|(i, v)| (Value::Int(i as i64 + 1), *v))
            .chain(self.hash.iter().map(|(k, v)| (key_to_value(*k), *v)))
    }

    /// Key that follows `key` in iteration order, for the stateless
    /// `pairs_next` iterator protocol (spec.md §6, `lib_core.cpp`'s
    /// `pairs_next`). `None` for `key == Value::Nil` means "start of
    /// iteration"; `None` otherwise means iteration is finished.
    pub fn next_key(&self, key: Value) -> Option<(Value, Value)> {
        if key.is_nil() {
            return self.iter().next();
        }
        let mut it = self.iter();
        for (k, _) in it.by_ref() {
            if values_raw_eq(k, key) {
                return it.next();
            }
        }
        None
    }
}

fn key_to_value(key: TableKey) -> Value {
    match key {
        TableKey::Bool(b) => Value::Bool(b),
        TableKey::Num(NumKey::Int(i)) => Value::Int(i),
        TableKey::Num(NumKey::Float(bits)) => Value::Float(f64::from_bits(bits)),
        TableKey::Str(id) => Value::Str(id),
        TableKey::Obj(id) => Value::Table(id),
    }
}

fn values_raw_eq(a: Value, b: Value) -> bool {
    match (a, b) {
        (Value::Nil, Value::Nil) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Float(a), Value::Float(b)) => a == b,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Table(a), Value::Table(b)) | (Value::Function(a), Value::Function(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_and_float_keys_share_a_slot() {
        let mut t = Table::new();
        t.set(Value::Int(1), Value::Int(100)).unwrap();
        assert!(matches!(t.get(Value::Float(1.0)), Value::Int(100)));
    }

    #[test]
    fn nil_key_is_rejected() {
        let mut t = Table::new();
        assert!(t.set(Value::Nil, Value::Int(1)).is_err());
    }

    #[test]
    fn nan_key_is_rejected() {
        let mut t = Table::new();
        assert!(t.set(Value::Float(f64::NAN), Value::Int(1)).is_err());
    }

    #[test]
    fn array_part_preserves_order() {
        let mut t = Table::new();
        for i in 1..=5 {
            t.set(Value::Int(i), Value::Int(i * 10)).unwrap();
        }
        let collected: Vec<i64> = t.iter().map(|(_, v)| v.as_int().unwrap()).collect();
        assert_eq!(collected, vec![10, 20, 30, 40, 50]);
        assert_eq!(t.raw_len(), 5);
    }

    #[test]
    fn out_of_order_integer_keys_absorb_into_array() {
        let mut t = Table::new();
        t.set(Value::Int(2), Value::Int(20)).unwrap();
        t.set(Value::Int(1), Value::Int(10)).unwrap();
        assert_eq!(t.raw_len(), 2);
    }
}
