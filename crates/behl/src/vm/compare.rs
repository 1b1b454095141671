//! Equality and ordering, including metamethod fallback.
//!
//! Raw equality (`==` with no metamethod involved) mirrors
//! `table::values_raw_eq`: numbers compare across int/float by value,
//! strings by heap identity (interned, so this is also content equality),
//! everything else by reference. Ordering (`<`/`<=`) never implicitly
//! coerces across types the way some scripting languages do — comparing a
//! string to a number is a type error unless a metamethod handles it,
//! matching spec.md §4.1 "comparison is type-homogeneous except for
//! numbers."

use crate::error::RuntimeError;
use crate::heap::Heap;
use crate::intern::well_known;
use crate::value::Value;
use crate::vm::metatable;
use crate::vm::Vm;

pub fn raw_eq(a: Value, b: Value) -> bool {
    match (a, b) {
        (Value::Nil, Value::Nil) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Float(a), Value::Float(b)) => a == b,
        (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => a as f64 == b,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Table(a), Value::Table(b)) | (Value::Function(a), Value::Function(b)) | (Value::Userdata(a), Value::Userdata(b)) => a == b,
        _ => false,
    }
}

impl Vm {
    pub fn value_eq(&mut self, a: Value, b: Value) -> Result<bool, RuntimeError> {
        if raw_eq(a, b) {
            return Ok(true);
        }
        if matches!((a, b), (Value::Table(_), Value::Table(_)) | (Value::Userdata(_), Value::Userdata(_))) {
            let name = self.meta_names[well_known::EQ.index()];
            if let Some(handler) = metatable::lookup_binary(&self.heap, a, b, name) {
                let result = self.call_value(handler, &[a, b])?;
                return Ok(result.is_truthy());
            }
        }
        Ok(false)
    }

    /// `a < b`. Numbers compare numerically (mixed int/float promotes to
    /// float); strings compare lexicographically by byte content; anything
    /// else falls back to `__lt`, else a type error.
    pub fn value_lt(&mut self, a: Value, b: Value) -> Result<bool, RuntimeError> {
        if let (Some(x), Some(y)) = (numeric_order_key(a), numeric_order_key(b)) {
            return Ok(x < y);
        }
        if let (Value::Str(x), Value::Str(y)) = (a, b) {
            return Ok(self.heap.as_str(x) < self.heap.as_str(y));
        }
        let name = self.meta_names[well_known::LT.index()];
        if let Some(handler) = metatable::lookup_binary(&self.heap, a, b, name) {
            let result = self.call_value(handler, &[a, b])?;
            return Ok(result.is_truthy());
        }
        Err(RuntimeError::type_error(format!("attempt to compare {} with {}", a.kind(), b.kind())))
    }

    pub fn value_le(&mut self, a: Value, b: Value) -> Result<bool, RuntimeError> {
        if let (Some(x), Some(y)) = (numeric_order_key(a), numeric_order_key(b)) {
            return Ok(x <= y);
        }
        if let (Value::Str(x), Value::Str(y)) = (a, b) {
            return Ok(self.heap.as_str(x) <= self.heap.as_str(y));
        }
        let name = self.meta_names[well_known::LE.index()];
        if let Some(handler) = metatable::lookup_binary(&self.heap, a, b, name) {
            let result = self.call_value(handler, &[a, b])?;
            return Ok(result.is_truthy());
        }
        Err(RuntimeError::type_error(format!("attempt to compare {} with {}", a.kind(), b.kind())))
    }
}

fn numeric_order_key(v: Value) -> Option<f64> {
    v.as_f64()
}
