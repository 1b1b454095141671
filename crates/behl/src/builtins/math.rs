//! The `math` module table, grounded on `original_source/lib_core.cpp`'s
//! minimal math namespace (`floor`, `ceil`, `abs`, `sqrt`, `min`, `max`,
//! plus the `huge`/`pi` constants) rather than a full libm binding.

use crate::error::RuntimeError;
use crate::host::{HostFn, State};
use crate::value::Value;

pub static ENTRIES: &[HostFn] = &[
    HostFn::new("floor", floor),
    HostFn::new("ceil", ceil),
    HostFn::new("abs", abs),
    HostFn::new("sqrt", sqrt),
    HostFn::new("min", min),
    HostFn::new("max", max),
];

pub static CONSTANTS: &[(&str, Value)] = &[("huge", Value::Float(f64::INFINITY)), ("pi", Value::Float(std::f64::consts::PI))];

fn floor(state: &mut State) -> Result<i32, RuntimeError> {
    let n = state.check_number(0)?;
    Ok(state.push_int(n.floor() as i64))
}

fn ceil(state: &mut State) -> Result<i32, RuntimeError> {
    let n = state.check_number(0)?;
    Ok(state.push_int(n.ceil() as i64))
}

fn abs(state: &mut State) -> Result<i32, RuntimeError> {
    Ok(match state.arg(0) {
        Value::Int(i) => state.push_int(i.abs()),
        _ => state.push_float(state.check_number(0)?.abs()),
    })
}

fn sqrt(state: &mut State) -> Result<i32, RuntimeError> {
    let n = state.check_number(0)?;
    Ok(state.push_float(n.sqrt()))
}

fn min(state: &mut State) -> Result<i32, RuntimeError> {
    let mut best = state.check_number(0)?;
    for i in 1..state.arg_count() {
        best = best.min(state.check_number(i)?);
    }
    Ok(state.push_float(best))
}

fn max(state: &mut State) -> Result<i32, RuntimeError> {
    let mut best = state.check_number(0)?;
    for i in 1..state.arg_count() {
        best = best.max(state.check_number(i)?);
    }
    Ok(state.push_float(best))
}
