//! Compiled function prototypes: the immutable half of a closure.
//!
//! A `Proto` is produced once by `bytecode::compiler::Compiler` and then
//! shared by every closure created from it (`function f() {}` inside a
//! loop produces N closures, one `Proto`). Protos never participate in
//! reference cycles and are never mutated after compilation, so unlike
//! `Closure` they are not GC heap objects: they live in an `Rc` and are
//! kept alive by whichever closures (or the `Engine`, for the module's
//! top-level proto) still reference them.

use std::rc::Rc;

use crate::ast::CodeRange;
use crate::bytecode::code::Code;

/// Describes where a closure's Nth upvalue comes from when the closure is
/// created (`CLOSURE` opcode, see `vm::mod::exec_closure`).
#[derive(Debug, Clone, Copy)]
pub enum UpvalDesc {
    /// Captures the enclosing function's local register `index`.
    ParentLocal(u16),
    /// Captures the enclosing function's own upvalue `index` (re-export,
    /// for upvalues captured two or more scopes out).
    ParentUpvalue(u16),
}

#[derive(Debug)]
pub struct Proto {
    pub name: Option<String>,
    pub num_params: u16,
    pub is_vararg: bool,
    pub num_registers: u16,
    pub code: Code,
    pub upvalues: Vec<UpvalDesc>,
    /// Child function prototypes, indexed by the `b` operand of `CLOSURE`.
    pub children: Vec<ProtoRef>,
    pub source: String,
    pub pos: CodeRange,
}

pub type ProtoRef = Rc<Proto>;
