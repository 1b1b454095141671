//! Compiled bytecode for one function.
//!
//! Shaped after the teacher's `Code`/`ConstPool`/`LocationEntry`: a flat
//! instruction stream, a constant pool, and a parallel line table for
//! tracebacks. The teacher's `ExceptionEntry` table has no counterpart
//! here — protected calls (`pcall`/`xpcall`) are implemented by
//! `vm::mod::call_protected` as an ordinary native recursive call whose
//! `Result::Err` is caught at the call site, not by consulting a
//! bytecode-level handler table (see DESIGN.md).

use crate::bytecode::op::Instruction;

/// A literal value baked into a function at compile time. Distinct from
/// `value::Value` because constants are loaded into the heap lazily
/// (`LoadK` interns/allocates the string the first time it executes,
/// see `vm::mod::exec_loadk`) rather than at compile time, when no `Heap`
/// exists yet.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum Const {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Code {
    instructions: Vec<Instruction>,
    constants: Vec<Const>,
    /// `lines[i]` is the source line for `instructions[i]`, used to build
    /// `error::StackFrame`s when unwinding.
    lines: Vec<u32>,
}

impl Code {
    #[must_use]
    pub fn new(instructions: Vec<Instruction>, constants: Vec<Const>, lines: Vec<u32>) -> Self {
        debug_assert_eq!(instructions.len(), lines.len());
        Self {
            instructions,
            constants,
            lines,
        }
    }

    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    #[must_use]
    pub fn constant(&self, index: u16) -> &Const {
        &self.constants[index as usize]
    }

    #[must_use]
    pub fn line_for(&self, pc: usize) -> u32 {
        self.lines.get(pc).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}
