//! Closures and the upvalue cells they share.
//!
//! Each upvalue is its own heap object (`heap::Object::Upvalue`) so that
//! two closures created from the same enclosing frame can reference the
//! *same* cell by `HeapId` — required for spec.md §8 scenario 1 ("two
//! closures over the same counter observe each other's mutations"). A cell
//! starts `Open`, pointing at a live register in some still-running frame,
//! and is `Close`d (its value copied in) when that frame returns or the
//! block exits (see `vm::frame::Frame::close_upvalues_from`).

use crate::proto::ProtoRef;
use crate::value::{HeapId, Value};

#[derive(Debug, Clone, Copy)]
pub enum UpvalueCell {
    /// Points at register `reg` of the frame at call-stack depth `frame`.
    Open { frame: usize, reg: u16 },
    Closed(Value),
}

#[derive(Debug)]
pub struct Closure {
    pub proto: ProtoRef,
    /// One heap id per `proto.upvalues` entry, each addressing a
    /// `heap::Object::Upvalue`.
    pub upvalues: Vec<HeapId>,
}

/// A host function registered through `host::Host::register` or a
/// standard-library builtin. Carries no upvalues of its own; host state is
/// reached through the `State` handed to it at call time.
pub type NativeFn = fn(&mut crate::host::State) -> Result<i32, crate::error::RuntimeError>;

pub struct Native {
    pub name: String,
    pub func: NativeFn,
}

impl std::fmt::Debug for Native {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Native").field("name", &self.name).finish()
    }
}
