//! Identifier/string interning.
//!
//! `spec.md` §3 requires interning for "all identifier-derived strings ...
//! so that property lookup is hash-based". This module provides that: an
//! `Interner` maps `&str` to a dense `StringId`, deduplicating on insert.
//! Literal user strings are *not* required to go through this table (the
//! compiler may still intern them for constant-pool dedup, see
//! `bytecode::builder::CodeBuilder::add_const`), but every global name,
//! table key built from an identifier, and upvalue/local name does.
//!
//! Modeled on the teacher's `intern::InternerBuilder`/`StringId`, with the
//! pre-interned-slots idea reused for a handful of well-known metamethod
//! names so hot-path metatable lookups avoid re-hashing `"__index"` et al.

use ahash::AHashMap;

/// Index into the interner's storage. Copy + 4 bytes, like the teacher's
/// `StringId(u32)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct StringId(u32);

impl StringId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Pre-interned metamethod names, assigned at `Interner::new()` so hot
/// dispatch paths (`vm::metatable`) can compare `StringId`s instead of
/// hashing `"__index"` on every table miss.
pub mod well_known {
    use super::StringId;

    pub const INDEX: StringId = StringId(0);
    pub const NEWINDEX: StringId = StringId(1);
    pub const ADD: StringId = StringId(2);
    pub const SUB: StringId = StringId(3);
    pub const MUL: StringId = StringId(4);
    pub const DIV: StringId = StringId(5);
    pub const MOD: StringId = StringId(6);
    pub const POW: StringId = StringId(7);
    pub const UNM: StringId = StringId(8);
    pub const BAND: StringId = StringId(9);
    pub const BOR: StringId = StringId(10);
    pub const BXOR: StringId = StringId(11);
    pub const SHL: StringId = StringId(12);
    pub const SHR: StringId = StringId(13);
    pub const BNOT: StringId = StringId(14);
    pub const EQ: StringId = StringId(15);
    pub const LT: StringId = StringId(16);
    pub const LE: StringId = StringId(17);
    pub const LEN: StringId = StringId(18);
    pub const CONCAT: StringId = StringId(19);
    pub const CALL: StringId = StringId(20);
    pub const TOSTRING: StringId = StringId(21);
    pub const PAIRS: StringId = StringId(22);
    pub const GC: StringId = StringId(23);

    pub(crate) const NAMES: &[&str] = &[
        "__index",
        "__newindex",
        "__add",
        "__sub",
        "__mul",
        "__div",
        "__mod",
        "__pow",
        "__unm",
        "__band",
        "__bor",
        "__bxor",
        "__shl",
        "__shr",
        "__bnot",
        "__eq",
        "__lt",
        "__le",
        "__len",
        "__concat",
        "__call",
        "__tostring",
        "__pairs",
        "__gc",
    ];
}

/// Deduplicating string table, shared by the resolver, compiler and VM.
#[derive(Debug, Default)]
pub struct Interner {
    map: AHashMap<Box<str>, StringId>,
    strings: Vec<Box<str>>,
}

impl Interner {
    pub fn new() -> Self {
        let mut interner = Self::default();
        for name in well_known::NAMES {
            let id = interner.intern(name);
            debug_assert_eq!(interner.strings.len() - 1, id.index());
        }
        interner
    }

    pub fn intern(&mut self, s: &str) -> StringId {
        if let Some(&id) = self.map.get(s) {
            return id;
        }
        let id = StringId(self.strings.len().try_into().expect("string table overflow"));
        self.strings.push(s.into());
        self.map.insert(s.into(), id);
        id
    }

    #[must_use]
    pub fn get(&self, id: StringId) -> &str {
        &self.strings[id.index()]
    }

    pub fn resolve(&self, s: &str) -> Option<StringId> {
        self.map.get(s).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedups_on_insert() {
        let mut interner = Interner::new();
        let a = interner.intern("foo");
        let b = interner.intern("foo");
        assert_eq!(a, b);
    }

    #[test]
    fn well_known_slots_match() {
        let interner = Interner::new();
        assert_eq!(interner.get(well_known::INDEX), "__index");
        assert_eq!(interner.get(well_known::GC), "__gc");
    }
}
