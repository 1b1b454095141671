//! Arena-allocated AST.
//!
//! Grounded on `expressions.rs`'s tagged-node-per-kind style and on
//! `examples/original_source/src/ast/ast.hpp`'s node catalogue (in
//! particular the split between generic `Assign`/`CompoundAssign`/
//! `Increment`/`Decrement` and their `*Local`/`*Global`/`*Upvalue` lowered
//! siblings, which only the semantic pass produces — see `resolver.rs`).
//!
//! Rather than the C++ original's bump allocator with intrusive
//! `next_sibling` pointers, nodes live in a flat `Vec<Node>` owned by
//! [`Program`] and are addressed by [`NodeId`] (a plain index). This is the
//! idiomatic Rust shape of the same idea: allocation is still O(1) bump-push,
//! the whole tree is freed in one deallocation when `Program` drops, and
//! variadic children are `Vec<NodeId>` instead of a linked list — no raw
//! pointers, no lifetimes to thread through the compiler.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CodeRange {
    pub line: u32,
    pub column: u32,
}

impl CodeRange {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

pub type NodeId = u32;
pub type FunctionId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    BAnd,
    BOr,
    BXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Concat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
    Len,
    BNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncDecOp {
    Inc,
    Dec,
}

#[derive(Debug, Clone)]
pub enum TableField {
    Positional(NodeId),
    /// `{ name = expr }` — key is an identifier used as a string key.
    Named(String, NodeId),
    /// `{ [expr] = expr }`
    Keyed(NodeId, NodeId),
}

/// Where an identifier reference resolves to, filled in by `resolver::Resolver`.
/// Unresolved source identifiers start as `Expr::Ident` and are rewritten to
/// one of `Local`/`Upvalue`/`Global` in place (same `NodeId`, see
/// `resolver.rs`'s `resolve_ident`).
#[derive(Debug, Clone)]
pub enum Expr {
    Nil,
    True,
    False,
    Int(i64),
    Float(f64),
    Str(String),
    Vararg,

    Ident(String),
    Local(u16),
    Upvalue(u16),
    Global(String),

    Unary(UnOp, NodeId),
    Binary(BinOp, NodeId, NodeId),
    Logical(LogicalOp, NodeId, NodeId),
    Ternary(NodeId, NodeId, NodeId),

    Call(NodeId, Vec<NodeId>),
    /// `expr:meth(args)`, desugared by the resolver into a `Member` load
    /// plus a cloned receiver prepended to `args` (spec.md §4.1 "Method
    /// desugaring"). Only present between parsing and the resolver pass.
    MethodCall(NodeId, String, Vec<NodeId>),

    Member(NodeId, String),
    Index(NodeId, NodeId),

    TableCtor(Vec<TableField>),
    FuncExpr(FunctionId),
}

#[derive(Debug, Clone)]
pub enum Stmt {
    ExprStmt(NodeId),

    LocalDecl {
        names: Vec<String>,
        is_const: Vec<bool>,
        /// Resolved slot for each name, filled in by the resolver.
        slots: Vec<u16>,
        values: Vec<NodeId>,
    },

    /// Target is a table-index or member expression (`t[k] = v`, `o.f = v`).
    /// Plain-identifier targets are lowered to one of the three variants
    /// below by the resolver and never reach the compiler as `Assign`.
    Assign {
        target: NodeId,
        value: NodeId,
    },
    AssignLocal {
        slot: u16,
        value: NodeId,
    },
    AssignGlobal {
        name: String,
        value: NodeId,
    },
    AssignUpvalue {
        index: u16,
        value: NodeId,
    },

    CompoundAssign {
        op: BinOp,
        target: NodeId,
        value: NodeId,
    },
    CompoundLocal {
        op: BinOp,
        slot: u16,
        value: NodeId,
    },
    CompoundGlobal {
        op: BinOp,
        name: String,
        value: NodeId,
    },
    CompoundUpvalue {
        op: BinOp,
        index: u16,
        value: NodeId,
    },

    IncDec {
        target: NodeId,
        op: IncDecOp,
    },
    IncDecLocal {
        slot: u16,
        op: IncDecOp,
    },
    IncDecGlobal {
        name: String,
        op: IncDecOp,
    },
    IncDecUpvalue {
        index: u16,
        op: IncDecOp,
    },

    If {
        cond: NodeId,
        then_block: Vec<NodeId>,
        elifs: Vec<(NodeId, Vec<NodeId>)>,
        else_block: Option<Vec<NodeId>>,
    },
    While {
        cond: NodeId,
        body: Vec<NodeId>,
    },
    ForC {
        init: Option<NodeId>,
        cond: Option<NodeId>,
        step: Option<NodeId>,
        body: Vec<NodeId>,
    },
    /// Numeric for: `for (i = start, stop[, step])` or the keyword-free
    /// comma form from the original grammar. `slot` is filled by the
    /// resolver.
    ForNum {
        var: String,
        slot: u16,
        start: NodeId,
        stop: NodeId,
        step: Option<NodeId>,
        body: Vec<NodeId>,
    },
    /// `for (v in iter_expr)` / `foreach (v in iter_expr)`: the generic
    /// iterator-protocol for, compiled with `TFORCALL`/`TFORLOOP`.
    ForIn {
        vars: Vec<String>,
        slots: Vec<u16>,
        iter: NodeId,
        body: Vec<NodeId>,
    },

    FuncDeclStmt {
        name: String,
        slot_hint: u16,
        func: FunctionId,
    },
    Return(Option<NodeId>),
    Break,
    Continue,
    /// `defer { ... }`: the block is lifted into its own zero-arg closure
    /// at resolve time (same capture rules as any nested function) so the
    /// compiler can push it onto the frame's defer stack with a plain
    /// `CLOSURE` + `Defer` instruction pair. See `resolver::Resolver::
    /// resolve_stmt`.
    Defer(FunctionId),
    Block(Vec<NodeId>),

    ModuleDecl,
    ExportDecl(NodeId),
    ExportList(Vec<String>),
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Expr(Expr),
    Stmt(Stmt),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub pos: CodeRange,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub is_const: bool,
}

/// One function body: parameters plus statement list. Top-level module code
/// is represented the same way (`Program::main`), so the resolver and
/// compiler only ever operate on `FunctionDef`s.
#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: Option<String>,
    pub params: Vec<Param>,
    pub is_vararg: bool,
    pub body: Vec<NodeId>,
    pub pos: CodeRange,
    /// Set by the resolver for `obj:meth(args) { ... }` definitions: an
    /// implicit `self` parameter is prepended (spec.md §4.1).
    pub is_method: bool,
    /// Filled in by `resolver::Resolver`: one register slot past the last
    /// parameter/local the function declares. The bytecode compiler
    /// allocates expression temporaries starting here.
    pub num_locals: u16,
    /// Filled in by `resolver::Resolver`: where each of this function's
    /// upvalues is captured from in the enclosing function.
    pub upvalues: Vec<UpvalueRef>,
}

/// Resolver-computed capture source for one upvalue slot. Mirrors
/// `proto::UpvalDesc` (kept as a separate type here so `ast` doesn't need to
/// depend on `bytecode`/`proto`); `bytecode::compiler` converts one to the
/// other when it builds the final `Proto`.
#[derive(Debug, Clone, Copy)]
pub enum UpvalueRef {
    ParentLocal(u16),
    ParentUpvalue(u16),
}

/// Owns every node and function body produced by the parser for one
/// compilation unit. Dropping `Program` frees the whole tree at once.
#[derive(Debug, Clone)]
pub struct Program {
    pub file: String,
    pub is_module: bool,
    nodes: Vec<Node>,
    pub functions: Vec<FunctionDef>,
    pub main: FunctionId,
}

impl Program {
    pub fn new(file: impl Into<String>) -> Self {
        let mut program = Self {
            file: file.into(),
            is_module: false,
            nodes: Vec::new(),
            functions: Vec::new(),
            main: 0,
        };
        program.main = program.functions.len() as FunctionId;
        program.functions.push(FunctionDef {
            name: None,
            params: Vec::new(),
            is_vararg: true,
            body: Vec::new(),
            pos: CodeRange::default(),
            is_method: false,
            num_locals: 0,
            upvalues: Vec::new(),
        });
        program
    }

    #[must_use]
    pub fn top_level(&self) -> &[NodeId] {
        &self.functions[self.main as usize].body
    }

    pub fn top_level_mut(&mut self) -> &mut Vec<NodeId> {
        &mut self.functions[self.main as usize].body
    }

    pub fn alloc(&mut self, kind: NodeKind, pos: CodeRange) -> NodeId {
        let id = self.nodes.len() as NodeId;
        self.nodes.push(Node { kind, pos });
        id
    }

    pub fn alloc_expr(&mut self, expr: Expr, pos: CodeRange) -> NodeId {
        self.alloc(NodeKind::Expr(expr), pos)
    }

    pub fn alloc_stmt(&mut self, stmt: Stmt, pos: CodeRange) -> NodeId {
        self.alloc(NodeKind::Stmt(stmt), pos)
    }

    pub fn alloc_function(&mut self, def: FunctionDef) -> FunctionId {
        let id = self.functions.len() as FunctionId;
        self.functions.push(def);
        id
    }

    #[must_use]
    pub fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id as usize]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id as usize]
    }

    #[must_use]
    pub fn function(&self, id: FunctionId) -> &FunctionDef {
        &self.functions[id as usize]
    }

    pub fn function_mut(&mut self, id: FunctionId) -> &mut FunctionDef {
        &mut self.functions[id as usize]
    }

    /// Deep-clones the subtree rooted at `id`, allocating fresh nodes.
    /// Used by the resolver to implement method-call desugaring, where the
    /// receiver expression of `expr:meth(args)` must appear twice: once for
    /// the `Member` load and once as the synthesized `self` argument
    /// (spec.md §4.1, §9 "Method calls and self-argument").
    pub fn clone_node(&mut self, id: NodeId) -> NodeId {
        let node = self.get(id).clone();
        let pos = node.pos;
        let kind = match node.kind {
            NodeKind::Expr(e) => NodeKind::Expr(self.clone_expr(e)),
            NodeKind::Stmt(_) => panic!("clone_node: statements are never cloned"),
        };
        self.alloc(kind, pos)
    }

    fn clone_expr(&mut self, expr: Expr) -> Expr {
        match expr {
            Expr::Unary(op, a) => Expr::Unary(op, self.clone_node(a)),
            Expr::Binary(op, a, b) => Expr::Binary(op, self.clone_node(a), self.clone_node(b)),
            Expr::Logical(op, a, b) => Expr::Logical(op, self.clone_node(a), self.clone_node(b)),
            Expr::Ternary(a, b, c) => Expr::Ternary(self.clone_node(a), self.clone_node(b), self.clone_node(c)),
            Expr::Call(f, args) => {
                let f = self.clone_node(f);
                let args = args.into_iter().map(|a| self.clone_node(a)).collect();
                Expr::Call(f, args)
            }
            Expr::MethodCall(recv, name, args) => {
                let recv = self.clone_node(recv);
                let args = args.into_iter().map(|a| self.clone_node(a)).collect();
                Expr::MethodCall(recv, name, args)
            }
            Expr::Member(obj, name) => Expr::Member(self.clone_node(obj), name),
            Expr::Index(obj, key) => Expr::Index(self.clone_node(obj), self.clone_node(key)),
            Expr::TableCtor(fields) => {
                let fields = fields
                    .into_iter()
                    .map(|f| match f {
                        TableField::Positional(v) => TableField::Positional(self.clone_node(v)),
                        TableField::Named(k, v) => TableField::Named(k, self.clone_node(v)),
                        TableField::Keyed(k, v) => TableField::Keyed(self.clone_node(k), self.clone_node(v)),
                    })
                    .collect();
                Expr::TableCtor(fields)
            }
            leaf => leaf,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_node_duplicates_receiver_subtree() {
        let mut program = Program::new("<test>");
        let ident = program.alloc_expr(Expr::Ident("obj".into()), CodeRange::default());
        let member = program.alloc_expr(Expr::Member(ident, "field".into()), CodeRange::default());
        let cloned = program.clone_node(member);
        assert_ne!(cloned, member);
        match &program.get(cloned).kind {
            NodeKind::Expr(Expr::Member(obj, name)) => {
                assert_ne!(*obj, ident);
                assert_eq!(name, "field");
            }
            _ => panic!("expected cloned Member node"),
        }
    }
}
