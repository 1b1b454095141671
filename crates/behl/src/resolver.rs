//! Semantic pass: scope resolution, node lowering and module transform.
//!
//! Runs between the parser and the bytecode compiler. Grounded on
//! `examples/original_source/src/frontend/semantics_pass.hpp`'s job list —
//! resolve every identifier to {local, upvalue, global}, lower the generic
//! `Assign`/`CompoundAssign`/`Increment`/`Decrement` nodes the parser
//! produces into their `*Local`/`*Global`/`*Upvalue` counterparts, desugar
//! `obj:meth(args)` calls, validate `break`/`continue`/`return` placement
//! and const reassignment, and synthesize the `__EXPORTS__` table for
//! `module`-declared files (`export_transform.cpp`).

use crate::ast::{BinOp, Expr, FunctionDef, FunctionId, IncDecOp, NodeId, NodeKind, Program, Stmt, UpvalueRef};
use crate::error::{CodeLoc, CompileError};

#[derive(Debug, Clone, Copy)]
enum Resolved {
    Local(u16),
    Upvalue(u16),
    Global,
}

struct LocalVar {
    name: String,
    slot: u16,
    is_const: bool,
}

struct FuncScope {
    function: FunctionId,
    locals: Vec<LocalVar>,
    block_starts: Vec<usize>,
    next_slot: u16,
    loop_depth: u32,
}

impl FuncScope {
    fn new(function: FunctionId, first_slot: u16) -> Self {
        Self {
            function,
            locals: Vec::new(),
            block_starts: Vec::new(),
            next_slot: first_slot,
            loop_depth: 0,
        }
    }

    fn find_local(&self, name: &str) -> Option<(u16, bool)> {
        self.locals.iter().rev().find(|l| l.name == name).map(|l| (l.slot, l.is_const))
    }
}

pub struct Resolver<'p> {
    program: &'p mut Program,
    scopes: Vec<FuncScope>,
    exports: Vec<String>,
    file: String,
}

impl<'p> Resolver<'p> {
    pub fn new(program: &'p mut Program) -> Self {
        let file = program.file.clone();
        Self {
            program,
            scopes: Vec::new(),
            exports: Vec::new(),
            file,
        }
    }

    fn err(&self, node: NodeId, message: impl Into<String>) -> CompileError {
        let pos = self.program.get(node).pos;
        CompileError::semantic(CodeLoc::new(self.file.clone(), pos.line, pos.column), message)
    }

    pub fn resolve(mut self) -> Result<(), CompileError> {
        let main = self.program.main;
        self.scopes.push(FuncScope::new(main, 0));
        let body = self.program.top_level().to_vec();
        self.resolve_block(&body)?;

        if self.program.is_module && !self.exports.is_empty() {
            self.synthesize_exports()?;
        }
        self.finish_function(main);
        self.scopes.pop();
        Ok(())
    }

    /// Upvalues are appended directly onto the `FunctionDef` as they're
    /// discovered (see `add_upvalue`); only `num_locals` needs filling in
    /// once the function's body has been fully walked.
    fn finish_function(&mut self, function: FunctionId) {
        let scope = self.scopes.last().unwrap();
        debug_assert_eq!(scope.function, function);
        let num_locals = scope.next_slot;
        self.program.function_mut(function).num_locals = num_locals;
    }

    fn enter_block(&mut self) {
        let scope = self.scopes.last_mut().unwrap();
        scope.block_starts.push(scope.locals.len());
    }

    fn exit_block(&mut self) {
        let scope = self.scopes.last_mut().unwrap();
        let mark = scope.block_starts.pop().unwrap();
        scope.locals.truncate(mark);
    }

    fn declare_local(&mut self, name: String, is_const: bool) -> u16 {
        let scope = self.scopes.last_mut().unwrap();
        let slot = scope.next_slot;
        scope.next_slot += 1;
        scope.locals.push(LocalVar { name, slot, is_const });
        slot
    }

    fn find_const(&self, name: &str) -> Option<bool> {
        self.scopes.last().unwrap().find_local(name).map(|(_, is_const)| is_const)
    }

    /// Resolves `name` against the scope stack, threading an upvalue chain
    /// through any intermediate functions as needed (see module doc).
    fn resolve_name(&mut self, name: &str) -> Resolved {
        let depth = self.scopes.len();
        let mut found_at = None;
        for i in (0..depth).rev() {
            if let Some((slot, _)) = self.scopes[i].find_local(name) {
                found_at = Some((i, slot));
                break;
            }
        }
        let Some((found_at, slot)) = found_at else {
            return Resolved::Global;
        };
        if found_at == depth - 1 {
            return Resolved::Local(slot);
        }
        let mut source = UpvalueRef::ParentLocal(slot);
        let mut idx = 0u16;
        for i in (found_at + 1)..depth {
            idx = self.add_upvalue(i, source);
            source = UpvalueRef::ParentUpvalue(idx);
        }
        Resolved::Upvalue(idx)
    }

    fn add_upvalue(&mut self, scope_index: usize, source: UpvalueRef) -> u16 {
        let function = self.scopes[scope_index].function;
        let def = self.program.function_mut(function);
        for (i, existing) in def.upvalues.iter().enumerate() {
            if upvalue_eq(*existing, source) {
                return i as u16;
            }
        }
        def.upvalues.push(source);
        (def.upvalues.len() - 1) as u16
    }

    fn resolve_block(&mut self, ids: &[NodeId]) -> Result<(), CompileError> {
        for &id in ids {
            self.resolve_stmt(id)?;
        }
        Ok(())
    }

    fn resolve_stmt(&mut self, id: NodeId) -> Result<(), CompileError> {
        let stmt = match &self.program.get(id).kind {
            NodeKind::Stmt(s) => s.clone(),
            NodeKind::Expr(_) => unreachable!("resolve_stmt called on an expression node"),
        };
        match stmt {
            Stmt::ExprStmt(e) => self.resolve_expr(e)?,
            Stmt::LocalDecl { names, is_const, values, .. } => {
                for &v in &values {
                    self.resolve_expr(v)?;
                }
                let mut slots = Vec::with_capacity(names.len());
                for (name, is_const) in names.iter().zip(is_const.iter()) {
                    slots.push(self.declare_local(name.clone(), *is_const));
                }
                self.replace(id, NodeKind::Stmt(Stmt::LocalDecl { names, is_const, slots, values }));
            }
            Stmt::Assign { target, value } => self.lower_assign(id, target, value)?,
            Stmt::CompoundAssign { op, target, value } => self.lower_compound(id, op, target, value)?,
            Stmt::IncDec { target, op } => self.lower_incdec(id, target, op)?,
            Stmt::If { cond, then_block, elifs, else_block } => {
                self.resolve_expr(cond)?;
                self.enter_block();
                self.resolve_block(&then_block)?;
                self.exit_block();
                for (c, b) in &elifs {
                    self.resolve_expr(*c)?;
                    self.enter_block();
                    self.resolve_block(b)?;
                    self.exit_block();
                }
                if let Some(b) = &else_block {
                    self.enter_block();
                    self.resolve_block(b)?;
                    self.exit_block();
                }
            }
            Stmt::While { cond, body } => {
                self.resolve_expr(cond)?;
                self.enter_loop_block();
                self.resolve_block(&body)?;
                self.exit_loop_block();
            }
            Stmt::ForC { init, cond, step, body } => {
                self.enter_block();
                if let Some(init) = init {
                    self.resolve_stmt(init)?;
                }
                if let Some(cond) = cond {
                    self.resolve_expr(cond)?;
                }
                if let Some(step) = step {
                    self.resolve_stmt_or_expr(step)?;
                }
                self.enter_loop_block();
                self.resolve_block(&body)?;
                self.exit_loop_block();
                self.exit_block();
            }
            Stmt::ForNum { var, start, stop, step, body, .. } => {
                self.resolve_expr(start)?;
                self.resolve_expr(stop)?;
                if let Some(step) = step {
                    self.resolve_expr(step)?;
                }
                self.enter_block();
                let slot = self.declare_local(var.clone(), false);
                self.enter_loop_block();
                self.resolve_block(&body)?;
                self.exit_loop_block();
                self.exit_block();
                self.replace(id, NodeKind::Stmt(Stmt::ForNum { var, slot, start, stop, step, body }));
            }
            Stmt::ForIn { vars, iter, body, .. } => {
                self.resolve_expr(iter)?;
                self.enter_block();
                let slots = vars.iter().map(|v| self.declare_local(v.clone(), false)).collect();
                self.enter_loop_block();
                self.resolve_block(&body)?;
                self.exit_loop_block();
                self.exit_block();
                self.replace(id, NodeKind::Stmt(Stmt::ForIn { vars, slots, iter, body }));
            }
            Stmt::FuncDeclStmt { name, func, .. } => {
                let slot = self.declare_local(name.clone(), false);
                self.resolve_function(func)?;
                self.replace(id, NodeKind::Stmt(Stmt::FuncDeclStmt { name, slot_hint: slot, func }));
            }
            Stmt::Return(e) => {
                if let Some(e) = e {
                    self.resolve_expr(e)?;
                }
            }
            Stmt::Break | Stmt::Continue => {
                if self.scopes.last().unwrap().loop_depth == 0 {
                    let what = if matches!(stmt, Stmt::Break) { "break" } else { "continue" };
                    return Err(self.err(id, format!("'{what}' outside of a loop")));
                }
            }
            Stmt::Defer(func) => self.resolve_function(func)?,
            Stmt::Block(ids) => {
                self.enter_block();
                self.resolve_block(&ids)?;
                self.exit_block();
            }
            Stmt::ModuleDecl => self.program.is_module = true,
            Stmt::ExportDecl(inner) => {
                self.resolve_stmt(inner)?;
                match &self.program.get(inner).kind {
                    NodeKind::Stmt(Stmt::LocalDecl { names, is_const, .. }) => {
                        if is_const.iter().any(|c| !c) {
                            return Err(self.err(id, "'export let' is not allowed, use 'export const'"));
                        }
                        self.exports.extend(names.iter().cloned());
                    }
                    NodeKind::Stmt(Stmt::FuncDeclStmt { name, .. }) => self.exports.push(name.clone()),
                    _ => return Err(self.err(id, "export applies only to a declaration")),
                }
            }
            Stmt::ExportList(names) => {
                for name in &names {
                    if !matches!(self.resolve_name(name), Resolved::Local(_)) {
                        return Err(self.err(id, format!("exported name '{name}' is not a local declared in this module")));
                    }
                }
                self.exports.extend(names);
            }
            Stmt::AssignLocal { .. }
            | Stmt::AssignGlobal { .. }
            | Stmt::AssignUpvalue { .. }
            | Stmt::CompoundLocal { .. }
            | Stmt::CompoundGlobal { .. }
            | Stmt::CompoundUpvalue { .. }
            | Stmt::IncDecLocal { .. }
            | Stmt::IncDecGlobal { .. }
            | Stmt::IncDecUpvalue { .. } => {
                unreachable!("resolver only produces these lowered forms; it never receives them as input")
            }
        }
        Ok(())
    }

    /// `ForC`'s step clause is an arbitrary statement-shaped expression
    /// (`i++`, `i += 1`); resolve it the same way a full statement would be.
    fn resolve_stmt_or_expr(&mut self, id: NodeId) -> Result<(), CompileError> {
        self.resolve_stmt(id)
    }

    fn enter_loop_block(&mut self) {
        self.enter_block();
        self.scopes.last_mut().unwrap().loop_depth += 1;
    }

    fn exit_loop_block(&mut self) {
        self.scopes.last_mut().unwrap().loop_depth -= 1;
        self.exit_block();
    }

    fn replace(&mut self, id: NodeId, kind: NodeKind) {
        self.program.get_mut(id).kind = kind;
    }

    fn lower_assign(&mut self, id: NodeId, target: NodeId, value: NodeId) -> Result<(), CompileError> {
        self.resolve_expr(value)?;
        match self.program.get(target).kind.clone() {
            NodeKind::Expr(Expr::Ident(name)) => {
                if self.find_const(&name) == Some(true) {
                    return Err(self.err(id, format!("cannot assign to const variable '{name}'")));
                }
                let lowered = match self.resolve_name(&name) {
                    Resolved::Local(slot) => Stmt::AssignLocal { slot, value },
                    Resolved::Upvalue(index) => Stmt::AssignUpvalue { index, value },
                    Resolved::Global => Stmt::AssignGlobal { name, value },
                };
                self.replace(id, NodeKind::Stmt(lowered));
            }
            NodeKind::Expr(Expr::Member(_, _) | Expr::Index(_, _)) => {
                self.resolve_expr(target)?;
            }
            _ => return Err(self.err(id, "invalid assignment target")),
        }
        Ok(())
    }

    fn lower_compound(&mut self, id: NodeId, op: BinOp, target: NodeId, value: NodeId) -> Result<(), CompileError> {
        self.resolve_expr(value)?;
        match self.program.get(target).kind.clone() {
            NodeKind::Expr(Expr::Ident(name)) => {
                if self.find_const(&name) == Some(true) {
                    return Err(self.err(id, format!("cannot assign to const variable '{name}'")));
                }
                let lowered = match self.resolve_name(&name) {
                    Resolved::Local(slot) => Stmt::CompoundLocal { op, slot, value },
                    Resolved::Upvalue(index) => Stmt::CompoundUpvalue { op, index, value },
                    Resolved::Global => Stmt::CompoundGlobal { op, name, value },
                };
                self.replace(id, NodeKind::Stmt(lowered));
            }
            NodeKind::Expr(Expr::Member(_, _) | Expr::Index(_, _)) => {
                self.resolve_expr(target)?;
            }
            _ => return Err(self.err(id, "invalid assignment target")),
        }
        Ok(())
    }

    fn lower_incdec(&mut self, id: NodeId, target: NodeId, op: IncDecOp) -> Result<(), CompileError> {
        match self.program.get(target).kind.clone() {
            NodeKind::Expr(Expr::Ident(name)) => {
                if self.find_const(&name) == Some(true) {
                    return Err(self.err(id, format!("cannot assign to const variable '{name}'")));
                }
                let lowered = match self.resolve_name(&name) {
                    Resolved::Local(slot) => Stmt::IncDecLocal { slot, op },
                    Resolved::Upvalue(index) => Stmt::IncDecUpvalue { index, op },
                    Resolved::Global => Stmt::IncDecGlobal { name, op },
                };
                self.replace(id, NodeKind::Stmt(lowered));
            }
            NodeKind::Expr(Expr::Member(_, _) | Expr::Index(_, _)) => {
                self.resolve_expr(target)?;
            }
            _ => return Err(self.err(id, "invalid increment/decrement target")),
        }
        Ok(())
    }

    fn resolve_expr(&mut self, id: NodeId) -> Result<(), CompileError> {
        let expr = match &self.program.get(id).kind {
            NodeKind::Expr(e) => e.clone(),
            NodeKind::Stmt(_) => unreachable!("resolve_expr called on a statement node"),
        };
        match expr {
            Expr::Nil
            | Expr::True
            | Expr::False
            | Expr::Int(_)
            | Expr::Float(_)
            | Expr::Str(_)
            | Expr::Vararg
            | Expr::Local(_)
            | Expr::Upvalue(_)
            | Expr::Global(_) => {}
            Expr::Ident(name) => {
                let lowered = match self.resolve_name(&name) {
                    Resolved::Local(slot) => Expr::Local(slot),
                    Resolved::Upvalue(index) => Expr::Upvalue(index),
                    Resolved::Global => Expr::Global(name),
                };
                self.replace(id, NodeKind::Expr(lowered));
            }
            Expr::Unary(_, a) => self.resolve_expr(a)?,
            Expr::Binary(_, a, b) | Expr::Logical(_, a, b) | Expr::Index(a, b) => {
                self.resolve_expr(a)?;
                self.resolve_expr(b)?;
            }
            Expr::Ternary(a, b, c) => {
                self.resolve_expr(a)?;
                self.resolve_expr(b)?;
                self.resolve_expr(c)?;
            }
            Expr::Call(f, args) => {
                self.resolve_expr(f)?;
                for a in args {
                    self.resolve_expr(a)?;
                }
            }
            Expr::MethodCall(recv, name, args) => {
                self.resolve_expr(recv)?;
                for &a in &args {
                    self.resolve_expr(a)?;
                }
                let pos = self.program.get(id).pos;
                let member = self.program.alloc_expr(Expr::Member(recv, name), pos);
                let self_arg = self.program.clone_node(recv);
                let mut new_args = Vec::with_capacity(args.len() + 1);
                new_args.push(self_arg);
                new_args.extend(args);
                self.replace(id, NodeKind::Expr(Expr::Call(member, new_args)));
            }
            Expr::Member(obj, _) => self.resolve_expr(obj)?,
            Expr::TableCtor(fields) => {
                for field in fields {
                    match field {
                        crate::ast::TableField::Positional(v) => self.resolve_expr(v)?,
                        crate::ast::TableField::Named(_, v) => self.resolve_expr(v)?,
                        crate::ast::TableField::Keyed(k, v) => {
                            self.resolve_expr(k)?;
                            self.resolve_expr(v)?;
                        }
                    }
                }
            }
            Expr::FuncExpr(func) => self.resolve_function(func)?,
        }
        Ok(())
    }

    fn resolve_function(&mut self, function: FunctionId) -> Result<(), CompileError> {
        let def: FunctionDef = self.program.function(function).clone();
        let first_slot = def.params.len() as u16;
        self.scopes.push(FuncScope::new(function, first_slot));
        for (i, param) in def.params.iter().enumerate() {
            self.declare_local(param.name.clone(), param.is_const);
            debug_assert_eq!(self.scopes.last().unwrap().locals[i].slot, i as u16);
        }
        self.resolve_block(&def.body)?;
        self.finish_function(function);
        self.scopes.pop();
        Ok(())
    }

    /// Appends `local __EXPORTS__ = {}`, one assignment per exported name,
    /// and a trailing `return __EXPORTS__` to the module's top level
    /// (`export_transform.cpp`'s synthesis, spec.md §6 "Modules").
    fn synthesize_exports(&mut self) -> Result<(), CompileError> {
        let pos = crate::ast::CodeRange::default();
        let table = self.program.alloc_expr(Expr::TableCtor(Vec::new()), pos);
        let exports_slot = self.declare_local("__EXPORTS__".into(), false);
        let decl = self.program.alloc_stmt(
            Stmt::LocalDecl {
                names: vec!["__EXPORTS__".into()],
                is_const: vec![false],
                slots: vec![exports_slot],
                values: vec![table],
            },
            pos,
        );
        self.program.top_level_mut().push(decl);

        for name in self.exports.clone() {
            let resolved = self.resolve_name(&name);
            let value_node = match resolved {
                Resolved::Local(slot) => self.program.alloc_expr(Expr::Local(slot), pos),
                Resolved::Upvalue(idx) => self.program.alloc_expr(Expr::Upvalue(idx), pos),
                Resolved::Global => self.program.alloc_expr(Expr::Global(name.clone()), pos),
            };
            let exports_ref = self.program.alloc_expr(Expr::Local(exports_slot), pos);
            let key = self.program.alloc_expr(Expr::Str(name.clone()), pos);
            let index = self.program.alloc_expr(Expr::Index(exports_ref, key), pos);
            let assign = self.program.alloc_stmt(Stmt::Assign { target: index, value: value_node }, pos);
            self.program.top_level_mut().push(assign);
        }

        let ret_value = self.program.alloc_expr(Expr::Local(exports_slot), pos);
        let ret = self.program.alloc_stmt(Stmt::Return(Some(ret_value)), pos);
        self.program.top_level_mut().push(ret);
        Ok(())
    }
}

fn upvalue_eq(a: UpvalueRef, b: UpvalueRef) -> bool {
    matches!(
        (a, b),
        (UpvalueRef::ParentLocal(x), UpvalueRef::ParentLocal(y)) if x == y
    ) || matches!(
        (a, b),
        (UpvalueRef::ParentUpvalue(x), UpvalueRef::ParentUpvalue(y)) if x == y
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{CodeRange, FunctionDef, Param};

    fn sample_closure_program() -> Program {
        // function make_counter() {
        //   let n = 0
        //   function inc() { n = n + 1; return n }
        //   return inc
        // }
        let mut p = Program::new("<test>");
        let pos = CodeRange::default();

        let inc_func = p.alloc_function(FunctionDef {
            name: Some("inc".into()),
            params: vec![],
            is_vararg: false,
            body: vec![],
            pos,
            is_method: false,
            num_locals: 0,
            upvalues: vec![],
        });
        let n_ident = p.alloc_expr(Expr::Ident("n".into()), pos);
        let one = p.alloc_expr(Expr::Int(1), pos);
        let add = p.alloc_expr(Expr::Binary(BinOp::Add, n_ident, one), pos);
        let n_target = p.alloc_expr(Expr::Ident("n".into()), pos);
        let assign = p.alloc_stmt(Stmt::Assign { target: n_target, value: add }, pos);
        let n_ret = p.alloc_expr(Expr::Ident("n".into()), pos);
        let ret = p.alloc_stmt(Stmt::Return(Some(n_ret)), pos);
        p.function_mut(inc_func).body = vec![assign, ret];

        let make_counter = p.alloc_function(FunctionDef {
            name: Some("make_counter".into()),
            params: vec![],
            is_vararg: false,
            body: vec![],
            pos,
            is_method: false,
            num_locals: 0,
            upvalues: vec![],
        });
        let zero = p.alloc_expr(Expr::Int(0), pos);
        let n_decl = p.alloc_stmt(
            Stmt::LocalDecl {
                names: vec!["n".into()],
                is_const: vec![false],
                slots: vec![],
                values: vec![zero],
            },
            pos,
        );
        let inc_expr = p.alloc_expr(Expr::FuncExpr(inc_func), pos);
        let inc_decl = p.alloc_stmt(
            Stmt::FuncDeclStmt { name: "inc".into(), slot_hint: 0, func: inc_func },
            pos,
        );
        let _ = inc_expr;
        let inc_ref = p.alloc_expr(Expr::Ident("inc".into()), pos);
        let ret2 = p.alloc_stmt(Stmt::Return(Some(inc_ref)), pos);
        p.function_mut(make_counter).body = vec![n_decl, inc_decl, ret2];

        let call_ctor = p.alloc_expr(Expr::Ident("make_counter".into()), pos);
        let _ = call_ctor;

        // Put `make_counter` at top level too so it resolves as a global call site in real use;
        // for this unit test we only need `inc_func` to pick up an upvalue for `n`.
        let make_counter_decl = p.alloc_stmt(
            Stmt::FuncDeclStmt { name: "make_counter".into(), slot_hint: 0, func: make_counter },
            pos,
        );
        p.top_level_mut().push(make_counter_decl);

        p
    }

    #[test]
    fn nested_function_captures_enclosing_local_as_upvalue() {
        let mut program = sample_closure_program();
        Resolver::new(&mut program).resolve().unwrap();
        let inc_func = 1; // allocated second, after main(0)
        let def = program.function(inc_func as FunctionId);
        assert_eq!(def.upvalues.len(), 1);
        assert!(matches!(def.upvalues[0], UpvalueRef::ParentLocal(_)));
    }

    #[test]
    fn break_outside_loop_is_a_semantic_error() {
        let mut p = Program::new("<test>");
        let pos = CodeRange::default();
        let brk = p.alloc_stmt(Stmt::Break, pos);
        p.top_level_mut().push(brk);
        let err = Resolver::new(&mut p).resolve().unwrap_err();
        assert!(matches!(err, CompileError::Semantic { .. }));
    }

    fn parse_and_resolve(src: &str) -> Result<Program, CompileError> {
        let mut program = Program::new("<test>");
        crate::parser::parse(src, &mut program)?;
        Resolver::new(&mut program).resolve()?;
        Ok(program)
    }

    #[test]
    fn export_let_is_rejected() {
        let err = parse_and_resolve("module;\nexport let x = 1;\n").unwrap_err();
        assert!(matches!(err, CompileError::Semantic { .. }));
    }

    #[test]
    fn export_const_is_accepted() {
        parse_and_resolve("module;\nexport const x = 1;\n").unwrap();
    }
}
