//! Lowers a resolved [`Program`] into [`Proto`]s.
//!
//! Shaped like the teacher's `Compiler` (one instance per function body,
//! `LoopInfo`-style bookkeeping for `break`/`continue`) but targeting
//! registers instead of a stack machine: every local already has a fixed
//! register assigned by `resolver::Resolver`, so this pass only needs to
//! allocate registers for expression temporaries above that line.
//!
//! Simplification recorded in DESIGN.md: calls and returns are single-value
//! only. `...` reads as "the first extra argument, or nil"; full
//! multi-value spread (`f(...)` forwarding every vararg) is not
//! implemented.

use std::rc::Rc;

use crate::ast::{BinOp, Expr, FunctionId, IncDecOp, LogicalOp, NodeId, NodeKind, Program, Stmt, TableField, UnOp, UpvalueRef};
use crate::bytecode::builder::{CodeBuilder, JumpLabel};
use crate::bytecode::code::Const;
use crate::bytecode::op::Op;
use crate::error::{CodeLoc, CompileError};
use crate::proto::{Proto, ProtoRef, UpvalDesc};

struct LoopCtx {
    /// Patched to jump to the increment/test step once it's emitted, which
    /// for `ForNum`/`ForIn` only exists after the body is compiled — so
    /// `continue` can't use a known backward target the way `break` uses a
    /// forward one; both are resolved as label lists after the body.
    continue_labels: Vec<JumpLabel>,
    break_labels: Vec<JumpLabel>,
}

pub struct Compiler<'p> {
    program: &'p Program,
    builder: CodeBuilder,
    next_reg: u16,
    loops: Vec<LoopCtx>,
    children: Vec<ProtoRef>,
    file: String,
}

pub fn compile_program(program: &Program) -> Result<ProtoRef, CompileError> {
    Compiler::compile_function(program, program.main)
}

impl<'p> Compiler<'p> {
    fn new(program: &'p Program, first_free_reg: u16) -> Self {
        Self {
            program,
            builder: CodeBuilder::new(),
            next_reg: first_free_reg,
            loops: Vec::new(),
            children: Vec::new(),
            file: program.file.clone(),
        }
    }

    fn err(&self, node: NodeId, message: impl Into<String>) -> CompileError {
        let pos = self.program.get(node).pos;
        CompileError::semantic(CodeLoc::new(self.file.clone(), pos.line, pos.column), message)
    }

    fn compile_function(program: &'p Program, func_id: FunctionId) -> Result<ProtoRef, CompileError> {
        let def = program.function(func_id);
        let mut compiler = Compiler::new(program, def.num_locals);
        compiler.builder.set_line(def.pos.line);
        compiler.compile_block(&def.body)?;
        // Every function falls off the end into an implicit `return` with
        // no value, mirroring a missing explicit `return` statement.
        compiler.builder.emit(Op::Return, 0, 0, 0);

        let upvalues = def
            .upvalues
            .iter()
            .map(|u| match u {
                UpvalueRef::ParentLocal(slot) => UpvalDesc::ParentLocal(*slot),
                UpvalueRef::ParentUpvalue(idx) => UpvalDesc::ParentUpvalue(*idx),
            })
            .collect();

        let num_registers = compiler.builder.num_registers().max(def.num_locals);
        Ok(Rc::new(Proto {
            name: def.name.clone(),
            num_params: def.params.len() as u16,
            is_vararg: def.is_vararg,
            num_registers,
            code: compiler.builder.build(),
            upvalues,
            children: compiler.children,
            source: program.file.clone(),
            pos: def.pos,
        }))
    }

    fn alloc_temp(&mut self) -> u16 {
        let r = self.next_reg;
        self.next_reg += 1;
        self.builder.touch_register(r);
        r
    }

    fn compile_block(&mut self, ids: &[NodeId]) -> Result<(), CompileError> {
        let mark = self.next_reg;
        for &id in ids {
            self.compile_stmt(id)?;
            self.next_reg = mark;
        }
        Ok(())
    }

    fn compile_stmt(&mut self, id: NodeId) -> Result<(), CompileError> {
        let pos = self.program.get(id).pos;
        self.builder.set_line(pos.line);
        let stmt = match &self.program.get(id).kind {
            NodeKind::Stmt(s) => s,
            NodeKind::Expr(_) => unreachable!(),
        };
        match stmt.clone() {
            Stmt::ExprStmt(e) => {
                self.compile_expr(e)?;
            }
            Stmt::LocalDecl { slots, values, .. } => {
                for (slot, value) in slots.iter().zip(values.iter()) {
                    let reg = self.compile_expr_into(*value, *slot)?;
                    debug_assert_eq!(reg, *slot);
                }
                let extra = &slots[values.len().min(slots.len())..];
                // `let a, b = pcall(f());` names outnumber values: if the
                // trailing value is a call, its result is a positional
                // table (see builtins::core::pcall) unpacked into every
                // destructured slot, including the one that currently holds
                // the table itself (read out before it's overwritten). This
                // is the only multi-value-return path this compiler
                // supports, since every other call site treats a call as
                // single-value (see module doc).
                if !extra.is_empty() && self.last_value_is_call(&values) {
                    let result_reg = slots[values.len() - 1];
                    let first_key = self.alloc_temp();
                    self.load_const_int(first_key, 1);
                    let first_val = self.alloc_temp();
                    self.builder.emit(Op::GetTable, first_val, result_reg, first_key);
                    for (i, slot) in extra.iter().enumerate() {
                        let idx = self.alloc_temp();
                        self.load_const_int(idx, (i + 2) as i64);
                        self.builder.emit(Op::GetTable, *slot, result_reg, idx);
                    }
                    self.builder.emit(Op::Move, result_reg, first_val, 0);
                } else {
                    for slot in extra {
                        self.builder.emit(Op::LoadNil, *slot, 0, 0);
                    }
                }
            }
            Stmt::Assign { target, value } => self.compile_place_assign(target, value)?,
            Stmt::AssignLocal { slot, value } => {
                self.compile_expr_into(value, slot)?;
            }
            Stmt::AssignGlobal { name, value } => {
                let r = self.compile_expr(value)?;
                let k = self.builder.add_const(Const::Str(name));
                self.builder.emit(Op::SetGlobal, r, k, 0);
            }
            Stmt::AssignUpvalue { index, value } => {
                let r = self.compile_expr(value)?;
                self.builder.emit(Op::SetUpval, r, index, 0);
            }
            Stmt::CompoundAssign { op, target, value } => {
                let combined = self.desugar_compound_place(target, op, value)?;
                self.compile_place_store(target, combined)?;
            }
            Stmt::CompoundLocal { op, slot, value } => {
                let rhs = self.compile_expr(value)?;
                self.emit_binop(op, slot, slot, rhs);
            }
            Stmt::CompoundGlobal { op, name, value } => {
                let cur = self.alloc_temp();
                let k = self.builder.add_const(Const::Str(name));
                self.builder.emit(Op::GetGlobal, cur, k, 0);
                let rhs = self.compile_expr(value)?;
                self.emit_binop(op, cur, cur, rhs);
                self.builder.emit(Op::SetGlobal, cur, k, 0);
            }
            Stmt::CompoundUpvalue { op, index, value } => {
                let cur = self.alloc_temp();
                self.builder.emit(Op::GetUpval, cur, index, 0);
                let rhs = self.compile_expr(value)?;
                self.emit_binop(op, cur, cur, rhs);
                self.builder.emit(Op::SetUpval, cur, index, 0);
            }
            Stmt::IncDec { target, op } => {
                let one = self.alloc_temp();
                self.load_const_int(one, 1);
                let bin = if op == IncDecOp::Inc { BinOp::Add } else { BinOp::Sub };
                let combined = self.desugar_incdec_place(target, bin, one)?;
                self.compile_place_store(target, combined)?;
            }
            Stmt::IncDecLocal { slot, op } => {
                let delta: i64 = if op == IncDecOp::Inc { 1 } else { -1 };
                let tmp = self.alloc_temp();
                self.load_const_int(tmp, delta);
                self.emit_binop(BinOp::Add, slot, slot, tmp);
            }
            Stmt::IncDecGlobal { name, op } => {
                let cur = self.alloc_temp();
                let k = self.builder.add_const(Const::Str(name));
                self.builder.emit(Op::GetGlobal, cur, k, 0);
                let delta: i64 = if op == IncDecOp::Inc { 1 } else { -1 };
                let tmp = self.alloc_temp();
                self.load_const_int(tmp, delta);
                self.emit_binop(BinOp::Add, cur, cur, tmp);
                self.builder.emit(Op::SetGlobal, cur, k, 0);
            }
            Stmt::IncDecUpvalue { index, op } => {
                let cur = self.alloc_temp();
                self.builder.emit(Op::GetUpval, cur, index, 0);
                let delta: i64 = if op == IncDecOp::Inc { 1 } else { -1 };
                let tmp = self.alloc_temp();
                self.load_const_int(tmp, delta);
                self.emit_binop(BinOp::Add, cur, cur, tmp);
                self.builder.emit(Op::SetUpval, cur, index, 0);
            }
            Stmt::If { cond, then_block, elifs, else_block } => {
                self.compile_if(cond, &then_block, &elifs, &else_block)?;
            }
            Stmt::While { cond, body } => self.compile_while(cond, &body)?,
            Stmt::ForC { init, cond, step, body } => self.compile_for_c(init, cond, step, &body)?,
            Stmt::ForNum { slot, start, stop, step, body, .. } => {
                self.compile_for_num(slot, start, stop, step, &body)?;
            }
            Stmt::ForIn { slots, iter, body, .. } => self.compile_for_in(&slots, iter, &body)?,
            Stmt::FuncDeclStmt { slot_hint, func, .. } => {
                self.compile_closure_into(func, slot_hint)?;
            }
            Stmt::Return(value) => {
                if let Some(value) = value {
                    let r = self.compile_expr(value)?;
                    self.builder.emit(Op::Return, r, 1, 0);
                } else {
                    self.builder.emit(Op::Return, 0, 0, 0);
                }
            }
            Stmt::Break => {
                let label = self.builder.emit_jump(Op::Jmp, 0);
                if self.loops.is_empty() {
                    return Err(self.err(id, "'break' outside of a loop"));
                }
                self.loops.last_mut().unwrap().break_labels.push(label);
            }
            Stmt::Continue => {
                let label = self.builder.emit_jump(Op::Jmp, 0);
                if self.loops.is_empty() {
                    return Err(self.err(id, "'continue' outside of a loop"));
                }
                self.loops
                    .last_mut()
                    .unwrap()
                    .continue_labels
                    .push(label);
            }
            Stmt::Defer(func) => {
                let reg = self.alloc_temp();
                self.compile_closure_into(func, reg)?;
                self.builder.emit(Op::Defer, reg, 0, 0);
            }
            Stmt::Block(ids) => self.compile_block(&ids)?,
            Stmt::ModuleDecl | Stmt::ExportDecl(_) | Stmt::ExportList(_) => {
                // ExportDecl's inner declaration was already compiled in
                // place by the resolver rewriting it into an ordinary
                // LocalDecl/FuncDeclStmt; nothing left to emit here.
                if let Stmt::ExportDecl(inner) = stmt {
                    self.compile_stmt(*inner)?;
                }
            }
        }
        Ok(())
    }

    fn load_const_int(&mut self, reg: u16, value: i64) {
        let k = self.builder.add_const(Const::Int(value));
        self.builder.emit(Op::LoadK, reg, k, 0);
    }

    fn last_value_is_call(&self, values: &[NodeId]) -> bool {
        values.last().is_some_and(|id| matches!(&self.program.get(*id).kind, NodeKind::Expr(Expr::Call(..) | Expr::MethodCall(..))))
    }

    /// Builds `target OP= value` as a fresh expression tree fragment so it
    /// can be fed back through `compile_place_assign`, without duplicating
    /// the receiver's side effects (the object/key subexpression of a
    /// `Member`/`Index` target is compiled exactly once, into a temp,
    /// before both the read and the write).
    fn desugar_compound_place(&mut self, target: NodeId, op: BinOp, value: NodeId) -> Result<u16, CompileError> {
        let (obj_reg, key_reg) = self.compile_place_base(target)?;
        let cur = self.alloc_temp();
        self.builder.emit(Op::GetTable, cur, obj_reg, key_reg);
        let rhs = self.compile_expr(value)?;
        self.emit_binop(op, cur, cur, rhs);
        Ok(cur)
    }

    fn desugar_incdec_place(&mut self, target: NodeId, op: BinOp, delta_reg: u16) -> Result<u16, CompileError> {
        let (obj_reg, key_reg) = self.compile_place_base(target)?;
        let cur = self.alloc_temp();
        self.builder.emit(Op::GetTable, cur, obj_reg, key_reg);
        self.emit_binop(op, cur, cur, delta_reg);
        Ok(cur)
    }

    /// Compiles the object/key portion of a `Member`/`Index` place
    /// expression into two registers, reusable by both a read and the
    /// matching write.
    fn compile_place_base(&mut self, target: NodeId) -> Result<(u16, u16), CompileError> {
        match self.program.get(target).kind.clone() {
            NodeKind::Expr(Expr::Member(obj, name)) => {
                let obj_reg = self.compile_expr(obj)?;
                let key_reg = self.alloc_temp();
                let k = self.builder.add_const(Const::Str(name));
                self.builder.emit(Op::LoadK, key_reg, k, 0);
                Ok((obj_reg, key_reg))
            }
            NodeKind::Expr(Expr::Index(obj, key)) => {
                let obj_reg = self.compile_expr(obj)?;
                let key_reg = self.compile_expr(key)?;
                Ok((obj_reg, key_reg))
            }
            _ => Err(self.err(target, "invalid assignment target")),
        }
    }

    fn compile_place_assign(&mut self, target: NodeId, value: NodeId) -> Result<(), CompileError> {
        let (obj_reg, key_reg) = self.compile_place_base(target)?;
        let value_reg = self.compile_expr(value)?;
        self.builder.emit(Op::SetTable, obj_reg, key_reg, value_reg);
        Ok(())
    }

    /// As `compile_place_assign`, but for a value that has already been
    /// compiled into a register (the `OP=`/`++`/`--` desugarings above),
    /// so the value isn't re-compiled as an expression.
    fn compile_place_store(&mut self, target: NodeId, value_reg: u16) -> Result<(), CompileError> {
        let (obj_reg, key_reg) = self.compile_place_base(target)?;
        self.builder.emit(Op::SetTable, obj_reg, key_reg, value_reg);
        Ok(())
    }

    fn compile_if(
        &mut self,
        cond: NodeId,
        then_block: &[NodeId],
        elifs: &[(NodeId, Vec<NodeId>)],
        else_block: &Option<Vec<NodeId>>,
    ) -> Result<(), CompileError> {
        let cond_reg = self.compile_expr(cond)?;
        let skip_then = self.builder.emit_jump(Op::Test, cond_reg);
        self.compile_block(then_block)?;
        let mut end_labels = vec![self.builder.emit_jump(Op::Jmp, 0)];
        self.builder.patch_jump_here(skip_then);

        for (elif_cond, elif_body) in elifs {
            let cond_reg = self.compile_expr(*elif_cond)?;
            let skip = self.builder.emit_jump(Op::Test, cond_reg);
            self.compile_block(elif_body)?;
            end_labels.push(self.builder.emit_jump(Op::Jmp, 0));
            self.builder.patch_jump_here(skip);
        }

        if let Some(else_body) = else_block {
            self.compile_block(else_body)?;
        }
        for label in end_labels {
            self.builder.patch_jump_here(label);
        }
        Ok(())
    }

    fn compile_while(&mut self, cond: NodeId, body: &[NodeId]) -> Result<(), CompileError> {
        let loop_start = self.builder.here();
        let cond_reg = self.compile_expr(cond)?;
        let exit = self.builder.emit_jump(Op::Test, cond_reg);
        self.loops.push(LoopCtx { continue_labels: Vec::new(), break_labels: Vec::new() });
        self.compile_block(body)?;
        let ctx = self.loops.pop().unwrap();
        for label in ctx.continue_labels {
            self.builder.patch_jump_here(label);
        }
        self.builder.emit_jump_back(loop_start);
        self.builder.patch_jump_here(exit);
        for label in ctx.break_labels {
            self.builder.patch_jump_here(label);
        }
        Ok(())
    }

    fn compile_for_c(
        &mut self,
        init: Option<NodeId>,
        cond: Option<NodeId>,
        step: Option<NodeId>,
        body: &[NodeId],
    ) -> Result<(), CompileError> {
        let mark = self.next_reg;
        if let Some(init) = init {
            self.compile_stmt(init)?;
        }
        let loop_start = self.builder.here();
        let exit = if let Some(cond) = cond {
            let cond_reg = self.compile_expr(cond)?;
            Some(self.builder.emit_jump(Op::Test, cond_reg))
        } else {
            None
        };
        self.loops.push(LoopCtx { continue_labels: Vec::new(), break_labels: Vec::new() });
        self.compile_block(body)?;
        let ctx = self.loops.pop().unwrap();
        // `continue` must still run the step clause before re-testing.
        for label in ctx.continue_labels {
            self.builder.patch_jump_here(label);
        }
        if let Some(step) = step {
            self.compile_stmt(step)?;
        }
        self.builder.emit_jump_back(loop_start);
        if let Some(exit) = exit {
            self.builder.patch_jump_here(exit);
        }
        for label in ctx.break_labels {
            self.builder.patch_jump_here(label);
        }
        self.next_reg = mark;
        Ok(())
    }

    /// `FORPREP`/`FORLOOP` bracket the body the way the original register-VM
    /// opcode pair is meant to: `FORPREP` validates and biases the counter
    /// once, `FORLOOP` increments/tests/jumps back each iteration. Registers
    /// `slot`, `slot+1`, `slot+2` hold the loop variable, limit and step.
    fn compile_for_num(
        &mut self,
        slot: u16,
        start: NodeId,
        stop: NodeId,
        step: Option<NodeId>,
        body: &[NodeId],
    ) -> Result<(), CompileError> {
        self.compile_expr_into(start, slot)?;
        let limit = self.alloc_temp();
        self.compile_expr_into(stop, limit)?;
        let step_reg = self.alloc_temp();
        match step {
            Some(step) => {
                self.compile_expr_into(step, step_reg)?;
            }
            None => self.load_const_int(step_reg, 1),
        }
        debug_assert_eq!(limit, slot + 1);
        debug_assert_eq!(step_reg, slot + 2);

        let prep = self.builder.emit_jump(Op::ForPrep, slot);
        let loop_start = self.builder.here();
        self.loops.push(LoopCtx { continue_labels: Vec::new(), break_labels: Vec::new() });
        self.compile_block(body)?;
        let ctx = self.loops.pop().unwrap();
        self.builder.patch_jump_here(prep);
        for label in ctx.continue_labels {
            self.builder.patch_jump_here(label);
        }
        let forloop = self.builder.emit_jump(Op::ForLoop, slot);
        self.builder.patch_jump_to(forloop, loop_start);
        for label in ctx.break_labels {
            self.builder.patch_jump_here(label);
        }
        Ok(())
    }

    /// `TFORCALL` invokes the iterator function, `TFORLOOP` tests whether
    /// the first result was nil and either loops back or falls through.
    fn compile_for_in(&mut self, slots: &[u16], iter: NodeId, body: &[NodeId]) -> Result<(), CompileError> {
        let iter_fn = self.compile_expr(iter)?;
        debug_assert!(!slots.is_empty());
        let first_var = slots[0];
        // `TFORCALL` reads the previous iteration's key out of `first_var`
        // to know where to resume (spec's stateless iterator protocol);
        // nil seeds "start of iteration".
        self.builder.emit(Op::LoadNil, first_var, 0, 0);

        let loop_start = self.builder.here();
        self.builder.emit(Op::TForCall, iter_fn, first_var, slots.len() as u16);
        let exit = self.builder.emit_jump(Op::TForLoop, first_var);
        self.loops.push(LoopCtx { continue_labels: Vec::new(), break_labels: Vec::new() });
        self.compile_block(body)?;
        let ctx = self.loops.pop().unwrap();
        for label in ctx.continue_labels {
            self.builder.patch_jump_here(label);
        }
        self.builder.emit_jump_back(loop_start);
        self.builder.patch_jump_here(exit);
        for label in ctx.break_labels {
            self.builder.patch_jump_here(label);
        }
        Ok(())
    }

    fn compile_closure_into(&mut self, func: FunctionId, dest: u16) -> Result<(), CompileError> {
        let proto = Compiler::compile_function(self.program, func)?;
        let idx = self.children.len() as u16;
        self.children.push(proto);
        self.builder.touch_register(dest);
        self.builder.emit(Op::Closure, dest, idx, 0);
        Ok(())
    }

    /// Compiles `expr` and ensures the result lands in exactly `dest`.
    fn compile_expr_into(&mut self, expr: NodeId, dest: u16) -> Result<u16, CompileError> {
        let saved = self.next_reg;
        self.next_reg = self.next_reg.max(dest + 1);
        let r = self.compile_expr_at(expr, Some(dest))?;
        if r != dest {
            self.builder.emit(Op::Move, dest, r, 0);
        }
        self.next_reg = saved.max(self.next_reg);
        Ok(dest)
    }

    fn compile_expr(&mut self, expr: NodeId) -> Result<u16, CompileError> {
        self.compile_expr_at(expr, None)
    }

    fn compile_expr_at(&mut self, id: NodeId, want: Option<u16>) -> Result<u16, CompileError> {
        let pos = self.program.get(id).pos;
        self.builder.set_line(pos.line);
        let expr = match &self.program.get(id).kind {
            NodeKind::Expr(e) => e.clone(),
            NodeKind::Stmt(_) => unreachable!(),
        };
        let dest = want.unwrap_or_else(|| self.alloc_temp());
        match expr {
            Expr::Nil => {
                self.builder.emit(Op::LoadNil, dest, 0, 0);
            }
            Expr::True => {
                self.builder.emit(Op::LoadBool, dest, 1, 0);
            }
            Expr::False => {
                self.builder.emit(Op::LoadBool, dest, 0, 0);
            }
            Expr::Int(i) => self.load_const_int(dest, i),
            Expr::Float(f) => {
                let k = self.builder.add_const(Const::Float(f));
                self.builder.emit(Op::LoadK, dest, k, 0);
            }
            Expr::Str(s) => {
                let k = self.builder.add_const(Const::Str(s));
                self.builder.emit(Op::LoadK, dest, k, 0);
            }
            Expr::Vararg => {
                self.builder.emit(Op::Vararg, dest, 1, 0);
            }
            Expr::Local(slot) => {
                if want.is_none() {
                    return Ok(slot);
                }
                self.builder.emit(Op::Move, dest, slot, 0);
            }
            Expr::Upvalue(index) => {
                self.builder.emit(Op::GetUpval, dest, index, 0);
            }
            Expr::Global(name) => {
                let k = self.builder.add_const(Const::Str(name));
                self.builder.emit(Op::GetGlobal, dest, k, 0);
            }
            Expr::Ident(_) => unreachable!("unresolved identifier reached the compiler"),
            Expr::Unary(op, a) => {
                let ra = self.compile_expr(a)?;
                let opc = match op {
                    UnOp::Neg => Op::Neg,
                    UnOp::Not => Op::Not,
                    UnOp::Len => Op::Len,
                    UnOp::BNot => Op::BNot,
                };
                self.builder.emit(opc, dest, ra, 0);
            }
            Expr::Binary(op, a, b) => {
                let ra = self.compile_expr(a)?;
                let rb = self.compile_expr(b)?;
                self.emit_binop(op, dest, ra, rb);
            }
            Expr::Logical(op, a, b) => {
                self.compile_expr_into(a, dest)?;
                let short_circuit = match op {
                    LogicalOp::And => self.builder.emit_jump(Op::Test, dest),
                    LogicalOp::Or => {
                        let not_reg = self.alloc_temp();
                        self.builder.emit(Op::Not, not_reg, dest, 0);
                        self.builder.emit_jump(Op::Test, not_reg)
                    }
                };
                self.compile_expr_into(b, dest)?;
                self.builder.patch_jump_here(short_circuit);
            }
            Expr::Ternary(cond, then_e, else_e) => {
                let cond_reg = self.compile_expr(cond)?;
                let skip_then = self.builder.emit_jump(Op::Test, cond_reg);
                self.compile_expr_into(then_e, dest)?;
                let end = self.builder.emit_jump(Op::Jmp, 0);
                self.builder.patch_jump_here(skip_then);
                self.compile_expr_into(else_e, dest)?;
                self.builder.patch_jump_here(end);
            }
            Expr::Call(callee, args) => self.compile_call(callee, &args, dest, false)?,
            Expr::MethodCall(..) => unreachable!("method calls are desugared by the resolver"),
            Expr::Member(obj, name) => {
                let obj_reg = self.compile_expr(obj)?;
                let key_reg = self.alloc_temp();
                let k = self.builder.add_const(Const::Str(name));
                self.builder.emit(Op::LoadK, key_reg, k, 0);
                self.builder.emit(Op::GetTable, dest, obj_reg, key_reg);
            }
            Expr::Index(obj, key) => {
                let obj_reg = self.compile_expr(obj)?;
                let key_reg = self.compile_expr(key)?;
                self.builder.emit(Op::GetTable, dest, obj_reg, key_reg);
            }
            Expr::TableCtor(fields) => self.compile_table_ctor(&fields, dest)?,
            Expr::FuncExpr(func) => self.compile_closure_into(func, dest)?,
        }
        Ok(dest)
    }

    fn compile_call(&mut self, callee: NodeId, args: &[NodeId], dest: u16, tail: bool) -> Result<(), CompileError> {
        let callee_reg = self.alloc_temp();
        self.compile_expr_into(callee, callee_reg)?;
        let first_arg = self.next_reg;
        for &arg in args {
            let r = self.alloc_temp();
            self.compile_expr_into(arg, r)?;
        }
        let op = if tail { Op::TailCall } else { Op::Call };
        self.builder.emit(op, callee_reg, first_arg, args.len() as u16);
        if dest != callee_reg {
            self.builder.emit(Op::Move, dest, callee_reg, 0);
        }
        Ok(())
    }

    fn compile_table_ctor(&mut self, fields: &[TableField], dest: u16) -> Result<(), CompileError> {
        self.builder.emit(Op::NewTable, dest, 0, 0);
        let mut array_index: i64 = 1;
        for field in fields {
            match field.clone() {
                TableField::Positional(v) => {
                    let vr = self.compile_expr(v)?;
                    let kr = self.alloc_temp();
                    self.load_const_int(kr, array_index);
                    array_index += 1;
                    self.builder.emit(Op::SetTable, dest, kr, vr);
                }
                TableField::Named(name, v) => {
                    let vr = self.compile_expr(v)?;
                    let kr = self.alloc_temp();
                    let k = self.builder.add_const(Const::Str(name));
                    self.builder.emit(Op::LoadK, kr, k, 0);
                    self.builder.emit(Op::SetTable, dest, kr, vr);
                }
                TableField::Keyed(key, v) => {
                    let kr = self.compile_expr(key)?;
                    let vr = self.compile_expr(v)?;
                    self.builder.emit(Op::SetTable, dest, kr, vr);
                }
            }
        }
        Ok(())
    }

    fn emit_binop(&mut self, op: BinOp, dest: u16, a: u16, b: u16) {
        let opc = match op {
            BinOp::Add => Op::Add,
            BinOp::Sub => Op::Sub,
            BinOp::Mul => Op::Mul,
            BinOp::Div => Op::Div,
            BinOp::Mod => Op::Mod,
            BinOp::Pow => Op::Pow,
            BinOp::BAnd => Op::BAnd,
            BinOp::BOr => Op::BOr,
            BinOp::BXor => Op::BXor,
            BinOp::Shl => Op::Shl,
            BinOp::Shr => Op::Shr,
            BinOp::Eq => Op::Eq,
            BinOp::Ne => Op::Ne,
            BinOp::Lt => Op::Lt,
            BinOp::Le => Op::Le,
            BinOp::Gt => Op::Gt,
            BinOp::Ge => Op::Ge,
            BinOp::Concat => Op::Concat,
        };
        self.builder.emit(opc, dest, a, b);
    }
}
