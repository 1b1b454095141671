//! Recursive-descent parser: tokens to [`Program`].
//!
//! Shaped like the teacher's hand-rolled descent parser (`expressions.rs`'s
//! per-precedence-level method chain) rather than a grammar-generator
//! crate, since this grammar is small and the precedence table is simple
//! C-family arithmetic/logical/bitwise. Grounded on
//! `examples/original_source/src/frontend/parser.hpp`'s production names
//! (`parseForStatement`'s three-way for/foreach split in particular).
//!
//! The parser buffers the whole token stream up front (`lexer::tokenize`),
//! so ambiguous constructs that share a prefix (`for (i = 0, 10)` vs.
//! `for (i = 0; i < 10; i++)`) are resolved by saving and restoring the
//! cursor rather than multi-token lookahead.

use crate::ast::{
    BinOp, CodeRange, Expr, FunctionDef, IncDecOp, LogicalOp, NodeId, Param, Program, Stmt, TableField, UnOp,
    UpvalueRef,
};
use crate::error::{CodeLoc, CompileError};
use crate::lexer::{Lexer, Token, TokenKind};

pub fn parse(src: &str, program: &mut Program) -> Result<(), CompileError> {
    let tokens = Lexer::new(src, &program.file).tokenize()?;
    let mut parser = Parser { tokens, pos: 0, file: program.file.clone(), program };
    let body = parser.parse_block_until(TokenKind::Eof)?;
    *parser.program.top_level_mut() = body;
    Ok(())
}

struct Parser<'p> {
    tokens: Vec<Token>,
    pos: usize,
    file: String,
    program: &'p mut Program,
}

impl<'p> Parser<'p> {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn peek_at(&self, offset: usize) -> &Token {
        self.tokens.get(self.pos + offset).unwrap_or(&self.tokens[self.tokens.len() - 1])
    }

    fn kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn pos_here(&self) -> CodeRange {
        CodeRange::new(self.peek().line, self.peek().column)
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.kind() == kind
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token, CompileError> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.err(format!("expected {what}, found '{}'", self.peek().lexeme)))
        }
    }

    fn expect_ident(&mut self) -> Result<String, CompileError> {
        if self.check(TokenKind::Ident) {
            Ok(self.advance().lexeme)
        } else {
            Err(self.err(format!("expected identifier, found '{}'", self.peek().lexeme)))
        }
    }

    fn err(&self, message: impl Into<String>) -> CompileError {
        let tok = self.peek();
        CompileError::syntax(CodeLoc::new(self.file.clone(), tok.line, tok.column), message)
    }

    // ---- statements ----------------------------------------------------

    fn parse_block_until(&mut self, end: TokenKind) -> Result<Vec<NodeId>, CompileError> {
        let mut stmts = Vec::new();
        while !self.check(end) && !self.check(TokenKind::Eof) {
            stmts.push(self.parse_stmt()?);
        }
        Ok(stmts)
    }

    fn parse_brace_block(&mut self) -> Result<Vec<NodeId>, CompileError> {
        self.expect(TokenKind::LBrace, "'{'")?;
        let stmts = self.parse_block_until(TokenKind::RBrace)?;
        self.expect(TokenKind::RBrace, "'}'")?;
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> Result<NodeId, CompileError> {
        let pos = self.pos_here();
        match self.kind() {
            TokenKind::LBrace => {
                let body = self.parse_brace_block()?;
                Ok(self.program.alloc_stmt(Stmt::Block(body), pos))
            }
            TokenKind::Let | TokenKind::Const => self.parse_local_decl(pos),
            TokenKind::If => self.parse_if(pos),
            TokenKind::While => self.parse_while(pos),
            TokenKind::For => self.parse_for(pos),
            TokenKind::Foreach => self.parse_foreach(pos),
            TokenKind::Function => self.parse_function_stmt(pos),
            TokenKind::Return => {
                self.advance();
                let value = if self.check(TokenKind::Semi) { None } else { Some(self.parse_expr()?) };
                self.expect(TokenKind::Semi, "';'")?;
                Ok(self.program.alloc_stmt(Stmt::Return(value), pos))
            }
            TokenKind::Break => {
                self.advance();
                self.expect(TokenKind::Semi, "';'")?;
                Ok(self.program.alloc_stmt(Stmt::Break, pos))
            }
            TokenKind::Continue => {
                self.advance();
                self.expect(TokenKind::Semi, "';'")?;
                Ok(self.program.alloc_stmt(Stmt::Continue, pos))
            }
            TokenKind::Defer => {
                self.advance();
                let body = self.parse_brace_block()?;
                let func = self.alloc_lambda(None, Vec::new(), false, body, pos, false);
                Ok(self.program.alloc_stmt(Stmt::Defer(func), pos))
            }
            TokenKind::Module => {
                self.advance();
                self.expect(TokenKind::Semi, "';'")?;
                self.program.is_module = true;
                Ok(self.program.alloc_stmt(Stmt::ModuleDecl, pos))
            }
            TokenKind::Export => self.parse_export(pos),
            TokenKind::Increment | TokenKind::Decrement => {
                let op = if self.advance().kind == TokenKind::Increment { IncDecOp::Inc } else { IncDecOp::Dec };
                let target = self.parse_postfix_for_place()?;
                self.expect(TokenKind::Semi, "';'")?;
                Ok(self.program.alloc_stmt(Stmt::IncDec { target, op }, pos))
            }
            _ => self.parse_expr_or_assign_stmt(pos),
        }
    }

    fn parse_local_decl(&mut self, pos: CodeRange) -> Result<NodeId, CompileError> {
        let is_const_decl = self.advance().kind == TokenKind::Const;
        let mut names = Vec::new();
        loop {
            names.push(self.expect_ident()?);
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        let mut values = Vec::new();
        if self.eat(TokenKind::Assign) {
            loop {
                values.push(self.parse_expr()?);
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::Semi, "';'")?;
        let is_const = vec![is_const_decl; names.len()];
        let slots = vec![0u16; names.len()];
        Ok(self.program.alloc_stmt(Stmt::LocalDecl { names, is_const, slots, values }, pos))
    }

    fn parse_if(&mut self, pos: CodeRange) -> Result<NodeId, CompileError> {
        self.advance();
        self.expect(TokenKind::LParen, "'('")?;
        let cond = self.parse_expr()?;
        self.expect(TokenKind::RParen, "')'")?;
        let then_block = self.parse_brace_block()?;
        let mut elifs = Vec::new();
        while self.check(TokenKind::Elseif) {
            self.advance();
            self.expect(TokenKind::LParen, "'('")?;
            let c = self.parse_expr()?;
            self.expect(TokenKind::RParen, "')'")?;
            let b = self.parse_brace_block()?;
            elifs.push((c, b));
        }
        let else_block = if self.eat(TokenKind::Else) {
            if self.check(TokenKind::If) {
                let nested_pos = self.pos_here();
                Some(vec![self.parse_if(nested_pos)?])
            } else {
                Some(self.parse_brace_block()?)
            }
        } else {
            None
        };
        Ok(self.program.alloc_stmt(Stmt::If { cond, then_block, elifs, else_block }, pos))
    }

    fn parse_while(&mut self, pos: CodeRange) -> Result<NodeId, CompileError> {
        self.advance();
        self.expect(TokenKind::LParen, "'('")?;
        let cond = self.parse_expr()?;
        self.expect(TokenKind::RParen, "')'")?;
        let body = self.parse_brace_block()?;
        Ok(self.program.alloc_stmt(Stmt::While { cond, body }, pos))
    }

    fn parse_foreach(&mut self, pos: CodeRange) -> Result<NodeId, CompileError> {
        self.advance();
        self.expect(TokenKind::LParen, "'('")?;
        let mut vars = vec![self.expect_ident()?];
        while self.eat(TokenKind::Comma) {
            vars.push(self.expect_ident()?);
        }
        self.expect(TokenKind::In, "'in'")?;
        let iter = self.parse_expr()?;
        self.expect(TokenKind::RParen, "')'")?;
        let body = self.parse_brace_block()?;
        let slots = vec![0u16; vars.len()];
        Ok(self.program.alloc_stmt(Stmt::ForIn { vars, slots, iter, body }, pos))
    }

    /// `for` is three grammars sharing a `for (` prefix: the classic
    /// `init; cond; step`, the numeric range `i = start, stop[, step]`, and
    /// a single-variable iterator form `v in expr`. Tried in that order,
    /// rewinding the cursor between attempts.
    fn parse_for(&mut self, pos: CodeRange) -> Result<NodeId, CompileError> {
        self.advance();
        self.expect(TokenKind::LParen, "'('")?;

        let save = self.pos;
        if self.check(TokenKind::Ident) {
            let name = self.peek().lexeme.clone();
            if self.peek_at(1).kind == TokenKind::Assign {
                self.advance();
                self.advance();
                if let Some(stmt) = self.try_parse_for_num(name.clone(), pos)? {
                    return Ok(stmt);
                }
                self.pos = save;
            } else if self.peek_at(1).kind == TokenKind::In {
                self.advance();
                self.advance();
                let iter = self.parse_expr()?;
                self.expect(TokenKind::RParen, "')'")?;
                let body = self.parse_brace_block()?;
                return Ok(self.program.alloc_stmt(
                    Stmt::ForIn { vars: vec![name], slots: vec![0], iter, body },
                    pos,
                ));
            }
        }
        self.pos = save;
        self.parse_for_c(pos)
    }

    fn try_parse_for_num(&mut self, var: String, pos: CodeRange) -> Result<Option<NodeId>, CompileError> {
        let start = self.parse_expr()?;
        if !self.eat(TokenKind::Comma) {
            return Ok(None);
        }
        let stop = self.parse_expr()?;
        let step = if self.eat(TokenKind::Comma) { Some(self.parse_expr()?) } else { None };
        if !self.eat(TokenKind::RParen) {
            return Ok(None);
        }
        let body = self.parse_brace_block()?;
        Ok(Some(self.program.alloc_stmt(Stmt::ForNum { var, slot: 0, start, stop, step, body }, pos)))
    }

    fn parse_for_c(&mut self, pos: CodeRange) -> Result<NodeId, CompileError> {
        let init = if self.check(TokenKind::Semi) {
            None
        } else if self.check(TokenKind::Let) {
            Some(self.parse_local_decl(self.pos_here())?)
        } else {
            let stmt_pos = self.pos_here();
            let s = self.parse_expr_or_assign_stmt(stmt_pos)?;
            Some(s)
        };
        if init.is_none() {
            self.expect(TokenKind::Semi, "';'")?;
        }
        let cond = if self.check(TokenKind::Semi) { None } else { Some(self.parse_expr()?) };
        self.expect(TokenKind::Semi, "';'")?;
        let step = if self.check(TokenKind::RParen) { None } else { Some(self.parse_for_c_step()?) };
        self.expect(TokenKind::RParen, "')'")?;
        let body = self.parse_brace_block()?;
        Ok(self.program.alloc_stmt(Stmt::ForC { init, cond, step, body }, pos))
    }

    /// The step clause of a C-style `for` is an assignment/increment
    /// expression with no trailing `;` (the `)` terminates it instead).
    fn parse_for_c_step(&mut self) -> Result<NodeId, CompileError> {
        let pos = self.pos_here();
        if self.check(TokenKind::Increment) || self.check(TokenKind::Decrement) {
            let op = if self.advance().kind == TokenKind::Increment { IncDecOp::Inc } else { IncDecOp::Dec };
            let target = self.parse_postfix_for_place()?;
            return Ok(self.program.alloc_stmt(Stmt::IncDec { target, op }, pos));
        }
        let expr = self.parse_expr()?;
        if self.check(TokenKind::Increment) || self.check(TokenKind::Decrement) {
            let op = if self.advance().kind == TokenKind::Increment { IncDecOp::Inc } else { IncDecOp::Dec };
            return Ok(self.program.alloc_stmt(Stmt::IncDec { target: expr, op }, pos));
        }
        if let Some(op) = compound_op(self.kind()) {
            self.advance();
            let value = self.parse_expr()?;
            return Ok(self.program.alloc_stmt(Stmt::CompoundAssign { op, target: expr, value }, pos));
        }
        if self.eat(TokenKind::Assign) {
            let value = self.parse_expr()?;
            return Ok(self.program.alloc_stmt(Stmt::Assign { target: expr, value }, pos));
        }
        Ok(self.program.alloc_stmt(Stmt::ExprStmt(expr), pos))
    }

    fn parse_export(&mut self, pos: CodeRange) -> Result<NodeId, CompileError> {
        self.advance();
        if self.eat(TokenKind::LBrace) {
            let mut names = Vec::new();
            if !self.check(TokenKind::RBrace) {
                loop {
                    names.push(self.expect_ident()?);
                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.expect(TokenKind::RBrace, "'}'")?;
            self.expect(TokenKind::Semi, "';'")?;
            return Ok(self.program.alloc_stmt(Stmt::ExportList(names), pos));
        }
        let inner = self.parse_stmt()?;
        Ok(self.program.alloc_stmt(Stmt::ExportDecl(inner), pos))
    }

    /// `function name(...) {}`, `function Obj.field(...) {}` and
    /// `function Obj:method(...) {}`. Only the bare-name form produces a
    /// `FuncDeclStmt`; a dotted or colon path desugars into an assignment
    /// into the table, since `FuncDeclStmt` only knows how to bind a plain
    /// name (spec.md §4.1 "methods are sugar for a function-valued field").
    fn parse_function_stmt(&mut self, pos: CodeRange) -> Result<NodeId, CompileError> {
        self.advance();
        let base_name = self.expect_ident()?;
        let mut path: Vec<String> = Vec::new();
        while self.eat(TokenKind::Dot) {
            path.push(self.expect_ident()?);
        }
        let method_name = if self.eat(TokenKind::Colon) { Some(self.expect_ident()?) } else { None };
        let is_method = method_name.is_some();
        let full_name = {
            let mut parts = vec![base_name.clone()];
            parts.extend(path.iter().cloned());
            if let Some(m) = &method_name {
                parts.push(m.clone());
            }
            parts.join(".")
        };
        let (params, is_vararg) = self.parse_params()?;
        let body = self.parse_brace_block()?;
        let func = self.alloc_lambda(Some(full_name), params, is_vararg, body, pos, is_method);

        if path.is_empty() && method_name.is_none() {
            return Ok(self.program.alloc_stmt(Stmt::FuncDeclStmt { name: base_name, slot_hint: 0, func }, pos));
        }

        let mut target = self.program.alloc_expr(Expr::Ident(base_name), pos);
        for segment in path {
            target = self.program.alloc_expr(Expr::Member(target, segment), pos);
        }
        if let Some(m) = method_name {
            target = self.program.alloc_expr(Expr::Member(target, m), pos);
        }
        let value = self.program.alloc_expr(Expr::FuncExpr(func), pos);
        Ok(self.program.alloc_stmt(Stmt::Assign { target, value }, pos))
    }

    fn parse_params(&mut self) -> Result<(Vec<Param>, bool), CompileError> {
        self.expect(TokenKind::LParen, "'('")?;
        let mut params = Vec::new();
        let mut is_vararg = false;
        if !self.check(TokenKind::RParen) {
            loop {
                if self.eat(TokenKind::Vararg) {
                    is_vararg = true;
                    break;
                }
                let is_const = self.eat(TokenKind::Const);
                let name = self.expect_ident()?;
                params.push(Param { name, is_const });
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen, "')'")?;
        Ok((params, is_vararg))
    }

    fn alloc_lambda(
        &mut self,
        name: Option<String>,
        mut params: Vec<Param>,
        is_vararg: bool,
        body: Vec<NodeId>,
        pos: CodeRange,
        is_method: bool,
    ) -> u32 {
        if is_method {
            params.insert(0, Param { name: "self".to_string(), is_const: false });
        }
        self.program.alloc_function(FunctionDef {
            name,
            params,
            is_vararg,
            body,
            pos,
            is_method,
            num_locals: 0,
            upvalues: Vec::<UpvalueRef>::new(),
        })
    }

    /// A place expression for `++`/`--`: an identifier, member or index
    /// chain with no call involved.
    fn parse_postfix_for_place(&mut self) -> Result<NodeId, CompileError> {
        self.parse_postfix()
    }

    fn parse_expr_or_assign_stmt(&mut self, pos: CodeRange) -> Result<NodeId, CompileError> {
        let expr = self.parse_expr()?;
        if self.check(TokenKind::Increment) || self.check(TokenKind::Decrement) {
            let op = if self.advance().kind == TokenKind::Increment { IncDecOp::Inc } else { IncDecOp::Dec };
            self.expect(TokenKind::Semi, "';'")?;
            return Ok(self.program.alloc_stmt(Stmt::IncDec { target: expr, op }, pos));
        }
        if let Some(op) = compound_op(self.kind()) {
            self.advance();
            let value = self.parse_expr()?;
            self.expect(TokenKind::Semi, "';'")?;
            return Ok(self.program.alloc_stmt(Stmt::CompoundAssign { op, target: expr, value }, pos));
        }
        if self.eat(TokenKind::Assign) {
            let value = self.parse_expr()?;
            self.expect(TokenKind::Semi, "';'")?;
            return Ok(self.program.alloc_stmt(Stmt::Assign { target: expr, value }, pos));
        }
        self.expect(TokenKind::Semi, "';'")?;
        Ok(self.program.alloc_stmt(Stmt::ExprStmt(expr), pos))
    }

    // ---- expressions -----------------------------------------------------

    fn parse_expr(&mut self) -> Result<NodeId, CompileError> {
        self.parse_ternary()
    }

    fn parse_ternary(&mut self) -> Result<NodeId, CompileError> {
        let pos = self.pos_here();
        let cond = self.parse_or()?;
        if self.eat(TokenKind::Question) {
            let then_e = self.parse_expr()?;
            self.expect(TokenKind::Colon, "':'")?;
            let else_e = self.parse_ternary()?;
            return Ok(self.program.alloc_expr(Expr::Ternary(cond, then_e, else_e), pos));
        }
        Ok(cond)
    }

    fn parse_or(&mut self) -> Result<NodeId, CompileError> {
        let pos = self.pos_here();
        let mut lhs = self.parse_and()?;
        while self.check(TokenKind::Or) || self.check(TokenKind::OrOr) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = self.program.alloc_expr(Expr::Logical(LogicalOp::Or, lhs, rhs), pos);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<NodeId, CompileError> {
        let pos = self.pos_here();
        let mut lhs = self.parse_bitor()?;
        while self.check(TokenKind::And) || self.check(TokenKind::AndAnd) {
            self.advance();
            let rhs = self.parse_bitor()?;
            lhs = self.program.alloc_expr(Expr::Logical(LogicalOp::And, lhs, rhs), pos);
        }
        Ok(lhs)
    }

    fn parse_bitor(&mut self) -> Result<NodeId, CompileError> {
        self.parse_left_assoc(Self::parse_bitxor, &[(TokenKind::BOr, BinOp::BOr)])
    }

    fn parse_bitxor(&mut self) -> Result<NodeId, CompileError> {
        self.parse_left_assoc(Self::parse_bitand, &[(TokenKind::BXor, BinOp::BXor)])
    }

    fn parse_bitand(&mut self) -> Result<NodeId, CompileError> {
        self.parse_left_assoc(Self::parse_equality, &[(TokenKind::BAnd, BinOp::BAnd)])
    }

    fn parse_equality(&mut self) -> Result<NodeId, CompileError> {
        self.parse_left_assoc(Self::parse_comparison, &[(TokenKind::Eq, BinOp::Eq), (TokenKind::Ne, BinOp::Ne)])
    }

    fn parse_comparison(&mut self) -> Result<NodeId, CompileError> {
        self.parse_left_assoc(
            Self::parse_shift,
            &[(TokenKind::Lt, BinOp::Lt), (TokenKind::Le, BinOp::Le), (TokenKind::Gt, BinOp::Gt), (TokenKind::Ge, BinOp::Ge)],
        )
    }

    fn parse_shift(&mut self) -> Result<NodeId, CompileError> {
        self.parse_left_assoc(Self::parse_concat, &[(TokenKind::Shl, BinOp::Shl), (TokenKind::Shr, BinOp::Shr)])
    }

    /// Right-associative, like Lua's `..`: `"a" .. "b" .. "c"` builds as
    /// `"a" .. ("b" .. "c")`.
    fn parse_concat(&mut self) -> Result<NodeId, CompileError> {
        let pos = self.pos_here();
        let lhs = self.parse_additive()?;
        if self.eat(TokenKind::Concat) {
            let rhs = self.parse_concat()?;
            return Ok(self.program.alloc_expr(Expr::Binary(BinOp::Concat, lhs, rhs), pos));
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<NodeId, CompileError> {
        self.parse_left_assoc(Self::parse_mul, &[(TokenKind::Plus, BinOp::Add), (TokenKind::Minus, BinOp::Sub)])
    }

    fn parse_mul(&mut self) -> Result<NodeId, CompileError> {
        self.parse_left_assoc(
            Self::parse_unary,
            &[(TokenKind::Star, BinOp::Mul), (TokenKind::Slash, BinOp::Div), (TokenKind::Percent, BinOp::Mod)],
        )
    }

    fn parse_left_assoc(
        &mut self,
        next: fn(&mut Self) -> Result<NodeId, CompileError>,
        ops: &[(TokenKind, BinOp)],
    ) -> Result<NodeId, CompileError> {
        let pos = self.pos_here();
        let mut lhs = next(self)?;
        loop {
            let Some(&(_, op)) = ops.iter().find(|(k, _)| *k == self.kind()) else {
                break;
            };
            self.advance();
            let rhs = next(self)?;
            lhs = self.program.alloc_expr(Expr::Binary(op, lhs, rhs), pos);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<NodeId, CompileError> {
        let pos = self.pos_here();
        let op = match self.kind() {
            TokenKind::Minus => Some(UnOp::Neg),
            TokenKind::Not | TokenKind::Bang => Some(UnOp::Not),
            TokenKind::Hash => Some(UnOp::Len),
            TokenKind::Tilde => Some(UnOp::BNot),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(self.program.alloc_expr(Expr::Unary(op, operand), pos));
        }
        self.parse_pow()
    }

    /// Right-associative and binding tighter than unary minus on its right
    /// operand only (`-2 ** 2` is `-(2 ** 2)`), matching the teacher's
    /// `parsePower` placement directly above `parseUnary` in the chain.
    fn parse_pow(&mut self) -> Result<NodeId, CompileError> {
        let pos = self.pos_here();
        let base = self.parse_postfix()?;
        if self.eat(TokenKind::Power) {
            let exp = self.parse_unary()?;
            return Ok(self.program.alloc_expr(Expr::Binary(BinOp::Pow, base, exp), pos));
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> Result<NodeId, CompileError> {
        let mut expr = self.parse_primary()?;
        loop {
            let pos = self.pos_here();
            match self.kind() {
                TokenKind::LParen => {
                    let args = self.parse_args()?;
                    expr = self.program.alloc_expr(Expr::Call(expr, args), pos);
                }
                TokenKind::Dot => {
                    self.advance();
                    let name = self.expect_ident()?;
                    expr = self.program.alloc_expr(Expr::Member(expr, name), pos);
                }
                TokenKind::Colon => {
                    self.advance();
                    let name = self.expect_ident()?;
                    let args = self.parse_args()?;
                    expr = self.program.alloc_expr(Expr::MethodCall(expr, name, args), pos);
                }
                TokenKind::LBracket => {
                    self.advance();
                    let key = self.parse_expr()?;
                    self.expect(TokenKind::RBracket, "']'")?;
                    expr = self.program.alloc_expr(Expr::Index(expr, key), pos);
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_args(&mut self) -> Result<Vec<NodeId>, CompileError> {
        self.expect(TokenKind::LParen, "'('")?;
        let mut args = Vec::new();
        if !self.check(TokenKind::RParen) {
            loop {
                args.push(self.parse_expr()?);
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen, "')'")?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<NodeId, CompileError> {
        let pos = self.pos_here();
        match self.kind() {
            TokenKind::Nil => {
                self.advance();
                Ok(self.program.alloc_expr(Expr::Nil, pos))
            }
            TokenKind::True => {
                self.advance();
                Ok(self.program.alloc_expr(Expr::True, pos))
            }
            TokenKind::False => {
                self.advance();
                Ok(self.program.alloc_expr(Expr::False, pos))
            }
            TokenKind::Number => {
                let lexeme = self.advance().lexeme;
                Ok(self.program.alloc_expr(parse_number(&lexeme), pos))
            }
            TokenKind::String => {
                let s = self.advance().lexeme;
                Ok(self.program.alloc_expr(Expr::Str(s), pos))
            }
            TokenKind::Vararg => {
                self.advance();
                Ok(self.program.alloc_expr(Expr::Vararg, pos))
            }
            TokenKind::Ident => {
                let name = self.advance().lexeme;
                Ok(self.program.alloc_expr(Expr::Ident(name), pos))
            }
            TokenKind::Import => {
                self.advance();
                let arg = if self.check(TokenKind::LParen) {
                    self.parse_args()?.into_iter().next().ok_or_else(|| self.err("'import' expects one argument"))?
                } else {
                    self.parse_unary()?
                };
                let callee = self.program.alloc_expr(Expr::Ident("import".to_string()), pos);
                Ok(self.program.alloc_expr(Expr::Call(callee, vec![arg]), pos))
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            TokenKind::LBrace => self.parse_table_ctor(pos),
            TokenKind::Function => {
                self.advance();
                let (params, is_vararg) = self.parse_params()?;
                let body = self.parse_brace_block()?;
                let func = self.alloc_lambda(None, params, is_vararg, body, pos, false);
                Ok(self.program.alloc_expr(Expr::FuncExpr(func), pos))
            }
            _ => Err(self.err(format!("unexpected token '{}'", self.peek().lexeme))),
        }
    }

    fn parse_table_ctor(&mut self, pos: CodeRange) -> Result<NodeId, CompileError> {
        self.advance();
        let mut fields = Vec::new();
        while !self.check(TokenKind::RBrace) {
            if self.eat(TokenKind::LBracket) {
                let key = self.parse_expr()?;
                self.expect(TokenKind::RBracket, "']'")?;
                self.expect(TokenKind::Assign, "'='")?;
                let value = self.parse_expr()?;
                fields.push(TableField::Keyed(key, value));
            } else if self.check(TokenKind::Ident) && self.peek_at(1).kind == TokenKind::Assign {
                let name = self.advance().lexeme;
                self.advance();
                let value = self.parse_expr()?;
                fields.push(TableField::Named(name, value));
            } else {
                let value = self.parse_expr()?;
                fields.push(TableField::Positional(value));
            }
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RBrace, "'}'")?;
        Ok(self.program.alloc_expr(Expr::TableCtor(fields), pos))
    }
}

fn compound_op(kind: TokenKind) -> Option<BinOp> {
    Some(match kind {
        TokenKind::PlusAssign => BinOp::Add,
        TokenKind::MinusAssign => BinOp::Sub,
        TokenKind::StarAssign => BinOp::Mul,
        TokenKind::SlashAssign => BinOp::Div,
        TokenKind::PercentAssign => BinOp::Mod,
        _ => return None,
    })
}

fn parse_number(lexeme: &str) -> Expr {
    if let Some(hex) = lexeme.strip_prefix("0x").or_else(|| lexeme.strip_prefix("0X")) {
        return Expr::Int(i64::from_str_radix(hex, 16).unwrap_or(0));
    }
    if lexeme.contains('.') || lexeme.contains('e') || lexeme.contains('E') {
        Expr::Float(lexeme.parse().unwrap_or(0.0))
    } else {
        match lexeme.parse::<i64>() {
            Ok(i) => Expr::Int(i),
            Err(_) => Expr::Float(lexeme.parse().unwrap_or(0.0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::NodeKind;

    fn parse_src(src: &str) -> Program {
        let mut program = Program::new("<test>");
        parse(src, &mut program).unwrap();
        program
    }

    #[test]
    fn parses_arithmetic_precedence() {
        let program = parse_src("return 1 + 2 * 3;");
        let top = program.top_level();
        match &program.get(top[0]).kind {
            NodeKind::Stmt(Stmt::Return(Some(id))) => match &program.get(*id).kind {
                NodeKind::Expr(Expr::Binary(BinOp::Add, _, rhs)) => {
                    assert!(matches!(&program.get(*rhs).kind, NodeKind::Expr(Expr::Binary(BinOp::Mul, _, _))));
                }
                other => panic!("unexpected: {other:?}"),
            },
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_for_num_comma_form() {
        let program = parse_src("for (i = 1, 10, 2) { }");
        let top = program.top_level();
        assert!(matches!(&program.get(top[0]).kind, NodeKind::Stmt(Stmt::ForNum { .. })));
    }

    #[test]
    fn parses_for_c_form() {
        let program = parse_src("for (let i = 0; i < 10; i++) { }");
        let top = program.top_level();
        assert!(matches!(&program.get(top[0]).kind, NodeKind::Stmt(Stmt::ForC { .. })));
    }

    #[test]
    fn parses_method_call() {
        let program = parse_src("obj:greet(1, 2);");
        let top = program.top_level();
        match &program.get(top[0]).kind {
            NodeKind::Stmt(Stmt::ExprStmt(id)) => {
                assert!(matches!(&program.get(*id).kind, NodeKind::Expr(Expr::MethodCall(_, name, args)) if name == "greet" && args.len() == 2));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_table_constructor_fields() {
        let program = parse_src("let t = {1, x = 2, [3 + 0] = 4};");
        let top = program.top_level();
        match &program.get(top[0]).kind {
            NodeKind::Stmt(Stmt::LocalDecl { values, .. }) => {
                match &program.get(values[0]).kind {
                    NodeKind::Expr(Expr::TableCtor(fields)) => assert_eq!(fields.len(), 3),
                    other => panic!("unexpected: {other:?}"),
                }
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
