//! Code generation.
//!
//! Lowers the optimized tree into a [`Program`]: one unit per function, with
//! the storage decisions made by the resolver and allocator baked into the
//! instruction choice. A plain variable is a frame slot; a captured one goes
//! through a heap cell pinned in a slot; a captured top-level one goes
//! through the interpreter's global cell table. Accesses the resolver could
//! not bind compile to a `Fail` instruction carrying the runtime message.

use lox_parser::{ClassDecl, Expr, FunctionDecl, Lit, Stmt, Token, TokenKind};

use crate::allocator::Allocator;
use crate::bytecode::{Capture, ClassInfo, Constant, MethodInfo, Op, Program, Unit, UnitBuilder, UnitKind};
use crate::error::{CompileError, CompileResult};
use crate::resolver::{FunId, Resolver, VarId};

/// Compilation context of the unit currently being emitted.
#[derive(Clone, Copy)]
struct Ctx {
    fun: FunId,
    kind: UnitKind,
}

pub struct CodeGenerator<'a> {
    resolver: &'a Resolver,
    allocator: &'a Allocator<'a>,
    units: Vec<Unit>,
    classes: Vec<ClassInfo>,
}

impl<'a> CodeGenerator<'a> {
    pub fn new(resolver: &'a Resolver, allocator: &'a Allocator<'a>) -> Self {
        CodeGenerator { resolver, allocator, units: Vec::new(), classes: Vec::new() }
    }

    pub fn generate(mut self, entry: &FunctionDecl) -> CompileResult<Program> {
        // Index 0 is reserved for the entry unit; nested units are appended
        // while it is being built.
        self.units.push(Unit {
            name: entry.name.lexeme.clone(),
            kind: UnitKind::Script,
            arity: 0,
            slots: 0,
            code: Vec::new(),
            lines: Vec::new(),
            captures: Vec::new(),
            late_inits: Vec::new(),
        });
        let unit = self.build_unit(None, entry)?;
        self.units[0] = unit;
        Ok(Program { units: self.units, classes: self.classes })
    }

    fn compile_function(&mut self, class: Option<&ClassDecl>, fun: &FunctionDecl) -> CompileResult<u16> {
        let unit = self.build_unit(class, fun)?;
        self.units.push(unit);
        Ok((self.units.len() - 1) as u16)
    }

    fn build_unit(&mut self, class: Option<&ClassDecl>, fun: &FunctionDecl) -> CompileResult<Unit> {
        let fun_id = fun.name.id;
        let kind = if fun.is_native {
            UnitKind::Native
        } else if class.is_some() {
            if fun.name.lexeme == "init" {
                UnitKind::Initializer
            } else {
                UnitKind::Method
            }
        } else if fun_id == lox_parser::TokenId::ENTRY {
            UnitKind::Script
        } else {
            UnitKind::Function
        };
        let mut b = UnitBuilder::new(&fun.name.lexeme, kind, fun.params.len() as u8);
        let ctx = Ctx { fun: fun_id, kind };

        if kind != UnitKind::Native {
            // The caller has stored the arguments in the leading slots.
            // Captured parameters are rehomed into cells in place.
            for param in &fun.params {
                let Some(var) = self.resolver.def_of(param.id) else { continue };
                if self.resolver.var(var).is_captured() && self.resolver.is_read(var) {
                    let slot = self.slot(fun_id, var)?;
                    b.emit(Op::GetSlot(slot), param.line);
                    b.emit(Op::DefineCell { var: var.0, slot }, param.line);
                }
            }
            // Pin the cells wired at construction into their frame slots.
            if kind != UnitKind::Script {
                for &var in self.resolver.captured(fun_id) {
                    if self.resolver.var(var).is_global {
                        continue;
                    }
                    let slot = self.slot(fun_id, var)?;
                    b.emit(Op::LoadCapture { var: var.0, slot }, fun.name.line);
                }
            }
            self.compile_stmts(&mut b, ctx, &fun.body)?;
            let line = fun.body.last().map(stmt_line).unwrap_or(fun.name.line);
            if kind == UnitKind::Initializer {
                b.emit(Op::ReturnReceiver, line);
            } else {
                b.emit(Op::Const(Constant::Nil), line);
                b.emit(Op::Return, line);
            }
        }

        let captures = if kind == UnitKind::Script {
            // Top-level code reads its captured variables straight from the
            // global table; nothing to wire.
            Vec::new()
        } else {
            self.resolver
                .captured(fun_id)
                .iter()
                .filter(|&&var| !self.resolver.var(var).is_global)
                .map(|&var| Capture { var: var.0, hops: self.resolver.var(var).hops_from(fun_id) })
                .collect()
        };
        let late_inits =
            self.resolver.late_inits_of(fun_id).into_iter().map(|var| var.0).collect();
        Ok(b.finish(self.allocator.frame_size(fun_id), captures, late_inits))
    }

    fn slot(&self, fun: FunId, var: VarId) -> CompileResult<u16> {
        self.allocator.slot(fun, var).ok_or_else(|| {
            CompileError::Internal(format!("no slot for '{}'", self.resolver.var(var).name))
        })
    }

    fn compile_stmts(&mut self, b: &mut UnitBuilder, ctx: Ctx, stmts: &[Stmt]) -> CompileResult<()> {
        for stmt in stmts {
            self.compile_stmt(b, ctx, stmt)?;
        }
        Ok(())
    }

    fn compile_stmt(&mut self, b: &mut UnitBuilder, ctx: Ctx, stmt: &Stmt) -> CompileResult<()> {
        match stmt {
            Stmt::Block { statements } => self.compile_stmts(b, ctx, statements),
            Stmt::Class(decl) => self.compile_class(b, ctx, decl),
            Stmt::Expression { expr } => {
                self.compile_expr(b, ctx, expr)?;
                // Every expression form nets exactly one stack value.
                b.emit(Op::Pop, expr_line(expr));
                Ok(())
            }
            Stmt::Function(decl) => {
                let unit = self.compile_function(None, decl)?;
                b.emit(Op::Closure { unit }, decl.name.line);
                self.define_variable(b, ctx, &decl.name)
            }
            Stmt::If { condition, then_branch, else_branch } => {
                self.compile_expr(b, ctx, condition)?;
                let skip_then = b.emit(Op::JumpIfFalse(u32::MAX), expr_line(condition));
                self.compile_stmt(b, ctx, then_branch)?;
                match else_branch {
                    Some(else_branch) => {
                        let skip_else = b.emit(Op::Jump(u32::MAX), stmt_line(then_branch));
                        b.patch_jump(skip_then);
                        self.compile_stmt(b, ctx, else_branch)?;
                        b.patch_jump(skip_else);
                    }
                    None => b.patch_jump(skip_then),
                }
                Ok(())
            }
            Stmt::Print { expr } => {
                self.compile_expr(b, ctx, expr)?;
                b.emit(Op::Print, expr_line(expr));
                Ok(())
            }
            Stmt::Return { keyword, value } => {
                match value {
                    Some(value) => {
                        self.compile_expr(b, ctx, value)?;
                        b.emit(Op::Return, keyword.line);
                    }
                    None if ctx.kind == UnitKind::Initializer => {
                        b.emit(Op::ReturnReceiver, keyword.line);
                    }
                    None => {
                        b.emit(Op::Const(Constant::Nil), keyword.line);
                        b.emit(Op::Return, keyword.line);
                    }
                }
                Ok(())
            }
            Stmt::Var { name, initializer } => {
                match initializer {
                    Some(initializer) => self.compile_expr(b, ctx, initializer)?,
                    None => {
                        b.emit(Op::Const(Constant::Nil), name.line);
                    }
                }
                self.define_variable(b, ctx, name)
            }
            Stmt::While { condition, body } => {
                let start = b.here();
                self.compile_expr(b, ctx, condition)?;
                let exit = b.emit(Op::JumpIfFalse(u32::MAX), expr_line(condition));
                self.compile_stmt(b, ctx, body)?;
                b.emit(Op::Jump(start), stmt_line(body));
                b.patch_jump(exit);
                Ok(())
            }
        }
    }

    fn compile_class(&mut self, b: &mut UnitBuilder, ctx: Ctx, decl: &ClassDecl) -> CompileResult<()> {
        let mut methods = Vec::new();
        for method in &decl.methods {
            methods.push(MethodInfo {
                name: method.name.lexeme.clone(),
                unit: self.compile_function(Some(decl), method)?,
            });
        }
        self.classes.push(ClassInfo {
            name: decl.name.lexeme.clone(),
            line: decl.name.line,
            methods,
        });
        let class = (self.classes.len() - 1) as u16;
        let line = match &decl.superclass {
            Some(superclass) => {
                self.compile_expr(b, ctx, superclass)?;
                expr_line(superclass)
            }
            None => decl.name.line,
        };
        b.emit(Op::Class { class, has_super: decl.superclass.is_some() }, line);
        self.define_variable(b, ctx, &decl.name)
    }

    /// Stores the value on top of the stack into a freshly declared variable.
    fn define_variable(&mut self, b: &mut UnitBuilder, ctx: Ctx, name: &Token) -> CompileResult<()> {
        let Some(var) = self.resolver.def_of(name.id) else {
            return Err(CompileError::Internal(format!("undeclared '{}'", name.lexeme)));
        };
        let line = name.line;
        if !self.resolver.is_read(var) {
            // A dead binding that outlived the optimizer's pass budget.
            b.emit(Op::Pop, line);
            return Ok(());
        }
        let def = self.resolver.var(var);
        if def.is_global && def.is_captured() {
            if def.is_late_init() {
                b.emit(Op::LateDefineGlobal { var: var.0 }, line);
            } else {
                b.emit(Op::DefineGlobalCell { var: var.0 }, line);
            }
        } else if def.is_late_init() {
            let slot = self.slot(ctx.fun, var)?;
            b.emit(Op::LateDefine { var: var.0, slot }, line);
        } else if def.is_captured() {
            let slot = self.slot(ctx.fun, var)?;
            b.emit(Op::DefineCell { var: var.0, slot }, line);
        } else {
            let slot = self.slot(ctx.fun, var)?;
            b.emit(Op::SetSlot(slot), line);
        }
        Ok(())
    }

    fn compile_expr(&mut self, b: &mut UnitBuilder, ctx: Ctx, expr: &Expr) -> CompileResult<()> {
        match expr {
            Expr::Assign { name, value } => {
                let Some(var) = self.resolver.use_of(name.id) else {
                    // The value is not evaluated; the error fires first.
                    b.emit(
                        Op::Fail { message: format!("Undefined variable '{}'.", name.lexeme) },
                        name.line,
                    );
                    return Ok(());
                };
                self.compile_expr(b, ctx, value)?;
                b.emit(Op::Dup, name.line);
                let def = self.resolver.var(var);
                if def.is_global && def.is_captured() {
                    b.emit(Op::SetGlobal { var: var.0 }, name.line);
                } else if def.is_captured() {
                    let slot = self.slot(ctx.fun, var)?;
                    b.emit(Op::SetCell(slot), name.line);
                } else {
                    let slot = self.slot(ctx.fun, var)?;
                    b.emit(Op::SetSlot(slot), name.line);
                }
                Ok(())
            }
            Expr::Binary { left, op, right } => self.compile_binary(b, ctx, left, op, right),
            Expr::Call { callee, paren, args } => {
                self.compile_expr(b, ctx, callee)?;
                for arg in args {
                    self.compile_expr(b, ctx, arg)?;
                }
                b.emit(Op::Call { argc: args.len() as u8 }, paren.line);
                Ok(())
            }
            Expr::Get { object, name } => {
                self.compile_expr(b, ctx, object)?;
                b.emit(Op::GetProp { name: name.lexeme.clone() }, name.line);
                Ok(())
            }
            Expr::Grouping { expr } => self.compile_expr(b, ctx, expr),
            Expr::Literal { value, line } => {
                b.emit(Op::Const(constant_of(value)), *line);
                Ok(())
            }
            Expr::Logical { left, op, right } => {
                self.compile_expr(b, ctx, left)?;
                b.emit(Op::Dup, op.line);
                let short = match op.kind {
                    TokenKind::Or => b.emit(Op::JumpIfTrue(u32::MAX), op.line),
                    _ => b.emit(Op::JumpIfFalse(u32::MAX), op.line),
                };
                b.emit(Op::Pop, op.line);
                self.compile_expr(b, ctx, right)?;
                b.patch_jump(short);
                Ok(())
            }
            Expr::Set { object, name, value } => {
                self.compile_expr(b, ctx, object)?;
                b.emit(Op::EnsureInstance, name.line);
                self.compile_expr(b, ctx, value)?;
                b.emit(Op::SetProp { name: name.lexeme.clone() }, name.line);
                Ok(())
            }
            Expr::Super { keyword, method } => {
                match self.resolver.use_of(keyword.id) {
                    Some(var) => {
                        let hops = self.resolver.var(var).hops_from(ctx.fun);
                        b.emit(Op::Super { hops, method: method.lexeme.clone() }, keyword.line);
                    }
                    None => {
                        b.emit(
                            Op::Fail { message: "Can't use 'super' outside of a class.".into() },
                            keyword.line,
                        );
                    }
                }
                Ok(())
            }
            Expr::This { keyword } => {
                match self.resolver.use_of(keyword.id) {
                    Some(var) => {
                        let hops = self.resolver.var(var).hops_from(ctx.fun);
                        b.emit(Op::This { hops }, keyword.line);
                    }
                    None => {
                        b.emit(
                            Op::Fail { message: "Can't use 'this' outside of a class.".into() },
                            keyword.line,
                        );
                    }
                }
                Ok(())
            }
            Expr::Unary { op, right } => {
                self.compile_expr(b, ctx, right)?;
                match op.kind {
                    TokenKind::Minus => b.emit(Op::Negate, op.line),
                    _ => b.emit(Op::Not, op.line),
                };
                Ok(())
            }
            Expr::Variable { name } => {
                let Some(var) = self.resolver.use_of(name.id) else {
                    b.emit(
                        Op::Fail { message: format!("Undefined variable '{}'.", name.lexeme) },
                        name.line,
                    );
                    return Ok(());
                };
                let def = self.resolver.var(var);
                if def.is_global && def.is_captured() {
                    b.emit(Op::GetGlobal { var: var.0 }, name.line);
                } else if def.is_captured() {
                    let slot = self.slot(ctx.fun, var)?;
                    b.emit(Op::GetCell(slot), name.line);
                } else {
                    let slot = self.slot(ctx.fun, var)?;
                    b.emit(Op::GetSlot(slot), name.line);
                }
                Ok(())
            }
        }
    }

    fn compile_binary(
        &mut self,
        b: &mut UnitBuilder,
        ctx: Ctx,
        left: &Expr,
        op: &Token,
        right: &Expr,
    ) -> CompileResult<()> {
        match op.kind {
            TokenKind::Plus => {
                // `+` accepts numbers or strings; the check happens in the
                // instruction itself once both operands are known.
                self.compile_expr(b, ctx, left)?;
                self.compile_expr(b, ctx, right)?;
                b.emit(Op::Add, op.line);
            }
            TokenKind::EqualEqual => {
                self.compile_expr(b, ctx, left)?;
                self.compile_expr(b, ctx, right)?;
                b.emit(Op::Eq, op.line);
            }
            TokenKind::BangEqual => {
                self.compile_expr(b, ctx, left)?;
                self.compile_expr(b, ctx, right)?;
                b.emit(Op::NotEq, op.line);
            }
            _ => {
                // Each operand is checked as soon as it is produced, so a bad
                // left operand errors before the right one runs.
                self.compile_expr(b, ctx, left)?;
                b.emit(Op::CheckNumber, op.line);
                self.compile_expr(b, ctx, right)?;
                b.emit(Op::CheckNumber, op.line);
                let opcode = match op.kind {
                    TokenKind::Minus => Op::Sub,
                    TokenKind::Star => Op::Mul,
                    TokenKind::Slash => Op::Div,
                    TokenKind::Greater => Op::Greater,
                    TokenKind::GreaterEqual => Op::GreaterEq,
                    TokenKind::Less => Op::Less,
                    _ => Op::LessEq,
                };
                b.emit(opcode, op.line);
            }
        }
        Ok(())
    }
}

fn constant_of(lit: &Lit) -> Constant {
    match lit {
        Lit::Nil => Constant::Nil,
        Lit::Bool(b) => Constant::Bool(*b),
        Lit::Number(n) => Constant::Number(*n),
        Lit::Str(s) => Constant::Str(s.clone()),
    }
}

fn expr_line(expr: &Expr) -> u32 {
    match expr {
        Expr::Assign { name, .. } | Expr::Get { name, .. } | Expr::Set { name, .. } => name.line,
        Expr::Binary { op, .. } | Expr::Logical { op, .. } | Expr::Unary { op, .. } => op.line,
        Expr::Call { paren, .. } => paren.line,
        Expr::Grouping { expr } => expr_line(expr),
        Expr::Literal { line, .. } => *line,
        Expr::Super { keyword, .. } | Expr::This { keyword } => keyword.line,
        Expr::Variable { name } => name.line,
    }
}

fn stmt_line(stmt: &Stmt) -> u32 {
    match stmt {
        Stmt::Block { statements } => statements.last().map(stmt_line).unwrap_or(0),
        Stmt::Class(decl) => decl.name.line,
        Stmt::Expression { expr } | Stmt::Print { expr } => expr_line(expr),
        Stmt::Function(decl) => decl.name.line,
        Stmt::If { condition, .. } | Stmt::While { condition, .. } => expr_line(condition),
        Stmt::Return { keyword, .. } => keyword.line,
        Stmt::Var { name, .. } => name.line,
    }
}
