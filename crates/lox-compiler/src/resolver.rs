//! Variable resolution.
//!
//! Binds every identifier access to a [`VarDef`] and records the metadata the
//! later stages run on: read and write counts for the optimizer, capture sets
//! and hop distances for the allocator and code generator, and late-init marks
//! for declarations that may execute after a closure capturing them has
//! already been constructed.
//!
//! Top-level declarations are visible to code that runs before them, so an
//! access that fails to resolve lexically is held as pending and retroactively
//! bound when a matching top-level declaration appears. Accesses still pending
//! at the end are reported by the optimizer as undefined variables.

use lox_parser::{ClassDecl, Diagnostic, Expr, FunctionDecl, Stmt, Token, TokenId};
use rustc_hash::FxHashMap;

use crate::error::{CompileError, CompileResult};

/// Identity of a function: the id of its name token.
pub type FunId = TokenId;

/// Handle into the resolver's arena of variable definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarId(pub u32);

/// One resolved variable declaration.
#[derive(Debug)]
pub struct VarDef {
    pub name: String,
    pub line: u32,
    /// Function whose frame owns this variable.
    pub function: FunId,
    /// Owned by the synthesized entry function. Captured entry variables live
    /// in the interpreter's global cell table instead of a frame slot.
    pub is_global: bool,
    is_captured: bool,
    is_late_init: bool,
    /// Hop count from each capturing function's construction site to the
    /// frame owning the cell.
    capture_hops: FxHashMap<FunId, u8>,
}

impl VarDef {
    /// Referenced from at least one function other than its owner.
    pub fn is_captured(&self) -> bool {
        self.is_captured
    }

    /// May be read through a capture before its declaration has executed.
    /// The cell is created up front and filled in when the declaration runs.
    pub fn is_late_init(&self) -> bool {
        self.is_late_init
    }

    /// Enclosing-chain hops from `fun`'s construction site to the owner frame.
    pub fn hops_from(&self, fun: FunId) -> u8 {
        self.capture_hops.get(&fun).copied().unwrap_or(0)
    }
}

/// An access that did not resolve lexically, kept for retroactive binding.
struct Unresolved {
    function: FunId,
    /// Function stack depth at the access site.
    depth: usize,
    token: Token,
}

#[derive(Default)]
pub struct Resolver {
    vars: Vec<VarDef>,
    /// Declaration-site name token -> definition.
    defs: FxHashMap<TokenId, VarId>,
    /// Access-site token -> definition.
    uses: FxHashMap<TokenId, VarId>,
    reads: FxHashMap<VarId, i32>,
    writes: FxHashMap<VarId, u32>,
    /// Variables captured by each function, in first-capture order.
    captured: FxHashMap<FunId, Vec<VarId>>,
    /// Innermost scope last; entries are (definition, fully defined).
    scopes: Vec<Vec<(VarId, bool)>>,
    function_stack: Vec<FunId>,
    unresolved: Vec<Unresolved>,
    errors: Vec<Diagnostic>,
}

impl Resolver {
    pub fn new() -> Self {
        Resolver::default()
    }

    /// Resolves the synthesized entry function and everything nested in it.
    pub fn resolve(&mut self, entry: &FunctionDecl) -> CompileResult<()> {
        self.resolve_function(entry);
        self.mark_self_referencing_classes(&entry.body, &mut Vec::new());
        if std::env::var_os("LOX_RESOLVER_DEBUG").is_some() {
            self.debug_dump();
        }
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(CompileError::Semantic(std::mem::take(&mut self.errors)))
        }
    }

    pub fn var(&self, var: VarId) -> &VarDef {
        &self.vars[var.0 as usize]
    }

    /// Definition introduced by a declaration name token.
    pub fn def_of(&self, token: TokenId) -> Option<VarId> {
        self.defs.get(&token).copied()
    }

    /// Definition an access-site token was bound to.
    pub fn use_of(&self, token: TokenId) -> Option<VarId> {
        self.uses.get(&token).copied()
    }

    pub fn is_read(&self, var: VarId) -> bool {
        self.reads.get(&var).copied().unwrap_or(0) > 0
    }

    /// Written at most once, by its initializer.
    pub fn is_final(&self, var: VarId) -> bool {
        self.writes.get(&var).copied().unwrap_or(0) <= 1
    }

    /// Forgets one read, after the optimizer replaced an access with the
    /// variable's value.
    pub fn decrement_reads(&mut self, var: VarId) {
        if let Some(count) = self.reads.get_mut(&var) {
            *count -= 1;
        }
    }

    /// Variables this function captures from enclosing frames.
    pub fn captured(&self, fun: FunId) -> &[VarId] {
        self.captured.get(&fun).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Late-init variables owned by this function, in declaration order.
    pub fn late_inits_of(&self, fun: FunId) -> Vec<VarId> {
        self.var_ids()
            .filter(|&v| {
                let def = self.var(v);
                def.function == fun && def.is_late_init
            })
            .collect()
    }

    /// All definitions, in declaration order.
    pub fn var_ids(&self) -> impl Iterator<Item = VarId> {
        (0..self.vars.len() as u32).map(VarId)
    }

    fn current_function(&self) -> FunId {
        self.function_stack.last().copied().unwrap_or(TokenId::ENTRY)
    }

    fn resolve_function(&mut self, fun: &FunctionDecl) {
        self.function_stack.push(fun.name.id);
        self.begin_scope();
        for param in &fun.params {
            let var = self.declare(param);
            self.define(var);
        }
        self.resolve_stmts(&fun.body);
        self.end_scope();
        self.function_stack.pop();
    }

    fn begin_scope(&mut self) {
        self.scopes.push(Vec::new());
    }

    fn end_scope(&mut self) {
        self.scopes.pop();
    }

    /// Introduces a declaration in the innermost scope.
    ///
    /// A redeclaration at the top level reuses the existing definition and
    /// counts as a write; anywhere else it is an error. A new top-level
    /// definition also retroactively binds pending accesses to its name.
    fn declare(&mut self, name: &Token) -> VarId {
        let top_level = self.scopes.len() == 1;
        if let Some(existing) = self.find_in_current_scope(&name.lexeme) {
            if top_level {
                *self.writes.entry(existing).or_insert(0) += 1;
                self.defs.insert(name.id, existing);
                self.bind_pending(&name.lexeme, existing);
                return existing;
            }
            self.errors.push(Diagnostic::new(
                name.line,
                &name.lexeme,
                "Already a variable with this name in this scope.",
            ));
        }
        let function = self.current_function();
        let var = VarId(self.vars.len() as u32);
        self.vars.push(VarDef {
            name: name.lexeme.clone(),
            line: name.line,
            function,
            is_global: function == TokenId::ENTRY,
            is_captured: false,
            is_late_init: false,
            capture_hops: FxHashMap::default(),
        });
        if let Some(scope) = self.scopes.last_mut() {
            scope.push((var, false));
        }
        self.defs.insert(name.id, var);
        if top_level {
            self.bind_pending(&name.lexeme, var);
        }
        var
    }

    fn define(&mut self, var: VarId) {
        if let Some(scope) = self.scopes.last_mut() {
            if let Some(entry) = scope.iter_mut().rev().find(|(v, _)| *v == var) {
                entry.1 = true;
            }
        }
    }

    fn find_in_current_scope(&self, name: &str) -> Option<VarId> {
        let scope = self.scopes.last()?;
        scope
            .iter()
            .rev()
            .map(|&(var, _)| var)
            .find(|&var| self.var(var).name == name)
    }

    /// Retroactively binds pending accesses to a fresh top-level definition.
    /// Each bound access marks the definition late-init and captured, since
    /// the capturing closure may be constructed before the declaration runs.
    fn bind_pending(&mut self, name: &str, var: VarId) {
        let (matched, rest): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.unresolved).into_iter().partition(|u| u.token.lexeme == name);
        self.unresolved = rest;
        for pending in matched {
            self.uses.insert(pending.token.id, var);
            *self.reads.entry(var).or_insert(0) += 1;
            self.capture(pending.function, var, pending.depth);
            self.vars[var.0 as usize].is_late_init = true;
        }
    }

    fn resolve_stmts(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            self.resolve_stmt(stmt);
        }
    }

    fn resolve_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Block { statements } => {
                self.begin_scope();
                self.resolve_stmts(statements);
                self.end_scope();
            }
            Stmt::Class(decl) => self.resolve_class(decl),
            Stmt::Expression { expr } => self.resolve_expr(expr),
            Stmt::Function(decl) => {
                let var = self.declare(&decl.name);
                self.define(var);
                self.resolve_function(decl);
            }
            Stmt::If { condition, then_branch, else_branch } => {
                self.resolve_expr(condition);
                self.resolve_stmt(then_branch);
                if let Some(else_branch) = else_branch {
                    self.resolve_stmt(else_branch);
                }
            }
            Stmt::Print { expr } => self.resolve_expr(expr),
            Stmt::Return { value, .. } => {
                if let Some(value) = value {
                    self.resolve_expr(value);
                }
            }
            Stmt::Var { name, initializer } => {
                let var = self.declare(name);
                if let Some(initializer) = initializer {
                    self.resolve_expr(initializer);
                    // The initializer is now the single write that counts; a
                    // bare redeclaration keeps the accumulated count instead.
                    self.writes.insert(var, 1);
                }
                self.define(var);
            }
            Stmt::While { condition, body } => {
                self.resolve_expr(condition);
                self.resolve_stmt(body);
            }
        }
    }

    fn resolve_class(&mut self, decl: &ClassDecl) {
        let var = self.declare(&decl.name);
        self.define(var);
        if let Some(superclass) = &decl.superclass {
            self.resolve_expr(superclass);
        }
        self.begin_scope();
        self.define_receiver("this", decl.name.line);
        if decl.superclass.is_some() {
            self.define_receiver("super", decl.name.line);
        }
        for method in &decl.methods {
            self.resolve_function(method);
        }
        self.end_scope();
    }

    /// Introduces the synthetic `this` or `super` binding of a class body.
    fn define_receiver(&mut self, name: &str, line: u32) {
        let function = self.current_function();
        let var = VarId(self.vars.len() as u32);
        self.vars.push(VarDef {
            name: name.to_owned(),
            line,
            function,
            is_global: false,
            is_captured: false,
            is_late_init: false,
            capture_hops: FxHashMap::default(),
        });
        if let Some(scope) = self.scopes.last_mut() {
            scope.push((var, true));
        }
    }

    fn resolve_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Assign { name, value } => {
                self.resolve_expr(value);
                match self.resolve_local(name) {
                    Some(var) => *self.writes.entry(var).or_insert(0) += 1,
                    None => self.record_unresolved(name),
                }
            }
            Expr::Binary { left, right, .. } => {
                self.resolve_expr(left);
                self.resolve_expr(right);
            }
            Expr::Call { callee, args, .. } => {
                self.resolve_expr(callee);
                for arg in args {
                    self.resolve_expr(arg);
                }
            }
            Expr::Get { object, .. } => self.resolve_expr(object),
            Expr::Grouping { expr } => self.resolve_expr(expr),
            Expr::Literal { .. } => {}
            Expr::Logical { left, right, .. } => {
                self.resolve_expr(left);
                self.resolve_expr(right);
            }
            Expr::Set { object, value, .. } => {
                self.resolve_expr(object);
                self.resolve_expr(value);
            }
            Expr::Super { keyword, .. } | Expr::This { keyword } => {
                self.resolve_receiver(keyword);
            }
            Expr::Unary { right, .. } => self.resolve_expr(right),
            Expr::Variable { name } => {
                // At the top level a declaration is visible to code that runs
                // before it, so a name read inside its own initializer is a
                // deferred forward reference, not an error.
                if self.scopes.len() > 1 {
                    if let Some(scope) = self.scopes.last() {
                        let declaring = scope
                            .iter()
                            .rev()
                            .find(|&&(var, _)| self.var(var).name == name.lexeme);
                        if let Some(&(_, false)) = declaring {
                            self.errors.push(Diagnostic::new(
                                name.line,
                                &name.lexeme,
                                "Can't read local variable in its own initializer.",
                            ));
                        }
                    }
                }
                match self.resolve_local(name) {
                    Some(var) => *self.reads.entry(var).or_insert(0) += 1,
                    None => self.record_unresolved(name),
                }
            }
        }
    }

    /// Lexical lookup plus capture bookkeeping. Does not touch read or write
    /// counts; those depend on the kind of access.
    fn resolve_local(&mut self, name: &Token) -> Option<VarId> {
        let var = self.lookup(&name.lexeme)?;
        self.uses.insert(name.id, var);
        let owner = self.var(var).function;
        let current = self.current_function();
        if let Some(idx) = self.function_stack.iter().position(|&f| f == owner) {
            let depth = self.function_stack.len() - idx - 1;
            if depth != 0 {
                self.capture(current, var, depth);
            }
        }
        Some(var)
    }

    fn lookup(&self, name: &str) -> Option<VarId> {
        for scope in self.scopes.iter().rev() {
            for &(var, _) in scope.iter().rev() {
                if self.var(var).name == name {
                    return Some(var);
                }
            }
        }
        None
    }

    /// Records that `function` reaches `var` through `depth` frame boundaries.
    /// The stored hop count is one less than the boundary count: closures are
    /// constructed in their immediately enclosing frame, so the walk starts
    /// one frame closer to the owner.
    fn capture(&mut self, function: FunId, var: VarId, depth: usize) {
        let def = &mut self.vars[var.0 as usize];
        def.is_captured = true;
        def.capture_hops.insert(function, (depth - 1) as u8);
        let list = self.captured.entry(function).or_default();
        if !list.contains(&var) {
            list.push(var);
        }
    }

    /// Resolves a `this` or `super` keyword to its class's synthetic binding.
    /// Outside a class there is nothing to bind; the checker reports that
    /// case, so the access is simply left unbound here.
    fn resolve_receiver(&mut self, keyword: &Token) {
        let Some(var) = self.lookup(&keyword.lexeme) else {
            return;
        };
        self.uses.insert(keyword.id, var);
        let owner = self.var(var).function;
        let current = self.current_function();
        if let Some(idx) = self.function_stack.iter().position(|&f| f == owner) {
            let depth = self.function_stack.len() - idx - 1;
            if depth != 0 {
                self.vars[var.0 as usize].capture_hops.insert(current, (depth - 1) as u8);
            }
        }
    }

    fn record_unresolved(&mut self, name: &Token) {
        self.unresolved.push(Unresolved {
            function: self.current_function(),
            depth: self.function_stack.len(),
            token: name.clone(),
        });
    }

    /// Marks a class definition late-init when its own methods capture it.
    /// The class object does not exist yet while its methods are being
    /// constructed, so such references must go through a pre-created cell.
    fn mark_self_referencing_classes(&mut self, stmts: &[Stmt], classes: &mut Vec<VarId>) {
        for stmt in stmts {
            match stmt {
                Stmt::Block { statements } => {
                    self.mark_self_referencing_classes(statements, classes);
                }
                Stmt::Class(decl) => {
                    let class_var = self.def_of(decl.name.id);
                    if let Some(var) = class_var {
                        classes.push(var);
                    }
                    for method in &decl.methods {
                        self.mark_self_referencing_classes(&method.body, classes);
                    }
                    if class_var.is_some() {
                        classes.pop();
                    }
                }
                Stmt::Expression { expr } | Stmt::Print { expr } => {
                    self.mark_self_ref_expr(expr, classes);
                }
                Stmt::Function(decl) => {
                    self.mark_self_referencing_classes(&decl.body, classes);
                }
                Stmt::If { condition, then_branch, else_branch } => {
                    self.mark_self_ref_expr(condition, classes);
                    self.mark_self_referencing_classes(std::slice::from_ref(then_branch), classes);
                    if let Some(else_branch) = else_branch {
                        self.mark_self_referencing_classes(
                            std::slice::from_ref(else_branch),
                            classes,
                        );
                    }
                }
                Stmt::Return { value, .. } => {
                    if let Some(value) = value {
                        self.mark_self_ref_expr(value, classes);
                    }
                }
                Stmt::Var { initializer, .. } => {
                    if let Some(initializer) = initializer {
                        self.mark_self_ref_expr(initializer, classes);
                    }
                }
                Stmt::While { condition, body } => {
                    self.mark_self_ref_expr(condition, classes);
                    self.mark_self_referencing_classes(std::slice::from_ref(body), classes);
                }
            }
        }
    }

    fn mark_self_ref_expr(&mut self, expr: &Expr, classes: &[VarId]) {
        match expr {
            Expr::Assign { name, value } => {
                self.mark_self_ref_use(name, classes);
                self.mark_self_ref_expr(value, classes);
            }
            Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
                self.mark_self_ref_expr(left, classes);
                self.mark_self_ref_expr(right, classes);
            }
            Expr::Call { callee, args, .. } => {
                self.mark_self_ref_expr(callee, classes);
                for arg in args {
                    self.mark_self_ref_expr(arg, classes);
                }
            }
            Expr::Get { object, .. } => self.mark_self_ref_expr(object, classes),
            Expr::Grouping { expr } => self.mark_self_ref_expr(expr, classes),
            Expr::Literal { .. } | Expr::Super { .. } | Expr::This { .. } => {}
            Expr::Set { object, value, .. } => {
                self.mark_self_ref_expr(object, classes);
                self.mark_self_ref_expr(value, classes);
            }
            Expr::Unary { right, .. } => self.mark_self_ref_expr(right, classes),
            Expr::Variable { name } => self.mark_self_ref_use(name, classes),
        }
    }

    fn mark_self_ref_use(&mut self, name: &Token, classes: &[VarId]) {
        if let Some(var) = self.use_of(name.id) {
            if classes.contains(&var) && self.var(var).is_captured {
                self.vars[var.0 as usize].is_late_init = true;
            }
        }
    }

    fn debug_dump(&self) {
        for (i, def) in self.vars.iter().enumerate() {
            let var = VarId(i as u32);
            eprintln!(
                "[resolver] v{i} '{}' line {} fn {:?} global={} captured={} late={} reads={} writes={}",
                def.name,
                def.line,
                def.function,
                def.is_global,
                def.is_captured,
                def.is_late_init,
                self.reads.get(&var).copied().unwrap_or(0),
                self.writes.get(&var).copied().unwrap_or(0),
            );
        }
    }
}
