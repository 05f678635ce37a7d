//! Frame slot assignment.
//!
//! Walks the optimized tree and gives every surviving declaration a slot in
//! its owning function's frame. Slots freed when a scope ends are reused by
//! later scopes, lowest number first. Captured variables reached through the
//! enclosing chain get a slot up front, before the body's declarations, so
//! the prologue can pin their cells locally. Captured entry variables live in
//! the global cell table and take no slot at all.

use lox_parser::{FunctionDecl, Stmt, Token};
use rustc_hash::FxHashMap;

use crate::resolver::{FunId, Resolver, VarId};

#[derive(Default)]
struct Frame {
    assigned: FxHashMap<VarId, u16>,
    /// Slot numbers released by closed scopes.
    free: Vec<u16>,
    next: u16,
}

impl Frame {
    /// Lowest freed slot, or a fresh one past everything assigned so far.
    fn take_slot(&mut self) -> u16 {
        let lowest_free = self.free.iter().enumerate().min_by_key(|&(_, s)| s).map(|(i, _)| i);
        if let Some(pos) = lowest_free {
            return self.free.swap_remove(pos);
        }
        let slot = self.next;
        self.next += 1;
        slot
    }
}

pub struct Allocator<'r> {
    resolver: &'r Resolver,
    frames: FxHashMap<FunId, Frame>,
    function_stack: Vec<FunId>,
    /// Declarations of the innermost open scopes, for slot release.
    scopes: Vec<Vec<VarId>>,
}

impl<'r> Allocator<'r> {
    pub fn new(resolver: &'r Resolver) -> Self {
        Allocator {
            resolver,
            frames: FxHashMap::default(),
            function_stack: Vec::new(),
            scopes: Vec::new(),
        }
    }

    pub fn allocate(&mut self, entry: &FunctionDecl) {
        self.walk_function(entry);
        if std::env::var_os("LOX_ALLOCATOR_DEBUG").is_some() {
            self.debug_dump();
        }
    }

    /// Slot assigned to `var` in `fun`'s frame.
    pub fn slot(&self, fun: FunId, var: VarId) -> Option<u16> {
        self.frames.get(&fun)?.assigned.get(&var).copied()
    }

    /// Frame size in slots, including freed ones.
    pub fn frame_size(&self, fun: FunId) -> u16 {
        self.frames.get(&fun).map(|f| f.next).unwrap_or(0)
    }

    fn current_function(&self) -> FunId {
        self.function_stack.last().copied().unwrap_or(lox_parser::TokenId::ENTRY)
    }

    fn walk_function(&mut self, fun: &FunctionDecl) {
        self.function_stack.push(fun.name.id);
        self.begin_scope();
        for param in &fun.params {
            self.declare_token(param);
        }
        // Captured cells are pinned after the parameters, so their slots are
        // stable for the whole frame.
        for &var in self.resolver.captured(fun.name.id) {
            if !self.resolver.var(var).is_global {
                self.assign(var);
            }
        }
        self.walk_stmts(&fun.body);
        self.end_scope();
        self.function_stack.pop();
    }

    fn begin_scope(&mut self) {
        self.scopes.push(Vec::new());
    }

    fn end_scope(&mut self) {
        let Some(scope) = self.scopes.pop() else { return };
        let fun = self.current_function();
        let Some(frame) = self.frames.get_mut(&fun) else { return };
        for var in scope {
            if let Some(&slot) = frame.assigned.get(&var) {
                frame.free.push(slot);
            }
        }
    }

    fn declare_token(&mut self, name: &Token) {
        if let Some(var) = self.resolver.def_of(name.id) {
            if self.resolver.var(var).is_global && self.resolver.var(var).is_captured() {
                return;
            }
            self.declare(var);
        }
    }

    fn declare(&mut self, var: VarId) {
        let fun = self.current_function();
        let frame = self.frames.entry(fun).or_default();
        // A top-level redeclaration keeps the slot it already has.
        if frame.assigned.contains_key(&var) {
            return;
        }
        let slot = frame.take_slot();
        frame.assigned.insert(var, slot);
        if let Some(scope) = self.scopes.last_mut() {
            scope.push(var);
        }
    }

    /// Assigns a slot outside any scope; it lives as long as the frame.
    fn assign(&mut self, var: VarId) {
        let fun = self.current_function();
        let frame = self.frames.entry(fun).or_default();
        if !frame.assigned.contains_key(&var) {
            let slot = frame.take_slot();
            frame.assigned.insert(var, slot);
        }
    }

    fn walk_stmts(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            self.walk_stmt(stmt);
        }
    }

    fn walk_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Block { statements } => {
                self.begin_scope();
                self.walk_stmts(statements);
                self.end_scope();
            }
            Stmt::Class(decl) => {
                self.declare_token(&decl.name);
                for method in &decl.methods {
                    self.walk_function(method);
                }
            }
            Stmt::Expression { .. } | Stmt::Print { .. } | Stmt::Return { .. } => {}
            Stmt::Function(decl) => {
                self.declare_token(&decl.name);
                self.walk_function(decl);
            }
            Stmt::If { then_branch, else_branch, .. } => {
                self.walk_stmt(then_branch);
                if let Some(else_branch) = else_branch {
                    self.walk_stmt(else_branch);
                }
            }
            Stmt::Var { name, .. } => self.declare_token(name),
            Stmt::While { body, .. } => self.walk_stmt(body),
        }
    }

    fn debug_dump(&self) {
        for (fun, frame) in &self.frames {
            eprintln!("[allocator] fn {:?}: {} slot(s)", fun, frame.next);
            let mut entries: Vec<_> = frame.assigned.iter().collect();
            entries.sort_by_key(|(_, &slot)| slot);
            for (var, slot) in entries {
                eprintln!("[allocator]   slot {slot} <- '{}'", self.resolver.var(*var).name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lox_parser::{Token, TokenId, TokenKind};

    fn resolve(source: &str) -> (Resolver, FunctionDecl) {
        let program = lox_parser::parse(source).unwrap();
        let entry = FunctionDecl {
            name: Token::new(TokenKind::Fun, "main", 0, TokenId::ENTRY),
            params: vec![],
            body: program.statements,
            is_native: false,
        };
        let mut resolver = Resolver::new();
        resolver.resolve(&entry).unwrap();
        (resolver, entry)
    }

    fn fun_id(entry: &FunctionDecl, path: &[usize]) -> FunId {
        let mut stmts = &entry.body;
        let mut id = entry.name.id;
        for &idx in path {
            match &stmts[idx] {
                Stmt::Function(decl) => {
                    id = decl.name.id;
                    stmts = &decl.body;
                }
                other => panic!("expected function at {idx}, got {other:?}"),
            }
        }
        id
    }

    fn var_in(resolver: &Resolver, fun: FunId, name: &str) -> VarId {
        resolver
            .var_ids()
            .find(|&v| resolver.var(v).name == name && resolver.var(v).function == fun)
            .unwrap()
    }

    #[test]
    fn parameters_take_leading_slots() {
        let (resolver, entry) = resolve("fun f(a, b) { print a + b; }");
        let mut allocator = Allocator::new(&resolver);
        allocator.allocate(&entry);
        let f = fun_id(&entry, &[0]);
        assert_eq!(allocator.slot(f, var_in(&resolver, f, "a")), Some(0));
        assert_eq!(allocator.slot(f, var_in(&resolver, f, "b")), Some(1));
        assert_eq!(allocator.frame_size(f), 2);
    }

    #[test]
    fn sibling_blocks_reuse_slots() {
        let (resolver, entry) =
            resolve("fun f() { { var a = 1; print a; } { var b = 2; print b; } }");
        let mut allocator = Allocator::new(&resolver);
        allocator.allocate(&entry);
        let f = fun_id(&entry, &[0]);
        let a = allocator.slot(f, var_in(&resolver, f, "a"));
        let b = allocator.slot(f, var_in(&resolver, f, "b"));
        assert_eq!(a, b);
        assert_eq!(allocator.frame_size(f), 1);
    }

    #[test]
    fn many_sibling_blocks_share_one_slot() {
        let source = (0..8)
            .map(|i| format!("{{ var v{i} = {i}; print v{i}; }}"))
            .collect::<Vec<_>>()
            .join(" ");
        let (resolver, entry) = resolve(&format!("fun f() {{ {source} }}"));
        let mut allocator = Allocator::new(&resolver);
        allocator.allocate(&entry);
        let f = fun_id(&entry, &[0]);
        assert_eq!(allocator.frame_size(f), 1);
    }

    #[test]
    fn nested_scope_grows_then_releases() {
        let (resolver, entry) =
            resolve("fun f() { var a = 1; { var b = a; print b; } var c = 2; print c; }");
        let mut allocator = Allocator::new(&resolver);
        allocator.allocate(&entry);
        let f = fun_id(&entry, &[0]);
        assert_eq!(allocator.slot(f, var_in(&resolver, f, "a")), Some(0));
        assert_eq!(allocator.slot(f, var_in(&resolver, f, "b")), Some(1));
        assert_eq!(allocator.slot(f, var_in(&resolver, f, "c")), Some(1));
    }

    #[test]
    fn captured_variable_is_pinned_in_capturing_frame() {
        let (resolver, entry) = resolve("fun f() { var x = 1; fun g() { return x; } print g; }");
        let mut allocator = Allocator::new(&resolver);
        allocator.allocate(&entry);
        let f = fun_id(&entry, &[0]);
        let g = fun_id(&entry, &[0, 1]);
        let x = var_in(&resolver, f, "x");
        // x owns a slot in f and is pinned into g's frame ahead of its body.
        assert_eq!(allocator.slot(f, x), Some(0));
        assert_eq!(allocator.slot(g, x), Some(0));
    }

    #[test]
    fn captured_top_level_variable_takes_no_slot() {
        let (resolver, entry) = resolve("var x = 1; fun f() { x = x + 1; return x; } print f();");
        let mut allocator = Allocator::new(&resolver);
        allocator.allocate(&entry);
        let f = fun_id(&entry, &[1]);
        let x = var_in(&resolver, TokenId::ENTRY, "x");
        assert_eq!(allocator.slot(TokenId::ENTRY, x), None);
        assert_eq!(allocator.slot(f, x), None);
    }
}
