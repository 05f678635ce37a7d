//! Tree-level optimization.
//!
//! Runs a fixed number of rewrite passes over the program. Each pass does
//! shallow constant folding, logical short-circuit reduction, literal-`if`
//! pruning, elimination of unread declarations, and substitution of final
//! literal variables into their uses. A substituted use gives its read back
//! to the resolver, so a later pass can remove the declaration once nothing
//! reads it anymore.
//!
//! Accesses the resolver left unbound are collected here and reported as
//! undefined variables; the program is rejected before it runs.

use lox_parser::{ClassDecl, Diagnostic, Expr, FunctionDecl, Lit, Stmt, Token, TokenKind};
use rustc_hash::FxHashMap;

use crate::resolver::{Resolver, VarId};

pub struct Optimizer<'r> {
    resolver: &'r mut Resolver,
    /// Final literal variables folded into their uses, updated in program
    /// order so a top-level redeclaration switches the substituted value.
    replacements: FxHashMap<VarId, Expr>,
    undefined: Vec<Diagnostic>,
}

impl<'r> Optimizer<'r> {
    pub fn new(resolver: &'r mut Resolver) -> Self {
        Optimizer { resolver, replacements: FxHashMap::default(), undefined: Vec::new() }
    }

    /// Rewrites the entry function `passes` times. Returns the rewritten
    /// function and any undefined-variable reports.
    pub fn run(mut self, entry: FunctionDecl, passes: usize) -> (FunctionDecl, Vec<Diagnostic>) {
        let mut body = entry.body;
        for _ in 0..passes {
            self.replacements.clear();
            body = self.rewrite_stmts(body);
        }
        (FunctionDecl { body, ..entry }, self.undefined)
    }

    fn rewrite_stmts(&mut self, stmts: Vec<Stmt>) -> Vec<Stmt> {
        stmts.into_iter().filter_map(|stmt| self.rewrite_stmt(stmt)).collect()
    }

    fn rewrite_stmt(&mut self, stmt: Stmt) -> Option<Stmt> {
        match stmt {
            Stmt::Block { statements } => {
                Some(Stmt::Block { statements: self.rewrite_stmts(statements) })
            }
            Stmt::Class(decl) => self.rewrite_class(decl),
            Stmt::Expression { expr } => {
                let expr = self.rewrite_expr(expr);
                // A statement reduced to a bare literal does nothing.
                if expr.as_literal().is_some() {
                    return None;
                }
                Some(Stmt::Expression { expr })
            }
            Stmt::Function(decl) => {
                if let Some(var) = self.resolver.def_of(decl.name.id) {
                    if !self.resolver.is_read(var) {
                        return None;
                    }
                }
                if decl.is_native {
                    return Some(Stmt::Function(decl));
                }
                let body = self.rewrite_stmts(decl.body);
                Some(Stmt::Function(FunctionDecl { body, ..decl }))
            }
            Stmt::If { condition, then_branch, else_branch } => {
                let condition = self.rewrite_expr(condition);
                if let Some(lit) = condition.as_literal() {
                    return if lit.is_truthy() {
                        self.rewrite_stmt(*then_branch)
                    } else {
                        else_branch.and_then(|branch| self.rewrite_stmt(*branch))
                    };
                }
                let then_branch = self.rewrite_branch(*then_branch);
                let else_branch = match else_branch {
                    Some(branch) => self.rewrite_stmt(*branch).map(Box::new),
                    None => None,
                };
                Some(Stmt::If { condition, then_branch, else_branch })
            }
            Stmt::Print { expr } => Some(Stmt::Print { expr: self.rewrite_expr(expr) }),
            Stmt::Return { keyword, value } => {
                Some(Stmt::Return { keyword, value: value.map(|v| self.rewrite_expr(v)) })
            }
            Stmt::Var { name, initializer } => self.rewrite_var(name, initializer),
            Stmt::While { condition, body } => {
                let condition = self.rewrite_expr(condition);
                let body = self.rewrite_branch(*body);
                Some(Stmt::While { condition, body })
            }
        }
    }

    /// Rewrites a branch that must remain present, substituting an empty
    /// block when the statement was eliminated.
    fn rewrite_branch(&mut self, stmt: Stmt) -> Box<Stmt> {
        Box::new(self.rewrite_stmt(stmt).unwrap_or(Stmt::Block { statements: vec![] }))
    }

    fn rewrite_class(&mut self, decl: ClassDecl) -> Option<Stmt> {
        if let Some(var) = self.resolver.def_of(decl.name.id) {
            // An unread class with a superclass is kept: constructing it
            // still type-checks the superclass value.
            if !self.resolver.is_read(var) && decl.superclass.is_none() {
                return None;
            }
        }
        let superclass = decl.superclass.map(|s| self.rewrite_expr(s));
        if let Some(superclass) = &superclass {
            if !matches!(superclass, Expr::Variable { .. }) {
                let line = match superclass {
                    Expr::Literal { line, .. } => *line,
                    _ => decl.name.line,
                };
                self.report(line, "Superclass must be a class.".to_owned());
                return None;
            }
        }
        let methods = decl
            .methods
            .into_iter()
            .map(|m| {
                let body = self.rewrite_stmts(m.body);
                FunctionDecl { body, ..m }
            })
            .collect();
        Some(Stmt::Class(ClassDecl { superclass, methods, ..decl }))
    }

    fn rewrite_var(&mut self, name: Token, initializer: Option<Expr>) -> Option<Stmt> {
        let Some(var) = self.resolver.def_of(name.id) else {
            let initializer = initializer.map(|i| self.rewrite_expr(i));
            return Some(Stmt::Var { name, initializer });
        };
        let initializer = initializer.map(|i| self.rewrite_expr(i));
        if !self.resolver.is_read(var) {
            // The binding is dead but its initializer may not be.
            return match initializer {
                Some(init) if side_effects(&init) > 0 => Some(Stmt::Expression { expr: init }),
                _ => None,
            };
        }
        if let Some(init) = &initializer {
            if init.as_literal().is_some()
                && self.resolver.is_final(var)
                && !self.resolver.var(var).is_late_init()
            {
                // Late-init definitions are excluded: a use reached through a
                // cell before the declaration runs must see the cell, not the
                // folded value.
                self.replacements.insert(var, init.clone());
            }
        }
        Some(Stmt::Var { name, initializer })
    }

    fn rewrite_expr(&mut self, expr: Expr) -> Expr {
        match expr {
            Expr::Assign { name, value } => {
                let value = self.rewrite_expr(*value);
                match self.resolver.use_of(name.id) {
                    None => {
                        self.report_undefined(&name);
                        Expr::Assign { name, value: Box::new(value) }
                    }
                    Some(var) if !self.resolver.is_read(var) => value,
                    Some(_) => Expr::Assign { name, value: Box::new(value) },
                }
            }
            Expr::Binary { left, op, right } => self.fold_binary(*left, op, *right),
            Expr::Call { callee, paren, args } => {
                let callee = Box::new(self.rewrite_expr(*callee));
                let args = args.into_iter().map(|a| self.rewrite_expr(a)).collect();
                Expr::Call { callee, paren, args }
            }
            Expr::Get { object, name } => {
                Expr::Get { object: Box::new(self.rewrite_expr(*object)), name }
            }
            Expr::Grouping { expr } => {
                let inner = self.rewrite_expr(*expr);
                match inner {
                    Expr::Literal { .. } | Expr::Grouping { .. } => inner,
                    _ => Expr::Grouping { expr: Box::new(inner) },
                }
            }
            Expr::Literal { .. } | Expr::Super { .. } | Expr::This { .. } => expr,
            Expr::Logical { left, op, right } => {
                if let Some(lit) = left.as_literal() {
                    let take_left = match op.kind {
                        TokenKind::Or => lit.is_truthy(),
                        _ => !lit.is_truthy(),
                    };
                    return if take_left { *left } else { self.rewrite_expr(*right) };
                }
                let left = Box::new(self.rewrite_expr(*left));
                let right = Box::new(self.rewrite_expr(*right));
                Expr::Logical { left, op, right }
            }
            Expr::Set { object, name, value } => {
                let object = Box::new(self.rewrite_expr(*object));
                let value = Box::new(self.rewrite_expr(*value));
                Expr::Set { object, name, value }
            }
            Expr::Unary { op, right } => {
                match (op.kind, right.as_literal()) {
                    (TokenKind::Minus, Some(Lit::Number(n))) => {
                        return Expr::Literal { value: Lit::Number(-n), line: op.line };
                    }
                    (TokenKind::Bang, Some(lit)) => {
                        return Expr::Literal { value: Lit::Bool(!lit.is_truthy()), line: op.line };
                    }
                    _ => {}
                }
                Expr::Unary { op, right: Box::new(self.rewrite_expr(*right)) }
            }
            Expr::Variable { name } => match self.resolver.use_of(name.id) {
                None => {
                    self.report_undefined(&name);
                    Expr::Variable { name }
                }
                Some(var) => match self.replacements.get(&var) {
                    Some(replacement) => {
                        let replacement = replacement.clone();
                        self.resolver.decrement_reads(var);
                        replacement
                    }
                    None => Expr::Variable { name },
                },
            },
        }
    }

    /// Shallow binary folding: operands are inspected before this pass
    /// rewrites them, so deeper reductions surface one pass at a time.
    fn fold_binary(&mut self, left: Expr, op: Token, right: Expr) -> Expr {
        let ll = left.as_literal().cloned();
        let rl = right.as_literal().cloned();
        let line = op.line;
        let number = |n: f64| Expr::Literal { value: Lit::Number(n), line };
        let boolean = |b: bool| Expr::Literal { value: Lit::Bool(b), line };
        match op.kind {
            TokenKind::Plus => {
                if let (Some(Lit::Number(a)), Some(Lit::Number(b))) = (&ll, &rl) {
                    return number(a + b);
                }
                if let (Some(Lit::Str(a)), Some(Lit::Str(b))) = (&ll, &rl) {
                    return Expr::Literal { value: Lit::Str(format!("{a}{b}")), line };
                }
                if matches!(ll, Some(Lit::Number(n)) if n == 0.0) {
                    return right;
                }
                if matches!(rl, Some(Lit::Number(n)) if n == 0.0) {
                    return left;
                }
            }
            TokenKind::Minus => {
                if let (Some(Lit::Number(a)), Some(Lit::Number(b))) = (&ll, &rl) {
                    return number(a - b);
                }
                if matches!(ll, Some(Lit::Number(n)) if n == 0.0) {
                    return Expr::Unary { op, right: Box::new(right) };
                }
                if matches!(rl, Some(Lit::Number(n)) if n == 0.0) {
                    return left;
                }
            }
            TokenKind::Star => {
                if let (Some(Lit::Number(a)), Some(Lit::Number(b))) = (&ll, &rl) {
                    return number(a * b);
                }
                // A literal zero factor collapses the product; the other
                // operand is dropped without being evaluated.
                if matches!(ll, Some(Lit::Number(n)) if n == 0.0)
                    || matches!(rl, Some(Lit::Number(n)) if n == 0.0)
                {
                    return number(0.0);
                }
            }
            TokenKind::Slash => {
                if let (Some(Lit::Number(a)), Some(Lit::Number(b))) = (&ll, &rl) {
                    return number(a / b);
                }
            }
            TokenKind::Greater => {
                if let (Some(Lit::Number(a)), Some(Lit::Number(b))) = (&ll, &rl) {
                    return boolean(a > b);
                }
            }
            TokenKind::GreaterEqual => {
                if let (Some(Lit::Number(a)), Some(Lit::Number(b))) = (&ll, &rl) {
                    return boolean(a >= b);
                }
            }
            TokenKind::Less => {
                if let (Some(Lit::Number(a)), Some(Lit::Number(b))) = (&ll, &rl) {
                    return boolean(a < b);
                }
            }
            TokenKind::LessEqual => {
                if let (Some(Lit::Number(a)), Some(Lit::Number(b))) = (&ll, &rl) {
                    return boolean(a <= b);
                }
            }
            _ => {}
        }
        let left = Box::new(self.rewrite_expr(left));
        let right = Box::new(self.rewrite_expr(right));
        Expr::Binary { left, op, right }
    }

    fn report_undefined(&mut self, name: &Token) {
        let message = format!("Undefined variable '{}'.", name.lexeme);
        self.report(name.line, message);
    }

    fn report(&mut self, line: u32, message: String) {
        if !self.undefined.iter().any(|d| d.line == line && d.message == message) {
            self.undefined.push(Diagnostic { line, at: None, message });
        }
    }
}

/// Number of calls and mutations an expression performs when evaluated.
fn side_effects(expr: &Expr) -> usize {
    match expr {
        Expr::Assign { value, .. } => 1 + side_effects(value),
        Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
            side_effects(left) + side_effects(right)
        }
        Expr::Call { callee, args, .. } => {
            1 + side_effects(callee) + args.iter().map(side_effects).sum::<usize>()
        }
        Expr::Get { object, .. } => side_effects(object),
        Expr::Grouping { expr } => side_effects(expr),
        Expr::Literal { .. } | Expr::Super { .. } | Expr::This { .. } | Expr::Variable { .. } => 0,
        Expr::Set { object, value, .. } => 1 + side_effects(object) + side_effects(value),
        Expr::Unary { right, .. } => side_effects(right),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lox_parser::TokenId;

    fn optimize(source: &str, passes: usize) -> (Vec<Stmt>, Vec<Diagnostic>) {
        let program = lox_parser::parse(source).unwrap();
        let entry = FunctionDecl {
            name: Token::new(TokenKind::Fun, "main", 0, TokenId::ENTRY),
            params: vec![],
            body: program.statements,
            is_native: false,
        };
        let mut resolver = Resolver::new();
        resolver.resolve(&entry).unwrap();
        let (entry, undefined) = Optimizer::new(&mut resolver).run(entry, passes);
        (entry.body, undefined)
    }

    fn as_number(expr: &Expr) -> f64 {
        match expr.as_literal() {
            Some(Lit::Number(n)) => *n,
            other => panic!("expected number literal, got {other:?}"),
        }
    }

    #[test]
    fn folds_arithmetic_over_passes() {
        let (body, _) = optimize("print 1 + 2 * 3;", 2);
        let Stmt::Print { expr } = &body[0] else { panic!() };
        assert_eq!(as_number(expr), 7.0);
    }

    #[test]
    fn zero_factor_collapses_product() {
        let (body, _) = optimize("var a = 4; print 0 * a;", 1);
        let Stmt::Print { expr } = body.last().unwrap() else { panic!() };
        assert_eq!(as_number(expr), 0.0);
    }

    #[test]
    fn prunes_if_on_literal_condition() {
        let (body, _) = optimize("if (false) print 1; else print 2;", 1);
        assert_eq!(body.len(), 1);
        let Stmt::Print { expr } = &body[0] else { panic!() };
        assert_eq!(as_number(expr), 2.0);
    }

    #[test]
    fn short_circuits_literal_logical() {
        let (body, _) = optimize("print nil and f();", 1);
        let Stmt::Print { expr } = &body[0] else { panic!() };
        assert!(matches!(expr.as_literal(), Some(Lit::Nil)));
    }

    #[test]
    fn removes_unread_variable() {
        let (body, _) = optimize("var x = 1; print 2;", 1);
        assert_eq!(body.len(), 1);
        assert!(matches!(body[0], Stmt::Print { .. }));
    }

    #[test]
    fn keeps_side_effecting_initializer_of_dead_variable() {
        let (body, _) = optimize("fun f() { print 1; } var x = f();", 1);
        assert_eq!(body.len(), 2);
        assert!(matches!(&body[1], Stmt::Expression { expr: Expr::Call { .. } }));
    }

    #[test]
    fn folds_final_literal_variable_into_uses() {
        let (body, _) = optimize("var x = 2; print x + x;", 5);
        assert_eq!(body.len(), 1);
        let Stmt::Print { expr } = &body[0] else { panic!() };
        assert_eq!(as_number(expr), 4.0);
    }

    #[test]
    fn does_not_fold_reassigned_variable() {
        let (body, _) = optimize("var x = 2; x = 3; print x;", 5);
        let Stmt::Print { expr } = body.last().unwrap() else { panic!() };
        assert!(matches!(expr, Expr::Variable { .. }));
    }

    #[test]
    fn does_not_fold_late_init_variable() {
        let (body, _) = optimize("fun f() { return x; } var x = 1; print f();", 5);
        assert!(body.iter().any(|s| matches!(s, Stmt::Var { .. })));
    }

    #[test]
    fn reports_undefined_variable() {
        let (_, undefined) = optimize("print missing;", 1);
        assert_eq!(undefined.len(), 1);
        assert_eq!(undefined[0].message, "Undefined variable 'missing'.");
    }

    #[test]
    fn removes_unread_class_without_superclass() {
        let (body, _) = optimize("class C {} print 1;", 1);
        assert_eq!(body.len(), 1);
    }

    #[test]
    fn keeps_unread_subclass() {
        let (body, _) = optimize("class A {} class B < A {}", 1);
        assert!(body.iter().any(|s| matches!(s, Stmt::Class(c) if c.name.lexeme == "B")));
    }

    #[test]
    fn redeclaration_switches_substituted_value() {
        let (body, _) = optimize("var x = 1; print x; var x = 2; print x;", 1);
        let prints: Vec<f64> = body
            .iter()
            .filter_map(|s| match s {
                Stmt::Print { expr } => Some(as_number(expr)),
                _ => None,
            })
            .collect();
        assert_eq!(prints, vec![1.0, 2.0]);
    }
}
