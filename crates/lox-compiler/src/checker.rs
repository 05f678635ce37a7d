//! Context validation.
//!
//! Rejects constructs that are syntactically valid but only legal in certain
//! surroundings: `this` and `super` outside classes, `return` at the top
//! level or returning a value from an initializer, and self-inheritance.
//! Runs before resolution so the later stages can rely on these holding.

use lox_parser::{ClassDecl, Diagnostic, Expr, FunctionDecl, Stmt, Token};

use crate::error::{CompileError, CompileResult};

#[derive(Clone, Copy, PartialEq)]
enum FunctionType {
    TopLevel,
    Function,
    Initializer,
    Method,
}

#[derive(Clone, Copy, PartialEq)]
enum ClassType {
    None,
    Class,
    Subclass,
}

pub struct Checker {
    current_function: FunctionType,
    current_class: ClassType,
    errors: Vec<Diagnostic>,
}

impl Checker {
    pub fn new() -> Self {
        Checker {
            current_function: FunctionType::TopLevel,
            current_class: ClassType::None,
            errors: Vec::new(),
        }
    }

    pub fn check(mut self, stmts: &[Stmt]) -> CompileResult<()> {
        self.check_stmts(stmts);
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(CompileError::Semantic(self.errors))
        }
    }

    fn error(&mut self, token: &Token, message: &str) {
        self.errors.push(Diagnostic::new(token.line, &token.lexeme, message));
    }

    fn check_stmts(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            self.check_stmt(stmt);
        }
    }

    fn check_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Block { statements } => self.check_stmts(statements),
            Stmt::Class(decl) => self.check_class(decl),
            Stmt::Expression { expr } | Stmt::Print { expr } => self.check_expr(expr),
            Stmt::Function(decl) => self.check_function(decl, FunctionType::Function),
            Stmt::If { condition, then_branch, else_branch } => {
                self.check_expr(condition);
                self.check_stmt(then_branch);
                if let Some(else_branch) = else_branch {
                    self.check_stmt(else_branch);
                }
            }
            Stmt::Return { keyword, value } => {
                if self.current_function == FunctionType::TopLevel {
                    self.error(keyword, "Can't return from top-level code.");
                }
                if let Some(value) = value {
                    if self.current_function == FunctionType::Initializer {
                        self.error(keyword, "Can't return a value from an initializer.");
                    }
                    self.check_expr(value);
                }
            }
            Stmt::Var { initializer, .. } => {
                if let Some(initializer) = initializer {
                    self.check_expr(initializer);
                }
            }
            Stmt::While { condition, body } => {
                self.check_expr(condition);
                self.check_stmt(body);
            }
        }
    }

    fn check_class(&mut self, decl: &ClassDecl) {
        if let Some(Expr::Variable { name }) = &decl.superclass {
            if name.lexeme == decl.name.lexeme {
                self.error(name, "A class can't inherit from itself.");
            }
        }
        let enclosing_class = self.current_class;
        self.current_class =
            if decl.superclass.is_some() { ClassType::Subclass } else { ClassType::Class };
        for method in &decl.methods {
            let kind = if method.name.lexeme == "init" {
                FunctionType::Initializer
            } else {
                FunctionType::Method
            };
            self.check_function(method, kind);
        }
        self.current_class = enclosing_class;
    }

    fn check_function(&mut self, decl: &FunctionDecl, kind: FunctionType) {
        let enclosing = self.current_function;
        self.current_function = kind;
        self.check_stmts(&decl.body);
        self.current_function = enclosing;
    }

    fn check_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Assign { value, .. } => self.check_expr(value),
            Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
                self.check_expr(left);
                self.check_expr(right);
            }
            Expr::Call { callee, args, .. } => {
                self.check_expr(callee);
                for arg in args {
                    self.check_expr(arg);
                }
            }
            Expr::Get { object, .. } => self.check_expr(object),
            Expr::Grouping { expr } => self.check_expr(expr),
            Expr::Literal { .. } | Expr::Variable { .. } => {}
            Expr::Set { object, value, .. } => {
                self.check_expr(object);
                self.check_expr(value);
            }
            Expr::Super { keyword, .. } => match self.current_class {
                ClassType::None => self.error(keyword, "Can't use 'super' outside of a class."),
                ClassType::Class => {
                    self.error(keyword, "Can't use 'super' in a class with no superclass.")
                }
                ClassType::Subclass => {}
            },
            Expr::This { keyword } => {
                if self.current_class == ClassType::None {
                    self.error(keyword, "Can't use 'this' outside of a class.");
                }
            }
            Expr::Unary { right, .. } => self.check_expr(right),
        }
    }
}

impl Default for Checker {
    fn default() -> Self {
        Checker::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(source: &str) -> CompileResult<()> {
        let program = lox_parser::parse(source).unwrap();
        Checker::new().check(&program.statements)
    }

    fn first_message(result: CompileResult<()>) -> String {
        match result {
            Err(CompileError::Semantic(diags)) => diags[0].message.clone(),
            other => panic!("expected semantic error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_top_level_return() {
        assert_eq!(first_message(check("return 1;")), "Can't return from top-level code.");
    }

    #[test]
    fn rejects_this_outside_class() {
        assert_eq!(
            first_message(check("fun f() { return this; }")),
            "Can't use 'this' outside of a class."
        );
    }

    #[test]
    fn rejects_super_without_superclass() {
        assert_eq!(
            first_message(check("class C { m() { return super.m(); } }")),
            "Can't use 'super' in a class with no superclass."
        );
    }

    #[test]
    fn rejects_value_return_from_initializer() {
        assert_eq!(
            first_message(check("class C { init() { return 1; } }")),
            "Can't return a value from an initializer."
        );
    }

    #[test]
    fn rejects_self_inheritance() {
        assert_eq!(first_message(check("class C < C {}")), "A class can't inherit from itself.");
    }

    #[test]
    fn accepts_this_in_method() {
        assert!(check("class C { m() { return this; } }").is_ok());
    }

    #[test]
    fn bare_return_in_initializer_is_allowed() {
        assert!(check("class C { init() { return; } }").is_ok());
    }
}
