//! Syntax tree for Lox.
//!
//! Nodes own their tokens. The optimizer rebuilds trees each pass; cloning a
//! token preserves its [`crate::token::TokenId`], which is what keeps
//! resolver metadata valid across rewrites.

use crate::token::Token;

/// Literal value carried by a literal expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Lit {
    Nil,
    Bool(bool),
    Number(f64),
    Str(String),
}

impl Lit {
    /// Lox truthiness: only `nil` and `false` are falsy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Lit::Nil | Lit::Bool(false))
    }
}

#[derive(Debug, Clone)]
pub enum Expr {
    Assign { name: Token, value: Box<Expr> },
    Binary { left: Box<Expr>, op: Token, right: Box<Expr> },
    Call { callee: Box<Expr>, paren: Token, args: Vec<Expr> },
    Get { object: Box<Expr>, name: Token },
    Grouping { expr: Box<Expr> },
    Literal { value: Lit, line: u32 },
    Logical { left: Box<Expr>, op: Token, right: Box<Expr> },
    Set { object: Box<Expr>, name: Token, value: Box<Expr> },
    Super { keyword: Token, method: Token },
    This { keyword: Token },
    Unary { op: Token, right: Box<Expr> },
    Variable { name: Token },
}

impl Expr {
    /// Literal payload, if this expression is a literal.
    pub fn as_literal(&self) -> Option<&Lit> {
        match self {
            Expr::Literal { value, .. } => Some(value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Block { statements: Vec<Stmt> },
    Class(ClassDecl),
    Expression { expr: Expr },
    Function(FunctionDecl),
    If { condition: Expr, then_branch: Box<Stmt>, else_branch: Option<Box<Stmt>> },
    Print { expr: Expr },
    Return { keyword: Token, value: Option<Expr> },
    Var { name: Token, initializer: Option<Expr> },
    While { condition: Expr, body: Box<Stmt> },
}

#[derive(Debug, Clone)]
pub struct FunctionDecl {
    pub name: Token,
    pub params: Vec<Token>,
    pub body: Vec<Stmt>,
    /// Bodyless declaration backed by the host runtime.
    pub is_native: bool,
}

#[derive(Debug, Clone)]
pub struct ClassDecl {
    pub name: Token,
    /// Always an `Expr::Variable` when produced by the parser.
    pub superclass: Option<Expr>,
    pub methods: Vec<FunctionDecl>,
}

/// A parsed program plus the next unused token id, so later stages can
/// synthesize tokens without colliding with parsed ones.
#[derive(Debug)]
pub struct Program {
    pub statements: Vec<Stmt>,
    pub next_token_id: u32,
}
