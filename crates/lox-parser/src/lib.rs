//! Scanner and parser for the Lox programming language.
//!
//! Produces the syntax tree consumed by the `lox-compiler` pipeline. Every
//! token carries a unique [`token::TokenId`]; the compiler keys all of its
//! per-declaration metadata on those ids, so tree rewrites that preserve
//! tokens preserve identity.

pub mod ast;
pub mod error;
pub mod parser;
pub mod scanner;
pub mod token;

pub use ast::{ClassDecl, Expr, FunctionDecl, Lit, Stmt};
pub use error::{Diagnostic, ParseError};
pub use parser::Parser;
pub use scanner::Scanner;
pub use token::{Token, TokenId, TokenKind};

/// Scan and parse a source string into a program.
pub fn parse(source: &str) -> Result<ast::Program, ParseError> {
    let tokens = Scanner::new(source).scan()?;
    Parser::new(tokens).parse()
}
