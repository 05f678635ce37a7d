//! Token model.

use std::fmt;

/// Unique identity of a token within one compilation.
///
/// Declaration-site and access-site metadata in the compiler is keyed by
/// `TokenId`, so two tokens with the same lexeme are still distinct
/// declarations. Id 0 is reserved for the synthesized entry function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenId(pub u32);

impl TokenId {
    /// Reserved id of the synthesized top-level function's name token.
    pub const ENTRY: TokenId = TokenId(0);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // Single-character tokens.
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    Comma,
    Dot,
    Minus,
    Plus,
    Semicolon,
    Slash,
    Star,

    // One or two character tokens.
    Bang,
    BangEqual,
    Equal,
    EqualEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,

    // Literals.
    Identifier,
    Str,
    Number,

    // Keywords.
    And,
    Class,
    Else,
    False,
    Fun,
    For,
    If,
    Nil,
    Or,
    Print,
    Return,
    Super,
    This,
    True,
    Var,
    While,

    Eof,
}

/// A scanned token with its source position and identity.
#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub line: u32,
    pub id: TokenId,
}

impl Token {
    pub fn new(kind: TokenKind, lexeme: impl Into<String>, line: u32, id: TokenId) -> Self {
        Token { kind, lexeme: lexeme.into(), line, id }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kind == TokenKind::Eof {
            write!(f, "end")
        } else {
            write!(f, "'{}'", self.lexeme)
        }
    }
}
