//! Parse diagnostics.

use thiserror::Error;

/// One positioned compile-time message, in the classic Lox report format.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub line: u32,
    /// Lexeme the error is attached to, or `None` for end-of-file.
    pub at: Option<String>,
    pub message: String,
}

impl Diagnostic {
    pub fn new(line: u32, at: impl Into<String>, message: impl Into<String>) -> Self {
        Diagnostic { line, at: Some(at.into()), message: message.into() }
    }

    pub fn at_end(line: u32, message: impl Into<String>) -> Self {
        Diagnostic { line, at: None, message: message.into() }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.at {
            Some(at) => write!(f, "[line {}] Error at '{}': {}", self.line, at, self.message),
            None => write!(f, "[line {}] Error at end: {}", self.line, self.message),
        }
    }
}

/// Scanning or parsing failed; all diagnostics found before recovery gave up.
#[derive(Debug, Error)]
#[error("{} parse error(s)", .0.len())]
pub struct ParseError(pub Vec<Diagnostic>);
