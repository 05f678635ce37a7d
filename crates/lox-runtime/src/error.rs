//! Runtime failures.

use thiserror::Error;

/// An error raised while a program runs, attributed to the source line of
/// the instruction that raised it.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}\n[line {line}]")]
pub struct RuntimeError {
    pub message: String,
    pub line: u32,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>, line: u32) -> Self {
        RuntimeError { message: message.into(), line }
    }
}
