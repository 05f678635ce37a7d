//! Compile-time error tiers.

use lox_parser::Diagnostic;
use thiserror::Error;

/// Failure of any stage of the compilation pipeline.
///
/// The tiers map to distinct process exit codes in the CLI: `Parse` and
/// `Semantic` are ordinary compile errors, while `Undefined` carries
/// unresolved-variable reports that are surfaced in the runtime error
/// format even though they were detected statically.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("{} parse error(s)", .0.len())]
    Parse(Vec<Diagnostic>),

    #[error("{} compile error(s)", .0.len())]
    Semantic(Vec<Diagnostic>),

    #[error("{} undefined variable(s)", .0.len())]
    Undefined(Vec<Diagnostic>),

    #[error("internal compiler error: {0}")]
    Internal(String),
}

impl From<lox_parser::ParseError> for CompileError {
    fn from(err: lox_parser::ParseError) -> Self {
        CompileError::Parse(err.0)
    }
}

pub type CompileResult<T> = Result<T, CompileError>;
