//! Runtime for compiled Lox programs.
//!
//! Implements the call protocol the code generator targets: closures over
//! shared cells, classes with superclass method lookup, copy-on-bind
//! methods, arity-checked dispatch, and a stack-machine VM with a call-depth
//! guard and line-attributed runtime errors.

pub mod error;
pub mod natives;
pub mod object;
pub mod value;
pub mod vm;

pub use error::RuntimeError;
pub use object::{Class, Closure, Instance, NativeFn};
pub use value::{Cell, Value};
pub use vm::Vm;
