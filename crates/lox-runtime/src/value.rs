//! Runtime values.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use lox_compiler::Constant;

use crate::object::{Class, Closure, Instance, NativeFn};

/// A heap box holding a captured variable's current value. Every closure
/// that captures the variable shares the same cell, so writes are visible
/// through every capture.
pub struct Cell(RefCell<Value>);

impl Cell {
    pub fn new(value: Value) -> Rc<Cell> {
        Rc::new(Cell(RefCell::new(value)))
    }

    pub fn get(&self) -> Value {
        self.0.borrow().clone()
    }

    pub fn set(&self, value: Value) {
        *self.0.borrow_mut() = value;
    }
}

#[derive(Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Closure(Rc<Closure>),
    Class(Rc<Class>),
    Instance(Rc<Instance>),
    Native(Rc<NativeFn>),
    /// A cell occupying a frame slot; never observable from Lox code.
    Cell(Rc<Cell>),
}

impl Value {
    /// Only `nil` and `false` are falsy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn from_constant(constant: &Constant) -> Value {
        match constant {
            Constant::Nil => Value::Nil,
            Constant::Bool(b) => Value::Bool(*b),
            Constant::Number(n) => Value::Number(*n),
            Constant::Str(s) => Value::Str(Rc::from(s.as_str())),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
            (Value::Class(a), Value::Class(b)) => Rc::ptr_eq(a, b),
            (Value::Instance(a), Value::Instance(b)) => Rc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => Rc::ptr_eq(a, b),
            (Value::Cell(a), Value::Cell(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{b}"),
            // f64 display already trims integral values: 100, not 100.0.
            Value::Number(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Closure(c) => write!(f, "<fn {}>", c.unit.name),
            Value::Class(c) => write!(f, "{}", c.name),
            Value::Instance(i) => write!(f, "{} instance", i.class.name),
            Value::Native(_) => write!(f, "<native fn>"),
            Value::Cell(c) => write!(f, "{}", c.get()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Shallow on purpose: enclosing chains cycle through classes.
        match self {
            Value::Str(s) => write!(f, "{s:?}"),
            other => write!(f, "{other}"),
        }
    }
}
