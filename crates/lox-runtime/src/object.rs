//! Callable objects and instances.
//!
//! Closures form a chain through their construction frames; classes sit in
//! the chain between a method and the frame the class statement ran in.
//! Distance bookkeeping in the compiler counts only function frames, so the
//! chain walk steps through class links without consuming a hop.

use std::cell::RefCell;
use std::rc::Rc;

use lox_compiler::Unit;
use rustc_hash::FxHashMap;

use crate::error::RuntimeError;
use crate::value::{Cell, Value};

pub struct Closure {
    pub unit: Rc<Unit>,
    /// Construction context: the enclosing closure, or the owning class for
    /// a method.
    pub enclosing: Option<Value>,
    /// Cells this closure can reach: its own captured declarations plus the
    /// ones wired from enclosing frames at construction. Shared by all bound
    /// copies of a method.
    pub cells: Rc<RefCell<FxHashMap<u32, Rc<Cell>>>>,
    pub receiver: Option<Rc<Instance>>,
}

impl Closure {
    /// Binds a method to a receiver. The copy shares the unit and cells;
    /// the class's stored method is left untouched.
    pub fn bind(&self, receiver: Rc<Instance>) -> Rc<Closure> {
        Rc::new(Closure {
            unit: Rc::clone(&self.unit),
            enclosing: self.enclosing.clone(),
            cells: Rc::clone(&self.cells),
            receiver: Some(receiver),
        })
    }

    pub fn cell(&self, var: u32) -> Option<Rc<Cell>> {
        self.cells.borrow().get(&var).cloned()
    }
}

pub struct Class {
    pub name: String,
    /// The closure whose frame executed the class statement.
    pub enclosing: Option<Value>,
    pub superclass: Option<Rc<Class>>,
    /// Filled right after construction, once the class value exists for the
    /// methods to enclose.
    methods: RefCell<FxHashMap<String, Rc<Closure>>>,
}

impl Class {
    pub fn new(name: String, enclosing: Option<Value>, superclass: Option<Rc<Class>>) -> Rc<Class> {
        Rc::new(Class { name, enclosing, superclass, methods: RefCell::new(FxHashMap::default()) })
    }

    pub fn add_method(&self, name: String, method: Rc<Closure>) {
        self.methods.borrow_mut().insert(name, method);
    }

    pub fn find_method(&self, name: &str) -> Option<Rc<Closure>> {
        if let Some(method) = self.methods.borrow().get(name) {
            return Some(Rc::clone(method));
        }
        self.superclass.as_ref()?.find_method(name)
    }

    /// A class's call arity is its initializer's.
    pub fn arity(&self) -> u8 {
        self.find_method("init").map(|init| init.unit.arity).unwrap_or(0)
    }
}

pub struct Instance {
    pub class: Rc<Class>,
    fields: RefCell<FxHashMap<String, Value>>,
}

impl Instance {
    pub fn new(class: Rc<Class>) -> Rc<Instance> {
        Rc::new(Instance { class, fields: RefCell::new(FxHashMap::default()) })
    }

    /// Fields shadow methods; a method is bound to this instance on access.
    pub fn get(self: &Rc<Self>, name: &str, line: u32) -> Result<Value, RuntimeError> {
        if let Some(value) = self.fields.borrow().get(name) {
            return Ok(value.clone());
        }
        if let Some(method) = self.class.find_method(name) {
            return Ok(Value::Closure(method.bind(Rc::clone(self))));
        }
        Err(RuntimeError::new(format!("Undefined property '{name}'."), line))
    }

    pub fn set(&self, name: &str, value: Value) {
        self.fields.borrow_mut().insert(name.to_owned(), value);
    }
}

pub struct NativeFn {
    pub name: String,
    pub arity: u8,
}

/// One step up the enclosing chain, stepping through class links.
fn hop(value: &Value) -> Option<Value> {
    let mut next = match value {
        Value::Closure(c) => c.enclosing.clone()?,
        Value::Class(c) => c.enclosing.clone()?,
        _ => return None,
    };
    while let Value::Class(class) = &next {
        next = class.enclosing.clone()?;
    }
    Some(next)
}

/// Walks `hops` frame steps from the executing closure.
pub fn ancestor(start: &Value, hops: u8) -> Option<Value> {
    let mut current = start.clone();
    for _ in 0..hops {
        current = hop(&current)?;
    }
    Some(current)
}
