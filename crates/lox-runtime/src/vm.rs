//! Stack-machine interpreter for compiled programs.
//!
//! Each call gets a fresh slot frame and operand stack; captured variables
//! live in [`Cell`]s shared between the frames that reach them. The entry
//! unit is constructed as an ordinary closure and invoked with no arguments;
//! its late-init cells seed the global table so forward references observe
//! `nil` until the declaration runs.

use std::io::{self, Write};
use std::rc::Rc;

use lox_compiler::{ClassInfo, Op, Program, Unit, UnitKind};
use rustc_hash::FxHashMap;

use crate::error::RuntimeError;
use crate::natives;
use crate::object::{ancestor, Class, Closure, Instance, NativeFn};
use crate::value::{Cell, Value};

const MAX_CALL_DEPTH: usize = 1024;

pub struct Vm<W: Write> {
    units: Vec<Rc<Unit>>,
    classes: Vec<ClassInfo>,
    /// Cells of captured top-level variables, keyed by definition id.
    globals: FxHashMap<u32, Rc<Cell>>,
    depth: usize,
    out: W,
}

impl Vm<io::Stdout> {
    pub fn new(program: Program) -> Vm<io::Stdout> {
        Vm::with_output(program, io::stdout())
    }
}

impl<W: Write> Vm<W> {
    pub fn with_output(program: Program, out: W) -> Vm<W> {
        Vm {
            units: program.units.into_iter().map(Rc::new).collect(),
            classes: program.classes,
            globals: FxHashMap::default(),
            depth: 0,
            out,
        }
    }

    /// Runs the program to completion.
    pub fn run(&mut self) -> Result<Value, RuntimeError> {
        let entry = self.construct(0, None, None)?;
        self.call_value(entry, vec![], 0)
    }

    /// Recovers the output sink, for tests asserting printed lines.
    pub fn into_output(self) -> W {
        self.out
    }

    /// Builds the runtime object for a unit. Late-init cells are created
    /// first so the capture wiring below, and any nested construction later,
    /// can see them.
    fn construct(
        &mut self,
        unit_index: u16,
        frame: Option<&Rc<Closure>>,
        enclosing: Option<Value>,
    ) -> Result<Value, RuntimeError> {
        let unit = Rc::clone(&self.units[unit_index as usize]);
        if unit.kind == UnitKind::Native {
            return Ok(Value::Native(Rc::new(NativeFn {
                name: unit.name.clone(),
                arity: unit.arity,
            })));
        }
        let mut cells: FxHashMap<u32, Rc<Cell>> = FxHashMap::default();
        for &var in &unit.late_inits {
            if unit.kind == UnitKind::Script {
                self.globals.insert(var, Cell::new(Value::Nil));
            } else {
                cells.insert(var, Cell::new(Value::Nil));
            }
        }
        for capture in &unit.captures {
            // A declaration that never executed leaves no cell behind; wire
            // a fresh nil cell so the closure still constructs.
            let cell = frame
                .and_then(|f| ancestor(&Value::Closure(Rc::clone(f)), capture.hops))
                .and_then(|owner| match owner {
                    Value::Closure(c) => c.cell(capture.var),
                    _ => None,
                })
                .unwrap_or_else(|| Cell::new(Value::Nil));
            cells.insert(capture.var, cell);
        }
        Ok(Value::Closure(Rc::new(Closure {
            unit,
            enclosing,
            cells: Rc::new(std::cell::RefCell::new(cells)),
            receiver: None,
        })))
    }

    /// The call protocol: reject non-callables, check arity, then dispatch
    /// on the callee's shape.
    fn call_value(&mut self, callee: Value, args: Vec<Value>, line: u32) -> Result<Value, RuntimeError> {
        match callee {
            Value::Closure(closure) => {
                self.check_arity(closure.unit.arity, args.len(), line)?;
                self.call(&closure, args, line)
            }
            Value::Class(class) => {
                self.check_arity(class.arity(), args.len(), line)?;
                let instance = Instance::new(Rc::clone(&class));
                if let Some(init) = class.find_method("init") {
                    let bound = init.bind(Rc::clone(&instance));
                    self.call(&bound, args, line)?;
                }
                Ok(Value::Instance(instance))
            }
            Value::Native(native) => {
                self.check_arity(native.arity, args.len(), line)?;
                natives::call(&native.name, &args, line)
            }
            _ => Err(RuntimeError::new("Can only call functions and classes.", line)),
        }
    }

    fn check_arity(&self, arity: u8, got: usize, line: u32) -> Result<(), RuntimeError> {
        if arity as usize == got {
            Ok(())
        } else {
            Err(RuntimeError::new(format!("Expected {arity} arguments but got {got}."), line))
        }
    }

    fn call(&mut self, closure: &Rc<Closure>, args: Vec<Value>, line: u32) -> Result<Value, RuntimeError> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(RuntimeError::new("Stack overflow.", line));
        }
        self.depth += 1;
        let result = self.execute(closure, args);
        self.depth -= 1;
        result
    }

    fn execute(&mut self, closure: &Rc<Closure>, args: Vec<Value>) -> Result<Value, RuntimeError> {
        let unit = Rc::clone(&closure.unit);
        let mut slots = vec![Value::Nil; unit.slots as usize];
        for (i, arg) in args.into_iter().enumerate() {
            slots[i] = arg;
        }
        let mut stack: Vec<Value> = Vec::new();
        let mut pc = 0usize;
        while pc < unit.code.len() {
            let line = unit.lines[pc];
            match &unit.code[pc] {
                Op::Const(constant) => stack.push(Value::from_constant(constant)),
                Op::GetSlot(slot) => stack.push(slots[*slot as usize].clone()),
                Op::SetSlot(slot) => slots[*slot as usize] = pop(&mut stack),
                Op::GetCell(slot) => {
                    let value = match &slots[*slot as usize] {
                        Value::Cell(cell) => cell.get(),
                        _ => Value::Nil,
                    };
                    stack.push(value);
                }
                Op::SetCell(slot) => {
                    let value = pop(&mut stack);
                    if let Value::Cell(cell) = &slots[*slot as usize] {
                        cell.set(value);
                    }
                }
                Op::DefineCell { var, slot } => {
                    let cell = Cell::new(pop(&mut stack));
                    closure.cells.borrow_mut().insert(*var, Rc::clone(&cell));
                    slots[*slot as usize] = Value::Cell(cell);
                }
                Op::LateDefine { var, slot } => {
                    let value = pop(&mut stack);
                    let cell = closure.cell(*var).unwrap_or_else(|| Cell::new(Value::Nil));
                    cell.set(value);
                    closure.cells.borrow_mut().insert(*var, Rc::clone(&cell));
                    slots[*slot as usize] = Value::Cell(cell);
                }
                Op::DefineGlobalCell { var } => {
                    let cell = Cell::new(pop(&mut stack));
                    self.globals.insert(*var, cell);
                }
                Op::LateDefineGlobal { var } => {
                    let value = pop(&mut stack);
                    match self.globals.get(var) {
                        Some(cell) => cell.set(value),
                        None => {
                            self.globals.insert(*var, Cell::new(value));
                        }
                    }
                }
                Op::GetGlobal { var } => {
                    let value = self.globals.get(var).map(|c| c.get()).unwrap_or(Value::Nil);
                    stack.push(value);
                }
                Op::SetGlobal { var } => {
                    let value = pop(&mut stack);
                    match self.globals.get(var) {
                        Some(cell) => cell.set(value),
                        None => {
                            self.globals.insert(*var, Cell::new(value));
                        }
                    }
                }
                Op::LoadCapture { var, slot } => {
                    let cell = closure.cell(*var).unwrap_or_else(|| Cell::new(Value::Nil));
                    slots[*slot as usize] = Value::Cell(cell);
                }
                Op::Pop => {
                    pop(&mut stack);
                }
                Op::Dup => {
                    let top = stack.last().cloned().unwrap_or(Value::Nil);
                    stack.push(top);
                }
                Op::Jump(target) => {
                    pc = *target as usize;
                    continue;
                }
                Op::JumpIfFalse(target) => {
                    if !pop(&mut stack).is_truthy() {
                        pc = *target as usize;
                        continue;
                    }
                }
                Op::JumpIfTrue(target) => {
                    if pop(&mut stack).is_truthy() {
                        pc = *target as usize;
                        continue;
                    }
                }
                Op::Not => {
                    let value = pop(&mut stack);
                    stack.push(Value::Bool(!value.is_truthy()));
                }
                Op::Negate => match pop(&mut stack) {
                    Value::Number(n) => stack.push(Value::Number(-n)),
                    _ => return Err(RuntimeError::new("Operand must be a number.", line)),
                },
                Op::CheckNumber => {
                    if !matches!(stack.last(), Some(Value::Number(_))) {
                        return Err(RuntimeError::new("Operands must be numbers.", line));
                    }
                }
                Op::Add => {
                    let b = pop(&mut stack);
                    let a = pop(&mut stack);
                    let result = match (&a, &b) {
                        (Value::Number(a), Value::Number(b)) => Value::Number(a + b),
                        (Value::Str(a), Value::Str(b)) => Value::Str(Rc::from(format!("{a}{b}").as_str())),
                        _ => {
                            return Err(RuntimeError::new(
                                "Operands must be two numbers or two strings.",
                                line,
                            ));
                        }
                    };
                    stack.push(result);
                }
                Op::Sub => binary_number(&mut stack, line, |a, b| Value::Number(a - b))?,
                Op::Mul => binary_number(&mut stack, line, |a, b| Value::Number(a * b))?,
                Op::Div => binary_number(&mut stack, line, |a, b| Value::Number(a / b))?,
                Op::Greater => binary_number(&mut stack, line, |a, b| Value::Bool(a > b))?,
                Op::GreaterEq => binary_number(&mut stack, line, |a, b| Value::Bool(a >= b))?,
                Op::Less => binary_number(&mut stack, line, |a, b| Value::Bool(a < b))?,
                Op::LessEq => binary_number(&mut stack, line, |a, b| Value::Bool(a <= b))?,
                Op::Eq => {
                    let b = pop(&mut stack);
                    let a = pop(&mut stack);
                    stack.push(Value::Bool(a == b));
                }
                Op::NotEq => {
                    let b = pop(&mut stack);
                    let a = pop(&mut stack);
                    stack.push(Value::Bool(a != b));
                }
                Op::Print => {
                    let value = pop(&mut stack);
                    writeln!(self.out, "{value}")
                        .map_err(|e| RuntimeError::new(format!("I/O error: {e}."), line))?;
                }
                Op::Call { argc } => {
                    let at = stack.len() - *argc as usize;
                    let args = stack.split_off(at);
                    let callee = pop(&mut stack);
                    let result = self.call_value(callee, args, line)?;
                    stack.push(result);
                }
                Op::EnsureInstance => {
                    if !matches!(stack.last(), Some(Value::Instance(_))) {
                        return Err(RuntimeError::new("Only instances have fields.", line));
                    }
                }
                Op::GetProp { name } => match pop(&mut stack) {
                    Value::Instance(instance) => stack.push(instance.get(name, line)?),
                    _ => {
                        return Err(RuntimeError::new("Only instances have properties.", line));
                    }
                },
                Op::SetProp { name } => {
                    let value = pop(&mut stack);
                    let object = pop(&mut stack);
                    match object {
                        Value::Instance(instance) => {
                            instance.set(name, value.clone());
                            stack.push(value);
                        }
                        _ => {
                            return Err(RuntimeError::new("Only instances have fields.", line));
                        }
                    }
                }
                Op::Closure { unit } => {
                    let value = self.construct(
                        *unit,
                        Some(closure),
                        Some(Value::Closure(Rc::clone(closure))),
                    )?;
                    stack.push(value);
                }
                Op::Class { class, has_super } => {
                    let info = self.classes[*class as usize].clone();
                    let superclass = if *has_super {
                        match pop(&mut stack) {
                            Value::Class(superclass) => Some(superclass),
                            _ => {
                                return Err(RuntimeError::new("Superclass must be a class.", line));
                            }
                        }
                    } else {
                        None
                    };
                    let class = Class::new(
                        info.name.clone(),
                        Some(Value::Closure(Rc::clone(closure))),
                        superclass,
                    );
                    for method in &info.methods {
                        let constructed = self.construct(
                            method.unit,
                            Some(closure),
                            Some(Value::Class(Rc::clone(&class))),
                        )?;
                        if let Value::Closure(body) = constructed {
                            class.add_method(method.name.clone(), body);
                        }
                    }
                    stack.push(Value::Class(class));
                }
                Op::This { hops } => {
                    let holder = ancestor(&Value::Closure(Rc::clone(closure)), *hops);
                    let receiver = match holder {
                        Some(Value::Closure(method)) => method.receiver.clone(),
                        _ => None,
                    };
                    match receiver {
                        Some(instance) => stack.push(Value::Instance(instance)),
                        None => {
                            return Err(RuntimeError::new(
                                "Can't use 'this' outside of a class.",
                                line,
                            ));
                        }
                    }
                }
                Op::Super { hops, method } => {
                    let holder = ancestor(&Value::Closure(Rc::clone(closure)), *hops);
                    let Some(Value::Closure(enclosing_method)) = holder else {
                        return Err(RuntimeError::new(
                            "Can't use 'super' outside of a class.",
                            line,
                        ));
                    };
                    let class = match &enclosing_method.enclosing {
                        Some(Value::Class(class)) => Rc::clone(class),
                        _ => {
                            return Err(RuntimeError::new(
                                "Can't use 'super' outside of a class.",
                                line,
                            ));
                        }
                    };
                    let found = class
                        .superclass
                        .as_ref()
                        .and_then(|superclass| superclass.find_method(method));
                    let Some(found) = found else {
                        return Err(RuntimeError::new(
                            format!("Undefined property '{method}'."),
                            line,
                        ));
                    };
                    let Some(receiver) = enclosing_method.receiver.clone() else {
                        return Err(RuntimeError::new(
                            "Can't use 'super' outside of a class.",
                            line,
                        ));
                    };
                    stack.push(Value::Closure(found.bind(receiver)));
                }
                Op::Return => return Ok(pop(&mut stack)),
                Op::ReturnReceiver => {
                    return Ok(closure
                        .receiver
                        .clone()
                        .map(Value::Instance)
                        .unwrap_or(Value::Nil));
                }
                Op::Fail { message } => return Err(RuntimeError::new(message.clone(), line)),
            }
            pc += 1;
        }
        Ok(Value::Nil)
    }
}

fn pop(stack: &mut Vec<Value>) -> Value {
    // An empty stack here means the unit's code is unbalanced.
    debug_assert!(!stack.is_empty(), "operand stack underflow");
    stack.pop().unwrap_or(Value::Nil)
}

/// Both operands were checked by `CheckNumber` when they were produced.
fn binary_number(
    stack: &mut Vec<Value>,
    line: u32,
    apply: impl Fn(f64, f64) -> Value,
) -> Result<(), RuntimeError> {
    let b = pop(stack);
    let a = pop(stack);
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => {
            stack.push(apply(a, b));
            Ok(())
        }
        _ => Err(RuntimeError::new("Operands must be numbers.", line)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "operand stack underflow")]
    fn unbalanced_code_is_caught() {
        let program = Program {
            units: vec![Unit {
                name: "main".to_owned(),
                kind: UnitKind::Script,
                arity: 0,
                slots: 0,
                code: vec![Op::Pop],
                lines: vec![1],
                captures: vec![],
                late_inits: vec![],
            }],
            classes: vec![],
        };
        let mut vm = Vm::with_output(program, Vec::new());
        let _ = vm.run();
    }
}
