//! Compiled program representation.
//!
//! A [`Program`] is a flat pool of [`Unit`]s (one per function, method, or
//! native stub, with the synthesized entry script at index 0) plus the class
//! descriptors referenced by `Op::Class`. The whole structure is serde-ready
//! so a compiled program can be written out as JSON.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Nil,
    Bool(bool),
    Number(f64),
    Str(String),
}

/// One instruction. Jump targets are absolute indices into the unit's code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Op {
    Const(Constant),

    /// Read or write a plain frame slot.
    GetSlot(u16),
    SetSlot(u16),
    /// Read or write through the cell stored in a frame slot.
    GetCell(u16),
    SetCell(u16),
    /// Pop a value into a fresh cell and store the cell in a slot.
    DefineCell { var: u32, slot: u16 },
    /// Pop a value into the pre-created cell for `var`, keeping the cell in
    /// a slot for same-frame access.
    LateDefine { var: u32, slot: u16 },
    /// Pop a value into a fresh cell in the global table.
    DefineGlobalCell { var: u32 },
    /// Pop a value into the pre-created global cell for `var`.
    LateDefineGlobal { var: u32 },
    GetGlobal { var: u32 },
    SetGlobal { var: u32 },
    /// Prologue: copy the cell wired at construction into a frame slot.
    LoadCapture { var: u32, slot: u16 },

    Pop,
    Dup,

    Jump(u32),
    JumpIfFalse(u32),
    JumpIfTrue(u32),

    Not,
    Negate,
    /// Assert the top of stack is a number before the other operand of an
    /// arithmetic or comparison operator is evaluated.
    CheckNumber,
    Add,
    Sub,
    Mul,
    Div,
    Greater,
    GreaterEq,
    Less,
    LessEq,
    Eq,
    NotEq,

    Print,
    Call { argc: u8 },

    /// Assert the top of stack is an instance before a field write's value
    /// is evaluated.
    EnsureInstance,
    GetProp { name: String },
    SetProp { name: String },

    /// Construct a closure over the current frame.
    Closure { unit: u16 },
    /// Construct a class; pops the superclass first when `has_super`.
    Class { class: u16, has_super: bool },
    /// Push the receiver found `hops` frames up the enclosing chain.
    This { hops: u8 },
    /// Push the superclass method bound to the receiver found `hops` up.
    Super { hops: u8, method: String },

    Return,
    /// Return the receiver; emitted as the implicit return of `init` methods.
    ReturnReceiver,

    /// Raise a runtime error recorded at compile time.
    Fail { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitKind {
    /// The synthesized top-level function.
    Script,
    Function,
    Initializer,
    Method,
    /// Bodyless; dispatched by name to the host runtime.
    Native,
}

/// A cell to wire from an enclosing frame when a closure is constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capture {
    pub var: u32,
    /// Enclosing-chain hops from the construction frame to the owner.
    pub hops: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub name: String,
    pub kind: UnitKind,
    pub arity: u8,
    /// Frame size in slots.
    pub slots: u16,
    pub code: Vec<Op>,
    /// Source line per instruction, for runtime error attribution.
    pub lines: Vec<u32>,
    pub captures: Vec<Capture>,
    /// Variables whose cells must exist before their declaration executes.
    /// Created in the global table for the script unit, in the closure's own
    /// cell map otherwise.
    pub late_inits: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodInfo {
    pub name: String,
    pub unit: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassInfo {
    pub name: String,
    pub line: u32,
    pub methods: Vec<MethodInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub units: Vec<Unit>,
    pub classes: Vec<ClassInfo>,
}

impl Program {
    pub fn entry(&self) -> &Unit {
        &self.units[0]
    }
}

/// Incrementally builds one unit's code, tracking source lines and patching
/// forward jumps.
pub struct UnitBuilder {
    name: String,
    kind: UnitKind,
    arity: u8,
    code: Vec<Op>,
    lines: Vec<u32>,
}

impl UnitBuilder {
    pub fn new(name: impl Into<String>, kind: UnitKind, arity: u8) -> Self {
        UnitBuilder { name: name.into(), kind, arity, code: Vec::new(), lines: Vec::new() }
    }

    /// Appends an instruction and returns its index.
    pub fn emit(&mut self, op: Op, line: u32) -> usize {
        self.code.push(op);
        self.lines.push(line);
        self.code.len() - 1
    }

    /// Next instruction index, for backward jump targets.
    pub fn here(&self) -> u32 {
        self.code.len() as u32
    }

    /// Points a previously emitted jump at the next instruction.
    pub fn patch_jump(&mut self, at: usize) {
        let target = self.code.len() as u32;
        match &mut self.code[at] {
            Op::Jump(t) | Op::JumpIfFalse(t) | Op::JumpIfTrue(t) => *t = target,
            _ => {}
        }
    }

    pub fn finish(self, slots: u16, captures: Vec<Capture>, late_inits: Vec<u32>) -> Unit {
        Unit {
            name: self.name,
            kind: self.kind,
            arity: self.arity,
            slots,
            code: self.code,
            lines: self.lines,
            captures,
            late_inits,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patches_forward_jump() {
        let mut b = UnitBuilder::new("test", UnitKind::Function, 0);
        let jump = b.emit(Op::JumpIfFalse(u32::MAX), 1);
        b.emit(Op::Const(Constant::Number(1.0)), 1);
        b.emit(Op::Pop, 1);
        b.patch_jump(jump);
        let unit = b.finish(0, vec![], vec![]);
        assert_eq!(unit.code[0], Op::JumpIfFalse(3));
        assert_eq!(unit.lines.len(), unit.code.len());
    }
}
