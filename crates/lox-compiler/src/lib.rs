//! Compiler pipeline for Lox.
//!
//! Source goes through five stages: parse, context checks, variable
//! resolution, a fixed number of optimization passes, frame slot allocation,
//! and code generation. The program is compiled as the body of a synthesized
//! top-level function, with the native function declarations prepended so
//! they resolve like any other binding and disappear when unused.

pub mod allocator;
pub mod bytecode;
pub mod checker;
pub mod codegen;
pub mod error;
pub mod optimize;
pub mod resolver;

use lox_parser::{ast, FunctionDecl, Stmt, Token, TokenId, TokenKind};

pub use bytecode::{Capture, ClassInfo, Constant, MethodInfo, Op, Program, Unit, UnitKind};
pub use error::{CompileError, CompileResult};

use allocator::Allocator;
use checker::Checker;
use codegen::CodeGenerator;
use optimize::Optimizer;
use resolver::Resolver;

/// Optimization pass count used when none is given.
pub const DEFAULT_PASSES: usize = 5;

/// Native functions every program is compiled against.
const NATIVES: &[(&str, u8)] = &[
    ("clock", 0),
    ("read", 0),
    ("utf", 4),
    ("exit", 1),
    ("printerr", 1),
];

pub struct Compiler {
    passes: usize,
}

impl Compiler {
    pub fn new() -> Self {
        Compiler { passes: DEFAULT_PASSES }
    }

    pub fn with_passes(passes: usize) -> Self {
        Compiler { passes }
    }

    pub fn compile(&self, source: &str) -> CompileResult<Program> {
        let program = lox_parser::parse(source)?;
        Checker::new().check(&program.statements)?;
        let entry = synthesize_entry(program);
        let mut resolver = Resolver::new();
        resolver.resolve(&entry)?;
        let (entry, undefined) = Optimizer::new(&mut resolver).run(entry, self.passes);
        if !undefined.is_empty() {
            return Err(CompileError::Undefined(undefined));
        }
        let mut allocator = Allocator::new(&resolver);
        allocator.allocate(&entry);
        CodeGenerator::new(&resolver, &allocator).generate(&entry)
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Compiler::new()
    }
}

/// Compiles with the default pass count.
pub fn compile(source: &str) -> CompileResult<Program> {
    Compiler::new().compile(source)
}

/// Wraps the program in the entry function, with native declarations first.
/// Synthesized tokens take ids from the parser's unused range; the entry
/// function itself owns the reserved id 0.
fn synthesize_entry(program: ast::Program) -> FunctionDecl {
    let mut next = program.next_token_id;
    let mut fresh = |lexeme: String, line: u32| {
        let token = Token::new(TokenKind::Identifier, lexeme, line, TokenId(next));
        next += 1;
        token
    };
    let mut body: Vec<Stmt> = NATIVES
        .iter()
        .map(|&(name, arity)| {
            let name = fresh(name.to_owned(), 0);
            let params = (0..arity).map(|i| fresh(format!("arg{i}"), 0)).collect();
            Stmt::Function(FunctionDecl { name, params, body: vec![], is_native: true })
        })
        .collect();
    body.extend(program.statements);
    FunctionDecl {
        name: Token::new(TokenKind::Fun, "main", 0, TokenId::ENTRY),
        params: vec![],
        body,
        is_native: false,
    }
}
