//! `loxc`: compile a Lox script and run it, or write the compiled program
//! out as JSON.
//!
//! Exit codes follow the sysexits convention the original driver used:
//! 64 for usage errors, 65 for compile errors, 70 for runtime errors and
//! for undefined variables detected statically, 74 for I/O failures.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::error::ErrorKind;
use clap::Parser;
use lox_compiler::{CompileError, Compiler, Program};
use lox_runtime::Vm;

const EX_USAGE: i32 = 64;
const EX_DATAERR: i32 = 65;
const EX_SOFTWARE: i32 = 70;
const EX_IOERR: i32 = 74;

/// Compile and run Lox programs.
#[derive(Parser)]
#[command(name = "loxc", version, about)]
struct Cli {
    /// Lox source file.
    script: PathBuf,

    /// Write the compiled program here as JSON instead of running it.
    output: Option<PathBuf>,

    /// Number of optimization passes.
    #[arg(long, default_value_t = lox_compiler::DEFAULT_PASSES)]
    passes: usize,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => EX_USAGE,
            };
            let _ = err.print();
            std::process::exit(code);
        }
    };
    std::process::exit(run(cli));
}

fn run(cli: Cli) -> i32 {
    let source = match std::fs::read_to_string(&cli.script) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("Could not read {}: {err}", cli.script.display());
            return EX_IOERR;
        }
    };

    let program = match Compiler::with_passes(cli.passes).compile(&source) {
        Ok(program) => program,
        Err(CompileError::Parse(diags)) | Err(CompileError::Semantic(diags)) => {
            for diag in &diags {
                eprintln!("{diag}");
            }
            return EX_DATAERR;
        }
        Err(CompileError::Undefined(diags)) => {
            // Known-bad accesses report in the runtime error format, and the
            // program neither runs nor gets written out.
            for diag in &diags {
                eprintln!("{}\n[line {}]", diag.message, diag.line);
            }
            return EX_SOFTWARE;
        }
        Err(err @ CompileError::Internal(_)) => {
            eprintln!("{err}");
            return EX_DATAERR;
        }
    };

    match &cli.output {
        Some(path) => match write_program(path, &program) {
            Ok(()) => 0,
            Err(err) => {
                eprintln!("{err:#}");
                EX_IOERR
            }
        },
        None => {
            let mut vm = Vm::new(program);
            match vm.run() {
                Ok(_) => 0,
                Err(err) => {
                    eprintln!("{err}");
                    EX_SOFTWARE
                }
            }
        }
    }
}

fn write_program(path: &Path, program: &Program) -> anyhow::Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), program)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
