//! Garnet: a small dynamically-typed procedural scripting language.
//!
//! This is the library root that exports all modules and the pipeline
//! entry points. The pipeline has three stages: a lexical scanner, a
//! single-pass compiler that emits linear bytecode, and a stack-based
//! virtual machine that executes the linked program image.

pub mod bytecode;
pub mod error;
pub mod lexer;
pub mod span;
pub mod value;

use std::rc::Rc;
use std::time::Instant;

use bytecode::{Compiler, CompilerOptions, ProgramImage, VM};
use error::{GarnetError, SourceInfo};

/// Compile and link a Garnet program. With `verbose`, prints compile
/// timing and the per-function disassembly.
pub fn compile(
    source: &str,
    source_info: Rc<SourceInfo>,
    options: CompilerOptions,
) -> Result<ProgramImage, GarnetError> {
    let start = Instant::now();
    let program = Compiler::compile(source, source_info, options)?;
    if options.verbose {
        println!(
            "Compilation succeeded in {} µs.",
            start.elapsed().as_micros()
        );
        bytecode::print_disassembly(&program);
    }
    let image = program.link()?;
    Ok(image)
}

/// Compile, link, and execute a Garnet program.
pub fn run(
    source: &str,
    source_info: Rc<SourceInfo>,
    options: CompilerOptions,
) -> Result<(), GarnetError> {
    let image = compile(source, source_info, options)?;
    let mut vm = VM::new(image);
    let start = Instant::now();
    vm.run()?;
    if options.verbose {
        println!("Execution finished in {} µs.", start.elapsed().as_micros());
    }
    Ok(())
}

/// Run a program from source with default options.
pub fn run_source(source: &str, file_name: &str) -> Result<(), GarnetError> {
    run(
        source,
        SourceInfo::new(file_name, source),
        CompilerOptions::default(),
    )
}

/// Run a `.gr` file from disk.
pub fn run_file(path: &std::path::Path, options: CompilerOptions) -> Result<(), GarnetError> {
    let source = std::fs::read_to_string(path)?;
    let source_info = SourceInfo::new(path.display().to_string(), &source);
    run(&source, source_info, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use error::RuntimeErrorKind;

    #[test]
    fn test_run_source_ok() {
        assert!(run_source("func main(): assert(1 + 1 == 2); end", "test.gr").is_ok());
    }

    #[test]
    fn test_missing_main_fails_link() {
        let result = run_source("func helper(): end", "test.gr");
        assert!(matches!(
            result,
            Err(GarnetError::Compile(error::CompileError::MissingMain))
        ));
    }

    #[test]
    fn test_compile_error_surfaces() {
        let result = run_source("func main(): final x = 1; x = 2; end", "test.gr");
        match result {
            Err(GarnetError::Compile(e)) => {
                assert!(e
                    .diagnostics()
                    .iter()
                    .any(|d| d.message.contains("Cannot reassign to final 'x'")));
            }
            other => panic!("expected compile error, got ok={}", other.is_ok()),
        }
    }

    #[test]
    fn test_runtime_error_surfaces() {
        let result = run_source("func main(): println(1 + \"x\"); end", "test.gr");
        match result {
            Err(GarnetError::Runtime(e)) => {
                assert_eq!(e.kind, RuntimeErrorKind::InvalidOperand);
                assert_eq!(e.line, 1);
            }
            other => panic!("expected runtime error, got ok={}", other.is_ok()),
        }
    }
}
