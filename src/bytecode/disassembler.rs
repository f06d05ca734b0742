//! Bytecode disassembler for verbose output and debugging.

use std::fmt::Write;

use crate::bytecode::function::{CompiledProgram, FunctionRecord};

/// Disassemble one function: its op list with the constants each op
/// consumes shown inline, walked with the same cursor discipline the VM
/// uses.
pub fn disassemble_function(function: &FunctionRecord) -> String {
    let mut output = String::new();

    let _ = writeln!(
        &mut output,
        "== {} (arity: {}, {} ops, {} constants) ==",
        function.name,
        function.arity,
        function.ops.len(),
        function.constants.len()
    );

    let mut cursor = 0usize;
    for (offset, op_line) in function.ops.iter().enumerate() {
        let _ = write!(
            &mut output,
            "{:04} | line {:<4} | {:<17}",
            offset, op_line.line, op_line.op
        );
        for _ in 0..op_line.op.constant_operands() {
            match function.constants.get(cursor) {
                Some(constant) => {
                    let _ = write!(&mut output, " {}", constant);
                }
                None => {
                    let _ = write!(&mut output, " <missing>");
                }
            }
            cursor += 1;
        }
        let _ = writeln!(&mut output);
    }

    if cursor != function.constants.len() {
        let _ = writeln!(
            &mut output,
            "!! {} constant(s) not consumed by the op list",
            function.constants.len() - cursor
        );
    }

    output
}

/// Disassemble every function of a compiled program.
pub fn disassemble_program(program: &CompiledProgram) -> String {
    let mut output = String::new();
    for function in program.functions.values() {
        output.push_str(&disassemble_function(function));
        output.push('\n');
    }
    output
}

/// Print the disassembly to stdout.
pub fn print_disassembly(program: &CompiledProgram) {
    print!("{}", disassemble_program(program));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::compiler::{Compiler, CompilerOptions};
    use crate::error::SourceInfo;

    fn compile(source: &str) -> CompiledProgram {
        let info = SourceInfo::new("test.gr", source);
        Compiler::compile(source, info, CompilerOptions::default()).expect("compile")
    }

    #[test]
    fn test_disassembly_consumes_all_constants() {
        let program = compile(
            "
            func main():
                var x = 1;
                if x < 2:
                    println(x);
                end
            end
            ",
        );
        let listing = disassemble_program(&program);
        assert!(listing.contains("== main (arity: 0"));
        assert!(listing.contains("LoadConstant"));
        assert!(listing.contains("JumpIfFalse"));
        assert!(!listing.contains("not consumed"));
        assert!(!listing.contains("<missing>"));
    }

    #[test]
    fn test_disassembly_lists_every_function() {
        let program = compile(
            "
            func helper(a):
                return a;
            end
            func main():
                helper(1);
            end
            ",
        );
        let listing = disassemble_program(&program);
        assert!(listing.contains("== helper (arity: 1"));
        assert!(listing.contains("== main (arity: 0"));
        assert!(listing.contains("Call"));
    }
}
