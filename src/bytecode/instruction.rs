//! Bytecode instruction definitions for the Garnet VM.
//!
//! Ops carry no embedded immediates. The only operands are values on the
//! stack and constants consumed from the pool through the VM's monotonic
//! constant cursor; `constant_operands` declares how many slots each op
//! pulls, and that count is part of the opcode contract with the compiler.

use std::fmt;

/// Opcodes for the bytecode virtual machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    // ============ Constants & Stack ============
    /// Push a constant: pulls one constant
    LoadConstant,
    /// Pop the top value from the stack
    Pop,

    // ============ Locals ============
    /// Push a Null slot onto the locals array
    DeclareLocal,
    /// Push locals[base + slot]: pulls one constant (slot)
    LoadLocal,
    /// Store the top of the stack (without popping it) into
    /// locals[base + slot]: pulls one constant (slot)
    AssignLocal,
    /// Pop one slot from the locals array
    PopLocal,

    // ============ Arithmetic ============
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Pow,
    /// Negate a numeric value
    Negate,

    // ============ Comparison & Logic ============
    Equal,
    NotEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    /// Eager logical and over AsBool-coerced operands
    And,
    /// Eager logical or over AsBool-coerced operands
    Or,
    Not,

    // ============ Control Flow ============
    /// Unconditional jump: pulls two constants (constant index, op index),
    /// both relative to the active function's pools
    Jump,
    /// Pop the condition and jump if it is falsey: pulls two constants as
    /// `Jump` does
    JumpIfFalse,

    // ============ Functions ============
    /// Call a user function: pulls two constants (callee name hash,
    /// argument count)
    Call,
    /// Call a host function: pulls two constants (native table index,
    /// argument count)
    NativeCall,
    /// Return to the caller, or halt when the top-level frame returns
    Return,

    // ============ Casts & Type Checks ============
    CastAsInt,
    CastAsFloat,
    CastAsBool,
    CastAsString,
    CastAsChar,
    /// Pop a value and push whether it matches a type tag: pulls one
    /// constant (tag)
    CheckType,

    // ============ Assertions ============
    /// Pop the condition; raise AssertionFailed when falsey
    Assert,
    /// As `Assert`, with a user message: pulls one constant (message)
    AssertWithMessage,

    // ============ Output ============
    /// Print the top of the stack without popping it
    Print,
    /// Print the top of the stack and a newline without popping it
    PrintLn,
    /// Print a newline
    PrintEmptyLine,
    /// Print a tab
    PrintTab,
}

impl Op {
    /// How many constant-pool slots this op consumes when executed.
    pub fn constant_operands(self) -> usize {
        match self {
            Op::LoadConstant
            | Op::LoadLocal
            | Op::AssignLocal
            | Op::CheckType
            | Op::AssertWithMessage => 1,

            Op::Jump | Op::JumpIfFalse | Op::Call | Op::NativeCall => 2,

            Op::Pop
            | Op::DeclareLocal
            | Op::PopLocal
            | Op::Add
            | Op::Subtract
            | Op::Multiply
            | Op::Divide
            | Op::Modulo
            | Op::Pow
            | Op::Negate
            | Op::Equal
            | Op::NotEqual
            | Op::Greater
            | Op::GreaterEqual
            | Op::Less
            | Op::LessEqual
            | Op::And
            | Op::Or
            | Op::Not
            | Op::Return
            | Op::CastAsInt
            | Op::CastAsFloat
            | Op::CastAsBool
            | Op::CastAsString
            | Op::CastAsChar
            | Op::Assert
            | Op::Print
            | Op::PrintLn
            | Op::PrintEmptyLine
            | Op::PrintTab => 0,
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&format!("{:?}", self))
    }
}

/// An op paired with the source line it was emitted from, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpLine {
    pub op: Op,
    pub line: usize,
}

impl OpLine {
    pub fn new(op: Op, line: usize) -> Self {
        Self { op, line }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_operand_counts() {
        assert_eq!(Op::LoadConstant.constant_operands(), 1);
        assert_eq!(Op::Jump.constant_operands(), 2);
        assert_eq!(Op::Call.constant_operands(), 2);
        assert_eq!(Op::Add.constant_operands(), 0);
        assert_eq!(Op::AssertWithMessage.constant_operands(), 1);
        assert_eq!(Op::Return.constant_operands(), 0);
    }

    #[test]
    fn test_op_line() {
        let op = OpLine::new(Op::Pop, 12);
        assert_eq!(op.op, Op::Pop);
        assert_eq!(op.line, 12);
    }
}
