//! Function records, the constant pool, and the linking step that splices
//! per-function pools into one flat program image.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use indexmap::IndexMap;

use crate::bytecode::instruction::OpLine;
use crate::error::CompileError;
use crate::value::Value;

/// A constant value in a function's pool: the subset of `Value` producible
/// at compile time. Constants are referenced positionally through the VM's
/// constant cursor.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Char(char),
    String(String),
}

impl Constant {
    pub fn to_value(&self) -> Value {
        match self {
            Constant::Null => Value::Null,
            Constant::Bool(b) => Value::Bool(*b),
            Constant::Int(n) => Value::Int(*n),
            Constant::Float(n) => Value::Float(*n),
            Constant::Char(c) => Value::Char(*c),
            Constant::String(s) => Value::string(s.clone()),
        }
    }

    /// The integer payload, for slot ids, hashes, jump targets, and counts.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Constant::Int(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Null => write!(f, "null"),
            Constant::Bool(b) => write!(f, "{}", b),
            Constant::Int(n) => write!(f, "{}", n),
            Constant::Float(n) => write!(f, "{}", n),
            Constant::Char(c) => write!(f, "'{}'", c),
            Constant::String(s) => write!(f, "\"{}\"", s),
        }
    }
}

/// The 64-bit hash functions are registered and called under.
pub fn hash_name(name: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    hasher.finish()
}

/// Per-function compilation output: metadata plus the function's private op
/// and constant lists. Records are created during compilation, finalized
/// once, then read-only.
#[derive(Debug, Clone)]
pub struct FunctionRecord {
    pub name: String,
    pub name_hash: u64,
    pub arity: usize,
    pub line: usize,
    pub ops: Vec<OpLine>,
    pub constants: Vec<Constant>,
}

impl FunctionRecord {
    pub fn new(name: impl Into<String>, arity: usize, line: usize) -> Self {
        let name = name.into();
        let name_hash = hash_name(&name);
        Self {
            name,
            name_hash,
            arity,
            line,
            ops: Vec::new(),
            constants: Vec::new(),
        }
    }
}

/// Everything the compiler hands to the linker: the function registry in
/// declaration order plus the name behind every call-site hash, kept for
/// runtime diagnostics.
#[derive(Debug, Default)]
pub struct CompiledProgram {
    pub functions: IndexMap<u64, FunctionRecord>,
    pub call_names: HashMap<u64, String>,
}

impl CompiledProgram {
    /// Splice every function's op and constant lists into two flat vectors,
    /// `main` first, recording each function's start offsets. Fails when no
    /// `main` was declared.
    pub fn link(self) -> Result<ProgramImage, CompileError> {
        let main_hash = hash_name("main");
        if !self.functions.contains_key(&main_hash) {
            return Err(CompileError::MissingMain);
        }

        let mut ops = Vec::new();
        let mut constants = Vec::new();
        let mut functions = IndexMap::new();

        let mut splice = |record: &FunctionRecord, functions: &mut IndexMap<u64, FunctionInfo>| {
            functions.insert(
                record.name_hash,
                FunctionInfo {
                    name: record.name.clone(),
                    arity: record.arity,
                    line: record.line,
                    op_start: ops.len(),
                    constant_start: constants.len(),
                },
            );
            ops.extend(record.ops.iter().copied());
            constants.extend(record.constants.iter().cloned());
        };

        splice(&self.functions[&main_hash], &mut functions);
        for (hash, record) in &self.functions {
            if *hash != main_hash {
                splice(record, &mut functions);
            }
        }

        Ok(ProgramImage {
            ops,
            constants,
            functions,
            call_names: self.call_names,
            main_hash,
        })
    }
}

/// Post-link metadata for one function.
#[derive(Debug, Clone)]
pub struct FunctionInfo {
    pub name: String,
    pub arity: usize,
    pub line: usize,
    pub op_start: usize,
    pub constant_start: usize,
}

/// The flat, linked program the VM executes. Jump targets inside a function
/// stay relative to that function's pools; the VM adds the active
/// function's offsets when resolving them.
#[derive(Debug)]
pub struct ProgramImage {
    pub ops: Vec<OpLine>,
    pub constants: Vec<Constant>,
    pub functions: IndexMap<u64, FunctionInfo>,
    pub call_names: HashMap<u64, String>,
    pub main_hash: u64,
}

impl ProgramImage {
    /// Resolve a call-target hash to its source name for diagnostics.
    pub fn name_of(&self, hash: u64) -> String {
        if let Some(info) = self.functions.get(&hash) {
            return info.name.clone();
        }
        self.call_names
            .get(&hash)
            .cloned()
            .unwrap_or_else(|| format!("<unknown:{:x}>", hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::instruction::Op;

    #[test]
    fn test_hash_is_stable_and_distinct() {
        assert_eq!(hash_name("main"), hash_name("main"));
        assert_ne!(hash_name("main"), hash_name("mian"));
    }

    #[test]
    fn test_link_requires_main() {
        let program = CompiledProgram::default();
        assert!(matches!(program.link(), Err(CompileError::MissingMain)));
    }

    #[test]
    fn test_link_offsets() {
        let mut program = CompiledProgram::default();

        let mut helper = FunctionRecord::new("helper", 1, 1);
        helper.ops.push(OpLine::new(Op::Return, 1));
        helper.constants.push(Constant::Int(7));
        program.functions.insert(helper.name_hash, helper);

        let mut main = FunctionRecord::new("main", 0, 3);
        main.ops.push(OpLine::new(Op::LoadConstant, 3));
        main.ops.push(OpLine::new(Op::Return, 3));
        main.constants.push(Constant::Null);
        main.constants.push(Constant::Null);
        program.functions.insert(main.name_hash, main);

        let image = program.link().expect("link");
        // main is spliced first regardless of declaration order
        let main_info = &image.functions[&hash_name("main")];
        assert_eq!(main_info.op_start, 0);
        assert_eq!(main_info.constant_start, 0);
        let helper_info = &image.functions[&hash_name("helper")];
        assert_eq!(helper_info.op_start, 2);
        assert_eq!(helper_info.constant_start, 2);
        assert_eq!(image.ops.len(), 3);
        assert_eq!(image.constants.len(), 3);
    }

    #[test]
    fn test_constant_to_value() {
        assert_eq!(Constant::Int(3).to_value(), Value::Int(3));
        assert_eq!(Constant::Null.to_value(), Value::Null);
        assert_eq!(
            Constant::String("hi".to_string()).to_value(),
            Value::string("hi")
        );
    }
}
