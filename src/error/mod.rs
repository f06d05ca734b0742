//! Error types for all pipeline phases.

use crate::span::Span;
use thiserror::Error;

pub mod reporter;

pub use reporter::{Reporter, SourceInfo};

/// How serious a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// A single compile-time diagnostic: severity, message, and the span of the
/// offending token. The file name and source excerpt are supplied by the
/// reporter when the diagnostic is rendered.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub span: Span,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>, span: Span) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            span,
        }
    }

    pub fn warning(message: impl Into<String>, span: Span) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
            span,
        }
    }
}

/// Bytecode compilation errors.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("compilation failed with {} error(s)", errors.len())]
    HadErrors { errors: Vec<Diagnostic> },

    #[error("no `main` function declared")]
    MissingMain,
}

impl CompileError {
    /// The collected diagnostics, if any.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            Self::HadErrors { errors } => errors,
            Self::MissingMain => &[],
        }
    }
}

/// The closed taxonomy of runtime failures. Every runtime error is fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeErrorKind {
    AssertionFailed,
    FunctionNotFound,
    IncorrectArgCount,
    IndexOutOfRange,
    InvalidArgument,
    InvalidIterator,
    InvalidCast,
    InvalidOperand,
    InvalidType,
    ThrownException,
}

impl std::fmt::Display for RuntimeErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::AssertionFailed => "AssertionFailed",
            Self::FunctionNotFound => "FunctionNotFound",
            Self::IncorrectArgCount => "IncorrectArgCount",
            Self::IndexOutOfRange => "IndexOutOfRange",
            Self::InvalidArgument => "InvalidArgument",
            Self::InvalidIterator => "InvalidIterator",
            Self::InvalidCast => "InvalidCast",
            Self::InvalidOperand => "InvalidOperand",
            Self::InvalidType => "InvalidType",
            Self::ThrownException => "ThrownException",
        };
        write!(f, "{}", name)
    }
}

/// One entry of the unwound call stack, already resolved to function names.
#[derive(Debug, Clone)]
pub struct StackFrame {
    pub caller: String,
    pub callee: String,
    pub line: usize,
}

/// A fatal runtime error, carrying the call stack captured at the point of
/// failure so the reporter can unwind it.
#[derive(Debug, Error)]
#[error("{kind}: {message} [line {line}]")]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub message: String,
    pub line: usize,
    pub call_stack: Vec<StackFrame>,
}

impl RuntimeError {
    pub fn new(kind: RuntimeErrorKind, message: impl Into<String>, line: usize) -> Self {
        Self {
            kind,
            message: message.into(),
            line,
            call_stack: Vec::new(),
        }
    }

    pub fn with_call_stack(mut self, call_stack: Vec<StackFrame>) -> Self {
        self.call_stack = call_stack;
        self
    }
}

/// A unified error type for all phases.
#[derive(Debug, Error)]
pub enum GarnetError {
    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        assert_eq!(RuntimeErrorKind::InvalidOperand.to_string(), "InvalidOperand");
        assert_eq!(
            RuntimeErrorKind::AssertionFailed.to_string(),
            "AssertionFailed"
        );
    }

    #[test]
    fn test_runtime_error_display() {
        let err = RuntimeError::new(RuntimeErrorKind::InvalidCast, "cannot cast `Null` to Int", 3);
        assert_eq!(
            err.to_string(),
            "InvalidCast: cannot cast `Null` to Int [line 3]"
        );
    }

    #[test]
    fn test_compile_error_diagnostics() {
        let err = CompileError::HadErrors {
            errors: vec![Diagnostic::error("bad", Span::default())],
        };
        assert_eq!(err.diagnostics().len(), 1);
        assert!(CompileError::MissingMain.diagnostics().is_empty());
    }
}
