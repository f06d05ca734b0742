//! Diagnostic rendering: position headers, source excerpts, column carets,
//! and runtime call-stack unwinding.

use std::rc::Rc;

use crate::error::{Diagnostic, RuntimeError, Severity};
use crate::span::Span;

const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const RESET: &str = "\x1b[0m";

/// Runtime call stacks are truncated to this many frames unless
/// `GARNET_FULL_STACKTRACE=1` is set.
const STACK_TRACE_LIMIT: usize = 15;

/// A read-only view of the compiled source: file name plus a line -> text
/// mapping. Shared by the compiler's reporter and the runtime error printer.
#[derive(Debug)]
pub struct SourceInfo {
    pub file_name: String,
    source: String,
    line_offsets: Vec<(usize, usize)>,
}

impl SourceInfo {
    pub fn new(file_name: impl Into<String>, source: &str) -> Rc<Self> {
        let mut line_offsets = Vec::new();
        let mut start = 0;
        for (i, c) in source.char_indices() {
            if c == '\n' {
                line_offsets.push((start, i));
                start = i + 1;
            }
        }
        line_offsets.push((start, source.len()));
        Rc::new(Self {
            file_name: file_name.into(),
            source: source.to_string(),
            line_offsets,
        })
    }

    /// The text of a 1-based line, without its newline.
    pub fn line(&self, line: usize) -> Option<&str> {
        let (start, end) = *self.line_offsets.get(line.checked_sub(1)?)?;
        Some(&self.source[start..end])
    }

    /// The source text covered by a span.
    pub fn text(&self, span: Span) -> &str {
        &self.source[span.start.min(self.source.len())..span.end.min(self.source.len())]
    }
}

/// Collects and prints compile-time diagnostics. Warnings are recorded
/// unconditionally but only printed when verbose, unless promoted to errors.
pub struct Reporter {
    source: Rc<SourceInfo>,
    verbose: bool,
    warnings_error: bool,
    diagnostics: Vec<Diagnostic>,
    error_count: usize,
}

impl Reporter {
    pub fn new(source: Rc<SourceInfo>, verbose: bool, warnings_error: bool) -> Self {
        Self {
            source,
            verbose,
            warnings_error,
            diagnostics: Vec::new(),
            error_count: 0,
        }
    }

    pub fn error(&mut self, span: Span, message: impl Into<String>) {
        let diagnostic = Diagnostic::error(message, span);
        eprint!("{}", self.render(&diagnostic));
        self.error_count += 1;
        self.diagnostics.push(diagnostic);
    }

    pub fn warning(&mut self, span: Span, message: impl Into<String>) {
        let diagnostic = if self.warnings_error {
            self.error_count += 1;
            Diagnostic::error(message, span)
        } else {
            Diagnostic::warning(message, span)
        };
        if self.verbose || self.warnings_error {
            eprint!("{}", self.render(&diagnostic));
        }
        self.diagnostics.push(diagnostic);
    }

    pub fn had_error(&self) -> bool {
        self.error_count > 0
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }

    /// Render one diagnostic: severity header, position header, the source
    /// line, and a caret underlining the token.
    pub fn render(&self, diagnostic: &Diagnostic) -> String {
        let span = diagnostic.span;
        let (color, label) = match diagnostic.severity {
            Severity::Error => (RED, "ERROR"),
            Severity::Warning => (YELLOW, "WARNING"),
        };

        let mut out = format!(
            "[line {}] {}{}:{} {}\n",
            span.line, color, label, RESET, diagnostic.message
        );
        out.push_str(&format!(
            "    --> {}:{}:{}\n",
            self.source.file_name, span.line, span.column
        ));
        if let Some(code) = self.source.line(span.line) {
            out.push_str("     |\n");
            out.push_str(&format!("{:>4} | {}\n", span.line, code));
            let pad = span.column.saturating_sub(1);
            let carets = span.length().max(1);
            out.push_str(&format!(
                "     | {}{}{}{}\n",
                " ".repeat(pad),
                color,
                "^".repeat(carets),
                RESET
            ));
        }
        out.push('\n');
        out
    }
}

/// Render a fatal runtime error with its unwound call stack.
pub fn render_runtime_error(error: &RuntimeError, source: &SourceInfo) -> String {
    let mut out = format!(
        "{}ERROR:{} [line {}] {}: {}. Stopping execution\n",
        RED, RESET, error.line, error.kind, error.message
    );
    out.push_str(&format!(
        "    --> {}:{}\n",
        source.file_name, error.line
    ));
    if let Some(code) = source.line(error.line) {
        out.push_str(&format!("{:>4} | {}\n", error.line, code));
    }

    if !error.call_stack.is_empty() {
        out.push_str("\nCall stack (most recent call last):\n");
        let full_trace = std::env::var("GARNET_FULL_STACKTRACE")
            .map(|v| v == "1")
            .unwrap_or(false);
        let frames = &error.call_stack;
        let skipped = if full_trace || frames.len() <= STACK_TRACE_LIMIT {
            0
        } else {
            frames.len() - STACK_TRACE_LIMIT
        };
        if skipped > 0 {
            out.push_str(&format!(
                "  ... {} frame(s) omitted, set GARNET_FULL_STACKTRACE=1 for the full trace ...\n",
                skipped
            ));
        }
        for frame in &frames[skipped..] {
            out.push_str(&format!(
                "  in {}, called from {} at line {}\n",
                frame.callee, frame.caller, frame.line
            ));
        }
    }
    out
}

/// Print a runtime error to stderr.
pub fn print_runtime_error(error: &RuntimeError, source: &SourceInfo) {
    eprint!("{}", render_runtime_error(error, source));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RuntimeErrorKind, StackFrame};

    #[test]
    fn test_source_info_lines() {
        let info = SourceInfo::new("test.gr", "first\nsecond\nthird");
        assert_eq!(info.line(1), Some("first"));
        assert_eq!(info.line(2), Some("second"));
        assert_eq!(info.line(3), Some("third"));
        assert_eq!(info.line(4), None);
        assert_eq!(info.line(0), None);
    }

    #[test]
    fn test_span_text() {
        let info = SourceInfo::new("test.gr", "var x = 1;");
        assert_eq!(info.text(Span::new(4, 5, 1, 5)), "x");
    }

    #[test]
    fn test_render_error_has_caret() {
        let info = SourceInfo::new("test.gr", "var x = 1;");
        let reporter = Reporter::new(info, false, false);
        let rendered = reporter.render(&Diagnostic::error("bad token", Span::new(4, 5, 1, 5)));
        assert!(rendered.contains("test.gr:1:5"));
        assert!(rendered.contains("var x = 1;"));
        assert!(rendered.contains('^'));
    }

    #[test]
    fn test_warning_promotion() {
        let info = SourceInfo::new("test.gr", "");
        let mut reporter = Reporter::new(info, false, true);
        reporter.warning(Span::default(), "shadowed");
        assert!(reporter.had_error());
    }

    #[test]
    fn test_warning_not_error_by_default() {
        let info = SourceInfo::new("test.gr", "");
        let mut reporter = Reporter::new(info, false, false);
        reporter.warning(Span::default(), "shadowed");
        assert!(!reporter.had_error());
        assert_eq!(reporter.diagnostics().len(), 1);
    }

    #[test]
    fn test_runtime_error_render() {
        let info = SourceInfo::new("test.gr", "func main():\n  var x = 1 + \"x\";\nend");
        let err = RuntimeError::new(RuntimeErrorKind::InvalidOperand, "cannot add", 2)
            .with_call_stack(vec![StackFrame {
                caller: "main".to_string(),
                callee: "main".to_string(),
                line: 1,
            }]);
        let rendered = render_runtime_error(&err, &info);
        assert!(rendered.contains("InvalidOperand"));
        assert!(rendered.contains("line 2"));
        assert!(rendered.contains("Call stack"));
    }
}
