//! Single-pass bytecode compiler.
//!
//! A recursive-descent parser that pulls tokens straight from the scanner
//! and emits opcodes and constants into the current function record. There
//! is no AST: expression structure becomes emission order. Variable
//! resolution happens here — locals become frame slot indices.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::bytecode::function::{hash_name, CompiledProgram, Constant, FunctionRecord};
use crate::bytecode::instruction::{Op, OpLine};
use crate::bytecode::vm::{native_functions, native_index};
use crate::error::{CompileError, Reporter, Severity, SourceInfo};
use crate::lexer::{Scanner, Token, TokenKind};

/// Result type for compilation.
pub type CompileResult<T> = Result<T, CompileError>;

/// Knobs shared by the compiler and the pipeline entry points.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompilerOptions {
    pub verbose: bool,
    pub warnings_error: bool,
}

/// A local variable tracked during compilation. The slot is its index in
/// the function frame, assigned in declaration order.
#[derive(Debug, Clone)]
struct Local {
    is_final: bool,
    slot: usize,
}

/// Where declarations are currently being parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Context {
    TopLevel,
    Function,
}

/// A typed patch site: the indices of the two placeholder constants
/// (constant index, op index) emitted ahead of a jump op. Patching writes
/// the function's current pool sizes into them, so no placeholder survives
/// once every emitted jump has been patched.
#[derive(Debug, Clone, Copy)]
struct JumpTarget {
    constant_slot: usize,
    op_slot: usize,
}

/// Per-loop state: where the locals array stood at loop entry (so `break`
/// can unwind it) and the break jumps awaiting the loop's exit point.
#[derive(Debug)]
struct LoopContext {
    locals_at_entry: usize,
    break_sites: Vec<JumpTarget>,
}

/// A `for` bound or step, captured at the loop header so the increment and
/// exit test can be re-emitted after the body.
#[derive(Debug, Clone, Copy)]
enum RangeBound {
    Int(i64),
    Float(f64),
    Local(usize),
}

/// The compiler: token stream in, function records out.
pub struct Compiler<'a> {
    scanner: Scanner<'a>,
    reporter: Reporter,
    previous: Token,
    current: Token,
    program: CompiledProgram,
    current_function: Option<u64>,
    locals: IndexMap<String, Local>,
    context: Context,
    loop_stack: Vec<LoopContext>,
    panic_mode: bool,
}

impl<'a> Compiler<'a> {
    /// Compile a whole program. Diagnostics are rendered through the
    /// reporter as they occur; the returned error carries them for callers
    /// that need to inspect messages.
    pub fn compile(
        source: &'a str,
        source_info: Rc<SourceInfo>,
        options: CompilerOptions,
    ) -> CompileResult<CompiledProgram> {
        let mut compiler = Compiler::new(source, source_info, options);
        while !compiler.match_token(&TokenKind::Eof) {
            compiler.declaration();
        }
        compiler.finish()
    }

    fn new(source: &'a str, source_info: Rc<SourceInfo>, options: CompilerOptions) -> Self {
        let mut compiler = Self {
            scanner: Scanner::new(source),
            reporter: Reporter::new(source_info, options.verbose, options.warnings_error),
            previous: Token::eof(0, 1, 1),
            current: Token::eof(0, 1, 1),
            program: CompiledProgram::default(),
            current_function: None,
            locals: IndexMap::new(),
            context: Context::TopLevel,
            loop_stack: Vec::new(),
            panic_mode: false,
        };
        compiler.advance();
        compiler
    }

    fn finish(self) -> CompileResult<CompiledProgram> {
        if self.reporter.had_error() {
            let errors = self
                .reporter
                .into_diagnostics()
                .into_iter()
                .filter(|d| d.severity == Severity::Error)
                .collect();
            Err(CompileError::HadErrors { errors })
        } else {
            Ok(self.program)
        }
    }

    // --- Token consumption protocol ---

    fn advance(&mut self) {
        self.previous = std::mem::replace(&mut self.current, self.scanner.scan_token());
        if let TokenKind::Error(message) = self.current.kind.clone() {
            self.error_at_current(message);
        }
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.current.kind) == std::mem::discriminant(kind)
    }

    fn match_token(&mut self, kind: &TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn consume(&mut self, kind: &TokenKind, message: &str) {
        if self.check(kind) {
            self.advance();
            return;
        }
        self.error_at_current(message);
    }

    fn consume_identifier(&mut self, message: &str) -> Option<String> {
        if let TokenKind::Identifier(name) = self.current.kind.clone() {
            self.advance();
            Some(name)
        } else {
            self.error_at_current(message);
            None
        }
    }

    // --- Error reporting ---

    fn error_at_current(&mut self, message: impl Into<String>) {
        let token = self.current.clone();
        self.error_at(&token, message);
    }

    fn error_at_previous(&mut self, message: impl Into<String>) {
        let token = self.previous.clone();
        self.error_at(&token, message);
    }

    fn error_at(&mut self, token: &Token, message: impl Into<String>) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;

        let message = message.into();
        let rendered = match &token.kind {
            TokenKind::Eof => format!("at end: {}", message),
            // Error tokens carry the scanner's own message
            TokenKind::Error(scan_message) => scan_message.clone(),
            kind => format!("at '{}': {}", kind, message),
        };
        self.reporter.error(token.span, rendered);
    }

    /// Discard tokens until a statement boundary, then resume reporting.
    fn synchronize(&mut self) {
        self.panic_mode = false;

        while !self.check(&TokenKind::Eof) {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Assert
                | TokenKind::Break
                | TokenKind::Class
                | TokenKind::Final
                | TokenKind::For
                | TokenKind::Func
                | TokenKind::If
                | TokenKind::Print
                | TokenKind::PrintLn
                | TokenKind::Return
                | TokenKind::Var
                | TokenKind::While => return,
                _ => {}
            }
            self.advance();
        }
    }

    // --- Emission helpers ---

    fn function_mut(&mut self) -> Option<&mut FunctionRecord> {
        let hash = self.current_function?;
        self.program.functions.get_mut(&hash)
    }

    fn emit_op(&mut self, op: Op, line: usize) {
        if let Some(function) = self.function_mut() {
            function.ops.push(OpLine::new(op, line));
        }
    }

    fn emit_constant(&mut self, constant: Constant) -> usize {
        match self.function_mut() {
            Some(function) => {
                function.constants.push(constant);
                function.constants.len() - 1
            }
            None => 0,
        }
    }

    fn emit_load_constant(&mut self, constant: Constant, line: usize) {
        self.emit_constant(constant);
        self.emit_op(Op::LoadConstant, line);
    }

    /// The current (constant count, op count) of the function under
    /// compilation; jump targets are expressed in these coordinates.
    fn mark(&mut self) -> (usize, usize) {
        match self.function_mut() {
            Some(function) => (function.constants.len(), function.ops.len()),
            None => (0, 0),
        }
    }

    /// Emit a forward jump with placeholder target constants, returning the
    /// patch site.
    fn emit_jump(&mut self, op: Op, line: usize) -> JumpTarget {
        let constant_slot = self.emit_constant(Constant::Int(0));
        let op_slot = self.emit_constant(Constant::Int(0));
        self.emit_op(op, line);
        JumpTarget {
            constant_slot,
            op_slot,
        }
    }

    /// Point a patch site at the current end of the function's pools.
    fn patch_jump(&mut self, target: JumpTarget) {
        if let Some(function) = self.function_mut() {
            let constant_index = function.constants.len() as i64;
            let op_index = function.ops.len() as i64;
            function.constants[target.constant_slot] = Constant::Int(constant_index);
            function.constants[target.op_slot] = Constant::Int(op_index);
        }
    }

    /// Emit a jump whose target is already known (loop tops).
    fn emit_jump_to(&mut self, op: Op, target: (usize, usize), line: usize) {
        self.emit_constant(Constant::Int(target.0 as i64));
        self.emit_constant(Constant::Int(target.1 as i64));
        self.emit_op(op, line);
    }

    /// Emit one `PopLocal` per local declared after the snapshot and drop
    /// them from the slot table.
    fn pop_block_locals(&mut self, snapshot: usize, line: usize) {
        while self.locals.len() > snapshot {
            self.emit_op(Op::PopLocal, line);
            self.locals.pop();
        }
    }

    // --- Declarations ---

    fn declaration(&mut self) {
        if self.match_token(&TokenKind::Class) {
            self.class_declaration();
        } else if self.match_token(&TokenKind::Func) {
            self.func_declaration();
        } else if self.match_token(&TokenKind::Var) {
            self.var_declaration();
        } else if self.match_token(&TokenKind::Final) {
            self.final_declaration();
        } else if self.match_token(&TokenKind::Break) {
            self.break_declaration();
        } else if self.match_token(&TokenKind::Assert) {
            self.assert_declaration();
        } else {
            self.statement();
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    fn class_declaration(&mut self) {
        if self.consume_identifier("Expected class name").is_some() {
            self.error_at_previous("Classes are not yet supported");
        }
    }

    fn func_declaration(&mut self) {
        if self.context == Context::Function {
            self.error_at_previous("Nested functions are not permitted");
            return;
        }
        self.context = Context::Function;

        let Some(name) = self.consume_identifier("Expected function name") else {
            self.abandon_function();
            return;
        };
        let declaration_line = self.previous.span.line;

        self.consume(&TokenKind::LeftParen, "Expected '(' after function name");

        let mut parameters: Vec<String> = Vec::new();
        loop {
            let is_final = self.match_token(&TokenKind::Final);
            if is_final || self.check(&TokenKind::Identifier(String::new())) {
                let message = if is_final {
                    "Expected identifier after `final`"
                } else {
                    "Expected parameter name"
                };
                let Some(parameter) = self.consume_identifier(message) else {
                    self.abandon_function();
                    return;
                };
                if parameters.contains(&parameter) {
                    self.error_at_previous("Function parameters with the same name already defined");
                    self.abandon_function();
                    return;
                }
                self.locals.insert(
                    parameter.clone(),
                    Local {
                        is_final,
                        slot: self.locals.len(),
                    },
                );
                parameters.push(parameter);
            } else if self.match_token(&TokenKind::RightParen) {
                break;
            } else if !self.match_token(&TokenKind::Comma) {
                self.error_at_current("Expected ',' after function parameter");
                self.abandon_function();
                return;
            }
        }

        self.consume(&TokenKind::Colon, "Expected ':' after function signature");

        let hash = hash_name(&name);
        if self.program.functions.contains_key(&hash) {
            self.error_at_previous("Duplicate function definitions");
            self.abandon_function();
            return;
        }
        self.program.functions.insert(
            hash,
            FunctionRecord::new(name, parameters.len(), declaration_line),
        );
        self.current_function = Some(hash);

        while !self.match_token(&TokenKind::End) {
            if self.check(&TokenKind::Eof) {
                self.error_at_current("Expected `end` after function");
                self.abandon_function();
                return;
            }
            self.declaration();
        }

        // Every path through a function must end in a Return; bodies whose
        // last statement already returns just carry an unreachable epilogue.
        let end_line = self.previous.span.line;
        self.emit_load_constant(Constant::Null, end_line);
        self.emit_op(Op::Return, end_line);

        self.abandon_function();
    }

    /// Reset per-function compilation state. Functions only appear at top
    /// level, so this also restores the top-level context.
    fn abandon_function(&mut self) {
        self.locals.clear();
        self.current_function = None;
        self.context = Context::TopLevel;
        self.loop_stack.clear();
    }

    fn var_declaration(&mut self) {
        if self.context == Context::TopLevel {
            self.error_at_previous("Only functions and classes are allowed at top level");
            return;
        }

        let Some(name) = self.consume_identifier("Expected identifier after `var`") else {
            return;
        };
        if self.locals.contains_key(&name) {
            self.error_at_previous("A local variable with the same name already exists");
            return;
        }

        let line = self.previous.span.line;
        let slot = self.locals.len();
        self.locals.insert(
            name,
            Local {
                is_final: false,
                slot,
            },
        );
        self.emit_op(Op::DeclareLocal, line);

        if self.match_token(&TokenKind::Equal) {
            self.expression(false);
            let line = self.previous.span.line;
            self.emit_constant(Constant::Int(slot as i64));
            self.emit_op(Op::AssignLocal, line);
            self.emit_op(Op::Pop, line);
        }
        self.consume(&TokenKind::Semicolon, "Expected ';' after `var` declaration");
    }

    fn final_declaration(&mut self) {
        if self.context == Context::TopLevel {
            self.error_at_previous("Only functions and classes are allowed at top level");
            return;
        }

        let Some(name) = self.consume_identifier("Expected identifier after `final`") else {
            return;
        };
        if self.locals.contains_key(&name) {
            self.error_at_previous("A local variable with the same name already exists");
            return;
        }

        let line = self.previous.span.line;
        let slot = self.locals.len();
        self.locals.insert(
            name,
            Local {
                is_final: true,
                slot,
            },
        );
        self.emit_op(Op::DeclareLocal, line);

        self.consume(&TokenKind::Equal, "Must assign to `final` upon declaration");
        self.expression(false);
        let line = self.previous.span.line;
        self.emit_constant(Constant::Int(slot as i64));
        self.emit_op(Op::AssignLocal, line);
        self.emit_op(Op::Pop, line);

        self.consume(
            &TokenKind::Semicolon,
            "Expected ';' after `final` declaration",
        );
    }

    fn break_declaration(&mut self) {
        if self.context == Context::TopLevel {
            self.error_at_previous("Only functions and classes are allowed at top level");
            return;
        }
        let line = self.previous.span.line;
        let Some(locals_at_entry) = self.loop_stack.last().map(|c| c.locals_at_entry) else {
            self.error_at_previous("`break` is only allowed inside loops");
            return;
        };

        // Locals declared since loop entry are still live here; unwind them
        // before jumping out so the locals array stays balanced.
        let live = self.locals.len() - locals_at_entry;
        for _ in 0..live {
            self.emit_op(Op::PopLocal, line);
        }
        let site = self.emit_jump(Op::Jump, line);
        if let Some(context) = self.loop_stack.last_mut() {
            context.break_sites.push(site);
        }
        self.consume(&TokenKind::Semicolon, "Expected ';' after `break`");
    }

    fn assert_declaration(&mut self) {
        if self.context == Context::TopLevel {
            self.error_at_previous("Only functions and classes are allowed at top level");
            return;
        }
        let line = self.previous.span.line;
        self.consume(&TokenKind::LeftParen, "Expected '(' after 'assert'");
        self.expression(false);

        if self.match_token(&TokenKind::Comma) {
            if let TokenKind::StringLiteral(message) = self.current.kind.clone() {
                self.advance();
                self.emit_constant(Constant::String(message));
                self.emit_op(Op::AssertWithMessage, line);
            } else {
                self.error_at_current("Expected string literal as assert message");
                return;
            }
        } else {
            self.emit_op(Op::Assert, line);
        }

        self.consume(&TokenKind::RightParen, "Expected ')' after assert");
        self.consume(&TokenKind::Semicolon, "Expected ';' after assert");
    }

    // --- Statements ---

    fn statement(&mut self) {
        if self.context == Context::TopLevel {
            self.error_at_current("Only functions and classes are allowed at top level");
            self.advance();
            return;
        }

        if self.match_token(&TokenKind::For) {
            self.for_statement();
        } else if self.match_token(&TokenKind::If) {
            self.if_statement();
        } else if self.match_token(&TokenKind::Print) {
            self.print_statement(Op::Print, Op::PrintTab);
        } else if self.match_token(&TokenKind::PrintLn) {
            self.print_statement(Op::PrintLn, Op::PrintEmptyLine);
        } else if self.match_token(&TokenKind::Return) {
            self.return_statement();
        } else if self.match_token(&TokenKind::While) {
            self.while_statement();
        } else {
            self.expression_statement();
        }
    }

    fn expression_statement(&mut self) {
        let ops_before = self.mark().1;
        self.expression(true);

        // A statement that neither calls nor assigns computes a value
        // nobody will see.
        let effectful = match self.function_mut() {
            Some(function) => function.ops[ops_before.min(function.ops.len())..]
                .iter()
                .any(|o| matches!(o.op, Op::Call | Op::NativeCall | Op::AssignLocal)),
            None => true,
        };
        if !effectful && !self.panic_mode {
            let span = self.previous.span;
            self.reporter.warning(span, "Expression result is unused");
        }

        // Every expression leaves exactly one value; statement position
        // does not consume it.
        let line = self.previous.span.line;
        self.emit_op(Op::Pop, line);
        self.consume(&TokenKind::Semicolon, "Expected ';' after expression");
    }

    fn print_statement(&mut self, print_op: Op, empty_op: Op) {
        let line = self.previous.span.line;
        self.consume(&TokenKind::LeftParen, "Expected '(' after print statement");
        if self.match_token(&TokenKind::RightParen) {
            self.emit_op(empty_op, line);
        } else {
            self.expression(false);
            self.emit_op(print_op, line);
            self.emit_op(Op::Pop, line);
            self.consume(&TokenKind::RightParen, "Expected ')' after expression");
        }
        self.consume(&TokenKind::Semicolon, "Expected ';' after statement");
    }

    fn return_statement(&mut self) {
        if self.context != Context::Function {
            self.error_at_previous("`return` only allowed inside functions");
            return;
        }
        if self.current_function == Some(hash_name("main")) {
            self.error_at_previous("Cannot return from main function");
            return;
        }

        let line = self.previous.span.line;
        if self.match_token(&TokenKind::Semicolon) {
            self.emit_load_constant(Constant::Null, line);
            self.emit_op(Op::Return, line);
            return;
        }

        self.expression(false);
        self.emit_op(Op::Return, line);
        self.consume(&TokenKind::Semicolon, "Expected ';' after expression");
    }

    fn if_statement(&mut self) {
        let line = self.previous.span.line;
        self.expression(false);
        self.consume(&TokenKind::Colon, "Expected ':' after condition");

        let exit = self.emit_jump(Op::JumpIfFalse, line);
        let block_locals = self.locals.len();

        loop {
            if self.check(&TokenKind::Eof) {
                self.error_at_current("Unterminated `if` statement");
                return;
            }
            if self.match_token(&TokenKind::End) {
                let end_line = self.previous.span.line;
                self.pop_block_locals(block_locals, end_line);
                self.patch_jump(exit);
                return;
            }
            if self.match_token(&TokenKind::Else) {
                let else_line = self.previous.span.line;
                self.pop_block_locals(block_locals, else_line);
                let done = self.emit_jump(Op::Jump, else_line);
                self.patch_jump(exit);

                if self.match_token(&TokenKind::If) {
                    // `else if` shares the chain's single `end`
                    self.if_statement();
                } else {
                    self.consume(&TokenKind::Colon, "Expected ':' after `else`");
                    let else_locals = self.locals.len();
                    while !self.match_token(&TokenKind::End) {
                        if self.check(&TokenKind::Eof) {
                            self.error_at_current("Unterminated `else` block");
                            return;
                        }
                        self.declaration();
                    }
                    let end_line = self.previous.span.line;
                    self.pop_block_locals(else_locals, end_line);
                }

                self.patch_jump(done);
                return;
            }
            self.declaration();
        }
    }

    fn while_statement(&mut self) {
        let line = self.previous.span.line;
        let loop_top = self.mark();

        self.expression(false);
        self.consume(&TokenKind::Colon, "Expected ':' after condition");
        let exit = self.emit_jump(Op::JumpIfFalse, line);

        self.loop_stack.push(LoopContext {
            locals_at_entry: self.locals.len(),
            break_sites: Vec::new(),
        });
        let block_locals = self.locals.len();

        while !self.match_token(&TokenKind::End) {
            if self.check(&TokenKind::Eof) {
                self.error_at_current("Unterminated `while` statement");
                self.loop_stack.pop();
                return;
            }
            self.declaration();
        }

        let end_line = self.previous.span.line;
        self.pop_block_locals(block_locals, end_line);
        self.emit_jump_to(Op::Jump, loop_top, end_line);
        self.patch_jump(exit);

        if let Some(context) = self.loop_stack.pop() {
            for site in context.break_sites {
                self.patch_jump(site);
            }
        }
    }

    fn for_statement(&mut self) {
        let line = self.previous.span.line;
        let Some(name) = self.consume_identifier("Expected iterator name after `for`") else {
            return;
        };
        let iterator_span = self.previous.span;

        let existing = self.locals.get(&name).map(|l| (l.is_final, l.slot));
        let (slot, fresh) = match existing {
            Some((true, _)) => {
                self.error_at_previous(format!("Cannot reassign to final '{}'", name));
                return;
            }
            Some((false, slot)) => {
                self.reporter.warning(
                    iterator_span,
                    format!("For-loop iterator '{}' shadows an existing local", name),
                );
                (slot, false)
            }
            None => {
                let slot = self.locals.len();
                self.locals.insert(
                    name,
                    Local {
                        is_final: false,
                        slot,
                    },
                );
                self.emit_op(Op::DeclareLocal, line);
                (slot, true)
            }
        };

        self.consume(&TokenKind::In, "Expected `in` after for-loop iterator");
        let Some(low) = self.range_bound() else { return };
        self.consume(&TokenKind::DotDot, "Expected '..' between range bounds");
        let Some(high) = self.range_bound() else { return };
        let step = if self.match_token(&TokenKind::By) {
            match self.range_bound() {
                Some(bound) => bound,
                None => return,
            }
        } else {
            RangeBound::Int(1)
        };
        self.consume(&TokenKind::Colon, "Expected ':' before for-loop body");

        // iterator = low
        self.emit_bound(low, line);
        self.emit_constant(Constant::Int(slot as i64));
        self.emit_op(Op::AssignLocal, line);
        self.emit_op(Op::Pop, line);

        let loop_top = self.mark();
        self.loop_stack.push(LoopContext {
            locals_at_entry: self.locals.len(),
            break_sites: Vec::new(),
        });
        let block_locals = self.locals.len();

        while !self.match_token(&TokenKind::End) {
            if self.check(&TokenKind::Eof) {
                self.error_at_current("Unterminated `for` statement");
                self.loop_stack.pop();
                return;
            }
            self.declaration();
        }

        let end_line = self.previous.span.line;
        self.pop_block_locals(block_locals, end_line);

        // iterator += step
        self.emit_constant(Constant::Int(slot as i64));
        self.emit_op(Op::LoadLocal, end_line);
        self.emit_bound(step, end_line);
        self.emit_op(Op::Add, end_line);
        self.emit_constant(Constant::Int(slot as i64));
        self.emit_op(Op::AssignLocal, end_line);
        self.emit_op(Op::Pop, end_line);

        // loop while iterator < high
        self.emit_constant(Constant::Int(slot as i64));
        self.emit_op(Op::LoadLocal, end_line);
        self.emit_bound(high, end_line);
        self.emit_op(Op::GreaterEqual, end_line);
        self.emit_jump_to(Op::JumpIfFalse, loop_top, end_line);

        if let Some(context) = self.loop_stack.pop() {
            for site in context.break_sites {
                self.patch_jump(site);
            }
        }
        if fresh {
            self.emit_op(Op::PopLocal, end_line);
            self.locals.pop();
        }
    }

    /// A `for` bound: an optionally negated numeric literal or a local.
    fn range_bound(&mut self) -> Option<RangeBound> {
        if self.match_token(&TokenKind::Minus) {
            return match self.current.kind.clone() {
                TokenKind::IntLiteral(n) => {
                    self.advance();
                    Some(RangeBound::Int(-n))
                }
                TokenKind::FloatLiteral(n) => {
                    self.advance();
                    Some(RangeBound::Float(-n))
                }
                _ => {
                    self.error_at_current("Expected number after '-' in range");
                    None
                }
            };
        }
        match self.current.kind.clone() {
            TokenKind::IntLiteral(n) => {
                self.advance();
                Some(RangeBound::Int(n))
            }
            TokenKind::FloatLiteral(n) => {
                self.advance();
                Some(RangeBound::Float(n))
            }
            TokenKind::Identifier(name) => {
                self.advance();
                match self.locals.get(&name) {
                    Some(local) => Some(RangeBound::Local(local.slot)),
                    None => {
                        self.error_at_previous(format!(
                            "Cannot find variable '{}' in this scope.",
                            name
                        ));
                        None
                    }
                }
            }
            _ => {
                self.error_at_current("Expected number or variable as range bound");
                None
            }
        }
    }

    fn emit_bound(&mut self, bound: RangeBound, line: usize) {
        match bound {
            RangeBound::Int(n) => self.emit_load_constant(Constant::Int(n), line),
            RangeBound::Float(n) => self.emit_load_constant(Constant::Float(n), line),
            RangeBound::Local(slot) => {
                self.emit_constant(Constant::Int(slot as i64));
                self.emit_op(Op::LoadLocal, line);
            }
        }
    }

    // --- Expressions ---

    fn is_operator_start(kind: &TokenKind) -> bool {
        matches!(
            kind,
            TokenKind::Colon
                | TokenKind::Semicolon
                | TokenKind::RightParen
                | TokenKind::Comma
                | TokenKind::Dot
                | TokenKind::DotDot
                | TokenKind::Plus
                | TokenKind::Slash
                | TokenKind::Star
                | TokenKind::StarStar
                | TokenKind::Mod
                | TokenKind::BangEqual
                | TokenKind::Equal
                | TokenKind::EqualEqual
                | TokenKind::LessThan
                | TokenKind::GreaterThan
                | TokenKind::LessEqual
                | TokenKind::GreaterEqual
        )
    }

    fn keyword_name(kind: &TokenKind) -> Option<&'static str> {
        match kind {
            TokenKind::And => Some("and"),
            TokenKind::Assert => Some("assert"),
            TokenKind::Break => Some("break"),
            TokenKind::By => Some("by"),
            TokenKind::Class => Some("class"),
            TokenKind::Else => Some("else"),
            TokenKind::End => Some("end"),
            TokenKind::Final => Some("final"),
            TokenKind::For => Some("for"),
            TokenKind::Func => Some("func"),
            TokenKind::If => Some("if"),
            TokenKind::In => Some("in"),
            TokenKind::Or => Some("or"),
            TokenKind::Print => Some("print"),
            TokenKind::PrintLn => Some("println"),
            TokenKind::Return => Some("return"),
            TokenKind::Var => Some("var"),
            TokenKind::While => Some("while"),
            _ => None,
        }
    }

    fn expression(&mut self, can_assign: bool) {
        if Self::is_operator_start(&self.current.kind) {
            self.error_at_current("Expected identifier or literal at start of expression");
            self.advance();
            return;
        }
        if let Some(keyword) = Self::keyword_name(&self.current.kind) {
            self.error_at_current(format!(
                "'{}' is a keyword and not valid in this context",
                keyword
            ));
            self.advance();
            return;
        }

        if self.check(&TokenKind::Identifier(String::new())) {
            self.call(can_assign);
            if self.check(&TokenKind::Equal) {
                let Some(name) = self.previous.identifier().map(str::to_string) else {
                    self.error_at_current("Only identifiers can be assigned to");
                    return;
                };
                let Some(local) = self.locals.get(&name).cloned() else {
                    // call() has already reported the unknown variable
                    return;
                };
                if local.is_final {
                    self.error_at_previous(format!("Cannot reassign to final '{}'", name));
                    return;
                }

                self.advance(); // consume the equals
                if !can_assign {
                    self.error_at_current("Assignment is not valid in the current context");
                    return;
                }

                self.expression(false); // disallow x = y = z

                let line = self.previous.span.line;
                self.emit_constant(Constant::Int(local.slot as i64));
                self.emit_op(Op::AssignLocal, line);
            } else {
                // The leftmost operand is already compiled; continue the
                // precedence climb one level down from whatever comes next.
                loop {
                    match self.current.kind {
                        TokenKind::And => self.and_expr(false, true),
                        TokenKind::Or => self.or_expr(false, true),
                        TokenKind::EqualEqual | TokenKind::BangEqual => self.equality(false, true),
                        TokenKind::GreaterThan
                        | TokenKind::GreaterEqual
                        | TokenKind::LessThan
                        | TokenKind::LessEqual => self.comparison(false, true),
                        TokenKind::Plus | TokenKind::Minus => self.term(false, true),
                        TokenKind::Star
                        | TokenKind::StarStar
                        | TokenKind::Slash
                        | TokenKind::Mod => self.factor(false, true),
                        TokenKind::Semicolon
                        | TokenKind::RightParen
                        | TokenKind::Comma
                        | TokenKind::Colon => break,
                        _ => {
                            self.error_at_current("Invalid token found in expression");
                            self.advance();
                            return;
                        }
                    }
                }
            }
        } else {
            self.or_expr(can_assign, false);
        }
    }

    fn or_expr(&mut self, can_assign: bool, skip_first: bool) {
        if !skip_first {
            self.and_expr(can_assign, false);
        }
        while self.match_token(&TokenKind::Or) {
            let line = self.previous.span.line;
            self.and_expr(can_assign, false);
            self.emit_op(Op::Or, line);
        }
    }

    fn and_expr(&mut self, can_assign: bool, skip_first: bool) {
        if !skip_first {
            self.equality(can_assign, false);
        }
        while self.match_token(&TokenKind::And) {
            let line = self.previous.span.line;
            self.equality(can_assign, false);
            self.emit_op(Op::And, line);
        }
    }

    fn equality(&mut self, can_assign: bool, skip_first: bool) {
        if !skip_first {
            self.comparison(can_assign, false);
        }
        if self.match_token(&TokenKind::EqualEqual) {
            let line = self.previous.span.line;
            self.comparison(can_assign, false);
            self.emit_op(Op::Equal, line);
        } else if self.match_token(&TokenKind::BangEqual) {
            let line = self.previous.span.line;
            self.comparison(can_assign, false);
            self.emit_op(Op::NotEqual, line);
        }
    }

    fn comparison(&mut self, can_assign: bool, skip_first: bool) {
        if !skip_first {
            self.term(can_assign, false);
        }
        if self.match_token(&TokenKind::GreaterThan) {
            let line = self.previous.span.line;
            self.term(can_assign, false);
            self.emit_op(Op::Greater, line);
        } else if self.match_token(&TokenKind::GreaterEqual) {
            let line = self.previous.span.line;
            self.term(can_assign, false);
            self.emit_op(Op::GreaterEqual, line);
        } else if self.match_token(&TokenKind::LessThan) {
            let line = self.previous.span.line;
            self.term(can_assign, false);
            self.emit_op(Op::Less, line);
        } else if self.match_token(&TokenKind::LessEqual) {
            let line = self.previous.span.line;
            self.term(can_assign, false);
            self.emit_op(Op::LessEqual, line);
        }
    }

    fn term(&mut self, can_assign: bool, skip_first: bool) {
        if !skip_first {
            self.factor(can_assign, false);
        }
        loop {
            if self.match_token(&TokenKind::Minus) {
                let line = self.previous.span.line;
                self.factor(can_assign, false);
                self.emit_op(Op::Subtract, line);
            } else if self.match_token(&TokenKind::Plus) {
                let line = self.previous.span.line;
                self.factor(can_assign, false);
                self.emit_op(Op::Add, line);
            } else {
                break;
            }
        }
    }

    fn factor(&mut self, can_assign: bool, skip_first: bool) {
        if !skip_first {
            self.unary(can_assign);
        }
        loop {
            if self.match_token(&TokenKind::StarStar) {
                let line = self.previous.span.line;
                self.unary(can_assign);
                self.emit_op(Op::Pow, line);
            } else if self.match_token(&TokenKind::Star) {
                let line = self.previous.span.line;
                self.unary(can_assign);
                self.emit_op(Op::Multiply, line);
            } else if self.match_token(&TokenKind::Slash) {
                let line = self.previous.span.line;
                self.unary(can_assign);
                self.emit_op(Op::Divide, line);
            } else if self.match_token(&TokenKind::Mod) {
                let line = self.previous.span.line;
                self.unary(can_assign);
                self.emit_op(Op::Modulo, line);
            } else {
                break;
            }
        }
    }

    fn unary(&mut self, can_assign: bool) {
        if self.match_token(&TokenKind::Bang) {
            let line = self.previous.span.line;
            self.unary(can_assign);
            self.emit_op(Op::Not, line);
        } else if self.match_token(&TokenKind::Minus) {
            let line = self.previous.span.line;
            self.unary(can_assign);
            self.emit_op(Op::Negate, line);
        } else {
            self.call(can_assign);
        }
    }

    fn call(&mut self, can_assign: bool) {
        self.primary(can_assign);
        let prev = self.previous.clone();

        if prev.identifier().is_none() && self.check(&TokenKind::LeftParen) {
            self.error_at_current("'(' only allowed after functions and classes");
            return;
        }

        let Some(name) = prev.identifier().map(str::to_string) else {
            return;
        };

        if self.match_token(&TokenKind::LeftParen) {
            let mut arg_count: i64 = 0;
            if !self.match_token(&TokenKind::RightParen) {
                loop {
                    self.expression(false);
                    arg_count += 1;
                    if self.match_token(&TokenKind::RightParen) {
                        break;
                    }
                    self.consume(&TokenKind::Comma, "Expected ',' after function call argument");
                    if self.panic_mode {
                        return;
                    }
                }
            }

            let line = self.previous.span.line;
            if let Some(index) = native_index(&name) {
                let native = &native_functions()[index];
                if arg_count as usize != native.arity {
                    self.error_at_previous(format!(
                        "Native function '{}' takes {} argument(s) but {} were given",
                        name, native.arity, arg_count
                    ));
                    return;
                }
                self.emit_constant(Constant::Int(index as i64));
                self.emit_constant(Constant::Int(arg_count));
                self.emit_op(Op::NativeCall, line);
            } else {
                // Calls may reference functions declared later in the file;
                // existence is checked when the VM resolves the hash.
                let hash = hash_name(&name);
                self.program.call_names.insert(hash, name);
                self.emit_constant(Constant::Int(hash as i64));
                self.emit_constant(Constant::Int(arg_count));
                self.emit_op(Op::Call, line);
            }
        } else if self.match_token(&TokenKind::Dot) {
            // reserved for member access
            self.error_at_current("Member access is not yet supported");
        } else {
            let Some(local) = self.locals.get(&name).cloned() else {
                self.error_at_previous(format!("Cannot find variable '{}' in this scope.", name));
                return;
            };
            if !self.check(&TokenKind::Equal) {
                self.emit_constant(Constant::Int(local.slot as i64));
                self.emit_op(Op::LoadLocal, prev.span.line);
            }
        }
    }

    fn primary(&mut self, can_assign: bool) {
        let line = self.current.span.line;
        match self.current.kind.clone() {
            TokenKind::True => {
                self.advance();
                self.emit_load_constant(Constant::Bool(true), line);
            }
            TokenKind::False => {
                self.advance();
                self.emit_load_constant(Constant::Bool(false), line);
            }
            TokenKind::Null => {
                self.advance();
                self.emit_load_constant(Constant::Null, line);
            }
            TokenKind::IntLiteral(n) => {
                self.advance();
                self.emit_load_constant(Constant::Int(n), line);
            }
            TokenKind::FloatLiteral(n) => {
                self.advance();
                self.emit_load_constant(Constant::Float(n), line);
            }
            TokenKind::StringLiteral(s) => {
                self.advance();
                self.emit_load_constant(Constant::String(s), line);
            }
            TokenKind::CharLiteral(c) => {
                self.advance();
                self.emit_load_constant(Constant::Char(c), line);
            }
            TokenKind::Identifier(_) => {
                // call() decides between call, member access, and local load
                self.advance();
            }
            TokenKind::This => {
                self.advance();
                self.error_at_previous("`this` is not supported outside classes");
            }
            TokenKind::LeftParen => {
                self.advance();
                self.expression(can_assign);
                self.consume(&TokenKind::RightParen, "Expected ')'");
            }
            TokenKind::InstanceOf => {
                self.advance();
                self.instance_of();
            }
            kind if kind.is_type_ident() => {
                self.cast();
            }
            _ => {
                self.error_at_current("Expected expression");
                self.advance();
            }
        }
    }

    fn instance_of(&mut self) {
        self.consume(&TokenKind::LeftParen, "Expected '(' after 'instanceof'");
        self.expression(false);
        self.consume(&TokenKind::Comma, "Expected ',' after expression");

        let tag = match self.current.kind {
            TokenKind::BoolIdent => 0,
            TokenKind::CharIdent => 1,
            TokenKind::FloatIdent => 2,
            TokenKind::IntIdent => 3,
            TokenKind::Null => 4,
            TokenKind::StringIdent => 5,
            _ => {
                self.error_at_current("Expected type as second argument for `instanceof`");
                return;
            }
        };
        let line = self.current.span.line;
        self.emit_constant(Constant::Int(tag));
        self.emit_op(Op::CheckType, line);

        self.advance(); // consume the type ident
        self.consume(&TokenKind::RightParen, "Expected ')'");
    }

    fn cast(&mut self) {
        let op = match self.current.kind {
            TokenKind::IntIdent => Op::CastAsInt,
            TokenKind::FloatIdent => Op::CastAsFloat,
            TokenKind::BoolIdent => Op::CastAsBool,
            TokenKind::StringIdent => Op::CastAsString,
            TokenKind::CharIdent => Op::CastAsChar,
            _ => return,
        };
        self.advance();
        self.consume(&TokenKind::LeftParen, "Expected '(' after type identifier");
        self.expression(false);
        let line = self.previous.span.line;
        self.emit_op(op, line);
        self.consume(&TokenKind::RightParen, "Expected ')' after expression");
    }
}
