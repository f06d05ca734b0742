//! Stack-based virtual machine for executing linked bytecode.
//!
//! A synchronous fetch-decode-execute loop over the flat program image.
//! Operands come from the value stack and from the constant pool through a
//! monotonic cursor; jumps reset both cursors to offsets relative to the
//! active function's pools. Return addresses live on a dedicated frame
//! stack rather than on the operand stack.

use std::cmp::Ordering;
use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::bytecode::function::{Constant, ProgramImage};
use crate::bytecode::instruction::Op;
use crate::error::{RuntimeError, RuntimeErrorKind, StackFrame};
use crate::value::Value;

/// Result type for VM operations.
pub type VMResult<T> = Result<T, RuntimeError>;

/// A host function callable through `NativeCall`: fixed arity, arguments
/// popped into a contiguous slice, errors surfaced as messages.
pub struct NativeFunction {
    pub name: &'static str,
    pub arity: usize,
    pub function: fn(&[Value]) -> Result<Value, String>,
}

static NATIVE_FUNCTIONS: &[NativeFunction] = &[
    NativeFunction {
        name: "__native_sqrt_int",
        arity: 1,
        function: native_sqrt_int,
    },
    NativeFunction {
        name: "__native_sqrt_float",
        arity: 1,
        function: native_sqrt_float,
    },
    NativeFunction {
        name: "__native_time_s",
        arity: 0,
        function: native_time_s,
    },
    NativeFunction {
        name: "__native_time_ms",
        arity: 0,
        function: native_time_ms,
    },
    NativeFunction {
        name: "__native_time_ns",
        arity: 0,
        function: native_time_ns,
    },
];

/// The host function table, registered before compilation so the compiler
/// can resolve names to indices.
pub fn native_functions() -> &'static [NativeFunction] {
    NATIVE_FUNCTIONS
}

/// Index of a native function by name.
pub fn native_index(name: &str) -> Option<usize> {
    NATIVE_FUNCTIONS.iter().position(|n| n.name == name)
}

fn native_sqrt_int(args: &[Value]) -> Result<Value, String> {
    match args {
        [Value::Int(n)] => Ok(Value::Float((*n as f64).sqrt())),
        _ => Err("__native_sqrt_int expects an Int".to_string()),
    }
}

fn native_sqrt_float(args: &[Value]) -> Result<Value, String> {
    match args {
        [Value::Float(n)] => Ok(Value::Float(n.sqrt())),
        _ => Err("__native_sqrt_float expects a Float".to_string()),
    }
}

fn epoch_duration() -> Result<std::time::Duration, String> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| e.to_string())
}

fn native_time_s(_args: &[Value]) -> Result<Value, String> {
    Ok(Value::Int(epoch_duration()?.as_secs() as i64))
}

fn native_time_ms(_args: &[Value]) -> Result<Value, String> {
    Ok(Value::Int(epoch_duration()?.as_millis() as i64))
}

fn native_time_ns(_args: &[Value]) -> Result<Value, String> {
    Ok(Value::Int(epoch_duration()?.as_nanos() as i64))
}

/// A return address: where to resume in the caller once the callee's
/// `Return` executes.
#[derive(Debug, Clone, Copy)]
struct ReturnFrame {
    op_return: usize,
    constant_return: usize,
    op_offset: usize,
    constant_offset: usize,
    function: u64,
}

/// One call-site record kept for diagnostics only.
#[derive(Debug, Clone, Copy)]
struct CallSite {
    caller: u64,
    callee: u64,
    line: usize,
}

/// The virtual machine.
pub struct VM {
    image: ProgramImage,
    stack: Vec<Value>,
    locals: Vec<Value>,
    locals_offsets: Vec<usize>,
    frames: Vec<ReturnFrame>,
    call_stack: Vec<CallSite>,
    op_current: usize,
    constant_current: usize,
    op_offset: usize,
    constant_offset: usize,
    current_function: u64,
}

impl VM {
    pub fn new(image: ProgramImage) -> Self {
        let main_hash = image.main_hash;
        Self {
            image,
            stack: Vec::new(),
            locals: Vec::new(),
            locals_offsets: Vec::new(),
            frames: Vec::new(),
            call_stack: Vec::new(),
            op_current: 0,
            constant_current: 0,
            op_offset: 0,
            constant_offset: 0,
            current_function: main_hash,
        }
    }

    /// Execute the program starting at `main`.
    pub fn run(&mut self) -> VMResult<()> {
        let main_hash = self.image.main_hash;
        let Some(main) = self.image.functions.get(&main_hash) else {
            return Err(RuntimeError::new(
                RuntimeErrorKind::FunctionNotFound,
                "Cannot find function 'main'",
                0,
            ));
        };

        self.stack.clear();
        self.locals.clear();
        self.frames.clear();
        self.call_stack.clear();
        self.op_current = main.op_start;
        self.op_offset = main.op_start;
        self.constant_current = main.constant_start;
        self.constant_offset = main.constant_start;
        self.locals_offsets = vec![0];
        self.current_function = main_hash;

        self.execute()
    }

    /// Main fetch-decode-execute loop.
    fn execute(&mut self) -> VMResult<()> {
        loop {
            let Some(op_line) = self.image.ops.get(self.op_current).copied() else {
                return Ok(());
            };
            self.op_current += 1;
            let line = op_line.line;

            match op_line.op {
                Op::LoadConstant => {
                    let constant = self.read_constant(line)?;
                    self.stack.push(constant.to_value());
                }

                Op::Pop => {
                    self.pop(line)?;
                }

                Op::DeclareLocal => self.locals.push(Value::Null),

                Op::PopLocal => {
                    self.locals.pop();
                }

                Op::LoadLocal => {
                    let slot = self.read_slot(line)?;
                    let index = self.base() + slot;
                    let value = match self.locals.get(index) {
                        Some(value) => value.clone(),
                        None => {
                            return Err(self.error(
                                RuntimeErrorKind::InvalidOperand,
                                "local slot out of range",
                                line,
                            ))
                        }
                    };
                    self.stack.push(value);
                }

                Op::AssignLocal => {
                    let slot = self.read_slot(line)?;
                    let value = self.peek(line)?.clone();
                    let index = self.base() + slot;
                    if index >= self.locals.len() {
                        return Err(self.error(
                            RuntimeErrorKind::InvalidOperand,
                            "local slot out of range",
                            line,
                        ));
                    }
                    self.locals[index] = value;
                }

                Op::Add => {
                    let (a, b) = self.pop_two(line)?;
                    let value = match (&a, &b) {
                        (Value::Int(x), Value::Int(y)) => Value::Int(x.wrapping_add(*y)),
                        (Value::Int(x), Value::Float(y)) => Value::Float(*x as f64 + y),
                        (Value::Float(x), Value::Int(y)) => Value::Float(x + *y as f64),
                        (Value::Float(x), Value::Float(y)) => Value::Float(x + y),
                        (Value::Char(x), Value::Char(y)) => Value::string(format!("{}{}", x, y)),
                        (Value::Char(x), Value::String(y)) => Value::string(format!("{}{}", x, y)),
                        (Value::String(x), _) => Value::string(format!("{}{}", x, b)),
                        _ => return Err(self.invalid_operands("add", &a, &b, line)),
                    };
                    self.stack.push(value);
                }

                Op::Subtract => {
                    let (a, b) = self.pop_two(line)?;
                    let value = match (&a, &b) {
                        (Value::Int(x), Value::Int(y)) => Value::Int(x.wrapping_sub(*y)),
                        (Value::Int(x), Value::Float(y)) => Value::Float(*x as f64 - y),
                        (Value::Float(x), Value::Int(y)) => Value::Float(x - *y as f64),
                        (Value::Float(x), Value::Float(y)) => Value::Float(x - y),
                        _ => return Err(self.invalid_operands("subtract", &a, &b, line)),
                    };
                    self.stack.push(value);
                }

                Op::Multiply => {
                    let (a, b) = self.pop_two(line)?;
                    let value = match (&a, &b) {
                        (Value::Int(x), Value::Int(y)) => Value::Int(x.wrapping_mul(*y)),
                        (Value::Int(x), Value::Float(y)) => Value::Float(*x as f64 * y),
                        (Value::Float(x), Value::Int(y)) => Value::Float(x * *y as f64),
                        (Value::Float(x), Value::Float(y)) => Value::Float(x * y),
                        (Value::String(x), Value::Int(y)) => {
                            Value::string(x.repeat((*y).max(0) as usize))
                        }
                        (Value::Char(x), Value::Int(y)) => {
                            Value::string(x.to_string().repeat((*y).max(0) as usize))
                        }
                        _ => return Err(self.invalid_operands("multiply", &a, &b, line)),
                    };
                    self.stack.push(value);
                }

                Op::Divide => {
                    let (a, b) = self.pop_two(line)?;
                    let value = match (&a, &b) {
                        (Value::Int(x), Value::Int(y)) => match x.checked_div(*y) {
                            Some(result) => Value::Int(result),
                            None if *y == 0 => return Err(self.division_by_zero(line)),
                            None => {
                                return Err(self.error(
                                    RuntimeErrorKind::InvalidOperand,
                                    "integer overflow in division",
                                    line,
                                ))
                            }
                        },
                        (Value::Int(x), Value::Float(y)) => {
                            if *y == 0.0 {
                                return Err(self.division_by_zero(line));
                            }
                            Value::Float(*x as f64 / y)
                        }
                        (Value::Float(x), Value::Int(y)) => {
                            if *y == 0 {
                                return Err(self.division_by_zero(line));
                            }
                            Value::Float(x / *y as f64)
                        }
                        (Value::Float(x), Value::Float(y)) => {
                            if *y == 0.0 {
                                return Err(self.division_by_zero(line));
                            }
                            Value::Float(x / y)
                        }
                        _ => return Err(self.invalid_operands("divide", &a, &b, line)),
                    };
                    self.stack.push(value);
                }

                Op::Modulo => {
                    let (a, b) = self.pop_two(line)?;
                    let value = match (&a, &b) {
                        (Value::Int(x), Value::Int(y)) => match x.checked_rem(*y) {
                            Some(result) => Value::Int(result),
                            None if *y == 0 => return Err(self.division_by_zero(line)),
                            None => Value::Int(0),
                        },
                        (Value::Int(x), Value::Float(y)) => {
                            if *y == 0.0 {
                                return Err(self.division_by_zero(line));
                            }
                            Value::Float(*x as f64 % y)
                        }
                        (Value::Float(x), Value::Int(y)) => {
                            if *y == 0 {
                                return Err(self.division_by_zero(line));
                            }
                            Value::Float(x % *y as f64)
                        }
                        (Value::Float(x), Value::Float(y)) => {
                            if *y == 0.0 {
                                return Err(self.division_by_zero(line));
                            }
                            Value::Float(x % y)
                        }
                        _ => return Err(self.invalid_operands("take the modulo of", &a, &b, line)),
                    };
                    self.stack.push(value);
                }

                Op::Pow => {
                    let (a, b) = self.pop_two(line)?;
                    let value = match (&a, &b) {
                        (Value::Int(x), Value::Int(y)) => {
                            if *y >= 0 {
                                let exponent = u32::try_from(*y).ok();
                                match exponent.and_then(|e| x.checked_pow(e)) {
                                    Some(result) => Value::Int(result),
                                    None => {
                                        return Err(self.error(
                                            RuntimeErrorKind::InvalidOperand,
                                            "integer overflow in exponentiation",
                                            line,
                                        ))
                                    }
                                }
                            } else {
                                Value::Float((*x as f64).powf(*y as f64))
                            }
                        }
                        (Value::Int(x), Value::Float(y)) => Value::Float((*x as f64).powf(*y)),
                        (Value::Float(x), Value::Int(y)) => Value::Float(x.powf(*y as f64)),
                        (Value::Float(x), Value::Float(y)) => Value::Float(x.powf(*y)),
                        _ => return Err(self.invalid_operands("exponentiate", &a, &b, line)),
                    };
                    self.stack.push(value);
                }

                Op::Negate => {
                    let value = self.pop(line)?;
                    let result = match value {
                        Value::Int(n) => Value::Int(n.wrapping_neg()),
                        Value::Float(n) => Value::Float(-n),
                        other => {
                            return Err(self.error(
                                RuntimeErrorKind::InvalidOperand,
                                format!("cannot negate `{}`", other.type_name()),
                                line,
                            ))
                        }
                    };
                    self.stack.push(result);
                }

                Op::Equal => {
                    let (a, b) = self.pop_two(line)?;
                    self.stack.push(Value::Bool(a == b));
                }

                Op::NotEqual => {
                    let (a, b) = self.pop_two(line)?;
                    self.stack.push(Value::Bool(a != b));
                }

                Op::Greater => self.comparison(line, |o| o == Ordering::Greater)?,
                Op::GreaterEqual => self.comparison(line, |o| o != Ordering::Less)?,
                Op::Less => self.comparison(line, |o| o == Ordering::Less)?,
                Op::LessEqual => self.comparison(line, |o| o != Ordering::Greater)?,

                Op::And => {
                    let (a, b) = self.pop_two(line)?;
                    self.stack.push(Value::Bool(a.as_bool() && b.as_bool()));
                }

                Op::Or => {
                    let (a, b) = self.pop_two(line)?;
                    self.stack.push(Value::Bool(a.as_bool() || b.as_bool()));
                }

                Op::Not => {
                    let value = self.pop(line)?;
                    self.stack.push(Value::Bool(!value.as_bool()));
                }

                Op::Jump => {
                    let (constant_index, op_index) = self.read_jump_target(line)?;
                    self.constant_current = self.constant_offset + constant_index;
                    self.op_current = self.op_offset + op_index;
                }

                Op::JumpIfFalse => {
                    let (constant_index, op_index) = self.read_jump_target(line)?;
                    let condition = self.pop(line)?;
                    if !condition.as_bool() {
                        self.constant_current = self.constant_offset + constant_index;
                        self.op_current = self.op_offset + op_index;
                    }
                }

                Op::Call => self.call(line)?,

                Op::NativeCall => self.native_call(line)?,

                Op::Return => {
                    let result = self.pop(line)?;
                    match self.frames.pop() {
                        None => {
                            // main returned: discard the sentinel and halt
                            let base = self.locals_offsets.pop().unwrap_or(0);
                            self.locals.truncate(base);
                            return Ok(());
                        }
                        Some(frame) => {
                            let base = self.locals_offsets.pop().unwrap_or(0);
                            self.locals.truncate(base);
                            self.op_current = frame.op_return;
                            self.constant_current = frame.constant_return;
                            self.op_offset = frame.op_offset;
                            self.constant_offset = frame.constant_offset;
                            self.current_function = frame.function;
                            self.call_stack.pop();
                            self.stack.push(result);
                        }
                    }
                }

                Op::CastAsInt => {
                    let value = self.pop(line)?;
                    let result = match &value {
                        Value::Int(n) => Value::Int(*n),
                        Value::Float(n) => Value::Int(*n as i64),
                        Value::Bool(b) => Value::Int(*b as i64),
                        Value::Char(c) => Value::Int(*c as i64),
                        Value::String(s) => match s.trim().parse::<i64>() {
                            Ok(n) => Value::Int(n),
                            Err(_) => {
                                return Err(self.error(
                                    RuntimeErrorKind::InvalidCast,
                                    format!("cannot cast \"{}\" to Int", s),
                                    line,
                                ))
                            }
                        },
                        other => return Err(self.invalid_cast(other, "Int", line)),
                    };
                    self.stack.push(result);
                }

                Op::CastAsFloat => {
                    let value = self.pop(line)?;
                    let result = match &value {
                        Value::Int(n) => Value::Float(*n as f64),
                        Value::Float(n) => Value::Float(*n),
                        Value::Bool(b) => Value::Float(*b as i64 as f64),
                        Value::Char(c) => Value::Float(*c as i64 as f64),
                        Value::String(s) => match s.trim().parse::<f64>() {
                            Ok(n) => Value::Float(n),
                            Err(_) => {
                                return Err(self.error(
                                    RuntimeErrorKind::InvalidCast,
                                    format!("cannot cast \"{}\" to Float", s),
                                    line,
                                ))
                            }
                        },
                        other => return Err(self.invalid_cast(other, "Float", line)),
                    };
                    self.stack.push(result);
                }

                Op::CastAsBool => {
                    let value = self.pop(line)?;
                    self.stack.push(Value::Bool(value.as_bool()));
                }

                Op::CastAsString => {
                    let value = self.pop(line)?;
                    self.stack.push(Value::string(value.to_string()));
                }

                Op::CastAsChar => {
                    let value = self.pop(line)?;
                    let result = match &value {
                        Value::Char(c) => Value::Char(*c),
                        Value::Int(n) => match u32::try_from(*n).ok().and_then(char::from_u32) {
                            Some(c) => Value::Char(c),
                            None => {
                                return Err(self.error(
                                    RuntimeErrorKind::InvalidCast,
                                    format!("{} is not a valid character code", n),
                                    line,
                                ))
                            }
                        },
                        Value::String(s) if s.chars().count() == 1 => {
                            match s.chars().next() {
                                Some(c) => Value::Char(c),
                                None => Value::Char('\0'),
                            }
                        }
                        other => return Err(self.invalid_cast(other, "Char", line)),
                    };
                    self.stack.push(result);
                }

                Op::CheckType => {
                    let tag = self.read_int_constant(line)?;
                    let value = self.pop(line)?;
                    self.stack.push(Value::Bool(value.type_tag() as i64 == tag));
                }

                Op::Assert => {
                    let condition = self.pop(line)?;
                    if !condition.as_bool() {
                        return Err(self.error(
                            RuntimeErrorKind::AssertionFailed,
                            "Assertion failed",
                            line,
                        ));
                    }
                }

                Op::AssertWithMessage => {
                    let message = match self.read_constant(line)? {
                        Constant::String(s) => s,
                        other => other.to_string(),
                    };
                    let condition = self.pop(line)?;
                    if !condition.as_bool() {
                        return Err(self.error(RuntimeErrorKind::AssertionFailed, message, line));
                    }
                }

                Op::Print => {
                    let value = self.peek(line)?;
                    print!("{}", value);
                    let _ = std::io::stdout().flush();
                }

                Op::PrintLn => {
                    let value = self.peek(line)?;
                    println!("{}", value);
                }

                Op::PrintEmptyLine => println!(),

                Op::PrintTab => {
                    print!("\t");
                    let _ = std::io::stdout().flush();
                }
            }
        }
    }

    // --- Calls ---

    fn call(&mut self, line: usize) -> VMResult<()> {
        let hash = self.read_int_constant(line)? as u64;
        let arg_count = self.read_int_constant(line)? as usize;

        let Some(info) = self.image.functions.get(&hash).cloned() else {
            let name = self.image.name_of(hash);
            return Err(self.error(
                RuntimeErrorKind::FunctionNotFound,
                format!("Cannot find function '{}'", name),
                line,
            ));
        };
        if info.arity != arg_count {
            return Err(self.error(
                RuntimeErrorKind::IncorrectArgCount,
                format!(
                    "Incorrect number of arguments given to '{}': expected {}, got {}",
                    info.name, info.arity, arg_count
                ),
                line,
            ));
        }
        if self.stack.len() < arg_count {
            return Err(self.error(
                RuntimeErrorKind::InvalidOperand,
                "value stack underflow",
                line,
            ));
        }

        self.frames.push(ReturnFrame {
            op_return: self.op_current,
            constant_return: self.constant_current,
            op_offset: self.op_offset,
            constant_offset: self.constant_offset,
            function: self.current_function,
        });

        // Arguments move off the operand stack into the callee's frame,
        // slot order matching parameter order.
        let new_base = self.locals.len();
        self.locals_offsets.push(new_base);
        let split = self.stack.len() - arg_count;
        self.locals.extend(self.stack.drain(split..));

        self.call_stack.push(CallSite {
            caller: self.current_function,
            callee: hash,
            line,
        });
        self.current_function = hash;
        self.op_current = info.op_start;
        self.op_offset = info.op_start;
        self.constant_current = info.constant_start;
        self.constant_offset = info.constant_start;
        Ok(())
    }

    fn native_call(&mut self, line: usize) -> VMResult<()> {
        let index = self.read_int_constant(line)? as usize;
        let arg_count = self.read_int_constant(line)? as usize;

        let Some(native) = native_functions().get(index) else {
            return Err(self.error(
                RuntimeErrorKind::FunctionNotFound,
                format!("no native function at index {}", index),
                line,
            ));
        };
        if native.arity != arg_count {
            return Err(self.error(
                RuntimeErrorKind::IncorrectArgCount,
                format!(
                    "Incorrect number of arguments given to '{}': expected {}, got {}",
                    native.name, native.arity, arg_count
                ),
                line,
            ));
        }
        if self.stack.len() < arg_count {
            return Err(self.error(
                RuntimeErrorKind::InvalidOperand,
                "value stack underflow",
                line,
            ));
        }

        let split = self.stack.len() - arg_count;
        let args: Vec<Value> = self.stack.drain(split..).collect();
        let result = (native.function)(&args)
            .map_err(|message| self.error(RuntimeErrorKind::InvalidArgument, message, line))?;
        self.stack.push(result);
        Ok(())
    }

    // --- Cursor and stack helpers ---

    fn base(&self) -> usize {
        self.locals_offsets.last().copied().unwrap_or(0)
    }

    fn read_constant(&mut self, line: usize) -> VMResult<Constant> {
        match self.image.constants.get(self.constant_current) {
            Some(constant) => {
                self.constant_current += 1;
                Ok(constant.clone())
            }
            None => Err(self.error(
                RuntimeErrorKind::InvalidOperand,
                "constant pool exhausted",
                line,
            )),
        }
    }

    fn read_int_constant(&mut self, line: usize) -> VMResult<i64> {
        match self.read_constant(line)? {
            Constant::Int(n) => Ok(n),
            other => Err(self.error(
                RuntimeErrorKind::InvalidOperand,
                format!("expected integer constant, found {}", other),
                line,
            )),
        }
    }

    fn read_slot(&mut self, line: usize) -> VMResult<usize> {
        let slot = self.read_int_constant(line)?;
        usize::try_from(slot).map_err(|_| {
            self.error(
                RuntimeErrorKind::InvalidOperand,
                "negative local slot",
                line,
            )
        })
    }

    fn read_jump_target(&mut self, line: usize) -> VMResult<(usize, usize)> {
        let constant_index = self.read_int_constant(line)?;
        let op_index = self.read_int_constant(line)?;
        Ok((constant_index.max(0) as usize, op_index.max(0) as usize))
    }

    fn pop(&mut self, line: usize) -> VMResult<Value> {
        match self.stack.pop() {
            Some(value) => Ok(value),
            None => Err(self.error(
                RuntimeErrorKind::InvalidOperand,
                "value stack underflow",
                line,
            )),
        }
    }

    fn pop_two(&mut self, line: usize) -> VMResult<(Value, Value)> {
        let b = self.pop(line)?;
        let a = self.pop(line)?;
        Ok((a, b))
    }

    fn peek(&self, line: usize) -> VMResult<&Value> {
        match self.stack.last() {
            Some(value) => Ok(value),
            None => Err(self.error(
                RuntimeErrorKind::InvalidOperand,
                "value stack underflow",
                line,
            )),
        }
    }

    fn comparison<F>(&mut self, line: usize, check: F) -> VMResult<()>
    where
        F: FnOnce(Ordering) -> bool,
    {
        let (a, b) = self.pop_two(line)?;
        match Self::ordered(&a, &b) {
            Some(ordering) => {
                self.stack.push(Value::Bool(check(ordering)));
                Ok(())
            }
            None => Err(self.error(
                RuntimeErrorKind::InvalidOperand,
                format!(
                    "cannot compare `{}` with `{}`",
                    a.type_name(),
                    b.type_name()
                ),
                line,
            )),
        }
    }

    /// Ordering for the comparable pairs: numeric (with promotion), char,
    /// and string. Everything else has no order.
    fn ordered(a: &Value, b: &Value) -> Option<Ordering> {
        match (a, b) {
            (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
            (Value::Int(x), Value::Float(y)) => (*x as f64).partial_cmp(y),
            (Value::Float(x), Value::Int(y)) => x.partial_cmp(&(*y as f64)),
            (Value::Float(x), Value::Float(y)) => x.partial_cmp(y),
            (Value::Char(x), Value::Char(y)) => Some(x.cmp(y)),
            (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
            _ => None,
        }
    }

    // --- Errors ---

    fn error(
        &self,
        kind: RuntimeErrorKind,
        message: impl Into<String>,
        line: usize,
    ) -> RuntimeError {
        let call_stack = self
            .call_stack
            .iter()
            .map(|site| StackFrame {
                caller: self.image.name_of(site.caller),
                callee: self.image.name_of(site.callee),
                line: site.line,
            })
            .collect();
        RuntimeError::new(kind, message, line).with_call_stack(call_stack)
    }

    fn invalid_operands(&self, verb: &str, a: &Value, b: &Value, line: usize) -> RuntimeError {
        self.error(
            RuntimeErrorKind::InvalidOperand,
            format!(
                "cannot {} `{}` and `{}`",
                verb,
                a.type_name(),
                b.type_name()
            ),
            line,
        )
    }

    fn division_by_zero(&self, line: usize) -> RuntimeError {
        self.error(RuntimeErrorKind::InvalidOperand, "division by zero", line)
    }

    fn invalid_cast(&self, value: &Value, target: &str, line: usize) -> RuntimeError {
        self.error(
            RuntimeErrorKind::InvalidCast,
            format!("cannot cast `{}` to {}", value.type_name(), target),
            line,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::compiler::{Compiler, CompilerOptions};
    use crate::error::SourceInfo;

    fn run_vm(source: &str) -> (VM, VMResult<()>) {
        let info = SourceInfo::new("test.gr", source);
        let program = Compiler::compile(source, info, CompilerOptions::default())
            .unwrap_or_else(|e| panic!("compile error: {:?}", e.diagnostics()));
        let image = program.link().expect("link error");
        let mut vm = VM::new(image);
        let result = vm.run();
        (vm, result)
    }

    fn run_source(source: &str) -> VMResult<()> {
        run_vm(source).1
    }

    fn run_err(source: &str) -> RuntimeError {
        match run_source(source) {
            Err(e) => e,
            Ok(()) => panic!("expected runtime error"),
        }
    }

    #[test]
    fn test_arithmetic_precedence() {
        assert!(run_source("func main(): assert(1 + 2 * 3 == 7); end").is_ok());
    }

    #[test]
    fn test_locals_and_reassignment() {
        assert!(run_source("func main(): var x = 10; x = x + 5; assert(x == 15); end").is_ok());
    }

    #[test]
    fn test_expression_statements_are_popped() {
        let source = r#"
            func main():
                var x = 5;
                x + 1;
                Int("7");
                instanceof(x, Int);
                x = 2;
                assert(x == 2);
            end
        "#;
        let (vm, result) = run_vm(source);
        assert!(result.is_ok());
        assert!(vm.stack.is_empty());
    }

    #[test]
    fn test_for_loop_sum() {
        let source = "
            func main():
                var s = 0;
                for i in 1..11:
                    s = s + i;
                end
                assert(s == 55);
            end
        ";
        assert!(run_source(source).is_ok());
    }

    #[test]
    fn test_for_loop_with_step() {
        let source = "
            func main():
                var s = 0;
                for i in 0..10 by 2:
                    s = s + i;
                end
                assert(s == 20);
            end
        ";
        assert!(run_source(source).is_ok());
    }

    #[test]
    fn test_for_loop_variable_bounds() {
        let source = "
            func main():
                var n = 4;
                var s = 0;
                for i in 0..n:
                    s = s + 1;
                end
                assert(s == 4);
            end
        ";
        assert!(run_source(source).is_ok());
    }

    #[test]
    fn test_while_loop() {
        assert!(
            run_source("func main(): var x = 0; while x < 5: x = x + 1; end assert(x == 5); end")
                .is_ok()
        );
    }

    #[test]
    fn test_if_else_chain() {
        let source = "
            func main():
                var x = 2;
                var r = 0;
                if x == 1:
                    r = 1;
                else if x == 2:
                    r = 2;
                else:
                    r = 3;
                end
                assert(r == 2);
            end
        ";
        assert!(run_source(source).is_ok());
    }

    #[test]
    fn test_else_branch_taken() {
        let source = "
            func main():
                var r = 0;
                if false:
                    r = 1;
                else:
                    r = 2;
                end
                assert(r == 2);
            end
        ";
        assert!(run_source(source).is_ok());
    }

    #[test]
    fn test_break_exits_innermost_loop() {
        let source = "
            func main():
                var total = 0;
                for i in 0..3:
                    while true:
                        break;
                    end
                    total = total + 1;
                end
                assert(total == 3);
            end
        ";
        assert!(run_source(source).is_ok());
    }

    #[test]
    fn test_break_with_block_locals() {
        let source = "
            func main():
                var n = 0;
                while true:
                    var step = 1;
                    n = n + step;
                    if n == 3:
                        break;
                    end
                end
                assert(n == 3);
            end
        ";
        assert!(run_source(source).is_ok());
    }

    #[test]
    fn test_function_call() {
        let source = "
            func add(a, b):
                return a + b;
            end
            func main():
                assert(add(2, 3) == 5);
            end
        ";
        assert!(run_source(source).is_ok());
    }

    #[test]
    fn test_forward_reference_call() {
        let source = "
            func main():
                assert(double(21) == 42);
            end
            func double(x):
                return x * 2;
            end
        ";
        assert!(run_source(source).is_ok());
    }

    #[test]
    fn test_recursion() {
        let source = "
            func fib(n):
                if n < 2:
                    return n;
                end
                return fib(n - 1) + fib(n - 2);
            end
            func main():
                assert(fib(10) == 55);
            end
        ";
        assert!(run_source(source).is_ok());
    }

    #[test]
    fn test_function_without_return_yields_null() {
        let source = "
            func noop(a):
            end
            func main():
                assert(noop(1) == null);
            end
        ";
        assert!(run_source(source).is_ok());
    }

    #[test]
    fn test_invalid_operand_error() {
        let error = run_err("func main(): println(1 + \"x\"); end");
        assert_eq!(error.kind, RuntimeErrorKind::InvalidOperand);
        assert_eq!(error.line, 1);
    }

    #[test]
    fn test_string_concatenation_left_side() {
        assert!(run_source("func main(): assert(\"n = \" + 3 == \"n = 3\"); end").is_ok());
    }

    #[test]
    fn test_string_and_char_operations() {
        let source = r#"
            func main():
                assert("ab" + "cd" == "abcd");
                assert("ab" + 'c' == "abc");
                assert('a' + 'b' == "ab");
                assert("ab" * 2 == "abab");
                assert('z' * 3 == "zzz");
            end
        "#;
        assert!(run_source(source).is_ok());
    }

    #[test]
    fn test_division_rules() {
        let source = "
            func main():
                assert(7 / 2 == 3);
                assert(-7 / 2 == -3);
                assert(7.0 / 2 == 3.5);
                assert(7 / 2.0 == 3.5);
            end
        ";
        assert!(run_source(source).is_ok());
    }

    #[test]
    fn test_division_by_zero() {
        let error = run_err("func main(): var x = 1 / 0; end");
        assert_eq!(error.kind, RuntimeErrorKind::InvalidOperand);
    }

    #[test]
    fn test_modulo_and_roundtrip_identity() {
        let source = "
            func main():
                for a in -7..8:
                    for b in -3..4:
                        if b != 0:
                            assert((a / b) * b + (a % b) == a);
                        end
                    end
                end
            end
        ";
        assert!(run_source(source).is_ok());
    }

    #[test]
    fn test_pow() {
        let source = "
            func main():
                assert(2 ** 10 == 1024);
                assert(2.0 ** 2 == 4.0);
                assert(2 ** -1 == 0.5);
            end
        ";
        assert!(run_source(source).is_ok());
    }

    #[test]
    fn test_comparison_totality() {
        let source = r#"
            func main():
                assert((1 == "x") == false);
                assert((null == 0) == false);
                assert((true == 1) == false);
                assert(1 == 1.0);
                assert('a' == "a");
            end
        "#;
        assert!(run_source(source).is_ok());
    }

    #[test]
    fn test_ordered_comparison_errors_on_mixed_types() {
        let error = run_err("func main(): var x = 1 < \"a\"; end");
        assert_eq!(error.kind, RuntimeErrorKind::InvalidOperand);
    }

    #[test]
    fn test_eager_logic_coerces() {
        let source = "
            func main():
                assert((1 and 2) == true);
                assert((0 or 2) == true);
                assert((0 and 1) == false);
                assert(!0);
            end
        ";
        assert!(run_source(source).is_ok());
    }

    #[test]
    fn test_casts() {
        let source = r#"
            func main():
                assert(Int("42") == 42);
                assert(Int(3.9) == 3);
                assert(Int(true) == 1);
                assert(Float(2) == 2.0);
                assert(String(1 + 2) == "3");
                assert(Char(97) == 'a');
                assert(Int('a') == 97);
                assert(Bool(0) == false);
            end
        "#;
        assert!(run_source(source).is_ok());
    }

    #[test]
    fn test_invalid_cast() {
        let error = run_err("func main(): var x = Int(\"abc\"); end");
        assert_eq!(error.kind, RuntimeErrorKind::InvalidCast);
    }

    #[test]
    fn test_instanceof() {
        let source = r#"
            func main():
                assert(instanceof(true, Bool));
                assert(instanceof('c', Char));
                assert(instanceof(1.5, Float));
                assert(instanceof(1, Int));
                assert(instanceof(null, null));
                assert(instanceof("s", String));
                assert(!instanceof(1, Float));
            end
        "#;
        assert!(run_source(source).is_ok());
    }

    #[test]
    fn test_assertion_failure_with_message() {
        let error = run_err("func main(): assert(false, \"boom\"); end");
        assert_eq!(error.kind, RuntimeErrorKind::AssertionFailed);
        assert_eq!(error.message, "boom");
    }

    #[test]
    fn test_function_not_found() {
        let error = run_err("func main(): missing(); end");
        assert_eq!(error.kind, RuntimeErrorKind::FunctionNotFound);
        assert!(error.message.contains("missing"));
    }

    #[test]
    fn test_incorrect_arg_count() {
        let error = run_err("func f(a): end func main(): f(1, 2); end");
        assert_eq!(error.kind, RuntimeErrorKind::IncorrectArgCount);
    }

    #[test]
    fn test_call_stack_captured() {
        let source = "
            func inner():
                var x = 1 + null;
            end
            func outer():
                inner();
            end
            func main():
                outer();
            end
        ";
        let error = run_err(source);
        assert_eq!(error.kind, RuntimeErrorKind::InvalidOperand);
        let callees: Vec<&str> = error
            .call_stack
            .iter()
            .map(|f| f.callee.as_str())
            .collect();
        assert_eq!(callees, vec!["outer", "inner"]);
    }

    #[test]
    fn test_native_functions() {
        let source = "
            func main():
                assert(__native_sqrt_float(9.0) == 3.0);
                assert(__native_sqrt_int(16) == 4.0);
                assert(__native_time_ms() > 0);
            end
        ";
        assert!(run_source(source).is_ok());
    }

    #[test]
    fn test_value_stack_balance() {
        let source = "
            func helper(a):
                return a * 2;
            end
            func main():
                1 + 2;
                helper(3);
                var x = helper(4);
                x = x + 1;
            end
        ";
        let (vm, result) = run_vm(source);
        assert!(result.is_ok());
        assert!(vm.stack.is_empty());
        assert!(vm.locals.is_empty());
    }

    #[test]
    fn test_locals_balance_across_blocks() {
        let source = "
            func main():
                var kept = 0;
                for i in 0..4:
                    var inner = i * 2;
                    kept = kept + inner;
                end
                assert(kept == 12);
            end
        ";
        let (vm, result) = run_vm(source);
        assert!(result.is_ok());
        assert!(vm.locals.is_empty());
    }

    #[test]
    fn test_negation_and_unary_chains() {
        assert!(run_source("func main(): assert(--3 == 3); assert(!!true); assert(-(1 + 2) == -3); end").is_ok());
    }
}
