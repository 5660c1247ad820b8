//! Stack virtual machine executing the intermediate program.
//!
//! Execution is deterministic: there is no input and `imprimir` output is
//! captured into the trace instead of being written anywhere. Checks the
//! analyzer deferred (operands of unknown type) happen here and surface
//! as runtime faults.

use std::cmp::Ordering;
use std::fmt;

use log::debug;

use crate::ast::{BinaryOp, UnaryOp};
use crate::diagnostic::{Diagnostic, DiagnosticKind, Phase};
use crate::ir::{Instr, IntermediateProgram};
use crate::source::Position;

/// Resource limits for a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionLimits {
    pub max_call_depth: usize,
    /// Instructions to execute before giving up. `None` relies on the
    /// caller's wall-clock timeout instead.
    pub max_steps: Option<u64>,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        ExecutionLimits {
            max_call_depth: 256,
            max_steps: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Real(f64),
    Str(String),
    Bool(bool),
    Unit,
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "integer",
            Value::Real(_) => "real",
            Value::Str(_) => "string",
            Value::Bool(_) => "boolean",
            Value::Unit => "nothing",
        }
    }

    fn as_real(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Real(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Real(v) => write!(f, "{v:?}"),
            Value::Str(v) => f.write_str(v),
            Value::Bool(true) => f.write_str("verdadero"),
            Value::Bool(false) => f.write_str("falso"),
            Value::Unit => f.write_str("nada"),
        }
    }
}

/// Captured output of a run.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExecutionTrace {
    pub output: Vec<String>,
    pub steps: u64,
    pub completed: bool,
}

impl ExecutionTrace {
    /// Render the `exec` artifact.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.output {
            out.push_str(line);
            out.push('\n');
        }
        out.push_str("--\n");
        out.push_str(if self.completed {
            "status: finished\n"
        } else {
            "status: aborted\n"
        });
        out.push_str(&format!("steps: {}\n", self.steps));
        out
    }
}

#[derive(Debug)]
pub struct ExecutionResult {
    pub trace: ExecutionTrace,
    pub diagnostics: Vec<Diagnostic>,
}

pub fn execute(program: &IntermediateProgram, limits: ExecutionLimits) -> ExecutionResult {
    let mut vm = Machine {
        program,
        limits,
        globals: vec![None; program.globals.len()],
        stack: Vec::new(),
        frames: Vec::new(),
        trace: ExecutionTrace::default(),
    };
    let outcome = vm.run();
    debug!(
        "[executor] {} steps, {} output lines",
        vm.trace.steps,
        vm.trace.output.len()
    );
    match outcome {
        Ok(()) => {
            vm.trace.completed = true;
            ExecutionResult {
                trace: vm.trace,
                diagnostics: Vec::new(),
            }
        }
        Err(diag) => ExecutionResult {
            trace: vm.trace,
            diagnostics: vec![diag],
        },
    }
}

struct Frame {
    unit: usize,
    pc: usize,
    locals: Vec<Option<Value>>,
    stack_base: usize,
}

struct Machine<'p> {
    program: &'p IntermediateProgram,
    limits: ExecutionLimits,
    globals: Vec<Option<Value>>,
    stack: Vec<Value>,
    frames: Vec<Frame>,
    trace: ExecutionTrace,
}

type Fault = Diagnostic;

impl Machine<'_> {
    fn run(&mut self) -> Result<(), Fault> {
        let program = self.program;
        let Some(main) = program.units.first() else {
            return Ok(());
        };
        self.frames.push(Frame {
            unit: 0,
            pc: 0,
            locals: vec![None; main.locals.len()],
            stack_base: 0,
        });

        loop {
            let (unit_index, pc) = match self.frames.last() {
                Some(frame) => (frame.unit, frame.pc),
                None => return Ok(()),
            };
            let unit = &program.units[unit_index];
            let Some(instr) = unit.code.get(pc) else {
                // Falling off the end of a unit behaves like a bare return.
                self.return_from(Value::Unit);
                continue;
            };

            self.trace.steps += 1;
            if let Some(max) = self.limits.max_steps {
                if self.trace.steps > max {
                    return Err(self.fault(format!("step limit of {max} instructions exceeded")));
                }
            }
            self.advance();

            match instr {
                Instr::PushInt(v) => self.stack.push(Value::Int(*v)),
                Instr::PushReal(v) => self.stack.push(Value::Real(*v)),
                Instr::PushStr(v) => self.stack.push(Value::Str(v.clone())),
                Instr::PushBool(v) => self.stack.push(Value::Bool(*v)),
                Instr::LoadGlobal(slot) => {
                    let value = self.globals[*slot as usize].clone().ok_or_else(|| {
                        self.unresolved(&program.globals[*slot as usize])
                    })?;
                    self.stack.push(value);
                }
                Instr::StoreGlobal(slot) => {
                    let value = self.pop()?;
                    self.globals[*slot as usize] = Some(value);
                }
                Instr::LoadLocal(slot) => {
                    let value = self.frame().locals[*slot as usize].clone().ok_or_else(|| {
                        self.unresolved(&unit.locals[*slot as usize])
                    })?;
                    self.stack.push(value);
                }
                Instr::StoreLocal(slot) => {
                    let value = self.pop()?;
                    self.frame_mut().locals[*slot as usize] = Some(value);
                }
                Instr::Unary(op) => {
                    let operand = self.pop()?;
                    let value = self.unary(*op, operand)?;
                    self.stack.push(value);
                }
                Instr::ToReal => {
                    let value = match self.pop()? {
                        Value::Int(v) => Value::Real(v as f64),
                        Value::Real(v) => Value::Real(v),
                        other => {
                            return Err(self.fault(format!(
                                "expected a number, found {}",
                                other.type_name()
                            )));
                        }
                    };
                    self.stack.push(value);
                }
                Instr::Binary(op) => {
                    let rhs = self.pop()?;
                    let lhs = self.pop()?;
                    let value = self.binary(*op, lhs, rhs)?;
                    self.stack.push(value);
                }
                Instr::Jump(target) => self.frame_mut().pc = *target,
                Instr::JumpIfFalse(target) => {
                    if !self.pop_condition()? {
                        self.frame_mut().pc = *target;
                    }
                }
                Instr::JumpIfTrue(target) => {
                    if self.pop_condition()? {
                        self.frame_mut().pc = *target;
                    }
                }
                Instr::Call { unit, argc } => self.call(*unit as usize, *argc as usize)?,
                Instr::Return => {
                    let value = self.pop()?;
                    self.return_from(value);
                }
                Instr::ReturnUnit => self.return_from(Value::Unit),
                Instr::Print(argc) => {
                    let start = self.stack.len().saturating_sub(*argc as usize);
                    let line = self
                        .stack
                        .drain(start..)
                        .map(|v| v.to_string())
                        .collect::<Vec<_>>()
                        .join(" ");
                    self.trace.output.push(line);
                }
                Instr::Pop => {
                    self.pop()?;
                }
                Instr::Halt => {
                    self.frames.clear();
                    return Ok(());
                }
            }
        }
    }

    fn frame(&self) -> &Frame {
        // `run` only executes instructions while a frame is active.
        &self.frames[self.frames.len() - 1]
    }

    fn frame_mut(&mut self) -> &mut Frame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    fn advance(&mut self) {
        self.frame_mut().pc += 1;
    }

    /// Diagnostic at the instruction currently executing.
    fn fault(&self, message: String) -> Fault {
        let frame = self.frame();
        let unit = &self.program.units[frame.unit];
        let at = frame.pc.saturating_sub(1);
        let position = unit
            .positions
            .get(at)
            .copied()
            .unwrap_or(Position::new(1, 1));
        Diagnostic::new(Phase::Execution, DiagnosticKind::RuntimeFault, message, position)
    }

    fn unresolved(&self, name: &str) -> Fault {
        self.fault(format!(
            "unresolved reference '{name}' at runtime: no value has been assigned yet"
        ))
    }

    fn pop(&mut self) -> Result<Value, Fault> {
        self.stack
            .pop()
            .ok_or_else(|| self.fault("operand stack underflow".to_string()))
    }

    fn pop_condition(&mut self) -> Result<bool, Fault> {
        match self.pop()? {
            Value::Bool(b) => Ok(b),
            other => Err(self.fault(format!(
                "condition must be boolean, found {}",
                other.type_name()
            ))),
        }
    }

    fn call(&mut self, unit_index: usize, argc: usize) -> Result<(), Fault> {
        if self.frames.len() >= self.limits.max_call_depth {
            return Err(self.fault(format!(
                "call depth limit of {} exceeded",
                self.limits.max_call_depth
            )));
        }
        let Some(unit) = self.program.units.get(unit_index) else {
            return Err(self.fault(format!("call to missing unit u{unit_index}")));
        };
        if self.stack.len() < argc {
            return Err(self.fault("operand stack underflow".to_string()));
        }
        let mut locals = vec![None; unit.locals.len().max(argc)];
        let args = self.stack.split_off(self.stack.len() - argc);
        for (slot, arg) in locals.iter_mut().zip(args) {
            *slot = Some(arg);
        }
        self.frames.push(Frame {
            unit: unit_index,
            pc: 0,
            locals,
            stack_base: self.stack.len(),
        });
        Ok(())
    }

    fn return_from(&mut self, value: Value) {
        if let Some(frame) = self.frames.pop() {
            self.stack.truncate(frame.stack_base);
        }
        if !self.frames.is_empty() {
            self.stack.push(value);
        }
    }

    fn unary(&self, op: UnaryOp, operand: Value) -> Result<Value, Fault> {
        match (op, operand) {
            (UnaryOp::Neg, Value::Int(v)) => v
                .checked_neg()
                .map(Value::Int)
                .ok_or_else(|| self.fault("integer overflow".to_string())),
            (UnaryOp::Neg, Value::Real(v)) => Ok(Value::Real(-v)),
            (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
            (op, operand) => Err(self.fault(format!(
                "operator '{}' cannot be applied to {}",
                op.symbol(),
                operand.type_name()
            ))),
        }
    }

    fn binary(&self, op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, Fault> {
        let mismatch = |lhs: &Value, rhs: &Value| {
            self.fault(format!(
                "operator '{op}' cannot be applied to {} and {}",
                lhs.type_name(),
                rhs.type_name()
            ))
        };
        let overflow = || self.fault("integer overflow".to_string());

        match op {
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
                match (&lhs, &rhs) {
                    (Value::Str(a), Value::Str(b)) if op == BinaryOp::Add => {
                        Ok(Value::Str(format!("{a}{b}")))
                    }
                    (Value::Int(a), Value::Int(b)) => {
                        let result = match op {
                            BinaryOp::Add => a.checked_add(*b),
                            BinaryOp::Sub => a.checked_sub(*b),
                            BinaryOp::Mul => a.checked_mul(*b),
                            _ => {
                                if *b == 0 {
                                    return Err(self.fault("division by zero".to_string()));
                                }
                                a.checked_div(*b)
                            }
                        };
                        result.map(Value::Int).ok_or_else(overflow)
                    }
                    _ => {
                        let (Some(a), Some(b)) = (lhs.as_real(), rhs.as_real()) else {
                            return Err(mismatch(&lhs, &rhs));
                        };
                        let result = match op {
                            BinaryOp::Add => a + b,
                            BinaryOp::Sub => a - b,
                            BinaryOp::Mul => a * b,
                            _ => {
                                if b == 0.0 {
                                    return Err(self.fault("division by zero".to_string()));
                                }
                                a / b
                            }
                        };
                        Ok(Value::Real(result))
                    }
                }
            }
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                let ordering = self.order(&lhs, &rhs).ok_or_else(|| mismatch(&lhs, &rhs))?;
                let result = match op {
                    BinaryOp::Lt => ordering == Ordering::Less,
                    BinaryOp::Le => ordering != Ordering::Greater,
                    BinaryOp::Gt => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                };
                Ok(Value::Bool(result))
            }
            BinaryOp::Eq | BinaryOp::Ne => {
                let equal = match (&lhs, &rhs) {
                    (Value::Int(a), Value::Int(b)) => a == b,
                    (Value::Str(a), Value::Str(b)) => a == b,
                    (Value::Bool(a), Value::Bool(b)) => a == b,
                    (Value::Unit, Value::Unit) => true,
                    _ => match (lhs.as_real(), rhs.as_real()) {
                        (Some(a), Some(b)) => a == b,
                        _ => return Err(mismatch(&lhs, &rhs)),
                    },
                };
                Ok(Value::Bool(if op == BinaryOp::Eq { equal } else { !equal }))
            }
            // Lowered to jumps.
            BinaryOp::And | BinaryOp::Or => {
                Err(self.fault(format!("operator '{op}' has no stack form")))
            }
        }
    }

    fn order(&self, lhs: &Value, rhs: &Value) -> Option<Ordering> {
        match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            _ => lhs.as_real()?.partial_cmp(&rhs.as_real()?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen_ir::lower;
    use crate::ir::{MAIN_UNIT, Unit};
    use crate::lexer::tokenize;
    use crate::parser::parse;
    use crate::semantic::analyze;

    fn run_with(source: &str, limits: ExecutionLimits) -> ExecutionResult {
        let tokens = tokenize(source).tokens;
        let program = parse(&tokens).program.expect("parse");
        let model = analyze(&program).model.expect("analyze");
        let ir = lower(&program, &model).program.expect("lower");
        execute(&ir, limits)
    }

    fn run(source: &str) -> ExecutionResult {
        run_with(source, ExecutionLimits::default())
    }

    fn output(source: &str) -> Vec<String> {
        let result = run(source);
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
        assert!(result.trace.completed);
        result.trace.output
    }

    #[test]
    fn runs_arithmetic_and_printing() {
        assert_eq!(
            output("var x = 2 + 3 * 4;\nimprimir(x, x / 3, 7.0 / 2, \"a\" + \"b\", x > 10);"),
            vec!["14 4 3.5 ab verdadero"]
        );
    }

    #[test]
    fn runs_loops_and_conditionals() {
        let out = output(
            "var suma = 0;\n\
             para (var i = 1; i <= 4; i = i + 1) {\n\
               si (i == 2) { imprimir(\"dos\"); } sino si (i == 3) { imprimir(\"tres\"); } sino { suma = suma + i; }\n\
             }\n\
             var n = 0;\n\
             mientras (n < 3) { n = n + 1; }\n\
             imprimir(suma, n);",
        );
        assert_eq!(out, vec!["dos", "tres", "5 3"]);
    }

    #[test]
    fn runs_recursive_functions() {
        let out = output(
            "funcion fact(n) { si (n <= 1) { retorna 1; } retorna n * fact(n - 1); }\n\
             funcion saluda(nombre) { imprimir(\"hola\", nombre); }\n\
             imprimir(fact(10));\n\
             var r = saluda(\"mundo\");\n\
             imprimir(r);",
        );
        assert_eq!(out, vec!["3628800", "hola mundo", "nada"]);
    }

    #[test]
    fn short_circuit_skips_right_operand() {
        let out = output(
            "funcion boom() { retorna 1 / 0; }\n\
             imprimir(falso && boom() == 1, verdadero || boom() == 1);",
        );
        assert_eq!(out, vec!["falso verdadero"]);
    }

    #[test]
    fn reports_division_by_zero_with_position() {
        let result = run("imprimir(\"antes\");\nvar cero = 0;\nvar x = 10 / cero;");
        assert_eq!(result.diagnostics.len(), 1);
        let diag = &result.diagnostics[0];
        assert_eq!(diag.phase, Phase::Execution);
        assert_eq!(diag.kind, DiagnosticKind::RuntimeFault);
        assert!(diag.message.contains("division by zero"));
        assert_eq!(diag.position, Some(Position::new(3, 12)));
        assert_eq!(result.trace.output, vec!["antes"]);
        assert!(!result.trace.completed);
    }

    #[test]
    fn reports_runtime_type_mismatch() {
        let result = run("funcion f(a) { retorna a - 1; }\nimprimir(f(\"x\"));");
        assert!(result.diagnostics[0].message.contains("string and integer"));
        assert_eq!(result.diagnostics[0].line(), 1);
    }

    #[test]
    fn widens_integers_stored_in_real_variables() {
        assert_eq!(
            output("var r = 1.5;\nr = 7;\nimprimir(r / 2, r);"),
            vec!["3.5 7.0"]
        );
        assert_eq!(
            output("funcion f(n) { var r = 0.5; r = n; retorna r; }\nimprimir(f(3) / 2);"),
            vec!["1.5"]
        );

        let result = run("funcion f(n) { var r = 0.5; r = n; retorna r; }\nf(\"x\");");
        assert_eq!(
            result.diagnostics[0].message,
            "expected a number, found string"
        );
        assert_eq!(result.diagnostics[0].position, Some(Position::new(1, 29)));
    }

    #[test]
    fn rejects_logical_operator_on_the_stack() {
        let position = Position::new(4, 2);
        let mut main = Unit::new(MAIN_UNIT, 0);
        main.emit(Instr::PushBool(true), position);
        main.emit(Instr::PushBool(false), position);
        main.emit(Instr::Binary(BinaryOp::And), position);
        main.emit(Instr::Halt, position);
        let program = IntermediateProgram {
            globals: Vec::new(),
            units: vec![main],
        };

        let result = execute(&program, ExecutionLimits::default());
        assert!(!result.trace.completed);
        assert_eq!(
            result.diagnostics[0].to_string(),
            "[EJECUCION] operator '&&' has no stack form in line 4, column 2"
        );
    }

    #[test]
    fn reports_unassigned_global_read() {
        let result = run(
            "var a = f();\nvar b = 1;\nfuncion f() { retorna 0; }\nfuncion g() { retorna b; }\nvar c = g();",
        );
        assert!(result.diagnostics.is_empty());

        let result = run("var b = 0;\nfuncion g() { retorna b; }\nb = g();");
        assert!(result.diagnostics.is_empty());

        let result = run("funcion g() { retorna h(); }\nvar v = g();\nvar w = 1;\nfuncion h() { retorna w; }");
        assert!(result.diagnostics[0].message.contains("unresolved reference 'w'"));
    }

    #[test]
    fn enforces_limits() {
        let result = run("funcion f(n) { retorna f(n + 1); }\nf(0);");
        assert!(result.diagnostics[0].message.contains("call depth"));

        let limits = ExecutionLimits {
            max_steps: Some(100),
            ..ExecutionLimits::default()
        };
        let result = run_with("mientras (verdadero) { }", limits);
        assert!(result.diagnostics[0].message.contains("step limit"));
        assert_eq!(result.trace.steps, 101);
    }

    #[test]
    fn reports_integer_overflow() {
        let result = run("var x = 9223372036854775807;\nx = x + 1;");
        assert!(result.diagnostics[0].message.contains("overflow"));
    }

    #[test]
    fn renders_trace_footer() {
        let trace = run("imprimir(1);").trace;
        assert_eq!(trace.render(), "1\n--\nstatus: finished\nsteps: 3\n");
    }
}
