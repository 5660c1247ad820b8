//! Stack-machine intermediate representation.
//!
//! A program is a table of global slots plus a list of units. Unit 0 is
//! `main`, holding the top-level statements; every function gets its own
//! unit in declaration order. Jump targets are instruction indices within
//! the unit.

use std::fmt::{self, Write};

use crate::ast::{BinaryOp, UnaryOp};
use crate::source::Position;

pub const MAIN_UNIT: &str = "main";

#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    PushInt(i64),
    PushReal(f64),
    PushStr(String),
    PushBool(bool),
    LoadGlobal(u32),
    StoreGlobal(u32),
    LoadLocal(u32),
    StoreLocal(u32),
    Unary(UnaryOp),
    /// Widen an integer to a real; reals pass through.
    ToReal,
    Binary(BinaryOp),
    Jump(usize),
    JumpIfFalse(usize),
    JumpIfTrue(usize),
    Call { unit: u32, argc: u32 },
    Return,
    ReturnUnit,
    Print(u32),
    Pop,
    Halt,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    pub name: String,
    pub params: u32,
    /// Names of the frame slots; parameters come first.
    pub locals: Vec<String>,
    pub code: Vec<Instr>,
    /// Source position of each instruction, parallel to `code`.
    pub positions: Vec<Position>,
}

impl Unit {
    pub fn new(name: impl Into<String>, params: u32) -> Self {
        Unit {
            name: name.into(),
            params,
            locals: Vec::new(),
            code: Vec::new(),
            positions: Vec::new(),
        }
    }

    pub fn emit(&mut self, instr: Instr, position: Position) -> usize {
        self.code.push(instr);
        self.positions.push(position);
        self.code.len() - 1
    }

    /// Index the next emitted instruction will get.
    pub fn next_index(&self) -> usize {
        self.code.len()
    }

    /// Point the jump at `at` to `target`.
    pub fn patch(&mut self, at: usize, target: usize) {
        match &mut self.code[at] {
            Instr::Jump(t) | Instr::JumpIfFalse(t) | Instr::JumpIfTrue(t) => *t = target,
            _ => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct IntermediateProgram {
    pub globals: Vec<String>,
    pub units: Vec<Unit>,
}

impl IntermediateProgram {
    pub fn instruction_count(&self) -> usize {
        self.units.iter().map(|u| u.code.len()).sum()
    }

    /// Render the `intermediate` artifact.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "globals: {}", self.globals.len());
        for (index, name) in self.globals.iter().enumerate() {
            let _ = writeln!(out, "  g{index} {name}");
        }
        for (index, unit) in self.units.iter().enumerate() {
            let _ = writeln!(
                out,
                "\nunit {index} {}(params: {}, locals: {})",
                unit.name,
                unit.params,
                unit.locals.len()
            );
            for (at, instr) in unit.code.iter().enumerate() {
                let _ = writeln!(out, "  {at:04}  {}", self.render(unit, instr));
            }
        }
        out
    }

    fn render(&self, unit: &Unit, instr: &Instr) -> String {
        let name = |names: &[String], slot: u32| {
            names.get(slot as usize).cloned().unwrap_or_default()
        };
        match instr {
            Instr::LoadGlobal(slot) => format!("LOAD_GLOBAL  g{slot} ; {}", name(&self.globals, *slot)),
            Instr::StoreGlobal(slot) => format!("STORE_GLOBAL g{slot} ; {}", name(&self.globals, *slot)),
            Instr::LoadLocal(slot) => format!("LOAD_LOCAL   l{slot} ; {}", name(&unit.locals, *slot)),
            Instr::StoreLocal(slot) => format!("STORE_LOCAL  l{slot} ; {}", name(&unit.locals, *slot)),
            Instr::Call { unit: callee, argc } => {
                let callee_name = self
                    .units
                    .get(*callee as usize)
                    .map_or("?", |u| u.name.as_str());
                format!("CALL         u{callee} {argc} ; {callee_name}")
            }
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::PushInt(v) => write!(f, "PUSH_INT     {v}"),
            Instr::PushReal(v) => write!(f, "PUSH_REAL    {v:?}"),
            Instr::PushStr(v) => write!(f, "PUSH_STR     {v:?}"),
            Instr::PushBool(v) => write!(f, "PUSH_BOOL    {v}"),
            Instr::LoadGlobal(s) => write!(f, "LOAD_GLOBAL  g{s}"),
            Instr::StoreGlobal(s) => write!(f, "STORE_GLOBAL g{s}"),
            Instr::LoadLocal(s) => write!(f, "LOAD_LOCAL   l{s}"),
            Instr::StoreLocal(s) => write!(f, "STORE_LOCAL  l{s}"),
            Instr::Unary(UnaryOp::Neg) => f.write_str("NEG"),
            Instr::Unary(UnaryOp::Not) => f.write_str("NOT"),
            Instr::ToReal => f.write_str("TO_REAL"),
            Instr::Binary(op) => f.write_str(binary_mnemonic(*op)),
            Instr::Jump(t) => write!(f, "JUMP         {t:04}"),
            Instr::JumpIfFalse(t) => write!(f, "JUMP_FALSE   {t:04}"),
            Instr::JumpIfTrue(t) => write!(f, "JUMP_TRUE    {t:04}"),
            Instr::Call { unit, argc } => write!(f, "CALL         u{unit} {argc}"),
            Instr::Return => f.write_str("RETURN"),
            Instr::ReturnUnit => f.write_str("RETURN_UNIT"),
            Instr::Print(argc) => write!(f, "PRINT        {argc}"),
            Instr::Pop => f.write_str("POP"),
            Instr::Halt => f.write_str("HALT"),
        }
    }
}

fn binary_mnemonic(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "ADD",
        BinaryOp::Sub => "SUB",
        BinaryOp::Mul => "MUL",
        BinaryOp::Div => "DIV",
        BinaryOp::Eq => "EQ",
        BinaryOp::Ne => "NE",
        BinaryOp::Lt => "LT",
        BinaryOp::Le => "LE",
        BinaryOp::Gt => "GT",
        BinaryOp::Ge => "GE",
        // Short-circuit operators are lowered to jumps and never emitted.
        BinaryOp::And => "AND",
        BinaryOp::Or => "OR",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patches_jump_targets() {
        let mut unit = Unit::new(MAIN_UNIT, 0);
        let pos = Position::new(1, 1);
        let jump = unit.emit(Instr::JumpIfFalse(0), pos);
        unit.emit(Instr::PushInt(1), pos);
        let target = unit.next_index();
        unit.emit(Instr::Halt, pos);
        unit.patch(jump, target);
        assert_eq!(unit.code[0], Instr::JumpIfFalse(2));
        assert_eq!(unit.positions.len(), unit.code.len());
    }

    #[test]
    fn dump_names_slots_and_callees() {
        let pos = Position::new(1, 1);
        let mut main = Unit::new(MAIN_UNIT, 0);
        main.emit(Instr::PushInt(2), pos);
        main.emit(Instr::Call { unit: 1, argc: 1 }, pos);
        main.emit(Instr::StoreGlobal(0), pos);
        main.emit(Instr::Halt, pos);
        let mut doble = Unit::new("doble", 1);
        doble.locals.push("n".into());
        doble.emit(Instr::LoadLocal(0), pos);
        doble.emit(Instr::Return, pos);
        let program = IntermediateProgram {
            globals: vec!["x".into()],
            units: vec![main, doble],
        };
        let dump = program.dump();
        assert!(dump.contains("  g0 x\n"));
        assert!(dump.contains("0001  CALL         u1 1 ; doble"));
        assert!(dump.contains("0002  STORE_GLOBAL g0 ; x"));
        assert!(dump.contains("unit 1 doble(params: 1, locals: 1)"));
        assert!(dump.contains("0000  LOAD_LOCAL   l0 ; n"));
        assert_eq!(program.instruction_count(), 6);
    }
}
