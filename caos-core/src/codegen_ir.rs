//! Lowering from the checked syntax tree to stack-machine IR.
//!
//! Slots are assigned in the order declarations are lowered, and units in
//! function declaration order, so the same input always produces the same
//! program.

use std::collections::HashMap;

use log::debug;

use crate::ast::{
    BinaryOp, Block, ElseBranch, Expr, ExprKind, FunctionDecl, Ident, Item, Program, Stmt,
    StmtKind,
};
use crate::diagnostic::{Diagnostic, DiagnosticKind, Phase};
use crate::ir::{Instr, IntermediateProgram, MAIN_UNIT, Unit};
use crate::semantic::SemanticModel;
use crate::source::Position;
use crate::symbols::SymbolId;

#[derive(Debug)]
pub struct LowerResult {
    pub program: Option<IntermediateProgram>,
    pub diagnostics: Vec<Diagnostic>,
}

pub fn lower(program: &Program, model: &SemanticModel) -> LowerResult {
    let mut generator = Generator {
        model,
        globals: HashMap::new(),
        global_names: Vec::new(),
        functions: HashMap::new(),
        diagnostics: Vec::new(),
    };
    let lowered = generator.lower_program(program);
    debug!(
        "[codegen_ir] {} units, {} instructions, {} diagnostics",
        lowered.units.len(),
        lowered.instruction_count(),
        generator.diagnostics.len()
    );
    if generator.diagnostics.is_empty() {
        LowerResult {
            program: Some(lowered),
            diagnostics: Vec::new(),
        }
    } else {
        LowerResult {
            program: None,
            diagnostics: generator.diagnostics,
        }
    }
}

type LResult = Result<(), Diagnostic>;

#[derive(Debug, Clone, Copy)]
enum Slot {
    Global(u32),
    Local(u32),
}

struct UnitBuilder {
    unit: Unit,
    locals: HashMap<SymbolId, u32>,
}

impl UnitBuilder {
    fn emit(&mut self, instr: Instr, position: Position) -> usize {
        self.unit.emit(instr, position)
    }

    fn here(&self) -> usize {
        self.unit.next_index()
    }

    fn patch_here(&mut self, at: usize) {
        let target = self.here();
        self.unit.patch(at, target);
    }
}

struct Generator<'m> {
    model: &'m SemanticModel,
    globals: HashMap<SymbolId, u32>,
    global_names: Vec<String>,
    functions: HashMap<SymbolId, u32>,
    diagnostics: Vec<Diagnostic>,
}

impl Generator<'_> {
    fn lower_program(&mut self, program: &Program) -> IntermediateProgram {
        let functions: Vec<&FunctionDecl> = program
            .items
            .iter()
            .filter_map(|item| match item {
                Item::Function(func) => Some(func),
                Item::Statement(_) => None,
            })
            .collect();

        for (index, func) in functions.iter().enumerate() {
            match self.model.resolve(&func.name) {
                Some(id) => {
                    self.functions.insert(id, index as u32 + 1);
                }
                None => self.diagnostics.push(unresolved(&func.name)),
            }
        }

        let mut main = UnitBuilder {
            unit: Unit::new(MAIN_UNIT, 0),
            locals: HashMap::new(),
        };
        let mut last = Position::new(1, 1);
        for item in &program.items {
            if let Item::Statement(stmt) = item {
                last = stmt.position;
                if let Err(diag) = self.lower_stmt(&mut main, stmt) {
                    self.diagnostics.push(diag);
                }
            }
        }
        main.emit(Instr::Halt, last);

        let mut units = vec![main.unit];
        for func in functions {
            units.push(self.lower_function(func));
        }

        IntermediateProgram {
            globals: std::mem::take(&mut self.global_names),
            units,
        }
    }

    fn lower_function(&mut self, func: &FunctionDecl) -> Unit {
        let mut builder = UnitBuilder {
            unit: Unit::new(func.name.name.clone(), func.params.len() as u32),
            locals: HashMap::new(),
        };
        for param in &func.params {
            if let Err(diag) = self.slot(&mut builder, param) {
                self.diagnostics.push(diag);
            }
        }
        for stmt in &func.body.stmts {
            if let Err(diag) = self.lower_stmt(&mut builder, stmt) {
                self.diagnostics.push(diag);
            }
        }
        builder.emit(Instr::ReturnUnit, func.body.position);
        builder.unit
    }

    /// Slot of the symbol behind `ident`, allocating it on first sight.
    fn slot(&mut self, builder: &mut UnitBuilder, ident: &Ident) -> Result<Slot, Diagnostic> {
        let id = self.model.resolve(ident).ok_or_else(|| unresolved(ident))?;
        if self.model.is_local(id) {
            if let Some(&slot) = builder.locals.get(&id) {
                return Ok(Slot::Local(slot));
            }
            let slot = builder.locals.len() as u32;
            builder.locals.insert(id, slot);
            builder.unit.locals.push(ident.name.clone());
            Ok(Slot::Local(slot))
        } else {
            if let Some(&slot) = self.globals.get(&id) {
                return Ok(Slot::Global(slot));
            }
            let slot = self.global_names.len() as u32;
            self.globals.insert(id, slot);
            self.global_names.push(ident.name.clone());
            Ok(Slot::Global(slot))
        }
    }

    fn store(&mut self, builder: &mut UnitBuilder, ident: &Ident) -> LResult {
        let instr = match self.slot(builder, ident)? {
            Slot::Global(slot) => Instr::StoreGlobal(slot),
            Slot::Local(slot) => Instr::StoreLocal(slot),
        };
        builder.emit(instr, ident.position);
        Ok(())
    }

    fn lower_block(&mut self, builder: &mut UnitBuilder, block: &Block) -> LResult {
        for stmt in &block.stmts {
            self.lower_stmt(builder, stmt)?;
        }
        Ok(())
    }

    fn lower_stmt(&mut self, builder: &mut UnitBuilder, stmt: &Stmt) -> LResult {
        let position = stmt.position;
        match &stmt.kind {
            StmtKind::VarDecl { name, init } => {
                self.lower_expr(builder, init)?;
                self.store(builder, name)?;
            }
            StmtKind::Assign { target, value } => {
                self.lower_expr(builder, value)?;
                if self.model.widened.contains(&target.position) {
                    builder.emit(Instr::ToReal, target.position);
                }
                self.store(builder, target)?;
            }
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.lower_expr(builder, cond)?;
                let skip_then = builder.emit(Instr::JumpIfFalse(0), position);
                self.lower_block(builder, then_branch)?;
                match else_branch.as_deref() {
                    Some(branch) => {
                        let skip_else = builder.emit(Instr::Jump(0), position);
                        builder.patch_here(skip_then);
                        match branch {
                            ElseBranch::Block(block) => self.lower_block(builder, block)?,
                            ElseBranch::If(nested) => self.lower_stmt(builder, nested)?,
                        }
                        builder.patch_here(skip_else);
                    }
                    None => builder.patch_here(skip_then),
                }
            }
            StmtKind::While { cond, body } => {
                let start = builder.here();
                self.lower_expr(builder, cond)?;
                let exit = builder.emit(Instr::JumpIfFalse(0), position);
                self.lower_block(builder, body)?;
                builder.emit(Instr::Jump(start), position);
                builder.patch_here(exit);
            }
            StmtKind::For {
                init,
                cond,
                update,
                body,
            } => {
                if let Some(init) = init {
                    self.lower_stmt(builder, init)?;
                }
                let start = builder.here();
                let exit = match cond {
                    Some(cond) => {
                        self.lower_expr(builder, cond)?;
                        Some(builder.emit(Instr::JumpIfFalse(0), position))
                    }
                    None => None,
                };
                self.lower_block(builder, body)?;
                if let Some(update) = update {
                    self.lower_stmt(builder, update)?;
                }
                builder.emit(Instr::Jump(start), position);
                if let Some(exit) = exit {
                    builder.patch_here(exit);
                }
            }
            StmtKind::Return(value) => match value {
                Some(value) => {
                    self.lower_expr(builder, value)?;
                    builder.emit(Instr::Return, position);
                }
                None => {
                    builder.emit(Instr::ReturnUnit, position);
                }
            },
            StmtKind::Print(args) => {
                for arg in args {
                    self.lower_expr(builder, arg)?;
                }
                builder.emit(Instr::Print(args.len() as u32), position);
            }
            StmtKind::Expr(expr) => {
                self.lower_expr(builder, expr)?;
                builder.emit(Instr::Pop, position);
            }
            StmtKind::Block(block) => self.lower_block(builder, block)?,
        }
        Ok(())
    }

    fn lower_expr(&mut self, builder: &mut UnitBuilder, expr: &Expr) -> LResult {
        let position = expr.position;
        match &expr.kind {
            ExprKind::Int(v) => {
                builder.emit(Instr::PushInt(*v), position);
            }
            ExprKind::Real(v) => {
                builder.emit(Instr::PushReal(*v), position);
            }
            ExprKind::Str(v) => {
                builder.emit(Instr::PushStr(v.clone()), position);
            }
            ExprKind::Bool(v) => {
                builder.emit(Instr::PushBool(*v), position);
            }
            ExprKind::Var(ident) => {
                let instr = match self.slot(builder, ident)? {
                    Slot::Global(slot) => Instr::LoadGlobal(slot),
                    Slot::Local(slot) => Instr::LoadLocal(slot),
                };
                builder.emit(instr, position);
            }
            ExprKind::Unary { op, operand } => {
                self.lower_expr(builder, operand)?;
                builder.emit(Instr::Unary(*op), position);
            }
            ExprKind::Binary {
                op: op @ (BinaryOp::And | BinaryOp::Or),
                lhs,
                rhs,
            } => {
                // a && b: both must be true; a || b: either may be.
                let short_circuit = |target| match op {
                    BinaryOp::And => Instr::JumpIfFalse(target),
                    _ => Instr::JumpIfTrue(target),
                };
                let decided = *op == BinaryOp::Or;
                self.lower_expr(builder, lhs)?;
                let first = builder.emit(short_circuit(0), position);
                self.lower_expr(builder, rhs)?;
                let second = builder.emit(short_circuit(0), position);
                builder.emit(Instr::PushBool(!decided), position);
                let done = builder.emit(Instr::Jump(0), position);
                builder.patch_here(first);
                builder.patch_here(second);
                builder.emit(Instr::PushBool(decided), position);
                builder.patch_here(done);
            }
            ExprKind::Binary { op, lhs, rhs } => {
                self.lower_expr(builder, lhs)?;
                self.lower_expr(builder, rhs)?;
                builder.emit(Instr::Binary(*op), position);
            }
            ExprKind::Call { callee, args } => {
                let unit = self
                    .model
                    .resolve(callee)
                    .and_then(|id| self.functions.get(&id).copied())
                    .ok_or_else(|| unresolved(callee))?;
                for arg in args {
                    self.lower_expr(builder, arg)?;
                }
                builder.emit(
                    Instr::Call {
                        unit,
                        argc: args.len() as u32,
                    },
                    position,
                );
            }
        }
        Ok(())
    }
}

fn unresolved(ident: &Ident) -> Diagnostic {
    Diagnostic::new(
        Phase::IntermediateCode,
        DiagnosticKind::LoweringFault,
        format!("no symbol recorded for '{}'", ident.name),
        ident.position,
    )
}
