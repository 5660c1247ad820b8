//! Syntax tree produced by the parser.
//!
//! Every node owns its children; nothing is shared. Nodes carry the
//! position of the token that starts them so later phases can point
//! diagnostics back into the source.

use std::fmt::{self, Write};

use crate::source::Position;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Function(FunctionDecl),
    Statement(Stmt),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ident {
    pub name: String,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: Ident,
    pub params: Vec<Ident>,
    pub body: Block,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    VarDecl {
        name: Ident,
        init: Expr,
    },
    Assign {
        target: Ident,
        value: Expr,
    },
    If {
        cond: Expr,
        then_branch: Block,
        else_branch: Option<Box<ElseBranch>>,
    },
    While {
        cond: Expr,
        body: Block,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        update: Option<Box<Stmt>>,
        body: Block,
    },
    Return(Option<Expr>),
    Print(Vec<Expr>),
    Expr(Expr),
    Block(Block),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ElseBranch {
    Block(Block),
    If(Stmt),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Int(i64),
    Real(f64),
    Str(String),
    Bool(bool),
    Var(Ident),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        callee: Ident,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
        }
    }
}

impl BinaryOp {
    pub fn from_symbol(symbol: &str) -> Option<BinaryOp> {
        let op = match symbol {
            "+" => BinaryOp::Add,
            "-" => BinaryOp::Sub,
            "*" => BinaryOp::Mul,
            "/" => BinaryOp::Div,
            "==" => BinaryOp::Eq,
            "!=" => BinaryOp::Ne,
            "<" => BinaryOp::Lt,
            "<=" => BinaryOp::Le,
            ">" => BinaryOp::Gt,
            ">=" => BinaryOp::Ge,
            "&&" => BinaryOp::And,
            "||" => BinaryOp::Or,
            _ => return None,
        };
        Some(op)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

// ---------------------------------------------------------------------
// Tree dump for the `syntax` artifact
// ---------------------------------------------------------------------

/// Render the program as an indented tree, one node per line.
pub fn dump_program(program: &Program) -> String {
    let mut out = String::from("Program\n");
    for item in &program.items {
        match item {
            Item::Function(func) => dump_function(&mut out, func, 1),
            Item::Statement(stmt) => dump_stmt(&mut out, stmt, 1),
        }
    }
    out
}

fn node(out: &mut String, depth: usize, text: fmt::Arguments<'_>, position: Position) {
    let _ = writeln!(out, "{}{} @{}", "  ".repeat(depth), text, position);
}

fn dump_function(out: &mut String, func: &FunctionDecl, depth: usize) {
    let params: Vec<&str> = func.params.iter().map(|p| p.name.as_str()).collect();
    node(
        out,
        depth,
        format_args!("Function {}({})", func.name.name, params.join(", ")),
        func.position,
    );
    dump_block(out, &func.body, depth + 1);
}

fn dump_block(out: &mut String, block: &Block, depth: usize) {
    node(out, depth, format_args!("Block"), block.position);
    for stmt in &block.stmts {
        dump_stmt(out, stmt, depth + 1);
    }
}

fn dump_stmt(out: &mut String, stmt: &Stmt, depth: usize) {
    match &stmt.kind {
        StmtKind::VarDecl { name, init } => {
            node(out, depth, format_args!("VarDecl {}", name.name), stmt.position);
            dump_expr(out, init, depth + 1);
        }
        StmtKind::Assign { target, value } => {
            node(out, depth, format_args!("Assign {}", target.name), stmt.position);
            dump_expr(out, value, depth + 1);
        }
        StmtKind::If {
            cond,
            then_branch,
            else_branch,
        } => {
            node(out, depth, format_args!("If"), stmt.position);
            dump_expr(out, cond, depth + 1);
            dump_block(out, then_branch, depth + 1);
            match else_branch.as_deref() {
                Some(ElseBranch::Block(block)) => {
                    node(out, depth + 1, format_args!("Else"), block.position);
                    dump_block(out, block, depth + 2);
                }
                Some(ElseBranch::If(nested)) => {
                    node(out, depth + 1, format_args!("Else"), nested.position);
                    dump_stmt(out, nested, depth + 2);
                }
                None => {}
            }
        }
        StmtKind::While { cond, body } => {
            node(out, depth, format_args!("While"), stmt.position);
            dump_expr(out, cond, depth + 1);
            dump_block(out, body, depth + 1);
        }
        StmtKind::For {
            init,
            cond,
            update,
            body,
        } => {
            node(out, depth, format_args!("For"), stmt.position);
            if let Some(init) = init {
                dump_stmt(out, init, depth + 1);
            }
            if let Some(cond) = cond {
                dump_expr(out, cond, depth + 1);
            }
            if let Some(update) = update {
                dump_stmt(out, update, depth + 1);
            }
            dump_block(out, body, depth + 1);
        }
        StmtKind::Return(value) => {
            node(out, depth, format_args!("Return"), stmt.position);
            if let Some(value) = value {
                dump_expr(out, value, depth + 1);
            }
        }
        StmtKind::Print(args) => {
            node(out, depth, format_args!("Print"), stmt.position);
            for arg in args {
                dump_expr(out, arg, depth + 1);
            }
        }
        StmtKind::Expr(expr) => {
            node(out, depth, format_args!("ExprStmt"), stmt.position);
            dump_expr(out, expr, depth + 1);
        }
        StmtKind::Block(block) => dump_block(out, block, depth),
    }
}

fn dump_expr(out: &mut String, expr: &Expr, depth: usize) {
    match &expr.kind {
        ExprKind::Int(value) => node(out, depth, format_args!("Int {value}"), expr.position),
        ExprKind::Real(value) => node(out, depth, format_args!("Real {value:?}"), expr.position),
        ExprKind::Str(value) => node(out, depth, format_args!("Str {value:?}"), expr.position),
        ExprKind::Bool(value) => node(out, depth, format_args!("Bool {value}"), expr.position),
        ExprKind::Var(ident) => node(out, depth, format_args!("Var {}", ident.name), expr.position),
        ExprKind::Unary { op, operand } => {
            node(out, depth, format_args!("Unary {}", op.symbol()), expr.position);
            dump_expr(out, operand, depth + 1);
        }
        ExprKind::Binary { op, lhs, rhs } => {
            node(out, depth, format_args!("Binary {op}"), expr.position);
            dump_expr(out, lhs, depth + 1);
            dump_expr(out, rhs, depth + 1);
        }
        ExprKind::Call { callee, args } => {
            node(out, depth, format_args!("Call {}", callee.name), expr.position);
            for arg in args {
                dump_expr(out, arg, depth + 1);
            }
        }
    }
}
