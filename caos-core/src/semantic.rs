//! Semantic analysis: scopes, name resolution and type checks.
//!
//! The analyzer walks the tree once, in source order, after predeclaring
//! every top-level function so that calls may precede declarations.
//! Variables must be declared before use. Every identifier occurrence
//! that resolves is recorded by position, which is how the IR generator
//! finds the symbol behind a name.

use std::collections::{HashMap, HashSet};

use log::debug;

use crate::ast::{
    Block, ElseBranch, Expr, ExprKind, FunctionDecl, Ident, Item, Program, Stmt, StmtKind,
};
use crate::diagnostic::{Diagnostic, DiagnosticKind, Phase};
use crate::source::Position;
use crate::symbols::{ScopeId, ScopeKind, SymbolId, SymbolKind, SymbolTable};
use crate::types::{Type, binary_result, unary_result};

/// Everything later phases need from the analysis.
#[derive(Debug, Clone)]
pub struct SemanticModel {
    pub table: SymbolTable,
    /// Identifier occurrence (declaration or use) to its symbol.
    pub resolutions: HashMap<Position, SymbolId>,
    /// Assignment targets of type real whose value may be an integer.
    pub widened: HashSet<Position>,
}

impl SemanticModel {
    pub fn resolve(&self, ident: &Ident) -> Option<SymbolId> {
        self.resolutions.get(&ident.position).copied()
    }

    /// Whether the symbol lives in a function frame rather than in the
    /// global store.
    pub fn is_local(&self, id: SymbolId) -> bool {
        let symbol = self.table.symbol(id);
        symbol.kind != SymbolKind::Function
            && self.table.enclosing_function(symbol.scope).is_some()
    }

    /// Render the `semantic` artifact.
    pub fn summary(&self) -> String {
        let count = |kind: SymbolKind| {
            self.table
                .symbols()
                .iter()
                .filter(|s| s.kind == kind)
                .count()
        };
        let declarations = self.table.symbols().len();
        let mut out = String::from("Semantic analysis\n=================\n");
        out.push_str(&format!("scopes:      {}\n", self.table.scopes().len()));
        out.push_str(&format!("functions:   {}\n", count(SymbolKind::Function)));
        out.push_str(&format!("variables:   {}\n", count(SymbolKind::Variable)));
        out.push_str(&format!("parameters:  {}\n", count(SymbolKind::Parameter)));
        out.push_str(&format!(
            "references:  {}\n",
            self.resolutions.len() - declarations
        ));
        out.push_str("result:      ok\n");
        out
    }
}

#[derive(Debug)]
pub struct SemanticResult {
    pub model: Option<SemanticModel>,
    pub diagnostics: Vec<Diagnostic>,
}

pub fn analyze(program: &Program) -> SemanticResult {
    let table = SymbolTable::new();
    let scope = table.global_scope();
    let mut analyzer = Analyzer {
        table,
        resolutions: HashMap::new(),
        widened: HashSet::new(),
        diagnostics: Vec::new(),
        scope,
    };
    analyzer.check_program(program);
    debug!(
        "[semantic] {} symbols, {} diagnostics",
        analyzer.table.symbols().len(),
        analyzer.diagnostics.len()
    );

    if analyzer.diagnostics.is_empty() {
        SemanticResult {
            model: Some(SemanticModel {
                table: analyzer.table,
                resolutions: analyzer.resolutions,
                widened: analyzer.widened,
            }),
            diagnostics: Vec::new(),
        }
    } else {
        SemanticResult {
            model: None,
            diagnostics: analyzer.diagnostics,
        }
    }
}

struct Analyzer {
    table: SymbolTable,
    resolutions: HashMap<Position, SymbolId>,
    widened: HashSet<Position>,
    diagnostics: Vec<Diagnostic>,
    scope: ScopeId,
}

impl Analyzer {
    fn error(&mut self, kind: DiagnosticKind, position: Position, message: String) {
        self.diagnostics
            .push(Diagnostic::new(Phase::Semantic, kind, message, position));
    }

    fn check_program(&mut self, program: &Program) {
        for item in &program.items {
            if let Item::Function(func) = item {
                self.declare(
                    &func.name,
                    SymbolKind::Function,
                    Type::Function {
                        arity: func.params.len(),
                    },
                );
            }
        }
        for item in &program.items {
            match item {
                Item::Function(func) => self.check_function(func),
                Item::Statement(stmt) => self.check_stmt(stmt),
            }
        }
    }

    fn declare(&mut self, ident: &Ident, kind: SymbolKind, ty: Type) {
        match self
            .table
            .declare(self.scope, &ident.name, kind, ty, ident.position)
        {
            Ok(id) => {
                self.resolutions.insert(ident.position, id);
            }
            Err(existing) => {
                let first = self.table.symbol(existing).declared_at;
                self.error(
                    DiagnosticKind::DuplicateDeclaration,
                    ident.position,
                    format!(
                        "'{}' is already declared in this scope (first declared in line {}, column {})",
                        ident.name, first.line, first.column
                    ),
                );
            }
        }
    }

    fn enter(&mut self, kind: ScopeKind) -> ScopeId {
        let outer = self.scope;
        self.scope = self.table.push_scope(kind, outer);
        outer
    }

    fn leave(&mut self, outer: ScopeId) {
        self.scope = outer;
    }

    fn check_function(&mut self, func: &FunctionDecl) {
        let outer = self.enter(ScopeKind::Function(func.name.name.clone()));
        for param in &func.params {
            self.declare(param, SymbolKind::Parameter, Type::Unknown);
        }
        // The body shares the function scope with the parameters.
        for stmt in &func.body.stmts {
            self.check_stmt(stmt);
        }
        self.leave(outer);
    }

    fn check_block(&mut self, block: &Block) {
        let outer = self.enter(ScopeKind::Block);
        for stmt in &block.stmts {
            self.check_stmt(stmt);
        }
        self.leave(outer);
    }

    fn check_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::VarDecl { name, init } => {
                let ty = self.check_expr(init);
                self.declare(name, SymbolKind::Variable, ty);
            }
            StmtKind::Assign { target, value } => {
                let value_ty = self.check_expr(value);
                self.check_assign(target, value_ty);
            }
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.check_condition(cond, "si");
                self.check_block(then_branch);
                match else_branch.as_deref() {
                    Some(ElseBranch::Block(block)) => self.check_block(block),
                    Some(ElseBranch::If(nested)) => self.check_stmt(nested),
                    None => {}
                }
            }
            StmtKind::While { cond, body } => {
                self.check_condition(cond, "mientras");
                self.check_block(body);
            }
            StmtKind::For {
                init,
                cond,
                update,
                body,
            } => {
                let outer = self.enter(ScopeKind::Block);
                if let Some(init) = init {
                    self.check_stmt(init);
                }
                if let Some(cond) = cond {
                    self.check_condition(cond, "para");
                }
                if let Some(update) = update {
                    self.check_stmt(update);
                }
                self.check_block(body);
                self.leave(outer);
            }
            StmtKind::Return(value) => {
                if self.table.enclosing_function(self.scope).is_none() {
                    self.error(
                        DiagnosticKind::InvalidReturn,
                        stmt.position,
                        "'retorna' is only allowed inside a function".to_string(),
                    );
                }
                if let Some(value) = value {
                    self.check_expr(value);
                }
            }
            StmtKind::Print(args) => {
                for arg in args {
                    self.check_expr(arg);
                }
            }
            StmtKind::Expr(expr) => {
                self.check_expr(expr);
            }
            StmtKind::Block(block) => self.check_block(block),
        }
    }

    fn check_assign(&mut self, target: &Ident, value_ty: Type) {
        let Some(id) = self.table.lookup(self.scope, &target.name) else {
            self.error(
                DiagnosticKind::UndeclaredReference,
                target.position,
                format!("assignment to undeclared variable '{}'", target.name),
            );
            return;
        };
        self.resolutions.insert(target.position, id);

        let symbol = self.table.symbol(id);
        if symbol.kind == SymbolKind::Function {
            let message = format!("cannot assign to function '{}'", target.name);
            self.error(DiagnosticKind::TypeMismatch, target.position, message);
        } else if !symbol.ty.accepts(value_ty) {
            let message = format!(
                "cannot assign {} to variable '{}' of type {}",
                value_ty, target.name, symbol.ty
            );
            self.error(DiagnosticKind::TypeMismatch, target.position, message);
        } else if symbol.ty == Type::Real && value_ty != Type::Real {
            self.widened.insert(target.position);
        }
    }

    fn check_condition(&mut self, cond: &Expr, construct: &str) {
        let ty = self.check_expr(cond);
        if !matches!(ty, Type::Boolean | Type::Unknown) {
            self.error(
                DiagnosticKind::TypeMismatch,
                cond.position,
                format!("condition of '{construct}' must be boolean, found {ty}"),
            );
        }
    }

    /// Type of `expr`. Errors yield `Unknown` so they do not cascade.
    fn check_expr(&mut self, expr: &Expr) -> Type {
        match &expr.kind {
            ExprKind::Int(_) => Type::Integer,
            ExprKind::Real(_) => Type::Real,
            ExprKind::Str(_) => Type::Str,
            ExprKind::Bool(_) => Type::Boolean,
            ExprKind::Var(ident) => self.check_var(ident),
            ExprKind::Unary { op, operand } => {
                let operand_ty = self.check_expr(operand);
                unary_result(*op, operand_ty).unwrap_or_else(|| {
                    self.error(
                        DiagnosticKind::TypeMismatch,
                        expr.position,
                        format!(
                            "operator '{}' cannot be applied to {}",
                            op.symbol(),
                            operand_ty
                        ),
                    );
                    Type::Unknown
                })
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let lhs_ty = self.check_expr(lhs);
                let rhs_ty = self.check_expr(rhs);
                binary_result(*op, lhs_ty, rhs_ty).unwrap_or_else(|| {
                    self.error(
                        DiagnosticKind::TypeMismatch,
                        expr.position,
                        format!("operator '{op}' cannot be applied to {lhs_ty} and {rhs_ty}"),
                    );
                    Type::Unknown
                })
            }
            ExprKind::Call { callee, args } => {
                for arg in args {
                    self.check_expr(arg);
                }
                self.check_call(callee, args.len());
                Type::Unknown
            }
        }
    }

    fn check_var(&mut self, ident: &Ident) -> Type {
        let Some(id) = self.table.lookup(self.scope, &ident.name) else {
            self.error(
                DiagnosticKind::UndeclaredReference,
                ident.position,
                format!("undeclared identifier '{}'", ident.name),
            );
            return Type::Unknown;
        };
        self.resolutions.insert(ident.position, id);
        let symbol = self.table.symbol(id);
        if symbol.kind == SymbolKind::Function {
            let message = format!("function '{}' cannot be used as a value", ident.name);
            self.error(DiagnosticKind::TypeMismatch, ident.position, message);
            return Type::Unknown;
        }
        symbol.ty
    }

    fn check_call(&mut self, callee: &Ident, given: usize) {
        let Some(id) = self.table.lookup(self.scope, &callee.name) else {
            self.error(
                DiagnosticKind::UndeclaredReference,
                callee.position,
                format!("undeclared function '{}'", callee.name),
            );
            return;
        };
        self.resolutions.insert(callee.position, id);
        match self.table.symbol(id).ty {
            Type::Function { arity } if arity == given => {}
            Type::Function { arity } => {
                let message = format!(
                    "function '{}' expects {arity} arguments but received {given}",
                    callee.name
                );
                self.error(DiagnosticKind::ArityMismatch, callee.position, message);
            }
            _ => {
                let message = format!("'{}' is not a function", callee.name);
                self.error(DiagnosticKind::TypeMismatch, callee.position, message);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::parse;

    fn analyze_source(source: &str) -> SemanticResult {
        let lexed = tokenize(source);
        assert!(lexed.diagnostics.is_empty(), "{:?}", lexed.diagnostics);
        let parsed = parse(&lexed.tokens);
        let program = parsed.program.expect("source should parse");
        analyze(&program)
    }

    fn kinds(result: &SemanticResult) -> Vec<DiagnosticKind> {
        result.diagnostics.iter().map(|d| d.kind).collect()
    }

    #[test]
    fn builds_symbol_table_for_clean_program() {
        let result = analyze_source(
            "var total = 0;\n\
             funcion suma(a, b) { var r = a + b; retorna r; }\n\
             para (var i = 0; i < 3; i = i + 1) { total = total + suma(i, 1); }\n\
             imprimir(total);",
        );
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
        let model = result.model.expect("model");
        let names: Vec<&str> = model
            .table
            .symbols()
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(names, vec!["suma", "total", "a", "b", "r", "i"]);

        let r = model.table.symbols().iter().find(|s| s.name == "r").expect("r");
        assert_eq!(r.ty, Type::Unknown);
        assert!(model.is_local(r.id));
        let total = model.table.symbols().iter().find(|s| s.name == "total").expect("total");
        assert_eq!(total.ty, Type::Integer);
        assert!(!model.is_local(total.id));
        assert!(model.summary().contains("functions:   1"));
    }

    #[test]
    fn requires_declaration_before_use() {
        let result = analyze_source("imprimir(x);\nvar x = 1;\ny = 2;");
        assert_eq!(
            kinds(&result),
            vec![
                DiagnosticKind::UndeclaredReference,
                DiagnosticKind::UndeclaredReference
            ]
        );
        assert_eq!(result.diagnostics[0].position, Some(Position::new(1, 10)));
        assert_eq!(result.diagnostics[1].position, Some(Position::new(3, 1)));
    }

    #[test]
    fn allows_calls_before_function_declaration() {
        let result = analyze_source("imprimir(doble(2));\nfuncion doble(n) { retorna n * 2; }");
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
    }

    #[test]
    fn detects_duplicates_within_a_scope_only() {
        let result = analyze_source(
            "var x = 1;\nvar x = 2;\n{ var x = \"otra\"; }\nfuncion f(a, a) { }",
        );
        assert_eq!(
            kinds(&result),
            vec![
                DiagnosticKind::DuplicateDeclaration,
                DiagnosticKind::DuplicateDeclaration
            ]
        );
        assert!(result.diagnostics[0].message.contains("line 1, column 5"));
        assert_eq!(result.diagnostics[1].line(), 4);
    }

    #[test]
    fn checks_operator_and_assignment_types() {
        let result = analyze_source(
            "var s = \"a\";\nvar n = 1;\nvar b = s - n;\nn = \"x\";\nsi (n) { }\nvar ok = !verdadero && n < 2.5;",
        );
        assert_eq!(
            kinds(&result),
            vec![
                DiagnosticKind::TypeMismatch,
                DiagnosticKind::TypeMismatch,
                DiagnosticKind::TypeMismatch
            ]
        );
        let lines: Vec<u32> = result.diagnostics.iter().map(|d| d.line()).collect();
        assert_eq!(lines, vec![3, 4, 5]);
    }

    #[test]
    fn checks_calls() {
        let result = analyze_source(
            "funcion f(a) { retorna a; }\nvar x = 1;\nf(1, 2);\nx(1);\nvar y = f;\ng();",
        );
        assert_eq!(
            kinds(&result),
            vec![
                DiagnosticKind::ArityMismatch,
                DiagnosticKind::TypeMismatch,
                DiagnosticKind::TypeMismatch,
                DiagnosticKind::UndeclaredReference
            ]
        );
    }

    #[test]
    fn rejects_return_outside_function() {
        let result = analyze_source("retorna 1;");
        assert_eq!(kinds(&result), vec![DiagnosticKind::InvalidReturn]);
    }

    #[test]
    fn functions_see_only_earlier_globals() {
        let result = analyze_source("var a = 1;\nfuncion f() { retorna a + b; }\nvar b = 2;");
        assert_eq!(kinds(&result), vec![DiagnosticKind::UndeclaredReference]);
        assert!(result.diagnostics[0].message.contains("'b'"));
    }

    #[test]
    fn block_scopes_end_at_closing_brace() {
        let result = analyze_source("si (verdadero) { var t = 1; }\nimprimir(t);");
        assert_eq!(kinds(&result), vec![DiagnosticKind::UndeclaredReference]);
    }
}
