//! Recursive-descent parser for CAOS.
//!
//! Grouping delimiters are checked for balance over the whole token
//! stream first; when they are unbalanced the grammar pass is skipped,
//! since every error it would report is a consequence of the imbalance.
//! Otherwise statements are parsed with panic-mode recovery: after an
//! error the parser skips to the next statement boundary and continues,
//! so one run reports every independent syntax error.

use log::debug;

use crate::ast::{
    BinaryOp, Block, ElseBranch, Expr, ExprKind, FunctionDecl, Ident, Item, Program, Stmt,
    StmtKind, UnaryOp,
};
use crate::diagnostic::{Diagnostic, DiagnosticKind, Phase};
use crate::lexer::{Token, TokenKind};
use crate::source::Position;

/// Result of parsing a token stream.
///
/// `program` is `None` exactly when `diagnostics` is non-empty.
#[derive(Debug)]
pub struct ParseResult {
    pub program: Option<Program>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Parse a token stream. An empty stream is a valid, empty program.
pub fn parse(tokens: &[Token]) -> ParseResult {
    let diagnostics = check_balance(tokens);
    if !diagnostics.is_empty() {
        debug!("[parser] {} unbalanced delimiters", diagnostics.len());
        return ParseResult {
            program: None,
            diagnostics,
        };
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        diagnostics: Vec::new(),
    };
    let program = parser.parse_program();
    debug!(
        "[parser] {} items, {} diagnostics",
        program.items.len(),
        parser.diagnostics.len()
    );
    if parser.diagnostics.is_empty() {
        ParseResult {
            program: Some(program),
            diagnostics: Vec::new(),
        }
    } else {
        ParseResult {
            program: None,
            diagnostics: parser.diagnostics,
        }
    }
}

fn closer_for(opener: &str) -> &'static str {
    match opener {
        "(" => ")",
        "[" => "]",
        _ => "}",
    }
}

/// Report every unmatched or mismatched grouping delimiter.
fn check_balance(tokens: &[Token]) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    let mut open: Vec<&Token> = Vec::new();

    for token in tokens.iter().filter(|t| t.kind == TokenKind::Delimiter) {
        match token.text.as_str() {
            "(" | "[" | "{" => open.push(token),
            ")" | "]" | "}" => match open.pop() {
                None => diagnostics.push(Diagnostic::new(
                    Phase::Syntactic,
                    DiagnosticKind::UnbalancedDelimiter,
                    format!("unmatched closing '{}'", token.text),
                    token.position,
                )),
                Some(opener) if closer_for(&opener.text) != token.text => {
                    diagnostics.push(Diagnostic::new(
                        Phase::Syntactic,
                        DiagnosticKind::UnbalancedDelimiter,
                        format!(
                            "mismatched '{}': expected '{}' to close '{}' opened in line {}, column {}",
                            token.text,
                            closer_for(&opener.text),
                            opener.text,
                            opener.line(),
                            opener.column()
                        ),
                        token.position,
                    ));
                }
                Some(_) => {}
            },
            _ => {}
        }
    }

    for opener in open {
        diagnostics.push(Diagnostic::new(
            Phase::Syntactic,
            DiagnosticKind::UnbalancedDelimiter,
            format!(
                "unclosed '{}': expected '{}'",
                opener.text,
                closer_for(&opener.text)
            ),
            opener.position,
        ));
    }
    diagnostics
}

type PResult<T> = Result<T, Diagnostic>;

/// Deepest nesting of blocks, groups, calls, unary operators and
/// operator chains the parser accepts. Every later phase walks the tree
/// recursively, so the bound applies to all of them.
const MAX_NESTING: usize = 128;

/// Keywords that can only start a statement; recovery stops before them.
const STATEMENT_KEYWORDS: &[&str] = &[
    "var", "si", "mientras", "para", "funcion", "retorna", "imprimir",
];

struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
    depth: usize,
    diagnostics: Vec<Diagnostic>,
}

impl<'t> Parser<'t> {
    fn parse_program(&mut self) -> Program {
        let mut program = Program::default();
        while !self.at_end() {
            if self.check("}") {
                // Balanced, but closes nothing that is open here.
                let position = self.advance_position();
                self.diagnostics.push(Diagnostic::new(
                    Phase::Syntactic,
                    DiagnosticKind::UnexpectedToken,
                    "unexpected '}' outside a block",
                    position,
                ));
                continue;
            }
            let start = self.pos;
            let item = if self.check("funcion") {
                self.parse_function().map(Item::Function)
            } else {
                self.parse_stmt().map(Item::Statement)
            };
            match item {
                Ok(item) => program.items.push(item),
                Err(diag) => self.recover(diag, start),
            }
        }
        program
    }

    fn parse_function(&mut self) -> PResult<FunctionDecl> {
        let keyword = self.advance_position();
        let name = self.expect_ident("function name")?;
        self.expect("(", "'(' after function name")?;
        let mut params = Vec::new();
        if !self.check(")") {
            loop {
                params.push(self.expect_ident("parameter name")?);
                if !self.eat(",") {
                    break;
                }
            }
        }
        self.expect(")", "')' after parameters")?;
        let body = self.parse_block()?;
        Ok(FunctionDecl {
            name,
            params,
            body,
            position: keyword,
        })
    }

    fn parse_block(&mut self) -> PResult<Block> {
        self.nested(Self::parse_block_body)
    }

    fn parse_block_body(&mut self) -> PResult<Block> {
        let position = self.current_position();
        self.expect("{", "'{'")?;
        let mut stmts = Vec::new();
        while !self.check("}") && !self.at_end() {
            let start = self.pos;
            match self.parse_stmt() {
                Ok(stmt) => stmts.push(stmt),
                Err(diag) => self.recover(diag, start),
            }
        }
        self.expect("}", "'}' to close block")?;
        Ok(Block { stmts, position })
    }

    fn parse_stmt(&mut self) -> PResult<Stmt> {
        let position = self.current_position();
        let Some(token) = self.peek() else {
            return Err(self.error_at_end(DiagnosticKind::UnexpectedToken, "a statement"));
        };

        let kind = match (token.kind, token.text.as_str()) {
            (TokenKind::Keyword, "funcion") => {
                // Parse the whole declaration so recovery resumes after it.
                let func = self.parse_function()?;
                return Err(Diagnostic::new(
                    Phase::Syntactic,
                    DiagnosticKind::UnexpectedToken,
                    format!(
                        "function '{}' must be declared at top level",
                        func.name.name
                    ),
                    func.position,
                ));
            }
            (TokenKind::Keyword, "var") => {
                let kind = self.parse_var_decl()?;
                self.expect(";", "';' after variable declaration")?;
                kind
            }
            (TokenKind::Keyword, "si") => self.parse_if()?,
            (TokenKind::Keyword, "mientras") => {
                self.advance();
                let cond = self.parse_condition()?;
                let body = self.parse_block()?;
                StmtKind::While { cond, body }
            }
            (TokenKind::Keyword, "para") => self.parse_for()?,
            (TokenKind::Keyword, "retorna") => {
                self.advance();
                let value = if self.check(";") {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.expect(";", "';' after return")?;
                StmtKind::Return(value)
            }
            (TokenKind::Keyword, "imprimir") => {
                self.advance();
                self.expect("(", "'(' after 'imprimir'")?;
                let args = self.parse_args()?;
                self.expect(";", "';' after 'imprimir(...)'")?;
                StmtKind::Print(args)
            }
            (TokenKind::Delimiter, "{") => StmtKind::Block(self.parse_block()?),
            (TokenKind::Identifier, _) if self.peek_is(1, "=") => {
                let kind = self.parse_assign()?;
                self.expect(";", "';' after assignment")?;
                kind
            }
            _ => {
                let expr = self.parse_expr()?;
                self.expect(";", "';' after expression")?;
                StmtKind::Expr(expr)
            }
        };
        Ok(Stmt { kind, position })
    }

    fn parse_var_decl(&mut self) -> PResult<StmtKind> {
        self.advance(); // var
        let name = self.expect_ident("variable name")?;
        self.expect("=", "'=' in variable declaration")?;
        let init = self.parse_expr()?;
        Ok(StmtKind::VarDecl { name, init })
    }

    fn parse_assign(&mut self) -> PResult<StmtKind> {
        let target = self.expect_ident("assignment target")?;
        self.expect("=", "'=' in assignment")?;
        let value = self.parse_expr()?;
        Ok(StmtKind::Assign { target, value })
    }

    fn parse_if(&mut self) -> PResult<StmtKind> {
        self.advance(); // si
        let cond = self.parse_condition()?;
        let then_branch = self.parse_block()?;
        let else_branch = if self.eat("sino") {
            if self.check("si") {
                let position = self.current_position();
                let kind = self.nested(Self::parse_if)?;
                Some(Box::new(ElseBranch::If(Stmt { kind, position })))
            } else {
                Some(Box::new(ElseBranch::Block(self.parse_block()?)))
            }
        } else {
            None
        };
        Ok(StmtKind::If {
            cond,
            then_branch,
            else_branch,
        })
    }

    fn parse_for(&mut self) -> PResult<StmtKind> {
        self.advance(); // para
        self.expect("(", "'(' after 'para'")?;

        let init = if self.check(";") {
            None
        } else {
            let position = self.current_position();
            let kind = if self.check("var") {
                self.parse_var_decl()?
            } else {
                self.parse_assign()?
            };
            Some(Box::new(Stmt { kind, position }))
        };
        self.expect(";", "';' after loop initializer")?;

        let cond = if self.check(";") {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(";", "';' after loop condition")?;

        let update = if self.check(")") {
            None
        } else {
            let position = self.current_position();
            let kind = self.parse_assign()?;
            Some(Box::new(Stmt { kind, position }))
        };
        self.expect(")", "')' after loop header")?;

        let body = self.parse_block()?;
        Ok(StmtKind::For {
            init,
            cond,
            update,
            body,
        })
    }

    fn parse_condition(&mut self) -> PResult<Expr> {
        self.expect("(", "'(' before condition")?;
        let cond = self.parse_expr()?;
        self.expect(")", "')' after condition")?;
        Ok(cond)
    }

    /// Arguments after an already consumed '(' up to and including ')'.
    fn parse_args(&mut self) -> PResult<Vec<Expr>> {
        let mut args = Vec::new();
        if !self.check(")") {
            loop {
                args.push(self.parse_expr()?);
                if !self.eat(",") {
                    break;
                }
            }
        }
        self.expect(")", "')' after arguments")?;
        Ok(args)
    }

    // -----------------------------------------------------------------
    // Expressions, lowest precedence first
    // -----------------------------------------------------------------

    fn parse_expr(&mut self) -> PResult<Expr> {
        self.parse_binary_level(0)
    }

    fn parse_binary_level(&mut self, level: usize) -> PResult<Expr> {
        const LEVELS: &[&[&str]] = &[
            &["||"],
            &["&&"],
            &["==", "!="],
            &["<", "<=", ">", ">="],
            &["+", "-"],
            &["*", "/"],
        ];
        let Some(operators) = LEVELS.get(level) else {
            return self.parse_unary();
        };

        // A chain builds a left-deep tree, one level per operator.
        let outer = self.depth;
        let chain = self.parse_operator_chain(level, operators);
        self.depth = outer;
        chain
    }

    fn parse_operator_chain(&mut self, level: usize, operators: &[&str]) -> PResult<Expr> {
        let mut lhs = self.parse_binary_level(level + 1)?;
        while let Some(op) = self.peek_operator(operators) {
            self.enter()?;
            let position = self.advance_position();
            let rhs = self.parse_binary_level(level + 1)?;
            lhs = Expr {
                kind: ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                position,
            };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        let op = if self.check("-") {
            Some(UnaryOp::Neg)
        } else if self.check("!") {
            Some(UnaryOp::Not)
        } else {
            None
        };
        match op {
            Some(op) => {
                let position = self.advance_position();
                let operand = self.nested(Self::parse_unary)?;
                Ok(Expr {
                    kind: ExprKind::Unary {
                        op,
                        operand: Box::new(operand),
                    },
                    position,
                })
            }
            None => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let Some(token) = self.peek() else {
            return Err(self.error_at_end(DiagnosticKind::UnexpectedToken, "an expression"));
        };
        let position = token.position;

        let kind = match token.kind {
            TokenKind::Number => {
                let kind = parse_number(token)?;
                self.advance();
                kind
            }
            TokenKind::String => {
                let inner = token
                    .text
                    .strip_prefix('"')
                    .and_then(|s| s.strip_suffix('"'))
                    .unwrap_or(&token.text);
                let kind = ExprKind::Str(inner.to_string());
                self.advance();
                kind
            }
            TokenKind::Keyword if token.text == "verdadero" || token.text == "falso" => {
                let kind = ExprKind::Bool(token.text == "verdadero");
                self.advance();
                kind
            }
            TokenKind::Identifier => {
                let ident = Ident {
                    name: token.text.clone(),
                    position,
                };
                self.advance();
                if self.eat("(") {
                    let args = self.nested(Self::parse_args)?;
                    ExprKind::Call {
                        callee: ident,
                        args,
                    }
                } else {
                    ExprKind::Var(ident)
                }
            }
            TokenKind::Delimiter if token.text == "(" => {
                return self.nested(|parser| {
                    parser.advance();
                    let inner = parser.parse_expr()?;
                    parser.expect(")", "')' to close '('")?;
                    Ok(Expr {
                        kind: inner.kind,
                        position,
                    })
                });
            }
            _ => {
                return Err(Diagnostic::new(
                    Phase::Syntactic,
                    DiagnosticKind::UnexpectedToken,
                    format!("unexpected token '{}', expected an expression", token.text),
                    position,
                ));
            }
        };
        Ok(Expr { kind, position })
    }

    // -----------------------------------------------------------------
    // Nesting
    // -----------------------------------------------------------------

    /// Run `parse` one level deeper.
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        self.enter()?;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    /// Go one level deeper, or report the limit. A group opening at the
    /// limit is skipped whole so recovery resumes after its closer.
    fn enter(&mut self) -> PResult<()> {
        if self.depth < MAX_NESTING {
            self.depth += 1;
            return Ok(());
        }
        let position = self.current_position();
        if self.peek().is_some_and(is_opener) {
            self.skip_group();
        }
        Err(Diagnostic::new(
            Phase::Syntactic,
            DiagnosticKind::NestingTooDeep,
            format!("nesting deeper than {MAX_NESTING} levels"),
            position,
        ))
    }

    /// Skip from an opening delimiter past its matching closer. Balance
    /// was checked before parsing, so the closer exists.
    fn skip_group(&mut self) {
        let mut open = 0usize;
        while let Some(token) = self.peek() {
            self.advance();
            if is_opener(token) {
                open += 1;
            } else if is_closer(token) {
                open -= 1;
                if open == 0 {
                    break;
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // Recovery
    // -----------------------------------------------------------------

    /// Record `diag` and skip to the next statement boundary.
    fn recover(&mut self, diag: Diagnostic, start: usize) {
        self.diagnostics.push(diag);
        if self.pos == start && !self.check("}") {
            self.advance();
        }
        while let Some(token) = self.peek() {
            if token.is("}") || STATEMENT_KEYWORDS.iter().any(|kw| token.is(kw)) {
                break;
            }
            self.advance();
            if token.is(";") {
                break;
            }
        }
    }

    // -----------------------------------------------------------------
    // Token helpers
    // -----------------------------------------------------------------

    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    fn peek_is(&self, offset: usize, text: &str) -> bool {
        self.tokens
            .get(self.pos + offset)
            .is_some_and(|t| t.is(text))
    }

    fn peek_operator(&self, operators: &[&str]) -> Option<BinaryOp> {
        let token = self.peek()?;
        if token.kind != TokenKind::Operator || !operators.contains(&token.text.as_str()) {
            return None;
        }
        BinaryOp::from_symbol(&token.text)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn check(&self, text: &str) -> bool {
        self.peek().is_some_and(|t| t.is(text))
    }

    fn eat(&mut self, text: &str) -> bool {
        if self.check(text) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn advance(&mut self) {
        if !self.at_end() {
            self.pos += 1;
        }
    }

    /// Consume the current token and return its position.
    fn advance_position(&mut self) -> Position {
        let position = self.current_position();
        self.advance();
        position
    }

    fn current_position(&self) -> Position {
        self.peek()
            .or_else(|| self.tokens.last())
            .map_or(Position::new(1, 1), |t| t.position)
    }

    fn expect(&mut self, text: &str, what: &str) -> PResult<&'t Token> {
        match self.peek() {
            Some(token) if token.is(text) => {
                self.advance();
                Ok(token)
            }
            Some(token) => Err(Diagnostic::new(
                Phase::Syntactic,
                DiagnosticKind::MissingExpectedToken,
                format!("expected {what}, found '{}'", token.text),
                token.position,
            )),
            None => Err(self.error_at_end(DiagnosticKind::MissingExpectedToken, what)),
        }
    }

    fn expect_ident(&mut self, what: &str) -> PResult<Ident> {
        match self.peek() {
            Some(token) if token.kind == TokenKind::Identifier => {
                self.advance();
                Ok(Ident {
                    name: token.text.clone(),
                    position: token.position,
                })
            }
            Some(token) => Err(Diagnostic::new(
                Phase::Syntactic,
                DiagnosticKind::MissingExpectedToken,
                format!("expected {what}, found '{}'", token.text),
                token.position,
            )),
            None => Err(self.error_at_end(DiagnosticKind::MissingExpectedToken, what)),
        }
    }

    fn error_at_end(&self, kind: DiagnosticKind, what: &str) -> Diagnostic {
        Diagnostic::new(
            Phase::Syntactic,
            kind,
            format!("expected {what}, found end of input"),
            self.current_position(),
        )
    }
}

fn is_opener(token: &Token) -> bool {
    token.kind == TokenKind::Delimiter && matches!(token.text.as_str(), "(" | "[" | "{")
}

fn is_closer(token: &Token) -> bool {
    token.kind == TokenKind::Delimiter && matches!(token.text.as_str(), ")" | "]" | "}")
}

fn parse_number(token: &Token) -> PResult<ExprKind> {
    let invalid = || {
        Diagnostic::new(
            Phase::Syntactic,
            DiagnosticKind::InvalidLiteral,
            format!("numeric literal '{}' is out of range", token.text),
            token.position,
        )
    };
    if token.text.contains('.') {
        let value: f64 = token.text.parse().map_err(|_| invalid())?;
        if !value.is_finite() {
            return Err(invalid());
        }
        Ok(ExprKind::Real(value))
    } else {
        token.text.parse().map(ExprKind::Int).map_err(|_| invalid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn parse_source(source: &str) -> ParseResult {
        let lexed = tokenize(source);
        assert!(lexed.diagnostics.is_empty(), "{:?}", lexed.diagnostics);
        parse(&lexed.tokens)
    }

    fn parse_ok(source: &str) -> Program {
        let result = parse_source(source);
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
        result.program.expect("program")
    }

    #[test]
    fn empty_token_stream_is_empty_program() {
        let program = parse_ok("");
        assert!(program.items.is_empty());
    }

    #[test]
    fn parses_declaration_and_precedence() {
        let program = parse_ok("var x = 1 + 2 * 3;");
        let Item::Statement(Stmt {
            kind: StmtKind::VarDecl { name, init },
            ..
        }) = &program.items[0]
        else {
            panic!("unexpected item {:?}", program.items[0]);
        };
        assert_eq!(name.name, "x");
        let ExprKind::Binary { op, rhs, .. } = &init.kind else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(
            rhs.kind,
            ExprKind::Binary {
                op: BinaryOp::Mul,
                ..
            }
        ));
    }

    #[test]
    fn parses_control_flow_and_functions() {
        let program = parse_ok(
            "funcion fact(n) {\n\
             si (n <= 1) { retorna 1; } sino si (n == 2) { retorna 2; } sino { retorna n * fact(n - 1); }\n\
             }\n\
             para (var i = 0; i < 3; i = i + 1) { imprimir(i, fact(i)); }\n\
             mientras (falso) { }\n",
        );
        assert_eq!(program.items.len(), 3);
        assert!(matches!(program.items[0], Item::Function(ref f) if f.params.len() == 1));
        assert!(matches!(
            program.items[1],
            Item::Statement(Stmt {
                kind: StmtKind::For { .. },
                ..
            })
        ));
    }

    #[test]
    fn reports_missing_semicolon_with_position() {
        let result = parse_source("x = 1\ny = 2;");
        assert!(result.program.is_none());
        assert_eq!(result.diagnostics.len(), 1);
        let diag = &result.diagnostics[0];
        assert_eq!(diag.kind, DiagnosticKind::MissingExpectedToken);
        assert_eq!(diag.position, Some(Position::new(2, 1)));
        assert!(diag.message.contains("';'"));
    }

    #[test]
    fn accumulates_errors_across_statements() {
        let result = parse_source("var = 1;\nx = ;\nimprimir(1);\nvar y 2;");
        let lines: Vec<u32> = result.diagnostics.iter().map(|d| d.line()).collect();
        assert_eq!(lines, vec![1, 2, 4]);
    }

    #[test]
    fn reports_unbalanced_delimiters_only() {
        let result = parse_source("}\nsi (x) { y = (1;\n}");
        assert!(result.program.is_none());
        let kinds: Vec<_> = result.diagnostics.iter().map(|d| d.kind).collect();
        assert!(kinds.iter().all(|k| *k == DiagnosticKind::UnbalancedDelimiter));
        let positions: Vec<_> = result
            .diagnostics
            .iter()
            .filter_map(|d| d.position)
            .collect();
        assert_eq!(
            positions,
            vec![Position::new(1, 1), Position::new(3, 1), Position::new(2, 8)]
        );
        assert!(result.diagnostics[0].message.contains("unmatched"));
        assert!(result.diagnostics[1].message.contains("mismatched"));
        assert!(result.diagnostics[2].message.contains("unclosed"));
    }

    fn positions(result: &ParseResult) -> Vec<Position> {
        result.diagnostics.iter().filter_map(|d| d.position).collect()
    }

    #[test]
    fn recovery_stops_before_closing_brace() {
        let result = parse_source("funcion f() {\n  var a = 1 2\n}\nvar b = ;");
        assert_eq!(
            positions(&result),
            vec![Position::new(2, 13), Position::new(4, 9)]
        );
    }

    #[test]
    fn recovery_stops_before_statement_keyword() {
        let result = parse_source("var a = 1\nimprimir(a);\nvar b = ;");
        assert_eq!(
            positions(&result),
            vec![Position::new(2, 1), Position::new(3, 9)]
        );
    }

    #[test]
    fn recovers_from_stray_closing_brace() {
        let result = parse_source("si (x) 1 { }");
        let kinds: Vec<_> = result.diagnostics.iter().map(|d| d.kind).collect();
        assert_eq!(
            kinds,
            vec![
                DiagnosticKind::MissingExpectedToken,
                DiagnosticKind::UnexpectedToken
            ]
        );
        assert_eq!(
            positions(&result),
            vec![Position::new(1, 8), Position::new(1, 12)]
        );
    }

    #[test]
    fn rejects_deep_nesting_once() {
        let sources = [
            format!("x = {}1{};", "(".repeat(1000), ")".repeat(1000)),
            format!("x = {}1;", "-".repeat(1000)),
            format!("x = 1{};", " + 1".repeat(1000)),
            format!("{}{}", "{".repeat(1000), "}".repeat(1000)),
            format!("x = {}1{};", "f(".repeat(1000), ")".repeat(1000)),
        ];
        for source in &sources {
            let result = parse_source(&format!("{source}\nimprimir(1);"));
            assert_eq!(result.diagnostics.len(), 1, "{:?}", result.diagnostics);
            assert_eq!(result.diagnostics[0].kind, DiagnosticKind::NestingTooDeep);
            assert_eq!(result.diagnostics[0].line(), 1);
        }

        let result = parse_source(&sources[0]);
        assert_eq!(positions(&result), vec![Position::new(1, 133)]);
    }

    #[test]
    fn accepts_nesting_below_the_limit() {
        let source = format!(
            "x = {}1{};\ny = 1{};\n{}{}",
            "(".repeat(100),
            ")".repeat(100),
            " * 2".repeat(100),
            "{".repeat(100),
            "}".repeat(100)
        );
        let program = parse_ok(&source);
        assert_eq!(program.items.len(), 3);
    }

    #[test]
    fn rejects_nested_function() {
        let result = parse_source("{ funcion f() { retorna 1; } }\nimprimir(2);");
        assert_eq!(result.diagnostics.len(), 1);
        assert!(result.diagnostics[0].message.contains("top level"));
    }

    #[test]
    fn reports_unexpected_token_and_end_of_input() {
        let result = parse_source("x = 1 & 2;");
        assert_eq!(result.diagnostics[0].kind, DiagnosticKind::MissingExpectedToken);

        let result = parse_source("imprimir(1)");
        assert_eq!(result.diagnostics.len(), 1);
        assert!(result.diagnostics[0].message.contains("end of input"));
        assert_eq!(result.diagnostics[0].position, Some(Position::new(1, 11)));

        let result = parse_source(";");
        assert_eq!(result.diagnostics[0].kind, DiagnosticKind::UnexpectedToken);
    }

    #[test]
    fn rejects_out_of_range_integer() {
        let result = parse_source("x = 99999999999999999999;");
        assert_eq!(result.diagnostics[0].kind, DiagnosticKind::InvalidLiteral);
    }

    #[test]
    fn is_deterministic() {
        let source = "var = ;\nsi x {\n}\nfuncion (a) {}";
        let first = parse_source(source).diagnostics;
        let second = parse_source(source).diagnostics;
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }
}
