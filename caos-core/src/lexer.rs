//! Lexer for CAOS.
//!
//! Source is scanned one line at a time. At every position the token
//! classes are tried in a fixed priority order: number, string, keyword,
//! identifier, operator, delimiter. Anything else is reported as an
//! invalid character and skipped, so a single run collects every lexical
//! problem in the file.

use std::fmt;

use log::debug;

use crate::diagnostic::{Diagnostic, DiagnosticKind, Phase};
use crate::source::{Position, SourceBuffer};

/// Reserved words. Identifier-shaped text is checked against this set
/// before it is accepted as an identifier.
pub const KEYWORDS: &[&str] = &[
    "si",
    "sino",
    "mientras",
    "para",
    "funcion",
    "retorna",
    "verdadero",
    "falso",
    "var",
    "imprimir",
];

/// Two-character operators, matched before single characters.
pub const COMPOUND_OPERATORS: &[&str] = &["==", "!=", "<=", ">=", "&&", "||"];

const OPERATOR_CHARS: &[char] = &['+', '-', '*', '/', '=', '<', '>', '!', '&', '|'];
const DELIMITER_CHARS: &[char] = &['(', ')', '{', '}', '[', ']', ';', ',', '.'];

/// Kind of a token produced by the lexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Number,
    String,
    Keyword,
    Identifier,
    Operator,
    Delimiter,
}

impl TokenKind {
    pub fn label(self) -> &'static str {
        match self {
            TokenKind::Number => "NUMBER",
            TokenKind::String => "STRING",
            TokenKind::Keyword => "KEYWORD",
            TokenKind::Identifier => "IDENTIFIER",
            TokenKind::Operator => "OPERATOR",
            TokenKind::Delimiter => "DELIMITER",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A single token. `text` is the exact source slice, quotes included for
/// strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub position: Position,
}

impl Token {
    pub fn line(&self) -> u32 {
        self.position.line
    }

    pub fn column(&self) -> u32 {
        self.position.column
    }

    /// True for a keyword, operator or delimiter with exactly this text.
    pub fn is(&self, text: &str) -> bool {
        matches!(
            self.kind,
            TokenKind::Keyword | TokenKind::Operator | TokenKind::Delimiter
        ) && self.text == text
    }
}

/// Result of lexing a source file.
#[derive(Debug, Default)]
pub struct LexResult {
    pub tokens: Vec<Token>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Lex a source string into tokens.
pub fn tokenize(source: &str) -> LexResult {
    let buffer = SourceBuffer::new(source);
    lex(&buffer)
}

/// Lex an indexed source buffer.
pub fn lex(buffer: &SourceBuffer) -> LexResult {
    let mut result = LexResult::default();
    for (line_no, text) in buffer.lines() {
        let mut lexer = LineLexer {
            line: line_no,
            chars: text.chars().collect(),
            index: 0,
            tokens: &mut result.tokens,
            diagnostics: &mut result.diagnostics,
        };
        lexer.run();
    }
    debug!(
        "[lexer] {} tokens, {} diagnostics",
        result.tokens.len(),
        result.diagnostics.len()
    );
    result
}

struct LineLexer<'a> {
    line: u32,
    chars: Vec<char>,
    index: usize,
    tokens: &'a mut Vec<Token>,
    diagnostics: &'a mut Vec<Diagnostic>,
}

impl LineLexer<'_> {
    fn run(&mut self) {
        while let Some(ch) = self.peek_char() {
            if ch.is_whitespace() {
                self.consume_char();
                continue;
            }
            if ch == '#' {
                // Comment: the rest of the line is ignored.
                self.index = self.chars.len();
                continue;
            }

            let start = self.index;
            if ch.is_ascii_digit() {
                self.lex_number(start);
            } else if ch == '"' {
                self.lex_string(start);
            } else if is_ident_start(ch) {
                self.lex_ident_or_keyword(start);
            } else if OPERATOR_CHARS.contains(&ch) {
                self.lex_operator(start);
            } else if DELIMITER_CHARS.contains(&ch) {
                self.consume_char();
                self.push_token(TokenKind::Delimiter, start);
            } else {
                self.consume_char();
                self.report(
                    DiagnosticKind::InvalidCharacter,
                    format!("invalid character '{ch}'"),
                    start,
                );
            }
        }
    }

    fn lex_number(&mut self, start: usize) {
        self.consume_digits();
        if self.peek_char() == Some('.') && self.peek_next().is_some_and(|c| c.is_ascii_digit()) {
            self.consume_char();
            self.consume_digits();
        }

        let second_fraction =
            self.peek_char() == Some('.') && self.peek_next().is_some_and(|c| c.is_ascii_digit());
        let glued_ident = self.peek_char().is_some_and(is_ident_continue);
        if second_fraction || glued_ident {
            while let Some(ch) = self.peek_char() {
                let dotted_digit =
                    ch == '.' && self.peek_next().is_some_and(|c| c.is_ascii_digit());
                if is_ident_continue(ch) || dotted_digit {
                    self.consume_char();
                } else {
                    break;
                }
            }
            let text = self.slice(start);
            self.report(
                DiagnosticKind::MalformedNumber,
                format!("malformed numeric literal '{text}'"),
                start,
            );
            return;
        }

        self.push_token(TokenKind::Number, start);
    }

    fn lex_string(&mut self, start: usize) {
        self.consume_char(); // opening quote
        while let Some(ch) = self.peek_char() {
            self.consume_char();
            if ch == '"' {
                self.push_token(TokenKind::String, start);
                return;
            }
        }
        self.report(
            DiagnosticKind::UnterminatedString,
            "unterminated string literal".to_string(),
            start,
        );
    }

    fn lex_ident_or_keyword(&mut self, start: usize) {
        while self.peek_char().is_some_and(is_ident_continue) {
            self.consume_char();
        }
        let kind = if KEYWORDS.contains(&self.slice(start).as_str()) {
            TokenKind::Keyword
        } else {
            TokenKind::Identifier
        };
        self.push_token(kind, start);
    }

    fn lex_operator(&mut self, start: usize) {
        self.consume_char();
        if let Some(next) = self.peek_char() {
            let pair: String = [self.chars[start], next].iter().collect();
            if COMPOUND_OPERATORS.contains(&pair.as_str()) {
                self.consume_char();
            }
        }
        self.push_token(TokenKind::Operator, start);
    }

    fn consume_digits(&mut self) {
        while self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
            self.consume_char();
        }
    }

    fn push_token(&mut self, kind: TokenKind, start: usize) {
        let text = self.slice(start);
        self.tokens.push(Token {
            kind,
            text,
            position: self.position(start),
        });
    }

    fn report(&mut self, kind: DiagnosticKind, message: String, start: usize) {
        let position = self.position(start);
        self.diagnostics
            .push(Diagnostic::new(Phase::Lexical, kind, message, position));
    }

    fn slice(&self, start: usize) -> String {
        self.chars[start..self.index].iter().collect()
    }

    fn position(&self, start: usize) -> Position {
        Position::new(self.line, start as u32 + 1)
    }

    fn peek_char(&self) -> Option<char> {
        self.chars.get(self.index).copied()
    }

    fn peek_next(&self) -> Option<char> {
        self.chars.get(self.index + 1).copied()
    }

    fn consume_char(&mut self) {
        if self.index < self.chars.len() {
            self.index += 1;
        }
    }
}

fn is_ident_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_'
}

fn is_ident_continue(ch: char) -> bool {
    is_ident_start(ch) || ch.is_ascii_digit()
}

/// Render the token table written to the `tokens` artifact.
pub fn format_tokens(tokens: &[Token]) -> String {
    if tokens.is_empty() {
        return "(no tokens)\n".to_string();
    }
    let mut out = format!(
        "{:<5} {:<12} {:<20} {:>5} {:>5}\n",
        "#", "KIND", "TEXT", "LINE", "COL"
    );
    out.push_str(&"-".repeat(51));
    out.push('\n');
    for (index, token) in tokens.iter().enumerate() {
        out.push_str(&format!(
            "{:<5} {:<12} {:<20} {:>5} {:>5}\n",
            index + 1,
            token.kind.label(),
            token.text,
            token.line(),
            token.column()
        ));
    }
    out
}
