//! Phases and the diagnostics they report.
//!
//! Diagnostics cross the process boundary as plain text lines tagged with
//! the phase, e.g. `[SINTACTICO] expected ';' in line 3, column 7`.
//! [`classify_error_line`] is the inverse used by callers to route a line
//! back to its phase without knowing anything else about the pipeline.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::source::Position;

/// The five pipeline phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Lexical,
    Syntactic,
    Semantic,
    IntermediateCode,
    Execution,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::Lexical,
        Phase::Syntactic,
        Phase::Semantic,
        Phase::IntermediateCode,
        Phase::Execution,
    ];

    /// 1-based position in the pipeline. Doubles as the exit code of a
    /// run that failed in this phase.
    pub fn position(self) -> u8 {
        match self {
            Phase::Lexical => 1,
            Phase::Syntactic => 2,
            Phase::Semantic => 3,
            Phase::IntermediateCode => 4,
            Phase::Execution => 5,
        }
    }

    pub fn from_position(position: i32) -> Option<Phase> {
        Phase::ALL
            .into_iter()
            .find(|phase| i32::from(phase.position()) == position)
    }

    /// Tag written between brackets in the error log.
    pub fn tag(self) -> &'static str {
        match self {
            Phase::Lexical => "LEXICO",
            Phase::Syntactic => "SINTACTICO",
            Phase::Semantic => "SEMANTICO",
            Phase::IntermediateCode => "INTERMEDIO",
            Phase::Execution => "EJECUCION",
        }
    }

    /// Name accepted on the command line.
    pub fn name(self) -> &'static str {
        match self {
            Phase::Lexical => "lexico",
            Phase::Syntactic => "sintactico",
            Phase::Semantic => "semantico",
            Phase::IntermediateCode => "intermedio",
            Phase::Execution => "ejecutar",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "unknown phase '{0}' (expected one of: lexico, sintactico, semantico, intermedio, ejecutar)"
)]
pub struct UnknownPhase(pub String);

impl FromStr for Phase {
    type Err = UnknownPhase;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lexico" | "lexical" => Ok(Phase::Lexical),
            "sintactico" | "syntactic" => Ok(Phase::Syntactic),
            "semantico" | "semantic" => Ok(Phase::Semantic),
            "intermedio" | "intermediate" => Ok(Phase::IntermediateCode),
            "ejecutar" | "ejecucion" | "execution" => Ok(Phase::Execution),
            _ => Err(UnknownPhase(s.to_string())),
        }
    }
}

/// What went wrong, independent of the message wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    // Lexical
    InvalidCharacter,
    UnterminatedString,
    MalformedNumber,
    SourceNotFound,

    // Syntactic
    UnexpectedToken,
    MissingExpectedToken,
    UnbalancedDelimiter,
    InvalidLiteral,
    NestingTooDeep,

    // Semantic
    DuplicateDeclaration,
    UndeclaredReference,
    TypeMismatch,
    ArityMismatch,
    InvalidReturn,

    // Intermediate code
    LoweringFault,

    // Execution
    RuntimeFault,
}

/// A single problem reported by a phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub phase: Phase,
    pub kind: DiagnosticKind,
    pub message: String,
    /// Absent only when there is no source to point into.
    pub position: Option<Position>,
}

impl Diagnostic {
    pub fn new(
        phase: Phase,
        kind: DiagnosticKind,
        message: impl Into<String>,
        position: Position,
    ) -> Self {
        Diagnostic {
            phase,
            kind,
            message: message.into(),
            position: Some(position),
        }
    }

    pub fn source_not_found(path: impl fmt::Display) -> Self {
        Diagnostic {
            phase: Phase::Lexical,
            kind: DiagnosticKind::SourceNotFound,
            message: format!("source file not found: {path}"),
            position: None,
        }
    }

    pub fn line(&self) -> u32 {
        self.position.map_or(0, |p| p.line)
    }

    pub fn column(&self) -> u32 {
        self.position.map_or(0, |p| p.column)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.phase.tag(), self.message)?;
        if let Some(position) = self.position {
            write!(f, " in line {}, column {}", position.line, position.column)?;
        }
        Ok(())
    }
}

/// Render diagnostics the way the `errors` artifact stores them.
pub fn render_diagnostics(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Substrings recognised inside a bracketed tag, checked in order.
const TAG_KEYWORDS: &[(&str, Phase)] = &[
    ("lexico", Phase::Lexical),
    ("lexical", Phase::Lexical),
    ("sintactico", Phase::Syntactic),
    ("syntax", Phase::Syntactic),
    ("syntactic", Phase::Syntactic),
    ("semantico", Phase::Semantic),
    ("semantic", Phase::Semantic),
    ("intermedio", Phase::IntermediateCode),
    ("intermediate", Phase::IntermediateCode),
    ("ejecucion", Phase::Execution),
    ("execution", Phase::Execution),
    ("runtime", Phase::Execution),
];

/// Route an error-log line to its phase.
///
/// The line must start with a bracketed tag; the tag is matched
/// case-insensitively by substring. Returns `None` for untagged lines.
pub fn classify_error_line(line: &str) -> Option<Phase> {
    let rest = line.trim_start().strip_prefix('[')?;
    let close = rest.find(']')?;
    let tag = rest[..close].to_lowercase();
    TAG_KEYWORDS
        .iter()
        .find(|(keyword, _)| tag.contains(keyword))
        .map(|&(_, phase)| phase)
}
