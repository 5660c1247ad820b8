//! Core compiler pipeline for the CAOS language.
//!
//! The pipeline is a fixed sequence of five phases:
//!
//!   source .caos
//!     -> lexer       (tokens)
//!     -> parser      (syntax tree)
//!     -> semantic    (symbol table + checks)
//!     -> codegen_ir  (stack-machine IR)
//!     -> executor    (execution trace)
//!
//! Every phase returns its own diagnostics. The driver in [`compiler`]
//! stops at the first phase that reports any, writes one artifact file
//! per phase and maps the outcome onto a process exit code. Higher-level
//! tools (CLI, editor runner) should depend on this crate rather than
//! reimplementing the pipeline.

// ---------------------------------------------------------------------
// Error handling and diagnostics
// ---------------------------------------------------------------------

pub mod source;
pub mod diagnostic;
pub mod error;

// ---------------------------------------------------------------------
// Front-end: lexing and parsing
// ---------------------------------------------------------------------

pub mod lexer;
pub mod ast;
pub mod parser;

// ---------------------------------------------------------------------
// Semantic layers: types, symbols, analysis
// ---------------------------------------------------------------------

pub mod types;
pub mod symbols;
pub mod semantic;

// ---------------------------------------------------------------------
// Back-end: intermediate code and execution
// ---------------------------------------------------------------------

pub mod ir;
pub mod codegen_ir;
pub mod executor;

// ---------------------------------------------------------------------
// Driver: artifacts and phase orchestration
// ---------------------------------------------------------------------

pub mod artifact;
pub mod compiler;

// ---------------------------------------------------------------------
// Public API re-exports
// ---------------------------------------------------------------------

pub use artifact::ArtifactSlot;
pub use compiler::{CompileOptions, Outcome, PipelineRun, compile, run_pipeline};
pub use diagnostic::{Diagnostic, DiagnosticKind, Phase, classify_error_line};
pub use error::CoreError;
pub use executor::ExecutionLimits;
