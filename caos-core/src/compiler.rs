//! Pipeline driver.
//!
//! [`run_pipeline`] runs the phases in memory and collects the text of
//! every artifact; [`compile`] wraps it with the file-system side: it
//! empties the artifact directory, reads the source and writes the
//! artifacts the run produced.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::artifact::{ArtifactDir, ArtifactSlot};
use crate::ast::{Program, dump_program};
use crate::codegen_ir::lower;
use crate::diagnostic::{Diagnostic, Phase, render_diagnostics};
use crate::error::CoreError;
use crate::executor::{ExecutionLimits, ExecutionTrace, execute};
use crate::ir::IntermediateProgram;
use crate::lexer::{Token, format_tokens, lex};
use crate::parser::parse;
use crate::semantic::{SemanticModel, analyze};
use crate::source::SourceBuffer;

#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub source: PathBuf,
    pub out_dir: PathBuf,
    /// Last phase to run.
    pub target: Phase,
    pub limits: ExecutionLimits,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            source: PathBuf::new(),
            out_dir: PathBuf::from("."),
            target: Phase::Execution,
            limits: ExecutionLimits::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failed(Phase),
}

impl Outcome {
    pub fn exit_code(self) -> u8 {
        match self {
            Outcome::Success => 0,
            Outcome::Failed(phase) => phase.position(),
        }
    }
}

/// Everything a run produced, phase by phase.
#[derive(Debug)]
pub struct PipelineRun {
    pub target: Phase,
    pub tokens: Vec<Token>,
    pub program: Option<Program>,
    pub semantic: Option<SemanticModel>,
    pub intermediate: Option<IntermediateProgram>,
    pub trace: Option<ExecutionTrace>,
    pub diagnostics: Vec<Diagnostic>,
    pub first_failed: Option<Phase>,
    artifacts: BTreeMap<ArtifactSlot, String>,
}

impl PipelineRun {
    fn new(target: Phase) -> Self {
        PipelineRun {
            target,
            tokens: Vec::new(),
            program: None,
            semantic: None,
            intermediate: None,
            trace: None,
            diagnostics: Vec::new(),
            first_failed: None,
            artifacts: BTreeMap::new(),
        }
    }

    fn source_not_found(path: &Path, target: Phase) -> Self {
        let mut run = PipelineRun::new(target);
        run.diagnostics
            .push(Diagnostic::source_not_found(path.display()));
        run.first_failed = Some(Phase::Lexical);
        run.finish()
    }

    pub fn outcome(&self) -> Outcome {
        match self.first_failed {
            Some(phase) => Outcome::Failed(phase),
            None => Outcome::Success,
        }
    }

    /// Text of a slot; slots the run did not produce are empty.
    pub fn artifact(&self, slot: ArtifactSlot) -> &str {
        self.artifacts.get(&slot).map_or("", String::as_str)
    }

    /// Slots the run produced, in slot order.
    pub fn artifacts(&self) -> impl Iterator<Item = (ArtifactSlot, &str)> {
        self.artifacts
            .iter()
            .map(|(slot, text)| (*slot, text.as_str()))
    }

    fn set(&mut self, slot: ArtifactSlot, text: String) {
        self.artifacts.insert(slot, text);
    }

    /// Record the result of `phase`. Returns the value only when the
    /// phase succeeded and the pipeline should go on.
    fn stage<T>(
        &mut self,
        phase: Phase,
        value: Option<T>,
        diagnostics: Vec<Diagnostic>,
    ) -> Option<T> {
        debug!("[compiler] {phase}: {} diagnostics", diagnostics.len());
        if diagnostics.is_empty() && value.is_some() {
            return value;
        }
        // Phases that keep partial output (tokens, trace) already wrote it.
        let count = diagnostics.len();
        self.artifacts
            .entry(ArtifactSlot::for_phase(phase))
            .or_insert_with(|| {
                format!("{phase}: failed with {count} error(s), see errors.txt\n")
            });
        self.diagnostics.extend(diagnostics);
        self.first_failed = Some(phase);
        None
    }

    fn finish(mut self) -> Self {
        if !self.diagnostics.is_empty() {
            let errors = render_diagnostics(&self.diagnostics);
            self.set(ArtifactSlot::Errors, errors);
        }
        self
    }
}

/// Run the pipeline over `source` up to `target` without touching the
/// file system.
pub fn run_pipeline(source: &str, target: Phase, limits: ExecutionLimits) -> PipelineRun {
    let mut run = PipelineRun::new(target);
    run_phases(&mut run, &SourceBuffer::new(source), limits);
    run.finish()
}

fn run_phases(run: &mut PipelineRun, buffer: &SourceBuffer, limits: ExecutionLimits) {
    let target = run.target;

    let lexed = lex(buffer);
    run.set(ArtifactSlot::Tokens, format_tokens(&lexed.tokens));
    run.tokens = lexed.tokens;
    if run
        .stage(Phase::Lexical, Some(()), lexed.diagnostics)
        .is_none()
        || target == Phase::Lexical
    {
        return;
    }

    let parsed = parse(&run.tokens);
    let Some(program) = run.stage(Phase::Syntactic, parsed.program, parsed.diagnostics) else {
        return;
    };
    run.set(ArtifactSlot::Syntax, dump_program(&program));
    if target == Phase::Syntactic {
        run.program = Some(program);
        return;
    }

    let analyzed = analyze(&program);
    let Some(model) = run.stage(Phase::Semantic, analyzed.model, analyzed.diagnostics) else {
        run.program = Some(program);
        return;
    };
    run.set(ArtifactSlot::Semantic, model.summary());
    run.set(ArtifactSlot::Symbols, model.table.format_table());
    if target == Phase::Semantic {
        run.program = Some(program);
        run.semantic = Some(model);
        return;
    }

    let lowered = lower(&program, &model);
    run.program = Some(program);
    run.semantic = Some(model);
    let Some(intermediate) =
        run.stage(Phase::IntermediateCode, lowered.program, lowered.diagnostics)
    else {
        return;
    };
    run.set(ArtifactSlot::Intermediate, intermediate.dump());
    if target == Phase::IntermediateCode {
        run.intermediate = Some(intermediate);
        return;
    }

    let executed = execute(&intermediate, limits);
    run.intermediate = Some(intermediate);
    run.set(ArtifactSlot::Exec, executed.trace.render());
    run.trace = Some(executed.trace);
    run.stage(Phase::Execution, Some(()), executed.diagnostics);
}

/// Compile the file named in `options`, writing artifacts to its output
/// directory.
///
/// Problems in the program are reported through the returned run; the
/// error case is reserved for failures of the file system itself.
pub fn compile(options: &CompileOptions) -> Result<PipelineRun, CoreError> {
    let artifacts = ArtifactDir::new(&options.out_dir);
    artifacts.truncate_all()?;

    // Undecodable bytes become U+FFFD and surface as invalid characters.
    let run = match fs::read(&options.source) {
        Ok(bytes) => run_pipeline(
            &String::from_utf8_lossy(&bytes),
            options.target,
            options.limits,
        ),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            PipelineRun::source_not_found(&options.source, options.target)
        }
        Err(source) => {
            return Err(CoreError::SourceIo {
                path: options.source.clone(),
                source,
            });
        }
    };

    for (slot, text) in run.artifacts() {
        artifacts.write(slot, text)?;
    }
    info!(
        "[compiler] {} -> {:?} (exit {})",
        options.source.display(),
        run.outcome(),
        run.outcome().exit_code()
    );
    Ok(run)
}
