//! Caller-side driver for the `caosc` compiler.
//!
//! Editors and test harnesses run the compiler as a separate process so a
//! misbehaving program cannot take the caller down with it. The runner
//! launches `caosc`, enforces a wall-clock timeout, then collects the
//! artifacts and sorts the error log by phase.

use std::collections::BTreeMap;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use caos_core::artifact::ArtifactDir;
use caos_core::{ArtifactSlot, Phase, classify_error_line};
use log::{debug, warn};
use thiserror::Error;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Compiler executable; a bare name is looked up on `PATH`.
    pub compiler: PathBuf,
    pub outputs_dir: PathBuf,
    pub timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        RunnerConfig {
            compiler: PathBuf::from("caosc"),
            outputs_dir: PathBuf::from("outputs"),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Ways the compiler process itself can fail. These are kept apart from
/// phase failures: a run that never finished says nothing about the
/// program.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("compiler exceeded the time limit of {} seconds", .0.as_secs_f64())]
    Timeout(Duration),
    #[error("compiler not found at {0}")]
    CompilerNotFound(PathBuf),
    #[error("failed to launch compiler {path}: {source}")]
    Launch {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("compiler was terminated by a signal")]
    Terminated,
}

impl RunnerError {
    /// Outcome code reported in place of an exit status. Always negative
    /// so it cannot collide with a phase position.
    pub fn code(&self) -> i32 {
        match self {
            RunnerError::Timeout(_) => -1,
            RunnerError::CompilerNotFound(_) => -2,
            RunnerError::Launch { .. } | RunnerError::Terminated => -3,
        }
    }
}

/// Where a failed run went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailedPhase {
    Phase(Phase),
    /// The run failed but neither the error log nor the exit status
    /// names a phase.
    Unclassified,
}

#[derive(Debug)]
pub struct RunReport {
    /// Exit status of the compiler, or why there is none.
    pub invocation: Result<i32, RunnerError>,
    pub stdout: String,
    pub stderr: String,
    /// Artifact text per slot, except the error log.
    pub outputs: BTreeMap<ArtifactSlot, String>,
    pub errors_by_phase: BTreeMap<Phase, String>,
    pub failed_phase: Option<FailedPhase>,
}

impl RunReport {
    pub fn exit_code(&self) -> i32 {
        match &self.invocation {
            Ok(code) => *code,
            Err(err) => err.code(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code() == 0
    }

    pub fn output(&self, slot: ArtifactSlot) -> &str {
        self.outputs.get(&slot).map_or("", String::as_str)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompilerRunner {
    config: RunnerConfig,
}

impl CompilerRunner {
    pub fn new(config: RunnerConfig) -> Self {
        CompilerRunner { config }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Compile `source` up to `phase` (every phase when `None`).
    pub fn run(&self, source: &Path, phase: Option<Phase>) -> RunReport {
        let mut command = Command::new(&self.config.compiler);
        command
            .arg(source)
            .arg("--out-dir")
            .arg(&self.config.outputs_dir);
        if let Some(phase) = phase {
            command.arg("--phase").arg(phase.name());
        }
        debug!("[runner] {command:?}");

        let (invocation, stdout, stderr) = match self.invoke(&mut command) {
            Ok((status, stdout, stderr)) => (exit_code(status), stdout, stderr),
            Err(err) => (Err(err), String::new(), String::new()),
        };

        if let Err(err) = &invocation {
            warn!("[runner] {err}");
            let stderr = if stderr.is_empty() {
                err.to_string()
            } else {
                stderr
            };
            return RunReport {
                invocation,
                stdout,
                stderr,
                outputs: BTreeMap::new(),
                errors_by_phase: BTreeMap::new(),
                failed_phase: Some(FailedPhase::Unclassified),
            };
        }

        let artifacts = ArtifactDir::new(&self.config.outputs_dir);
        let outputs = ArtifactSlot::ALL
            .into_iter()
            .filter(|slot| *slot != ArtifactSlot::Errors)
            .map(|slot| (slot, artifacts.read(slot)))
            .collect();
        let errors_by_phase = bucket_errors(&artifacts.read(ArtifactSlot::Errors));
        let code = invocation.as_ref().map_or(0, |code| *code);
        let failed_phase = detect_failed_phase(code, &errors_by_phase);

        RunReport {
            invocation,
            stdout,
            stderr,
            outputs,
            errors_by_phase,
            failed_phase,
        }
    }

    fn invoke(&self, command: &mut Command) -> Result<(ExitStatus, String, String), RunnerError> {
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| match source.kind() {
                io::ErrorKind::NotFound => {
                    RunnerError::CompilerNotFound(self.config.compiler.clone())
                }
                _ => RunnerError::Launch {
                    path: self.config.compiler.clone(),
                    source,
                },
            })?;

        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);
        let status = self.wait_with_timeout(&mut child);
        let stdout = collect(stdout);
        let stderr = collect(stderr);
        Ok((status?, stdout, stderr))
    }

    fn wait_with_timeout(&self, child: &mut Child) -> Result<ExitStatus, RunnerError> {
        let deadline = Instant::now() + self.config.timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) if Instant::now() >= deadline => {
                    // The process may exit between the check and the kill.
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(RunnerError::Timeout(self.config.timeout));
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(source) => {
                    let _ = child.kill();
                    return Err(RunnerError::Launch {
                        path: self.config.compiler.clone(),
                        source,
                    });
                }
            }
        }
    }
}

/// Read a pipe to the end on its own thread so the child never blocks on
/// a full pipe buffer.
fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        let _ = pipe.read_to_end(&mut buffer);
        String::from_utf8_lossy(&buffer).into_owned()
    })
}

fn collect(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

fn exit_code(status: ExitStatus) -> Result<i32, RunnerError> {
    status.code().ok_or(RunnerError::Terminated)
}

/// Group error-log lines by phase.
///
/// A tagged line starts a bucket; untagged lines join the bucket of the
/// last tag seen, or the lexical bucket before any tag. Blank lines are
/// dropped.
pub fn bucket_errors(text: &str) -> BTreeMap<Phase, String> {
    let mut buckets: BTreeMap<Phase, Vec<&str>> = BTreeMap::new();
    let mut current = Phase::Lexical;
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if let Some(phase) = classify_error_line(line) {
            current = phase;
        }
        buckets.entry(current).or_default().push(line);
    }
    buckets
        .into_iter()
        .map(|(phase, lines)| (phase, lines.join("\n")))
        .collect()
}

/// The earliest phase with errors; failing that, the phase the exit code
/// names.
pub fn detect_failed_phase(
    exit_code: i32,
    errors_by_phase: &BTreeMap<Phase, String>,
) -> Option<FailedPhase> {
    if let Some((phase, _)) = errors_by_phase
        .iter()
        .find(|(_, text)| !text.trim().is_empty())
    {
        return Some(FailedPhase::Phase(*phase));
    }
    match exit_code {
        0 => None,
        code => Some(
            Phase::from_position(code).map_or(FailedPhase::Unclassified, FailedPhase::Phase),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn buckets_lines_by_tag() {
        let log = "stray line\n\
                   [LEXICO] invalid character '@' in line 1, column 3\n\
                   [Sintactico] expected ';' in line 2, column 1\n\
                   \n\
                   while parsing statement\n\
                   [runtime error] division by zero";
        let buckets = bucket_errors(log);
        assert_eq!(buckets.len(), 3);
        assert_eq!(
            buckets[&Phase::Lexical],
            "stray line\n[LEXICO] invalid character '@' in line 1, column 3"
        );
        assert_eq!(
            buckets[&Phase::Syntactic],
            "[Sintactico] expected ';' in line 2, column 1\nwhile parsing statement"
        );
        assert!(buckets[&Phase::Execution].contains("division by zero"));
        assert!(bucket_errors("  \n").is_empty());
    }

    #[test]
    fn failed_phase_prefers_error_log_over_exit_code() {
        let buckets = bucket_errors("[SEMANTICO] undeclared identifier 'x'");
        assert_eq!(
            detect_failed_phase(3, &buckets),
            Some(FailedPhase::Phase(Phase::Semantic))
        );
        let empty = BTreeMap::new();
        assert_eq!(detect_failed_phase(0, &empty), None);
        assert_eq!(
            detect_failed_phase(4, &empty),
            Some(FailedPhase::Phase(Phase::IntermediateCode))
        );
        assert_eq!(detect_failed_phase(70, &empty), Some(FailedPhase::Unclassified));
    }

    #[test]
    fn missing_compiler_is_not_a_phase_failure() {
        let dir = tempdir().expect("tempdir");
        let runner = CompilerRunner::new(RunnerConfig {
            compiler: dir.path().join("no-such-compiler"),
            outputs_dir: dir.path().to_path_buf(),
            timeout: Duration::from_secs(5),
        });
        let report = runner.run(&dir.path().join("prog.caos"), None);
        assert_eq!(report.exit_code(), -2);
        assert!(matches!(report.invocation, Err(RunnerError::CompilerNotFound(_))));
        assert_eq!(report.failed_phase, Some(FailedPhase::Unclassified));
        assert!(report.errors_by_phase.is_empty());
        assert!(report.stderr.contains("not found"));
    }

    #[cfg(unix)]
    #[test]
    fn collects_artifacts_of_a_completed_run() {
        // `sh <script> --out-dir <dir>` stands in for the compiler.
        let dir = tempdir().expect("tempdir");
        let script = dir.path().join("fake.sh");
        fs::write(
            &script,
            "printf 'NUMBER 1' > \"$2/tokens.txt\"\n\
             printf '[SINTACTICO] expected expression in line 1, column 9' > \"$2/errors.txt\"\n\
             echo compiled\n\
             exit 2\n",
        )
        .expect("write script");

        let runner = CompilerRunner::new(RunnerConfig {
            compiler: PathBuf::from("sh"),
            outputs_dir: dir.path().to_path_buf(),
            timeout: Duration::from_secs(10),
        });
        let report = runner.run(&script, Some(Phase::Syntactic));
        assert_eq!(report.exit_code(), 2);
        assert!(!report.success());
        assert_eq!(report.stdout, "compiled\n");
        assert_eq!(report.output(ArtifactSlot::Tokens), "NUMBER 1");
        assert_eq!(report.output(ArtifactSlot::Exec), "");
        assert_eq!(
            report.failed_phase,
            Some(FailedPhase::Phase(Phase::Syntactic))
        );
        assert!(report.errors_by_phase[&Phase::Syntactic].contains("expected expression"));
    }

    #[cfg(unix)]
    #[test]
    fn kills_compiler_after_timeout() {
        let dir = tempdir().expect("tempdir");
        let script = dir.path().join("slow.sh");
        fs::write(&script, "exec sleep 5\n").expect("write script");

        let runner = CompilerRunner::new(RunnerConfig {
            compiler: PathBuf::from("sh"),
            outputs_dir: dir.path().to_path_buf(),
            timeout: Duration::from_millis(200),
        });
        let started = Instant::now();
        let report = runner.run(&script, None);
        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(report.exit_code(), -1);
        assert!(matches!(report.invocation, Err(RunnerError::Timeout(_))));
        assert!(report.stderr.contains("time limit"));
        assert_eq!(report.failed_phase, Some(FailedPhase::Unclassified));
    }
}
