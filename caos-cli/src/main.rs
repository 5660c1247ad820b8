use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use caos_core::{CompileOptions, ExecutionLimits, Phase, compile};
use clap::Parser;
use clap::error::ErrorKind;
use log::{debug, error};

/// Exit code for malformed command lines.
const EXIT_USAGE: u8 = 64;
/// Exit code when the compiler itself fails (unwritable output, unreadable source).
const EXIT_INTERNAL: u8 = 70;

/// Compile a CAOS program phase by phase, writing one artifact file per phase.
///
/// The exit status is 0 on success, or the position (1-5) of the first
/// phase that reported errors.
#[derive(Parser, Debug)]
#[command(name = "caosc", version, about, long_about = None)]
struct Cli {
    #[arg(value_name = "SOURCE", help = "Path to the .caos source file")]
    source: PathBuf,

    #[arg(
        short,
        long,
        value_name = "PHASE",
        default_value = "ejecutar",
        help = "Last phase to run: lexico, sintactico, semantico, intermedio, ejecutar"
    )]
    phase: Phase,

    #[arg(
        short,
        long,
        value_name = "DIR",
        env = "CAOS_OUT_DIR",
        default_value = ".",
        help = "Directory the artifact files are written to"
    )]
    out_dir: PathBuf,

    #[arg(
        long,
        value_name = "N",
        help = "Abort execution after N instructions"
    )]
    max_steps: Option<u64>,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => EXIT_USAGE,
            };
            // Nothing more useful to do if stderr is gone.
            let _ = err.print();
            return ExitCode::from(code);
        }
    };

    match execute(cli) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            error!("{err:#}");
            eprintln!("caosc: {err:#}");
            ExitCode::from(EXIT_INTERNAL)
        }
    }
}

fn execute(cli: Cli) -> Result<u8> {
    debug!("[caosc] {cli:?}");
    let options = CompileOptions {
        source: cli.source,
        out_dir: cli.out_dir,
        target: cli.phase,
        limits: ExecutionLimits {
            max_steps: cli.max_steps,
            ..ExecutionLimits::default()
        },
    };

    let run = compile(&options)
        .with_context(|| format!("failed to compile {}", options.source.display()))?;

    for diagnostic in &run.diagnostics {
        eprintln!("{diagnostic}");
    }
    Ok(run.outcome().exit_code())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use assert_cmd::Command;
    use predicates::prelude::*;
    use tempfile::tempdir;

    const HELLO: &str = "\
funcion saluda(nombre) {
  imprimir(\"hola\", nombre);
}
var veces = 2;
mientras (veces > 0) {
  saluda(\"mundo\");
  veces = veces - 1;
}
";

    fn caosc() -> Command {
        let mut cmd = Command::cargo_bin("caosc").expect("binary exists");
        cmd.env_remove("CAOS_OUT_DIR");
        cmd
    }

    fn write_source(dir: &Path, text: &str) -> std::path::PathBuf {
        let path = dir.join("prog.caos");
        fs::write(&path, text).expect("write source");
        path
    }

    fn artifact(dir: &Path, name: &str) -> String {
        fs::read_to_string(dir.join(name)).expect("artifact exists")
    }

    #[test]
    fn compiles_and_runs_clean_program() {
        let dir = tempdir().expect("tempdir");
        let source = write_source(dir.path(), HELLO);

        caosc()
            .arg(&source)
            .arg("--out-dir")
            .arg(dir.path())
            .assert()
            .code(0)
            .stderr(predicate::str::is_empty());

        assert!(artifact(dir.path(), "exec.txt").starts_with("hola mundo\nhola mundo\n"));
        assert!(artifact(dir.path(), "symbols.txt").contains("saluda"));
        assert!(artifact(dir.path(), "intermediate.txt").contains("unit 1 saluda"));
        assert_eq!(artifact(dir.path(), "errors.txt"), "");
    }

    #[test]
    fn exit_code_names_the_failing_phase() {
        let cases = [
            ("var x = 3 $ 4;", 1, "[LEXICO]"),
            ("var x = (3 + 4;", 2, "[SINTACTICO]"),
            ("var x = 1;\nvar x = 2;", 3, "[SEMANTICO]"),
            ("var x = 10;\nvar y = x / (x - 10);", 5, "[EJECUCION]"),
        ];
        for (text, code, tag) in cases {
            let dir = tempdir().expect("tempdir");
            let source = write_source(dir.path(), text);
            caosc()
                .arg(&source)
                .arg("-o")
                .arg(dir.path())
                .assert()
                .code(code)
                .stderr(predicate::str::starts_with(tag));
            assert!(artifact(dir.path(), "errors.txt").starts_with(tag), "{text}");
        }
    }

    #[test]
    fn stops_at_requested_phase() {
        let dir = tempdir().expect("tempdir");
        let source = write_source(dir.path(), HELLO);

        caosc()
            .arg(&source)
            .args(["--phase", "semantico", "--out-dir"])
            .arg(dir.path())
            .assert()
            .success();

        assert!(!artifact(dir.path(), "semantic.txt").is_empty());
        assert_eq!(artifact(dir.path(), "intermediate.txt"), "");
        assert_eq!(artifact(dir.path(), "exec.txt"), "");
    }

    #[test]
    fn missing_source_fails_in_lexical_phase() {
        let dir = tempdir().expect("tempdir");

        caosc()
            .arg(dir.path().join("missing.caos"))
            .arg("--out-dir")
            .arg(dir.path())
            .assert()
            .code(1);

        assert!(
            artifact(dir.path(), "errors.txt")
                .starts_with("[LEXICO] source file not found: ")
        );
    }

    #[test]
    fn reads_output_directory_from_environment() {
        let dir = tempdir().expect("tempdir");
        let source = write_source(dir.path(), "imprimir(1 + 1);");
        let out = dir.path().join("artefactos");

        caosc()
            .arg(&source)
            .env("CAOS_OUT_DIR", &out)
            .assert()
            .success();

        assert!(artifact(&out, "exec.txt").starts_with("2\n"));
    }

    #[test]
    fn step_limit_aborts_execution() {
        let dir = tempdir().expect("tempdir");
        let source = write_source(dir.path(), "mientras (verdadero) { }");

        caosc()
            .arg(&source)
            .args(["--max-steps", "1000", "--out-dir"])
            .arg(dir.path())
            .assert()
            .code(5)
            .stderr(predicate::str::contains("step limit"));
    }

    #[test]
    fn usage_errors_use_reserved_exit_code() {
        let dir = tempdir().expect("tempdir");
        let source = write_source(dir.path(), HELLO);

        caosc()
            .arg(&source)
            .args(["--phase", "optimizar"])
            .assert()
            .code(64)
            .stderr(predicate::str::contains("unknown phase"));

        caosc().assert().code(64);
        caosc().arg("--help").assert().success();
    }
}
