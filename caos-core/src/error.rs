use std::path::PathBuf;

use thiserror::Error;

/// Failures of the pipeline machinery itself, as opposed to problems in
/// the compiled program (those are [`crate::Diagnostic`]s).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to read source {path}: {source}")]
    SourceIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to prepare artifact directory {path}: {source}")]
    ArtifactDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write artifact {path}: {source}")]
    ArtifactWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
