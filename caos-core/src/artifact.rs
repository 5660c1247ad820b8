//! Artifact files: one text file per phase plus the error log, all in a
//! single directory.

use std::fs;
use std::path::PathBuf;

use log::debug;

use crate::diagnostic::Phase;
use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ArtifactSlot {
    Tokens,
    Syntax,
    Semantic,
    Symbols,
    Intermediate,
    Exec,
    Errors,
}

impl ArtifactSlot {
    pub const ALL: [ArtifactSlot; 7] = [
        ArtifactSlot::Tokens,
        ArtifactSlot::Syntax,
        ArtifactSlot::Semantic,
        ArtifactSlot::Symbols,
        ArtifactSlot::Intermediate,
        ArtifactSlot::Exec,
        ArtifactSlot::Errors,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            ArtifactSlot::Tokens => "tokens.txt",
            ArtifactSlot::Syntax => "syntax.txt",
            ArtifactSlot::Semantic => "semantic.txt",
            ArtifactSlot::Symbols => "symbols.txt",
            ArtifactSlot::Intermediate => "intermediate.txt",
            ArtifactSlot::Exec => "exec.txt",
            ArtifactSlot::Errors => "errors.txt",
        }
    }

    /// The slot holding the main output of `phase`.
    pub fn for_phase(phase: Phase) -> ArtifactSlot {
        match phase {
            Phase::Lexical => ArtifactSlot::Tokens,
            Phase::Syntactic => ArtifactSlot::Syntax,
            Phase::Semantic => ArtifactSlot::Semantic,
            Phase::IntermediateCode => ArtifactSlot::Intermediate,
            Phase::Execution => ArtifactSlot::Exec,
        }
    }
}

/// The directory the artifacts of a run are written to.
#[derive(Debug, Clone)]
pub struct ArtifactDir {
    root: PathBuf,
}

impl ArtifactDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ArtifactDir { root: root.into() }
    }

    pub fn path(&self, slot: ArtifactSlot) -> PathBuf {
        self.root.join(slot.file_name())
    }

    /// Create the directory if needed and empty every slot, so that no
    /// output of a previous run survives.
    pub fn truncate_all(&self) -> Result<(), CoreError> {
        fs::create_dir_all(&self.root).map_err(|source| CoreError::ArtifactDir {
            path: self.root.clone(),
            source,
        })?;
        for slot in ArtifactSlot::ALL {
            self.write(slot, "")?;
        }
        debug!("[artifact] truncated slots in {}", self.root.display());
        Ok(())
    }

    pub fn write(&self, slot: ArtifactSlot, content: &str) -> Result<(), CoreError> {
        let path = self.path(slot);
        fs::write(&path, content).map_err(|source| CoreError::ArtifactWrite {
            path: path.clone(),
            source,
        })?;
        if !content.is_empty() {
            debug!("[artifact] wrote {} ({} bytes)", path.display(), content.len());
        }
        Ok(())
    }

    /// Contents of a slot; a missing file reads as empty.
    pub fn read(&self, slot: ArtifactSlot) -> String {
        fs::read_to_string(self.path(slot)).unwrap_or_default()
    }
}
