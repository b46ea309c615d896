//! The "AI brain" folder: a bundled inference executable plus weights.

use crate::{Error, Result};
use std::path::PathBuf;

/// Executable file name expected inside a brain folder.
pub const DEFAULT_EXECUTABLE: &str = "llamafile-0.9.0.exe";

/// Model weights file name expected inside a brain folder.
pub const DEFAULT_MODEL: &str = "Qwen2.5-7B-Instruct-Q4_K_M.gguf";

/// Paths resolved from a brain folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrainDir {
    root: PathBuf,
}

impl BrainDir {
    /// Wraps a folder path without checking it.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of the bundled executable.
    #[must_use]
    pub fn executable(&self) -> PathBuf {
        self.root.join(DEFAULT_EXECUTABLE)
    }

    /// Path of the bundled model weights.
    #[must_use]
    pub fn model(&self) -> PathBuf {
        self.root.join(DEFAULT_MODEL)
    }

    /// Checks that both bundled files are present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] naming every missing file.
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<String> = [self.executable(), self.model()]
            .into_iter()
            .filter(|path| !path.is_file())
            .map(|path| path.display().to_string())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidInput(format!(
                "brain folder {} is missing: {}",
                self.root.display(),
                missing.join(", ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_complete_folder() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(DEFAULT_EXECUTABLE), b"").unwrap();
        std::fs::write(dir.path().join(DEFAULT_MODEL), b"").unwrap();

        assert!(BrainDir::new(dir.path()).validate().is_ok());
    }

    #[test]
    fn test_validate_reports_missing_weights() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(DEFAULT_EXECUTABLE), b"").unwrap();

        let err = BrainDir::new(dir.path()).validate().unwrap_err();
        let message = err.to_string();
        assert!(message.contains(DEFAULT_MODEL));
        assert!(!message.contains(DEFAULT_EXECUTABLE));
    }
}
