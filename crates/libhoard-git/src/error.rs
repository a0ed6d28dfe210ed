use std::path::PathBuf;

use libhoard_core::HoardError;
use thiserror::Error;

/// Errors that can occur during Git operations
#[derive(Debug, Error)]
pub enum GitError {
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not a git repository (or any parent up to the filesystem root): {0}")]
    NotARepo(PathBuf),

    #[error("Repository at {0} has no working tree")]
    Bare(PathBuf),

    #[error("Repository is a shallow clone; history is incomplete")]
    Shallow,

    #[error("Manifest at {revision}: {message}")]
    Snapshot { revision: String, message: String },
}

impl From<GitError> for HoardError {
    fn from(err: GitError) -> Self {
        match err {
            GitError::Io(e) => HoardError::Io(e),
            GitError::NotARepo(_) | GitError::Bare(_) => HoardError::Configuration(err.to_string()),
            GitError::Shallow => HoardError::Aborted(format!(
                "{}; run 'git fetch --unshallow' before cleanup",
                err
            )),
            GitError::Snapshot { .. } => HoardError::Corrupt(err.to_string()),
            GitError::Git(e) => HoardError::Internal(format!("git: {}", e)),
        }
    }
}
