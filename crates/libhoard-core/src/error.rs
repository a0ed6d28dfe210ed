use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Main error type for hoard operations
#[derive(Debug, Error)]
pub enum HoardError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("repository not initialized: no manifest at {}", .0.display())]
    Uninitialized(PathBuf),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(io::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out after {waited_ms}ms waiting for manifest lock {}", path.display())]
    LockTimeout { path: PathBuf, waited_ms: u64 },

    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("corrupt data: {0}")]
    Corrupt(String),

    #[error("aborted: {0}")]
    Aborted(String),

    /// Batch finished with per-file failures; the successful part was committed
    #[error("{failed} of {total} files failed")]
    PartialFailure { failed: usize, total: usize },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<io::Error> for HoardError {
    fn from(err: io::Error) -> Self {
        if !is_tunnelled(&err) {
            return HoardError::Io(err);
        }
        match err.into_inner().map(|inner| inner.downcast::<HoardError>()) {
            Some(Ok(inner)) => *inner,
            _ => HoardError::Internal("tunnelled error was lost".to_string()),
        }
    }
}

/// Carry a store error through an `io::Read`/`io::Write` boundary
///
/// `From<io::Error>` unwraps it again, so transport failures inside a
/// streaming copy keep their own code instead of becoming `Io`.
pub(crate) fn tunnel(err: HoardError) -> io::Error {
    io::Error::other(err)
}

pub(crate) fn is_tunnelled(err: &io::Error) -> bool {
    err.get_ref().is_some_and(|inner| inner.is::<HoardError>())
}

impl From<object_store::Error> for HoardError {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => {
                HoardError::NotFound(format!("remote object '{}'", path))
            }
            other => HoardError::Transport(other.to_string()),
        }
    }
}

impl HoardError {
    /// Stable error code for JSON output
    pub fn error_code(&self) -> &'static str {
        match self {
            HoardError::Configuration(_) => "configuration_error",
            HoardError::Uninitialized(_) => "uninitialized_repository",
            HoardError::NotFound(_) => "not_found",
            HoardError::Io(_) => "io_error",
            HoardError::Transport(_) => "transport_error",
            HoardError::LockTimeout { .. } => "lock_timeout",
            HoardError::InvalidArgs(_) => "invalid_args",
            HoardError::Corrupt(_) => "corrupt",
            HoardError::Aborted(_) => "aborted",
            HoardError::PartialFailure { .. } => "partial_failure",
            HoardError::Json(_) => "internal_error",
            HoardError::TomlParse(_) => "corrupt",
            HoardError::TomlSerialize(_) => "internal_error",
            HoardError::Internal(_) => "internal_error",
        }
    }

    /// Process exit code for the CLI
    pub fn exit_code(&self) -> i32 {
        match self {
            HoardError::InvalidArgs(_) | HoardError::Configuration(_) => 2,
            HoardError::NotFound(_) => 3,
            HoardError::Uninitialized(_) => 4,
            HoardError::Io(_) => 5,
            HoardError::Transport(_) => 6,
            HoardError::Corrupt(_) | HoardError::TomlParse(_) => 7,
            HoardError::Aborted(_) => 8,
            HoardError::PartialFailure { .. } => 9,
            HoardError::LockTimeout { .. } => 10,
            _ => 1,
        }
    }

    /// Actionable suggestions for fixing the error
    pub fn suggestions(&self) -> Vec<&'static str> {
        match self {
            HoardError::Uninitialized(_) => vec![
                "Run 'hoard init <bucket> [prefix]' in the repository root",
                "Or pass --manifest to point at an existing manifest",
            ],
            HoardError::Configuration(msg) if msg.contains("accelerat") => vec![
                "Drop --accelerate, or drop --no-sign-request",
                "Transfer acceleration requires signed requests",
            ],
            HoardError::LockTimeout { .. } => vec![
                "Another hoard process is updating the manifest; wait for it to finish",
                "Raise lock_timeout_ms in .git/hoard/config.toml for long batches",
            ],
            HoardError::Transport(_) => vec![
                "Check credentials and region in the environment",
                "Use --no-sign-request for public buckets",
            ],
            HoardError::NotFound(msg) if msg.contains("remote object") => vec![
                "The blob was never uploaded or was garbage-collected",
                "Run 'hoard track <path>' on a machine that has the file",
            ],
            HoardError::NotFound(_) => vec!["Run 'hoard ls --all' to see tracked paths"],
            HoardError::PartialFailure { .. } => vec![
                "Re-run the same command; files that succeeded are skipped",
            ],
            HoardError::Corrupt(_) => vec![
                "Re-run the command; if it persists, re-track the file from a good copy",
            ],
            _ => vec![],
        }
    }

    /// Create a NotFound error for a path absent from the manifest
    pub fn untracked(path: &str) -> Self {
        HoardError::NotFound(format!("'{}' is not tracked", path))
    }
}
