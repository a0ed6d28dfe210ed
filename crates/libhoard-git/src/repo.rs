use std::path::{Path, PathBuf};

use git2::{ErrorCode, Repository};
use tracing::debug;

use crate::GitError;

/// Where a repository lives on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoLocation {
    /// Working-tree root
    pub root: PathBuf,
    /// Common git directory; shared between linked worktrees
    pub git_dir: PathBuf,
}

/// Find the repository containing `start`
pub fn discover(start: &Path) -> Result<RepoLocation, GitError> {
    let repo = match Repository::discover(start) {
        Ok(repo) => repo,
        Err(e) if e.code() == ErrorCode::NotFound => return Err(GitError::NotARepo(start.to_path_buf())),
        Err(e) => return Err(e.into()),
    };
    let root = repo
        .workdir()
        .ok_or_else(|| GitError::Bare(repo.path().to_path_buf()))?
        .to_path_buf();
    let git_dir = repo.commondir().to_path_buf();
    debug!(root = %root.display(), git_dir = %git_dir.display(), "discovered repository");
    Ok(RepoLocation { root, git_dir })
}
