//! Manifest versions recorded in git
//!
//! Walks every commit reachable from any ref (branches, tags, remotes,
//! stash) plus the index, and yields each distinct version of the manifest
//! file. Distinct here means distinct blob, so long histories where the
//! manifest rarely changes parse only a handful of documents.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use git2::{ErrorCode, ObjectType, Oid, Repository, Sort};
use libhoard_core::gc::SnapshotSource;
use libhoard_core::{HoardError, Manifest, ManifestFormat};
use tracing::{debug, trace};

use crate::GitError;

/// Every historical version of one manifest file
#[derive(Debug, Clone)]
pub struct ManifestHistory {
    repo_path: PathBuf,
    /// Repository-relative POSIX path of the manifest
    manifest_key: String,
}

impl ManifestHistory {
    pub fn new(repo_path: impl Into<PathBuf>, manifest_key: impl Into<String>) -> Self {
        Self {
            repo_path: repo_path.into(),
            manifest_key: manifest_key.into(),
        }
    }

    pub fn manifest_key(&self) -> &str {
        &self.manifest_key
    }

    /// Parse every distinct committed or staged manifest version
    ///
    /// Refuses shallow clones, since commits beyond the shallow boundary
    /// could reference blobs we would otherwise treat as orphans. Any version
    /// that fails to parse is an error rather than being skipped.
    pub fn load(&self) -> Result<Vec<Manifest>, GitError> {
        let repo = Repository::open(&self.repo_path)?;
        if repo.is_shallow() {
            return Err(GitError::Shallow);
        }

        let mut seen: HashSet<Oid> = HashSet::new();
        let mut manifests = Vec::new();
        let format = ManifestFormat::from_path(Path::new(&self.manifest_key));

        let mut revwalk = repo.revwalk()?;
        revwalk.set_sorting(Sort::TOPOLOGICAL)?;
        let mut tips = 0;
        for reference in repo.references()? {
            let reference = reference?;
            // Refs that do not lead to a commit (e.g. tagged blobs) hold no manifest
            if let Ok(commit) = reference.peel_to_commit() {
                revwalk.push(commit.id())?;
                tips += 1;
            }
        }
        if let Ok(head) = repo.head() {
            if let Ok(commit) = head.peel_to_commit() {
                revwalk.push(commit.id())?;
                tips += 1;
            }
        }

        let mut commits = 0;
        for oid in revwalk {
            let oid = oid?;
            commits += 1;
            let tree = repo.find_commit(oid)?.tree()?;
            let entry = match tree.get_path(Path::new(&self.manifest_key)) {
                Ok(entry) => entry,
                Err(e) if e.code() == ErrorCode::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            if entry.kind() != Some(ObjectType::Blob) || !seen.insert(entry.id()) {
                continue;
            }
            manifests.push(self.parse_blob(&repo, entry.id(), format, &short(oid))?);
        }

        // A staged manifest may reference blobs uploaded by a track that was
        // not committed yet
        let index = repo.index()?;
        if let Some(staged) = index.get_path(Path::new(&self.manifest_key), 0) {
            if seen.insert(staged.id) {
                manifests.push(self.parse_blob(&repo, staged.id, format, "index")?);
            }
        }

        debug!(
            tips,
            commits,
            versions = manifests.len(),
            manifest = %self.manifest_key,
            "collected manifest history"
        );
        Ok(manifests)
    }

    fn parse_blob(
        &self,
        repo: &Repository,
        blob_id: Oid,
        format: ManifestFormat,
        revision: &str,
    ) -> Result<Manifest, GitError> {
        trace!(blob = %blob_id, revision, "parsing manifest version");
        let blob = repo.find_blob(blob_id)?;
        let text = std::str::from_utf8(blob.content()).map_err(|e| GitError::Snapshot {
            revision: revision.to_string(),
            message: format!("not UTF-8: {}", e),
        })?;
        format.parse(text).map_err(|e| GitError::Snapshot {
            revision: revision.to_string(),
            message: e.to_string(),
        })
    }
}

impl SnapshotSource for ManifestHistory {
    fn describe(&self) -> String {
        format!("git history of {}", self.manifest_key)
    }

    fn snapshots(&self) -> Result<Vec<Manifest>, HoardError> {
        Ok(self.load()?)
    }
}

fn short(oid: Oid) -> String {
    let mut s = oid.to_string();
    s.truncate(7);
    s
}
