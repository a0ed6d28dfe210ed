//! Track, checkout, list and remove over a batch of paths
//!
//! Each batch fans per-file work out over a [`WorkerPool`] and merges the
//! results on the calling thread. The manifest is written at most once per
//! batch, under a single lock acquisition, after every transfer has finished.
//! Files that fail are reported individually and never hold back the rest.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::File;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::blob::{BlobKey, BlobStore, BlobUpload};
use crate::config::{LocalConfig, DEFAULT_WORKERS};
use crate::error::HoardError;
use crate::hash::{decode_to, digest_file, encode_to, DEFAULT_COMPRESSION_LEVEL};
use crate::manifest::{write_atomic_with, ManifestStore};
use crate::paths::PathResolver;
use crate::pool::WorkerPool;
use crate::types::{Algorithm, Manifest, ManifestEntry};

/// Tunables for a sync engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    pub workers: usize,
    pub compression_level: u32,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

impl SyncOptions {
    pub fn from_local(config: &LocalConfig) -> Self {
        Self {
            workers: config.workers(),
            compression_level: config.compression_level(),
        }
    }
}

/// What happened to one path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Content was new; its blob was uploaded
    Uploaded,
    /// Blob already existed; only the manifest entry was written
    Deduplicated,
    /// Content matches the manifest entry; nothing to do
    Unchanged,
    Downloaded,
    /// Working-tree file already matches; nothing downloaded
    UpToDate,
    /// Entry removed, blob kept
    Removed,
    /// Entry removed and its now-unreferenced blob deleted
    Purged,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Uploaded => "uploaded",
            Outcome::Deduplicated => "deduplicated",
            Outcome::Unchanged => "unchanged",
            Outcome::Downloaded => "downloaded",
            Outcome::UpToDate => "up_to_date",
            Outcome::Removed => "removed",
            Outcome::Purged => "purged",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileOutcome {
    pub path: String,
    pub digest: String,
    pub size: u64,
    pub outcome: Outcome,
}

/// A path whose operation failed, with enough context to act on
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFailure {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedPath {
    pub path: String,
    pub reason: String,
}

/// Per-path results of one batch
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub succeeded: Vec<FileOutcome>,
    pub failed: Vec<FileFailure>,
    pub skipped: Vec<SkippedPath>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.succeeded.iter().filter(|o| o.outcome == outcome).count()
    }

    pub fn outcome_of(&self, path: &str) -> Option<Outcome> {
        self.succeeded.iter().find(|o| o.path == path).map(|o| o.outcome)
    }

    pub fn failure_of(&self, path: &str) -> Option<&FileFailure> {
        self.failed.iter().find(|f| f.path == path)
    }

    fn succeed(&mut self, path: String, digest: String, size: u64, outcome: Outcome) {
        self.succeeded.push(FileOutcome {
            path,
            digest,
            size,
            outcome,
        });
    }

    fn fail(&mut self, path: String, digest: Option<String>, err: &HoardError) {
        warn!(path = %path, error = %err, "file failed");
        self.failed.push(FileFailure {
            path,
            digest,
            code: err.error_code(),
            message: err.to_string(),
        });
    }

    fn fail_with_context(&mut self, path: String, digest: Option<String>, err: &HoardError, context: &str) {
        warn!(path = %path, error = %err, "{}", context);
        self.failed.push(FileFailure {
            path,
            digest,
            code: err.error_code(),
            message: format!("{}: {}", context, err),
        });
    }

    fn skip(&mut self, path: String, reason: impl Into<String>) {
        self.skipped.push(SkippedPath {
            path,
            reason: reason.into(),
        });
    }

    fn finish(mut self) -> Self {
        self.succeeded.sort_by(|a, b| a.path.cmp(&b.path));
        self.failed.sort_by(|a, b| a.path.cmp(&b.path));
        self.skipped.sort_by(|a, b| a.path.cmp(&b.path));
        self
    }
}

/// Working-tree state of a tracked file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalState {
    Current,
    Modified,
    Missing,
}

impl LocalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocalState::Current => "current",
            LocalState::Modified => "modified",
            LocalState::Missing => "missing",
        }
    }
}

/// One row of `ls`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListEntry {
    pub path: String,
    /// Path relative to the caller's working directory
    pub display: String,
    pub digest: String,
    pub algorithm: Algorithm,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<LocalState>,
}

/// Result of hashing a path that may already be tracked
enum Candidate {
    Unchanged { digest: String, size: u64 },
    Changed { digest: String, size: u64 },
}

fn discard(upload: Box<dyn BlobUpload + '_>) {
    if let Err(e) = upload.abort() {
        warn!(error = %e, "failed to abort upload");
    }
}

/// Drives batch operations against one manifest and one blob store
pub struct SyncEngine {
    manifests: ManifestStore,
    blobs: Arc<dyn BlobStore>,
    resolver: PathResolver,
    pool: WorkerPool,
    compression_level: u32,
}

impl SyncEngine {
    pub fn new(
        manifests: ManifestStore,
        blobs: Arc<dyn BlobStore>,
        resolver: PathResolver,
        options: SyncOptions,
    ) -> Self {
        Self {
            manifests,
            blobs,
            resolver,
            pool: WorkerPool::new(options.workers),
            compression_level: options.compression_level.min(9),
        }
    }

    pub fn manifests(&self) -> &ManifestStore {
        &self.manifests
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn blobs(&self) -> &dyn BlobStore {
        self.blobs.as_ref()
    }

    /// Track the files, directories and patterns in `args`
    pub fn track(&self, args: &[String]) -> Result<BatchReport, HoardError> {
        let manifest = self.manifests.load()?;
        let keys = self.resolver.resolve_files(args)?;
        self.track_keys(&manifest, keys.into_iter().collect(), BatchReport::default())
    }

    /// Re-track every tracked file whose content no longer matches its entry
    ///
    /// Entries whose file is gone from the working tree are skipped.
    pub fn track_modified(&self) -> Result<BatchReport, HoardError> {
        let manifest = self.manifests.load()?;
        let mut report = BatchReport::default();
        let mut candidates = Vec::new();
        for key in manifest.files.keys() {
            if self.resolver.absolute(key).is_file() {
                candidates.push(key.clone());
            } else {
                report.skip(key.clone(), "missing from working tree");
            }
        }
        self.track_keys(&manifest, candidates, report)
    }

    fn track_keys(
        &self,
        manifest: &Manifest,
        keys: Vec<String>,
        mut report: BatchReport,
    ) -> Result<BatchReport, HoardError> {
        let algorithm = manifest.remote.algorithm;

        // Hash everything first so identical content is transferred once
        let hashed = self.pool.run(keys, |key| {
            let result = self.hash_candidate(manifest.get(&key), algorithm, &key);
            (key, result)
        })?;

        let mut groups: BTreeMap<String, Vec<(String, u64)>> = BTreeMap::new();
        for (key, result) in hashed {
            match result {
                Ok(Candidate::Unchanged { digest, size }) => report.succeed(key, digest, size, Outcome::Unchanged),
                Ok(Candidate::Changed { digest, size }) => groups.entry(digest).or_default().push((key, size)),
                Err(e) => report.fail(key, None, &e),
            }
        }

        let known = manifest.blob_keys();
        let jobs: Vec<(BlobKey, Vec<(String, u64)>)> = groups
            .into_iter()
            .map(|(digest, mut members)| {
                members.sort();
                (BlobKey::new(algorithm, digest), members)
            })
            .collect();

        let transferred = self.pool.run(jobs, |(key, members)| {
            let result = if known.contains(&key) {
                Ok(false)
            } else {
                self.upload(&key, &members[0].0)
            };
            (key, members, result)
        })?;

        // Blobs no entry in the reloaded manifest vouches for may have been
        // purged or collected since they were checked; confirm them under the
        // lock, re-uploading if needed, before recording references to them.
        let transferred = if transferred.iter().any(|(_, _, r)| r.is_ok()) {
            let mut transferred = transferred;
            let recorded = self.manifests.update(|m| {
                let mut recorded = 0;
                for (key, members, result) in transferred.iter_mut() {
                    if result.is_ok() && !m.references(key) {
                        match self.upload(key, &members[0].0) {
                            Ok(true) => *result = Ok(true),
                            Ok(false) => {}
                            Err(e) => *result = Err(e),
                        }
                    }
                    if result.is_ok() {
                        for (path, size) in members.iter() {
                            m.upsert(ManifestEntry::new(path.clone(), algorithm, key.digest.clone(), *size));
                            recorded += 1;
                        }
                    }
                }
                Ok(recorded)
            })?;
            debug!(entries = recorded, "recorded tracked files");
            transferred
        } else {
            transferred
        };

        for (key, members, result) in transferred {
            match result {
                Ok(uploaded) => {
                    for (i, (path, size)) in members.into_iter().enumerate() {
                        let outcome = if uploaded && i == 0 {
                            Outcome::Uploaded
                        } else {
                            Outcome::Deduplicated
                        };
                        report.succeed(path, key.digest.clone(), size, outcome);
                    }
                }
                Err(e) => {
                    for (path, _) in members {
                        report.fail(path, Some(key.digest.clone()), &e);
                    }
                }
            }
        }

        let report = report.finish();
        info!(
            uploaded = report.count(Outcome::Uploaded),
            deduplicated = report.count(Outcome::Deduplicated),
            unchanged = report.count(Outcome::Unchanged),
            failed = report.failed.len(),
            "track finished"
        );
        Ok(report)
    }

    /// Decide whether `path` still matches its entry
    ///
    /// An existing entry is compared under the algorithm it was recorded
    /// with, so changing the manifest default does not make every file look
    /// modified. Changed and new content is hashed with `algorithm`.
    fn hash_candidate(
        &self,
        previous: Option<&ManifestEntry>,
        algorithm: Algorithm,
        path: &str,
    ) -> Result<Candidate, HoardError> {
        let absolute = self.resolver.absolute(path);
        if let Some(entry) = previous {
            let (digest, size) = digest_file(entry.algorithm, &absolute)?;
            if digest == entry.digest && size == entry.size {
                return Ok(Candidate::Unchanged { digest, size });
            }
            if entry.algorithm == algorithm {
                return Ok(Candidate::Changed { digest, size });
            }
        }
        let (digest, size) = digest_file(algorithm, &absolute)?;
        Ok(Candidate::Changed { digest, size })
    }

    /// Upload one file's content under `key`; `Ok(false)` if it was already there
    ///
    /// The file is compressed straight into the store. Content that no
    /// longer hashes to `key` aborts the upload.
    fn upload(&self, key: &BlobKey, path: &str) -> Result<bool, HoardError> {
        if self.blobs.exists(key)? {
            debug!(key = %key, "blob already stored");
            return Ok(false);
        }
        let file = File::open(self.resolver.absolute(path))?;
        let mut upload = self.blobs.upload(key)?;
        match encode_to(key.algorithm, file, &mut upload, self.compression_level) {
            Ok((digest, size)) if digest == key.digest => {
                upload.finish()?;
                debug!(key = %key, bytes = size, "uploaded blob");
                Ok(true)
            }
            Ok(_) => {
                discard(upload);
                Err(HoardError::Corrupt(format!("'{}' changed while it was being tracked", path)))
            }
            Err(e) => {
                discard(upload);
                Err(e)
            }
        }
    }

    /// Materialize the tracked paths matching `args`
    pub fn checkout(&self, args: &[String]) -> Result<BatchReport, HoardError> {
        let manifest = self.manifests.load()?;
        let keys = self.resolver.resolve_tracked(&manifest, args)?;
        self.checkout_keys(&manifest, &keys)
    }

    /// Materialize every tracked path
    pub fn checkout_all(&self) -> Result<BatchReport, HoardError> {
        let manifest = self.manifests.load()?;
        let keys: BTreeSet<String> = manifest.files.keys().cloned().collect();
        self.checkout_keys(&manifest, &keys)
    }

    fn checkout_keys(&self, manifest: &Manifest, keys: &BTreeSet<String>) -> Result<BatchReport, HoardError> {
        let entries: Vec<ManifestEntry> = keys.iter().filter_map(|k| manifest.get(k).cloned()).collect();
        let fetched = self.pool.run(entries, |entry| {
            let result = self.fetch(&entry);
            (entry, result)
        })?;

        let mut report = BatchReport::default();
        for (entry, result) in fetched {
            match result {
                Ok(outcome) => report.succeed(entry.path, entry.digest, entry.size, outcome),
                Err(e) => report.fail(entry.path, Some(entry.digest), &e),
            }
        }

        let report = report.finish();
        info!(
            downloaded = report.count(Outcome::Downloaded),
            up_to_date = report.count(Outcome::UpToDate),
            failed = report.failed.len(),
            "checkout finished"
        );
        Ok(report)
    }

    fn fetch(&self, entry: &ManifestEntry) -> Result<Outcome, HoardError> {
        let target = self.resolver.absolute(&entry.path);
        if target.is_file() {
            let (digest, _) = digest_file(entry.algorithm, &target)?;
            if digest == entry.digest {
                return Ok(Outcome::UpToDate);
            }
        }

        let key = entry.blob_key();
        let compressed = self.blobs.download(&key)?;
        // The target is only replaced once the stream has hashed clean
        let size = write_atomic_with(&target, |file| {
            let (digest, size) = decode_to(entry.algorithm, compressed, file)?;
            if digest != entry.digest {
                return Err(HoardError::Corrupt(format!("blob {} decodes to content with digest {}", key, digest)));
            }
            Ok(size)
        })?;
        debug!(path = %entry.path, bytes = size, "checked out");
        Ok(Outcome::Downloaded)
    }

    /// List tracked entries matching `args`, or all of them when `args` is empty
    ///
    /// With `with_state`, each file in the working tree is hashed to report
    /// whether it still matches its entry.
    pub fn ls(&self, args: &[String], with_state: bool) -> Result<Vec<ListEntry>, HoardError> {
        let manifest = self.manifests.load()?;
        let keys: BTreeSet<String> = if args.is_empty() {
            manifest.files.keys().cloned().collect()
        } else {
            self.resolver.resolve_tracked(&manifest, args)?
        };
        let entries: Vec<ManifestEntry> = keys.iter().filter_map(|k| manifest.get(k).cloned()).collect();

        let mut listed = if with_state {
            self.pool.run(entries, |entry| {
                let state = self.local_state(&entry);
                self.list_entry(entry, Some(state))
            })?
        } else {
            entries.into_iter().map(|e| self.list_entry(e, None)).collect()
        };
        listed.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(listed)
    }

    fn list_entry(&self, entry: ManifestEntry, state: Option<LocalState>) -> ListEntry {
        ListEntry {
            display: self.resolver.display(&entry.path),
            path: entry.path,
            digest: entry.digest,
            algorithm: entry.algorithm,
            size: entry.size,
            state,
        }
    }

    fn local_state(&self, entry: &ManifestEntry) -> LocalState {
        let path = self.resolver.absolute(&entry.path);
        if !path.is_file() {
            return LocalState::Missing;
        }
        match digest_file(entry.algorithm, &path) {
            Ok((digest, _)) if digest == entry.digest => LocalState::Current,
            _ => LocalState::Modified,
        }
    }

    /// Stop tracking the paths matching `args`
    ///
    /// With `purge`, blobs no longer referenced by any remaining entry are
    /// deleted from the remote. Working-tree files are left alone.
    pub fn remove(&self, args: &[String], purge: bool) -> Result<BatchReport, HoardError> {
        let manifest = self.manifests.load()?;
        let keys = self.resolver.resolve_tracked(&manifest, args)?;

        // Orphans are deleted before the lock is released, so a concurrent
        // track either sees them gone or commits its reference first.
        let (removed, purged) = self.manifests.with_lock(|| {
            let mut m = self.manifests.load()?;
            let removed: Vec<ManifestEntry> = keys.iter().filter_map(|k| m.remove(k)).collect();
            if !removed.is_empty() {
                self.manifests.save(&m)?;
            }
            let orphans: BTreeSet<BlobKey> = removed
                .iter()
                .map(ManifestEntry::blob_key)
                .filter(|k| !m.references(k))
                .collect();

            let mut purged: HashMap<BlobKey, Result<(), HoardError>> = HashMap::new();
            if purge {
                let deleted = self.pool.run(orphans.into_iter().collect(), |key| {
                    let result = self.blobs.delete(&key);
                    (key, result)
                })?;
                purged.extend(deleted);
            } else if !orphans.is_empty() {
                debug!(count = orphans.len(), "unreferenced blobs left for cleanup");
            }
            Ok((removed, purged))
        })?;

        let mut report = BatchReport::default();
        for key in &keys {
            if !removed.iter().any(|e| &e.path == key) {
                report.skip(key.clone(), "no longer tracked");
            }
        }

        for entry in removed {
            match purged.get(&entry.blob_key()) {
                Some(Ok(())) => report.succeed(entry.path, entry.digest, entry.size, Outcome::Purged),
                Some(Err(e)) => report.fail_with_context(
                    entry.path,
                    Some(entry.digest),
                    e,
                    "entry removed but blob deletion failed",
                ),
                None => report.succeed(entry.path, entry.digest, entry.size, Outcome::Removed),
            }
        }

        let report = report.finish();
        info!(
            removed = report.count(Outcome::Removed),
            purged = report.count(Outcome::Purged),
            failed = report.failed.len(),
            "remove finished"
        );
        Ok(report)
    }
}
