//! Remote garbage collection
//!
//! `orphans = remote blobs - digests referenced by any snapshot`. The result
//! is only as good as the snapshot set: a manifest version that no source
//! reports is invisible here, and blobs only it references will be deleted.
//! Callers must register every source of live manifests before running.

use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::blob::{BlobKey, BlobStore};
use crate::error::HoardError;
use crate::manifest::ManifestStore;
use crate::pool::WorkerPool;
use crate::types::Manifest;

/// Supplies manifest versions that must stay reachable
///
/// An implementation that cannot produce its complete set must return an
/// error rather than a partial list.
pub trait SnapshotSource {
    /// Short human-readable name for logs
    fn describe(&self) -> String;

    fn snapshots(&self) -> Result<Vec<Manifest>, HoardError>;
}

/// The manifest currently in the working tree
pub struct CurrentManifest<'a> {
    store: &'a ManifestStore,
}

impl<'a> CurrentManifest<'a> {
    pub fn new(store: &'a ManifestStore) -> Self {
        Self { store }
    }
}

impl SnapshotSource for CurrentManifest<'_> {
    fn describe(&self) -> String {
        format!("working tree manifest {}", self.store.path().display())
    }

    fn snapshots(&self) -> Result<Vec<Manifest>, HoardError> {
        Ok(vec![self.store.load()?])
    }
}

/// A fixed list of manifests
pub struct StaticSnapshots(pub Vec<Manifest>);

impl SnapshotSource for StaticSnapshots {
    fn describe(&self) -> String {
        format!("{} fixed snapshot(s)", self.0.len())
    }

    fn snapshots(&self) -> Result<Vec<Manifest>, HoardError> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GcFailure {
    pub key: BlobKey,
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GcReport {
    /// Manifest versions considered
    pub snapshots: usize,
    /// Distinct blobs referenced by them
    pub reachable: usize,
    /// Blobs found under the remote prefix
    pub remote: usize,
    pub orphans: Vec<BlobKey>,
    pub deleted: Vec<BlobKey>,
    pub failed: Vec<GcFailure>,
    /// False when deletion was declined at the confirmation step
    pub confirmed: bool,
}

impl GcReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Deletes remote blobs unreachable from every registered snapshot source
pub struct GarbageCollector<'a> {
    blobs: &'a dyn BlobStore,
    sources: Vec<&'a dyn SnapshotSource>,
    lock: Option<&'a ManifestStore>,
    pool: WorkerPool,
}

impl<'a> GarbageCollector<'a> {
    pub fn new(blobs: &'a dyn BlobStore, workers: usize) -> Self {
        Self {
            blobs,
            sources: Vec::new(),
            lock: None,
            pool: WorkerPool::new(workers),
        }
    }

    pub fn with_source(mut self, source: &'a dyn SnapshotSource) -> Self {
        self.sources.push(source);
        self
    }

    /// Hold this manifest's lock for the whole run so no local track or
    /// remove commits in between
    pub fn holding_lock(mut self, store: &'a ManifestStore) -> Self {
        self.lock = Some(store);
        self
    }

    /// Union of blob keys across every snapshot; fails if any source fails
    pub fn reachable(&self) -> Result<(usize, HashSet<BlobKey>), HoardError> {
        if self.sources.is_empty() {
            return Err(HoardError::Configuration(
                "no manifest snapshot sources registered; refusing to compute reachability".to_string(),
            ));
        }
        let mut count = 0;
        let mut reachable = HashSet::new();
        for source in &self.sources {
            let snapshots = source.snapshots()?;
            debug!(source = %source.describe(), snapshots = snapshots.len(), "loaded snapshots");
            count += snapshots.len();
            for manifest in &snapshots {
                reachable.extend(manifest.blob_keys());
            }
        }
        if count == 0 {
            return Err(HoardError::Configuration(
                "snapshot sources produced no manifests; refusing to compute reachability".to_string(),
            ));
        }
        Ok((count, reachable))
    }

    /// Compute orphans and delete them
    ///
    /// Unless `force` is set, `confirm` sees the orphan list first and
    /// nothing is deleted if it returns false. Individual delete failures are
    /// collected in the report; the sweep continues past them.
    pub fn run(&self, force: bool, confirm: impl FnOnce(&[BlobKey]) -> bool) -> Result<GcReport, HoardError> {
        let _guard = self.lock.map(ManifestStore::lock).transpose()?;

        let (snapshots, reachable) = self.reachable()?;
        let remote: Vec<BlobKey> = self.blobs.list_all()?.collect::<Result<_, _>>()?;

        let mut orphans: Vec<BlobKey> = remote.iter().filter(|k| !reachable.contains(k)).cloned().collect();
        orphans.sort();

        let mut report = GcReport {
            snapshots,
            reachable: reachable.len(),
            remote: remote.len(),
            orphans,
            confirmed: true,
            ..Default::default()
        };
        info!(
            snapshots = report.snapshots,
            reachable = report.reachable,
            remote = report.remote,
            orphans = report.orphans.len(),
            "computed orphaned blobs"
        );

        if report.orphans.is_empty() {
            return Ok(report);
        }
        if !force && !confirm(&report.orphans) {
            info!("deletion declined");
            report.confirmed = false;
            return Ok(report);
        }

        let blobs = self.blobs;
        let results = self.pool.run(report.orphans.clone(), |key| {
            let result = blobs.delete(&key);
            (key, result)
        })?;
        for (key, result) in results {
            match result {
                Ok(()) => report.deleted.push(key),
                Err(e) => {
                    warn!(key = %key, error = %e, "failed to delete orphaned blob");
                    report.failed.push(GcFailure {
                        key,
                        code: e.error_code(),
                        message: e.to_string(),
                    });
                }
            }
        }
        report.deleted.sort();
        report.failed.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(report)
    }
}
