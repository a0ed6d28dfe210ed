use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use super::{Algorithm, RemoteSettings};
use crate::blob::BlobKey;

/// Schema version written into every manifest document
pub const MANIFEST_SCHEMA_VERSION: u32 = 1;

/// One tracked asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Repository-relative POSIX path; the key of the entry in the document
    #[serde(skip)]
    pub path: String,
    /// Hex-encoded digest of the uncompressed content
    pub digest: String,
    #[serde(default)]
    pub algorithm: Algorithm,
    /// Uncompressed length in bytes
    pub size: u64,
    /// Free-form extension data, preserved verbatim
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl ManifestEntry {
    pub fn new(path: impl Into<String>, algorithm: Algorithm, digest: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            digest: digest.into(),
            algorithm,
            size,
            metadata: BTreeMap::new(),
        }
    }

    /// Address of the blob holding this entry's content
    pub fn blob_key(&self) -> BlobKey {
        BlobKey::new(self.algorithm, self.digest.clone())
    }
}

/// The persisted path -> digest mapping plus remote configuration
///
/// `files` is a `BTreeMap` so serialization is always sorted by path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default = "schema_version")]
    pub version: u32,
    pub remote: RemoteSettings,
    #[serde(default)]
    pub files: BTreeMap<String, ManifestEntry>,
}

fn schema_version() -> u32 {
    MANIFEST_SCHEMA_VERSION
}

impl Manifest {
    pub fn new(remote: RemoteSettings) -> Self {
        Self {
            version: MANIFEST_SCHEMA_VERSION,
            remote,
            files: BTreeMap::new(),
        }
    }

    pub fn get(&self, path: &str) -> Option<&ManifestEntry> {
        self.files.get(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Insert or replace the entry for `entry.path`
    ///
    /// Metadata keys already on the stored entry survive unless the new entry
    /// sets them.
    pub fn upsert(&mut self, mut entry: ManifestEntry) {
        if let Some(existing) = self.files.get(&entry.path) {
            for (k, v) in &existing.metadata {
                entry.metadata.entry(k.clone()).or_insert_with(|| v.clone());
            }
        }
        self.files.insert(entry.path.clone(), entry);
    }

    pub fn remove(&mut self, path: &str) -> Option<ManifestEntry> {
        self.files.remove(path)
    }

    /// Whether any entry points at `key`
    pub fn references(&self, key: &BlobKey) -> bool {
        self.files
            .values()
            .any(|e| e.algorithm == key.algorithm && e.digest == key.digest)
    }

    /// Every blob this manifest refers to
    pub fn blob_keys(&self) -> HashSet<BlobKey> {
        self.files.values().map(ManifestEntry::blob_key).collect()
    }

    /// Restore each entry's `path` from its map key after deserialization
    pub(crate) fn rekey(&mut self) {
        for (path, entry) in self.files.iter_mut() {
            entry.path = path.clone();
        }
    }
}
