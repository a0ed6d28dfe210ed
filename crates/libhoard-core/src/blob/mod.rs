//! Remote blob storage
//!
//! Blobs are addressed only by `(prefix, algorithm, digest)`:
//! `<prefix>/assets/<algorithm>/<digest>.gz`. The collector relies on this
//! being the single addressing scheme, so [`StoreConfig::object_key`] and
//! [`StoreConfig::parse_object_key`] are the only places that know it.

mod object;

use std::fmt;
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::error::HoardError;
use crate::types::{Algorithm, RemoteSettings, SigningMode};

pub use object::ObjectBlobStore;

/// Path segment between the prefix and the algorithm namespace
pub const ASSETS_INFIX: &str = "assets";

/// Suffix of every stored blob
pub const BLOB_SUFFIX: &str = ".gz";

/// Identity of a blob: digest within an algorithm namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlobKey {
    pub algorithm: Algorithm,
    pub digest: String,
}

impl BlobKey {
    pub fn new(algorithm: Algorithm, digest: impl Into<String>) -> Self {
        Self {
            algorithm,
            digest: digest.into(),
        }
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.digest)
    }
}

/// Where and how to talk to the object store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub bucket: String,
    pub prefix: String,
    pub signing: SigningMode,
    pub accelerate: bool,
}

impl StoreConfig {
    pub fn new(bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: prefix.into(),
            signing: SigningMode::Signed,
            accelerate: false,
        }
    }

    pub fn from_remote(remote: &RemoteSettings) -> Self {
        Self {
            bucket: remote.bucket.clone(),
            prefix: remote.prefix.clone(),
            signing: remote.signing,
            accelerate: remote.accelerate,
        }
    }

    /// Reject contradictory options before any network call
    pub fn validate(&self) -> Result<(), HoardError> {
        if self.bucket.trim().is_empty() {
            return Err(HoardError::Configuration("bucket must not be empty".to_string()));
        }
        if self.accelerate && self.signing == SigningMode::Unsigned {
            return Err(HoardError::Configuration(
                "transfer acceleration is not supported for unsigned requests".to_string(),
            ));
        }
        Ok(())
    }

    /// Key prefix under which every blob lives
    pub fn assets_prefix(&self) -> String {
        let prefix = self.prefix.trim_matches('/');
        if prefix.is_empty() {
            ASSETS_INFIX.to_string()
        } else {
            format!("{}/{}", prefix, ASSETS_INFIX)
        }
    }

    /// Remote key for a blob
    pub fn object_key(&self, key: &BlobKey) -> String {
        format!("{}/{}/{}{}", self.assets_prefix(), key.algorithm, key.digest, BLOB_SUFFIX)
    }

    /// Inverse of [`object_key`](Self::object_key); `None` for foreign keys
    pub fn parse_object_key(&self, object_key: &str) -> Option<BlobKey> {
        let rest = object_key.strip_prefix(&self.assets_prefix())?.strip_prefix('/')?;
        let (algorithm, file) = rest.split_once('/')?;
        let algorithm: Algorithm = algorithm.parse().ok()?;
        let digest = file.strip_suffix(BLOB_SUFFIX)?;
        if !algorithm.is_valid_digest(digest) {
            return None;
        }
        Some(BlobKey::new(algorithm, digest))
    }
}

/// Lazily-evaluated sequence of blob keys
pub type BlobKeyIter<'a> = Box<dyn Iterator<Item = Result<BlobKey, HoardError>> + 'a>;

/// Compressed bytes of one blob, pulled from the store as they are read
///
/// Transport errors surface as `io::Error`s that convert back into the
/// original [`HoardError`].
pub type BlobReader<'a> = Box<dyn Read + 'a>;

/// Streaming sink for one blob
///
/// Nothing becomes visible under the key until [`finish`](Self::finish)
/// succeeds. A writer that is neither finished nor aborted leaves no object
/// behind, though a backend may keep an incomplete multipart upload around
/// until its own expiry rules clear it.
pub trait BlobUpload: Write {
    /// Commit everything written so far
    fn finish(self: Box<Self>) -> Result<(), HoardError>;

    /// Discard the upload
    fn abort(self: Box<Self>) -> Result<(), HoardError>;
}

/// Capability set over the remote object store
///
/// Implementations must be shareable across worker threads.
pub trait BlobStore: Send + Sync {
    fn config(&self) -> &StoreConfig;

    /// `Ok(false)` when absent; errors only on transport failure
    fn exists(&self, key: &BlobKey) -> Result<bool, HoardError>;

    /// Begin writing compressed bytes; writing an existing key again is harmless
    fn upload(&self, key: &BlobKey) -> Result<Box<dyn BlobUpload + '_>, HoardError>;

    /// Stream compressed bytes; `NotFound` when absent
    fn download(&self, key: &BlobKey) -> Result<BlobReader<'_>, HoardError>;

    /// Remove a blob; deleting an absent key succeeds
    fn delete(&self, key: &BlobKey) -> Result<(), HoardError>;

    /// Every blob under the configured prefix, paging handled internally
    fn list_all(&self) -> Result<BlobKeyIter<'_>, HoardError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sha(c: char) -> String {
        std::iter::repeat(c).take(64).collect()
    }

    #[test]
    fn test_object_key_shape() {
        let config = StoreConfig::new("bucket", "team/repo");
        let key = BlobKey::new(Algorithm::Sha256, sha('a'));
        assert_eq!(
            config.object_key(&key),
            format!("team/repo/assets/sha256/{}.gz", sha('a'))
        );
    }

    #[test]
    fn test_parse_object_key_roundtrip() {
        let config = StoreConfig::new("bucket", "/repo/");
        let key = BlobKey::new(Algorithm::Md5, "0123456789abcdef0123456789abcdef");
        let object_key = config.object_key(&key);
        assert_eq!(config.parse_object_key(&object_key), Some(key));
    }

    #[test]
    fn test_parse_rejects_foreign_keys() {
        let config = StoreConfig::new("bucket", "repo");
        assert_eq!(config.parse_object_key("repo/assets/sha256/short.gz"), None);
        assert_eq!(config.parse_object_key(&format!("other/assets/sha256/{}.gz", sha('b'))), None);
        assert_eq!(config.parse_object_key(&format!("repo/assets/sha256/{}", sha('b'))), None);
        assert_eq!(config.parse_object_key(&format!("repo/assets/crc32/{}.gz", sha('b'))), None);
        // Legacy layout with the file path appended after the digest
        assert_eq!(
            config.parse_object_key(&format!("repo/assets/{}/data/file.bin.gz", sha('c'))),
            None
        );
    }

    #[test]
    fn test_empty_prefix() {
        let config = StoreConfig::new("bucket", "");
        let key = BlobKey::new(Algorithm::Sha256, sha('d'));
        assert_eq!(config.object_key(&key), format!("assets/sha256/{}.gz", sha('d')));
        assert_eq!(config.parse_object_key(&config.object_key(&key)), Some(key));
    }

    #[test]
    fn test_acceleration_requires_signing() {
        let mut config = StoreConfig::new("bucket", "repo");
        config.accelerate = true;
        assert!(config.validate().is_ok());

        config.signing = SigningMode::Unsigned;
        let err = config.validate().unwrap_err();
        assert_eq!(err.error_code(), "configuration_error");

        config.accelerate = false;
        assert!(config.validate().is_ok());
    }
}
