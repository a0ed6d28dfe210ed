//! Persisted manifest: load, atomic save, and locked read-modify-write
//!
//! The document format follows the file extension: `.json` manifests are
//! pretty-printed JSON, anything else is TOML. Both emit entries sorted by
//! path and carry no timestamps, so identical content serializes identically.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

use crate::config::DEFAULT_LOCK_TIMEOUT_MS;
use crate::error::HoardError;
use crate::lock::ManifestLock;
use crate::paths::is_valid_manifest_key;
use crate::types::{Manifest, RemoteSettings, MANIFEST_SCHEMA_VERSION};

/// Well-known manifest file name at the repository root
pub const MANIFEST_FILE: &str = ".hoard.toml";

/// Replace `path` with `bytes` via a sibling temp file and rename
///
/// Readers see either the old or the new content, never a partial write.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), HoardError> {
    write_atomic_with(path, |file| Ok(file.write_all(bytes)?))
}

/// Like [`write_atomic`], with the contents produced by `fill`
///
/// `path` is only replaced when `fill` succeeds; on error the temp file is
/// removed and any existing file is left untouched.
pub(crate) fn write_atomic_with<T>(
    path: &Path,
    fill: impl FnOnce(&mut File) -> Result<T, HoardError>,
) -> Result<T, HoardError> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| HoardError::InvalidArgs(format!("bad file path {}", path.display())))?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4().simple()));

    let written = (|| -> Result<T, HoardError> {
        let mut file = File::create(&tmp)?;
        let value = fill(&mut file)?;
        file.sync_all()?;
        fs::rename(&tmp, path)?;
        Ok(value)
    })();

    if written.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    written
}

/// Serialization format of a manifest document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    Toml,
    Json,
}

impl ManifestFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ManifestFormat::Json,
            _ => ManifestFormat::Toml,
        }
    }

    /// Parse and validate a manifest document
    pub fn parse(&self, text: &str) -> Result<Manifest, HoardError> {
        let mut manifest: Manifest = match self {
            ManifestFormat::Toml => toml::from_str(text)?,
            ManifestFormat::Json => serde_json::from_str(text)?,
        };
        if manifest.version > MANIFEST_SCHEMA_VERSION {
            return Err(HoardError::Corrupt(format!(
                "manifest schema version {} is newer than supported version {}",
                manifest.version, MANIFEST_SCHEMA_VERSION
            )));
        }
        manifest.rekey();
        for entry in manifest.files.values() {
            if !is_valid_manifest_key(&entry.path) {
                return Err(HoardError::Corrupt(format!("invalid manifest path '{}'", entry.path)));
            }
            if !entry.algorithm.is_valid_digest(&entry.digest) {
                return Err(HoardError::Corrupt(format!(
                    "invalid {} digest '{}' for '{}'",
                    entry.algorithm, entry.digest, entry.path
                )));
            }
        }
        Ok(manifest)
    }

    pub fn render(&self, manifest: &Manifest) -> Result<String, HoardError> {
        let mut text = match self {
            ManifestFormat::Toml => toml::to_string_pretty(manifest)?,
            ManifestFormat::Json => serde_json::to_string_pretty(manifest)?,
        };
        if !text.ends_with('\n') {
            text.push('\n');
        }
        Ok(text)
    }
}

/// Handle on the manifest document and its lock
#[derive(Debug, Clone)]
pub struct ManifestStore {
    path: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Duration,
}

impl ManifestStore {
    /// Manifest at `path`, locked through a sibling `.lock` file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = path.with_extension("lock");
        Self {
            path,
            lock_path,
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
        }
    }

    /// Keep the lock file somewhere else (e.g. inside the git directory)
    pub fn with_lock_path(mut self, lock_path: impl Into<PathBuf>) -> Self {
        self.lock_path = lock_path.into();
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    pub fn format(&self) -> ManifestFormat {
        ManifestFormat::from_path(&self.path)
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Read the manifest; `Uninitialized` if there is none yet
    pub fn load(&self) -> Result<Manifest, HoardError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(HoardError::Uninitialized(self.path.clone()))
            }
            Err(e) => return Err(e.into()),
        };
        self.format().parse(&text)
    }

    /// Write the manifest atomically: temp file in the same directory, then rename
    pub fn save(&self, manifest: &Manifest) -> Result<(), HoardError> {
        let text = self.format().render(manifest)?;
        write_atomic(&self.path, text.as_bytes())?;
        debug!(path = %self.path.display(), entries = manifest.len(), "manifest saved");
        Ok(())
    }

    /// Take the exclusive lock; released when the guard drops
    pub fn lock(&self) -> Result<ManifestLock, HoardError> {
        ManifestLock::acquire(&self.lock_path, self.lock_timeout)
    }

    /// Run `f` while holding the exclusive lock
    pub fn with_lock<T>(&self, f: impl FnOnce() -> Result<T, HoardError>) -> Result<T, HoardError> {
        let _guard = self.lock()?;
        f()
    }

    /// Locked read-modify-write
    ///
    /// The document is reloaded under the lock, so changes made by another
    /// process since our last read are kept. Nothing is written if `f` fails.
    pub fn update<T>(&self, f: impl FnOnce(&mut Manifest) -> Result<T, HoardError>) -> Result<T, HoardError> {
        self.with_lock(|| {
            let mut manifest = self.load()?;
            let out = f(&mut manifest)?;
            self.save(&manifest)?;
            Ok(out)
        })
    }

    /// Create the manifest, or replace the remote settings of an existing one
    pub fn init(&self, remote: RemoteSettings) -> Result<Manifest, HoardError> {
        self.with_lock(|| {
            let manifest = match self.load() {
                Ok(mut existing) => {
                    info!(path = %self.path.display(), "updating remote settings of existing manifest");
                    existing.remote = remote;
                    existing.version = MANIFEST_SCHEMA_VERSION;
                    existing
                }
                Err(HoardError::Uninitialized(_)) => Manifest::new(remote),
                Err(e) => return Err(e),
            };
            self.save(&manifest)?;
            Ok(manifest)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Algorithm, ManifestEntry, SigningMode};
    use tempfile::tempdir;

    fn digest(c: char) -> String {
        std::iter::repeat(c).take(64).collect()
    }

    fn sample(remote: RemoteSettings) -> Manifest {
        let mut m = Manifest::new(remote);
        let mut entry = ManifestEntry::new("zeta/last.bin", Algorithm::Sha256, digest('f'), 10);
        entry.metadata.insert("compression".into(), "gzip".into());
        m.upsert(entry);
        m.upsert(ManifestEntry::new("alpha/first.bin", Algorithm::Sha256, digest('a'), 20));
        m
    }

    #[test]
    fn test_load_missing_is_uninitialized() {
        let dir = tempdir().unwrap();
        let store = ManifestStore::new(dir.path().join(MANIFEST_FILE));
        let err = store.load().unwrap_err();
        assert!(matches!(err, HoardError::Uninitialized(_)));
        assert!(matches!(store.update(|_| Ok(())), Err(HoardError::Uninitialized(_))));
    }

    #[test]
    fn test_toml_roundtrip_sorted_and_stable() {
        let dir = tempdir().unwrap();
        let store = ManifestStore::new(dir.path().join(MANIFEST_FILE));
        let manifest = sample(RemoteSettings::new("bucket", Some("team".into())));

        store.save(&manifest).unwrap();
        let first = fs::read_to_string(store.path()).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded, manifest);
        assert_eq!(loaded.get("zeta/last.bin").unwrap().path, "zeta/last.bin");

        store.save(&loaded).unwrap();
        let second = fs::read_to_string(store.path()).unwrap();
        assert_eq!(first, second);

        let alpha = first.find("alpha/first.bin").unwrap();
        let zeta = first.find("zeta/last.bin").unwrap();
        assert!(alpha < zeta);
        assert!(first.contains("compression = \"gzip\""));
    }

    #[test]
    fn test_json_manifest_by_extension() {
        let dir = tempdir().unwrap();
        let store = ManifestStore::new(dir.path().join(".hoard.json"));
        assert_eq!(store.format(), ManifestFormat::Json);

        let mut remote = RemoteSettings::new("bucket", None);
        remote.signing = SigningMode::Unsigned;
        let manifest = sample(remote);
        store.save(&manifest).unwrap();

        let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["remote"]["signing"], "unsigned");
        assert_eq!(store.load().unwrap(), manifest);
    }

    #[test]
    fn test_unknown_metadata_survives_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(MANIFEST_FILE);
        fs::write(
            &path,
            format!(
                "version = 1\n\n[remote]\nbucket = \"b\"\n\n[files.\"a.bin\"]\ndigest = \"{}\"\nsize = 4\n\n[files.\"a.bin\".metadata]\nfuture-key = \"kept\"\n",
                digest('1')
            ),
        )
        .unwrap();
        let store = ManifestStore::new(&path);

        store.update(|m| {
            m.upsert(ManifestEntry::new("b.bin", Algorithm::Sha256, digest('2'), 1));
            Ok(())
        })
        .unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.remote.prefix, "hoard");
        assert_eq!(loaded.get("a.bin").unwrap().metadata["future-key"], "kept");
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn test_rejects_bad_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(MANIFEST_FILE);
        let store = ManifestStore::new(&path);

        fs::write(&path, "[remote]\nbucket = \"b\"\n\n[files.\"../escape\"]\ndigest = \"00\"\nsize = 1\n").unwrap();
        assert_eq!(store.load().unwrap_err().error_code(), "corrupt");

        fs::write(
            &path,
            "[remote]\nbucket = \"b\"\n\n[files.\"ok.bin\"]\ndigest = \"not-hex\"\nsize = 1\n",
        )
        .unwrap();
        assert_eq!(store.load().unwrap_err().error_code(), "corrupt");
    }

    #[test]
    fn test_failed_update_writes_nothing() {
        let dir = tempdir().unwrap();
        let store = ManifestStore::new(dir.path().join(MANIFEST_FILE));
        store.init(RemoteSettings::new("bucket", None)).unwrap();
        let before = fs::read_to_string(store.path()).unwrap();

        let result: Result<(), _> = store.update(|m| {
            m.upsert(ManifestEntry::new("x.bin", Algorithm::Sha256, digest('3'), 1));
            Err(HoardError::Internal("simulated failure".into()))
        });
        assert!(result.is_err());
        assert_eq!(fs::read_to_string(store.path()).unwrap(), before);

        // Lock was released on the error path
        assert!(store.lock().is_ok());
    }

    #[test]
    fn test_init_keeps_entries() {
        let dir = tempdir().unwrap();
        let store = ManifestStore::new(dir.path().join(MANIFEST_FILE));
        store.save(&sample(RemoteSettings::new("old-bucket", None))).unwrap();

        let manifest = store
            .init(RemoteSettings::new("new-bucket", Some("new-prefix".into())))
            .unwrap();
        assert_eq!(manifest.remote.bucket, "new-bucket");
        assert_eq!(manifest.len(), 2);
        assert_eq!(store.load().unwrap().remote.prefix, "new-prefix");
    }

    #[test]
    fn test_save_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let store = ManifestStore::new(dir.path().join(MANIFEST_FILE));
        store.save(&sample(RemoteSettings::new("bucket", None))).unwrap();

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec![MANIFEST_FILE.to_string()]);
    }
}
