use std::path::PathBuf;
use std::sync::Arc;

use libhoard_core::{
    load_local_config, HoardError, LocalConfig, ManifestStore, ObjectBlobStore, PathResolver, RemoteSettings,
    SigningMode, StoreConfig, SyncEngine, SyncOptions, MANIFEST_FILE,
};
use tracing::debug;

use crate::cli::Cli;

/// Resolved context for a hoard command
pub struct HoardContext {
    /// Working-tree root
    pub root: PathBuf,
    /// Common git directory
    pub git_dir: PathBuf,
    pub cwd: PathBuf,
    /// Absolute path of the manifest file
    pub manifest_path: PathBuf,
    pub local: LocalConfig,
    workers: Option<usize>,
    no_sign_request: bool,
    accelerate: bool,
}

impl HoardContext {
    /// Discover the repository around the current directory
    pub fn resolve(cli: &Cli) -> Result<Self, HoardError> {
        let cwd = std::env::current_dir()?;
        let location = libhoard_git::discover(&cwd)?;
        let manifest_path = match &cli.manifest {
            Some(path) => cwd.join(path),
            None => location.root.join(MANIFEST_FILE),
        };
        let local = load_local_config(&location.git_dir)?;
        debug!(
            root = %location.root.display(),
            manifest = %manifest_path.display(),
            "resolved context"
        );

        Ok(Self {
            root: location.root,
            git_dir: location.git_dir,
            cwd,
            manifest_path,
            local,
            workers: cli.workers,
            no_sign_request: cli.no_sign_request,
            accelerate: cli.accelerate,
        })
    }

    /// Manifest store locked through a file inside the git directory, so the
    /// lock never shows up in the working tree
    pub fn manifest_store(&self) -> ManifestStore {
        ManifestStore::new(&self.manifest_path)
            .with_lock_path(self.git_dir.join("hoard").join("manifest.lock"))
            .with_lock_timeout(self.local.lock_timeout())
    }

    /// Repository-relative key of the manifest, if it lives inside the working tree
    pub fn manifest_key(&self) -> Result<Option<String>, HoardError> {
        let resolver = PathResolver::new(&self.root, &self.cwd)?;
        Ok(resolver
            .key_for_path(&self.manifest_path)
            .filter(|key| !key.is_empty()))
    }

    pub fn resolver(&self) -> Result<PathResolver, HoardError> {
        let resolver = PathResolver::new(&self.root, &self.cwd)?;
        Ok(resolver.with_ignored(self.manifest_key()?))
    }

    pub fn sync_options(&self) -> SyncOptions {
        let mut options = SyncOptions::from_local(&self.local);
        if let Some(workers) = self.workers {
            options.workers = workers.max(1);
        }
        options
    }

    pub fn workers(&self) -> usize {
        self.sync_options().workers
    }

    /// Manifest remote settings with per-invocation overrides applied
    pub fn effective_remote(&self, remote: &RemoteSettings) -> RemoteSettings {
        let mut remote = remote.clone();
        if self.no_sign_request {
            remote.signing = SigningMode::Unsigned;
        }
        if self.accelerate {
            remote.accelerate = true;
        }
        remote
    }

    pub fn blob_store(&self, remote: &RemoteSettings) -> Result<ObjectBlobStore, HoardError> {
        ObjectBlobStore::connect(StoreConfig::from_remote(&self.effective_remote(remote)))
    }

    /// Engine over the manifest's remote; fails if the manifest does not exist
    pub fn engine(&self) -> Result<SyncEngine, HoardError> {
        let manifests = self.manifest_store();
        let manifest = manifests.load()?;
        let blobs = self.blob_store(&manifest.remote)?;
        Ok(SyncEngine::new(
            manifests,
            Arc::new(blobs),
            self.resolver()?,
            self.sync_options(),
        ))
    }
}
