use std::fmt;
use std::io::{self, Read, Write};
use std::mem;
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{parse_url, ObjectMeta, ObjectStore, WriteMultipart};
use tokio::runtime::Runtime;
use tracing::debug;
use url::Url;

use super::{BlobKey, BlobKeyIter, BlobReader, BlobStore, BlobUpload, StoreConfig};
use crate::error::{tunnel, HoardError};
use crate::types::SigningMode;

/// Uploads up to this size are a single PUT; larger ones go multipart in
/// parts of this size
pub const DEFAULT_PART_SIZE: usize = 16 * 1024 * 1024;

/// Parts of one multipart upload in flight at once
const MAX_PARTS_IN_FLIGHT: usize = 4;

/// Blob store backed by an [`object_store`] backend (S3, local filesystem
/// or in-memory)
///
/// `object_store` is async; calls are driven to completion on a private
/// runtime so the sync engine's worker threads can block on them.
pub struct ObjectBlobStore {
    store: Arc<dyn ObjectStore>,
    /// Path inside the backend taken from a `file://` or `s3://` URL
    root: String,
    config: StoreConfig,
    runtime: Runtime,
    part_size: usize,
}

impl fmt::Debug for ObjectBlobStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectBlobStore")
            .field("store", &self.store.to_string())
            .field("root", &self.root)
            .field("config", &self.config)
            .field("part_size", &self.part_size)
            .finish()
    }
}

impl ObjectBlobStore {
    /// Build the backend described by `config.bucket`
    ///
    /// A bare bucket name or `s3://bucket[/path]` selects S3 with credentials
    /// and region from the environment. Other URLs (`file://`, `memory://`)
    /// are handed to [`object_store::parse_url`].
    pub fn connect(config: StoreConfig) -> Result<Self, HoardError> {
        config.validate()?;

        let (store, root) = match Url::parse(&config.bucket) {
            Ok(url) if url.scheme() == "s3" => {
                let bucket = url.host_str().ok_or_else(|| {
                    HoardError::Configuration(format!("no bucket in '{}'", config.bucket))
                })?;
                let root = url.path().trim_matches('/').to_string();
                (s3_backend(bucket, &config)?, root)
            }
            Ok(url) => {
                if config.accelerate {
                    return Err(HoardError::Configuration(format!(
                        "transfer acceleration is only available for S3 buckets, not '{}'",
                        url.scheme()
                    )));
                }
                let (store, path) = parse_url(&url)?;
                (Arc::from(store), path.to_string())
            }
            Err(_) => (s3_backend(&config.bucket, &config)?, String::new()),
        };

        debug!(bucket = %config.bucket, prefix = %config.prefix, backend = %store, "connected blob store");
        Self::with_root(store, root, config)
    }

    /// Wrap an existing backend
    pub fn with_store(store: Arc<dyn ObjectStore>, config: StoreConfig) -> Result<Self, HoardError> {
        config.validate()?;
        Self::with_root(store, String::new(), config)
    }

    /// Fresh in-memory backend
    pub fn in_memory(config: StoreConfig) -> Result<Self, HoardError> {
        Self::with_store(Arc::new(InMemory::new()), config)
    }

    fn with_root(store: Arc<dyn ObjectStore>, root: String, config: StoreConfig) -> Result<Self, HoardError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("hoard-io")
            .enable_all()
            .build()?;
        Ok(Self {
            store,
            root,
            config,
            runtime,
            part_size: DEFAULT_PART_SIZE,
        })
    }

    /// Override the multipart threshold and part size
    ///
    /// S3 rejects parts under 5 MiB other than the last, so small values
    /// only make sense against local backends.
    pub fn with_part_size(mut self, bytes: usize) -> Self {
        self.part_size = bytes.max(1);
        self
    }

    /// The raw backend, for callers that need to inspect stored objects
    pub fn backend(&self) -> Arc<dyn ObjectStore> {
        Arc::clone(&self.store)
    }

    fn location(&self, key: &BlobKey) -> Path {
        self.rooted(&self.config.object_key(key))
    }

    fn rooted(&self, key: &str) -> Path {
        if self.root.is_empty() {
            Path::from(key)
        } else {
            Path::from(format!("{}/{}", self.root, key))
        }
    }

    fn parse_location(&self, location: &Path) -> Option<BlobKey> {
        let raw = location.as_ref();
        let relative = if self.root.is_empty() {
            raw
        } else {
            raw.strip_prefix(self.root.as_str())?.strip_prefix('/')?
        };
        self.config.parse_object_key(relative)
    }
}

fn s3_backend(bucket: &str, config: &StoreConfig) -> Result<Arc<dyn ObjectStore>, HoardError> {
    let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
    if config.signing == SigningMode::Unsigned {
        builder = builder.with_skip_signature(true);
    }
    if config.accelerate {
        builder = builder
            .with_endpoint(format!("https://{}.s3-accelerate.amazonaws.com", bucket))
            .with_virtual_hosted_style_request(true);
    }
    let store = builder
        .build()
        .map_err(|e| HoardError::Configuration(format!("S3 client for '{}': {}", bucket, e)))?;
    Ok(Arc::new(store))
}

impl BlobStore for ObjectBlobStore {
    fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn exists(&self, key: &BlobKey) -> Result<bool, HoardError> {
        let location = self.location(key);
        match self.runtime.block_on(self.store.head(&location)) {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn upload(&self, key: &BlobKey) -> Result<Box<dyn BlobUpload + '_>, HoardError> {
        Ok(Box::new(ObjectUpload {
            owner: self,
            location: self.location(key),
            pending: Vec::new(),
            multipart: None,
            written: 0,
        }))
    }

    fn download(&self, key: &BlobKey) -> Result<BlobReader<'_>, HoardError> {
        let location = self.location(key);
        let object = self.runtime.block_on(self.store.get(&location))?;
        debug!(key = %location, bytes = object.meta.size, "get blob");
        Ok(Box::new(ObjectDownload {
            owner: self,
            stream: object.into_stream(),
            chunk: Bytes::new(),
        }))
    }

    fn delete(&self, key: &BlobKey) -> Result<(), HoardError> {
        let location = self.location(key);
        match self.runtime.block_on(self.store.delete(&location)) {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list_all(&self) -> Result<BlobKeyIter<'_>, HoardError> {
        let prefix = self.rooted(&self.config.assets_prefix());
        let stream = self.store.list(Some(&prefix));
        Ok(Box::new(ListIter { owner: self, stream }))
    }
}

/// Buffers the first part in memory and switches to a multipart upload once
/// the blob outgrows it
struct ObjectUpload<'a> {
    owner: &'a ObjectBlobStore,
    location: Path,
    pending: Vec<u8>,
    multipart: Option<WriteMultipart>,
    written: u64,
}

impl ObjectUpload<'_> {
    fn start_multipart(&mut self) -> io::Result<()> {
        let runtime = &self.owner.runtime;
        let upload = runtime
            .block_on(self.owner.store.put_multipart(&self.location))
            .map_err(|e| tunnel(e.into()))?;
        debug!(key = %self.location, "started multipart upload");
        let mut writer = WriteMultipart::new_with_chunk_size(upload, self.owner.part_size);
        let pending = mem::take(&mut self.pending);
        // Part uploads are spawned onto the runtime
        runtime.block_on(async { writer.write(&pending) });
        self.multipart = Some(writer);
        Ok(())
    }
}

impl Write for ObjectUpload<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.multipart {
            Some(writer) => {
                self.owner
                    .runtime
                    .block_on(async {
                        writer.wait_for_capacity(MAX_PARTS_IN_FLIGHT).await?;
                        writer.write(buf);
                        Ok::<_, object_store::Error>(())
                    })
                    .map_err(|e| tunnel(e.into()))?;
            }
            None => {
                self.pending.extend_from_slice(buf);
                if self.pending.len() > self.owner.part_size {
                    self.start_multipart()?;
                }
            }
        }
        self.written += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl BlobUpload for ObjectUpload<'_> {
    fn finish(self: Box<Self>) -> Result<(), HoardError> {
        let this = *self;
        debug!(key = %this.location, bytes = this.written, multipart = this.multipart.is_some(), "put blob");
        match this.multipart {
            Some(writer) => {
                this.owner.runtime.block_on(writer.finish())?;
            }
            None => {
                this.owner
                    .runtime
                    .block_on(this.owner.store.put(&this.location, this.pending.into()))?;
            }
        }
        Ok(())
    }

    fn abort(self: Box<Self>) -> Result<(), HoardError> {
        let this = *self;
        if let Some(writer) = this.multipart {
            debug!(key = %this.location, "aborting multipart upload");
            this.owner.runtime.block_on(writer.abort())?;
        }
        Ok(())
    }
}

/// Hands out the body of a GET one network chunk at a time
struct ObjectDownload<'a> {
    owner: &'a ObjectBlobStore,
    stream: BoxStream<'static, object_store::Result<Bytes>>,
    chunk: Bytes,
}

impl Read for ObjectDownload<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.chunk.is_empty() {
            match self.owner.runtime.block_on(self.stream.next()) {
                Some(Ok(chunk)) => self.chunk = chunk,
                Some(Err(e)) => return Err(tunnel(e.into())),
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.chunk.len());
        buf[..n].copy_from_slice(&self.chunk[..n]);
        self.chunk = self.chunk.slice(n..);
        Ok(n)
    }
}

/// Pulls one listing entry at a time from the backend's paged stream
struct ListIter<'a> {
    owner: &'a ObjectBlobStore,
    stream: BoxStream<'static, object_store::Result<ObjectMeta>>,
}

impl Iterator for ListIter<'_> {
    type Item = Result<BlobKey, HoardError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.owner.runtime.block_on(self.stream.next())? {
                Ok(meta) => match self.owner.parse_location(&meta.location) {
                    Some(key) => return Some(Ok(key)),
                    None => debug!(key = %meta.location, "ignoring foreign object"),
                },
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{encode_to, DEFAULT_COMPRESSION_LEVEL};
    use crate::types::Algorithm;
    use object_store::PutPayload;
    use std::collections::HashSet;

    fn store() -> ObjectBlobStore {
        ObjectBlobStore::in_memory(StoreConfig::new("memory://", "repo")).unwrap()
    }

    fn blob(data: &[u8]) -> (BlobKey, Vec<u8>) {
        let mut compressed = Vec::new();
        let (digest, _) = encode_to(Algorithm::Sha256, data, &mut compressed, DEFAULT_COMPRESSION_LEVEL).unwrap();
        (BlobKey::new(Algorithm::Sha256, digest), compressed)
    }

    fn put(store: &dyn BlobStore, key: &BlobKey, bytes: &[u8]) {
        let mut upload = store.upload(key).unwrap();
        upload.write_all(bytes).unwrap();
        upload.finish().unwrap();
    }

    fn get(store: &dyn BlobStore, key: &BlobKey) -> Vec<u8> {
        let mut out = Vec::new();
        store.download(key).unwrap().read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_upload_download_exists_delete() {
        let store = store();
        let (key, bytes) = blob(b"payload");

        assert!(!store.exists(&key).unwrap());
        put(&store, &key, &bytes);
        assert!(store.exists(&key).unwrap());
        assert_eq!(get(&store, &key), bytes);

        // Idempotent upload
        put(&store, &key, &bytes);
        assert_eq!(get(&store, &key), bytes);

        store.delete(&key).unwrap();
        assert!(!store.exists(&key).unwrap());
        // Idempotent delete
        store.delete(&key).unwrap();
    }

    #[test]
    fn test_download_missing_is_not_found() {
        let store = store();
        let (key, _) = blob(b"never uploaded");
        let err = store.download(&key).err().unwrap();
        assert_eq!(err.error_code(), "not_found");
    }

    #[test]
    fn test_unfinished_upload_is_invisible() {
        let store = store();
        let (key, bytes) = blob(b"half written");

        let mut upload = store.upload(&key).unwrap();
        upload.write_all(&bytes).unwrap();
        assert!(!store.exists(&key).unwrap());
        upload.abort().unwrap();
        assert!(!store.exists(&key).unwrap());
    }

    #[test]
    fn test_large_blob_goes_multipart() {
        let store = store().with_part_size(1024);
        let data: Vec<u8> = (0..200_000u32).map(|i| (i.wrapping_mul(2_654_435_761) >> 13) as u8).collect();
        let (key, bytes) = blob(&data);
        assert!(bytes.len() > 4 * 1024);

        let mut upload = store.upload(&key).unwrap();
        // Small writes so the switch happens mid-stream
        for piece in bytes.chunks(700) {
            upload.write_all(piece).unwrap();
        }
        upload.finish().unwrap();

        assert!(store.exists(&key).unwrap());
        assert_eq!(get(&store, &key), bytes);
    }

    #[test]
    fn test_aborted_multipart_leaves_nothing() {
        let store = store().with_part_size(64);
        let (key, _) = blob(b"irrelevant");

        let mut upload = store.upload(&key).unwrap();
        upload.write_all(&[1u8; 1000]).unwrap();
        upload.abort().unwrap();

        assert!(!store.exists(&key).unwrap());
    }

    #[test]
    fn test_list_all_skips_foreign_objects() {
        let store = store();
        let mut expected = HashSet::new();
        for i in 0..5u8 {
            let (key, bytes) = blob(&[i; 16]);
            put(&store, &key, &bytes);
            expected.insert(key);
        }

        let backend = store.backend();
        store
            .runtime
            .block_on(backend.put(&Path::from("repo/assets/README.txt"), PutPayload::from_static(b"hi")))
            .unwrap();
        store
            .runtime
            .block_on(backend.put(&Path::from("other/assets/x.gz"), PutPayload::from_static(b"hi")))
            .unwrap();

        let listed: HashSet<BlobKey> = store.list_all().unwrap().map(Result::unwrap).collect();
        assert_eq!(listed, expected);
    }

    #[test]
    fn test_connect_rejects_accelerated_unsigned_before_network() {
        let mut config = StoreConfig::new("some-bucket", "repo");
        config.accelerate = true;
        config.signing = SigningMode::Unsigned;
        let err = ObjectBlobStore::connect(config).unwrap_err();
        assert_eq!(err.error_code(), "configuration_error");
    }

    #[test]
    fn test_connect_file_url_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let url = Url::from_directory_path(dir.path()).unwrap();
        let store = ObjectBlobStore::connect(StoreConfig::new(url.as_str(), "repo"))
            .unwrap()
            .with_part_size(4096);

        let (key, bytes) = blob(b"on disk");
        put(&store, &key, &bytes);
        assert_eq!(get(&store, &key), bytes);

        let data: Vec<u8> = (0..100_000u32).map(|i| (i.wrapping_mul(40_503) >> 7) as u8).collect();
        let (large, large_bytes) = blob(&data);
        put(&store, &large, &large_bytes);
        assert_eq!(get(&store, &large), large_bytes);

        let listed: HashSet<BlobKey> = store.list_all().unwrap().map(Result::unwrap).collect();
        assert_eq!(listed, HashSet::from([key, large]));
    }
}
