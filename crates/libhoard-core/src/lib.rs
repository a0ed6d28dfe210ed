pub mod types;
pub mod hash;
pub mod blob;
pub mod lock;
pub mod manifest;
pub mod paths;
pub mod pool;
pub mod sync;
pub mod gc;
pub mod config;
pub mod error;

pub use error::HoardError;
pub use types::{Algorithm, Manifest, ManifestEntry, RemoteSettings, SigningMode};
pub use blob::{BlobKey, BlobReader, BlobStore, BlobUpload, ObjectBlobStore, StoreConfig};
pub use manifest::{ManifestFormat, ManifestStore, MANIFEST_FILE};
pub use paths::PathResolver;
pub use sync::{BatchReport, ListEntry, LocalState, Outcome, SyncEngine, SyncOptions};
pub use gc::{CurrentManifest, GarbageCollector, GcReport, SnapshotSource, StaticSnapshots};
pub use config::{LocalConfig, load_local_config};
