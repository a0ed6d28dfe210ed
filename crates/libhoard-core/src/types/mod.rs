pub mod algorithm;
pub mod manifest;
pub mod remote;

pub use algorithm::Algorithm;
pub use manifest::{Manifest, ManifestEntry, MANIFEST_SCHEMA_VERSION};
pub use remote::{RemoteSettings, SigningMode};
