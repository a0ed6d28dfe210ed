use serde::{Deserialize, Serialize};

use super::Algorithm;

/// Default remote prefix when `init` is given none
pub const DEFAULT_PREFIX: &str = "hoard";

/// Whether requests to the object store are signed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SigningMode {
    #[default]
    Signed,
    Unsigned,
}

impl SigningMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SigningMode::Signed => "signed",
            SigningMode::Unsigned => "unsigned",
        }
    }
}

/// Repository-level remote configuration, versioned with the manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSettings {
    /// Bucket name, or a `s3://`, `file://` or `memory://` URL
    pub bucket: String,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub algorithm: Algorithm,
    #[serde(default)]
    pub signing: SigningMode,
    #[serde(default)]
    pub accelerate: bool,
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

impl RemoteSettings {
    pub fn new(bucket: impl Into<String>, prefix: Option<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: prefix.unwrap_or_else(default_prefix),
            algorithm: Algorithm::default(),
            signing: SigningMode::default(),
            accelerate: false,
        }
    }
}
