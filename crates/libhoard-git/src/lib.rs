//! Git integration for hoard
//!
//! - Repository discovery: working-tree root and the (common) git directory
//! - Manifest history: every committed or staged version of the manifest,
//!   used as the reachable set for remote garbage collection

mod error;
mod history;
mod repo;

pub use error::GitError;
pub use history::ManifestHistory;
pub use repo::{discover, RepoLocation};
