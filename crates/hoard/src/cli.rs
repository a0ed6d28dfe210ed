use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "hoard",
    about = "Content-addressed large-file storage for git repositories",
    version
)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress human-readable output
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Log debug detail to stderr (overrides HOARD_LOG)
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Number of parallel transfer workers
    #[arg(long, global = true)]
    pub workers: Option<usize>,

    /// Send unsigned requests (public buckets)
    #[arg(long, global = true)]
    pub no_sign_request: bool,

    /// Use the S3 transfer acceleration endpoint
    #[arg(long, global = true)]
    pub accelerate: bool,

    /// Use this manifest instead of .hoard.toml at the repository root
    #[arg(long, global = true)]
    pub manifest: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create the manifest, or update the remote settings of an existing one
    Init {
        /// Bucket name, or an s3://, file:// or memory:// URL
        bucket: String,

        /// Key prefix inside the bucket
        prefix: Option<String>,

        /// Digest algorithm for newly tracked files (sha256, md5)
        #[arg(long, default_value = "sha256")]
        algorithm: String,
    },

    /// Upload files and record them in the manifest
    Track {
        /// Files, directories or glob patterns
        paths: Vec<String>,

        /// Re-track every tracked file whose content changed
        #[arg(long, conflicts_with = "paths")]
        modified: bool,
    },

    /// Download tracked files into the working tree
    Checkout {
        /// Tracked paths, directories or glob patterns
        paths: Vec<String>,

        /// Check out every tracked file
        #[arg(long, conflicts_with = "paths")]
        all: bool,
    },

    /// List tracked files (under the current directory by default)
    Ls {
        /// Tracked paths, directories or glob patterns
        paths: Vec<String>,

        /// List every tracked file
        #[arg(long, conflicts_with = "paths")]
        all: bool,

        /// Show digest, size and working-tree state
        #[arg(long, short)]
        long: bool,
    },

    /// Stop tracking files
    Remove {
        /// Tracked paths, directories or glob patterns
        #[arg(required = true)]
        paths: Vec<String>,

        /// Also delete blobs no remaining entry references
        #[arg(long)]
        purge: bool,
    },

    /// Delete remote blobs unreachable from the manifest and its git history
    Cleanup {
        /// Delete without asking for confirmation
        #[arg(long)]
        force: bool,
    },
}
