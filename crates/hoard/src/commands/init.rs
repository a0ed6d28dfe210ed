use libhoard_core::{Algorithm, HoardError, RemoteSettings, SigningMode, StoreConfig};
use serde::Serialize;

use crate::cli::Cli;
use crate::context::HoardContext;
use crate::output::{output_success, print_human};

#[derive(Serialize)]
struct InitOutput {
    manifest: String,
    bucket: String,
    prefix: String,
    algorithm: Algorithm,
    signing: SigningMode,
    accelerate: bool,
    tracked: usize,
}

pub fn run(cli: &Cli, bucket: &str, prefix: Option<String>, algorithm: &str) -> Result<(), HoardError> {
    let ctx = HoardContext::resolve(cli)?;
    let algorithm: Algorithm = algorithm.parse()?;

    let mut remote = RemoteSettings::new(bucket, prefix);
    remote.algorithm = algorithm;
    // Flags given at init are persisted for everyone using the manifest
    let remote = ctx.effective_remote(&remote);
    StoreConfig::from_remote(&remote).validate()?;

    let manifest = ctx.manifest_store().init(remote)?;

    let output = InitOutput {
        manifest: ctx.manifest_path.to_string_lossy().to_string(),
        bucket: manifest.remote.bucket.clone(),
        prefix: manifest.remote.prefix.clone(),
        algorithm: manifest.remote.algorithm,
        signing: manifest.remote.signing,
        accelerate: manifest.remote.accelerate,
        tracked: manifest.len(),
    };
    output_success(cli, output);
    print_human(
        cli,
        &format!(
            "Initialized hoard manifest {} (bucket {}, prefix {}, {})",
            ctx.manifest_path.display(),
            manifest.remote.bucket,
            manifest.remote.prefix,
            manifest.remote.algorithm
        ),
    );

    Ok(())
}
