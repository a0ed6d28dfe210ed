use std::io::{self, BufRead, Write};

use libhoard_core::{BlobKey, CurrentManifest, GarbageCollector, GcReport, HoardError};
use libhoard_git::ManifestHistory;
use tracing::warn;

use crate::cli::Cli;
use crate::context::HoardContext;
use crate::output::{output_partial, print_human};

pub fn run(cli: &Cli, force: bool) -> Result<(), HoardError> {
    let ctx = HoardContext::resolve(cli)?;
    let manifests = ctx.manifest_store();
    let manifest = manifests.load()?;
    let blobs = ctx.blob_store(&manifest.remote)?;

    let current = CurrentManifest::new(&manifests);
    let history = ctx
        .manifest_key()?
        .map(|key| ManifestHistory::new(&ctx.root, key));

    let mut collector = GarbageCollector::new(&blobs, ctx.workers())
        .with_source(&current)
        .holding_lock(&manifests);
    match &history {
        Some(history) => collector = collector.with_source(history),
        None => warn!(
            manifest = %ctx.manifest_path.display(),
            "manifest is outside the working tree; only its current version protects blobs"
        ),
    }

    let report = collector.run(force, |orphans| confirm(cli, orphans))?;
    if !report.confirmed {
        return Err(HoardError::Aborted(format!(
            "cleanup declined; {} orphaned blob(s) left in place",
            report.orphans.len()
        )));
    }

    let failure = if report.is_success() {
        None
    } else {
        Some(HoardError::PartialFailure {
            failed: report.failed.len(),
            total: report.orphans.len(),
        })
    };
    output_partial(cli, &report, failure.as_ref());
    print_report(cli, &report);
    match failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// List the orphans and ask for a literal "yes" on stdin
fn confirm(cli: &Cli, orphans: &[BlobKey]) -> bool {
    let mut stderr = io::stderr();
    if !cli.quiet {
        for key in orphans {
            let _ = writeln!(stderr, "  {}", key);
        }
    }
    let _ = write!(
        stderr,
        "Delete {} orphaned blob(s) from the remote? Type 'yes' to confirm: ",
        orphans.len()
    );
    let _ = stderr.flush();

    let mut answer = String::new();
    match io::stdin().lock().read_line(&mut answer) {
        Ok(_) => answer.trim() == "yes",
        Err(_) => false,
    }
}

fn print_report(cli: &Cli, report: &GcReport) {
    for key in &report.deleted {
        print_human(cli, &format!("     deleted  {}", key));
    }
    if !cli.json {
        for failure in &report.failed {
            eprintln!("failed: {}: {}", failure.key, failure.message);
        }
    }
    print_human(
        cli,
        &format!(
            "Scanned {} manifest version(s): {} reachable, {} remote, {} orphaned, {} deleted",
            report.snapshots,
            report.reachable,
            report.remote,
            report.orphans.len(),
            report.deleted.len()
        ),
    );
}
