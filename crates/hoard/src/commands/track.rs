use libhoard_core::HoardError;

use crate::cli::Cli;
use crate::context::HoardContext;
use crate::output::output_report;

pub fn run(cli: &Cli, paths: &[String], modified: bool) -> Result<(), HoardError> {
    if paths.is_empty() && !modified {
        return Err(HoardError::InvalidArgs(
            "give paths to track, or --modified to re-track changed files".to_string(),
        ));
    }

    let ctx = HoardContext::resolve(cli)?;
    let engine = ctx.engine()?;
    let report = if modified {
        engine.track_modified()?
    } else {
        engine.track(paths)?
    };

    output_report(cli, "Tracked", &report, |key| engine.resolver().display(key))
}
