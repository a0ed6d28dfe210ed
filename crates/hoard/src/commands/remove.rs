use libhoard_core::HoardError;

use crate::cli::Cli;
use crate::context::HoardContext;
use crate::output::output_report;

pub fn run(cli: &Cli, paths: &[String], purge: bool) -> Result<(), HoardError> {
    let ctx = HoardContext::resolve(cli)?;
    let engine = ctx.engine()?;
    let report = engine.remove(paths, purge)?;

    output_report(cli, "Removed", &report, |key| engine.resolver().display(key))
}
