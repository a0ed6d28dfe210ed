use libhoard_core::HoardError;

use crate::cli::Cli;
use crate::context::HoardContext;
use crate::output::output_report;

pub fn run(cli: &Cli, paths: &[String], all: bool) -> Result<(), HoardError> {
    if paths.is_empty() && !all {
        return Err(HoardError::InvalidArgs(
            "give paths to check out, or --all".to_string(),
        ));
    }

    let ctx = HoardContext::resolve(cli)?;
    let engine = ctx.engine()?;
    let report = if all {
        engine.checkout_all()?
    } else {
        engine.checkout(paths)?
    };

    output_report(cli, "Checked out", &report, |key| engine.resolver().display(key))
}
