use comfy_table::{presets, Table};
use libhoard_core::{HoardError, ListEntry};

use crate::cli::Cli;
use crate::context::HoardContext;
use crate::output::{human_size, output_success, print_human, short};

pub fn run(cli: &Cli, paths: &[String], all: bool, long: bool) -> Result<(), HoardError> {
    let ctx = HoardContext::resolve(cli)?;
    let engine = ctx.engine()?;
    let with_state = long || cli.json;

    let entries = if all || !paths.is_empty() {
        engine.ls(paths, with_state)?
    } else if engine.resolver().cwd() == engine.resolver().root() {
        engine.ls(&[], with_state)?
    } else {
        // Default scope is the current directory; nothing tracked there is not an error
        match engine.ls(&[".".to_string()], with_state) {
            Ok(entries) => entries,
            Err(HoardError::NotFound(_)) => Vec::new(),
            Err(e) => return Err(e),
        }
    };

    output_success(cli, &entries);
    if long {
        print_human(cli, &table(&entries));
    } else {
        for entry in &entries {
            print_human(cli, &entry.display);
        }
    }
    Ok(())
}

fn table(entries: &[ListEntry]) -> String {
    let mut table = Table::new();
    table.load_preset(presets::NOTHING);
    table.set_header(vec!["PATH", "ALGORITHM", "DIGEST", "SIZE", "STATE"]);
    for entry in entries {
        table.add_row(vec![
            entry.display.clone(),
            entry.algorithm.to_string(),
            short(&entry.digest).to_string(),
            human_size(entry.size),
            entry.state.map(|s| s.as_str()).unwrap_or("-").to_string(),
        ]);
    }
    table.to_string()
}
