use libhoard_core::sync::{BatchReport, Outcome};
use libhoard_core::HoardError;
use serde::Serialize;

use crate::cli::Cli;

/// JSON response envelope
#[derive(Serialize)]
pub struct JsonResponse<T: Serialize> {
    pub schema_version: u32,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonError>,
}

#[derive(Serialize)]
pub struct JsonError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

impl JsonError {
    fn from_error(err: &HoardError) -> Self {
        // Include suggestions in JSON details
        let suggestions = err.suggestions();
        let details = if suggestions.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::json!({ "suggestions": suggestions })
        };
        Self {
            code: err.error_code().to_string(),
            message: err.to_string(),
            details,
        }
    }
}

fn render<T: Serialize>(response: &JsonResponse<T>) -> String {
    serde_json::to_string_pretty(response).unwrap_or_else(|e| {
        format!(
            "{{\"schema_version\":1,\"ok\":false,\"error\":{{\"code\":\"internal_error\",\"message\":\"{}\"}}}}",
            e.to_string().replace('"', "'")
        )
    })
}

/// Output a successful result (JSON mode only)
pub fn output_success<T: Serialize>(cli: &Cli, data: T) {
    if cli.json {
        let response = JsonResponse {
            schema_version: 1,
            ok: true,
            data: Some(data),
            error: None,
        };
        println!("{}", render(&response));
    }
}

/// Output a result that may carry a partial failure (JSON mode only)
pub fn output_partial<T: Serialize>(cli: &Cli, data: T, failure: Option<&HoardError>) {
    if cli.json {
        let response = JsonResponse {
            schema_version: 1,
            ok: failure.is_none(),
            data: Some(data),
            error: failure.map(JsonError::from_error),
        };
        println!("{}", render(&response));
    }
}

/// Output an error
pub fn output_error(cli: &Cli, err: &HoardError) {
    if cli.json {
        let response: JsonResponse<()> = JsonResponse {
            schema_version: 1,
            ok: false,
            data: None,
            error: Some(JsonError::from_error(err)),
        };
        eprintln!("{}", render(&response));
    } else {
        eprintln!("error: {}", err);
        // Print suggestions for human-readable output
        let suggestions = err.suggestions();
        if !suggestions.is_empty() {
            eprintln!();
            eprintln!("Suggestions:");
            for suggestion in suggestions {
                eprintln!("  - {}", suggestion);
            }
        }
    }
}

/// Print human-readable output (ignored in quiet mode)
pub fn print_human(cli: &Cli, msg: &str) {
    if !cli.json && !cli.quiet {
        println!("{}", msg);
    }
}

/// Print a batch report and turn per-file failures into the command's error
///
/// In JSON mode the report and the error share one envelope; `main` does not
/// print `PartialFailure` a second time.
pub fn output_report(
    cli: &Cli,
    verb: &str,
    report: &BatchReport,
    display: impl Fn(&str) -> String,
) -> Result<(), HoardError> {
    let total = report.succeeded.len() + report.failed.len();
    let failure = if report.is_success() {
        None
    } else {
        Some(HoardError::PartialFailure {
            failed: report.failed.len(),
            total,
        })
    };

    if cli.json {
        output_partial(cli, report, failure.as_ref());
    } else {
        if !cli.quiet {
            for done in &report.succeeded {
                println!("{:>12}  {}", done.outcome.as_str(), display(&done.path));
            }
            for skipped in &report.skipped {
                println!("{:>12}  {} ({})", "skipped", display(&skipped.path), skipped.reason);
            }
            println!("{}", summary(verb, report));
        }
        for failed in &report.failed {
            match &failed.digest {
                Some(digest) => eprintln!("failed: {} [{}]: {}", display(&failed.path), short(digest), failed.message),
                None => eprintln!("failed: {}: {}", display(&failed.path), failed.message),
            }
        }
    }

    match failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn summary(verb: &str, report: &BatchReport) -> String {
    let counts: Vec<String> = [
        Outcome::Uploaded,
        Outcome::Deduplicated,
        Outcome::Unchanged,
        Outcome::Downloaded,
        Outcome::UpToDate,
        Outcome::Removed,
        Outcome::Purged,
    ]
    .iter()
    .filter_map(|o| match report.count(*o) {
        0 => None,
        n => Some(format!("{} {}", n, o.as_str().replace('_', " "))),
    })
    .collect();

    let mut line = format!("{} {} file(s)", verb, report.succeeded.len());
    if !counts.is_empty() {
        line.push_str(&format!(": {}", counts.join(", ")));
    }
    if !report.skipped.is_empty() {
        line.push_str(&format!("; {} skipped", report.skipped.len()));
    }
    if !report.failed.is_empty() {
        line.push_str(&format!("; {} failed", report.failed.len()));
    }
    line
}

pub fn short(digest: &str) -> &str {
    &digest[..digest.len().min(12)]
}

/// Size with a binary unit suffix
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}
