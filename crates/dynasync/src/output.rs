use libdynasync_core::{BatchReport, FileOutcome, SyncError};
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

/// One file's line in a batch result
#[derive(Serialize)]
pub struct FileResultJson {
    pub file: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<FileOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonError>,
}

#[derive(Serialize)]
pub struct BatchJson {
    pub operation: &'static str,
    pub files: Vec<FileResultJson>,
    pub succeeded: usize,
    pub failed: usize,
}

fn print_json<T: Serialize>(value: &T, to_stderr: bool) {
    match serde_json::to_string_pretty(value) {
        Ok(text) if to_stderr => eprintln!("{}", text),
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("error: could not encode JSON output: {}", e),
    }
}

fn json_error(err: &SyncError) -> JsonError {
    let suggestions = err.suggestions();
    let details = if suggestions.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::json!({ "suggestions": suggestions })
    };
    JsonError {
        code: err.error_code().to_string(),
        message: err.to_string(),
        details,
    }
}

/// Output a successful result (JSON mode only; human text goes through
/// `print_human`)
pub fn output_success<T: Serialize>(cli: &Cli, data: T) {
    if cli.json {
        let response = JsonResponse {
            schema_version: 1,
            ok: true,
            data: Some(data),
            error: None,
        };
        print_json(&response, false);
    }
}

/// Output per-file results of commit / get / clone
pub fn output_batch(cli: &Cli, operation: &'static str, report: &BatchReport) {
    if cli.json {
        let files = report
            .files
            .iter()
            .map(|f| match &f.result {
                Ok(outcome) => FileResultJson {
                    file: f.file.clone(),
                    ok: true,
                    outcome: Some(outcome.clone()),
                    error: None,
                },
                Err(e) => FileResultJson {
                    file: f.file.clone(),
                    ok: false,
                    outcome: None,
                    error: Some(json_error(e)),
                },
            })
            .collect();
        output_success(
            cli,
            BatchJson {
                operation,
                files,
                succeeded: report.succeeded(),
                failed: report.failed(),
            },
        );
        return;
    }

    for f in &report.files {
        match &f.result {
            Ok(outcome) => print_human(cli, &format!("{:<10} {}", outcome_label(outcome), f.file)),
            // Failures are shown even in quiet mode
            Err(e) => eprintln!("{:<10} {}: {}", "failed", f.file, e),
        }
    }
    print_human(
        cli,
        &format!(
            "{}: {} file(s) ok, {} failed",
            operation,
            report.succeeded(),
            report.failed()
        ),
    );
}

fn outcome_label(outcome: &FileOutcome) -> String {
    match outcome {
        FileOutcome::Committed {
            additions,
            deletions,
            ..
        } => format!("committed (+{} -{})", additions, deletions),
        FileOutcome::Unchanged => "unchanged".to_string(),
        FileOutcome::Applied {
            commits,
            recovered: 0,
        } => format!("applied {}", commits),
        FileOutcome::Applied { commits, recovered } => {
            format!("applied {} ({} recovered)", commits, recovered)
        }
    }
}

/// Output an error
pub fn output_error(cli: &Cli, err: &SyncError) {
    if cli.json {
        let response: JsonResponse<()> = JsonResponse {
            schema_version: 1,
            ok: false,
            data: None,
            error: Some(json_error(err)),
        };
        print_json(&response, true);
    } else {
        eprintln!("error: {}", err);
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

/// Render a millisecond timestamp for people
pub fn format_ts(ts: u64) -> String {
    use chrono::TimeZone;
    i64::try_from(ts)
        .ok()
        .and_then(|ms| chrono::Utc.timestamp_millis_opt(ms).single())
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ts.to_string())
}
