use std::io::{self, Write};

use serde::Serialize;

use crate::app::{EtlReport, ProgressEvent, ProgressSink};
use crate::error::EtlError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

/// Prints the run summary as JSON. Progress stays silent so stdout holds one document.
pub struct JsonOutput;

impl JsonOutput {
    pub fn print_report(report: &EtlReport) -> io::Result<()> {
        Self::print_json(report)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Progress lines on stderr, summary on stdout.
pub struct ConsoleOutput;

impl ConsoleOutput {
    pub fn print_report(report: &EtlReport) {
        println!("{}", summary_lines(report).join("\n"));
    }
}

impl ProgressSink for ConsoleOutput {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => eprintln!("[{:>7.1}s] {}", elapsed.as_secs_f64(), event.message),
            None => eprintln!("{}", event.message),
        }
    }

    fn error(&self, error: &EtlError) {
        eprintln!("error: {error}");
    }
}

pub fn summary_lines(report: &EtlReport) -> Vec<String> {
    let yes_no = |value: bool| if value { "yes" } else { "no" };
    let mut lines = vec![format!(
        "{} ({}) on {}",
        report.dataset, report.json_key, report.store
    )];
    lines.push(match report.new_data_found {
        Some(found) => format!("  new input data: {}", yes_no(found)),
        None => "  new input data: skipped".to_string(),
    });
    if report.input_prepared {
        lines.push("  input prepared".to_string());
    }
    if report.metadata_updated {
        lines.push("  metadata updated".to_string());
    }
    lines.push(match report.parsed {
        Some(parsed) => format!("  parsed new data: {}", yes_no(parsed)),
        None => "  parse: not run".to_string(),
    });
    if let Some(location) = &report.location {
        lines.push(format!("  location: {location}"));
    }
    if let Some(hash) = &report.published_hash {
        lines.push(format!("  published hash: {hash}"));
    }
    if let Some(path) = &report.catalog_path {
        lines.push(format!("  catalog: {path}"));
    }
    lines
}
