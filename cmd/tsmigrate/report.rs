use std::{fs::OpenOptions, io::Write, path::Path, time::Instant};

use eyre::{Result, WrapErr};
use serde::Serialize;
use tsmigrate_engine::{
    MigrationError, MigrationStatus, MigrationSummary, config::ConfigError, types::TimeFormat,
};

pub const REPORT_SCHEMA_VERSION: u32 = 1;

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
/// The run finished but some ranges were skipped.
pub const EXIT_PARTIAL: i32 = 2;

#[derive(Serialize)]
pub struct MigrationReport<'a> {
    schema_version: u32,
    status: MigrationStatus,
    name: &'a str,
    dry_run: bool,
    #[serde(flatten)]
    summary: &'a MigrationSummary,
    total_elapsed_ms: u64,
}

impl<'a> MigrationReport<'a> {
    pub fn new(
        name: &'a str,
        dry_run: bool,
        summary: &'a MigrationSummary,
        started_at: Instant,
    ) -> Self {
        Self {
            schema_version: REPORT_SCHEMA_VERSION,
            status: summary.status(),
            name,
            dry_run,
            summary,
            total_elapsed_ms: elapsed_ms(started_at),
        }
    }
}

#[derive(Serialize)]
struct MigrationErrorReport<'a> {
    schema_version: u32,
    status: &'static str,
    name: &'a str,
    error_type: &'static str,
    retryable: bool,
    error: String,
    elapsed_ms: u64,
}

impl MigrationErrorReport<'_> {
    fn human_line(&self) -> String {
        let retryable = if self.retryable { ", retryable" } else { "" };
        format!(
            "Migration {:?} failed after {}ms ({}{retryable}): {}",
            self.name, self.elapsed_ms, self.error_type, self.error
        )
    }
}

fn elapsed_ms(started_at: Instant) -> u64 {
    u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Error type and retryability of a failed run.
fn classify_error(error: &eyre::Report) -> (&'static str, bool) {
    if let Some(migration_error) = error.downcast_ref::<MigrationError>() {
        return (migration_error.kind(), migration_error.retryable());
    }
    if error.downcast_ref::<ConfigError>().is_some() {
        return ("configuration", false);
    }
    ("internal", false)
}

fn build_migration_error_report<'a>(
    name: &'a str,
    error: &eyre::Report,
    started_at: Instant,
) -> MigrationErrorReport<'a> {
    let (error_type, retryable) = classify_error(error);
    MigrationErrorReport {
        schema_version: REPORT_SCHEMA_VERSION,
        status: "failed",
        name,
        error_type,
        retryable,
        error: format!("{error:#}"),
        elapsed_ms: elapsed_ms(started_at),
    }
}

/// JSON goes to stdout like every other report, the human line to stderr.
pub fn emit_error_report(
    name: &str,
    json: bool,
    started_at: Instant,
    error: &eyre::Report,
    report_file: Option<&Path>,
) {
    let report = build_migration_error_report(name, error, started_at);
    let line = if json {
        match serde_json::to_string(&report) {
            Ok(encoded) => {
                println!("{encoded}");
                encoded
            }
            Err(ser_error) => {
                eprintln!("{}\nCannot serialize error report: {ser_error}", report.human_line());
                return;
            }
        }
    } else {
        let line = report.human_line();
        eprintln!("{line}");
        line
    };

    if let Err(write_error) = append_report_line(report_file, &line) {
        eprintln!("Cannot write report file: {write_error:#}");
    }
}

fn append_report_line(report_file: Option<&Path>, line: &str) -> Result<()> {
    let Some(path) = report_file else {
        return Ok(());
    };
    if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .wrap_err_with(|| format!("Cannot create report directory {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut file| writeln!(file, "{line}"))
        .wrap_err_with(|| format!("Cannot append to report file {}", path.display()))
}

fn human_lines(report: &MigrationReport<'_>, time_format: TimeFormat) -> Vec<String> {
    let summary = report.summary;
    let mut lines = Vec::new();

    if report.status == MigrationStatus::UpToDate {
        lines.push(format!(
            "Migration {:?} is already up to date (checkpoint at {})",
            report.name,
            time_format.timestamp(summary.effective_mint)
        ));
        return lines;
    }

    lines.push(format!(
        "Migration {:?}: {} sample(s) in {} slab(s) from {} to {}, {} block(s) read, {} retry(ies), {}ms",
        report.name,
        summary.samples_written,
        summary.slabs_written,
        time_format.timestamp(summary.effective_mint),
        time_format.timestamp(summary.frontier),
        summary.blocks_read,
        summary.retries_performed,
        summary.elapsed_ms
    ));
    for skipped in &summary.skipped {
        lines.push(format!(
            "Skipped {} range {}: {}",
            skipped.role,
            time_format.range(&skipped.range),
            skipped.reason
        ));
    }
    if report.dry_run {
        lines.push("Dry-run complete: no data was written.".to_owned());
    }
    lines
}

pub fn emit_report(
    report: &MigrationReport<'_>,
    time_format: TimeFormat,
    json: bool,
    report_file: Option<&Path>,
) -> Result<()> {
    if json {
        let encoded =
            serde_json::to_string(report).wrap_err("Cannot serialize migration report")?;
        println!("{encoded}");
        append_report_line(report_file, &encoded)?;
        return Ok(());
    }

    for line in human_lines(report, time_format) {
        println!("{line}");
        append_report_line(report_file, &line)?;
    }
    Ok(())
}
