//! Scan summary reporting for the CLI
//!
//! Prints a short header when monitoring starts and a per-scan summary
//! line once a cycle completes.

use crate::monitor::ScanSummary;
use humansize::{format_size, BINARY};
use std::time::Duration;

/// Print the startup header
pub fn print_header(dirs: &[String], db_path: &str, output: &str) {
    eprintln!("fimwatch - file integrity monitor");
    eprintln!("  Monitoring: {}", dirs.join(", "));
    eprintln!("  Database:   {db_path}");
    eprintln!(
        "  Events:     {}",
        if output == "-" { "stdout" } else { output }
    );
    eprintln!();
}

/// Print the summary of one completed scan
pub fn print_scan_summary(summary: &ScanSummary, db_size: Option<u64>) {
    let rate = files_per_second(summary.files_checked, summary.duration);

    eprintln!(
        "Scan complete: {} files in {} ({:.0}/s) | {} events | {} entries stored{}",
        format_number(summary.files_checked),
        format_elapsed(summary.duration),
        rate,
        format_number(summary.events),
        format_number(summary.entries as u64),
        match db_size {
            Some(size) => format!(" | db {}", format_size(size, BINARY)),
            None => String::new(),
        }
    );
}

fn files_per_second(files: u64, duration: Duration) -> f64 {
    let secs = duration.as_secs_f64();
    if secs > 0.0 {
        files as f64 / secs
    } else {
        0.0
    }
}

/// Format a duration as a compact human string
pub fn format_elapsed(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    if total_secs >= 3600 {
        format!(
            "{}h{:02}m{:02}s",
            total_secs / 3600,
            (total_secs % 3600) / 60,
            total_secs % 60
        )
    } else if total_secs >= 60 {
        format!("{}m{:02}s", total_secs / 60, total_secs % 60)
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}

/// Format a count with thousands separators
pub fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);

    for (i, digit) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(digit);
    }

    out
}
