//! Plain-text rendering for the terminal.

use std::fmt::Write;

use crate::api::JobStatus;
use crate::dashboard::DashboardSnapshot;
use crate::export::ExportState;
use crate::log_entry::{LogRecord, Severity};
use crate::user::User;

const BAR_WIDTH: u64 = 40;
const MESSAGE_WIDTH: usize = 60;

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        text.to_string()
    } else {
        let cut: String = text.chars().take(width.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}

pub fn log_table(records: &[LogRecord]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<8} {:<8} {:<12} {:<20} MESSAGE",
        "ID", "LEVEL", "SOURCE", "TIMESTAMP"
    );
    for r in records {
        let _ = writeln!(
            out,
            "{:<8} {:<8} {:<12} {:<20} {}",
            r.id,
            r.severity,
            r.source,
            truncate(&r.timestamp, 19),
            truncate(&r.message, MESSAGE_WIDTH)
        );
    }
    out
}

pub fn log_detail(r: &LogRecord) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "id:        {}", r.id);
    let _ = writeln!(out, "severity:  {}", r.severity);
    let _ = writeln!(out, "source:    {}", r.source);
    let _ = writeln!(out, "timestamp: {}", r.timestamp);
    if let Some(user_id) = &r.user_id {
        let _ = writeln!(out, "user:      {user_id}");
    }
    if let Some(ip) = &r.ip_address {
        let _ = writeln!(out, "ip:        {ip}");
    }
    let _ = writeln!(out, "message:   {}", r.message);
    if let Some(details) = &r.details {
        let _ = writeln!(out, "details:\n{details}");
    }
    out
}

pub fn user_table(users: &[User]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<8} {:<16} {:<24} {:<28} {:<8} ROLE",
        "ID", "USERNAME", "NAME", "EMAIL", "STATUS"
    );
    for u in users {
        let _ = writeln!(
            out,
            "{:<8} {:<16} {:<24} {:<28} {:<8} {}",
            u.id,
            u.username,
            truncate(u.display_name(), 24),
            u.email.as_deref().unwrap_or("-"),
            if u.is_active { "active" } else { "inactive" },
            if u.is_admin { "admin" } else { "user" },
        );
    }
    out
}

fn bar(count: u64, max: u64) -> String {
    if max == 0 {
        return String::new();
    }
    let len = (u128::from(count) * u128::from(BAR_WIDTH)).div_ceil(u128::from(max));
    "#".repeat(len as usize)
}

pub fn dashboard(snapshot: &DashboardSnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Total logs: {}", snapshot.total);
    let _ = writeln!(out);

    let _ = writeln!(out, "Distribution");
    let max = snapshot
        .distribution
        .iter()
        .map(|b| b.count)
        .max()
        .unwrap_or(0);
    for bucket in &snapshot.distribution {
        let _ = writeln!(
            out,
            "  {:<8} {:>8} {}",
            bucket.severity,
            bucket.count,
            bar(bucket.count, max)
        );
    }

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Trend        {:>7} {:>7} {:>7} {:>7} {:>7}",
        "DEBUG", "INFO", "WARNING", "ERROR", "OTHER"
    );
    for point in &snapshot.trend {
        let other: u64 = point.other.values().sum();
        let _ = writeln!(
            out,
            "  {}  {:>7} {:>7} {:>7} {:>7} {:>7}",
            point.date,
            point.count(Severity::Debug),
            point.count(Severity::Info),
            point.count(Severity::Warning),
            point.count(Severity::Error),
            other
        );
    }
    if snapshot.trend.is_empty() {
        let _ = writeln!(out, "  (no logs in range)");
    }
    if snapshot.partial {
        let _ = writeln!(
            out,
            "  partial sample: trend built from the first {} of {} logs",
            snapshot.fetched, snapshot.total
        );
    }
    if snapshot.undated > 0 {
        let _ = writeln!(out, "  {} logs without a readable date", snapshot.undated);
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "Recent");
    for r in &snapshot.recent {
        let _ = writeln!(
            out,
            "  [{:<7}] {} ({}, {})",
            r.severity,
            truncate(&r.message, MESSAGE_WIDTH),
            r.source,
            r.timestamp
        );
    }
    out
}

pub fn job_status(status: &JobStatus) -> &'static str {
    match status {
        JobStatus::Started => "Export running...",
        JobStatus::Finished => "CSV ready",
        JobStatus::Failed => "Export failed",
        JobStatus::Queued | JobStatus::Unknown => "Waiting for worker...",
    }
}

pub fn export_state(state: &ExportState) -> String {
    match state {
        ExportState::Idle => "Idle".to_string(),
        ExportState::Enqueued { .. } => "Export enqueued. Preparing data...".to_string(),
        ExportState::Polling {
            status, attempt, ..
        } => format!("{} (check {attempt})", job_status(status)),
        ExportState::Done { download_url, .. } => format!("CSV ready: {download_url}"),
        ExportState::Failed { message, .. } => format!("Export failed: {message}"),
        ExportState::TimedOut { .. } => "Export timed out".to_string(),
    }
}
