use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{ConsoleError, Result};

/// Sources the backend knows about. The API accepts any string; the CLI only
/// warns when a new entry uses something else.
pub const SOURCES: &[&str] = &[
    "system",
    "auth",
    "db",
    "logs",
    "api",
    "cache",
    "queue",
    "storage",
    "third_party",
];

pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Debug,
    Info,
    #[serde(alias = "WARN")]
    Warning,
    Error,
}

impl Severity {
    /// The fixed enumeration order used by every distribution and trend point.
    pub const ALL: [Severity; 4] = [
        Severity::Debug,
        Severity::Info,
        Severity::Warning,
        Severity::Error,
    ];

    /// Resolve a server label. `WARN` is the aggregation endpoint's spelling
    /// of `WARNING` and folds into it.
    pub fn from_label(label: &str) -> Option<Severity> {
        match label {
            "DEBUG" => Some(Severity::Debug),
            "INFO" => Some(Severity::Info),
            "WARNING" | "WARN" => Some(Severity::Warning),
            "ERROR" => Some(Severity::Error),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Severity::Debug => 0,
            Severity::Info => 1,
            Severity::Warning => 2,
            Severity::Error => 3,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = ConsoleError;

    fn from_str(s: &str) -> Result<Self> {
        Severity::from_label(&s.trim().to_ascii_uppercase())
            .ok_or_else(|| ConsoleError::Validation(format!("unknown severity '{s}'")))
    }
}

/// A log record as returned by the API. Server-owned; the console never
/// mutates a fetched record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    /// Literal label from the server. Kept as text so unknown levels survive.
    pub severity: String,
    pub source: String,
    pub message: String,
    #[serde(default)]
    pub details: Option<String>,
    /// Timezone-naive timestamp exactly as the server sent it.
    pub timestamp: String,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
}

impl LogRecord {
    pub fn known_severity(&self) -> Option<Severity> {
        Severity::from_label(&self.severity)
    }

    /// Calendar day of the record, read from the leading `YYYY-MM-DD` of its
    /// own timestamp without any timezone conversion.
    pub fn day(&self) -> Option<NaiveDate> {
        let head = self.timestamp.get(..10)?;
        NaiveDate::parse_from_str(head, DATE_FORMAT).ok()
    }

    /// Case-insensitive match over message, source and details.
    pub fn matches_search(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.message.to_lowercase().contains(&needle)
            || self.source.to_lowercase().contains(&needle)
            || self
                .details
                .as_deref()
                .is_some_and(|d| d.to_lowercase().contains(&needle))
    }
}

pub(crate) fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}

fn opt_string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

/// Body for creating a log entry.
#[derive(Debug, Clone, Serialize)]
pub struct LogDraft {
    pub severity: Severity,
    pub source: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogDraft {
    pub fn validate(&self) -> Result<()> {
        if self.source.trim().is_empty() {
            return Err(ConsoleError::Validation("source is required".into()));
        }
        if self.message.trim().is_empty() {
            return Err(ConsoleError::Validation("message is required".into()));
        }
        Ok(())
    }
}

/// Partial update for a log entry; unset fields are left out of the body.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LogPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogPatch {
    pub fn validate(&self) -> Result<()> {
        if self.severity.is_none()
            && self.source.is_none()
            && self.message.is_none()
            && self.details.is_none()
        {
            return Err(ConsoleError::Validation("nothing to update".into()));
        }
        if self.message.as_deref().is_some_and(|m| m.trim().is_empty()) {
            return Err(ConsoleError::Validation("message cannot be blank".into()));
        }
        Ok(())
    }
}

/// Query filter shared by listing, aggregation and export.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub severity: Option<Severity>,
    pub source: Option<String>,
    /// Applied client-side over the fetched page; never sent to the server.
    pub search: Option<String>,
}

impl Filter {
    /// Inclusive range covering the last `days` days up to `today`.
    pub fn last_days(today: NaiveDate, days: u64) -> Self {
        Self {
            start: today.checked_sub_days(chrono::Days::new(days)),
            end: Some(today),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start > end {
                return Err(ConsoleError::Validation(format!(
                    "start date {start} is after end date {end}"
                )));
            }
        }
        Ok(())
    }

    /// Server-side query parameters. Unset or blank values are omitted.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(severity) = self.severity {
            pairs.push(("severity", severity.as_str().to_string()));
        }
        if let Some(source) = self.source.as_deref().filter(|s| !s.trim().is_empty()) {
            pairs.push(("source", source.to_string()));
        }
        if let Some(start) = self.start {
            pairs.push(("start", start.format(DATE_FORMAT).to_string()));
        }
        if let Some(end) = self.end {
            pairs.push(("end", end.format(DATE_FORMAT).to_string()));
        }
        pairs
    }

    pub fn search_term(&self) -> Option<&str> {
        self.search.as_deref().filter(|s| !s.trim().is_empty())
    }
}
