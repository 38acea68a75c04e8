use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::log_entry::{Filter, LogRecord};

pub mod http;
#[cfg(test)]
pub(crate) mod mock;

pub use http::HttpApi;

/// One page of log records plus the server's count of all matches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogPage {
    #[serde(default, rename = "logs")]
    pub items: Vec<LogRecord>,
    #[serde(default)]
    pub total: u64,
}

/// A labelled count from the aggregation endpoint. Keys are raw server labels
/// and may use `WARN` for `WARNING`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationBucket {
    pub key: String,
    #[serde(default)]
    pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Started,
    Finished,
    Failed,
    /// Anything else the worker reports, or no status at all, is treated as
    /// still in progress.
    #[default]
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportStatus {
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default)]
    pub path: Option<String>,
}

/// The slice of the log API the dashboard and export workflows depend on.
#[async_trait]
pub trait LogQueryClient: Send + Sync {
    async fn list_logs(&self, limit: u32, offset: u64, filter: &Filter) -> Result<LogPage>;

    async fn aggregate_logs(
        &self,
        dimension: &str,
        filter: &Filter,
    ) -> Result<Vec<AggregationBucket>>;

    /// Start a CSV export job and return its id.
    async fn enqueue_export(&self, filter: &Filter) -> Result<String>;

    async fn export_status(&self, job_id: &str) -> Result<ExportStatus>;

    /// Where the finished artifact can be downloaded. No network call.
    fn download_url(&self, job_id: &str) -> String;
}
