//! Scripted in-memory client for exercising the workflows without a server.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::api::{AggregationBucket, ExportStatus, JobStatus, LogPage, LogQueryClient};
use crate::error::{ConsoleError, Result};
use crate::log_entry::{Filter, LogRecord};

/// Holds a request open until the test releases it.
#[derive(Default)]
pub(crate) struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

impl Gate {
    async fn pass(&self) {
        self.entered.notify_one();
        self.release.notified().await;
    }
}

#[derive(Default)]
pub(crate) struct MockClient {
    /// Records served by `list_logs`, sliced by limit/offset.
    pub records: Vec<LogRecord>,
    /// Reported total; defaults to `records.len()` when `None`.
    pub total: Option<u64>,
    pub buckets: Vec<AggregationBucket>,
    pub fail_aggregate: bool,
    /// Zero-based `list_logs` call index that should fail.
    pub fail_list_call: Option<usize>,
    pub job_id: Option<String>,
    pub statuses: Mutex<VecDeque<Result<JobStatus>>>,
    pub list_calls: Mutex<Vec<(u32, u64)>>,
    pub enqueue_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
    pub list_gate: Option<Arc<Gate>>,
    pub status_gate: Option<Arc<Gate>>,
}

impl MockClient {
    pub fn with_statuses(job_id: &str, statuses: Vec<JobStatus>) -> Self {
        Self {
            job_id: Some(job_id.to_string()),
            statuses: Mutex::new(statuses.into_iter().map(Ok).collect()),
            ..Self::default()
        }
    }

    pub fn list_calls(&self) -> Vec<(u32, u64)> {
        self.list_calls.lock().unwrap().clone()
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LogQueryClient for MockClient {
    async fn list_logs(&self, limit: u32, offset: u64, _filter: &Filter) -> Result<LogPage> {
        let call = {
            let mut calls = self.list_calls.lock().unwrap();
            calls.push((limit, offset));
            calls.len() - 1
        };
        tokio::task::yield_now().await;
        if let Some(gate) = &self.list_gate {
            gate.pass().await;
        }
        if self.fail_list_call == Some(call) {
            return Err(ConsoleError::Transport("connection reset".into()));
        }
        let start = (offset as usize).min(self.records.len());
        let end = (start + limit as usize).min(self.records.len());
        Ok(LogPage {
            items: self.records[start..end].to_vec(),
            total: self.total.unwrap_or(self.records.len() as u64),
        })
    }

    async fn aggregate_logs(
        &self,
        _dimension: &str,
        _filter: &Filter,
    ) -> Result<Vec<AggregationBucket>> {
        tokio::task::yield_now().await;
        if self.fail_aggregate {
            return Err(ConsoleError::Api {
                status: 500,
                message: "aggregation failed".into(),
            });
        }
        Ok(self.buckets.clone())
    }

    async fn enqueue_export(&self, _filter: &Filter) -> Result<String> {
        self.enqueue_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.job_id.clone().ok_or(ConsoleError::EnqueueRejected)
    }

    async fn export_status(&self, _job_id: &str) -> Result<ExportStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if let Some(gate) = &self.status_gate {
            gate.pass().await;
        }
        let next = self
            .statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(JobStatus::Started));
        next.map(|status| ExportStatus { status, path: None })
    }

    fn download_url(&self, job_id: &str) -> String {
        format!("http://api.test/logs/export/{job_id}/download")
    }
}

pub(crate) fn record(id: usize, severity: &str, timestamp: &str) -> LogRecord {
    LogRecord {
        id: id.to_string(),
        severity: severity.to_string(),
        source: "api".to_string(),
        message: format!("event {id}"),
        details: None,
        timestamp: timestamp.to_string(),
        user_id: None,
        ip_address: None,
    }
}
