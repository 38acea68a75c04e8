//! Severity distribution and daily trend for the dashboard.
//!
//! The distribution comes from the server's aggregation endpoint. The trend is
//! rebuilt locally from paged log records, capped at
//! [`DashboardConfig::record_cap`] records. When the server reports more
//! matches than the cap the trend only covers the earliest pages and the
//! snapshot is flagged `partial`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::NaiveDate;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{AggregationBucket, LogQueryClient};
use crate::config::DashboardConfig;
use crate::error::Result;
use crate::log_entry::{Filter, LogRecord, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SeverityBucket {
    pub severity: Severity,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrendPoint {
    pub date: NaiveDate,
    /// Indexed by [`Severity::index`].
    pub counts: [u64; 4],
    /// Labels the console does not recognise, counted as-is.
    pub other: BTreeMap<String, u64>,
}

impl TrendPoint {
    fn new(date: NaiveDate) -> Self {
        Self {
            date,
            counts: [0; 4],
            other: BTreeMap::new(),
        }
    }

    pub fn count(&self, severity: Severity) -> u64 {
        self.counts[severity.index()]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum::<u64>() + self.other.values().sum::<u64>()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardSnapshot {
    /// Always the four known severities, in [`Severity::ALL`] order.
    pub distribution: [SeverityBucket; 4],
    pub trend: Vec<TrendPoint>,
    /// First records of the first page, in fetch order.
    pub recent: Vec<LogRecord>,
    /// Matches reported by the server.
    pub total: u64,
    /// Records actually fetched for the trend.
    pub fetched: usize,
    /// The trend is a sample because `total` exceeded the cap.
    pub partial: bool,
    /// Fetched records left out of the trend for lack of a readable date.
    pub undated: usize,
}

impl DashboardSnapshot {
    pub fn count(&self, severity: Severity) -> u64 {
        self.distribution[severity.index()].count
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    Updated(Arc<DashboardSnapshot>),
    /// A newer refresh started before this one finished; its result was dropped.
    Superseded,
    Closed,
}

/// Fold raw aggregation buckets into the fixed four-severity distribution.
/// `WARN` and `WARNING` are summed; unknown keys are dropped.
pub fn normalize_distribution(buckets: &[AggregationBucket]) -> [SeverityBucket; 4] {
    let mut counts = [0u64; 4];
    for bucket in buckets {
        match Severity::from_label(&bucket.key) {
            Some(severity) => counts[severity.index()] += bucket.count,
            None => debug!("Ignoring aggregation bucket {:?}", bucket.key),
        }
    }
    Severity::ALL.map(|severity| SeverityBucket {
        severity,
        count: counts[severity.index()],
    })
}

/// Bucket records per day and severity, sorted by date. Returns the series
/// and the number of records without a readable date.
pub fn build_trend(records: &[LogRecord]) -> (Vec<TrendPoint>, usize) {
    let mut days: BTreeMap<NaiveDate, TrendPoint> = BTreeMap::new();
    let mut undated = 0;

    for record in records {
        let Some(day) = record.day() else {
            undated += 1;
            continue;
        };
        let point = days.entry(day).or_insert_with(|| TrendPoint::new(day));
        match record.known_severity() {
            Some(severity) => point.counts[severity.index()] += 1,
            None => *point.other.entry(record.severity.clone()).or_default() += 1,
        }
    }

    if undated > 0 {
        warn!("{undated} records have no readable date and were left out of the trend");
    }
    (days.into_values().collect(), undated)
}

pub struct DashboardAggregator {
    client: Arc<dyn LogQueryClient>,
    config: DashboardConfig,
    snapshot: watch::Sender<Option<Arc<DashboardSnapshot>>>,
    latest: AtomicU64,
    closed: CancellationToken,
}

impl DashboardAggregator {
    pub fn new(client: Arc<dyn LogQueryClient>, config: DashboardConfig) -> Self {
        let (snapshot, _rx) = watch::channel(None);
        Self {
            client,
            config,
            snapshot,
            latest: AtomicU64::new(0),
            closed: CancellationToken::new(),
        }
    }

    /// The last successfully committed snapshot.
    pub fn current(&self) -> Option<Arc<DashboardSnapshot>> {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<DashboardSnapshot>>> {
        self.snapshot.subscribe()
    }

    /// Stop committing results. Refreshes still in flight are abandoned and
    /// resolve to [`RefreshOutcome::Closed`].
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Fetch a fresh snapshot and make it current. On error the current
    /// snapshot is left exactly as it was.
    pub async fn refresh(&self, filter: &Filter) -> Result<RefreshOutcome> {
        let ticket = self.latest.fetch_add(1, Ordering::AcqRel) + 1;

        let result = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Ok(RefreshOutcome::Closed),
            result = self.compute(filter) => result,
        };

        if self.closed.is_cancelled() {
            return Ok(RefreshOutcome::Closed);
        }
        let snapshot = match result {
            Ok(snapshot) => Arc::new(snapshot),
            Err(_) if self.latest.load(Ordering::Acquire) != ticket => {
                return Ok(RefreshOutcome::Superseded);
            }
            Err(e) => {
                warn!("Dashboard refresh failed: {e}");
                return Err(e);
            }
        };

        let committed = self.snapshot.send_if_modified(|current| {
            if self.latest.load(Ordering::Acquire) == ticket {
                *current = Some(snapshot.clone());
                true
            } else {
                false
            }
        });
        if committed {
            Ok(RefreshOutcome::Updated(snapshot))
        } else {
            debug!("Dropping superseded dashboard refresh {ticket}");
            Ok(RefreshOutcome::Superseded)
        }
    }

    /// Build a snapshot for `filter` without touching the current one.
    pub async fn compute(&self, filter: &Filter) -> Result<DashboardSnapshot> {
        filter.validate()?;

        let buckets = self.client.aggregate_logs("severity", filter).await?;
        let distribution = normalize_distribution(&buckets);

        let (records, total) = self.fetch_capped(filter).await?;
        let (trend, undated) = build_trend(&records);
        let fetched = records.len();
        let partial = total > fetched as u64;
        if partial {
            info!("Trend covers {fetched} of {total} matching records");
        }

        let recent = records
            .iter()
            .take(self.config.preview_len)
            .cloned()
            .collect();

        Ok(DashboardSnapshot {
            distribution,
            trend,
            recent,
            total,
            fetched,
            partial,
            undated,
        })
    }

    /// Page through matching records one request at a time, stopping at the
    /// reported total or the cap, whichever comes first.
    async fn fetch_capped(&self, filter: &Filter) -> Result<(Vec<LogRecord>, u64)> {
        let page_size = u64::from(self.config.page_size.max(1));
        let cap = u64::from(self.config.record_cap.max(1));

        let first = self
            .client
            .list_logs(page_size.min(cap) as u32, 0, filter)
            .await?;
        let total = first.total;
        let stop = total.min(cap);

        let mut records = first.items;
        let mut offset = page_size;
        let mut pages = 1;
        while offset < stop {
            let limit = page_size.min(stop - offset);
            let page = self.client.list_logs(limit as u32, offset, filter).await?;
            pages += 1;
            if page.items.is_empty() {
                debug!("Empty page at offset {offset}, stopping early");
                break;
            }
            records.extend(page.items);
            offset += page_size;
        }
        records.truncate(cap as usize);

        debug!(
            "Fetched {} records in {pages} pages (total {total})",
            records.len()
        );
        Ok((records, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::{Gate, MockClient, record};
    use crate::error::ConsoleError;

    fn bucket(key: &str, count: u64) -> AggregationBucket {
        AggregationBucket {
            key: key.to_string(),
            count,
        }
    }

    fn records(n: usize) -> Vec<LogRecord> {
        (0..n)
            .map(|i| {
                let severity = ["INFO", "ERROR", "WARN", "DEBUG"][i % 4];
                let day = 1 + (i % 28);
                record(i, severity, &format!("2024-02-{day:02}T10:00:00"))
            })
            .collect()
    }

    fn aggregator(client: Arc<MockClient>) -> DashboardAggregator {
        DashboardAggregator::new(client, DashboardConfig::default())
    }

    #[test]
    fn test_warn_and_warning_buckets_are_summed() {
        let dist = normalize_distribution(&[
            bucket("ERROR", 4),
            bucket("WARN", 3),
            bucket("WARNING", 2),
            bucket("TRACE", 9),
        ]);
        assert_eq!(
            dist.map(|b| (b.severity, b.count)),
            [
                (Severity::Debug, 0),
                (Severity::Info, 0),
                (Severity::Warning, 5),
                (Severity::Error, 4),
            ]
        );
    }

    #[test]
    fn test_empty_distribution_is_never_sparse() {
        let dist = normalize_distribution(&[]);
        assert_eq!(dist.len(), 4);
        assert!(dist.iter().all(|b| b.count == 0));
        assert_eq!(dist.map(|b| b.severity), Severity::ALL);
    }

    #[test]
    fn test_trend_is_sorted_and_folds_warn() {
        let records = vec![
            record(1, "INFO", "2024-03-02T08:00:00"),
            record(2, "WARN", "2024-03-01T23:59:59"),
            record(3, "WARNING", "2024-03-01T00:00:00"),
            record(4, "CRITICAL", "2024-03-02T01:00:00"),
            record(5, "ERROR", "not-a-date"),
        ];
        let (trend, undated) = build_trend(&records);

        assert_eq!(undated, 1);
        assert_eq!(trend.len(), 2);
        assert!(trend.windows(2).all(|w| w[0].date <= w[1].date));
        assert_eq!(trend[0].date.to_string(), "2024-03-01");
        assert_eq!(trend[0].count(Severity::Warning), 2);
        assert_eq!(trend[0].count(Severity::Info), 0);
        assert_eq!(trend[1].count(Severity::Info), 1);
        assert_eq!(trend[1].other.get("CRITICAL"), Some(&1));
        assert_eq!(trend[1].total(), 2);
    }

    #[tokio::test]
    async fn test_pages_until_total() {
        let client = Arc::new(MockClient {
            records: records(1200),
            ..MockClient::default()
        });
        let snapshot = aggregator(client.clone())
            .compute(&Filter::default())
            .await
            .unwrap();

        assert_eq!(
            client.list_calls(),
            vec![(500, 0), (500, 500), (200, 1000)]
        );
        assert_eq!(snapshot.fetched, 1200);
        assert_eq!(snapshot.total, 1200);
        assert!(!snapshot.partial);
        let summed: u64 = snapshot.trend.iter().map(TrendPoint::total).sum();
        assert_eq!(summed, 1200);
    }

    #[tokio::test]
    async fn test_cap_limits_requests_and_flags_partial() {
        let client = Arc::new(MockClient {
            records: records(6000),
            total: Some(250_000),
            ..MockClient::default()
        });
        let snapshot = aggregator(client.clone())
            .compute(&Filter::default())
            .await
            .unwrap();

        let calls = client.list_calls();
        assert_eq!(calls.len(), 10);
        assert_eq!(calls.last(), Some(&(500, 4500)));
        assert_eq!(snapshot.fetched, 5000);
        assert!(snapshot.partial);
        assert_eq!(snapshot.total, 250_000);
    }

    #[tokio::test]
    async fn test_cap_not_multiple_of_page_size() {
        let client = Arc::new(MockClient {
            records: records(2000),
            ..MockClient::default()
        });
        let aggregator = DashboardAggregator::new(
            client.clone(),
            DashboardConfig {
                page_size: 300,
                record_cap: 1000,
                preview_len: 5,
            },
        );
        let snapshot = aggregator.compute(&Filter::default()).await.unwrap();

        assert_eq!(
            client.list_calls(),
            vec![(300, 0), (300, 300), (300, 600), (100, 900)]
        );
        assert_eq!(snapshot.fetched, 1000);
    }

    #[tokio::test]
    async fn test_empty_result() {
        let client = Arc::new(MockClient::default());
        let snapshot = aggregator(client.clone())
            .compute(&Filter::default())
            .await
            .unwrap();

        assert_eq!(client.list_calls().len(), 1);
        assert!(snapshot.trend.is_empty());
        assert!(snapshot.recent.is_empty());
        assert_eq!(snapshot.total, 0);
        assert!(!snapshot.partial);
    }

    #[tokio::test]
    async fn test_recent_is_first_page_prefix() {
        let client = Arc::new(MockClient {
            records: records(30),
            ..MockClient::default()
        });
        let snapshot = aggregator(client).compute(&Filter::default()).await.unwrap();
        let ids: Vec<_> = snapshot.recent.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["0", "1", "2", "3", "4"]);
    }

    #[tokio::test]
    async fn test_failed_second_page_keeps_previous_snapshot() {
        let client = Arc::new(MockClient {
            records: records(800),
            buckets: vec![bucket("INFO", 800)],
            ..MockClient::default()
        });
        let aggregator = aggregator(client.clone());
        let first = aggregator.refresh(&Filter::default()).await.unwrap();
        let RefreshOutcome::Updated(before) = first else {
            panic!("first refresh should commit");
        };

        let failing = Arc::new(MockClient {
            records: records(800),
            fail_list_call: Some(1),
            ..MockClient::default()
        });
        let aggregator = DashboardAggregator {
            client: failing,
            ..aggregator
        };
        let err = aggregator.refresh(&Filter::default()).await.unwrap_err();

        assert!(matches!(err, ConsoleError::Transport(_)));
        assert_eq!(aggregator.current(), Some(before));
    }

    #[tokio::test]
    async fn test_aggregation_failure_issues_no_page_requests() {
        let client = Arc::new(MockClient {
            records: records(10),
            fail_aggregate: true,
            ..MockClient::default()
        });
        let aggregator = aggregator(client.clone());
        assert!(aggregator.refresh(&Filter::default()).await.is_err());
        assert!(client.list_calls().is_empty());
        assert!(aggregator.current().is_none());
    }

    #[tokio::test]
    async fn test_closed_aggregator_discards_results() {
        let client = Arc::new(MockClient {
            records: records(10),
            ..MockClient::default()
        });
        let aggregator = aggregator(client);
        aggregator.close();
        let outcome = aggregator.refresh(&Filter::default()).await.unwrap();
        assert_eq!(outcome, RefreshOutcome::Closed);
        assert!(aggregator.current().is_none());
    }

    #[tokio::test]
    async fn test_close_during_page_request_discards_result() {
        let gate = Arc::new(Gate::default());
        let client = Arc::new(MockClient {
            records: records(10),
            buckets: vec![bucket("INFO", 10)],
            list_gate: Some(gate.clone()),
            ..MockClient::default()
        });
        let aggregator = Arc::new(aggregator(client.clone()));
        let mut snapshots = aggregator.subscribe();

        let running = {
            let aggregator = aggregator.clone();
            tokio::spawn(async move { aggregator.refresh(&Filter::default()).await })
        };
        gate.entered.notified().await;
        aggregator.close();
        gate.release.notify_one();

        let outcome = running.await.unwrap().unwrap();
        assert_eq!(outcome, RefreshOutcome::Closed);
        assert_eq!(client.list_calls().len(), 1);
        assert!(aggregator.current().is_none());
        assert!(!snapshots.has_changed().unwrap());
        assert!(snapshots.borrow_and_update().is_none());
    }

    #[tokio::test]
    async fn test_stale_refresh_is_superseded() {
        let client = Arc::new(MockClient {
            records: records(1500),
            ..MockClient::default()
        });
        let aggregator = aggregator(client);
        let older_filter = Filter::default();
        let newer = Filter {
            severity: Some(Severity::Error),
            ..Filter::default()
        };

        let (older, newest) = tokio::join!(
            aggregator.refresh(&older_filter),
            aggregator.refresh(&newer)
        );

        assert_eq!(older.unwrap(), RefreshOutcome::Superseded);
        let RefreshOutcome::Updated(snapshot) = newest.unwrap() else {
            panic!("newest refresh should commit");
        };
        assert_eq!(aggregator.current(), Some(snapshot));
    }

    #[tokio::test]
    async fn test_invalid_filter_is_rejected_before_requests() {
        let client = Arc::new(MockClient::default());
        let aggregator = aggregator(client.clone());
        let filter = Filter {
            start: NaiveDate::from_ymd_opt(2024, 5, 2),
            end: NaiveDate::from_ymd_opt(2024, 5, 1),
            ..Filter::default()
        };
        let err = aggregator.refresh(&filter).await.unwrap_err();
        assert!(matches!(err, ConsoleError::Validation(_)));
        assert!(client.list_calls().is_empty());
    }
}
