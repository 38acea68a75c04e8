//! Drives a server-side CSV export job from enqueue to download URL.
//!
//! ```text
//! Idle -> Enqueued -> Polling(1..) -> Done | Failed | TimedOut
//! ```
//!
//! A coordinator runs at most one export at a time. Calling
//! [`ExportCoordinator::export`] while a run is in flight returns
//! [`ExportOutcome::Busy`] without touching the server. After
//! [`ExportCoordinator::cancel`] no further state is published, even if a
//! request that was already on the wire completes.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{JobStatus, LogQueryClient};
use crate::config::ExportConfig;
use crate::error::{ConsoleError, Result};
use crate::log_entry::Filter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportState {
    Idle,
    Enqueued {
        job_id: String,
    },
    /// `attempt` counts the non-terminal polls seen so far.
    Polling {
        job_id: String,
        attempt: u32,
        status: JobStatus,
    },
    Done {
        job_id: String,
        download_url: String,
    },
    Failed {
        job_id: Option<String>,
        message: String,
    },
    TimedOut {
        job_id: String,
        attempts: u32,
    },
}

impl ExportState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExportState::Done { .. } | ExportState::Failed { .. } | ExportState::TimedOut { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    Ready { job_id: String, download_url: String },
    /// Another export is already running on this coordinator.
    Busy,
    /// The coordinator was torn down before the job reached a terminal state.
    Cancelled,
}

/// Clears the busy flag on every exit path.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ExportCoordinator {
    client: Arc<dyn LogQueryClient>,
    config: ExportConfig,
    busy: AtomicBool,
    state: watch::Sender<ExportState>,
    cancel: CancellationToken,
}

impl ExportCoordinator {
    pub fn new(client: Arc<dyn LogQueryClient>, config: ExportConfig) -> Self {
        let (state, _rx) = watch::channel(ExportState::Idle);
        Self {
            client,
            config,
            busy: AtomicBool::new(false),
            state,
            cancel: CancellationToken::new(),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn state(&self) -> ExportState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ExportState> {
        self.state.subscribe()
    }

    /// Tear the coordinator down. Any wait or request in flight is abandoned
    /// and its result discarded.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Enqueue an export for `filter` and poll it until it finishes, fails or
    /// runs out of attempts.
    pub async fn export(&self, filter: &Filter) -> Result<ExportOutcome> {
        let Some(_busy) = BusyGuard::acquire(&self.busy) else {
            debug!("Export already in flight");
            return Ok(ExportOutcome::Busy);
        };
        if self.cancel.is_cancelled() {
            return Ok(ExportOutcome::Cancelled);
        }
        if let Err(e) = filter.validate() {
            self.publish(ExportState::Failed {
                job_id: None,
                message: e.to_string(),
            });
            return Err(e);
        }

        let job_id = match self.guarded(self.client.enqueue_export(filter)).await {
            None => return Ok(ExportOutcome::Cancelled),
            Some(Ok(job_id)) if !job_id.trim().is_empty() => job_id,
            Some(Ok(_)) => return Err(self.fail(None, ConsoleError::EnqueueRejected)),
            Some(Err(e)) => return Err(self.fail(None, e)),
        };
        info!("Export {job_id} enqueued");
        self.publish(ExportState::Enqueued {
            job_id: job_id.clone(),
        });

        self.poll(job_id).await
    }

    async fn poll(&self, job_id: String) -> Result<ExportOutcome> {
        let mut attempt: u32 = 0;
        loop {
            let status = match self.guarded(self.client.export_status(&job_id)).await {
                None => return Ok(ExportOutcome::Cancelled),
                Some(Ok(status)) => status.status,
                Some(Err(e)) => return Err(self.fail(Some(job_id), e)),
            };

            match status {
                JobStatus::Finished => {
                    let download_url = self.client.download_url(&job_id);
                    info!("Export {job_id} finished: {download_url}");
                    self.publish(ExportState::Done {
                        job_id: job_id.clone(),
                        download_url: download_url.clone(),
                    });
                    return Ok(ExportOutcome::Ready {
                        job_id,
                        download_url,
                    });
                }
                JobStatus::Failed => {
                    let err = ConsoleError::ExportFailed {
                        job_id: job_id.clone(),
                    };
                    return Err(self.fail(Some(job_id), err));
                }
                status => {
                    attempt += 1;
                    if attempt > self.config.max_attempts {
                        warn!("Export {job_id} timed out after {attempt} polls");
                        self.publish(ExportState::TimedOut {
                            job_id: job_id.clone(),
                            attempts: attempt,
                        });
                        return Err(ConsoleError::ExportTimedOut {
                            job_id,
                            attempts: attempt,
                        });
                    }
                    debug!("Export {job_id} is {status:?} (attempt {attempt})");
                    self.publish(ExportState::Polling {
                        job_id: job_id.clone(),
                        attempt,
                        status,
                    });
                    if self
                        .guarded(tokio::time::sleep(self.config.interval()))
                        .await
                        .is_none()
                    {
                        return Ok(ExportOutcome::Cancelled);
                    }
                }
            }
        }
    }

    /// Run `fut` unless the coordinator is cancelled first.
    async fn guarded<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            out = fut => Some(out),
        }
    }

    fn fail(&self, job_id: Option<String>, err: ConsoleError) -> ConsoleError {
        warn!("Export failed: {err}");
        self.publish(ExportState::Failed {
            job_id,
            message: err.to_string(),
        });
        err
    }

    fn publish(&self, state: ExportState) {
        if !self.cancel.is_cancelled() {
            self.state.send_replace(state);
        }
    }
}

impl Drop for ExportCoordinator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
