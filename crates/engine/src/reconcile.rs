//! Status reconciler: one merge point for both update channels.
//!
//! The change feed and the per-job poll loops never touch the view
//! directly -- they send [`JobSignal`]s into a single reconciler task
//! that owns all view mutation.  The monotonic merge rule inside the
//! view makes the two channels commutative: whichever observes a
//! transition first wins and the other's copy becomes a no-op, so
//! final-state correctness is independent of task scheduling order.
//!
//! Poll loops are bounded: each runs at a fixed interval from dispatch
//! until a terminal status is observed by *either* channel or the
//! ceiling elapses, whichever comes first.  Hitting the ceiling only
//! silences the loop -- a terminal update later delivered by the push
//! channel is still applied.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use stagex_core::job::Job;
use stagex_core::status::JobStatus;
use stagex_core::types::JobId;
use stagex_remote::{ChangeEvent, JobStore};

use crate::notify::Notifier;
use crate::profile::ProfileCache;
use crate::view::{JobView, Observation};

/// Which channel produced a status observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateSource {
    /// The per-user realtime change feed.
    Push,
    /// A job's poll loop.
    Poll,
    /// The dispatcher forcing `failed` after an enqueue error.  The
    /// dispatch caller surfaces that error itself, so no terminal
    /// notification is emitted for this source.
    Dispatch,
}

/// A message into the reconciler task.
#[derive(Debug)]
pub enum JobSignal {
    /// A job record entered the system (dispatch or feed insert).
    Discovered(Job),

    /// One channel observed a job's `{status, result}` pair.
    Observed {
        job_id: JobId,
        status: JobStatus,
        generated_url: Option<String>,
        source: UpdateSource,
    },

    /// Dispatch succeeded; start the job's bounded poll loop.
    StartPolling(JobId),
}

/// Handle to the running reconciler task.
pub struct ReconcilerHandle {
    signal_tx: mpsc::UnboundedSender<JobSignal>,
    cancel: CancellationToken,
    task_handle: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ReconcilerHandle {
    /// Sender half used by the dispatcher and the poll loops.
    pub(crate) fn signals(&self) -> mpsc::UnboundedSender<JobSignal> {
        self.signal_tx.clone()
    }

    /// Stop the reconciler and every live poll loop, waiting up to
    /// 5 seconds for a clean exit.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down reconciler");
        self.cancel.cancel();
        if let Some(handle) = self.task_handle.lock().await.take() {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }
    }
}

/// Spawn the reconciler task.
pub(crate) fn spawn(
    view: Arc<JobView>,
    store: Arc<dyn JobStore>,
    profiles: Arc<ProfileCache>,
    notifier: Notifier,
    changes: broadcast::Receiver<ChangeEvent>,
    poll_interval: Duration,
    poll_ceiling: Duration,
) -> ReconcilerHandle {
    let (signal_tx, signal_rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    let reconciler = Reconciler {
        view,
        store,
        profiles,
        notifier,
        poll_interval,
        poll_ceiling,
        signal_tx: signal_tx.clone(),
        polls: HashMap::new(),
        cancel: cancel.clone(),
    };

    let task_handle = tokio::spawn(async move {
        tracing::info!("Reconciler started");
        reconciler.run(signal_rx, changes).await;
        tracing::info!("Reconciler exited");
    });

    ReconcilerHandle {
        signal_tx,
        cancel,
        task_handle: tokio::sync::Mutex::new(Some(task_handle)),
    }
}

struct Reconciler {
    view: Arc<JobView>,
    store: Arc<dyn JobStore>,
    profiles: Arc<ProfileCache>,
    notifier: Notifier,
    poll_interval: Duration,
    poll_ceiling: Duration,
    /// Self-sender handed to each poll loop.
    signal_tx: mpsc::UnboundedSender<JobSignal>,
    /// Cancellation tokens for the live poll loops, one per job.
    polls: HashMap<JobId, CancellationToken>,
    cancel: CancellationToken,
}

impl Reconciler {
    async fn run(
        mut self,
        mut signal_rx: mpsc::UnboundedReceiver<JobSignal>,
        mut changes: broadcast::Receiver<ChangeEvent>,
    ) {
        let cancel = self.cancel.clone();
        let mut feed_open = true;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                Some(signal) = signal_rx.recv() => {
                    self.handle_signal(signal).await;
                }

                event = changes.recv(), if feed_open => match event {
                    Ok(ChangeEvent::Inserted(job)) => {
                        self.handle_discovered(job).await;
                    }
                    Ok(ChangeEvent::Updated(job)) => {
                        self.handle_observed(
                            job.id,
                            job.status,
                            job.generated_url,
                            UpdateSource::Push,
                        )
                        .await;
                    }
                    Ok(ChangeEvent::Deleted(job_id)) => {
                        // Row deletions are not part of the lifecycle;
                        // the view keeps its record.
                        tracing::debug!(job_id = %job_id, "Ignoring feed delete");
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // The poll loops re-read authoritative state, so
                        // missed frames heal on their own.
                        tracing::warn!(skipped, "Change feed lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("Change feed closed");
                        feed_open = false;
                    }
                },
            }
        }

        // Tear down any poll loops still live.
        for (job_id, token) in self.polls.drain() {
            tracing::debug!(job_id = %job_id, "Cancelling poll loop on shutdown");
            token.cancel();
        }
    }

    async fn handle_signal(&mut self, signal: JobSignal) {
        match signal {
            JobSignal::Discovered(job) => self.handle_discovered(job).await,
            JobSignal::Observed {
                job_id,
                status,
                generated_url,
                source,
            } => {
                self.handle_observed(job_id, status, generated_url, source)
                    .await;
            }
            JobSignal::StartPolling(job_id) => self.start_polling(job_id),
        }
    }

    async fn handle_discovered(&mut self, job: Job) {
        tracing::debug!(job_id = %job.id, status = %job.status, "Job discovered");
        self.view.insert(job).await;
    }

    async fn handle_observed(
        &mut self,
        job_id: JobId,
        status: JobStatus,
        generated_url: Option<String>,
        source: UpdateSource,
    ) {
        match self.view.observe(job_id, status, generated_url).await {
            Observation::Applied { job, transitioned } => {
                if job.status.is_terminal() {
                    self.stop_polling(job_id);
                    if transitioned {
                        self.on_terminal(&job, source).await;
                    }
                }
            }
            Observation::Stale => {
                // The other channel already delivered a newer state;
                // this copy is dropped without a trace above trace level.
                tracing::trace!(job_id = %job_id, incoming = %status, ?source, "Stale update dropped");
            }
            Observation::Unknown => {
                tracing::debug!(
                    job_id = %job_id,
                    incoming = %status,
                    ?source,
                    "Update for a job not in the view",
                );
            }
        }
    }

    /// Actions for a freshly observed terminal transition.
    ///
    /// Dispatch-forced failures are excluded: the dispatch caller
    /// surfaces those synchronously.  Batch-flagged jobs suppress the
    /// per-item notification; their coordinator reports in aggregate.
    async fn on_terminal(&mut self, job: &Job, source: UpdateSource) {
        match job.status {
            JobStatus::Completed => {
                tracing::info!(job_id = %job.id, ?source, "Job completed");
                if source != UpdateSource::Dispatch && !job.is_batch() {
                    self.notifier.success("Image generation completed.");
                }
                // The server-side count moved; re-read it so the next
                // quota decision is correct.
                if let Err(e) = self.profiles.refresh().await {
                    tracing::warn!(job_id = %job.id, error = %e, "Profile refresh failed");
                }
            }
            JobStatus::Failed => {
                tracing::warn!(job_id = %job.id, ?source, "Job failed");
                if source != UpdateSource::Dispatch && !job.is_batch() {
                    self.notifier.error("Image generation failed.");
                }
            }
            _ => {}
        }
    }

    /// Start the bounded poll loop for a dispatched job.  At most one
    /// loop is live per job.
    fn start_polling(&mut self, job_id: JobId) {
        if self.polls.contains_key(&job_id) {
            tracing::debug!(job_id = %job_id, "Poll loop already live");
            return;
        }

        let token = self.cancel.child_token();
        self.polls.insert(job_id, token.clone());

        let store = Arc::clone(&self.store);
        let signal_tx = self.signal_tx.clone();
        let interval = self.poll_interval;
        let ceiling = self.poll_ceiling;

        tokio::spawn(async move {
            run_poll_loop(store, job_id, interval, ceiling, signal_tx, token).await;
        });
    }

    fn stop_polling(&mut self, job_id: JobId) {
        if let Some(token) = self.polls.remove(&job_id) {
            tracing::debug!(job_id = %job_id, "Cancelling poll loop");
            token.cancel();
        }
    }
}

/// Fixed-interval re-read of one job's `{status, generated_url}` pair.
///
/// Runs until cancelled (a terminal status was applied), the ceiling
/// elapses (the loop is silenced, the job is *not* failed), or the
/// job itself reads back terminal.
async fn run_poll_loop(
    store: Arc<dyn JobStore>,
    job_id: JobId,
    interval: Duration,
    ceiling: Duration,
    signal_tx: mpsc::UnboundedSender<JobSignal>,
    cancel: CancellationToken,
) {
    let deadline = tokio::time::Instant::now() + ceiling;
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // the first tick is immediate; poll after one interval

    tracing::debug!(job_id = %job_id, interval_ms = interval.as_millis() as u64, "Poll loop started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(job_id = %job_id, "Poll loop cancelled");
                return;
            }
            _ = tokio::time::sleep_until(deadline) => {
                tracing::info!(job_id = %job_id, "Poll ceiling reached, silencing poll loop");
                return;
            }
            _ = ticker.tick() => {
                match store.fetch_status(job_id).await {
                    Ok(row) => {
                        let terminal = row.status.is_terminal();
                        let _ = signal_tx.send(JobSignal::Observed {
                            job_id,
                            status: row.status,
                            generated_url: row.generated_url,
                            source: UpdateSource::Poll,
                        });
                        if terminal {
                            // The reconciler will cancel this token as
                            // well; exiting now guarantees no further
                            // requests either way.
                            tracing::debug!(job_id = %job_id, status = %row.status, "Poll observed terminal status");
                            return;
                        }
                    }
                    Err(e) => {
                        // Transient read errors do not end the loop.
                        tracing::warn!(job_id = %job_id, error = %e, "Poll read failed");
                    }
                }
            }
        }
    }
}
