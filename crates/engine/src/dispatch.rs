//! Job dispatcher: create the authoritative record, then ask the
//! worker to process it.
//!
//! A failure of the processing *request* (as opposed to the eventual
//! transformation) forces the job to `failed` immediately -- in the
//! authoritative store and in the local view -- and surfaces as a
//! [`DispatchError`] so callers can tell "could not start" from
//! "started but later failed".  No poll loop is ever registered for a
//! job that failed to start.

use std::sync::Arc;

use tokio::sync::mpsc;

use stagex_core::job::{Job, NewJob};
use stagex_core::status::JobStatus;
use stagex_core::types::JobId;
use stagex_remote::traits::BoxError;
use stagex_remote::{InvokeOptions, JobStore, WorkerInvoker};

use crate::reconcile::{JobSignal, UpdateSource};

/// Errors from the dispatch step.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The job row could not be created; nothing was enqueued.
    #[error("Failed to create job record: {0}")]
    CreateFailed(#[source] BoxError),

    /// The row exists but the processing request failed.  The job has
    /// been forced to `failed`.
    #[error("Job {job_id} could not be started: {source}")]
    StartFailed {
        job_id: JobId,
        #[source]
        source: BoxError,
    },
}

/// Creates job records and hands them to the transformation worker.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    worker: Arc<dyn WorkerInvoker>,
    signals: mpsc::UnboundedSender<JobSignal>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn JobStore>,
        worker: Arc<dyn WorkerInvoker>,
        signals: mpsc::UnboundedSender<JobSignal>,
    ) -> Self {
        Self {
            store,
            worker,
            signals,
        }
    }

    /// Create a `queued` job and request asynchronous processing.
    ///
    /// On success the reconciler is told to start the job's poll loop.
    pub async fn dispatch(
        &self,
        new_job: NewJob,
        options: &InvokeOptions,
    ) -> Result<Job, DispatchError> {
        let job = self
            .store
            .create(new_job)
            .await
            .map_err(DispatchError::CreateFailed)?;

        tracing::info!(job_id = %job.id, style = %job.style, "Job created");
        let _ = self.signals.send(JobSignal::Discovered(job.clone()));

        match self.worker.start(job.id, options).await {
            Ok(()) => {
                tracing::info!(job_id = %job.id, "Processing requested");
                let _ = self.signals.send(JobSignal::StartPolling(job.id));
                Ok(job)
            }
            Err(e) => {
                tracing::error!(
                    job_id = %job.id,
                    error = %e,
                    "Failed to request processing",
                );

                // Force the authoritative record to failed; best effort.
                if let Err(update_err) = self.store.update_status(job.id, JobStatus::Failed).await {
                    tracing::error!(
                        job_id = %job.id,
                        error = %update_err,
                        "Failed to mark job as failed",
                    );
                }

                // Reflect the failure in the local view.
                let _ = self.signals.send(JobSignal::Observed {
                    job_id: job.id,
                    status: JobStatus::Failed,
                    generated_url: None,
                    source: UpdateSource::Dispatch,
                });

                Err(DispatchError::StartFailed {
                    job_id: job.id,
                    source: e,
                })
            }
        }
    }
}
