//! The authoritative local job view.
//!
//! A single-writer state container: once a job is dispatched, only the
//! reconciler task mutates the view (the crate-private mutators are
//! called from nowhere else).  Readers take snapshots or subscribe to
//! the change broadcast.  All mutation goes through the monotonic merge
//! rule, so the view's final state does not depend on the arrival order
//! of push and poll updates.

use indexmap::IndexMap;
use tokio::sync::{broadcast, RwLock};

use stagex_core::job::Job;
use stagex_core::status::{should_apply, JobStatus};
use stagex_core::types::JobId;

/// Default buffer capacity for the view broadcast channel.
const VIEW_CHANNEL_CAPACITY: usize = 1024;

/// A change applied to the local view.
#[derive(Debug, Clone)]
pub enum ViewEvent {
    /// A job entered the view (dispatch or feed insert).
    Inserted(Job),
    /// A job's status or result reference changed.
    Updated(Job),
}

/// Outcome of offering a status observation to the view.
#[derive(Debug, Clone)]
pub enum Observation {
    /// The update was applied.  `transitioned` is true when the status
    /// value actually changed (as opposed to an idempotent re-apply
    /// that only refined fields).
    Applied { job: Job, transitioned: bool },
    /// Dropped by the merge rule; never an error.
    Stale,
    /// The job is not (yet) in the view.
    Unknown,
}

/// Newest-first collection of the user's jobs.
pub struct JobView {
    jobs: RwLock<IndexMap<JobId, Job>>,
    event_tx: broadcast::Sender<ViewEvent>,
}

impl JobView {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(VIEW_CHANNEL_CAPACITY);
        Self {
            jobs: RwLock::new(IndexMap::new()),
            event_tx,
        }
    }

    /// Subscribe to view changes.
    pub fn subscribe(&self) -> broadcast::Receiver<ViewEvent> {
        self.event_tx.subscribe()
    }

    /// Snapshot of all jobs, newest first.
    pub async fn snapshot(&self) -> Vec<Job> {
        self.jobs.read().await.values().cloned().collect()
    }

    /// Look up one job.
    pub async fn get(&self, job_id: JobId) -> Option<Job> {
        self.jobs.read().await.get(&job_id).cloned()
    }

    /// Number of jobs in the view.
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    /// Seed the view from a history listing (already newest first).
    /// Existing entries win: hydration never regresses live state.
    pub(crate) async fn hydrate(&self, jobs: Vec<Job>) {
        let mut map = self.jobs.write().await;
        for job in jobs {
            map.entry(job.id).or_insert(job);
        }
    }

    /// Add a newly discovered job at the front of the view.
    ///
    /// If the job is already known (e.g. the feed's insert arriving
    /// after dispatch already seeded it), the record is merged through
    /// the same rule as any other observation.
    pub(crate) async fn insert(&self, job: Job) -> Observation {
        {
            let mut map = self.jobs.write().await;
            if !map.contains_key(&job.id) {
                map.shift_insert(0, job.id, job.clone());
                drop(map);
                let _ = self.event_tx.send(ViewEvent::Inserted(job.clone()));
                return Observation::Applied {
                    job,
                    transitioned: false,
                };
            }
        }
        self.observe(job.id, job.status, job.generated_url).await
    }

    /// Offer a status observation to the view, applying the monotonic
    /// merge rule.
    ///
    /// An incoming `generated_url` of `None` never erases a known
    /// result reference; a `Some` fills or refines it.
    pub(crate) async fn observe(
        &self,
        job_id: JobId,
        status: JobStatus,
        generated_url: Option<String>,
    ) -> Observation {
        let mut map = self.jobs.write().await;
        let Some(job) = map.get_mut(&job_id) else {
            return Observation::Unknown;
        };

        if !should_apply(job.status, status) {
            return Observation::Stale;
        }

        let transitioned = job.status != status;
        job.status = status;
        if generated_url.is_some() {
            job.generated_url = generated_url;
        }
        let job = job.clone();
        drop(map);

        let _ = self.event_tx.send(ViewEvent::Updated(job.clone()));
        Observation::Applied { job, transitioned }
    }
}

impl Default for JobView {
    fn default() -> Self {
        Self::new()
    }
}
