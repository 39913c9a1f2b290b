//! Collaborator traits.
//!
//! The engine is written against these seams; production code plugs in
//! [`PlatformApi`](crate::api::PlatformApi) and
//! [`StorageApi`](crate::storage::StorageApi), tests plug in in-memory
//! fakes.  Errors cross the seam as boxed `Error`s -- each collaborator
//! has its own concrete error type and the engine only ever reports
//! them.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use stagex_core::job::{Job, NewJob};
use stagex_core::profile::Profile;
use stagex_core::status::JobStatus;
use stagex_core::types::{JobId, UserId};

/// Boxed collaborator error.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The narrow re-read used by the poll loop.
#[derive(Debug, Clone, Deserialize)]
pub struct JobStatusRow {
    pub status: JobStatus,
    pub generated_url: Option<String>,
}

/// Options forwarded to the transformation worker alongside the job id.
#[derive(Debug, Clone, Default)]
pub struct InvokeOptions {
    /// Free-form instruction overriding the stored prompt.
    pub prompt_override: Option<String>,
    /// Re-run an already completed job with the override applied.
    pub is_refinement: bool,
}

/// A checkout session created for the upgrade path.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    /// Redirect URL for the hosted checkout page.
    pub url: String,
}

/// Authoritative job record storage.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job row and return the stored record.
    async fn create(&self, new_job: NewJob) -> Result<Job, BoxError>;

    /// Overwrite a job's status (used to force `failed` on dispatch
    /// errors; lifecycle progression is otherwise worker-driven).
    async fn update_status(&self, job_id: JobId, status: JobStatus) -> Result<(), BoxError>;

    /// Re-read one job's `{status, generated_url}` pair.
    async fn fetch_status(&self, job_id: JobId) -> Result<JobStatusRow, BoxError>;

    /// All jobs owned by a user, newest first.
    async fn list_jobs(&self, user_id: UserId) -> Result<Vec<Job>, BoxError>;
}

/// Key-addressed durable object storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write an object.  Any error here makes the upload pipeline fall
    /// back to inline encoding; it is not surfaced to the user.
    async fn put(&self, key: &str, content_type: &str, bytes: Bytes) -> Result<(), BoxError>;

    /// Publicly resolvable URL for a stored key.
    fn public_url(&self, key: &str) -> String;
}

/// Asynchronous transformation worker.
#[async_trait]
pub trait WorkerInvoker: Send + Sync {
    /// Ask the worker to process a job.  An `Err` here means the
    /// enqueue request itself failed (a dispatch error) -- eventual
    /// processing failures arrive through the status channels instead.
    async fn start(&self, job_id: JobId, options: &InvokeOptions) -> Result<(), BoxError>;
}

/// Authoritative profile/quota reads.
#[async_trait]
pub trait ProfileSource: Send + Sync {
    async fn fetch_profile(&self, user_id: UserId) -> Result<Profile, BoxError>;
}

/// Checkout initiation for the quota-reject upgrade path.
#[async_trait]
pub trait CheckoutGateway: Send + Sync {
    /// Create a checkout session for a plan and return its redirect URL.
    async fn create_checkout(&self, plan_id: &str) -> Result<CheckoutSession, BoxError>;
}
