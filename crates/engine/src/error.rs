//! Submission error taxonomy.
//!
//! Four distinct failure classes reach the caller; everything else is
//! absorbed: storage-only upload failures fall back silently, and stale
//! status updates are dropped by the merge rule without ever becoming
//! an error.

use stagex_core::error::CoreError;
use stagex_core::quota::QuotaDenied;
use stagex_core::types::JobId;
use stagex_remote::traits::BoxError;

use crate::dispatch::DispatchError;
use crate::upload::UploadError;

/// An error surfaced to the submitting caller.
///
/// In a batch, these land on the failing item only; the sibling
/// pipelines never see them.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// The quota gate rejected the submission.  Recoverable by the
    /// user through an upgrade; never retried automatically.
    #[error(transparent)]
    Quota(#[from] QuotaDenied),

    /// The request parameters or the asset failed validation.
    #[error(transparent)]
    Invalid(#[from] CoreError),

    /// Both the durable and the fallback upload paths failed.
    #[error(transparent)]
    Upload(#[from] UploadError),

    /// The processing request could not be enqueued.  The job record
    /// was forced to `failed`; distinct from a worker-reported failure,
    /// which arrives later through the status channels.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// A refinement request could not be enqueued.  The completed job
    /// is left untouched.
    #[error("Refinement of job {job_id} could not be started: {source}")]
    Refinement {
        job_id: JobId,
        #[source]
        source: BoxError,
    },
}
