//! Job entity model and submission DTOs.

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use validator::Validate;

use crate::error::CoreError;
use crate::status::JobStatus;
use crate::types::{JobId, Timestamp, UserId};

/// Furniture-staging mode: add furniture to an empty room.
pub const MODE_STAGING: &str = "staging";
/// Removal mode: erase existing furniture from the photo.
pub const MODE_REMOVAL: &str = "removal";

/// All valid transformation modes.
pub const VALID_MODES: &[&str] = &[MODE_STAGING, MODE_REMOVAL];

/// Metadata key marking a job as part of a batch submission.
///
/// The reconciler suppresses per-job terminal notifications for jobs
/// carrying this flag; the batch coordinator reports in aggregate.
pub const METADATA_BATCH_KEY: &str = "batch";

/// A row from the `generations` table -- one submitted asset's unit of
/// asynchronous transformation work.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Job {
    pub id: JobId,
    pub user_id: UserId,
    /// Opaque source reference: a durable public URL or an inline
    /// `data:` URI.  Downstream components never distinguish the two.
    pub original_url: String,
    /// Result reference, filled in by the transformation worker.
    pub generated_url: Option<String>,
    pub status: JobStatus,
    pub prompt: Option<String>,
    pub style: String,
    /// Free-form metadata (mode, style, batch flag).
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: Timestamp,
}

impl Job {
    /// Whether this job was submitted as part of a batch.
    pub fn is_batch(&self) -> bool {
        self.metadata
            .get(METADATA_BATCH_KEY)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// Insert DTO for a new generation row.
#[derive(Debug, Clone, Serialize)]
pub struct NewJob {
    pub user_id: UserId,
    pub original_url: String,
    pub status: JobStatus,
    pub style: String,
    pub metadata: serde_json::Value,
}

impl NewJob {
    /// Build the insert payload for a freshly admitted submission.
    /// New jobs always enter the lifecycle as `queued`.
    pub fn queued(user_id: UserId, original_url: String, request: &GenerationRequest) -> Self {
        Self {
            user_id,
            original_url,
            status: JobStatus::Queued,
            style: request.style.clone(),
            metadata: request.metadata(),
        }
    }

    /// Mark the payload as belonging to a batch submission.
    pub fn into_batch(mut self) -> Self {
        if let serde_json::Value::Object(ref mut map) = self.metadata {
            map.insert(METADATA_BATCH_KEY.into(), serde_json::Value::Bool(true));
        }
        self
    }
}

/// User-selected parameters for one submission (single or batch).
#[derive(Debug, Clone, Validate)]
pub struct GenerationRequest {
    /// One of [`VALID_MODES`].
    pub mode: String,
    #[validate(length(min = 1, max = 64))]
    pub style: String,
    /// Optional free-form instruction forwarded to the worker.
    #[validate(length(max = 1000))]
    pub prompt: Option<String>,
}

impl GenerationRequest {
    pub fn new(mode: impl Into<String>, style: impl Into<String>) -> Self {
        Self {
            mode: mode.into(),
            style: style.into(),
            prompt: None,
        }
    }

    /// Validate field constraints and the mode value.
    pub fn check(&self) -> Result<(), CoreError> {
        self.validate()
            .map_err(|e| CoreError::Validation(e.to_string()))?;
        validate_mode(&self.mode)
    }

    /// Metadata blob recorded on the job row.
    pub fn metadata(&self) -> serde_json::Value {
        serde_json::json!({
            "mode": self.mode,
            "style": self.style,
        })
    }
}

/// Validate that a transformation mode is one of the known constants.
pub fn validate_mode(mode: &str) -> Result<(), CoreError> {
    if VALID_MODES.contains(&mode) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "Invalid mode '{mode}'. Must be one of: {}",
            VALID_MODES.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> GenerationRequest {
        GenerationRequest::new(MODE_STAGING, "modern")
    }

    #[test]
    fn validate_mode_valid() {
        assert!(validate_mode("staging").is_ok());
        assert!(validate_mode("removal").is_ok());
    }

    #[test]
    fn validate_mode_invalid() {
        assert!(validate_mode("repaint").is_err());
    }

    #[test]
    fn check_rejects_empty_style() {
        let mut req = request();
        req.style = String::new();
        assert!(req.check().is_err());
    }

    #[test]
    fn check_accepts_valid_request() {
        assert!(request().check().is_ok());
    }

    #[test]
    fn new_job_starts_queued() {
        let job = NewJob::queued(uuid::Uuid::new_v4(), "https://cdn/x.png".into(), &request());
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.metadata["mode"], "staging");
        assert_eq!(job.metadata["style"], "modern");
    }

    #[test]
    fn batch_flag_round_trips() {
        let new = NewJob::queued(uuid::Uuid::new_v4(), "https://cdn/x.png".into(), &request())
            .into_batch();
        assert_eq!(new.metadata[METADATA_BATCH_KEY], true);

        let job = Job {
            id: uuid::Uuid::new_v4(),
            user_id: new.user_id,
            original_url: new.original_url,
            generated_url: None,
            status: new.status,
            prompt: None,
            style: new.style,
            metadata: new.metadata,
            created_at: chrono::Utc::now(),
        };
        assert!(job.is_batch());
    }

    #[test]
    fn single_submission_is_not_batch() {
        let job = Job {
            id: uuid::Uuid::new_v4(),
            user_id: uuid::Uuid::new_v4(),
            original_url: "https://cdn/x.png".into(),
            generated_url: None,
            status: JobStatus::Queued,
            prompt: None,
            style: "modern".into(),
            metadata: request().metadata(),
            created_at: chrono::Utc::now(),
        };
        assert!(!job.is_batch());
    }
}
