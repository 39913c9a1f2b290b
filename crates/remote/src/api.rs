//! REST client for the platform data and function endpoints.
//!
//! Wraps the platform HTTP API (job rows, profile reads, worker
//! invocation, checkout sessions) using [`reqwest`].  Row endpoints
//! follow the PostgREST filter conventions the platform exposes.

use async_trait::async_trait;
use serde::Deserialize;
use stagex_core::job::{Job, NewJob};
use stagex_core::profile::Profile;
use stagex_core::status::JobStatus;
use stagex_core::types::{JobId, UserId};

use crate::traits::{
    BoxError, CheckoutGateway, CheckoutSession, InvokeOptions, JobStatusRow, JobStore,
    ProfileSource, WorkerInvoker,
};

/// HTTP client for the platform REST API.
///
/// Cheap to clone; implements [`JobStore`], [`WorkerInvoker`],
/// [`ProfileSource`], and [`CheckoutGateway`].
#[derive(Clone)]
pub struct PlatformApi {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    access_token: String,
}

/// Errors from the platform REST layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The platform returned a non-2xx status code.
    #[error("Platform API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// A row endpoint returned an empty result set.
    #[error("Row not found: {entity} {id}")]
    RowNotFound { entity: &'static str, id: JobId },
}

impl PlatformApi {
    /// Create a new API client.
    ///
    /// * `base_url`     - Base HTTP URL, e.g. `https://platform.example`.
    /// * `api_key`      - Project key sent on every request.
    /// * `access_token` - Bearer token of the signed-in user.
    pub fn new(base_url: String, api_key: String, access_token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
            access_token,
        }
    }

    /// Create an API client reusing an existing [`reqwest::Client`]
    /// (useful for connection pooling with the storage client).
    pub fn with_client(
        client: reqwest::Client,
        base_url: String,
        api_key: String,
        access_token: String,
    ) -> Self {
        Self {
            client,
            base_url,
            api_key,
            access_token,
        }
    }

    /// Insert a generation row and return the stored record.
    ///
    /// Sends `POST /rest/v1/generations` with `Prefer:
    /// return=representation` so the response carries the row the
    /// platform actually created (id, timestamps).
    pub async fn create_job(&self, new_job: &NewJob) -> Result<Job, ApiError> {
        let response = self
            .authed(self.client.post(format!("{}/rest/v1/generations", self.base_url)))
            .header("Prefer", "return=representation")
            .json(new_job)
            .send()
            .await?;

        let mut rows: Vec<Job> = Self::parse_response(response).await?;
        rows.pop().ok_or(ApiError::Api {
            status: 200,
            body: "insert returned no representation".into(),
        })
    }

    /// Overwrite one job's status.
    ///
    /// Sends `PATCH /rest/v1/generations?id=eq.{id}`.
    pub async fn update_job_status(
        &self,
        job_id: JobId,
        status: JobStatus,
    ) -> Result<(), ApiError> {
        let response = self
            .authed(self.client.patch(format!(
                "{}/rest/v1/generations?id=eq.{job_id}",
                self.base_url
            )))
            .json(&serde_json::json!({ "status": status }))
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// Re-read one job's `{status, generated_url}` pair.
    ///
    /// Sends `GET /rest/v1/generations?id=eq.{id}&select=status,generated_url`.
    pub async fn fetch_job_status(&self, job_id: JobId) -> Result<JobStatusRow, ApiError> {
        let response = self
            .authed(self.client.get(format!(
                "{}/rest/v1/generations?id=eq.{job_id}&select=status,generated_url",
                self.base_url
            )))
            .send()
            .await?;

        let mut rows: Vec<JobStatusRow> = Self::parse_response(response).await?;
        rows.pop().ok_or(ApiError::RowNotFound {
            entity: "generation",
            id: job_id,
        })
    }

    /// All generations owned by a user, newest first.
    pub async fn list_jobs(&self, user_id: UserId) -> Result<Vec<Job>, ApiError> {
        let response = self
            .authed(self.client.get(format!(
                "{}/rest/v1/generations?user_id=eq.{user_id}&order=created_at.desc",
                self.base_url
            )))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Read a user's profile row.
    pub async fn fetch_profile(&self, user_id: UserId) -> Result<Profile, ApiError> {
        let response = self
            .authed(self.client.get(format!(
                "{}/rest/v1/profiles?id=eq.{user_id}",
                self.base_url
            )))
            .send()
            .await?;

        let mut rows: Vec<Profile> = Self::parse_response(response).await?;
        rows.pop().ok_or(ApiError::RowNotFound {
            entity: "profile",
            id: user_id,
        })
    }

    /// Ask the transformation worker to process a job.
    ///
    /// Sends `POST /functions/v1/generate-image`.  A non-2xx response
    /// here is a dispatch failure, distinct from the worker later
    /// reporting a failed transformation.
    pub async fn invoke_worker(
        &self,
        job_id: JobId,
        options: &InvokeOptions,
    ) -> Result<(), ApiError> {
        let body = serde_json::json!({
            "generation_id": job_id,
            "is_refinement": options.is_refinement,
            "prompt_override": options.prompt_override,
        });

        let response = self
            .authed(
                self.client
                    .post(format!("{}/functions/v1/generate-image", self.base_url)),
            )
            .json(&body)
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// Create a checkout session for a plan upgrade.
    ///
    /// Sends `POST /functions/v1/create-checkout-session` and returns
    /// the hosted page's redirect URL.
    pub async fn create_checkout(&self, plan_id: &str) -> Result<CheckoutSession, ApiError> {
        let response = self
            .authed(self.client.post(format!(
                "{}/functions/v1/create-checkout-session",
                self.base_url
            )))
            .json(&serde_json::json!({ "plan_id": plan_id }))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    // ---- private helpers ----

    /// Attach the project key and user bearer token.
    fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .bearer_auth(&self.access_token)
    }

    /// Ensure the response has a success status code.  Returns the
    /// response unchanged on success, or an [`ApiError::Api`] with the
    /// status and body text on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ApiError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    /// Assert the response has a success status code, discarding the body.
    async fn check_status(response: reqwest::Response) -> Result<(), ApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}

#[async_trait]
impl JobStore for PlatformApi {
    async fn create(&self, new_job: NewJob) -> Result<Job, BoxError> {
        Ok(self.create_job(&new_job).await?)
    }

    async fn update_status(&self, job_id: JobId, status: JobStatus) -> Result<(), BoxError> {
        Ok(self.update_job_status(job_id, status).await?)
    }

    async fn fetch_status(&self, job_id: JobId) -> Result<JobStatusRow, BoxError> {
        Ok(self.fetch_job_status(job_id).await?)
    }

    async fn list_jobs(&self, user_id: UserId) -> Result<Vec<Job>, BoxError> {
        Ok(PlatformApi::list_jobs(self, user_id).await?)
    }
}

#[async_trait]
impl WorkerInvoker for PlatformApi {
    async fn start(&self, job_id: JobId, options: &InvokeOptions) -> Result<(), BoxError> {
        Ok(self.invoke_worker(job_id, options).await?)
    }
}

#[async_trait]
impl ProfileSource for PlatformApi {
    async fn fetch_profile(&self, user_id: UserId) -> Result<Profile, BoxError> {
        Ok(PlatformApi::fetch_profile(self, user_id).await?)
    }
}

#[async_trait]
impl CheckoutGateway for PlatformApi {
    async fn create_checkout(&self, plan_id: &str) -> Result<CheckoutSession, BoxError> {
        Ok(PlatformApi::create_checkout(self, plan_id).await?)
    }
}
