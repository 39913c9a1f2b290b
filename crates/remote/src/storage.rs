//! HTTP client for the platform object-storage API.
//!
//! One bucket, key-addressed writes, public read URLs.  Upload errors
//! are deliberately ordinary: the engine's upload pipeline treats any
//! failure here as the trigger for its inline-encoding fallback.

use async_trait::async_trait;
use bytes::Bytes;

use crate::traits::{BoxError, ObjectStore};

/// HTTP client for one storage bucket.
#[derive(Clone)]
pub struct StorageApi {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    access_token: String,
    bucket: String,
}

/// Errors from the storage HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The storage API returned a non-2xx status code (including the
    /// bucket-not-provisioned case).
    #[error("Storage API error ({status}): {body}")]
    Api { status: u16, body: String },
}

impl StorageApi {
    /// Create a storage client for one bucket.
    pub fn new(base_url: String, api_key: String, access_token: String, bucket: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
            access_token,
            bucket,
        }
    }

    /// Create a storage client reusing an existing [`reqwest::Client`].
    pub fn with_client(
        client: reqwest::Client,
        base_url: String,
        api_key: String,
        access_token: String,
        bucket: String,
    ) -> Self {
        Self {
            client,
            base_url,
            api_key,
            access_token,
            bucket,
        }
    }

    /// Write an object under `key`.
    ///
    /// Sends `POST /storage/v1/object/{bucket}/{key}` with the raw
    /// payload and its content type.
    pub async fn put_object(
        &self,
        key: &str,
        content_type: &str,
        bytes: Bytes,
    ) -> Result<(), StorageApiError> {
        let response = self
            .client
            .post(format!(
                "{}/storage/v1/object/{}/{key}",
                self.base_url, self.bucket
            ))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.access_token)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header(reqwest::header::CACHE_CONTROL, "max-age=3600")
            .body(bytes)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(StorageApiError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    /// Publicly resolvable URL for a stored key.
    pub fn object_url(&self, key: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{key}",
            self.base_url, self.bucket
        )
    }
}

#[async_trait]
impl ObjectStore for StorageApi {
    async fn put(&self, key: &str, content_type: &str, bytes: Bytes) -> Result<(), BoxError> {
        Ok(self.put_object(key, content_type, bytes).await?)
    }

    fn public_url(&self, key: &str) -> String {
        self.object_url(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_url_contains_bucket_and_key() {
        let api = StorageApi::new(
            "https://platform.example".into(),
            "key".into(),
            "token".into(),
            "images".into(),
        );
        assert_eq!(
            api.object_url("originals/u1/17-0.png"),
            "https://platform.example/storage/v1/object/public/images/originals/u1/17-0.png"
        );
    }
}
