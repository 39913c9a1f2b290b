use std::time::Duration;

use stagex_core::assets::MAX_UPLOAD_BYTES;

/// Poll cadence for a dispatched job.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Hard ceiling on one job's poll loop lifetime.
pub const DEFAULT_POLL_CEILING: Duration = Duration::from_secs(5 * 60);

/// Engine configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base HTTP URL of the platform API.
    pub api_url: String,
    /// Base WebSocket URL of the realtime change feed.
    pub ws_url: String,
    /// Project API key sent on every request.
    pub api_key: String,
    /// Storage bucket for submitted originals.
    pub storage_bucket: String,
    /// Interval between status re-reads for a dispatched job.
    pub poll_interval: Duration,
    /// Poll loop lifetime ceiling; reaching it silences the loop
    /// without failing the job.
    pub poll_ceiling: Duration,
    /// Maximum accepted asset payload in bytes.
    pub max_upload_bytes: usize,
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                  |
    /// |-------------------------|--------------------------|
    /// | `STAGEX_API_URL`        | `http://localhost:54321` |
    /// | `STAGEX_WS_URL`         | `ws://localhost:54321`   |
    /// | `STAGEX_API_KEY`        | (empty)                  |
    /// | `STAGEX_STORAGE_BUCKET` | `images`                 |
    /// | `POLL_INTERVAL_SECS`    | `2`                      |
    /// | `POLL_CEILING_SECS`     | `300`                    |
    /// | `MAX_UPLOAD_BYTES`      | `10485760`               |
    pub fn from_env() -> Self {
        let api_url =
            std::env::var("STAGEX_API_URL").unwrap_or_else(|_| "http://localhost:54321".into());

        let ws_url =
            std::env::var("STAGEX_WS_URL").unwrap_or_else(|_| "ws://localhost:54321".into());

        let api_key = std::env::var("STAGEX_API_KEY").unwrap_or_default();

        let storage_bucket =
            std::env::var("STAGEX_STORAGE_BUCKET").unwrap_or_else(|_| "images".into());

        let poll_interval_secs: u64 = std::env::var("POLL_INTERVAL_SECS")
            .unwrap_or_else(|_| "2".into())
            .parse()
            .expect("POLL_INTERVAL_SECS must be a valid u64");

        let poll_ceiling_secs: u64 = std::env::var("POLL_CEILING_SECS")
            .unwrap_or_else(|_| "300".into())
            .parse()
            .expect("POLL_CEILING_SECS must be a valid u64");

        let max_upload_bytes: usize = std::env::var("MAX_UPLOAD_BYTES")
            .unwrap_or_else(|_| MAX_UPLOAD_BYTES.to_string())
            .parse()
            .expect("MAX_UPLOAD_BYTES must be a valid usize");

        Self {
            api_url,
            ws_url,
            api_key,
            storage_bucket,
            poll_interval: Duration::from_secs(poll_interval_secs),
            poll_ceiling: Duration::from_secs(poll_ceiling_secs),
            max_upload_bytes,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:54321".into(),
            ws_url: "ws://localhost:54321".into(),
            api_key: String::new(),
            storage_bucket: "images".into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_ceiling: DEFAULT_POLL_CEILING,
            max_upload_bytes: MAX_UPLOAD_BYTES,
        }
    }
}
