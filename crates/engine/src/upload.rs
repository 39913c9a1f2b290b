//! Upload pipeline: durable storage with an inline-encoding fallback.
//!
//! The primary path writes the asset to object storage and resolves a
//! public URL.  If that write fails for any reason the pipeline falls
//! back -- silently, as far as the user is concerned -- to a
//! self-contained `data:` URI.  Both paths produce one opaque source
//! reference; only a failure of *both* paths surfaces as an error.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use stagex_core::assets::{self, LocalAsset};
use stagex_core::error::CoreError;
use stagex_core::types::UserId;
use stagex_remote::ObjectStore;

/// Cadence of the simulated progress ticker while the storage write is
/// in flight.
const PROGRESS_TICK: Duration = Duration::from_millis(200);

/// Per-tick progress increment.
const PROGRESS_STEP: u8 = 10;

/// The ticker caps here; only the finished write reports 100.
const PROGRESS_CAP: u8 = 90;

/// Observer side of an upload's progress (0-100).
pub type ProgressReceiver = watch::Receiver<u8>;

/// Both upload paths failed.
#[derive(Debug, thiserror::Error)]
#[error("Upload of '{file_name}' failed: storage: {storage}; inline fallback: {fallback}")]
pub struct UploadError {
    pub file_name: String,
    /// Why the durable write failed.
    pub storage: String,
    /// Why the inline encoding failed as well.
    #[source]
    pub fallback: CoreError,
}

/// Moves a local asset to a source reference.
#[derive(Clone)]
pub struct UploadPipeline {
    storage: Arc<dyn ObjectStore>,
}

impl UploadPipeline {
    pub fn new(storage: Arc<dyn ObjectStore>) -> Self {
        Self { storage }
    }

    /// Upload an asset and return its opaque source reference.
    ///
    /// Progress is reported on `progress`: the primary path advances in
    /// simulated steps capped at [`PROGRESS_CAP`] until the write
    /// resolves, then reports 100; the fallback path reports a single
    /// 0-to-100 step since inline encoding is not chunked.  The fallback
    /// is fully awaited -- when this function returns `Ok`, a usable
    /// source reference exists.
    pub async fn upload(
        &self,
        user_id: UserId,
        asset: &LocalAsset,
        progress: watch::Sender<u8>,
    ) -> Result<String, UploadError> {
        let progress = Arc::new(progress);
        let _ = progress.send(0);

        let key = assets::storage_key(user_id, asset);
        let ticker_cancel = CancellationToken::new();
        let ticker = spawn_progress_ticker(Arc::clone(&progress), ticker_cancel.clone());

        let written = self
            .storage
            .put(&key, &asset.content_type, asset.bytes.clone())
            .await;

        ticker_cancel.cancel();
        let _ = ticker.await;

        match written {
            Ok(()) => {
                let _ = progress.send(100);
                let url = self.storage.public_url(&key);
                tracing::info!(user_id = %user_id, key = %key, "Asset uploaded to storage");
                Ok(url)
            }
            Err(storage_err) => {
                // Durable storage is unavailable (e.g. bucket not
                // provisioned).  Not surfaced to the user; the inline
                // representation takes over.
                tracing::warn!(
                    user_id = %user_id,
                    key = %key,
                    error = %storage_err,
                    "Storage upload failed, falling back to inline encoding",
                );
                let _ = progress.send(0);

                match assets::data_uri(asset) {
                    Ok(uri) => {
                        let _ = progress.send(100);
                        Ok(uri)
                    }
                    Err(encode_err) => Err(UploadError {
                        file_name: asset.file_name.clone(),
                        storage: storage_err.to_string(),
                        fallback: encode_err,
                    }),
                }
            }
        }
    }
}

/// Advance the progress value in fixed steps while the write is in
/// flight.  The real write completion reports 100; the ticker never
/// does.
fn spawn_progress_ticker(
    progress: Arc<watch::Sender<u8>>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PROGRESS_TICK);
        interval.tick().await; // the first tick is immediate
        let mut percent: u8 = 0;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    percent = (percent + PROGRESS_STEP).min(PROGRESS_CAP);
                    let _ = progress.send(percent);
                }
            }
        }
    })
}
