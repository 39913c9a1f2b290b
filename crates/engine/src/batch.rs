//! Batch coordinator: independent per-item pipelines with isolated
//! failure domains.
//!
//! The coordinator owns the BatchItem collection for one submission
//! session.  `submit` admits the whole selection against the quota,
//! then fans out one supervised task per item -- upload, then dispatch --
//! where any failure is captured as that item's terminal state and
//! never cancels or delays a sibling.  Item tiles then mirror their
//! job's lifecycle from the view until the user clears the batch.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use ts_rs::TS;

use stagex_core::assets::{self, LocalAsset};
use stagex_core::job::{GenerationRequest, NewJob};
use stagex_core::quota;
use stagex_core::status::BatchItemStatus;
use stagex_core::types::{JobId, UserId};
use stagex_remote::InvokeOptions;

use crate::dispatch::{DispatchError, Dispatcher};
use crate::error::SubmitError;
use crate::notify::Notifier;
use crate::profile::ProfileCache;
use crate::upload::UploadPipeline;
use crate::view::{JobView, ViewEvent};

/// Client-local identifier for one batch item.
pub type BatchItemId = uuid::Uuid;

/// Read-only copy of one item's tile state.
#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct BatchItemSnapshot {
    pub id: BatchItemId,
    pub file_name: String,
    pub status: BatchItemStatus,
    /// Upload progress, 0-100.
    pub progress: u8,
    pub job_id: Option<JobId>,
    pub error: Option<String>,
}

/// One selected asset and its pipeline state.  Never persisted.
struct BatchItem {
    id: BatchItemId,
    asset: LocalAsset,
    status: BatchItemStatus,
    progress_rx: Option<watch::Receiver<u8>>,
    job_id: Option<JobId>,
    error: Option<String>,
}

impl BatchItem {
    fn new(asset: LocalAsset) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            asset,
            status: BatchItemStatus::Pending,
            progress_rx: None,
            job_id: None,
            error: None,
        }
    }

    fn progress(&self) -> u8 {
        match self.status {
            BatchItemStatus::Pending => 0,
            BatchItemStatus::Uploading | BatchItemStatus::Failed => self
                .progress_rx
                .as_ref()
                .map(|rx| *rx.borrow())
                .unwrap_or(0),
            _ => 100,
        }
    }

    fn snapshot(&self) -> BatchItemSnapshot {
        BatchItemSnapshot {
            id: self.id,
            file_name: self.asset.file_name.clone(),
            status: self.status,
            progress: self.progress(),
            job_id: self.job_id,
            error: self.error.clone(),
        }
    }
}

/// Fans a selection of assets out to independent pipelines.
pub struct BatchCoordinator {
    user_id: UserId,
    items: Arc<RwLock<Vec<BatchItem>>>,
    uploader: UploadPipeline,
    dispatcher: Dispatcher,
    profiles: Arc<ProfileCache>,
    notifier: Notifier,
    max_upload_bytes: usize,
    mirror_cancel: CancellationToken,
}

impl BatchCoordinator {
    pub(crate) fn new(
        user_id: UserId,
        view: Arc<JobView>,
        uploader: UploadPipeline,
        dispatcher: Dispatcher,
        profiles: Arc<ProfileCache>,
        notifier: Notifier,
        max_upload_bytes: usize,
    ) -> Self {
        let items: Arc<RwLock<Vec<BatchItem>>> = Arc::new(RwLock::new(Vec::new()));
        let mirror_cancel = CancellationToken::new();

        // Mirror job lifecycle changes into the item tiles.
        let mirror_items = Arc::clone(&items);
        let mirror_token = mirror_cancel.child_token();
        let mut view_rx = view.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = mirror_token.cancelled() => break,
                    event = view_rx.recv() => match event {
                        Ok(ViewEvent::Inserted(job) | ViewEvent::Updated(job)) => {
                            let mut items = mirror_items.write().await;
                            if let Some(item) =
                                items.iter_mut().find(|i| i.job_id == Some(job.id))
                            {
                                item.status = job.status.into();
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Batch mirror lagged behind the view");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });

        Self {
            user_id,
            items,
            uploader,
            dispatcher,
            profiles,
            notifier,
            max_upload_bytes,
            mirror_cancel,
        }
    }

    /// Add assets to the session as `Pending` items.
    pub async fn select(&self, assets: Vec<LocalAsset>) -> Vec<BatchItemId> {
        let mut items = self.items.write().await;
        assets
            .into_iter()
            .map(|asset| {
                let item = BatchItem::new(asset);
                let id = item.id;
                items.push(item);
                id
            })
            .collect()
    }

    /// Deselect one still-pending item.  Returns `false` if the item is
    /// unknown or its pipeline has already started.
    pub async fn remove(&self, item_id: BatchItemId) -> bool {
        let mut items = self.items.write().await;
        let Some(index) = items
            .iter()
            .position(|i| i.id == item_id && i.status == BatchItemStatus::Pending)
        else {
            return false;
        };
        items.remove(index);
        true
    }

    /// Drop every item, ending the session.
    pub async fn clear(&self) {
        self.items.write().await.clear();
    }

    /// Tile snapshots, in selection order.
    pub async fn items(&self) -> Vec<BatchItemSnapshot> {
        self.items.read().await.iter().map(|i| i.snapshot()).collect()
    }

    /// Running count of items whose job reached `completed`.
    pub async fn completed_count(&self) -> usize {
        self.items
            .read()
            .await
            .iter()
            .filter(|i| i.status == BatchItemStatus::Completed)
            .count()
    }

    /// Submit every pending item with the given parameters.
    ///
    /// The whole selection is admitted against the quota up front -- a
    /// rejection creates no jobs and writes nothing to storage.  Once
    /// admitted, each item runs its own pipeline; this call returns
    /// after the *dispatch* phase of every item (not their terminal
    /// completion), reporting how many were successfully started.
    pub async fn submit(&self, request: &GenerationRequest) -> Result<usize, SubmitError> {
        request.check()?;

        let pending: Vec<(BatchItemId, LocalAsset)> = self
            .items
            .read()
            .await
            .iter()
            .filter(|i| i.status == BatchItemStatus::Pending)
            .map(|i| (i.id, i.asset.clone()))
            .collect();

        let total = pending.len();
        if total == 0 {
            return Ok(0);
        }

        let profile = self.profiles.current().await;
        if let Err(denied) = quota::admit(profile.generation_count, profile.plan, total as u32) {
            self.notifier.warning(denied.to_string());
            return Err(SubmitError::Quota(denied));
        }

        tracing::info!(count = total, "Batch admitted, fanning out");

        let handles: Vec<(BatchItemId, tokio::task::JoinHandle<bool>)> = pending
            .into_iter()
            .map(|(item_id, asset)| {
                let items = Arc::clone(&self.items);
                let uploader = self.uploader.clone();
                let dispatcher = self.dispatcher.clone();
                let request = request.clone();
                let user_id = self.user_id;
                let max_bytes = self.max_upload_bytes;
                let handle = tokio::spawn(async move {
                    run_item_pipeline(
                        items, item_id, asset, user_id, request, uploader, dispatcher, max_bytes,
                    )
                    .await
                });
                (item_id, handle)
            })
            .collect();

        let (ids, joins): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        let results = futures::future::join_all(joins).await;

        let mut started = 0usize;
        for (item_id, result) in ids.into_iter().zip(results) {
            match result {
                Ok(true) => started += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(item_id = %item_id, error = %e, "Item pipeline panicked");
                    fail_item(&self.items, item_id, "Internal error".to_string()).await;
                }
            }
        }

        if started == total {
            self.notifier
                .success(format!("Batch submitted: {started} of {total} images started."));
        } else if started == 0 {
            self.notifier
                .error("Batch submission failed: no images could be started.");
        } else {
            self.notifier.warning(format!(
                "Batch partially submitted: {started} of {total} images started."
            ));
        }

        Ok(started)
    }

    pub(crate) fn shutdown(&self) {
        self.mirror_cancel.cancel();
    }
}

/// One item's pipeline: validate, upload, dispatch.  Every failure is
/// recorded on the item and swallowed -- siblings never see it.
#[allow(clippy::too_many_arguments)]
async fn run_item_pipeline(
    items: Arc<RwLock<Vec<BatchItem>>>,
    item_id: BatchItemId,
    asset: LocalAsset,
    user_id: UserId,
    request: GenerationRequest,
    uploader: UploadPipeline,
    dispatcher: Dispatcher,
    max_bytes: usize,
) -> bool {
    let (progress_tx, progress_rx) = watch::channel(0u8);

    // Claim the item.  If the user removed it between submission and
    // this task starting, there is nothing to do.
    let claimed = with_item(&items, item_id, |item| {
        item.status = BatchItemStatus::Uploading;
        item.progress_rx = Some(progress_rx);
    })
    .await;
    if !claimed {
        tracing::debug!(item_id = %item_id, "Item removed before its pipeline started");
        return false;
    }

    if let Err(e) = assets::validate_asset(&asset, max_bytes) {
        fail_item(&items, item_id, e.to_string()).await;
        return false;
    }

    let source_ref = match uploader.upload(user_id, &asset, progress_tx).await {
        Ok(source_ref) => source_ref,
        Err(e) => {
            tracing::warn!(item_id = %item_id, error = %e, "Item upload failed");
            fail_item(&items, item_id, e.to_string()).await;
            return false;
        }
    };

    let new_job = NewJob::queued(user_id, source_ref, &request).into_batch();
    let options = InvokeOptions {
        prompt_override: request.prompt.clone(),
        is_refinement: false,
    };

    match dispatcher.dispatch(new_job, &options).await {
        Ok(job) => {
            with_item(&items, item_id, |item| {
                item.job_id = Some(job.id);
                item.status = BatchItemStatus::Queued;
            })
            .await;
            true
        }
        Err(DispatchError::StartFailed { job_id, source }) => {
            with_item(&items, item_id, |item| {
                item.job_id = Some(job_id);
                item.status = BatchItemStatus::Failed;
                item.error = Some(source.to_string());
            })
            .await;
            false
        }
        Err(e) => {
            fail_item(&items, item_id, e.to_string()).await;
            false
        }
    }
}

/// Apply a mutation to one item, returning `false` if it no longer
/// exists.
async fn with_item<F>(items: &Arc<RwLock<Vec<BatchItem>>>, item_id: BatchItemId, f: F) -> bool
where
    F: FnOnce(&mut BatchItem),
{
    let mut items = items.write().await;
    match items.iter_mut().find(|i| i.id == item_id) {
        Some(item) => {
            f(item);
            true
        }
        None => false,
    }
}

async fn fail_item(items: &Arc<RwLock<Vec<BatchItem>>>, item_id: BatchItemId, error: String) {
    with_item(items, item_id, |item| {
        item.status = BatchItemStatus::Failed;
        item.error = Some(error);
    })
    .await;
}
