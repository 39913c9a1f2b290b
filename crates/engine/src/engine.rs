//! Engine wiring: one running submission session per signed-in user.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};

use stagex_core::assets::{self, LocalAsset};
use stagex_core::error::CoreError;
use stagex_core::job::{GenerationRequest, Job, NewJob};
use stagex_core::profile::Profile;
use stagex_core::quota;
use stagex_core::status::JobStatus;
use stagex_core::types::{JobId, UserId};
use stagex_remote::traits::BoxError;
use stagex_remote::{
    ChangeEvent, ChangeFeed, CheckoutGateway, InvokeOptions, JobStore, ObjectStore, PlatformApi,
    ProfileSource, WorkerInvoker,
};
use stagex_remote::storage::StorageApi;

use crate::batch::BatchCoordinator;
use crate::config::EngineConfig;
use crate::dispatch::Dispatcher;
use crate::error::SubmitError;
use crate::notify::{Notification, Notifier};
use crate::profile::ProfileCache;
use crate::reconcile::{self, ReconcilerHandle};
use crate::upload::UploadPipeline;
use crate::view::{JobView, ViewEvent};

/// The engine's external collaborators, one handle per boundary.
///
/// Production wiring comes from [`Collaborators::connect`]; tests plug
/// in in-memory fakes.
pub struct Collaborators {
    pub store: Arc<dyn JobStore>,
    pub storage: Arc<dyn ObjectStore>,
    pub worker: Arc<dyn WorkerInvoker>,
    pub profiles: Arc<dyn ProfileSource>,
    pub checkout: Arc<dyn CheckoutGateway>,
    /// Push channel delivering row-level job changes.
    pub changes: broadcast::Receiver<ChangeEvent>,
    /// The feed task behind `changes`, if the engine should own its
    /// shutdown.
    pub feed: Option<Arc<ChangeFeed>>,
}

impl Collaborators {
    /// Wire every boundary to the live platform.
    pub fn connect(config: &EngineConfig, user_id: UserId, access_token: String) -> Self {
        let api = Arc::new(PlatformApi::new(
            config.api_url.clone(),
            config.api_key.clone(),
            access_token.clone(),
        ));
        let storage = Arc::new(StorageApi::new(
            config.api_url.clone(),
            config.api_key.clone(),
            access_token,
            config.storage_bucket.clone(),
        ));

        let feed = ChangeFeed::start(user_id, config.ws_url.clone(), config.api_key.clone());
        let changes = feed.subscribe();

        Self {
            store: api.clone(),
            storage,
            worker: api.clone(),
            profiles: api.clone(),
            checkout: api,
            changes,
            feed: Some(feed),
        }
    }
}

/// One user's submission session.
///
/// Owns the local job view, the reconciler and its poll loops, the
/// batch coordinator, and the cached profile.  Created once after
/// sign-in via [`Engine::start`]; the returned `Arc` is cheap to clone
/// into UI code.
pub struct Engine {
    config: EngineConfig,
    user_id: UserId,
    worker: Arc<dyn WorkerInvoker>,
    checkout: Arc<dyn CheckoutGateway>,
    view: Arc<JobView>,
    notifier: Notifier,
    profiles: Arc<ProfileCache>,
    uploader: UploadPipeline,
    dispatcher: Dispatcher,
    reconciler: ReconcilerHandle,
    batch: BatchCoordinator,
    feed: Option<Arc<ChangeFeed>>,
}

impl Engine {
    /// Load the profile, start the reconciler, and hydrate the view
    /// from job history.
    pub async fn start(
        config: EngineConfig,
        user_id: UserId,
        collaborators: Collaborators,
    ) -> Result<Arc<Self>, BoxError> {
        let Collaborators {
            store,
            storage,
            worker,
            profiles: profile_source,
            checkout,
            changes,
            feed,
        } = collaborators;

        let profiles = Arc::new(ProfileCache::load(user_id, profile_source).await?);
        let view = Arc::new(JobView::new());
        let notifier = Notifier::default();

        let reconciler = reconcile::spawn(
            Arc::clone(&view),
            Arc::clone(&store),
            Arc::clone(&profiles),
            notifier.clone(),
            changes,
            config.poll_interval,
            config.poll_ceiling,
        );

        let dispatcher = Dispatcher::new(Arc::clone(&store), Arc::clone(&worker), reconciler.signals());
        let uploader = UploadPipeline::new(storage);

        let batch = BatchCoordinator::new(
            user_id,
            Arc::clone(&view),
            uploader.clone(),
            dispatcher.clone(),
            Arc::clone(&profiles),
            notifier.clone(),
            config.max_upload_bytes,
        );

        // Seed the view with history; a failure here only costs the
        // backlog, live submissions are unaffected.
        match store.list_jobs(user_id).await {
            Ok(jobs) => {
                tracing::info!(count = jobs.len(), "Job history loaded");
                view.hydrate(jobs).await;
            }
            Err(e) => tracing::error!(error = %e, "Failed to load job history"),
        }

        Ok(Arc::new(Self {
            config,
            user_id,
            worker,
            checkout,
            view,
            notifier,
            profiles,
            uploader,
            dispatcher,
            reconciler,
            batch,
            feed,
        }))
    }

    /// Submit a single asset without observing upload progress.
    pub async fn submit(
        &self,
        asset: LocalAsset,
        request: GenerationRequest,
    ) -> Result<Job, SubmitError> {
        let (progress, _unused) = watch::channel(0u8);
        self.submit_with_progress(asset, request, progress).await
    }

    /// Submit a single asset, reporting upload progress on `progress`.
    ///
    /// Quota gate -> upload (with silent fallback) -> dispatch.  On
    /// success the job is in the local view as `queued` with its poll
    /// loop running, and the push feed covers it from here on.
    pub async fn submit_with_progress(
        &self,
        asset: LocalAsset,
        request: GenerationRequest,
        progress: watch::Sender<u8>,
    ) -> Result<Job, SubmitError> {
        request.check()?;

        let profile = self.profiles.current().await;
        if let Err(denied) = quota::admit(profile.generation_count, profile.plan, 1) {
            self.notifier.warning(denied.to_string());
            return Err(denied.into());
        }

        assets::validate_asset(&asset, self.config.max_upload_bytes)?;

        let source_ref = self.uploader.upload(self.user_id, &asset, progress).await?;

        let new_job = NewJob::queued(self.user_id, source_ref, &request);
        let options = InvokeOptions {
            prompt_override: request.prompt.clone(),
            is_refinement: false,
        };

        match self.dispatcher.dispatch(new_job, &options).await {
            Ok(job) => {
                self.notifier
                    .success("Image generation started. Processing may take a few minutes.");
                Ok(job)
            }
            Err(e) => {
                self.notifier.error("Image processing could not be started.");
                Err(e.into())
            }
        }
    }

    /// Re-run a completed job through the worker with a refinement
    /// prompt.  The refined result arrives as an idempotent
    /// same-status update through the usual channels.
    pub async fn request_refinement(
        &self,
        job_id: JobId,
        prompt: impl Into<String>,
    ) -> Result<(), SubmitError> {
        let job = self.view.get(job_id).await.ok_or(CoreError::NotFound {
            entity: "generation",
            id: job_id,
        })?;

        if job.status != JobStatus::Completed || job.generated_url.is_none() {
            return Err(CoreError::Validation(
                "Only completed generations can be refined".into(),
            )
            .into());
        }

        let options = InvokeOptions {
            prompt_override: Some(prompt.into()),
            is_refinement: true,
        };

        match self.worker.start(job_id, &options).await {
            Ok(()) => {
                tracing::info!(job_id = %job_id, "Refinement requested");
                self.notifier.success("Refinement started.");
                Ok(())
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Refinement request failed");
                self.notifier.error("Refinement request failed.");
                Err(SubmitError::Refinement { job_id, source: e })
            }
        }
    }

    /// Checkout redirect for the quota-reject upgrade path.
    pub async fn upgrade_url(&self, plan_id: &str) -> Result<String, BoxError> {
        let session = self.checkout.create_checkout(plan_id).await?;
        Ok(session.url)
    }

    /// The batch coordinator for this session.
    pub fn batch(&self) -> &BatchCoordinator {
        &self.batch
    }

    /// Snapshot of the local job view, newest first.
    pub async fn jobs(&self) -> Vec<Job> {
        self.view.snapshot().await
    }

    /// Look up one job in the local view.
    pub async fn job(&self, job_id: JobId) -> Option<Job> {
        self.view.get(job_id).await
    }

    /// Subscribe to local view changes.
    pub fn view_events(&self) -> broadcast::Receiver<ViewEvent> {
        self.view.subscribe()
    }

    /// Subscribe to user-facing notifications.
    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.notifier.subscribe()
    }

    /// The cached profile used by the quota gate.
    pub async fn profile(&self) -> Profile {
        self.profiles.current().await
    }

    /// Force an authoritative profile re-read.
    pub async fn refresh_profile(&self) -> Result<Profile, BoxError> {
        self.profiles.refresh().await
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Stop the reconciler, every live poll loop, the batch mirror,
    /// and (when owned) the change feed.
    pub async fn shutdown(&self) {
        self.reconciler.shutdown().await;
        self.batch.shutdown();
        if let Some(feed) = &self.feed {
            feed.shutdown().await;
        }
    }
}
