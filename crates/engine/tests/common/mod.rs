//! In-memory fakes for the engine's collaborators.
//!
//! Each fake implements one boundary trait with explicit knobs so
//! tests can script the platform's behavior: the job store doubles as
//! the source of truth the poll loop re-reads, the feed sender stands
//! in for the realtime channel, storage can be switched off to force
//! the inline fallback, and the worker can be told to refuse enqueues.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{broadcast, Mutex};

use stagex_core::assets::LocalAsset;
use stagex_core::job::{GenerationRequest, Job, NewJob};
use stagex_core::profile::{PlanTier, Profile};
use stagex_core::status::JobStatus;
use stagex_core::types::{JobId, UserId};
use stagex_engine::{Collaborators, Engine, EngineConfig};
use stagex_remote::traits::BoxError;
use stagex_remote::{
    ChangeEvent, CheckoutGateway, CheckoutSession, InvokeOptions, JobStatusRow, JobStore,
    ObjectStore, ProfileSource, WorkerInvoker,
};

/// Broadcast capacity for the fake change feed.
const FEED_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// MemoryJobStore
// ---------------------------------------------------------------------------

/// In-memory `generations` table.
///
/// Tests mutate it through [`set_remote_status`](Self::set_remote_status)
/// (visible to the poll loop only) or
/// [`push_update`](Self::push_update) (also delivered on the change
/// feed), emulating the two authoritative channels.
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<JobId, Job>>,
    fetch_counts: Mutex<HashMap<JobId, u32>>,
    feed_tx: broadcast::Sender<ChangeEvent>,
}

impl MemoryJobStore {
    pub fn new(feed_tx: broadcast::Sender<ChangeEvent>) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            fetch_counts: Mutex::new(HashMap::new()),
            feed_tx,
        }
    }

    /// Number of job rows created.
    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn get(&self, job_id: JobId) -> Option<Job> {
        self.jobs.lock().await.get(&job_id).cloned()
    }

    /// How many times the poll loop has re-read this job.
    pub async fn fetches(&self, job_id: JobId) -> u32 {
        self.fetch_counts
            .lock()
            .await
            .get(&job_id)
            .copied()
            .unwrap_or(0)
    }

    /// Mutate the authoritative row without a feed frame; only the
    /// poll loop will notice.
    pub async fn set_remote_status(
        &self,
        job_id: JobId,
        status: JobStatus,
        generated_url: Option<&str>,
    ) {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&job_id).expect("job should exist");
        job.status = status;
        if let Some(url) = generated_url {
            job.generated_url = Some(url.to_string());
        }
    }

    /// Mutate the authoritative row *and* deliver the change on the
    /// push feed.
    pub async fn push_update(
        &self,
        job_id: JobId,
        status: JobStatus,
        generated_url: Option<&str>,
    ) {
        self.set_remote_status(job_id, status, generated_url).await;
        let job = self.get(job_id).await.expect("job should exist");
        let _ = self.feed_tx.send(ChangeEvent::Updated(job));
    }

    /// Deliver a raw feed event without touching the rows (for frames
    /// that originate on another device).
    pub fn push_event(&self, event: ChangeEvent) {
        let _ = self.feed_tx.send(event);
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, new_job: NewJob) -> Result<Job, BoxError> {
        let job = Job {
            id: uuid::Uuid::new_v4(),
            user_id: new_job.user_id,
            original_url: new_job.original_url,
            generated_url: None,
            status: new_job.status,
            prompt: None,
            style: new_job.style,
            metadata: new_job.metadata,
            created_at: chrono::Utc::now(),
        };
        self.jobs.lock().await.insert(job.id, job.clone());
        Ok(job)
    }

    async fn update_status(&self, job_id: JobId, status: JobStatus) -> Result<(), BoxError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&job_id).ok_or("job not found")?;
        job.status = status;
        Ok(())
    }

    async fn fetch_status(&self, job_id: JobId) -> Result<JobStatusRow, BoxError> {
        *self
            .fetch_counts
            .lock()
            .await
            .entry(job_id)
            .or_insert(0) += 1;
        let jobs = self.jobs.lock().await;
        let job = jobs.get(&job_id).ok_or("job not found")?;
        Ok(JobStatusRow {
            status: job.status,
            generated_url: job.generated_url.clone(),
        })
    }

    async fn list_jobs(&self, user_id: UserId) -> Result<Vec<Job>, BoxError> {
        let jobs = self.jobs.lock().await;
        let mut owned: Vec<Job> = jobs
            .values()
            .filter(|j| j.user_id == user_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(owned)
    }
}

// ---------------------------------------------------------------------------
// FlakyStorage
// ---------------------------------------------------------------------------

/// Object storage with an on/off switch and a write counter.
pub struct FlakyStorage {
    failing: AtomicBool,
    puts: AtomicU32,
}

impl FlakyStorage {
    pub fn working() -> Self {
        Self {
            failing: AtomicBool::new(false),
            puts: AtomicU32::new(0),
        }
    }

    pub fn broken() -> Self {
        Self {
            failing: AtomicBool::new(true),
            puts: AtomicU32::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Attempted writes, successful or not.
    pub fn put_count(&self) -> u32 {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for FlakyStorage {
    async fn put(&self, _key: &str, _content_type: &str, _bytes: Bytes) -> Result<(), BoxError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            Err("bucket not provisioned".into())
        } else {
            Ok(())
        }
    }

    fn public_url(&self, key: &str) -> String {
        format!("https://cdn.example/{key}")
    }
}

// ---------------------------------------------------------------------------
// ScriptedWorker
// ---------------------------------------------------------------------------

/// Records every invocation; can be told to refuse enqueues.
pub struct ScriptedWorker {
    refusing: AtomicBool,
    invocations: Mutex<Vec<(JobId, bool, Option<String>)>>,
}

impl ScriptedWorker {
    pub fn accepting() -> Self {
        Self {
            refusing: AtomicBool::new(false),
            invocations: Mutex::new(Vec::new()),
        }
    }

    pub fn refusing() -> Self {
        Self {
            refusing: AtomicBool::new(true),
            invocations: Mutex::new(Vec::new()),
        }
    }

    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }

    /// `(job_id, is_refinement, prompt_override)` per accepted call.
    pub async fn invocations(&self) -> Vec<(JobId, bool, Option<String>)> {
        self.invocations.lock().await.clone()
    }
}

#[async_trait]
impl WorkerInvoker for ScriptedWorker {
    async fn start(&self, job_id: JobId, options: &InvokeOptions) -> Result<(), BoxError> {
        if self.refusing.load(Ordering::SeqCst) {
            return Err("worker enqueue rejected".into());
        }
        self.invocations.lock().await.push((
            job_id,
            options.is_refinement,
            options.prompt_override.clone(),
        ));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// StaticProfiles
// ---------------------------------------------------------------------------

/// Profile source returning a test-controlled record.
pub struct StaticProfiles {
    profile: Mutex<Profile>,
    fetches: AtomicU32,
}

impl StaticProfiles {
    pub fn new(user_id: UserId, plan: PlanTier, generation_count: u32) -> Self {
        Self {
            profile: Mutex::new(Profile {
                id: user_id,
                email: "agent@example.com".into(),
                full_name: None,
                plan,
                generation_count,
                subscription_ends_at: None,
                created_at: chrono::Utc::now(),
            }),
            fetches: AtomicU32::new(0),
        }
    }

    /// Emulate the billing webhook / server-side accounting moving the
    /// authoritative record.
    pub async fn set(&self, plan: PlanTier, generation_count: u32) {
        let mut profile = self.profile.lock().await;
        profile.plan = plan;
        profile.generation_count = generation_count;
    }

    /// Total authoritative reads (the initial load counts as one).
    pub fn fetches(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProfileSource for StaticProfiles {
    async fn fetch_profile(&self, _user_id: UserId) -> Result<Profile, BoxError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.profile.lock().await.clone())
    }
}

// ---------------------------------------------------------------------------
// FakeCheckout
// ---------------------------------------------------------------------------

pub struct FakeCheckout;

#[async_trait]
impl CheckoutGateway for FakeCheckout {
    async fn create_checkout(&self, plan_id: &str) -> Result<CheckoutSession, BoxError> {
        Ok(CheckoutSession {
            url: format!("https://checkout.example/session/{plan_id}"),
        })
    }
}

// ---------------------------------------------------------------------------
// TestContext
// ---------------------------------------------------------------------------

/// One scripted platform plus a user to submit as.
pub struct TestContext {
    pub user_id: UserId,
    pub store: Arc<MemoryJobStore>,
    pub storage: Arc<FlakyStorage>,
    pub worker: Arc<ScriptedWorker>,
    pub profiles: Arc<StaticProfiles>,
    pub feed_tx: broadcast::Sender<ChangeEvent>,
}

impl TestContext {
    pub fn new(plan: PlanTier, generation_count: u32) -> Self {
        let user_id = uuid::Uuid::new_v4();
        let (feed_tx, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            user_id,
            store: Arc::new(MemoryJobStore::new(feed_tx.clone())),
            storage: Arc::new(FlakyStorage::working()),
            worker: Arc::new(ScriptedWorker::accepting()),
            profiles: Arc::new(StaticProfiles::new(user_id, plan, generation_count)),
            feed_tx,
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            store: self.store.clone(),
            storage: self.storage.clone(),
            worker: self.worker.clone(),
            profiles: self.profiles.clone(),
            checkout: Arc::new(FakeCheckout),
            changes: self.feed_tx.subscribe(),
            feed: None,
        }
    }

    /// Start an engine against the fakes with the default timings.
    pub async fn engine(&self) -> Arc<Engine> {
        Engine::start(
            EngineConfig::default(),
            self.user_id,
            self.collaborators(),
        )
        .await
        .expect("engine should start")
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Minimal valid PNG payload (signature + IHDR chunk start).
pub fn png_bytes() -> Vec<u8> {
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    bytes.extend_from_slice(&[0, 0, 0, 13, b'I', b'H', b'D', b'R']);
    bytes
}

pub fn png_asset(name: &str) -> LocalAsset {
    LocalAsset::new(name, "image/png", png_bytes())
}

/// An asset whose durable upload *and* inline fallback both fail (no
/// content type to embed).
pub fn unencodable_asset(name: &str) -> LocalAsset {
    LocalAsset::new(name, "", png_bytes())
}

pub fn staging_request() -> GenerationRequest {
    GenerationRequest::new("staging", "modern")
}

/// Wait (in virtual time) until the local view holds `job_id` at
/// `status`, panicking after a generous virtual deadline.
pub async fn wait_for_status(engine: &Engine, job_id: JobId, status: JobStatus) {
    tokio::time::timeout(std::time::Duration::from_secs(600), async {
        loop {
            if let Some(job) = engine.job(job_id).await {
                if job.status == status {
                    return;
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("job {job_id} never reached {status}"));
}

/// Give spawned tasks a chance to drain their channels.
pub async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
}
