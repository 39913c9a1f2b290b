//! Job submission and status reconciliation engine.
//!
//! Orchestrates one user's image-generation session: quota admission,
//! upload with inline fallback, per-item asynchronous dispatch, and
//! the dual-channel (push + poll) convergence that keeps the local job
//! view consistent with authoritative server state.  The platform
//! boundary lives in `stagex-remote`; pure domain logic in
//! `stagex-core`.

pub mod batch;
pub mod config;
pub mod dispatch;
mod engine;
pub mod error;
pub mod notify;
pub mod profile;
pub mod reconcile;
pub mod upload;
pub mod view;

pub use batch::{BatchCoordinator, BatchItemId, BatchItemSnapshot};
pub use config::EngineConfig;
pub use dispatch::{DispatchError, Dispatcher};
pub use engine::{Collaborators, Engine};
pub use error::SubmitError;
pub use notify::{Notification, NotificationLevel, Notifier};
pub use profile::ProfileCache;
pub use reconcile::{JobSignal, UpdateSource};
pub use upload::{ProgressReceiver, UploadError, UploadPipeline};
pub use view::{JobView, Observation, ViewEvent};
