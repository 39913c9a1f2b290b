//! Platform boundary for the StageX submission engine.
//!
//! Every external collaborator the engine talks to -- the job store,
//! object storage, the transformation worker, the profile source, and
//! checkout initiation -- is reached through a trait defined in
//! [`traits`], with reqwest-backed production implementations in
//! [`api`] and [`storage`].  The push channel (a per-user WebSocket
//! subscription to row-level job changes) lives in [`feed`], with its
//! wire format in [`changes`] and backoff logic in [`reconnect`].

pub mod api;
pub mod changes;
pub mod feed;
pub mod reconnect;
pub mod storage;
pub mod traits;

pub use api::{ApiError, PlatformApi};
pub use changes::ChangeEvent;
pub use feed::ChangeFeed;
pub use traits::{
    CheckoutGateway, CheckoutSession, InvokeOptions, JobStatusRow, JobStore, ObjectStore,
    ProfileSource, WorkerInvoker,
};
