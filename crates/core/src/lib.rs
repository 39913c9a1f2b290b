//! Domain types and pure policy for the StageX submission engine.
//!
//! Everything in this crate is I/O-free: the job lifecycle and its
//! monotonic merge rule, the subscription quota policy, local asset
//! validation and encoding, and the shared error taxonomy.  The
//! orchestration lives in `stagex-engine`; the platform boundary in
//! `stagex-remote`.

pub mod assets;
pub mod error;
pub mod job;
pub mod profile;
pub mod quota;
pub mod status;
pub mod types;
