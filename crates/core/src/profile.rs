//! Profile/quota record and subscription tiers.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::types::{Timestamp, UserId};

/// Subscription tier.  Mutated out-of-band by the billing webhook; the
/// engine only ever reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum PlanTier {
    Trial,
    Basic,
    Standard,
    Pro,
    Enterprise,
}

impl PlanTier {
    /// Maximum jobs per accounting period, `None` meaning unbounded.
    pub fn ceiling(self) -> Option<u32> {
        match self {
            PlanTier::Trial => Some(3),
            PlanTier::Basic => Some(10),
            PlanTier::Standard => Some(50),
            PlanTier::Pro | PlanTier::Enterprise => None,
        }
    }
}

impl std::fmt::Display for PlanTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PlanTier::Trial => "trial",
            PlanTier::Basic => "basic",
            PlanTier::Standard => "standard",
            PlanTier::Pro => "pro",
            PlanTier::Enterprise => "enterprise",
        };
        f.write_str(s)
    }
}

/// A row from the `profiles` table.
///
/// `generation_count` is incremented server-side as jobs are created;
/// the engine refreshes its cached copy after each terminal success.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Profile {
    pub id: UserId,
    pub email: String,
    pub full_name: Option<String>,
    #[serde(rename = "plan_type")]
    pub plan: PlanTier,
    pub generation_count: u32,
    pub subscription_ends_at: Option<Timestamp>,
    pub created_at: Timestamp,
}
