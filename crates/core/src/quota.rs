//! Quota admission control.
//!
//! A pure pre-filter over the cached profile: the server-side job
//! insert remains the true enforcement point, so this check has no side
//! effects and a rejection is terminal for the attempt (no automatic
//! retry; the user recovers by upgrading).

use crate::profile::PlanTier;

/// A submission was rejected by the quota gate.
///
/// Carries everything needed for a tier-aware message and the upgrade
/// redirect.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Monthly generation limit reached ({used}/{limit} used, {requested} requested) on the {tier} plan")]
pub struct QuotaDenied {
    pub tier: PlanTier,
    pub used: u32,
    pub limit: u32,
    pub requested: u32,
}

/// Decide whether `requested` additional jobs are admissible.
///
/// Rejects iff `used + requested > ceiling(tier)`; unbounded tiers
/// admit any request regardless of usage.
pub fn admit(used: u32, tier: PlanTier, requested: u32) -> Result<(), QuotaDenied> {
    let Some(limit) = tier.ceiling() else {
        return Ok(());
    };

    if used.saturating_add(requested) > limit {
        Err(QuotaDenied {
            tier,
            used,
            limit,
            requested,
        })
    } else {
        Ok(())
    }
}
