//! Cached profile/quota record with authoritative refresh.

use std::sync::Arc;

use tokio::sync::RwLock;

use stagex_core::profile::Profile;
use stagex_core::types::UserId;
use stagex_remote::traits::BoxError;
use stagex_remote::ProfileSource;

/// The engine's local copy of the user's profile.
///
/// No merge logic: a refresh wholly replaces the cached record, so the
/// quota gate's next read reflects whatever the billing webhook and
/// server-side job accounting have done in the meantime.
pub struct ProfileCache {
    user_id: UserId,
    source: Arc<dyn ProfileSource>,
    current: RwLock<Profile>,
}

impl ProfileCache {
    /// Fetch the initial profile and build the cache.
    pub async fn load(
        user_id: UserId,
        source: Arc<dyn ProfileSource>,
    ) -> Result<Self, BoxError> {
        let profile = source.fetch_profile(user_id).await?;
        tracing::info!(
            user_id = %user_id,
            plan = %profile.plan,
            generation_count = profile.generation_count,
            "Profile loaded",
        );
        Ok(Self {
            user_id,
            source,
            current: RwLock::new(profile),
        })
    }

    /// The cached profile.
    pub async fn current(&self) -> Profile {
        self.current.read().await.clone()
    }

    /// Re-read the authoritative record and replace the cache.
    pub async fn refresh(&self) -> Result<Profile, BoxError> {
        let profile = self.source.fetch_profile(self.user_id).await?;
        tracing::debug!(
            user_id = %self.user_id,
            plan = %profile.plan,
            generation_count = profile.generation_count,
            "Profile refreshed",
        );
        *self.current.write().await = profile.clone();
        Ok(profile)
    }
}
