//! Cross-process rate limit for the expired-session sweep.

use std::sync::Arc;

use sessionstate_core::cleanup::effective_interval_minutes;
use sessionstate_core::error::CoreError;
use sessionstate_core::types::DbId;

use crate::error::StoreResult;
use crate::record_store::RecordStore;

/// One throttle row per application. Every process may ask; at most one
/// per interval gets a `true` from [`try_claim`](Self::try_claim).
#[derive(Clone)]
pub struct CleanupThrottle {
    store: Arc<dyn RecordStore>,
    application_id: DbId,
}

impl CleanupThrottle {
    pub fn new(store: Arc<dyn RecordStore>, application_id: DbId) -> Self {
        Self {
            store,
            application_id,
        }
    }

    pub fn application_id(&self) -> DbId {
        self.application_id
    }

    /// Create the throttle row unless another process already did.
    pub async fn ensure(&self, default_interval_minutes: i32) -> StoreResult<()> {
        self.store
            .ensure_cleanup(self.application_id, default_interval_minutes)
            .await
    }

    /// Interval stored in the row, floored to one minute.
    pub async fn interval_minutes(&self) -> StoreResult<i32> {
        let stored = self
            .store
            .cleanup_interval(self.application_id)
            .await?
            .ok_or_else(|| CoreError::NotFound {
                entity: "session_cleanup",
                id: self.application_id.to_string(),
            })?;
        Ok(effective_interval_minutes(stored))
    }

    /// Claim this interval's sweep.
    pub async fn try_claim(&self) -> StoreResult<bool> {
        Ok(self.store.try_claim_cleanup(self.application_id).await? > 0)
    }
}
