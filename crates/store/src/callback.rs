//! Expire-callback registration shared by the accessor and the reaper.

use std::sync::{Arc, RwLock};

use sessionstate_core::items::SessionData;

/// Called with the session id and its last stored data when a session
/// expires or is removed.
pub type ExpireCallback = Arc<dyn Fn(&str, &SessionData) -> anyhow::Result<()> + Send + Sync>;

/// Holds at most one registered callback. Clones share the slot.
#[derive(Clone, Default)]
pub struct CallbackSlot {
    inner: Arc<RwLock<Option<ExpireCallback>>>,
}

impl CallbackSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the registered callback.
    pub fn set(&self, callback: ExpireCallback) {
        let mut slot = self.inner.write().unwrap_or_else(|p| p.into_inner());
        *slot = Some(callback);
    }

    pub fn get(&self) -> Option<ExpireCallback> {
        self.inner
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn is_set(&self) -> bool {
        self.get().is_some()
    }
}
