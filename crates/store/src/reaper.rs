//! Background deletion of expired sessions.
//!
//! Every process runs its own [`ExpirationReaper`] on a fixed period. The
//! [`CleanupThrottle`] row lets only one of them scan per interval, and an
//! in-process flag keeps two ticks of the same reaper from overlapping.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sessionstate_core::items::{SessionData, SessionSerializer};
use sessionstate_core::session::SessionKey;
use tokio_util::sync::CancellationToken;

use crate::callback::{CallbackSlot, ExpireCallback};
use crate::error::StoreResult;
use crate::lock::LockManager;
use crate::throttle::CleanupThrottle;

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Counters for one sweep that got past the throttle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Expired rows found.
    pub scanned: u64,
    pub deleted: u64,
    pub callback_failures: u64,
    /// Payloads that could not be decoded; their callback was skipped.
    pub decode_failures: u64,
    pub delete_failures: u64,
}

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    /// A previous tick of this reaper is still in progress.
    AlreadyRunning,
    /// Another sweep ran within the current interval.
    Throttled,
    Swept(SweepStats),
}

// ---------------------------------------------------------------------------
// Re-entrancy guard
// ---------------------------------------------------------------------------

struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// ExpirationReaper
// ---------------------------------------------------------------------------

pub struct ExpirationReaper {
    locks: LockManager,
    throttle: CleanupThrottle,
    serializer: Arc<dyn SessionSerializer>,
    callback: CallbackSlot,
    period: Duration,
    running: AtomicBool,
}

impl ExpirationReaper {
    pub fn new(
        locks: LockManager,
        throttle: CleanupThrottle,
        serializer: Arc<dyn SessionSerializer>,
        callback: CallbackSlot,
        period: Duration,
    ) -> Self {
        Self {
            locks,
            throttle,
            serializer,
            callback,
            period,
            running: AtomicBool::new(false),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Sweep on every tick until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            application_id = self.throttle.application_id(),
            period_secs = self.period.as_secs(),
            "Session reaper started"
        );

        let mut interval = tokio::time::interval(self.period);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Session reaper stopping");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.sweep().await {
                        tracing::error!(error = %e, "Session reaper: sweep failed");
                    }
                }
            }
        }
    }

    /// Run a single tick.
    ///
    /// Failures of the throttle claim or of the scan abort the tick and are
    /// returned. Failures on one record are logged, counted and skipped.
    pub async fn sweep(&self) -> StoreResult<SweepOutcome> {
        let Some(_guard) = RunGuard::acquire(&self.running) else {
            tracing::debug!("Session reaper: previous sweep still running");
            return Ok(SweepOutcome::AlreadyRunning);
        };

        if !self.throttle.try_claim().await? {
            tracing::debug!("Session reaper: swept recently, skipping");
            return Ok(SweepOutcome::Throttled);
        }

        let stats = match self.callback.get() {
            Some(callback) => self.sweep_with_callback(callback).await?,
            None => {
                let deleted = self
                    .locks
                    .purge_expired(self.throttle.application_id())
                    .await?;
                SweepStats {
                    scanned: deleted,
                    deleted,
                    ..SweepStats::default()
                }
            }
        };

        if stats.deleted > 0 {
            tracing::info!(
                application_id = self.throttle.application_id(),
                deleted = stats.deleted,
                callback_failures = stats.callback_failures,
                decode_failures = stats.decode_failures,
                delete_failures = stats.delete_failures,
                "Session reaper: deleted expired sessions"
            );
        } else {
            tracing::debug!("Session reaper: no expired sessions");
        }

        Ok(SweepOutcome::Swept(stats))
    }

    async fn sweep_with_callback(&self, callback: ExpireCallback) -> StoreResult<SweepStats> {
        let application_id = self.throttle.application_id();
        let expired = self.locks.scan_expired(application_id).await?;
        let mut stats = SweepStats {
            scanned: expired.len() as u64,
            ..SweepStats::default()
        };

        for session in expired {
            match self.serializer.decode(session.payload.as_deref()) {
                Ok(items) => {
                    let data = SessionData::with_items(items, session.timeout);
                    if let Err(e) = callback(&session.session_id, &data) {
                        stats.callback_failures += 1;
                        tracing::error!(
                            session_id = %session.session_id,
                            error = %e,
                            "Session reaper: expire callback failed"
                        );
                    }
                }
                Err(e) => {
                    stats.decode_failures += 1;
                    tracing::warn!(
                        session_id = %session.session_id,
                        error = %e,
                        "Session reaper: undecodable payload, deleting without callback"
                    );
                }
            }

            let key = SessionKey::new(application_id, session.session_id);
            match self.locks.delete_expired(&key).await {
                Ok(true) => stats.deleted += 1,
                // Touched after the scan.
                Ok(false) => {}
                Err(e) => {
                    stats.delete_failures += 1;
                    tracing::error!(%key, error = %e, "Session reaper: delete failed");
                }
            }
        }

        Ok(stats)
    }
}
