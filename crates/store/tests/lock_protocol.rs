//! End-to-end behaviour of the session store over the in-memory backend.
//!
//! Time is driven by a `ManualClock` so expiry and throttle intervals can
//! be crossed deterministically.

use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use futures::future::BoxFuture;
use serde_json::json;
use sessionstate_core::clock::ManualClock;
use sessionstate_core::items::{SessionData, SessionItems};
use sessionstate_core::session::{AcquireOutcome, SessionFlags, SessionKey, UnavailableReason};
use sessionstate_core::types::{DbId, LockId};
use sessionstate_store::{
    ExpiredSession, LockGrant, LockManager, MemoryRecordStore, NewSession, RecordStore,
    SessionStateStore, StoreConfig, StoreError, StoreResult, StoredSession, SweepOutcome,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn config(timeout: i32, interval: i32, callbacks: bool) -> StoreConfig {
    StoreConfig {
        application_name: "/test".to_string(),
        session_timeout_minutes: timeout,
        cleanup_interval_minutes: interval,
        enable_expire_callback: callbacks,
    }
}

fn memory_store() -> (Arc<dyn RecordStore>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let store: Arc<dyn RecordStore> = Arc::new(MemoryRecordStore::with_clock(clock.clone()));
    (store, clock)
}

fn items(pairs: &[(&str, serde_json::Value)]) -> SessionItems {
    let mut items = SessionItems::new();
    for (name, value) in pairs {
        items.insert(*name, value.clone());
    }
    items
}

/// Delegates to a memory store, running `after_lock` once right after the
/// first `try_lock` so other requests can act in between.
struct InterleavingStore {
    inner: Arc<MemoryRecordStore>,
    after_lock: Mutex<Option<BoxFuture<'static, ()>>>,
}

#[async_trait]
impl RecordStore for InterleavingStore {
    async fn try_lock(&self, key: &SessionKey) -> StoreResult<Option<LockGrant>> {
        let grant = self.inner.try_lock(key).await?;
        let step = self.after_lock.lock().unwrap().take();
        if let Some(step) = step {
            step.await;
        }
        Ok(grant)
    }

    async fn read(&self, key: &SessionKey) -> StoreResult<Option<StoredSession>> {
        self.inner.read(key).await
    }

    async fn release(
        &self,
        key: &SessionKey,
        lock_id: LockId,
        timeout: i32,
        payload: Option<&[u8]>,
    ) -> StoreResult<u64> {
        self.inner.release(key, lock_id, timeout, payload).await
    }

    async fn touch(&self, key: &SessionKey, timeout: i32) -> StoreResult<u64> {
        self.inner.touch(key, timeout).await
    }

    async fn upsert(&self, session: &NewSession) -> StoreResult<()> {
        self.inner.upsert(session).await
    }

    async fn delete(&self, key: &SessionKey, lock_id: LockId) -> StoreResult<u64> {
        self.inner.delete(key, lock_id).await
    }

    async fn scan_expired(&self, application_id: DbId) -> StoreResult<Vec<ExpiredSession>> {
        self.inner.scan_expired(application_id).await
    }

    async fn delete_expired(&self, key: &SessionKey) -> StoreResult<u64> {
        self.inner.delete_expired(key).await
    }

    async fn purge_expired(&self, application_id: DbId) -> StoreResult<u64> {
        self.inner.purge_expired(application_id).await
    }

    async fn ensure_application(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> StoreResult<DbId> {
        self.inner.ensure_application(name, description).await
    }

    async fn ensure_cleanup(
        &self,
        application_id: DbId,
        interval_minutes: i32,
    ) -> StoreResult<()> {
        self.inner.ensure_cleanup(application_id, interval_minutes).await
    }

    async fn cleanup_interval(&self, application_id: DbId) -> StoreResult<Option<i32>> {
        self.inner.cleanup_interval(application_id).await
    }

    async fn try_claim_cleanup(&self, application_id: DbId) -> StoreResult<u64> {
        self.inner.try_claim_cleanup(application_id).await
    }
}

// ---------------------------------------------------------------------------
// Test: the documented single-session timeline
// ---------------------------------------------------------------------------

#[tokio::test]
async fn session_lifecycle_timeline() {
    let (store, clock) = memory_store();
    let sessions = SessionStateStore::open(store.clone(), config(1, 1, false))
        .await
        .unwrap();

    // t = 0: create S1 with a one minute timeout.
    let data = SessionData::with_items(items(&[("cart", json!(["apple"]))]), 1);
    assert!(sessions.release_and_save("S1", &data, 0, true).await.unwrap());

    // t = 30s: first exclusive fetch.
    clock.advance(Duration::seconds(30));
    let fetch = sessions.fetch_exclusive("S1").await.unwrap();
    assert!(!fetch.locked);
    assert_eq!(fetch.lock_id, 1);
    assert_eq!(fetch.data.as_ref(), Some(&data));

    // t = 40s: release with the matching token, expires at t = 100s.
    clock.advance(Duration::seconds(10));
    assert!(sessions.release_only("S1", 1).await.unwrap());

    // t = 95s: still alive, second fetch succeeds.
    clock.advance(Duration::seconds(55));
    let fetch = sessions.fetch_exclusive("S1").await.unwrap();
    assert!(!fetch.locked);
    assert_eq!(fetch.lock_id, 2);

    // t = 200s: the reaper finds S1 expired and deletes it.
    clock.advance(Duration::seconds(105));
    assert_matches!(
        sessions.reaper().sweep().await.unwrap(),
        SweepOutcome::Swept(stats) if stats.deleted == 1
    );

    let fetch = sessions.fetch_exclusive("S1").await.unwrap();
    assert!(!fetch.locked);
    assert!(fetch.data.is_none());
    let key = SessionKey::new(sessions.application_id(), "S1");
    assert!(store.read(&key).await.unwrap().is_none());
}

// ---------------------------------------------------------------------------
// Test: concurrent exclusive fetches grant exactly one lock
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_fetches_grant_one_lock() {
    let store: Arc<dyn RecordStore> = Arc::new(MemoryRecordStore::new());
    let sessions = Arc::new(
        SessionStateStore::open(store, config(20, 10, false))
            .await
            .unwrap(),
    );
    sessions.create_uninitialized("s1", 20).await.unwrap();

    let attempts = (0..16).map(|_| {
        let sessions = sessions.clone();
        tokio::spawn(async move { sessions.fetch_exclusive("s1").await.unwrap() })
    });
    let results = futures::future::join_all(attempts).await;

    let granted: Vec<_> = results
        .into_iter()
        .map(|r| r.unwrap())
        .filter(|fetch| fetch.data.is_some())
        .collect();
    assert_eq!(granted.len(), 1);
    assert_eq!(granted[0].lock_id, 1);
}

// ---------------------------------------------------------------------------
// Test: a stale duplicate release cannot hand the lock to a second caller
// ---------------------------------------------------------------------------

#[tokio::test]
async fn duplicate_release_during_grant_keeps_lock_exclusive() {
    let inner = Arc::new(MemoryRecordStore::new());
    let direct = LockManager::new(inner.clone());
    let key = SessionKey::new(1, "s1");
    direct
        .create(&key, 20, Some(b"{}".to_vec()), SessionFlags::None)
        .await
        .unwrap();

    // Previous holder H takes and releases token 1.
    assert_matches!(
        direct.acquire_exclusive(&key).await.unwrap(),
        AcquireOutcome::Granted { lock_id: 1, .. }
    );
    assert!(direct.release(&key, 1, 20).await.unwrap());

    // While A's grant is in flight, H re-sends its release and C tries to lock.
    let observed = Arc::new(Mutex::new(None));
    let step = {
        let observed = observed.clone();
        let direct = direct.clone();
        let key = key.clone();
        Box::pin(async move {
            let duplicate = direct.release(&key, 1, 20).await.unwrap();
            let contender = direct.acquire_exclusive(&key).await.unwrap();
            *observed.lock().unwrap() = Some((duplicate, contender));
        }) as BoxFuture<'static, ()>
    };
    let interleaved = Arc::new(InterleavingStore {
        inner: inner.clone(),
        after_lock: Mutex::new(Some(step)),
    });

    let a = LockManager::new(interleaved)
        .acquire_exclusive(&key)
        .await
        .unwrap();
    assert_matches!(a, AcquireOutcome::Granted { lock_id: 2, .. });

    let (duplicate, contender) = observed.lock().unwrap().take().unwrap();
    assert!(!duplicate, "stale release must not unlock the new holder");
    assert_matches!(
        contender,
        AcquireOutcome::Unavailable(UnavailableReason::HeldByOther { lock_id: 2, .. })
    );

    let record = inner.read(&key).await.unwrap().unwrap().record;
    assert!(record.locked);
    assert_eq!(record.lock_id, 2);
}

// ---------------------------------------------------------------------------
// Test: the token grows by one per grant under contention
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn lock_token_counts_every_grant() {
    const WORKERS: usize = 8;
    const GRANTS_EACH: usize = 5;

    let store: Arc<dyn RecordStore> = Arc::new(MemoryRecordStore::new());
    let sessions = Arc::new(
        SessionStateStore::open(store.clone(), config(20, 10, false))
            .await
            .unwrap(),
    );
    sessions.create_uninitialized("s1", 20).await.unwrap();

    let workers = (0..WORKERS).map(|_| {
        let sessions = sessions.clone();
        tokio::spawn(async move {
            let mut granted = 0;
            while granted < GRANTS_EACH {
                let fetch = sessions.fetch_exclusive("s1").await.unwrap();
                if fetch.data.is_some() {
                    granted += 1;
                    assert!(sessions.release_only("s1", fetch.lock_id).await.unwrap());
                } else {
                    tokio::task::yield_now().await;
                }
            }
        })
    });
    for result in futures::future::join_all(workers).await {
        result.unwrap();
    }

    let key = SessionKey::new(sessions.application_id(), "s1");
    let record = store.read(&key).await.unwrap().unwrap().record;
    assert_eq!(record.lock_id, (WORKERS * GRANTS_EACH) as i64);
    assert!(!record.locked);
}

// ---------------------------------------------------------------------------
// Test: many reapers, one sweep per interval
// ---------------------------------------------------------------------------

#[tokio::test]
async fn throttle_admits_one_reaper_per_interval() {
    let (store, clock) = memory_store();
    let mut processes = Vec::new();
    for _ in 0..6 {
        processes.push(
            SessionStateStore::open(store.clone(), config(20, 10, false))
                .await
                .unwrap(),
        );
    }
    let app = processes[0].application_id();
    assert!(processes.iter().all(|p| p.application_id() == app));

    clock.advance(Duration::minutes(11));
    let outcomes = futures::future::join_all(processes.iter().map(|p| {
        let reaper = p.reaper();
        async move { reaper.sweep().await.unwrap() }
    }))
    .await;

    let swept = outcomes
        .iter()
        .filter(|o| matches!(o, SweepOutcome::Swept(_)))
        .count();
    let throttled = outcomes
        .iter()
        .filter(|o| **o == SweepOutcome::Throttled)
        .count();
    assert_eq!(swept, 1);
    assert_eq!(throttled, 5);
}

// ---------------------------------------------------------------------------
// Test: uninitialized placeholders
// ---------------------------------------------------------------------------

#[tokio::test]
async fn uninitialized_session_yields_empty_data_once() {
    let (store, _clock) = memory_store();
    let sessions = SessionStateStore::open(store, config(20, 10, false))
        .await
        .unwrap();
    sessions.create_uninitialized("s1", 15).await.unwrap();

    let shared = sessions.fetch_shared("s1").await.unwrap();
    assert_eq!(shared.actions, SessionFlags::Uninitialized);
    assert_eq!(shared.data, Some(SessionData::new(15)));

    let first = sessions.fetch_exclusive("s1").await.unwrap();
    assert_eq!(first.actions, SessionFlags::Uninitialized);
    assert_eq!(first.data, Some(SessionData::new(15)));

    let saved = SessionData::with_items(items(&[("n", json!(1))]), 15);
    assert!(sessions
        .release_and_save("s1", &saved, first.lock_id, false)
        .await
        .unwrap());

    let second = sessions.fetch_exclusive("s1").await.unwrap();
    assert_eq!(second.actions, SessionFlags::None);
    assert_eq!(second.data, Some(saved));
}

// ---------------------------------------------------------------------------
// Test: shared fetch reports a held lock without data
// ---------------------------------------------------------------------------

#[tokio::test]
async fn shared_fetch_sees_held_lock() {
    let (store, clock) = memory_store();
    let sessions = SessionStateStore::open(store, config(20, 10, false))
        .await
        .unwrap();
    let data = SessionData::with_items(items(&[("a", json!("b"))]), 20);
    sessions.release_and_save("s1", &data, 0, true).await.unwrap();

    let shared = sessions.fetch_shared("s1").await.unwrap();
    assert_eq!(shared.data, Some(data));
    assert!(!shared.locked);

    let held = sessions.fetch_exclusive("s1").await.unwrap();
    clock.advance(Duration::seconds(3));

    let shared = sessions.fetch_shared("s1").await.unwrap();
    assert!(shared.locked);
    assert!(shared.data.is_none());
    assert_eq!(shared.lock_id, held.lock_id);
    assert_eq!(shared.lock_age, Duration::seconds(3));

    let blocked = sessions.fetch_exclusive("s1").await.unwrap();
    assert!(blocked.locked);
    assert_eq!(blocked.lock_age, Duration::seconds(3));
}

// ---------------------------------------------------------------------------
// Test: touch extends life without the token
// ---------------------------------------------------------------------------

#[tokio::test]
async fn touch_extends_expiry() {
    let (store, clock) = memory_store();
    let sessions = SessionStateStore::open(store, config(5, 10, false))
        .await
        .unwrap();
    sessions.create_uninitialized("s1", 5).await.unwrap();

    clock.advance(Duration::minutes(4));
    assert!(sessions.touch("s1").await.unwrap());
    clock.advance(Duration::minutes(4));
    assert!(sessions.fetch_exclusive("s1").await.unwrap().data.is_some());

    assert!(!sessions.touch("missing").await.unwrap());
}

// ---------------------------------------------------------------------------
// Test: remove and expire callbacks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn remove_fires_callback_for_holder_only() {
    let (store, _clock) = memory_store();
    let sessions = SessionStateStore::open(store, config(20, 10, true))
        .await
        .unwrap();

    let removed = Arc::new(Mutex::new(Vec::new()));
    let sink = removed.clone();
    assert!(sessions.set_expire_callback(Arc::new(
        move |id: &str, data: &SessionData| -> anyhow::Result<()> {
            sink.lock().unwrap().push((id.to_string(), data.clone()));
            Ok(())
        }
    )));

    let data = SessionData::with_items(items(&[("k", json!(true))]), 20);
    sessions.release_and_save("s1", &data, 0, true).await.unwrap();
    let held = sessions.fetch_exclusive("s1").await.unwrap();

    assert!(!sessions.remove("s1", held.lock_id + 1, &data).await.unwrap());
    assert!(removed.lock().unwrap().is_empty());

    assert!(sessions.remove("s1", held.lock_id, &data).await.unwrap());
    assert_eq!(*removed.lock().unwrap(), vec![("s1".to_string(), data)]);
}

#[tokio::test]
async fn callback_error_surfaces_after_delete() {
    let (store, _clock) = memory_store();
    let sessions = SessionStateStore::open(store.clone(), config(20, 10, true))
        .await
        .unwrap();
    sessions.set_expire_callback(Arc::new(
        |_: &str, _: &SessionData| -> anyhow::Result<()> { anyhow::bail!("listener down") },
    ));

    sessions.create_uninitialized("s1", 20).await.unwrap();
    let held = sessions.fetch_exclusive("s1").await.unwrap();
    assert_matches!(
        sessions.remove("s1", held.lock_id, &SessionData::new(20)).await,
        Err(StoreError::Callback(_))
    );
    let key = SessionKey::new(sessions.application_id(), "s1");
    assert!(store.read(&key).await.unwrap().is_none());
}

#[tokio::test]
async fn disabled_callbacks_are_not_registered() {
    let (store, clock) = memory_store();
    let sessions = SessionStateStore::open(store, config(1, 1, false))
        .await
        .unwrap();
    let calls = Arc::new(Mutex::new(0));
    let counter = calls.clone();
    assert!(!sessions.set_expire_callback(Arc::new(
        move |_: &str, _: &SessionData| -> anyhow::Result<()> {
            *counter.lock().unwrap() += 1;
            Ok(())
        }
    )));

    sessions.create_uninitialized("s1", 1).await.unwrap();
    clock.advance(Duration::minutes(2));
    assert_matches!(
        sessions.reaper().sweep().await.unwrap(),
        SweepOutcome::Swept(stats) if stats.deleted == 1
    );
    assert_eq!(*calls.lock().unwrap(), 0);
}

#[tokio::test]
async fn reaper_hands_expired_data_to_callback() {
    let (store, clock) = memory_store();
    let sessions = SessionStateStore::open(store, config(1, 1, true))
        .await
        .unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    sessions.set_expire_callback(Arc::new(
        move |id: &str, data: &SessionData| -> anyhow::Result<()> {
            sink.lock().unwrap().push((id.to_string(), data.clone()));
            Ok(())
        },
    ));

    let data = SessionData::with_items(items(&[("user", json!("ada"))]), 1);
    sessions.release_and_save("s1", &data, 0, true).await.unwrap();
    clock.advance(Duration::minutes(2));

    sessions.reaper().sweep().await.unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![("s1".to_string(), data)]);
}

// ---------------------------------------------------------------------------
// Test: input validation and undecodable payloads
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_session_id_is_rejected() {
    let (store, _clock) = memory_store();
    let sessions = SessionStateStore::open(store, config(20, 10, false))
        .await
        .unwrap();
    assert_matches!(
        sessions.fetch_exclusive("").await,
        Err(StoreError::Core(_))
    );
    assert_matches!(
        sessions.touch(&"x".repeat(300)).await,
        Err(StoreError::Core(_))
    );
}

#[tokio::test]
async fn undecodable_payload_releases_lock() {
    let (store, _clock) = memory_store();
    let sessions = SessionStateStore::open(store.clone(), config(20, 10, false))
        .await
        .unwrap();
    let key = SessionKey::new(sessions.application_id(), "s1");
    store
        .upsert(&sessionstate_store::NewSession {
            key: key.clone(),
            timeout: 20,
            payload: Some(b"\xff not json".to_vec()),
            flags: SessionFlags::None,
        })
        .await
        .unwrap();

    assert_matches!(
        sessions.fetch_exclusive("s1").await,
        Err(StoreError::Payload(_))
    );
    let record = store.read(&key).await.unwrap().unwrap().record;
    assert!(!record.locked);
    assert_eq!(record.lock_id, 1);
}
