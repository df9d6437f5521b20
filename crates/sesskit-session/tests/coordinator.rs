//! End-to-end request flows through the session coordinator.
//!
//! Every test drives real `begin`/`end` cycles against a `MemoryStore`
//! wrapped in a client that counts writes, and carries the issued cookie
//! from one request into the next the way a browser would.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use serde_json::Value;
use sesskit_session::{BasicRequest, SessionCoordinator, SessionError, StoreOperation};
use sesskit_store::{
    Availability, ConnectionObserver, CookieOptions, MemoryStore, StoreClient,
    StoreError,
};
use tokio::time;

const KEY: &str = "sesskit.sid";

// ---------------------------------------------------------------------------
// Test client
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CountingStore {
    inner: MemoryStore,
    sets: AtomicUsize,
    destroys: AtomicUsize,
    fail_writes: AtomicBool,
}

impl CountingStore {
    fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    fn destroys(&self) -> usize {
        self.destroys.load(Ordering::SeqCst)
    }
}

impl StoreClient for CountingStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.inner.get(key).await
    }

    async fn set(
        &self,
        key: &str,
        record: Value,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("write refused".into()));
        }
        self.inner.set(key, record, ttl).await
    }

    async fn destroy(&self, key: &str) -> Result<(), StoreError> {
        self.destroys.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("write refused".into()));
        }
        self.inner.destroy(key).await
    }

    async fn refresh_ttl(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        self.inner.refresh_ttl(key, ttl).await
    }

    fn observe(&self, observer: ConnectionObserver) {
        self.inner.observe(observer);
    }
}

fn coordinator() -> SessionCoordinator<CountingStore> {
    SessionCoordinator::builder().build(CountingStore::default())
}

fn client(sessions: &SessionCoordinator<CountingStore>) -> &CountingStore {
    sessions.store().client()
}

/// Runs one request that sets `count`, returning the issued session id.
async fn store_count(sessions: &SessionCoordinator<CountingStore>, count: u64) -> String {
    let mut req = BasicRequest::new("/");
    let mut snapshot = sessions.begin(&mut req).await.unwrap().unwrap();
    snapshot.session_mut().unwrap().insert("count", count).unwrap();
    sessions.end(&mut req, &mut snapshot).await.unwrap();
    req.issued(KEY).flatten().expect("cookie issued").to_string()
}

// =========================================================================
// Acquire and persist
// =========================================================================

#[tokio::test]
async fn test_counter_persists_and_reloads_with_issued_cookie() {
    let sessions = coordinator();

    let mut first = BasicRequest::new("/");
    let mut snapshot = sessions.begin(&mut first).await.unwrap().unwrap();
    assert!(snapshot.is_new());
    let session = snapshot.session_mut().unwrap();
    assert_eq!(session.get::<u64>("count").unwrap_or(0), 0);
    session.insert("count", 1).unwrap();
    sessions.end(&mut first, &mut snapshot).await.unwrap();

    let sid = first.issued(KEY).flatten().unwrap().to_string();
    assert_eq!(sid, snapshot.session_id());
    assert_eq!(client(&sessions).sets(), 1);

    let mut second = BasicRequest::new("/").with_cookie(KEY, &sid);
    let loaded = sessions.begin(&mut second).await.unwrap().unwrap();
    assert!(!loaded.is_new());
    assert_eq!(loaded.session_id(), sid);
    assert_eq!(loaded.session().unwrap().get::<u64>("count"), Some(1));
    assert!(loaded.original_hash().is_some());
}

#[tokio::test]
async fn test_untouched_new_session_is_never_written() {
    let sessions = coordinator();
    let mut req = BasicRequest::new("/");

    let mut snapshot = sessions.begin(&mut req).await.unwrap().unwrap();
    sessions.end(&mut req, &mut snapshot).await.unwrap();

    assert_eq!(client(&sessions).sets(), 0);
    assert_eq!(req.issued(KEY), None);
    assert!(snapshot.is_new());
}

#[tokio::test]
async fn test_allow_empty_new_session_writes_untouched_session() {
    let sessions = SessionCoordinator::builder()
        .allow_empty_new_session(true)
        .build(CountingStore::default());
    let mut req = BasicRequest::new("/");

    let mut snapshot = sessions.begin(&mut req).await.unwrap().unwrap();
    sessions.end(&mut req, &mut snapshot).await.unwrap();

    assert_eq!(client(&sessions).sets(), 1);
    assert_eq!(req.issued(KEY).flatten(), Some(snapshot.session_id()));
}

#[tokio::test]
async fn test_end_twice_writes_at_most_once() {
    let sessions = coordinator();
    let mut req = BasicRequest::new("/");
    let mut snapshot = sessions.begin(&mut req).await.unwrap().unwrap();
    snapshot.session_mut().unwrap().insert("count", 1).unwrap();

    sessions.end(&mut req, &mut snapshot).await.unwrap();
    sessions.end(&mut req, &mut snapshot).await.unwrap();

    assert_eq!(client(&sessions).sets(), 1);
    assert!(!snapshot.is_new());
}

#[tokio::test]
async fn test_unchanged_loaded_session_is_not_rewritten() {
    let sessions = coordinator();
    let sid = store_count(&sessions, 1).await;

    let mut req = BasicRequest::new("/").with_cookie(KEY, &sid);
    let mut snapshot = sessions.begin(&mut req).await.unwrap().unwrap();
    sessions.end(&mut req, &mut snapshot).await.unwrap();

    assert_eq!(client(&sessions).sets(), 1);
    assert_eq!(req.issued(KEY), None);
}

#[tokio::test]
async fn test_rolling_rewrites_and_reissues_unchanged_session() {
    let sessions = SessionCoordinator::builder()
        .rolling(true)
        .build(CountingStore::default());
    let sid = store_count(&sessions, 1).await;

    for _ in 0..2 {
        let mut req = BasicRequest::new("/").with_cookie(KEY, &sid);
        let mut snapshot = sessions.begin(&mut req).await.unwrap().unwrap();
        sessions.end(&mut req, &mut snapshot).await.unwrap();
        assert_eq!(req.issued(KEY).flatten(), Some(sid.as_str()));
    }

    assert_eq!(client(&sessions).sets(), 3);
}

#[tokio::test]
async fn test_changed_cookie_options_count_as_modification() {
    let sessions = coordinator();
    let sid = store_count(&sessions, 1).await;

    let mut req = BasicRequest::new("/").with_cookie(KEY, &sid);
    let mut snapshot = sessions.begin(&mut req).await.unwrap().unwrap();
    snapshot.session_mut().unwrap().cookie.max_age = Some(1_000);
    sessions.end(&mut req, &mut snapshot).await.unwrap();

    assert_eq!(client(&sessions).sets(), 2);
    let issued = req.outbound_cookie(KEY).unwrap();
    assert_eq!(issued.options.max_age, Some(1_000));
}

#[tokio::test]
async fn test_begin_record_without_cookie_gets_configured_cookie() {
    let mut cookie = CookieOptions::default();
    cookie.http_only = false;
    cookie.max_age = None;
    let sessions = SessionCoordinator::builder()
        .cookie(cookie.clone())
        .build(CountingStore::default());
    client(&sessions)
        .inner
        .set("sess:legacy", serde_json::json!({ "count": 4 }), None)
        .await
        .unwrap();

    let mut req = BasicRequest::new("/").with_cookie(KEY, "legacy");
    let snapshot = sessions.begin(&mut req).await.unwrap().unwrap();

    assert!(!snapshot.is_new());
    let session = snapshot.session().unwrap();
    assert_eq!(session.get::<u64>("count"), Some(4));
    assert_eq!(session.cookie, cookie);
    assert_ne!(session.cookie, CookieOptions::default());
}

// =========================================================================
// Destroy and invalid ids
// =========================================================================

#[tokio::test]
async fn test_cleared_session_is_destroyed_and_cookie_reset() {
    let sessions = coordinator();
    let sid = store_count(&sessions, 1).await;

    let mut req = BasicRequest::new("/").with_cookie(KEY, &sid);
    let mut snapshot = sessions.begin(&mut req).await.unwrap().unwrap();
    snapshot.clear();
    sessions.end(&mut req, &mut snapshot).await.unwrap();

    assert_eq!(client(&sessions).destroys(), 1);
    assert_eq!(req.issued(KEY), Some(None));
    assert!(client(&sessions).inner.is_empty());

    let mut stale = BasicRequest::new("/").with_cookie(KEY, &sid);
    let fresh = sessions.begin(&mut stale).await.unwrap().unwrap();
    assert!(fresh.is_new());
    assert_ne!(fresh.session_id(), sid);
    assert_eq!(fresh.session().unwrap().get::<u64>("count"), None);
    assert_eq!(stale.issued(KEY), Some(None));
}

#[tokio::test]
async fn test_cleared_new_session_destroys_nothing() {
    let sessions = coordinator();
    let mut req = BasicRequest::new("/");

    let mut snapshot = sessions.begin(&mut req).await.unwrap().unwrap();
    snapshot.clear();
    sessions.end(&mut req, &mut snapshot).await.unwrap();

    assert_eq!(client(&sessions).destroys(), 0);
    assert_eq!(req.issued(KEY), None);
}

#[tokio::test]
async fn test_rejected_session_replaced_with_fresh_one() {
    let sessions = SessionCoordinator::builder()
        .valid(|ctx, _session| ctx.query("valid") != Some("false"))
        .build(CountingStore::default());
    let sid = store_count(&sessions, 1).await;

    let mut accepted = BasicRequest::new("/").with_cookie(KEY, &sid);
    let kept = sessions.begin(&mut accepted).await.unwrap().unwrap();
    assert_eq!(kept.session_id(), sid);

    let mut rejected = BasicRequest::new("/?valid=false").with_cookie(KEY, &sid);
    let replaced = sessions.begin(&mut rejected).await.unwrap().unwrap();
    assert!(replaced.is_new());
    assert_ne!(replaced.session_id(), sid);
    assert_eq!(rejected.issued(KEY), Some(None));
}

// =========================================================================
// Regenerate
// =========================================================================

#[tokio::test]
async fn test_regenerate_stored_session_destroys_old_entry() {
    let sessions = coordinator();
    let sid = store_count(&sessions, 1).await;

    let mut req = BasicRequest::new("/").with_cookie(KEY, &sid);
    let mut snapshot = sessions.begin(&mut req).await.unwrap().unwrap();
    sessions.regenerate(&mut req, &mut snapshot).await.unwrap();

    assert_ne!(snapshot.session_id(), sid);
    assert!(snapshot.is_new());
    assert!(snapshot.session().unwrap().is_empty());
    assert_eq!(client(&sessions).destroys(), 1);
    assert!(sessions.store().get(&sid).await.unwrap().is_none());
}

#[tokio::test]
async fn test_regenerate_new_session_destroys_nothing() {
    let sessions = coordinator();
    let mut req = BasicRequest::new("/");
    let mut snapshot = sessions.begin(&mut req).await.unwrap().unwrap();
    let before = snapshot.session_id().to_string();

    sessions.regenerate(&mut req, &mut snapshot).await.unwrap();

    assert_ne!(snapshot.session_id(), before);
    assert_eq!(client(&sessions).destroys(), 0);
}

#[tokio::test]
async fn test_regenerated_session_saved_under_new_id() {
    let sessions = coordinator();
    let sid = store_count(&sessions, 1).await;

    let mut req = BasicRequest::new("/").with_cookie(KEY, &sid);
    let mut snapshot = sessions.begin(&mut req).await.unwrap().unwrap();
    sessions.regenerate(&mut req, &mut snapshot).await.unwrap();
    snapshot.session_mut().unwrap().insert("user", "ada").unwrap();
    sessions.end(&mut req, &mut snapshot).await.unwrap();

    let new_sid = req.issued(KEY).flatten().unwrap();
    assert_eq!(new_sid, snapshot.session_id());
    let stored = sessions.store().get(new_sid).await.unwrap().unwrap();
    assert_eq!(stored.get::<String>("user").as_deref(), Some("ada"));
}

#[tokio::test]
async fn test_regenerate_with_constant_generator_still_changes_id() {
    let sessions = SessionCoordinator::builder()
        .gen_sid(|_len, _ctx| "fixed".to_string())
        .build(CountingStore::default());
    let mut req = BasicRequest::new("/");
    let mut snapshot = sessions.begin(&mut req).await.unwrap().unwrap();
    assert_eq!(snapshot.session_id(), "fixed");

    sessions.regenerate(&mut req, &mut snapshot).await.unwrap();

    assert_ne!(snapshot.session_id(), "fixed");
    assert_eq!(snapshot.session_id().len(), 32);
}

// =========================================================================
// Scope, hooks and forced ids
// =========================================================================

#[tokio::test]
async fn test_path_outside_cookie_scope_gets_no_session() {
    let cookie = CookieOptions {
        path: "/session".into(),
        ..CookieOptions::default()
    };
    let sessions = SessionCoordinator::builder()
        .cookie(cookie)
        .build(CountingStore::default());

    let mut outside = BasicRequest::new("/other");
    assert!(sessions.begin(&mut outside).await.unwrap().is_none());

    let mut inside = BasicRequest::new("/session/get");
    assert!(sessions.begin(&mut inside).await.unwrap().is_some());
}

#[tokio::test]
async fn test_forced_session_id_wins_over_cookie() {
    let sessions = coordinator();
    let first = store_count(&sessions, 1).await;
    let second = store_count(&sessions, 2).await;

    let mut req = BasicRequest::new("/").with_cookie(KEY, &first);
    req.force_session_id(second.clone());
    let snapshot = sessions.begin(&mut req).await.unwrap().unwrap();

    assert_eq!(snapshot.session_id(), second);
    assert_eq!(snapshot.session().unwrap().get::<u64>("count"), Some(2));
}

#[tokio::test]
async fn test_custom_generator_receives_request() {
    let sessions = SessionCoordinator::builder()
        .gen_sid(|len, ctx| format!("{}-{len}", ctx.query("tenant").unwrap_or("none")))
        .build(CountingStore::default());
    let mut req = BasicRequest::new("/?tenant=acme");

    let snapshot = sessions.begin(&mut req).await.unwrap().unwrap();

    assert_eq!(snapshot.session_id(), "acme-24");
}

#[tokio::test]
async fn test_before_save_runs_before_write() {
    let sessions = SessionCoordinator::builder()
        .before_save(|ctx, session| {
            session.insert("path", ctx.path()).unwrap();
        })
        .build(CountingStore::default());
    let mut req = BasicRequest::new("/save");
    let mut snapshot = sessions.begin(&mut req).await.unwrap().unwrap();
    snapshot.session_mut().unwrap().insert("count", 1).unwrap();

    sessions.end(&mut req, &mut snapshot).await.unwrap();

    let stored = sessions
        .store()
        .get(snapshot.session_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.get::<String>("path").as_deref(), Some("/save"));
}

#[tokio::test]
async fn test_frozen_session_skips_persistence() {
    let sessions = coordinator();
    let mut req = BasicRequest::new("/");
    let mut snapshot = sessions.begin(&mut req).await.unwrap().unwrap();
    snapshot.session_mut().unwrap().insert("count", 1).unwrap();
    snapshot.freeze();

    sessions.end(&mut req, &mut snapshot).await.unwrap();

    assert_eq!(client(&sessions).sets(), 0);
    assert_eq!(req.issued(KEY), None);
}

// =========================================================================
// Persistence failures
// =========================================================================

#[tokio::test]
async fn test_set_failure_reraised_by_default_handler() {
    let sessions = coordinator();
    client(&sessions).fail_writes.store(true, Ordering::SeqCst);
    let mut req = BasicRequest::new("/");
    let mut snapshot = sessions.begin(&mut req).await.unwrap().unwrap();
    snapshot.session_mut().unwrap().insert("count", 1).unwrap();

    let err = sessions.end(&mut req, &mut snapshot).await.unwrap_err();

    assert_eq!(err.operation(), Some(StoreOperation::Set));
    assert!(err.to_string().contains("write refused"));
    assert!(snapshot.is_new());
}

#[tokio::test]
async fn test_error_handler_can_swallow_failures() {
    let seen: Arc<std::sync::Mutex<Vec<StoreOperation>>> = Arc::default();
    let sessions = {
        let seen = Arc::clone(&seen);
        SessionCoordinator::builder()
            .error_handler(move |err, _ctx| {
                seen.lock().unwrap().extend(err.operation());
                Ok(())
            })
            .build(CountingStore::default())
    };
    let sid = store_count(&sessions, 1).await;
    client(&sessions).fail_writes.store(true, Ordering::SeqCst);

    let mut req = BasicRequest::new("/").with_cookie(KEY, &sid);
    let mut snapshot = sessions.begin(&mut req).await.unwrap().unwrap();
    snapshot.clear();
    sessions.end(&mut req, &mut snapshot).await.unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![StoreOperation::Destroy]);
}

// =========================================================================
// Store availability
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_begin_fails_after_reconnect_window_closes() {
    let sessions = SessionCoordinator::builder()
        .reconnect_timeout(Duration::from_secs(10))
        .build(CountingStore::default());
    client(&sessions).inner.disconnect();
    time::advance(Duration::from_secs(11)).await;
    assert_eq!(sessions.store().availability(), Availability::Unavailable);

    let mut req = BasicRequest::new("/");
    let err = sessions.begin(&mut req).await.unwrap_err();

    assert!(err.is_unavailable());
    assert!(matches!(err, SessionError::Store(StoreError::Unavailable)));
}

#[tokio::test(start_paused = true)]
async fn test_begin_waiting_on_pending_store_times_out() {
    let sessions = SessionCoordinator::builder()
        .reconnect_timeout(Duration::from_secs(10))
        .build(CountingStore::default());
    client(&sessions).inner.disconnect();
    let started = time::Instant::now();

    let mut req = BasicRequest::new("/");
    let err = sessions.begin(&mut req).await.unwrap_err();

    assert!(err.is_unavailable());
    assert!(started.elapsed() >= Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn test_begin_proceeds_when_store_reconnects_in_time() {
    let sessions = SessionCoordinator::builder()
        .reconnect_timeout(Duration::from_secs(10))
        .build(CountingStore::default());
    let store = client(&sessions);
    store.inner.disconnect();

    let mut req = BasicRequest::new("/");
    let (result, ()) = tokio::join!(sessions.begin(&mut req), async {
        time::sleep(Duration::from_secs(3)).await;
        store.inner.connect();
    });

    assert!(result.unwrap().is_some());
    assert_eq!(sessions.store().availability(), Availability::Available);
}

// =========================================================================
// Handles, TTL and expiry
// =========================================================================

#[tokio::test]
async fn test_scope_finalizes_after_handler() {
    let sessions = coordinator();
    let mut req = BasicRequest::new("/");

    let count = sessions
        .scope(&mut req, async |handle| {
            let session = handle.session_mut().unwrap();
            let count = session.get::<u64>("count").unwrap_or(0) + 1;
            session.insert("count", count).unwrap();
            count
        })
        .await
        .unwrap();

    assert_eq!(count, 1);
    assert_eq!(client(&sessions).sets(), 1);
    assert!(req.issued(KEY).flatten().is_some());
}

#[tokio::test]
async fn test_scope_persists_changes_when_handler_returns_err() {
    let sessions = coordinator();
    let mut req = BasicRequest::new("/");

    let result = sessions
        .scope(&mut req, async |handle| {
            handle.session_mut().unwrap().insert("count", 1).unwrap();
            Err::<(), &str>("handler failed")
        })
        .await
        .unwrap();

    assert_eq!(result, Err("handler failed"));
    assert_eq!(client(&sessions).sets(), 1);
    let sid = req.issued(KEY).flatten().expect("cookie issued").to_string();

    let mut next = BasicRequest::new("/").with_cookie(KEY, &sid);
    let snapshot = sessions.begin(&mut next).await.unwrap().unwrap();
    assert_eq!(snapshot.session().unwrap().get::<u64>("count"), Some(1));
}

#[tokio::test]
async fn test_handle_regenerate_and_refresh_ttl() {
    let sessions = coordinator();
    let sid = store_count(&sessions, 1).await;
    let mut req = BasicRequest::new("/").with_cookie(KEY, &sid);

    let mut handle = sessions.open(&mut req).await.unwrap();
    assert!(handle.is_active());
    handle.regenerate().await.unwrap();
    assert_ne!(handle.session_id(), Some(sid.as_str()));
    handle.session_mut().unwrap().insert("count", 5).unwrap();
    handle.finish().await.unwrap();
    let new_sid = handle.session_id().unwrap().to_string();
    handle
        .refresh_ttl(Some(Duration::from_secs(60)))
        .await
        .unwrap();

    let key = sessions.store().key(&new_sid);
    let remaining = client(&sessions).inner.remaining_ttl(&key).unwrap();
    assert!(remaining <= Duration::from_secs(60));
    assert!(remaining > Duration::from_secs(59));
}

#[tokio::test]
async fn test_inactive_handle_rejects_session_operations() {
    let cookie = CookieOptions {
        path: "/app".into(),
        ..CookieOptions::default()
    };
    let sessions = SessionCoordinator::builder()
        .cookie(cookie)
        .build(CountingStore::default());
    let mut req = BasicRequest::new("/static/logo.png");

    let mut handle = sessions.open(&mut req).await.unwrap();

    assert!(!handle.is_active());
    assert!(handle.session().is_none());
    assert!(matches!(handle.regenerate().await, Err(SessionError::Inactive)));
    handle.finish().await.unwrap();
}

#[tokio::test]
async fn test_expires_round_trips_as_absolute_time() {
    let sessions = coordinator();
    let expires = Utc::now() + TimeDelta::hours(2);
    let mut req = BasicRequest::new("/");
    let mut snapshot = sessions.begin(&mut req).await.unwrap().unwrap();
    let session = snapshot.session_mut().unwrap();
    session.cookie.expires = Some(expires);
    session.insert("count", 1).unwrap();
    sessions.end(&mut req, &mut snapshot).await.unwrap();

    let sid = req.issued(KEY).flatten().unwrap().to_string();
    let mut next = BasicRequest::new("/").with_cookie(KEY, &sid);
    let loaded = sessions.begin(&mut next).await.unwrap().unwrap();

    let restored = loaded.session().unwrap().cookie.expires.unwrap();
    assert!((restored - expires).num_milliseconds().abs() < 1);
}
