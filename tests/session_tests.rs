use async_trait::async_trait;
use bonlivre::session::{
    Clock, FileCredentialStore, HttpSessionBackend, ManualClock, RefreshError, RenewalPolicy,
    SessionBackend, SessionConfig, SessionError, SessionManager, SessionState, SignOutReason,
};
use chrono::{DateTime, Utc};
use mockall::mock;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mock! {
    pub Backend {}

    #[async_trait]
    impl SessionBackend for Backend {
        async fn refresh(&self, token: &str) -> Result<String, RefreshError>;
        async fn verify(&self, token: &str) -> Result<(), RefreshError>;
    }
}

fn start() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

struct Harness {
    manager: Arc<SessionManager>,
    clock: Arc<ManualClock>,
    sign_outs: Arc<Mutex<Vec<SignOutReason>>>,
}

fn harness(backend: Arc<dyn SessionBackend>, config: SessionConfig) -> Harness {
    let clock = Arc::new(ManualClock::new(start()));
    let sign_outs = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&sign_outs);
    let manager = SessionManager::new(backend, config)
        .with_clock(clock.clone())
        .with_sign_out(Arc::new(move |reason: SignOutReason| log.lock().push(reason)));

    Harness {
        manager: Arc::new(manager),
        clock,
        sign_outs,
    }
}

/// Moves a freshly stored credential into the renewal window.
const INTO_WINDOW: Duration = Duration::from_secs(51 * 60);

#[tokio::test]
async fn test_valid_token_is_returned_without_renewal() {
    let mut backend = MockBackend::new();
    backend.expect_refresh().never();

    let h = harness(Arc::new(backend), SessionConfig::default());
    h.manager.store("t1").unwrap();

    assert_eq!(h.manager.ensure_fresh().await.unwrap(), "t1");
    assert_eq!(h.manager.check_status().unwrap(), SessionState::Valid);
}

#[tokio::test]
async fn test_renewal_replaces_token_and_resets_ttl() {
    let mut backend = MockBackend::new();
    backend
        .expect_refresh()
        .withf(|token| token == "t1")
        .times(1)
        .returning(|_| Ok("t2".to_string()));

    let h = harness(Arc::new(backend), SessionConfig::default());
    h.manager.store("t1").unwrap();
    h.clock.advance(INTO_WINDOW);
    assert_eq!(h.manager.check_status().unwrap(), SessionState::NearExpiry);

    assert_eq!(h.manager.ensure_fresh().await.unwrap(), "t2");
    assert_eq!(h.manager.check_status().unwrap(), SessionState::Valid);
    assert_eq!(h.manager.token().unwrap().as_deref(), Some("t2"));
    assert!(h.sign_outs.lock().is_empty());
}

#[test]
fn test_status_moves_from_near_expiry_to_expired() {
    let mut backend = MockBackend::new();
    backend.expect_refresh().never();
    backend.expect_verify().never();

    let ttl = Duration::from_secs(3300);
    let h = harness(Arc::new(backend), SessionConfig::default());
    h.manager.store_with_ttl("t1", ttl).unwrap();

    h.clock.advance(ttl - Duration::from_secs(200));
    assert_eq!(h.manager.check_status().unwrap(), SessionState::NearExpiry);
    assert_eq!(h.manager.token().unwrap().as_deref(), Some("t1"));

    h.clock.advance(Duration::from_secs(201));
    assert_eq!(h.manager.check_status().unwrap(), SessionState::Expired);
    assert_eq!(h.manager.token().unwrap(), None);
    assert_eq!(h.manager.check_status().unwrap(), SessionState::Absent);
}

#[tokio::test]
async fn test_rejected_renewal_signs_out() {
    let mut backend = MockBackend::new();
    backend
        .expect_refresh()
        .times(1)
        .returning(|_| Err(RefreshError::Rejected("401".to_string())));

    let h = harness(Arc::new(backend), SessionConfig::default());
    h.manager.store("t1").unwrap();
    h.clock.advance(INTO_WINDOW);

    let err = h.manager.ensure_fresh().await.unwrap_err();
    assert!(matches!(err, SessionError::RenewalFailed(_)));
    assert_eq!(h.manager.check_status().unwrap(), SessionState::Absent);
    assert_eq!(*h.sign_outs.lock(), vec![SignOutReason::RenewalFailed]);
}

#[tokio::test]
async fn test_transient_failure_is_fatal_by_default() {
    let mut backend = MockBackend::new();
    backend
        .expect_refresh()
        .times(1)
        .returning(|_| Err(RefreshError::Transient("503".to_string())));

    let h = harness(Arc::new(backend), SessionConfig::default());
    h.manager.store("t1").unwrap();
    h.clock.advance(INTO_WINDOW);

    assert!(h.manager.ensure_fresh().await.is_err());
    assert_eq!(*h.sign_outs.lock(), vec![SignOutReason::RenewalFailed]);
}

#[tokio::test]
async fn test_transient_failure_retried_when_enabled() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let mut backend = MockBackend::new();
    backend.expect_refresh().times(2).returning(move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(RefreshError::Transient("timeout".to_string()))
        } else {
            Ok("t2".to_string())
        }
    });

    let config = SessionConfig {
        renewal: RenewalPolicy {
            max_attempts: 3,
            retry_transient: true,
            backoff: Duration::from_millis(1),
            ..RenewalPolicy::default()
        },
        ..SessionConfig::default()
    };
    let h = harness(Arc::new(backend), config);
    h.manager.store("t1").unwrap();
    h.clock.advance(INTO_WINDOW);

    assert_eq!(h.manager.ensure_fresh().await.unwrap(), "t2");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_expired_credential_is_never_renewed() {
    let mut backend = MockBackend::new();
    backend.expect_refresh().never();

    let h = harness(Arc::new(backend), SessionConfig::default());
    h.manager.store("t1").unwrap();
    h.clock.advance(Duration::from_secs(56 * 60));

    assert_eq!(h.manager.ensure_fresh().await.unwrap_err(), SessionError::Expired);
    assert_eq!(*h.sign_outs.lock(), vec![SignOutReason::Expired]);
    assert_eq!(h.manager.token().unwrap(), None);
}

#[tokio::test]
async fn test_check_in_verifies_then_renews() {
    let mut backend = MockBackend::new();
    backend.expect_verify().times(1).returning(|_| Ok(()));
    backend
        .expect_refresh()
        .times(1)
        .returning(|_| Ok("t2".to_string()));

    let h = harness(Arc::new(backend), SessionConfig::default());
    h.manager.store("t1").unwrap();
    h.clock.advance(INTO_WINDOW);

    assert_eq!(h.manager.check_in().await.unwrap(), SessionState::Valid);
    assert_eq!(h.manager.token().unwrap().as_deref(), Some("t2"));
}

#[tokio::test]
async fn test_check_in_signs_out_on_revoked_token() {
    let mut backend = MockBackend::new();
    backend
        .expect_verify()
        .returning(|_| Err(RefreshError::Rejected("revoked".to_string())));
    backend.expect_refresh().never();

    let h = harness(Arc::new(backend), SessionConfig::default());
    h.manager.store("t1").unwrap();

    let err = h.manager.check_in().await.unwrap_err();
    assert!(matches!(err, SessionError::VerificationFailed(_)));
    assert_eq!(*h.sign_outs.lock(), vec![SignOutReason::VerificationFailed]);
    assert_eq!(h.manager.check_status().unwrap(), SessionState::Absent);
}

#[tokio::test]
async fn test_check_in_tolerates_unreachable_server() {
    let mut backend = MockBackend::new();
    backend
        .expect_verify()
        .returning(|_| Err(RefreshError::Transient("connection refused".to_string())));

    let h = harness(Arc::new(backend), SessionConfig::default());
    h.manager.store("t1").unwrap();

    assert_eq!(h.manager.check_in().await.unwrap(), SessionState::Valid);
    assert!(h.sign_outs.lock().is_empty());
}

/// Backend whose refresh takes a while, so concurrent callers overlap.
struct SlowBackend {
    refresh_calls: AtomicUsize,
}

#[async_trait]
impl SessionBackend for SlowBackend {
    async fn refresh(&self, _token: &str) -> Result<String, RefreshError> {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(format!("renewed-{}", n))
    }

    async fn verify(&self, _token: &str) -> Result<(), RefreshError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_concurrent_callers_share_one_renewal() {
    let backend = Arc::new(SlowBackend {
        refresh_calls: AtomicUsize::new(0),
    });
    let h = harness(backend.clone(), SessionConfig::default());
    h.manager.store("t1").unwrap();
    h.clock.advance(INTO_WINDOW);

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let manager = Arc::clone(&h.manager);
            tokio::spawn(async move { manager.ensure_fresh().await })
        })
        .collect();

    for result in futures::future::join_all(tasks).await {
        assert_eq!(result.unwrap().unwrap(), "renewed-1");
    }
    assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_file_store_survives_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    let file = dir.path().join("session.json");

    let clock = Arc::new(ManualClock::new(start()));
    let first = SessionManager::new(Arc::new(MockBackend::new()), SessionConfig::default())
        .with_store(Arc::new(FileCredentialStore::new(&file)))
        .with_clock(clock.clone());
    let credential = first.store("persisted").unwrap();
    assert_eq!(credential.expires_at, clock.now() + chrono::Duration::minutes(55));

    let second = SessionManager::new(Arc::new(MockBackend::new()), SessionConfig::default())
        .with_store(Arc::new(FileCredentialStore::new(&file)))
        .with_clock(clock);
    assert_eq!(second.token().unwrap().as_deref(), Some("persisted"));

    second.clear().unwrap();
    assert_eq!(first.token().unwrap(), None);
}

// ============= HTTP Backend Tests =============

#[tokio::test]
async fn test_http_backend_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/refresh-token"))
        .and(header("authorization", "Bearer old"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "token": "new", "expires_in": 3600 })),
        )
        .mount(&server)
        .await;

    let backend = HttpSessionBackend::new(server.uri());
    assert_eq!(backend.refresh("old").await.unwrap(), "new");
}

#[tokio::test]
async fn test_http_backend_classifies_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/refresh-token"))
        .and(header("authorization", "Bearer revoked"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({ "error": "revoked" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/refresh-token"))
        .and(header("authorization", "Bearer busy"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/refresh-token"))
        .and(header("authorization", "Bearer garbled"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let backend = HttpSessionBackend::new(server.uri());
    assert!(matches!(backend.refresh("revoked").await, Err(RefreshError::Rejected(_))));
    assert!(matches!(backend.refresh("busy").await, Err(RefreshError::Transient(_))));
    assert!(matches!(
        backend.refresh("garbled").await,
        Err(RefreshError::InvalidResponse(_))
    ));
}

#[tokio::test]
async fn test_http_backend_verify_and_login() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/verify-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "user": { "id": "u1", "email": "leser@bonlivre.ch", "is_verified": true }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/login"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "token": "fresh", "expires_in": 3600 })),
        )
        .mount(&server)
        .await;

    let backend = HttpSessionBackend::new(format!("{}/", server.uri()));
    assert!(backend.verify("t").await.is_ok());

    let login = backend.login("leser@bonlivre.ch", "geheim123").await.unwrap();
    assert_eq!(login.token, "fresh");
}

#[tokio::test]
async fn test_http_backend_unreachable_is_transient() {
    let backend = HttpSessionBackend::new("http://127.0.0.1:9");
    assert!(matches!(backend.verify("t").await, Err(RefreshError::Transient(_))));
}
