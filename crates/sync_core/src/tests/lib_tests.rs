use super::*;

use std::{
    collections::VecDeque,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering},
};

use axum::{
    http::{HeaderMap, StatusCode as AxumStatus},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;
use tokio::{
    net::TcpListener,
    sync::{broadcast::error::TryRecvError, oneshot},
    time::{sleep, Duration},
};

use shared::{
    domain::{FontScale, LinkState, PreferencesUpdate},
    protocol::{RemoteAccessibility, RemoteSettings, ScanRecord, UserInfoResponse},
};

type ScriptedFetch = (Option<oneshot::Receiver<()>>, Result<UserInfoResponse, SyncError>);

/// Records every remote call; fetch responses can be scripted and gated so
/// a test controls the order in which in-flight pulls complete.
struct FakeRemote {
    fetches: Mutex<VecDeque<ScriptedFetch>>,
    fetch_calls: AtomicUsize,
    pushes: Mutex<Vec<SettingsPayload>>,
    fail_push: AtomicBool,
    batches: Mutex<Vec<ScanBatchRequest>>,
    fail_batch: AtomicBool,
}

impl FakeRemote {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            fetches: Mutex::new(VecDeque::new()),
            fetch_calls: AtomicUsize::new(0),
            pushes: Mutex::new(Vec::new()),
            fail_push: AtomicBool::new(false),
            batches: Mutex::new(Vec::new()),
            fail_batch: AtomicBool::new(false),
        })
    }

    async fn script_fetch(
        &self,
        gate: Option<oneshot::Receiver<()>>,
        response: Result<UserInfoResponse, SyncError>,
    ) {
        self.fetches.lock().await.push_back((gate, response));
    }

    async fn pushed(&self) -> Vec<SettingsPayload> {
        self.pushes.lock().await.clone()
    }

    async fn batched(&self) -> Vec<ScanBatchRequest> {
        self.batches.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl RemoteAuthority for FakeRemote {
    async fn fetch_user_info(&self, _token: &str) -> Result<UserInfoResponse, SyncError> {
        self.fetch_calls.fetch_add(1, AtomicOrdering::SeqCst);
        let scripted = self.fetches.lock().await.pop_front();
        match scripted {
            Some((gate, response)) => {
                if let Some(gate) = gate {
                    let _ = gate.await;
                }
                response
            }
            None => Ok(UserInfoResponse::default()),
        }
    }

    async fn push_settings(
        &self,
        _token: &str,
        payload: &SettingsPayload,
    ) -> Result<(), SyncError> {
        if self.fail_push.load(AtomicOrdering::SeqCst) {
            return Err(SyncError::RemoteUnavailable("push refused".to_string()));
        }
        self.pushes.lock().await.push(payload.clone());
        Ok(())
    }

    async fn submit_scan_batch(
        &self,
        _token: &str,
        batch: &ScanBatchRequest,
    ) -> Result<(), SyncError> {
        if self.fail_batch.load(AtomicOrdering::SeqCst) {
            return Err(SyncError::RemoteUnavailable("batch refused".to_string()));
        }
        self.batches.lock().await.push(batch.clone());
        Ok(())
    }
}

struct TestSource {
    tx: broadcast::Sender<LinkState>,
}

impl ConnectivitySource for TestSource {
    fn subscribe(&self) -> broadcast::Receiver<LinkState> {
        self.tx.subscribe()
    }
}

const ONLINE: LinkState = LinkState {
    is_connected: true,
    is_internet_reachable: Some(true),
};
const OFFLINE: LinkState = LinkState {
    is_connected: false,
    is_internet_reachable: None,
};

async fn setup() -> (Arc<SyncEngine>, Arc<FakeRemote>, Arc<Storage>) {
    let storage = Arc::new(Storage::new("sqlite::memory:").await.expect("storage"));
    let remote = FakeRemote::new();
    let engine = SyncEngine::new(Arc::clone(&storage), remote.clone()).await;
    (engine, remote, storage)
}

/// Brings connectivity up through a monitor so the engine's online flag is
/// set the way production wiring sets it.
async fn go_online(engine: &Arc<SyncEngine>) -> (Arc<NetworkMonitor>, broadcast::Sender<LinkState>) {
    let (tx, _) = broadcast::channel(16);
    let source = Arc::new(TestSource { tx: tx.clone() });
    let monitor = NetworkMonitor::new(ONLINE);
    monitor.observe(source).await;
    engine.attach_connectivity(Arc::clone(&monitor)).await;
    (monitor, tx)
}

fn remote_language(lang: &str) -> UserInfoResponse {
    UserInfoResponse {
        settings: Some(RemoteSettings {
            language: Some(lang.to_string()),
            accessibility: None,
        }),
    }
}

#[tokio::test]
async fn remote_merge_keeps_local_fields_the_server_omitted() {
    let (engine, remote, _storage) = setup().await;
    engine
        .update_preferences(PreferencesUpdate {
            high_contrast: Some(true),
            ..Default::default()
        })
        .await;

    engine.set_session_token("tok").await;
    remote.script_fetch(None, Ok(remote_language("fr"))).await;
    engine.pull_remote_settings().await;

    let prefs = engine.preferences().await;
    assert_eq!(prefs.language, "fr");
    assert!(prefs.high_contrast, "field absent remotely must survive");
}

#[tokio::test]
async fn remote_merge_is_never_pushed_back() {
    let (engine, remote, _storage) = setup().await;
    engine.set_session_token("tok").await;

    let mut rx = engine.subscribe_events();
    remote.script_fetch(None, Ok(remote_language("fr"))).await;
    engine.pull_remote_settings().await;

    assert!(remote.pushed().await.is_empty(), "merge must not echo");
    match rx.recv().await.expect("event") {
        EngineEvent::PreferencesChanged { origin, .. } => {
            assert_eq!(origin, ChangeOrigin::RemoteMerge);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn repeated_merge_of_identical_settings_is_silent() {
    let (engine, remote, _storage) = setup().await;
    engine.set_session_token("tok").await;

    remote.script_fetch(None, Ok(remote_language("fr"))).await;
    engine.pull_remote_settings().await;

    let mut rx = engine.subscribe_events();
    remote.script_fetch(None, Ok(remote_language("fr"))).await;
    engine.pull_remote_settings().await;

    assert_eq!(engine.preferences().await.language, "fr");
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn remote_accessibility_values_override_local_ones() {
    let (engine, remote, _storage) = setup().await;
    engine.set_session_token("tok").await;

    remote
        .script_fetch(
            None,
            Ok(UserInfoResponse {
                settings: Some(RemoteSettings {
                    language: None,
                    accessibility: Some(RemoteAccessibility {
                        high_contrast: Some(true),
                        font_scale: Some(1.4),
                        voice_enabled: None,
                    }),
                }),
            }),
        )
        .await;
    engine.pull_remote_settings().await;

    let prefs = engine.preferences().await;
    assert_eq!(prefs.language, "en");
    assert!(prefs.high_contrast);
    assert_eq!(prefs.font_scale, FontScale::ExtraLarge);
    assert!(!prefs.voice_enabled);
}

#[tokio::test]
async fn user_edit_persists_and_pushes_when_online() {
    let (engine, remote, storage) = setup().await;
    let _net = go_online(&engine).await;
    engine.set_session_token("tok").await;

    let prefs = engine.update_preferences(PreferencesUpdate::language("rw")).await;
    assert_eq!(prefs.language, "rw");

    let pushes = remote.pushed().await;
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].language, "rw");

    let stored = storage.load_settings().await.expect("load").expect("some");
    assert_eq!(stored.language, "rw");
}

#[tokio::test]
async fn user_edit_without_session_stays_local() {
    let (engine, remote, storage) = setup().await;
    let _net = go_online(&engine).await;

    engine.update_preferences(PreferencesUpdate::language("sw")).await;

    assert!(remote.pushed().await.is_empty());
    assert_eq!(remote.fetch_calls.load(AtomicOrdering::SeqCst), 0);
    let stored = storage.load_settings().await.expect("load").expect("some");
    assert_eq!(stored.language, "sw");
}

#[tokio::test]
async fn user_edit_while_offline_skips_the_push() {
    let (engine, remote, _storage) = setup().await;
    engine.set_session_token("tok").await;

    engine.update_preferences(PreferencesUpdate::language("fr")).await;

    assert!(remote.pushed().await.is_empty());
    assert_eq!(engine.preferences().await.language, "fr");
}

#[tokio::test]
async fn failed_push_keeps_the_local_edit() {
    let (engine, remote, storage) = setup().await;
    let _net = go_online(&engine).await;
    engine.set_session_token("tok").await;
    remote.fail_push.store(true, AtomicOrdering::SeqCst);

    let prefs = engine.update_preferences(PreferencesUpdate::language("fr")).await;

    assert_eq!(prefs.language, "fr");
    let stored = storage.load_settings().await.expect("load").expect("some");
    assert_eq!(stored.language, "fr");
}

#[tokio::test]
async fn flush_submits_eligible_scans_and_retains_the_rest() {
    let (engine, remote, storage) = setup().await;
    engine.set_session_token("tok").await;

    engine.record_scan(Some("123".to_string())).await;
    engine.record_scan(None).await;
    engine.record_classification("file:///photo.jpg").await;

    let report = engine.flush_offline_queue().await;
    assert_eq!(report.outcome, FlushOutcome::Submitted);
    assert_eq!(report.submitted, 1);
    assert_eq!(report.retained, 2);

    let batches = remote.batched().await;
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].scans.len(), 1);
    assert_eq!(batches[0].scans[0].barcode, "123");

    let remaining = engine.queued_items().await;
    assert_eq!(remaining.len(), 2);
    assert!(remaining.iter().all(|item| !item.is_batch_eligible()));

    let persisted = storage.load_queue().await.expect("load");
    assert_eq!(persisted, remaining);
}

#[tokio::test]
async fn failed_flush_leaves_the_queue_untouched() {
    let (engine, remote, storage) = setup().await;
    engine.set_session_token("tok").await;
    remote.fail_batch.store(true, AtomicOrdering::SeqCst);

    engine.record_scan(Some("123".to_string())).await;
    let before = engine.queued_items().await;

    let report = engine.flush_offline_queue().await;
    assert_eq!(report.outcome, FlushOutcome::Failed);
    assert_eq!(report.retained, 1);
    assert_eq!(engine.queued_items().await, before);
    assert_eq!(storage.load_queue().await.expect("load"), before);
}

#[tokio::test]
async fn flush_with_no_eligible_items_makes_no_remote_call() {
    let (engine, remote, _storage) = setup().await;
    engine.set_session_token("tok").await;
    engine.record_classification("file:///photo.jpg").await;

    let report = engine.flush_offline_queue().await;
    assert_eq!(report.outcome, FlushOutcome::NothingEligible);
    assert_eq!(report.retained, 1);
    assert!(remote.batched().await.is_empty());
}

#[tokio::test]
async fn flush_without_a_session_is_refused() {
    let (engine, remote, _storage) = setup().await;
    engine.record_scan(Some("123".to_string())).await;

    let report = engine.flush_offline_queue().await;
    assert_eq!(report.outcome, FlushOutcome::NoSession);
    assert!(remote.batched().await.is_empty());
    assert_eq!(engine.queued_items().await.len(), 1);
}

#[tokio::test]
async fn reconnect_edge_triggers_exactly_one_flush() {
    let (engine, remote, _storage) = setup().await;
    engine.set_session_token("tok").await;
    engine.record_scan(Some("111".to_string())).await;

    let (tx, _) = broadcast::channel(16);
    let source = Arc::new(TestSource { tx: tx.clone() });
    let monitor = NetworkMonitor::new(OFFLINE);
    monitor.observe(source).await;
    engine.attach_connectivity(Arc::clone(&monitor)).await;

    tx.send(ONLINE).expect("send");
    sleep(Duration::from_millis(50)).await;
    assert_eq!(remote.batched().await.len(), 1);

    // A repeated online report is not an edge.
    engine.record_scan(Some("222".to_string())).await;
    tx.send(ONLINE).expect("send");
    sleep(Duration::from_millis(50)).await;
    assert_eq!(remote.batched().await.len(), 1);

    // Dropping and regaining connectivity is.
    tx.send(OFFLINE).expect("send");
    sleep(Duration::from_millis(50)).await;
    tx.send(ONLINE).expect("send");
    sleep(Duration::from_millis(50)).await;
    assert_eq!(remote.batched().await.len(), 2);

    engine.shutdown().await;
    monitor.shutdown().await;
}

#[tokio::test]
async fn attaching_while_already_online_pulls_and_flushes() {
    let (engine, remote, _storage) = setup().await;
    engine.set_session_token("tok").await;
    engine.record_scan(Some("123".to_string())).await;
    remote.script_fetch(None, Ok(remote_language("fr"))).await;

    let _net = go_online(&engine).await;

    assert_eq!(remote.fetch_calls.load(AtomicOrdering::SeqCst), 1);
    assert_eq!(remote.batched().await.len(), 1);
    assert_eq!(engine.preferences().await.language, "fr");
    assert!(engine.queued_items().await.is_empty());
}

#[tokio::test]
async fn stale_pull_response_is_discarded() {
    let (engine, remote, _storage) = setup().await;
    engine.set_session_token("tok").await;

    let (release_first, gate) = oneshot::channel();
    remote.script_fetch(Some(gate), Ok(remote_language("de"))).await;
    remote.script_fetch(None, Ok(remote_language("fr"))).await;

    let slow = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.pull_remote_settings().await })
    };
    sleep(Duration::from_millis(50)).await;

    // A newer pull completes while the first is still in flight.
    engine.pull_remote_settings().await;
    assert_eq!(engine.preferences().await.language, "fr");

    release_first.send(()).expect("release");
    slow.await.expect("join");
    assert_eq!(engine.preferences().await.language, "fr");
}

#[tokio::test]
async fn queue_ids_are_strictly_monotonic() {
    let (engine, _remote, _storage) = setup().await;
    for _ in 0..5 {
        engine.record_scan(Some("123".to_string())).await;
    }
    let items = engine.queued_items().await;
    for pair in items.windows(2) {
        assert!(pair[0].id < pair[1].id);
    }
}

#[tokio::test]
async fn logout_clears_the_token_but_keeps_queue_and_preferences() {
    let (engine, _remote, storage) = setup().await;
    engine.set_session_token("tok").await;
    engine.update_preferences(PreferencesUpdate::language("fr")).await;
    engine.record_scan(Some("123".to_string())).await;

    engine.clear_session_token().await;

    assert!(engine.session_token().await.is_none());
    assert!(storage.load_token().await.expect("load").is_none());
    assert_eq!(engine.preferences().await.language, "fr");
    assert_eq!(engine.queued_items().await.len(), 1);
}

#[tokio::test]
async fn corrupt_settings_document_falls_back_to_defaults() {
    let storage = Arc::new(Storage::new("sqlite::memory:").await.expect("storage"));
    sqlx::query("INSERT INTO app_state (key, value) VALUES ('userSettings', '{not json')")
        .execute(storage.pool())
        .await
        .expect("write raw");

    let store = PreferenceStore::load(Arc::clone(&storage)).await;
    assert_eq!(*store.current(), Preferences::default());
}

#[tokio::test]
async fn restart_restores_token_preferences_and_queue() {
    let storage = Arc::new(Storage::new("sqlite::memory:").await.expect("storage"));
    let remote = FakeRemote::new();

    {
        let engine = SyncEngine::new(Arc::clone(&storage), remote.clone()).await;
        engine.set_session_token("tok").await;
        engine.update_preferences(PreferencesUpdate::language("sw")).await;
        engine.record_scan(Some("123".to_string())).await;
    }

    let engine = SyncEngine::new(Arc::clone(&storage), remote).await;
    assert_eq!(engine.session_token().await.as_deref(), Some("tok"));
    assert_eq!(engine.preferences().await.language, "sw");
    assert_eq!(engine.queued_items().await.len(), 1);
}

async fn serve_remote(router: Router) -> HttpRemoteAuthority {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });
    HttpRemoteAuthority::new(format!("http://{addr}"))
}

#[tokio::test]
async fn http_remote_fetches_user_info_with_bearer_auth() {
    let remote = serve_remote(Router::new().route(
        "/userInfo",
        get(|headers: HeaderMap| async move {
            let authorized = headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                == Some("Bearer tok");
            if authorized {
                Json(json!({ "settings": { "language": "fr" } })).into_response()
            } else {
                AxumStatus::UNAUTHORIZED.into_response()
            }
        }),
    ))
    .await;

    let info = remote.fetch_user_info("tok").await.expect("fetch");
    let settings = info.settings.expect("settings");
    assert_eq!(settings.language.as_deref(), Some("fr"));
}

#[tokio::test]
async fn http_remote_accepts_success_for_push_and_batch() {
    let remote = serve_remote(
        Router::new()
            .route(
                "/users/settings",
                post(|Json(body): Json<serde_json::Value>| async move {
                    assert!(body.get("language").is_some());
                    assert!(body["accessibility"].get("highContrast").is_some());
                    AxumStatus::NO_CONTENT
                }),
            )
            .route(
                "/scan/batch",
                post(|Json(body): Json<serde_json::Value>| async move {
                    assert_eq!(body["scans"][0]["barcode"], "123");
                    AxumStatus::OK
                }),
            ),
    )
    .await;

    let payload = SettingsPayload::from(&Preferences::default());
    remote.push_settings("tok", &payload).await.expect("push");

    let batch = ScanBatchRequest {
        scans: vec![ScanRecord {
            barcode: "123".into(),
            timestamp: Utc::now(),
        }],
    };
    remote.submit_scan_batch("tok", &batch).await.expect("batch");
}

#[tokio::test]
async fn http_remote_maps_auth_failures_to_auth_rejected() {
    let remote = serve_remote(
        Router::new()
            .route("/userInfo", get(|| async { AxumStatus::UNAUTHORIZED }))
            .route("/users/settings", post(|| async { AxumStatus::FORBIDDEN })),
    )
    .await;

    let err = remote.fetch_user_info("tok").await.expect_err("must fail");
    assert!(matches!(err, SyncError::AuthRejected));

    let payload = SettingsPayload::from(&Preferences::default());
    let err = remote
        .push_settings("tok", &payload)
        .await
        .expect_err("must fail");
    assert!(matches!(err, SyncError::AuthRejected));
}

#[tokio::test]
async fn http_remote_maps_server_errors_to_unavailable() {
    let remote = serve_remote(Router::new().route(
        "/scan/batch",
        post(|| async { AxumStatus::INTERNAL_SERVER_ERROR }),
    ))
    .await;

    let batch = ScanBatchRequest { scans: Vec::new() };
    let err = remote
        .submit_scan_batch("tok", &batch)
        .await
        .expect_err("must fail");
    assert!(matches!(err, SyncError::RemoteUnavailable(_)));
}

#[tokio::test]
async fn http_remote_flags_undecodable_user_info() {
    let remote = serve_remote(Router::new().route("/userInfo", get(|| async { "not json" }))).await;

    let err = remote.fetch_user_info("tok").await.expect_err("must fail");
    assert!(matches!(err, SyncError::MalformedRemoteData(_)));
}
