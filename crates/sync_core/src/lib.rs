use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{error, info, warn};

use shared::{
    domain::{ChangeOrigin, Preferences, PreferencesUpdate, QueueItem, QueuedAction},
    error::SyncError,
    protocol::{ScanBatchRequest, SettingsPayload},
};
use storage::Storage;

pub mod network;
pub mod preferences;
pub mod queue;
pub mod remote;

pub use network::{ConnectivitySource, NetworkMonitor};
pub use preferences::PreferenceStore;
pub use queue::OfflineQueue;
pub use remote::{HttpRemoteAuthority, MissingRemoteAuthority, RemoteAuthority};

/// Outcome of one flush attempt. Flush never raises; this report is the
/// only thing a caller sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Eligible items were accepted and removed from the queue.
    Submitted,
    /// Nothing in the queue qualifies for the batch endpoint.
    NothingEligible,
    /// No session token; the batch cannot be authenticated.
    NoSession,
    /// The batch was rejected or unreachable; the queue is untouched.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub outcome: FlushOutcome,
    pub submitted: usize,
    pub retained: usize,
}

#[derive(Debug, Clone)]
pub enum EngineEvent {
    PreferencesChanged {
        preferences: Preferences,
        origin: ChangeOrigin,
    },
    ConnectivityChanged(bool),
    QueueFlushed(FlushReport),
    Error(String),
}

struct EngineState {
    preferences: PreferenceStore,
    queue: OfflineQueue,
    token: Option<String>,
    online: bool,
}

/// Orchestrates reconciliation between local state and the remote
/// authority: pulls remote settings when session and connectivity line up,
/// pushes locally originated settings changes, and flushes the offline
/// queue on reconnect.
pub struct SyncEngine {
    storage: Arc<Storage>,
    remote: Arc<dyn RemoteAuthority>,
    inner: Mutex<EngineState>,
    events: broadcast::Sender<EngineEvent>,
    watcher: Mutex<Option<JoinHandle<()>>>,
    // Latest issued pull sequence number; responses carrying an older
    // number are stale and discarded.
    pull_seq: AtomicU64,
}

impl SyncEngine {
    /// Restores preferences, queue, and session token from storage and
    /// starts offline; connectivity arrives via `attach_connectivity`.
    pub async fn new(storage: Arc<Storage>, remote: Arc<dyn RemoteAuthority>) -> Arc<Self> {
        let preferences = PreferenceStore::load(Arc::clone(&storage)).await;
        let queue = OfflineQueue::load(Arc::clone(&storage)).await;
        let token = match storage.load_token().await {
            Ok(token) => token,
            Err(err) => {
                warn!("failed to restore session token: {err:#}");
                None
            }
        };

        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            storage,
            remote,
            inner: Mutex::new(EngineState {
                preferences,
                queue,
                token,
                online: false,
            }),
            events,
            watcher: Mutex::new(None),
            pull_seq: AtomicU64::new(0),
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub async fn preferences(&self) -> Preferences {
        self.inner.lock().await.preferences.current().clone()
    }

    pub async fn queued_items(&self) -> Vec<QueueItem> {
        self.inner.lock().await.queue.items().to_vec()
    }

    pub async fn session_token(&self) -> Option<String> {
        self.inner.lock().await.token.clone()
    }

    pub async fn is_online(&self) -> bool {
        self.inner.lock().await.online
    }

    /// Called by the login collaborator after successful authentication.
    /// Persists the token and, if connectivity is already up, pulls remote
    /// settings immediately.
    pub async fn set_session_token(self: &Arc<Self>, token: impl Into<String>) {
        let token = token.into();
        let online = {
            let mut guard = self.inner.lock().await;
            guard.token = Some(token.clone());
            guard.online
        };
        if let Err(err) = self.storage.save_token(&token).await {
            error!("failed to persist session token: {err:#}");
        }
        info!(online, "session established");

        if online {
            self.pull_remote_settings().await;
        }
    }

    /// Logout: removes the stored token and disables remote operations.
    /// Cached preferences and the offline queue are deliberately retained;
    /// queued actions must survive a logout/login cycle.
    pub async fn clear_session_token(&self) {
        self.inner.lock().await.token = None;
        if let Err(err) = self.storage.clear_token().await {
            error!("failed to clear stored session token: {err:#}");
        }
        info!("session cleared");
    }

    /// Starts reacting to connectivity. Seeds the flag from the monitor's
    /// current value (triggering an initial pull/flush when already online,
    /// matching launch-with-network behavior), then follows its event
    /// stream. `shutdown` releases the subscription.
    pub async fn attach_connectivity(self: &Arc<Self>, monitor: Arc<NetworkMonitor>) {
        let initially_online = monitor.current();
        let (has_token, queue_empty) = {
            let mut guard = self.inner.lock().await;
            guard.online = initially_online;
            (guard.token.is_some(), guard.queue.is_empty())
        };

        let engine = Arc::clone(self);
        let mut rx = monitor.subscribe();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(online) => engine.on_connectivity_report(online).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "connectivity watcher lagged, resyncing");
                        let online = monitor.current();
                        engine.on_connectivity_report(online).await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        if let Some(previous) = self.watcher.lock().await.replace(task) {
            previous.abort();
        }

        if initially_online {
            if has_token {
                self.pull_remote_settings().await;
            }
            if !queue_empty {
                let _ = self.flush_offline_queue().await;
            }
        }
    }

    pub async fn shutdown(&self) {
        if let Some(task) = self.watcher.lock().await.take() {
            task.abort();
        }
    }

    async fn on_connectivity_report(self: &Arc<Self>, online: bool) {
        let (became_online, has_token, queue_empty) = {
            let mut guard = self.inner.lock().await;
            let previous = guard.online;
            guard.online = online;
            (!previous && online, guard.token.is_some(), guard.queue.is_empty())
        };

        if !became_online {
            // Repeated online or offline reports are not edges; a drop to
            // offline needs no reconciliation of its own.
            return;
        }

        let _ = self.events.send(EngineEvent::ConnectivityChanged(online));

        if has_token {
            self.pull_remote_settings().await;
        }
        if !queue_empty {
            let _ = self.flush_offline_queue().await;
        }
    }

    /// Locally originated settings change: persist first, always; push the
    /// full settings document only when a session exists and connectivity
    /// is up. Push failure is logged and dropped; settings are idempotent
    /// current-state writes, unlike queued actions.
    pub async fn update_preferences(&self, update: PreferencesUpdate) -> Preferences {
        let (preferences, token, online) = {
            let mut guard = self.inner.lock().await;
            let preferences = guard.preferences.apply(update).await;
            (preferences, guard.token.clone(), guard.online)
        };

        let _ = self.events.send(EngineEvent::PreferencesChanged {
            preferences: preferences.clone(),
            origin: ChangeOrigin::UserEdit,
        });

        match (token, online) {
            (Some(token), true) => {
                let payload = SettingsPayload::from(&preferences);
                if let Err(err) = self.remote.push_settings(&token, &payload).await {
                    warn!("settings push failed, will resend on next change: {err}");
                    let _ = self
                        .events
                        .send(EngineEvent::Error(format!("settings push failed: {err}")));
                }
            }
            _ => {
                info!("settings persisted locally; remote push skipped (offline or no session)");
            }
        }

        preferences
    }

    /// Pulls remote settings and merges them with non-null remote
    /// precedence. The merged mutation is tagged as a remote merge and
    /// never pushed back. Responses that lose the race to a newer pull are
    /// discarded.
    pub async fn pull_remote_settings(&self) {
        let Some(token) = self.session_token().await else {
            return;
        };

        let seq = self.pull_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let response = match self.remote.fetch_user_info(&token).await {
            Ok(response) => response,
            Err(SyncError::AuthRejected) => {
                warn!("remote settings pull rejected as unauthorized");
                return;
            }
            Err(err) => {
                warn!("remote settings pull failed, local state untouched: {err}");
                return;
            }
        };

        let Some(settings) = response.settings else {
            return;
        };

        let merged = {
            let mut guard = self.inner.lock().await;
            if self.pull_seq.load(Ordering::SeqCst) != seq {
                info!(seq, "discarding stale settings pull response");
                return;
            }
            let (preferences, changed) = guard.preferences.merge_remote(&settings).await;
            changed.then_some(preferences)
        };

        if let Some(preferences) = merged {
            info!("remote settings merged into local preferences");
            let _ = self.events.send(EngineEvent::PreferencesChanged {
                preferences,
                origin: ChangeOrigin::RemoteMerge,
            });
        }
    }

    /// Records a product scan for later submission. Returns immediately;
    /// nothing on this path touches the network.
    pub async fn record_scan(&self, barcode: Option<String>) -> QueueItem {
        self.enqueue(QueuedAction::Scan { barcode }).await
    }

    /// Records an offline classification photo. These never become batch
    /// eligible; they stay queued until a disposal policy exists.
    pub async fn record_classification(&self, photo_uri: impl Into<String>) -> QueueItem {
        self.enqueue(QueuedAction::Classification {
            photo_uri: photo_uri.into(),
        })
        .await
    }

    async fn enqueue(&self, action: QueuedAction) -> QueueItem {
        let mut guard = self.inner.lock().await;
        let item = guard.queue.enqueue(action).await;
        info!(id = item.id, total = guard.queue.len(), "action queued");
        item
    }

    /// Submits the batch-eligible subset of the queue. All failures are
    /// terminal for this attempt and leave the queue untouched; the next
    /// connectivity edge retries. Delivery is at-least-once: the server
    /// must treat the batch idempotently.
    pub async fn flush_offline_queue(&self) -> FlushReport {
        let (token, batch, eligible_ids, total) = {
            let guard = self.inner.lock().await;
            let items = guard.queue.items();
            let eligible_ids: HashSet<i64> = items
                .iter()
                .filter(|item| item.is_batch_eligible())
                .map(|item| item.id)
                .collect();
            (
                guard.token.clone(),
                ScanBatchRequest::from_queue(items),
                eligible_ids,
                items.len(),
            )
        };

        let Some(token) = token else {
            return FlushReport {
                outcome: FlushOutcome::NoSession,
                submitted: 0,
                retained: total,
            };
        };

        if eligible_ids.is_empty() {
            return FlushReport {
                outcome: FlushOutcome::NothingEligible,
                submitted: 0,
                retained: total,
            };
        }

        info!(count = eligible_ids.len(), "submitting offline scan batch");
        if let Err(err) = self.remote.submit_scan_batch(&token, &batch).await {
            warn!("offline scan batch failed, queue retained for next flush: {err}");
            let _ = self
                .events
                .send(EngineEvent::Error(format!("scan batch failed: {err}")));
            return FlushReport {
                outcome: FlushOutcome::Failed,
                submitted: 0,
                retained: total,
            };
        }

        let report = {
            let mut guard = self.inner.lock().await;
            guard.queue.remove_confirmed(&eligible_ids).await;
            FlushReport {
                outcome: FlushOutcome::Submitted,
                submitted: eligible_ids.len(),
                retained: guard.queue.len(),
            }
        };
        info!(
            submitted = report.submitted,
            retained = report.retained,
            "offline scan batch accepted"
        );
        let _ = self.events.send(EngineEvent::QueueFlushed(report));
        report
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
