use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::info;

use shared::domain::LinkState;

/// Platform seam: a source of raw connectivity reports. Implementations
/// wrap whatever the platform offers (a system event stream, a poller, a
/// test harness channel).
pub trait ConnectivitySource: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<LinkState>;
}

/// Single writer of the process-wide connectivity flag. Holds the watcher
/// task for the lifetime of the session; `shutdown` releases it so no
/// callback outlives the session.
pub struct NetworkMonitor {
    online: AtomicBool,
    events: broadcast::Sender<bool>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl NetworkMonitor {
    pub fn new(initial: LinkState) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            online: AtomicBool::new(initial.is_online()),
            events,
            watcher: Mutex::new(None),
        })
    }

    /// Current connectivity: link up and internet not reported unreachable.
    pub fn current(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Delivers the derived boolean for every report the platform makes,
    /// including repeats; edge detection is the subscriber's concern.
    pub fn subscribe(&self) -> broadcast::Receiver<bool> {
        self.events.subscribe()
    }

    /// Starts following a connectivity source. Replaces any previous
    /// watcher.
    pub async fn observe(self: &Arc<Self>, source: Arc<dyn ConnectivitySource>) {
        let monitor = Arc::clone(self);
        let mut rx = source.subscribe();
        let task = tokio::spawn(async move {
            while let Ok(state) = rx.recv().await {
                let online = state.is_online();
                let previous = monitor.online.swap(online, Ordering::SeqCst);
                if previous != online {
                    info!(online, "connectivity changed");
                }
                let _ = monitor.events.send(online);
            }
        });

        if let Some(previous) = self.watcher.lock().await.replace(task) {
            previous.abort();
        }
    }

    pub async fn shutdown(&self) {
        if let Some(task) = self.watcher.lock().await.take() {
            task.abort();
        }
    }
}
