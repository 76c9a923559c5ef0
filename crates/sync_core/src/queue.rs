use std::{collections::HashSet, sync::Arc};

use chrono::Utc;
use storage::Storage;
use tracing::{error, warn};

use shared::domain::{QueueItem, QueuedAction};

/// Ordered list of actions recorded while offline, oldest first. Grows via
/// `enqueue`, shrinks only via confirmed-synced removal; the persisted
/// queue mirrors the in-memory queue after every successful mutation.
pub struct OfflineQueue {
    storage: Arc<Storage>,
    items: Vec<QueueItem>,
    last_id: i64,
}

impl OfflineQueue {
    pub async fn load(storage: Arc<Storage>) -> Self {
        let items = match storage.load_queue().await {
            Ok(items) => items,
            Err(err) => {
                warn!("failed to load offline queue, starting empty: {err:#}");
                Vec::new()
            }
        };
        let last_id = items.iter().map(|item| item.id).max().unwrap_or(0);
        Self {
            storage,
            items,
            last_id,
        }
    }

    pub fn items(&self) -> &[QueueItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Appends a freshly stamped item and persists the full queue. Never
    /// touches the network.
    pub async fn enqueue(&mut self, action: QueuedAction) -> QueueItem {
        let item = QueueItem {
            id: self.next_id(),
            action,
            recorded_at: Utc::now(),
        };
        self.items.push(item.clone());
        self.persist().await;
        item
    }

    /// Removes exactly the given ids and re-persists. Used only after the
    /// remote authority has acknowledged the corresponding batch.
    pub async fn remove_confirmed(&mut self, ids: &HashSet<i64>) {
        self.items.retain(|item| !ids.contains(&item.id));
        self.persist().await;
    }

    /// Ids are creation timestamps in unix milliseconds, bumped past the
    /// previous id on collision so they stay strictly monotonic.
    fn next_id(&mut self) -> i64 {
        let now = Utc::now().timestamp_millis();
        self.last_id = now.max(self.last_id + 1);
        self.last_id
    }

    async fn persist(&self) {
        if let Err(err) = self.storage.save_queue(&self.items).await {
            error!("failed to persist offline queue, in-memory queue remains authoritative: {err:#}");
        }
    }
}
