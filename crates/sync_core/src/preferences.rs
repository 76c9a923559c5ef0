use std::sync::Arc;

use storage::Storage;
use tracing::{error, warn};

use shared::{
    domain::{FontScale, Preferences, PreferencesUpdate},
    protocol::{RemoteSettings, SettingsPayload},
};

/// Sole owner of the user's settings record. All mutation goes through
/// `apply` or `merge_remote`; the full document is persisted after every
/// mutation and the in-memory value stays authoritative when persistence
/// fails.
pub struct PreferenceStore {
    storage: Arc<Storage>,
    current: Preferences,
}

impl PreferenceStore {
    /// Restores the last-persisted preferences; falls back to defaults if
    /// the document is absent or corrupt.
    pub async fn load(storage: Arc<Storage>) -> Self {
        let current = match storage.load_settings().await {
            Ok(Some(settings)) => settings.into_preferences(),
            Ok(None) => Preferences::default(),
            Err(err) => {
                warn!("failed to load stored settings, using defaults: {err:#}");
                Preferences::default()
            }
        };
        Self { storage, current }
    }

    pub fn current(&self) -> &Preferences {
        &self.current
    }

    /// Merges a partial update into the current preferences, persists the
    /// full resulting document, and returns the new value.
    pub async fn apply(&mut self, update: PreferencesUpdate) -> Preferences {
        if let Some(language) = update.language {
            self.current.language = language;
        }
        if let Some(high_contrast) = update.high_contrast {
            self.current.high_contrast = high_contrast;
        }
        if let Some(font_scale) = update.font_scale {
            self.current.font_scale = font_scale;
        }
        if let Some(voice_enabled) = update.voice_enabled {
            self.current.voice_enabled = voice_enabled;
        }
        self.persist().await;
        self.current.clone()
    }

    /// Non-null remote precedence: a field present in the remote payload
    /// overwrites the local value; an absent field keeps it. Idempotent.
    /// Persists only when something actually changed.
    pub async fn merge_remote(&mut self, remote: &RemoteSettings) -> (Preferences, bool) {
        let mut next = self.current.clone();

        if let Some(language) = &remote.language {
            next.language = language.clone();
        }
        if let Some(accessibility) = &remote.accessibility {
            if let Some(high_contrast) = accessibility.high_contrast {
                next.high_contrast = high_contrast;
            }
            if let Some(font_scale) = accessibility.font_scale {
                next.font_scale = FontScale::from_multiplier(font_scale);
            }
            if let Some(voice_enabled) = accessibility.voice_enabled {
                next.voice_enabled = voice_enabled;
            }
        }

        let changed = next != self.current;
        if changed {
            self.current = next;
            self.persist().await;
        }
        (self.current.clone(), changed)
    }

    async fn persist(&self) {
        let payload = SettingsPayload::from(&self.current);
        if let Err(err) = self.storage.save_settings(&payload).await {
            error!("failed to persist settings, in-memory value remains authoritative: {err:#}");
        }
    }
}
