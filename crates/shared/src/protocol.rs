use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{FontScale, Preferences, QueueItem, QueuedAction};

/// Body of `GET {base}/userInfo`. Everything is optional: the server is
/// free to omit sections, and an absent field means "no update", not an
/// error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserInfoResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<RemoteSettings>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accessibility: Option<RemoteAccessibility>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteAccessibility {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high_contrast: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_scale: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_enabled: Option<bool>,
}

/// Body of `POST {base}/users/settings`: always the full settings object,
/// wrapped the way the persisted `userSettings` document is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsPayload {
    pub language: String,
    pub accessibility: AccessibilityPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessibilityPayload {
    pub high_contrast: bool,
    pub font_scale: FontScale,
    pub voice_enabled: bool,
}

impl From<&Preferences> for SettingsPayload {
    fn from(prefs: &Preferences) -> Self {
        Self {
            language: prefs.language.clone(),
            accessibility: AccessibilityPayload {
                high_contrast: prefs.high_contrast,
                font_scale: prefs.font_scale,
                voice_enabled: prefs.voice_enabled,
            },
        }
    }
}

impl SettingsPayload {
    pub fn into_preferences(self) -> Preferences {
        Preferences {
            language: self.language,
            high_contrast: self.accessibility.high_contrast,
            font_scale: self.accessibility.font_scale,
            voice_enabled: self.accessibility.voice_enabled,
        }
    }
}

/// Body of `POST {base}/scan/batch`. The batch is atomic from the client's
/// point of view: a 2xx response means every listed scan was accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanBatchRequest {
    pub scans: Vec<ScanRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    pub barcode: String,
    pub timestamp: DateTime<Utc>,
}

impl ScanBatchRequest {
    /// Collects the batch-eligible subset of a queue snapshot.
    pub fn from_queue(items: &[QueueItem]) -> Self {
        let scans = items
            .iter()
            .filter_map(|item| match &item.action {
                QueuedAction::Scan {
                    barcode: Some(barcode),
                } => Some(ScanRecord {
                    barcode: barcode.clone(),
                    timestamp: item.recorded_at,
                }),
                _ => None,
            })
            .collect();
        Self { scans }
    }
}
