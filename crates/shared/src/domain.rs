use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Discrete font scaling steps supported by the UI. Serialized as the
/// numeric multiplier the remote authority and the persisted settings
/// document use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FontScale {
    #[default]
    Normal,
    Large,
    ExtraLarge,
}

impl FontScale {
    pub fn as_f64(self) -> f64 {
        match self {
            FontScale::Normal => 1.0,
            FontScale::Large => 1.2,
            FontScale::ExtraLarge => 1.4,
        }
    }

    /// Maps an arbitrary multiplier onto the nearest legal step. Tolerates
    /// legacy or slightly off remote values instead of rejecting the whole
    /// settings document.
    pub fn from_multiplier(value: f64) -> Self {
        if value >= 1.3 {
            FontScale::ExtraLarge
        } else if value >= 1.1 {
            FontScale::Large
        } else {
            FontScale::Normal
        }
    }
}

impl Serialize for FontScale {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_f64())
    }
}

impl<'de> Deserialize<'de> for FontScale {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = f64::deserialize(deserializer)?;
        Ok(FontScale::from_multiplier(value))
    }
}

/// The user's settings record, synchronized between device and remote
/// authority. Singleton per session identity; mutated only through the
/// preference store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    pub language: String,
    pub high_contrast: bool,
    pub font_scale: FontScale,
    pub voice_enabled: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            high_contrast: false,
            font_scale: FontScale::Normal,
            voice_enabled: false,
        }
    }
}

/// Partial preferences mutation; unset fields keep their current value.
#[derive(Debug, Clone, Default)]
pub struct PreferencesUpdate {
    pub language: Option<String>,
    pub high_contrast: Option<bool>,
    pub font_scale: Option<FontScale>,
    pub voice_enabled: Option<bool>,
}

impl PreferencesUpdate {
    pub fn language(lang: impl Into<String>) -> Self {
        Self {
            language: Some(lang.into()),
            ..Self::default()
        }
    }
}

/// Who initiated a preferences mutation. A merge of remotely fetched
/// settings must never push the merged value back out again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    UserEdit,
    RemoteMerge,
}

/// A locally recorded action awaiting remote confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: i64,
    #[serde(flatten)]
    pub action: QueuedAction,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueuedAction {
    /// Product scan. Only scans carrying a barcode have a remote batch
    /// path; barcode-less entries are held back in the queue.
    Scan { barcode: Option<String> },
    /// Waste-classification photo captured offline. No batch endpoint
    /// accepts these, so they are never flush-eligible.
    Classification { photo_uri: String },
}

impl QueueItem {
    /// Eligible for batch submission: a scan with a correlating barcode.
    pub fn is_batch_eligible(&self) -> bool {
        matches!(&self.action, QueuedAction::Scan { barcode: Some(_) })
    }
}

/// Raw connectivity signal as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkState {
    pub is_connected: bool,
    pub is_internet_reachable: Option<bool>,
}

impl LinkState {
    /// A link that is up but known to be unreachable counts as offline.
    pub fn is_online(self) -> bool {
        self.is_connected && self.is_internet_reachable != Some(false)
    }
}
