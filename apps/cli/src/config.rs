use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub server_url: String,
    pub recommendation_api_key: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://./data/greeniq.db".into(),
            server_url: "https://api.green-iq.app".into(),
            recommendation_api_key: None,
        }
    }
}

/// Defaults, then `greeniq.toml`, then environment variables; later layers
/// win.
pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = std::fs::read_to_string("greeniq.toml") {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            if let Some(v) = file_cfg.get("database_url") {
                settings.database_url = v.clone();
            }
            if let Some(v) = file_cfg.get("server_url") {
                settings.server_url = v.clone();
            }
            if let Some(v) = file_cfg.get("recommendation_api_key") {
                settings.recommendation_api_key = Some(v.clone());
            }
        }
    }

    if let Ok(v) = std::env::var("DATABASE_URL") {
        settings.database_url = v;
    }
    if let Ok(v) = std::env::var("GREENIQ__DATABASE_URL") {
        settings.database_url = v;
    }

    if let Ok(v) = std::env::var("GREENIQ__SERVER_URL") {
        settings.server_url = v;
    }

    if let Ok(v) = std::env::var("OPENROUTER_API_KEY") {
        settings.recommendation_api_key = Some(v);
    }
    if let Ok(v) = std::env::var("GREENIQ__RECOMMENDATION_API_KEY") {
        settings.recommendation_api_key = Some(v);
    }

    settings
}
