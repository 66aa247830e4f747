use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::database::Database;
use super::selection::SwipeConfig;
use crate::config::{DEFAULT_API_BASE_URL, DEFAULT_UNDO_WINDOW_SECS};

const SETTINGS_KEY: &str = "client_settings";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSettings {
    pub api_base_url: String,
    pub undo_window_secs: u64,
    #[serde(default)]
    pub swipe: SwipeConfig,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            undo_window_secs: DEFAULT_UNDO_WINDOW_SECS,
            swipe: SwipeConfig::default(),
        }
    }
}

impl ClientSettings {
    pub fn undo_window(&self) -> Duration {
        Duration::from_secs(self.undo_window_secs)
    }
}

pub struct SettingsService;

impl SettingsService {
    pub async fn load(db: &Database) -> ClientSettings {
        match db.get_setting(SETTINGS_KEY).await {
            Ok(Some(json)) => serde_json::from_str(&json).unwrap_or_else(|e| {
                tracing::warn!("Ignoring unreadable settings: {}", e);
                ClientSettings::default()
            }),
            Ok(None) => ClientSettings::default(),
            Err(e) => {
                tracing::warn!("Failed to load settings: {}", e);
                ClientSettings::default()
            }
        }
    }

    pub async fn save(db: &Database, settings: &ClientSettings) -> Result<()> {
        let json = serde_json::to_string(settings)?;
        db.set_setting(SETTINGS_KEY, &json).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::selection::SwipeAction;

    #[tokio::test]
    async fn test_defaults_when_absent_or_corrupt() {
        let db = Database::new_in_memory().unwrap();
        assert_eq!(SettingsService::load(&db).await, ClientSettings::default());

        db.set_setting(SETTINGS_KEY, "{not json").await.unwrap();
        assert_eq!(SettingsService::load(&db).await, ClientSettings::default());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let db = Database::new_in_memory().unwrap();
        let settings = ClientSettings {
            api_base_url: "https://chat.example.com/api".to_string(),
            undo_window_secs: 8,
            swipe: SwipeConfig {
                left: SwipeAction::Archive,
                right: SwipeAction::None,
            },
        };
        SettingsService::save(&db, &settings).await.unwrap();
        assert_eq!(SettingsService::load(&db).await, settings);
        assert_eq!(settings.undo_window(), Duration::from_secs(8));
    }
}
