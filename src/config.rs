// Runtime configuration
// Loaded from <config_dir>/discovery-player/config.json, then overridden by
// environment variables. A missing file just means defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const APP_DIR: &str = "discovery-player";

const DEFAULT_AUDIUS_API: &str = "https://api.audius.co/v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub youtube_api_key: Option<String>,
    pub audius_api: String,
    pub firestore_project: Option<String>,
    pub firestore_token: Option<String>,
    /// Signed-in user id; `None` means browsing anonymously.
    pub user_id: Option<String>,
    pub assistant_url: Option<String>,
    pub like_url: Option<String>,
    pub catalog_path: Option<PathBuf>,
    pub data_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub decay_days: u32,
    pub trending_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(APP_DIR);
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(APP_DIR);

        Config {
            youtube_api_key: None,
            audius_api: DEFAULT_AUDIUS_API.to_string(),
            firestore_project: None,
            firestore_token: None,
            user_id: None,
            assistant_url: None,
            like_url: None,
            catalog_path: None,
            data_dir,
            cache_dir,
            decay_days: 7,
            trending_limit: 12,
        }
    }
}

impl Config {
    pub fn config_file() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_DIR).join("config.json"))
    }

    // Defaults <- config file <- environment
    pub fn load() -> Self {
        let mut config = match Self::config_file() {
            Some(path) => Self::from_file(&path),
            None => Config::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    pub fn from_file(path: &Path) -> Self {
        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "no config file, using defaults");
                return Config::default();
            }
        };

        serde_json::from_str(&data).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "invalid config file, using defaults");
            Config::default()
        })
    }

    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("YOUTUBE_API_KEY") {
            self.youtube_api_key = Some(v);
        }
        if let Some(v) = lookup("AUDIUS_API") {
            self.audius_api = v;
        }
        if let Some(v) = lookup("FIRESTORE_PROJECT") {
            self.firestore_project = Some(v);
        }
        if let Some(v) = lookup("FIRESTORE_TOKEN") {
            self.firestore_token = Some(v);
        }
        if let Some(v) = lookup("DISCOVERY_USER") {
            self.user_id = Some(v);
        }
        if let Some(v) = lookup("MELO_API") {
            self.assistant_url = Some(v);
        }
        if let Some(v) = lookup("MELO_LIKE_API") {
            self.like_url = Some(v);
        }
    }
}
