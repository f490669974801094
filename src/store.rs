// Persisted local state
// A tiny namespaced key-value store: every value is JSON, every key lives
// under the same prefix. The file store keeps one `<prefix>_<key>.json` per key.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::warn;

use crate::error::StoreError;

pub const NAMESPACE: &str = "melopra";

// Keys used by the core
pub const KEY_MEMORY: &str = "memory_v2";
pub const KEY_BLACKLIST: &str = "blacklist_v1";
pub const KEY_LISTEN_COUNT: &str = "listen_count";
pub const KEY_INTERESTS: &str = "interests";
pub const KEY_DYNAMIC_GENRES: &str = "dynamic_genres";
pub const KEY_RECENT_PLAYED: &str = "recent_played";
pub const KEY_PLAYED_YT: &str = "played_yt";
pub const KEY_YT_RESULTS: &str = "yt_results";

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;
    fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

// Typed helpers shared by every consumer. A value that no longer parses is
// treated as absent so a corrupt entry never blocks playback.
pub fn load_or_default<T>(store: &dyn KeyValueStore, key: &str) -> T
where
    T: DeserializeOwned + Default,
{
    match store.get(key) {
        Ok(Some(value)) => serde_json::from_value(value).unwrap_or_else(|e| {
            warn!(key, error = %e, "failed to parse stored value, starting fresh");
            T::default()
        }),
        Ok(None) => T::default(),
        Err(e) => {
            warn!(key, error = %e, "failed to read stored value");
            T::default()
        }
    }
}

pub fn save<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) {
    let result = serde_json::to_value(value)
        .map_err(StoreError::from)
        .and_then(|v| store.set(key, v));
    if let Err(e) = result {
        warn!(key, error = %e, "failed to persist value");
    }
}

// ==========================================
// FILE STORE
// ==========================================
pub struct FileStore {
    dir: PathBuf,
    prefix: String,
}

impl FileStore {
    pub fn open(dir: PathBuf) -> Result<Self, StoreError> {
        fs::create_dir_all(&dir)?;
        Ok(FileStore {
            dir,
            prefix: NAMESPACE.to_string(),
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}_{}.json", self.prefix, key))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&data)?))
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(&value)?;
        // Write then rename so readers never see a half-written file
        let tmp = self.path_for(&format!("{}.tmp", key));
        fs::write(&tmp, json)?;
        fs::rename(&tmp, self.path_for(key))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

// ==========================================
// MEMORY STORE
// ==========================================
// Non-persistent store, used when the data dir is unavailable and in tests.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let values = self.values.lock().unwrap_or_else(|p| p.into_inner());
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let mut values = self.values.lock().unwrap_or_else(|p| p.into_inner());
        values.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut values = self.values.lock().unwrap_or_else(|p| p.into_inner());
        values.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn file_store_round_trips_under_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().to_path_buf()).unwrap();

        store.set(KEY_BLACKLIST, json!(["drake"])).unwrap();
        assert!(dir.path().join("melopra_blacklist_v1.json").exists());
        assert_eq!(store.get(KEY_BLACKLIST).unwrap(), Some(json!(["drake"])));

        store.remove(KEY_BLACKLIST).unwrap();
        assert_eq!(store.get(KEY_BLACKLIST).unwrap(), None);
    }

    #[test]
    fn corrupt_values_load_as_default() {
        let store = MemoryStore::new();
        store.set(KEY_LISTEN_COUNT, json!("not a map")).unwrap();
        let counts: HashMap<String, u64> = load_or_default(&store, KEY_LISTEN_COUNT);
        assert!(counts.is_empty());
    }
}
