// ==========================================
// LISTENING MEMORY
// ==========================================
// Per-artist interest scores learned from plays:
// - every play bumps the artist's score and stamps the time
// - scores of artists not heard for a while decay by one
// - downvotes cost two points, blacklisted artists never rank
//
// Records are keyed by lower-cased artist name and kept in a BTreeMap, so
// artists with equal scores rank alphabetically.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use crate::store::{self, KeyValueStore, KEY_BLACKLIST, KEY_MEMORY};

const DAY_MS: i64 = 86_400_000;
const DOWNVOTE_COST: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtistRecord {
    pub score: u32,
    /// Epoch milliseconds
    pub last_played: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Interest {
    pub artist: String,
    pub score: u32,
}

pub struct ListeningMemory {
    store: Arc<dyn KeyValueStore>,
}

impl ListeningMemory {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        ListeningMemory { store }
    }

    fn records(&self) -> BTreeMap<String, ArtistRecord> {
        store::load_or_default(self.store.as_ref(), KEY_MEMORY)
    }

    fn save_records(&self, records: &BTreeMap<String, ArtistRecord>) {
        store::save(self.store.as_ref(), KEY_MEMORY, records);
    }

    fn blacklisted(&self) -> Vec<String> {
        store::load_or_default(self.store.as_ref(), KEY_BLACKLIST)
    }

    pub fn record(&self, artist: &str) -> Option<ArtistRecord> {
        self.records().get(&key_for(artist)).copied()
    }

    pub fn record_play(&self, artist: &str) {
        self.record_play_at(artist, Utc::now().timestamp_millis());
    }

    pub fn record_play_at(&self, artist: &str, now_ms: i64) {
        let mut records = self.records();
        let entry = records.entry(key_for(artist)).or_insert(ArtistRecord {
            score: 0,
            last_played: now_ms,
        });
        entry.score += 1;
        entry.last_played = now_ms;
        self.save_records(&records);
    }

    pub fn decay(&self, days: u32) {
        self.decay_at(days, Utc::now().timestamp_millis());
    }

    // Only artists idle for longer than `days` lose a point
    pub fn decay_at(&self, days: u32, now_ms: i64) {
        let window = i64::from(days) * DAY_MS;
        let mut records = self.records();
        let mut decayed = 0;

        for record in records.values_mut() {
            if now_ms - record.last_played > window {
                record.score = record.score.saturating_sub(1);
                decayed += 1;
            }
        }

        debug!(days, decayed, "applied listening decay");
        self.save_records(&records);
    }

    pub fn downvote(&self, artist: &str) {
        let mut records = self.records();
        if let Some(record) = records.get_mut(&key_for(artist)) {
            record.score = record.score.saturating_sub(DOWNVOTE_COST);
            self.save_records(&records);
        }
    }

    pub fn blacklist(&self, artist: &str) {
        let key = key_for(artist);
        let mut list = self.blacklisted();
        if !list.contains(&key) {
            list.push(key);
            store::save(self.store.as_ref(), KEY_BLACKLIST, &list);
        }
    }

    pub fn clear_blacklist(&self) {
        store::save(self.store.as_ref(), KEY_BLACKLIST, &Vec::<String>::new());
    }

    pub fn is_blacklisted(&self, artist: &str) -> bool {
        self.blacklisted().contains(&key_for(artist))
    }

    /// Lower-cased names, as stored.
    pub fn blacklisted_artists(&self) -> HashSet<String> {
        self.blacklisted().into_iter().collect()
    }

    pub fn top_interests(&self, limit: usize) -> Vec<Interest> {
        let blacklist = self.blacklisted();
        let mut ranked: Vec<Interest> = self
            .records()
            .into_iter()
            .filter(|(artist, _)| !blacklist.contains(artist))
            .map(|(artist, record)| Interest {
                artist,
                score: record.score,
            })
            .collect();

        // stable: equal scores keep map (alphabetical) order
        ranked.sort_by(|a, b| b.score.cmp(&a.score));
        ranked.truncate(limit);
        ranked
    }
}

pub(crate) fn key_for(artist: &str) -> String {
    let key = artist.trim().to_lowercase();
    if key.is_empty() {
        "unknown".to_string()
    } else {
        key
    }
}
