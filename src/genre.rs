// Genre interest weights
// Coarse genre guess per track plus a weighted tally of what the listener does
// with each genre (play, like, skip...). Feeds the "for you" surfaces.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::store::{self, KeyValueStore, KEY_DYNAMIC_GENRES, KEY_INTERESTS, KEY_LISTEN_COUNT};
use crate::track::Track;

pub const FALLBACK_GENRE: &str = "Misc";

const ARTIST_ANCHORS: &[(&str, &str)] = &[
    ("karan aujla", "Punjabi"),
    ("divine", "Indian Hip-Hop"),
    ("ap dhillon", "Punjabi Pop"),
    ("arijit singh", "Bollywood"),
    ("badshah", "Indian Pop"),
    ("yo yo honey singh", "Desi Pop"),
    ("lofi girl", "Lofi"),
    ("jvke", "Indie Pop"),
    ("the weeknd", "R&B"),
    ("drake", "Hip-Hop"),
    ("taylor swift", "Pop"),
];

const TITLE_KEYWORDS: &[(&str, &str)] = &[
    ("lofi", "Lofi"),
    ("rap", "Hip-Hop"),
    ("remix", "Remix"),
    ("sad", "Sad Vibes"),
    ("official", "Mainstream"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InterestAction {
    Play,
    Like,
    Replay,
    Skip,
    Dislike,
}

impl InterestAction {
    pub fn weight(self) -> i64 {
        match self {
            InterestAction::Play => 2,
            InterestAction::Like => 4,
            InterestAction::Replay => 3,
            InterestAction::Skip => -2,
            InterestAction::Dislike => -5,
        }
    }
}

pub struct GenreProfile {
    store: Arc<dyn KeyValueStore>,
}

impl GenreProfile {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        GenreProfile { store }
    }

    // anchors -> title keywords -> learned artists -> fallback
    pub fn resolve(&self, track: &Track) -> String {
        let artist = track.artist.trim();
        let artist_lower = artist.to_lowercase();
        let title = track.title.to_lowercase();

        if let Some((_, genre)) = ARTIST_ANCHORS.iter().find(|(a, _)| *a == artist_lower) {
            return genre.to_string();
        }

        if let Some((_, genre)) = TITLE_KEYWORDS.iter().find(|(kw, _)| title.contains(kw)) {
            return genre.to_string();
        }

        let learned: HashMap<String, String> =
            store::load_or_default(self.store.as_ref(), KEY_DYNAMIC_GENRES);
        learned
            .get(artist)
            .cloned()
            .unwrap_or_else(|| FALLBACK_GENRE.to_string())
    }

    pub fn learn(&self, artist: &str, genre: &str) {
        let artist = artist.trim();
        if artist.is_empty() || genre.is_empty() {
            return;
        }
        let mut learned: HashMap<String, String> =
            store::load_or_default(self.store.as_ref(), KEY_DYNAMIC_GENRES);
        learned.insert(artist.to_string(), genre.to_string());
        store::save(self.store.as_ref(), KEY_DYNAMIC_GENRES, &learned);
    }

    /// Applies the action weight to the track's genre and returns (genre, new score).
    pub fn update(&self, track: &Track, action: InterestAction) -> (String, i64) {
        let genre = self.resolve(track);
        let mut weights: BTreeMap<String, i64> =
            store::load_or_default(self.store.as_ref(), KEY_INTERESTS);
        let score = weights.entry(genre.clone()).or_insert(0);
        *score += action.weight();
        let score = *score;
        store::save(self.store.as_ref(), KEY_INTERESTS, &weights);
        (genre, score)
    }

    pub fn ranked(&self, limit: usize) -> Vec<(String, i64)> {
        let weights: BTreeMap<String, i64> =
            store::load_or_default(self.store.as_ref(), KEY_INTERESTS);
        let mut ranked: Vec<(String, i64)> = weights.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked.truncate(limit);
        ranked
    }

    // Raw per-artist play counter, independent of decay
    pub fn count_listen(&self, track: &Track) -> u64 {
        let mut counts: HashMap<String, u64> =
            store::load_or_default(self.store.as_ref(), KEY_LISTEN_COUNT);
        let count = counts.entry(track.artist_key()).or_insert(0);
        *count += 1;
        let count = *count;
        store::save(self.store.as_ref(), KEY_LISTEN_COUNT, &counts);
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::track::Category;

    fn profile() -> GenreProfile {
        GenreProfile::new(Arc::new(MemoryStore::new()))
    }

    fn track(title: &str, artist: &str) -> Track {
        Track::new("local-1", title, artist, "/a.mp3", Category::Local)
    }

    #[test]
    fn resolution_order() {
        let p = profile();
        assert_eq!(p.resolve(&track("Lofi Remix", "Drake")), "Hip-Hop");
        assert_eq!(p.resolve(&track("Sad Lofi Beats", "nobody")), "Lofi");
        assert_eq!(p.resolve(&track("Untitled", "nobody")), FALLBACK_GENRE);

        p.learn("nobody", "Ambient");
        assert_eq!(p.resolve(&track("Untitled", "nobody")), "Ambient");
    }

    #[test]
    fn weights_accumulate_and_rank() {
        let p = profile();
        p.update(&track("a lofi tune", "x"), InterestAction::Play);
        p.update(&track("a lofi tune", "x"), InterestAction::Like);
        let (genre, score) = p.update(&track("remix", "y"), InterestAction::Skip);
        assert_eq!(genre, "Remix");
        assert_eq!(score, -2);

        assert_eq!(p.ranked(1), vec![("Lofi".to_string(), 6)]);
    }

    #[test]
    fn listen_counts_by_artist() {
        let p = profile();
        assert_eq!(p.count_listen(&track("a", "Artist")), 1);
        assert_eq!(p.count_listen(&track("b", "ARTIST")), 2);
    }
}
