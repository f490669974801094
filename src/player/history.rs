// Session play history
// Recently played tracks, oldest first, capped. Only used for "previous".
// Not persisted.

use std::collections::VecDeque;

use crate::track::Track;

pub const HISTORY_CAP: usize = 50;

#[derive(Debug)]
pub struct PlayHistory {
    entries: VecDeque<Track>,
    cap: usize,
}

impl Default for PlayHistory {
    fn default() -> Self {
        PlayHistory::with_cap(HISTORY_CAP)
    }
}

impl PlayHistory {
    pub fn with_cap(cap: usize) -> Self {
        PlayHistory {
            entries: VecDeque::with_capacity(cap),
            cap,
        }
    }

    // Back-to-back repeats (double clicks, previous()) are not recorded twice.
    // Returns false when the push was skipped.
    pub fn push(&mut self, track: &Track) -> bool {
        if self.entries.back().is_some_and(|last| last.id == track.id) {
            return false;
        }
        self.entries.push_back(track.clone());
        while self.entries.len() > self.cap {
            self.entries.pop_front();
        }
        true
    }

    // Drops the current track and returns the one before it.
    // Needs at least two entries; otherwise nothing changes.
    pub fn previous(&mut self) -> Option<Track> {
        if self.entries.len() < 2 {
            return None;
        }
        self.entries.pop_back();
        self.entries.back().cloned()
    }

    pub fn last(&self) -> Option<&Track> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
