// ==========================================
// QUEUE MANAGEMENT MODULE
// ==========================================
// This module decides what plays next. It owns two queues:
// - explicit: "play next" items added by the user or the voice assistant
// - autoplay: machine-generated fallback items
//
// The explicit queue always drains first. When both are empty the caller
// is told to generate fresh autoplay candidates from a seed track.
//
// It also holds the advance gate: at most one "advance to next track"
// may be in flight, followed by a short cooldown that swallows duplicate
// end-of-track signals (native element + embedded player firing together).

use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::track::Track;

pub const ADVANCE_COOLDOWN: Duration = Duration::from_millis(300);

// ==========================================
// NEXT SOURCE
// ==========================================
// Result of asking the queue for the next track.
#[derive(Debug, Clone, PartialEq)]
pub enum NextSource {
    Explicit(Track),
    Autoplay(Track),
    // Both queues empty: generate candidates from this seed
    Generate(Track),
    // Nothing queued and nothing to seed from
    Idle,
}

// ==========================================
// QUEUE MANAGER
// ==========================================
// explicit: VecDeque<Track>
//   - front = plays next, ids are unique
//   - only this queue is touched by enqueue/remove/move
//
// autoplay: VecDeque<Track>
//   - replaced wholesale whenever it gets regenerated
#[derive(Debug, Default)]
pub struct QueueManager {
    explicit: VecDeque<Track>,
    autoplay: VecDeque<Track>,
}

impl QueueManager {
    pub fn new() -> Self {
        QueueManager::default()
    }

    // ==========================================
    // NAVIGATION: take_next()
    // ==========================================
    // Priority: explicit queue -> autoplay queue -> generate from seed.
    //
    // Example:
    // - explicit: [A], autoplay: [B]
    // - take_next() -> Explicit(A)
    // - explicit: [],  autoplay: [B]
    pub fn take_next(&mut self, seed: Option<&Track>) -> NextSource {
        if let Some(track) = self.explicit.pop_front() {
            return NextSource::Explicit(track);
        }

        if let Some(track) = self.autoplay.pop_front() {
            return NextSource::Autoplay(track);
        }

        match seed {
            Some(seed) => NextSource::Generate(seed.clone()),
            None => NextSource::Idle,
        }
    }

    // Used by the auto-start rule: pop the explicit head only
    pub fn pop_explicit(&mut self) -> Option<Track> {
        self.explicit.pop_front()
    }

    // ==========================================
    // ADDING TRACKS
    // ==========================================
    // Adding an id that is already queued is a silent no-op.
    // Tracks without an id never enter the queue.
    pub fn enqueue(&mut self, track: Track) -> bool {
        if track.id.is_empty() {
            warn!(title = %track.title, "refusing to queue a track without an id");
            return false;
        }
        if self.explicit.iter().any(|t| t.id == track.id) {
            debug!(id = %track.id, "already queued");
            return false;
        }
        self.explicit.push_back(track);
        true
    }

    // Returns how many tracks were actually added
    pub fn enqueue_many(&mut self, tracks: Vec<Track>) -> usize {
        let mut seen: HashSet<String> = self.explicit.iter().map(|t| t.id.clone()).collect();
        let mut added = 0;

        for track in tracks {
            if track.id.is_empty() || !seen.insert(track.id.clone()) {
                continue;
            }
            self.explicit.push_back(track);
            added += 1;
        }
        added
    }

    // ==========================================
    // QUEUE MANAGEMENT
    // ==========================================
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.explicit.len();
        self.explicit.retain(|t| t.id != id);
        self.explicit.len() != before
    }

    // Moves the item at `index` by `direction` places (-1 = up, +1 = down).
    // Out-of-range source or target leaves the queue unchanged.
    //
    // Example:
    // - Queue: [A, B, C]
    // - move_item(2, -1)
    // - Queue: [A, C, B]
    pub fn move_item(&mut self, index: usize, direction: isize) -> bool {
        let len = self.explicit.len();
        if index >= len {
            return false;
        }
        let target = match index.checked_add_signed(direction) {
            Some(t) if t < len => t,
            _ => return false,
        };

        if let Some(track) = self.explicit.remove(index) {
            self.explicit.insert(target, track);
        }
        true
    }

    // Empties both queues
    pub fn clear(&mut self) {
        self.explicit.clear();
        self.autoplay.clear();
    }

    pub fn set_autoplay(&mut self, tracks: Vec<Track>) {
        self.autoplay = tracks.into();
    }

    // ==========================================
    // QUEUE INSPECTION
    // ==========================================
    pub fn explicit(&self) -> &VecDeque<Track> {
        &self.explicit
    }

    pub fn autoplay(&self) -> &VecDeque<Track> {
        &self.autoplay
    }

    pub fn peek(&self) -> Option<&Track> {
        self.explicit.front().or_else(|| self.autoplay.front())
    }

    pub fn is_empty(&self) -> bool {
        self.explicit.is_empty() && self.autoplay.is_empty()
    }
}

// ==========================================
// ADVANCE GATE
// ==========================================
// Single-slot guard around "advance to next track".
//
// Idle ──try_begin──▶ InFlight ──finish──▶ Cooldown(until) ──(time)──▶ Idle
//
// While InFlight or cooling down, try_begin() refuses: the new request is
// dropped rather than queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Idle,
    InFlight,
    Cooldown(Instant),
}

#[derive(Debug)]
pub struct AdvanceGate {
    state: GateState,
    cooldown: Duration,
}

impl Default for AdvanceGate {
    fn default() -> Self {
        AdvanceGate::new(ADVANCE_COOLDOWN)
    }
}

impl AdvanceGate {
    pub fn new(cooldown: Duration) -> Self {
        AdvanceGate {
            state: GateState::Idle,
            cooldown,
        }
    }

    pub fn try_begin(&mut self) -> bool {
        match self.state {
            GateState::InFlight => false,
            GateState::Cooldown(until) if Instant::now() < until => false,
            _ => {
                self.state = GateState::InFlight;
                true
            }
        }
    }

    pub fn finish(&mut self) {
        self.state = GateState::Cooldown(Instant::now() + self.cooldown);
    }

    pub fn is_in_flight(&self) -> bool {
        self.state == GateState::InFlight
    }

    pub fn state(&self) -> GateState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::Category;

    fn t(id: &str) -> Track {
        Track::new(id, id, "artist", "/a.mp3", Category::Local)
    }

    fn ids(q: &VecDeque<Track>) -> Vec<&str> {
        q.iter().map(|t| t.id.as_str()).collect()
    }

    #[test]
    fn enqueue_is_idempotent_by_id() {
        let mut q = QueueManager::new();
        assert!(q.enqueue(t("a")));
        assert!(!q.enqueue(t("a")));
        assert!(q.enqueue(t("b")));
        assert!(!q.enqueue(t("")));
        assert_eq!(ids(q.explicit()), vec!["a", "b"]);
    }

    #[test]
    fn enqueue_many_dedups_against_queue_and_batch() {
        let mut q = QueueManager::new();
        q.enqueue(t("a"));
        let added = q.enqueue_many(vec![t("a"), t("b"), t("b"), t("c")]);
        assert_eq!(added, 2);
        assert_eq!(ids(q.explicit()), vec!["a", "b", "c"]);
    }

    #[test]
    fn explicit_drains_before_autoplay() {
        let mut q = QueueManager::new();
        q.enqueue(t("A"));
        q.set_autoplay(vec![t("B")]);

        assert_eq!(q.take_next(None), NextSource::Explicit(t("A")));
        assert_eq!(ids(q.autoplay()), vec!["B"]);
        assert_eq!(q.take_next(None), NextSource::Autoplay(t("B")));
    }

    #[test]
    fn empty_queues_generate_from_seed_or_idle() {
        let mut q = QueueManager::new();
        assert_eq!(q.take_next(None), NextSource::Idle);
        assert_eq!(q.take_next(Some(&t("s"))), NextSource::Generate(t("s")));
    }

    #[test]
    fn move_respects_bounds() {
        let mut q = QueueManager::new();
        q.enqueue_many(vec![t("a"), t("b"), t("c")]);

        assert!(q.move_item(2, -1));
        assert_eq!(ids(q.explicit()), vec!["a", "c", "b"]);

        assert!(!q.move_item(0, -1));
        assert!(!q.move_item(2, 1));
        assert!(!q.move_item(7, -1));
        assert_eq!(ids(q.explicit()), vec!["a", "c", "b"]);
    }

    #[test]
    fn remove_and_clear() {
        let mut q = QueueManager::new();
        q.enqueue_many(vec![t("a"), t("b")]);
        q.set_autoplay(vec![t("z")]);

        assert!(q.remove("a"));
        assert!(!q.remove("a"));
        assert_eq!(ids(q.explicit()), vec!["b"]);

        q.clear();
        assert!(q.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn gate_rejects_while_in_flight_and_cooling_down() {
        let mut gate = AdvanceGate::default();
        assert!(gate.try_begin());
        assert!(!gate.try_begin());

        gate.finish();
        assert!(!gate.try_begin());

        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(!gate.try_begin());

        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(gate.try_begin());
        assert!(gate.is_in_flight());
    }
}
