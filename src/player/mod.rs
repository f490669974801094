// Playback: queues, history, backends and the controller that fronts them

pub mod audio;
pub mod controller;
pub mod history;
pub mod queue;
pub mod youtube;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::error::PlaybackError;

// ==========================================
// LOADED SOURCE
// ==========================================
// Encoded audio fetched for one source, ready to be installed into a backend.
#[derive(Clone)]
pub struct LoadedSource {
    pub source: String,
    pub bytes: Arc<Vec<u8>>,
}

impl fmt::Debug for LoadedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedSource")
            .field("source", &self.source)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

// The slow half of a load (download, extraction). Runs on its own task so
// the session keeps answering while a track is being fetched.
#[async_trait]
pub trait SourceLoader: Send + Sync {
    async fn fetch(&self, source: &str) -> Result<LoadedSource, PlaybackError>;
}

// ==========================================
// MEDIA BACKEND
// ==========================================
// One playable surface: the native audio element or the embedded video
// player. The controller only ever talks to backends through this trait.
//
// Sources are whatever the backend's loader understands: a file path or
// stream URL for native audio, a video id for the embedded player.
pub trait MediaBackend: Send {
    fn loader(&self) -> Arc<dyn SourceLoader>;

    // Swaps in a fetched source, stopped and rewound. No I/O.
    fn install(&mut self, loaded: LoadedSource) -> Result<(), PlaybackError>;

    // Starts or resumes. May be refused (no device, not allowed yet).
    fn play(&mut self) -> Result<(), PlaybackError>;

    fn pause(&mut self);

    // Stops and rewinds
    fn stop(&mut self);

    fn is_paused(&self) -> bool;

    /// Reached the natural end of the loaded source.
    fn has_ended(&self) -> bool;

    /// Seconds into the loaded source.
    fn current_time(&self) -> f64;

    /// Total length in seconds, `None` while unknown.
    fn duration(&self) -> Option<f64>;

    fn seek_to(&mut self, seconds: f64);

    /// 0 (mute) to 100 (max)
    fn set_volume(&mut self, _volume: u32) {}

    // Periodic nudge so a long-lived output does not get suspended
    fn keep_alive(&mut self) {}
}

// Scriptable backend shared by the unit tests
#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::sync::{Arc, Mutex, MutexGuard};
    use std::time::Duration;

    #[derive(Debug, Default)]
    pub struct FakeState {
        // installed sources, in order
        pub loads: Vec<String>,
        pub fetches: Vec<String>,
        pub playing: bool,
        pub ended: bool,
        pub time: f64,
        pub duration: Option<f64>,
        pub refuse_play: bool,
        pub fail_load: bool,
        pub load_delay: Option<Duration>,
        pub stops: usize,
        pub seeks: Vec<f64>,
        pub keep_alives: usize,
    }

    #[derive(Clone, Default)]
    pub struct FakeBackend(pub Arc<Mutex<FakeState>>);

    impl FakeBackend {
        pub fn state(&self) -> MutexGuard<'_, FakeState> {
            self.0.lock().unwrap()
        }
    }

    #[async_trait]
    impl SourceLoader for FakeBackend {
        async fn fetch(&self, source: &str) -> Result<LoadedSource, PlaybackError> {
            let (delay, fail) = {
                let mut s = self.state();
                s.fetches.push(source.to_string());
                (s.load_delay, s.fail_load)
            };
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if fail {
                return Err(PlaybackError::Source(source.to_string()));
            }
            Ok(LoadedSource {
                source: source.to_string(),
                bytes: Arc::new(Vec::new()),
            })
        }
    }

    impl MediaBackend for FakeBackend {
        fn loader(&self) -> Arc<dyn SourceLoader> {
            Arc::new(self.clone())
        }

        fn install(&mut self, loaded: LoadedSource) -> Result<(), PlaybackError> {
            let mut s = self.state();
            s.loads.push(loaded.source);
            s.playing = false;
            s.ended = false;
            s.time = 0.0;
            Ok(())
        }

        fn play(&mut self) -> Result<(), PlaybackError> {
            let mut s = self.state();
            if s.refuse_play {
                return Err(PlaybackError::Blocked("no user gesture".into()));
            }
            s.playing = true;
            Ok(())
        }

        fn pause(&mut self) {
            self.state().playing = false;
        }

        fn stop(&mut self) {
            let mut s = self.state();
            s.playing = false;
            s.stops += 1;
        }

        fn is_paused(&self) -> bool {
            !self.state().playing
        }

        fn has_ended(&self) -> bool {
            self.state().ended
        }

        fn current_time(&self) -> f64 {
            self.state().time
        }

        fn duration(&self) -> Option<f64> {
            self.state().duration
        }

        fn seek_to(&mut self, seconds: f64) {
            self.state().seeks.push(seconds);
        }

        fn keep_alive(&mut self) {
            self.state().keep_alives += 1;
        }
    }
}
