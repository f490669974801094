// ==========================================
// PLAYER CONTROLLER
// ==========================================
// One play/pause/seek surface over two backends:
// - native audio (always present)
// - embedded video player handle (optional)
//
// Dispatch rule: when the active track is embedded-video category and a
// handle exists, every operation goes to the handle; otherwise to native.
//
// Starting a track is two steps: `begin_*` silences the other backend and
// hands back the loader to run elsewhere, `finish_load` installs the result.
// In between the controller is "loading": no end-of-track, progress or seek.
//
// The controller also publishes playback progress (0.0..=1.0) on a watch
// channel and reports end-of-track exactly once per loaded source.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::PlaybackError;
use crate::player::{LoadedSource, MediaBackend, SourceLoader};
use crate::track::Category;

// Which backend a load was started for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Native,
    Embedded,
}

pub struct PlayerController {
    native: Box<dyn MediaBackend>,
    embedded: Option<Box<dyn MediaBackend>>,
    active: Option<Category>,
    embedded_id: Option<String>,
    // Set once the current source's end has been handed to the queue
    end_reported: bool,
    loading: bool,
    progress: watch::Sender<f64>,
}

impl PlayerController {
    pub fn new(native: Box<dyn MediaBackend>, embedded: Option<Box<dyn MediaBackend>>) -> Self {
        let (progress, _) = watch::channel(0.0);
        PlayerController {
            native,
            embedded,
            active: None,
            embedded_id: None,
            end_reported: false,
            loading: false,
            progress,
        }
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<f64> {
        self.progress.subscribe()
    }

    pub fn has_embedded(&self) -> bool {
        self.embedded.is_some()
    }

    pub fn embedded_id(&self) -> Option<&str> {
        self.embedded_id.as_deref()
    }

    pub fn active_category(&self) -> Option<Category> {
        self.active
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    fn routes_to_embedded(&self) -> bool {
        self.active.is_some_and(Category::is_embedded_video) && self.embedded.is_some()
    }

    fn backend(&self) -> &dyn MediaBackend {
        match &self.embedded {
            Some(handle) if self.routes_to_embedded() => handle.as_ref(),
            _ => self.native.as_ref(),
        }
    }

    fn backend_mut(&mut self) -> &mut dyn MediaBackend {
        let to_embedded = self.routes_to_embedded();
        match &mut self.embedded {
            Some(handle) if to_embedded => handle.as_mut(),
            _ => self.native.as_mut(),
        }
    }

    // ==========================================
    // STARTING PLAYBACK
    // ==========================================

    fn reset_for_load(&mut self) {
        self.end_reported = false;
        self.loading = true;
        let _ = self.progress.send(0.0);
    }

    // Native path: drop any embedded video and silence native audio
    pub fn begin_native(&mut self, category: Category) -> Arc<dyn SourceLoader> {
        self.clear_embedded();
        self.stop_native();
        self.active = Some(category);
        self.reset_for_load();
        self.native.loader()
    }

    // Embedded path: silence native audio and whatever video was cued,
    // then remember the new id. Fails when there is no embedded player.
    pub fn begin_embedded(&mut self, video_id: &str) -> Result<Arc<dyn SourceLoader>, PlaybackError> {
        self.stop_native();
        if let Some(handle) = &mut self.embedded {
            handle.stop();
        }
        self.active = Some(Category::YouTube);
        self.embedded_id = Some(video_id.to_string());
        self.reset_for_load();

        match &self.embedded {
            Some(handle) => Ok(handle.loader()),
            None => {
                self.loading = false;
                Err(PlaybackError::Blocked("no embedded player".to_string()))
            }
        }
    }

    // Installs a finished fetch and, when `autoplay` is set, starts it.
    // A refused play() comes back as an error; the source stays installed
    // so a later resume() can start it.
    pub fn finish_load(
        &mut self,
        slot: Slot,
        fetched: Result<LoadedSource, PlaybackError>,
        autoplay: bool,
    ) -> Result<(), PlaybackError> {
        self.loading = false;
        let loaded = fetched?;
        let backend: &mut dyn MediaBackend = match slot {
            Slot::Native => self.native.as_mut(),
            Slot::Embedded => self
                .embedded
                .as_mut()
                .ok_or_else(|| PlaybackError::Blocked("no embedded player".to_string()))?
                .as_mut(),
        };
        backend.install(loaded)?;
        if autoplay {
            backend.play()?;
        }
        Ok(())
    }

    // Nothing playable selected: both backends silent, transport inert
    pub fn halt(&mut self) {
        self.clear_embedded();
        self.stop_native();
        self.active = None;
        self.loading = false;
        self.end_reported = false;
        let _ = self.progress.send(0.0);
    }

    pub fn stop_native(&mut self) {
        if !self.native.is_paused() {
            self.native.pause();
        }
        self.native.stop();
    }

    pub fn clear_embedded(&mut self) {
        if self.embedded_id.take().is_some() {
            if let Some(handle) = &mut self.embedded {
                handle.stop();
            }
        }
    }

    // ==========================================
    // TRANSPORT
    // ==========================================

    // Returns the new "is playing" state, None when nothing is selected
    pub fn play_pause(&mut self) -> Option<bool> {
        self.active?;
        let backend = self.backend_mut();
        if backend.is_paused() {
            match backend.play() {
                Ok(()) => Some(true),
                Err(e) => {
                    warn!(error = %e, "play refused");
                    Some(false)
                }
            }
        } else {
            backend.pause();
            Some(false)
        }
    }

    pub fn pause(&mut self) {
        let backend = self.backend_mut();
        if !backend.is_paused() {
            backend.pause();
        }
    }

    pub fn resume(&mut self) -> Result<(), PlaybackError> {
        let backend = self.backend_mut();
        if backend.is_paused() {
            backend.play()?;
        }
        Ok(())
    }

    // fraction of the active backend's duration; unknown duration = no-op
    pub fn seek(&mut self, fraction: f64) {
        if self.loading || !fraction.is_finite() {
            return;
        }
        let fraction = fraction.clamp(0.0, 1.0);
        let backend = self.backend_mut();
        match backend.duration() {
            Some(duration) if duration.is_finite() && duration > 0.0 => {
                backend.seek_to(duration * fraction);
            }
            _ => debug!("seek ignored, duration unknown"),
        }
    }

    pub fn set_volume(&mut self, volume: u32) {
        self.native.set_volume(volume);
        if let Some(handle) = &mut self.embedded {
            handle.set_volume(volume);
        }
    }

    pub fn is_playing(&self) -> bool {
        self.active.is_some() && !self.backend().is_paused()
    }

    // ==========================================
    // POLLING HOOKS
    // ==========================================

    // Reads position/duration from the active backend and publishes it
    pub fn publish_progress(&self) -> Option<f64> {
        if self.loading {
            return None;
        }
        let backend = self.backend();
        let current = backend.current_time();
        let duration = backend.duration()?;
        if !current.is_finite() || !duration.is_finite() || duration <= 0.0 {
            return None;
        }
        let fraction = (current / duration).clamp(0.0, 1.0);
        let _ = self.progress.send(fraction);
        Some(fraction)
    }

    // True the first time the active backend is seen at its natural end
    pub fn poll_ended(&mut self) -> bool {
        if self.end_reported || self.loading || self.active.is_none() {
            return false;
        }
        if self.backend().has_ended() {
            self.end_reported = true;
            return true;
        }
        false
    }

    // Native element says ended but nobody advanced (e.g. ticks were
    // suspended while the view was hidden)
    pub fn missed_native_end(&mut self) -> bool {
        if self.end_reported || self.loading || self.routes_to_embedded() {
            return false;
        }
        if self.native.has_ended() {
            self.end_reported = true;
            return true;
        }
        false
    }

    pub fn keep_alive(&mut self) {
        self.native.keep_alive();
    }
}
