// ==========================================
// NATIVE AUDIO BACKEND
// ==========================================
// This module is the "native audio element": it loads a file or stream URL,
// decodes it and plays it on the default output device.
// It handles:
// - Fetching the source bytes (local path or http(s) URL), off the session task
// - Playing, pausing, stopping, seeking
// - Tracking playback position with a wall clock
// - Reporting natural end of track
//
// Real output goes through rodio when the `audio` feature is enabled.
// Without it the player is headless: installing works, play() is refused
// with NoOutputDevice, which callers treat as "playback blocked".

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::PlaybackError;
use crate::player::{LoadedSource, MediaBackend, SourceLoader};

// A drained sink this early is a load hiccup, not the end of the track
const END_GUARD_SECS: f64 = 2.0;

// ==========================================
// PLAYER STATE ENUM
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Stopped, // Nothing loaded
    Ready,   // Loaded, not started
    Playing,
    Paused,
}

// ==========================================
// AUDIO PLAYER STRUCT
// ==========================================
// output: Option<Output>
//   - None when no output device is available (headless)
//
// bytes: Option<Arc<Vec<u8>>>
//   - Encoded audio of the loaded source, kept so seeking can re-decode
//
// start_time / pause_time / total_paused_duration / offset
//   - Wall-clock position tracking: offset is where the current run
//     started (non-zero after a seek)
pub struct AudioPlayer {
    output: Option<output::Output>,
    http: reqwest::Client,
    state: PlayerState,
    volume: u32,
    duration: Option<f64>,
    source: Option<String>,
    bytes: Option<Arc<Vec<u8>>>,
    start_time: Option<Instant>,
    pause_time: Option<Instant>,
    total_paused_duration: Duration,
    offset: f64,
}

impl Drop for AudioPlayer {
    fn drop(&mut self) {
        if let Some(out) = &mut self.output {
            out.stop();
        }
    }
}

impl AudioPlayer {
    pub fn new(http: reqwest::Client) -> Self {
        let output = output::Output::open();
        if output.is_none() {
            warn!("no audio output available, native playback will be refused");
        }
        AudioPlayer::with_output(http, output)
    }

    // Headless player regardless of features (tests, servers)
    pub fn headless(http: reqwest::Client) -> Self {
        AudioPlayer::with_output(http, None)
    }

    fn with_output(http: reqwest::Client, output: Option<output::Output>) -> Self {
        AudioPlayer {
            output,
            http,
            state: PlayerState::Stopped,
            volume: 100,
            duration: None,
            source: None,
            bytes: None,
            start_time: None,
            pause_time: None,
            total_paused_duration: Duration::ZERO,
            offset: 0.0,
        }
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn volume(&self) -> u32 {
        self.volume
    }

    fn start_run(&mut self, from: f64) -> Result<(), PlaybackError> {
        let bytes = self.bytes.clone().ok_or(PlaybackError::NothingLoaded)?;
        let out = self.output.as_mut().ok_or(PlaybackError::NoOutputDevice)?;
        out.start(bytes, from, self.volume)?;

        self.offset = from;
        self.start_time = Some(Instant::now());
        self.pause_time = None;
        self.total_paused_duration = Duration::ZERO;
        self.state = PlayerState::Playing;
        Ok(())
    }
}

// ==========================================
// NATIVE LOADER
// ==========================================
// Reads a local file or downloads an http(s) stream URL in full.
pub struct NativeLoader {
    http: reqwest::Client,
}

impl NativeLoader {
    pub fn new(http: reqwest::Client) -> Self {
        NativeLoader { http }
    }
}

#[async_trait]
impl SourceLoader for NativeLoader {
    async fn fetch(&self, source: &str) -> Result<LoadedSource, PlaybackError> {
        let bytes = if source.starts_with("http://") || source.starts_with("https://") {
            let response = self
                .http
                .get(source)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| PlaybackError::Source(e.to_string()))?;
            response
                .bytes()
                .await
                .map_err(|e| PlaybackError::Source(e.to_string()))?
                .to_vec()
        } else {
            tokio::fs::read(source)
                .await
                .map_err(|e| PlaybackError::Source(format!("{}: {}", source, e)))?
        };
        Ok(LoadedSource {
            source: source.to_string(),
            bytes: Arc::new(bytes),
        })
    }
}

impl MediaBackend for AudioPlayer {
    fn loader(&self) -> Arc<dyn SourceLoader> {
        Arc::new(NativeLoader::new(self.http.clone()))
    }

    // Probes the duration; a source that does not decode leaves the player empty
    fn install(&mut self, loaded: LoadedSource) -> Result<(), PlaybackError> {
        self.bytes = None;
        self.source = None;
        self.duration = None;
        self.stop();
        self.duration = output::probe_duration(loaded.bytes.clone())?;
        debug!(source = %loaded.source, duration = ?self.duration, "audio loaded");
        self.bytes = Some(loaded.bytes);
        self.source = Some(loaded.source);
        self.state = PlayerState::Ready;
        Ok(())
    }

    // ==========================================
    // PLAYBACK CONTROL: play()
    // ==========================================
    // Ready   -> start from the beginning
    // Paused  -> resume where we left off
    // Playing -> no-op
    fn play(&mut self) -> Result<(), PlaybackError> {
        match self.state {
            PlayerState::Playing => Ok(()),
            PlayerState::Paused => {
                let out = self.output.as_mut().ok_or(PlaybackError::NoOutputDevice)?;
                out.resume();
                if let Some(pause_time) = self.pause_time.take() {
                    self.total_paused_duration += Instant::now().duration_since(pause_time);
                }
                self.state = PlayerState::Playing;
                Ok(())
            }
            PlayerState::Ready => self.start_run(0.0),
            PlayerState::Stopped => Err(PlaybackError::NothingLoaded),
        }
    }

    fn pause(&mut self) {
        if self.state != PlayerState::Playing {
            return;
        }
        if let Some(out) = &mut self.output {
            out.pause();
        }
        self.pause_time = Some(Instant::now());
        self.state = PlayerState::Paused;
    }

    fn stop(&mut self) {
        if let Some(out) = &mut self.output {
            out.stop();
        }
        self.start_time = None;
        self.pause_time = None;
        self.total_paused_duration = Duration::ZERO;
        self.offset = 0.0;
        self.state = if self.bytes.is_some() {
            PlayerState::Ready
        } else {
            PlayerState::Stopped
        };
    }

    fn is_paused(&self) -> bool {
        self.state != PlayerState::Playing
    }

    // ==========================================
    // PLAYBACK INFO: has_ended()
    // ==========================================
    // True once a started track ran out: either the output drained or the
    // clock passed the known duration. The 2 second guard keeps a sink that
    // is briefly empty while buffering from counting as finished.
    fn has_ended(&self) -> bool {
        if self.state != PlayerState::Playing || self.start_time.is_none() {
            return false;
        }
        let position = self.current_time();
        if let Some(duration) = self.duration {
            if position >= duration {
                return true;
            }
        }
        match &self.output {
            Some(out) => out.is_drained() && position >= END_GUARD_SECS,
            None => false,
        }
    }

    fn current_time(&self) -> f64 {
        let Some(start) = self.start_time else {
            return 0.0;
        };
        let until = self.pause_time.unwrap_or_else(Instant::now);
        let elapsed = until
            .duration_since(start)
            .saturating_sub(self.total_paused_duration);
        self.offset + elapsed.as_secs_f64()
    }

    fn duration(&self) -> Option<f64> {
        self.duration
    }

    // ==========================================
    // SEEKING: seek_to()
    // ==========================================
    // Re-decodes the loaded bytes and skips ahead to the target.
    fn seek_to(&mut self, seconds: f64) {
        if self.bytes.is_none() || !seconds.is_finite() {
            return;
        }
        let mut target = seconds.max(0.0);
        if let Some(d) = self.duration {
            target = target.min(d);
        }

        let was_paused = self.state == PlayerState::Paused;
        match self.start_run(target) {
            Ok(()) => {
                if was_paused {
                    self.pause();
                }
            }
            Err(e) => debug!(error = %e, "seek ignored"),
        }
    }

    fn set_volume(&mut self, volume: u32) {
        self.volume = volume.min(100);
        if let Some(out) = &mut self.output {
            out.set_volume(self.volume);
        }
    }

    fn keep_alive(&mut self) {
        if self.state == PlayerState::Playing {
            if let Some(out) = &mut self.output {
                out.nudge();
            }
        }
    }
}

// ==========================================
// OUTPUT DEVICE
// ==========================================
// rodio-backed output when the `audio` feature is on.
#[cfg(feature = "audio")]
mod output {
    use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
    use std::io::Cursor;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::error::PlaybackError;

    // Lets a decoder read the player's bytes without copying them
    struct SharedBytes(Arc<Vec<u8>>);

    impl AsRef<[u8]> for SharedBytes {
        fn as_ref(&self) -> &[u8] {
            &self.0
        }
    }

    fn decoder(bytes: Arc<Vec<u8>>) -> Result<Decoder<Cursor<SharedBytes>>, PlaybackError> {
        Decoder::new(Cursor::new(SharedBytes(bytes))).map_err(|e| PlaybackError::Decode(e.to_string()))
    }

    pub struct Output {
        handle: OutputStreamHandle,
        sink: Option<Sink>,
    }

    impl Output {
        pub fn open() -> Option<Output> {
            let (stream, handle) = OutputStream::try_default().ok()?;
            // The stream must outlive every sink; it is not Send, so it is
            // leaked for the lifetime of the process.
            std::mem::forget(stream);
            Some(Output { handle, sink: None })
        }

        pub fn start(&mut self, bytes: Arc<Vec<u8>>, from: f64, volume: u32) -> Result<(), PlaybackError> {
            self.stop();
            let decoder = decoder(bytes)?;
            let sink = Sink::try_new(&self.handle)
                .map_err(|e| PlaybackError::Blocked(e.to_string()))?;
            sink.set_volume(volume as f32 / 100.0);
            sink.append(decoder.skip_duration(Duration::from_secs_f64(from)));
            self.sink = Some(sink);
            Ok(())
        }

        pub fn pause(&mut self) {
            if let Some(sink) = &self.sink {
                sink.pause();
            }
        }

        pub fn resume(&mut self) {
            if let Some(sink) = &self.sink {
                sink.play();
            }
        }

        pub fn stop(&mut self) {
            if let Some(sink) = self.sink.take() {
                sink.stop();
            }
        }

        pub fn is_drained(&self) -> bool {
            self.sink.as_ref().map_or(true, |s| s.empty())
        }

        pub fn set_volume(&mut self, volume: u32) {
            if let Some(sink) = &self.sink {
                sink.set_volume(volume as f32 / 100.0);
            }
        }

        // A sink that got paused underneath us is restarted
        pub fn nudge(&mut self) {
            if let Some(sink) = &self.sink {
                if sink.is_paused() {
                    sink.play();
                }
            }
        }
    }

    pub fn probe_duration(bytes: Arc<Vec<u8>>) -> Result<Option<f64>, PlaybackError> {
        Ok(decoder(bytes)?.total_duration().map(|d| d.as_secs_f64()))
    }
}

// Headless build: no device, nothing decoded
#[cfg(not(feature = "audio"))]
mod output {
    use std::sync::Arc;

    use crate::error::PlaybackError;

    pub struct Output;

    impl Output {
        pub fn open() -> Option<Output> {
            None
        }

        pub fn start(&mut self, _bytes: Arc<Vec<u8>>, _from: f64, _volume: u32) -> Result<(), PlaybackError> {
            Err(PlaybackError::NoOutputDevice)
        }

        pub fn pause(&mut self) {}

        pub fn resume(&mut self) {}

        pub fn stop(&mut self) {}

        pub fn is_drained(&self) -> bool {
            true
        }

        pub fn set_volume(&mut self, _volume: u32) {}

        pub fn nudge(&mut self) {}
    }

    pub fn probe_duration(_bytes: Arc<Vec<u8>>) -> Result<Option<f64>, PlaybackError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn fetch(source: &str) -> Result<LoadedSource, PlaybackError> {
        NativeLoader::new(reqwest::Client::new()).fetch(source).await
    }

    #[tokio::test]
    async fn installs_local_file_then_refuses_without_device() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.mp3");
        std::fs::write(&path, b"not really audio").unwrap();

        let loaded = fetch(path.to_str().unwrap()).await.unwrap();
        assert_eq!(loaded.bytes.len(), 16);

        let mut player = AudioPlayer::headless(reqwest::Client::new());
        // headless probe never decodes, so arbitrary bytes install fine
        #[cfg(not(feature = "audio"))]
        {
            player.install(loaded).unwrap();
            assert_eq!(player.state(), PlayerState::Ready);
            assert!(matches!(player.play(), Err(PlaybackError::NoOutputDevice)));
            assert!(!player.has_ended());
            assert_eq!(player.current_time(), 0.0);
        }
        #[cfg(feature = "audio")]
        {
            assert!(matches!(player.install(loaded), Err(PlaybackError::Decode(_))));
            assert_eq!(player.state(), PlayerState::Stopped);
            assert_eq!(player.source(), None);
        }
    }

    #[tokio::test]
    async fn missing_file_is_a_source_error() {
        let err = fetch("/definitely/not/here.mp3").await.unwrap_err();
        assert!(matches!(err, PlaybackError::Source(_)));

        let mut player = AudioPlayer::headless(reqwest::Client::new());
        assert!(matches!(player.play(), Err(PlaybackError::NothingLoaded)));
    }

    #[test]
    fn volume_is_clamped() {
        let mut player = AudioPlayer::headless(reqwest::Client::new());
        player.set_volume(250);
        assert_eq!(player.volume(), 100);
    }
}
