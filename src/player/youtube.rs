// Embedded video backend
// The "live player handle" for YouTube-category tracks. It is cued with a
// video id, pulls the audio through yt-dlp and plays it on its own output.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::catalog::extractor::YouTubeExtractor;
use crate::error::PlaybackError;
use crate::player::audio::AudioPlayer;
use crate::player::{LoadedSource, MediaBackend, SourceLoader};

pub struct YouTubeHandle {
    extractor: Arc<YouTubeExtractor>,
    player: AudioPlayer,
    video_id: Option<String>,
}

impl YouTubeHandle {
    pub fn new(extractor: YouTubeExtractor, player: AudioPlayer) -> Self {
        YouTubeHandle {
            extractor: Arc::new(extractor),
            player,
            video_id: None,
        }
    }

    pub fn video_id(&self) -> Option<&str> {
        self.video_id.as_deref()
    }
}

// `source` is the 11-character video id
struct VideoLoader {
    extractor: Arc<YouTubeExtractor>,
}

#[async_trait]
impl SourceLoader for VideoLoader {
    async fn fetch(&self, source: &str) -> Result<LoadedSource, PlaybackError> {
        let path = self.extractor.download_audio(source).await?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| PlaybackError::Source(format!("{}: {}", path.display(), e)))?;
        debug!(video_id = source, bytes = bytes.len(), "video audio ready");
        Ok(LoadedSource {
            source: source.to_string(),
            bytes: Arc::new(bytes),
        })
    }
}

impl MediaBackend for YouTubeHandle {
    fn loader(&self) -> Arc<dyn SourceLoader> {
        Arc::new(VideoLoader {
            extractor: self.extractor.clone(),
        })
    }

    fn install(&mut self, loaded: LoadedSource) -> Result<(), PlaybackError> {
        self.video_id = Some(loaded.source.clone());
        self.player.install(loaded)
    }

    fn play(&mut self) -> Result<(), PlaybackError> {
        self.player.play()
    }

    fn pause(&mut self) {
        self.player.pause();
    }

    fn stop(&mut self) {
        self.player.stop();
    }

    fn is_paused(&self) -> bool {
        self.player.is_paused()
    }

    fn has_ended(&self) -> bool {
        self.player.has_ended()
    }

    fn current_time(&self) -> f64 {
        self.player.current_time()
    }

    fn duration(&self) -> Option<f64> {
        self.player.duration()
    }

    fn seek_to(&mut self, seconds: f64) {
        self.player.seek_to(seconds);
    }

    fn set_volume(&mut self, volume: u32) {
        self.player.set_volume(volume);
    }

    fn keep_alive(&mut self) {
        self.player.keep_alive();
    }
}
