// YouTube audio extractor
// Uses the yt-dlp subprocess to fetch the audio of a video into a local cache

use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::CatalogError;

pub struct YouTubeExtractor {
    cache_dir: PathBuf,
}

impl YouTubeExtractor {
    pub fn new(cache_dir: PathBuf) -> Self {
        YouTubeExtractor { cache_dir }
    }

    pub fn watch_url(video_id: &str) -> String {
        format!("https://www.youtube.com/watch?v={}", video_id)
    }

    fn cached_path(&self, video_id: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.mp3", video_id))
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    // Downloads (or reuses) the best audio stream as mp3 and returns its path
    pub async fn download_audio(&self, video_id: &str) -> Result<PathBuf, CatalogError> {
        let path = self.cached_path(video_id);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            debug!(video_id, "audio cache hit");
            return Ok(path);
        }

        tokio::fs::create_dir_all(&self.cache_dir).await?;
        let template = self.cache_dir.join(format!("{}.%(ext)s", video_id));

        info!(video_id, "fetching audio with yt-dlp");
        let output = Command::new("yt-dlp")
            .arg("-f")
            .arg("bestaudio/best") // Fallback to best if bestaudio not available
            .arg("-x")
            .arg("--audio-format")
            .arg("mp3")
            .arg("--no-playlist")
            .arg("--no-progress")
            .arg("-o")
            .arg(&template)
            .arg(Self::watch_url(video_id))
            .output()
            .await
            .map_err(|e| CatalogError::Extractor(format!("failed to run yt-dlp: {}. Is yt-dlp installed?", e)))?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            return Err(CatalogError::Extractor(error.trim().to_string()));
        }

        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(CatalogError::Extractor(format!(
                "yt-dlp finished but {} is missing",
                path.display()
            )));
        }

        Ok(path)
    }
}
