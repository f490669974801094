// Error types for the playback core
// Every failure here is recoverable: callers log it and degrade

use thiserror::Error;

// ==========================================
// CATALOG / NETWORK ERRORS
// ==========================================
// Failures talking to an external catalog, the profile store or the
// voice assistant backend.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected response: {0}")]
    BadResponse(String),

    #[error("Not configured: {0}")]
    NotConfigured(&'static str),

    #[error("yt-dlp failed: {0}")]
    Extractor(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// ==========================================
// PLAYBACK ERRORS
// ==========================================
// Failures from a media backend. `Blocked` and `NoOutputDevice` are the
// "playback refused" family: the track is selected but not audible.
#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("No audio output device available")]
    NoOutputDevice,

    #[error("Playback blocked: {0}")]
    Blocked(String),

    #[error("Nothing loaded")]
    NothingLoaded,

    #[error("Failed to fetch source: {0}")]
    Source(String),

    #[error("Audio decode failed: {0}")]
    Decode(String),
}

impl From<CatalogError> for PlaybackError {
    fn from(err: CatalogError) -> Self {
        PlaybackError::Source(err.to_string())
    }
}

// ==========================================
// LOCAL STATE ERRORS
// ==========================================
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
