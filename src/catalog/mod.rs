// Track catalogs: everything that turns an external listing into Tracks
//
// - youtube:   Data API search + "related to this video" lookup
// - audius:    trending list from the decentralized catalog
// - local:     static JSON document loaded at startup
// - extractor: yt-dlp audio download used by the embedded player

pub mod audius;
pub mod extractor;
pub mod local;
pub mod youtube;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;

use crate::error::CatalogError;
use crate::track::Track;

// Titles containing any of these (case-insensitive) never become tracks
pub const JUNK_KEYWORDS: &[&str] = &[
    "shorts",
    "#shorts",
    "clip",
    "funny",
    "trending",
    "edit",
    "scene",
    "teaser",
    "trailer",
    "reaction",
    "meme",
    "challenge",
    "prank",
    "asmr",
    "vlog",
    "episode",
    "live",
    "durian",
];

pub fn is_junk(title: &str) -> bool {
    let title = title.to_lowercase();
    JUNK_KEYWORDS.iter().any(|word| title.contains(word))
}

// ==========================================
// RELATED SOURCE
// ==========================================
// "More like this video": feeds tier 1 of autoplay and the next-up prefetch.
#[async_trait]
pub trait RelatedSource: Send + Sync {
    async fn related(&self, video_id: &str) -> Result<Vec<Track>, CatalogError>;
}

// ==========================================
// KNOWN-TRACK POOL
// ==========================================
// Appends tracks whose id is not in the pool yet; returns how many were new.
pub fn merge_into_pool(pool: &mut Vec<Track>, tracks: Vec<Track>) -> usize {
    let mut seen: HashSet<String> = pool.iter().map(|t| t.id.clone()).collect();
    let before = pool.len();
    pool.extend(
        tracks
            .into_iter()
            .filter(|t| !t.id.is_empty() && seen.insert(t.id.clone())),
    );
    pool.len() - before
}

// Status check + JSON body, shared by the HTTP catalogs
pub(crate) async fn json_body(response: reqwest::Response) -> Result<Value, CatalogError> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(CatalogError::BadResponse(format!("{}: {}", status, text.trim())));
    }
    Ok(response.json().await?)
}
