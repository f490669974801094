// YouTube Data API catalog
// Free-text search and "related to this video" lookups. Every result is
// junk-filtered on its title and normalized into a YouTube-category Track.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::catalog::extractor::YouTubeExtractor;
use crate::catalog::{is_junk, json_body, RelatedSource};
use crate::error::CatalogError;
use crate::track::Track;

const API_BASE: &str = "https://www.googleapis.com/youtube/v3";

pub const SEARCH_LIMIT: u32 = 15;
pub const RELATED_LIMIT: u32 = 20;

pub struct YouTubeCatalog {
    http: reqwest::Client,
    api_key: String,
    base: String,
}

impl YouTubeCatalog {
    pub fn new(http: reqwest::Client, api_key: String) -> Self {
        YouTubeCatalog {
            http,
            api_key,
            base: API_BASE.to_string(),
        }
    }

    pub fn with_base(mut self, base: &str) -> Self {
        self.base = base.trim_end_matches('/').to_string();
        self
    }

    pub async fn search(&self, query: &str) -> Result<Vec<Track>, CatalogError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .http
            .get(format!("{}/search", self.base))
            .query(&[
                ("part", "snippet"),
                ("type", "video"),
                ("q", query),
                ("key", self.api_key.as_str()),
            ])
            .query(&[("maxResults", SEARCH_LIMIT)])
            .send()
            .await?;

        let tracks = tracks_from_search(&json_body(response).await?);
        info!(query, results = tracks.len(), "YouTube search");
        Ok(tracks)
    }

    pub async fn related_to(&self, video_id: &str) -> Result<Vec<Track>, CatalogError> {
        let response = self
            .http
            .get(format!("{}/search", self.base))
            .query(&[
                ("part", "snippet"),
                ("type", "video"),
                ("relatedToVideoId", video_id),
                ("key", self.api_key.as_str()),
            ])
            .query(&[("maxResults", RELATED_LIMIT)])
            .send()
            .await?;

        let tracks = tracks_from_search(&json_body(response).await?);
        debug!(video_id, results = tracks.len(), "related videos");
        Ok(tracks)
    }
}

#[async_trait]
impl RelatedSource for YouTubeCatalog {
    async fn related(&self, video_id: &str) -> Result<Vec<Track>, CatalogError> {
        self.related_to(video_id).await
    }
}

// Maps a `search.list` response body. Items without a video id (channels,
// playlists) and junk titles are dropped.
pub fn tracks_from_search(body: &Value) -> Vec<Track> {
    let Some(items) = body.get("items").and_then(Value::as_array) else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let video_id = item.pointer("/id/videoId")?.as_str()?;
            let snippet = item.get("snippet")?;
            let title = snippet.get("title").and_then(Value::as_str).unwrap_or("");
            if is_junk(title) {
                return None;
            }

            Some(Track::normalize(&json!({
                "id": format!("yt-{}", video_id),
                "title": title,
                "artist": snippet.get("channelTitle"),
                "image": snippet.pointer("/thumbnails/medium/url"),
                "audio": YouTubeExtractor::watch_url(video_id),
                "channelId": snippet.get("channelId"),
                "language": "English",
                "category": "YouTube",
            })))
        })
        .collect()
}
