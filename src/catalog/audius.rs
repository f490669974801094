// Audius catalog
// Trending tracks from the decentralized audio network. Streams are plain
// HTTP audio, so these always play on the native backend.

use serde_json::{json, Value};
use tracing::info;

use crate::catalog::json_body;
use crate::error::CatalogError;
use crate::track::Track;

const APP_NAME: &str = "discovery-player";

pub struct AudiusCatalog {
    http: reqwest::Client,
    base: String,
}

impl AudiusCatalog {
    pub fn new(http: reqwest::Client, base: &str) -> Self {
        AudiusCatalog {
            http,
            base: base.trim_end_matches('/').to_string(),
        }
    }

    pub async fn trending(&self, limit: usize) -> Result<Vec<Track>, CatalogError> {
        let response = self
            .http
            .get(format!("{}/tracks/trending", self.base))
            .query(&[("limit", limit.to_string().as_str()), ("app_name", APP_NAME)])
            .send()
            .await?;

        let body = json_body(response).await?;
        let tracks = tracks_from_listing(&self.base, &body);
        info!(count = tracks.len(), "Audius trending loaded");
        Ok(tracks)
    }

    pub async fn search(&self, query: &str) -> Result<Vec<Track>, CatalogError> {
        let response = self
            .http
            .get(format!("{}/tracks/search", self.base))
            .query(&[("query", query), ("app_name", APP_NAME)])
            .send()
            .await?;

        Ok(tracks_from_listing(&self.base, &json_body(response).await?))
    }
}

// `{ data: [ {id, title, user: {name, handle}, artwork: {...}} ] }`
pub fn tracks_from_listing(base: &str, body: &Value) -> Vec<Track> {
    let Some(items) = body.get("data").and_then(Value::as_array) else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let id = item.get("id")?.as_str()?;
            let artist = item
                .pointer("/user/name")
                .or_else(|| item.pointer("/user/handle"))
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .unwrap_or("Unknown");
            let image = item
                .pointer("/artwork/480x480")
                .or_else(|| item.pointer("/artwork/150x150"));

            Some(Track::normalize(&json!({
                "id": format!("audius-{}", id),
                "title": item.get("title"),
                "artist": artist,
                "image": image,
                "audio": format!("{}/tracks/{}/stream?app_name={}", base, id, APP_NAME),
                "language": "English",
                "category": "Audius",
            })))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::Category;

    #[test]
    fn maps_trending_items() {
        let body = json!({
            "data": [
                {
                    "id": "D7KyD",
                    "title": "Night Drive",
                    "user": { "name": "", "handle": "synthkid" },
                    "artwork": { "150x150": "https://cdn/150.jpg" }
                },
                { "title": "no id" }
            ]
        });

        let tracks = tracks_from_listing("https://api.audius.co/v1", &body);
        assert_eq!(tracks.len(), 1);
        let t = &tracks[0];
        assert_eq!(t.id, "audius-D7KyD");
        assert_eq!(t.artist, "synthkid");
        assert_eq!(t.category, Category::Audius);
        assert_eq!(t.image.as_deref(), Some("https://cdn/150.jpg"));
        assert_eq!(
            t.audio,
            "https://api.audius.co/v1/tracks/D7KyD/stream?app_name=discovery-player"
        );
    }
}
