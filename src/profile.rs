// User profile in the document database
// Read: favorite artists, languages and interest weights from users/<uid>.
// Write: one "recently played" entry plus +1 interest for artist and genre.
// Both are best-effort; callers log failures and move on.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::error::CatalogError;
use crate::firestore::{encode_value, quote_segment, FirestoreClient};
use crate::track::Track;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Preferences {
    pub favorite_artists: Vec<String>,
    pub selected_languages: Vec<String>,
    pub interest_weights: BTreeMap<String, f64>,
}

impl Preferences {
    // A profile without languages or artists has not been onboarded yet
    pub fn needs_onboarding(&self) -> bool {
        self.favorite_artists.is_empty() || self.selected_languages.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentPlay {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub image: Option<String>,
    pub played_at: i64,
    pub genre: Option<String>,
}

impl RecentPlay {
    pub fn new(track: &Track, genre: Option<String>, played_at: i64) -> Self {
        RecentPlay {
            id: track.id.clone(),
            title: track.title.clone(),
            artist: track.artist.clone(),
            image: track.image.clone(),
            played_at,
            genre,
        }
    }
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn load_preferences(&self, uid: &str) -> Result<Preferences, CatalogError>;
    async fn mirror_play(&self, uid: &str, play: &RecentPlay) -> Result<(), CatalogError>;
}

#[async_trait]
impl ProfileStore for FirestoreClient {
    async fn load_preferences(&self, uid: &str) -> Result<Preferences, CatalogError> {
        match self.get_document(&format!("users/{}", uid)).await? {
            Some(fields) => serde_json::from_value(fields)
                .map_err(|e| CatalogError::BadResponse(format!("user document: {}", e))),
            None => Ok(Preferences::default()),
        }
    }

    async fn mirror_play(&self, uid: &str, play: &RecentPlay) -> Result<(), CatalogError> {
        let document = self.document_name(&format!("users/{}", uid));
        self.commit(vec![play_transform(&document, play)]).await
    }
}

// The transform write for one play; the document must already exist
pub fn play_transform(document: &str, play: &RecentPlay) -> Value {
    let entry = serde_json::to_value(play).unwrap_or(Value::Null);
    let mut transforms = vec![json!({
        "fieldPath": "recentlyPlayed",
        "appendMissingElements": { "values": [encode_value(&entry)] }
    })];

    let mut bump = |key: &str| {
        let key = key.trim().to_lowercase();
        if !key.is_empty() {
            transforms.push(json!({
                "fieldPath": format!("interestWeights.{}", quote_segment(&key)),
                "increment": { "integerValue": "1" }
            }));
        }
    };
    bump(&play.artist);
    if let Some(genre) = &play.genre {
        bump(genre);
    }

    json!({
        "transform": { "document": document, "fieldTransforms": transforms },
        "currentDocument": { "exists": true }
    })
}
