// Static local catalog
// A JSON document of tracks, read once at startup. Accepts either a bare
// array or `{ "tracks": [...] }`. Entries without an id get `custom-<n>`.

use serde_json::Value;
use std::path::Path;
use tracing::info;

use crate::error::CatalogError;
use crate::track::Track;

pub async fn load_catalog(path: &Path) -> Result<Vec<Track>, CatalogError> {
    let text = tokio::fs::read_to_string(path).await?;
    let body: Value = serde_json::from_str(&text)
        .map_err(|e| CatalogError::BadResponse(format!("{}: {}", path.display(), e)))?;

    let tracks = tracks_from_document(&body);
    info!(path = %path.display(), count = tracks.len(), "local catalog loaded");
    Ok(tracks)
}

pub fn tracks_from_document(body: &Value) -> Vec<Track> {
    let items = match body {
        Value::Array(items) => items.as_slice(),
        other => other
            .get("tracks")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]),
    };

    items
        .iter()
        .filter(|item| item.is_object())
        .enumerate()
        .map(|(idx, item)| {
            let mut track = Track::normalize(item);
            if track.id.is_empty() {
                track.id = format!("custom-{}", idx);
            }
            track
        })
        .collect()
}
