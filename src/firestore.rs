// ==========================================
// DOCUMENT DATABASE CLIENT
// ==========================================
// Minimal Firestore REST client:
// - get one document (users/<uid>)
// - list a collection (songs)
// - commit field transforms (append to array, increment counters)
//
// Firestore wraps every value in a typed envelope
// ({"stringValue": ..}, {"mapValue": {"fields": ..}}); `decode_value` and
// `encode_value` translate between that and plain JSON.

use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::catalog::extractor::YouTubeExtractor;
use crate::catalog::json_body;
use crate::error::CatalogError;
use crate::track::{Track, VIDEO_ID_LEN};

const API_BASE: &str = "https://firestore.googleapis.com/v1";
const PAGE_SIZE: u32 = 300;

pub struct FirestoreClient {
    http: reqwest::Client,
    project: String,
    token: Option<String>,
    base: String,
}

impl FirestoreClient {
    pub fn new(http: reqwest::Client, project: &str, token: Option<String>) -> Self {
        FirestoreClient {
            http,
            project: project.to_string(),
            token,
            base: API_BASE.to_string(),
        }
    }

    // projects/<p>/databases/(default)/documents
    fn root(&self) -> String {
        format!("projects/{}/databases/(default)/documents", self.project)
    }

    pub(crate) fn document_name(&self, path: &str) -> String {
        format!("{}/{}", self.root(), path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    // Returns the decoded fields, or None when the document does not exist
    pub async fn get_document(&self, path: &str) -> Result<Option<Value>, CatalogError> {
        let url = format!("{}/{}", self.base, self.document_name(path));
        let response = self.authorize(self.http.get(&url)).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            debug!(path, "document not found");
            return Ok(None);
        }

        let body = json_body(response).await?;
        Ok(Some(decode_fields(body.get("fields"))))
    }

    // (document id, decoded fields) for every document in the collection
    pub async fn list_documents(&self, collection: &str) -> Result<Vec<(String, Value)>, CatalogError> {
        let url = format!("{}/{}/{}", self.base, self.root(), collection);
        let mut documents = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.http.get(&url).query(&[("pageSize", PAGE_SIZE)]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }
            let body = json_body(self.authorize(request).send().await?).await?;

            for doc in body.get("documents").and_then(Value::as_array).into_iter().flatten() {
                let Some(name) = doc.get("name").and_then(Value::as_str) else {
                    continue;
                };
                let id = name.rsplit('/').next().unwrap_or(name).to_string();
                documents.push((id, decode_fields(doc.get("fields"))));
            }

            page_token = body
                .get("nextPageToken")
                .and_then(Value::as_str)
                .map(str::to_string);
            if page_token.is_none() {
                break;
            }
        }

        Ok(documents)
    }

    pub async fn commit(&self, writes: Vec<Value>) -> Result<(), CatalogError> {
        let url = format!("{}/{}:commit", self.base, self.root());
        let response = self
            .authorize(self.http.post(&url))
            .json(&json!({ "writes": writes }))
            .send()
            .await?;
        json_body(response).await?;
        Ok(())
    }

    // The shared `songs` collection, as YouTube-category tracks
    pub async fn songs(&self) -> Result<Vec<Track>, CatalogError> {
        let documents = self.list_documents("songs").await?;
        let tracks: Vec<Track> = documents
            .iter()
            .map(|(id, fields)| song_to_track(id, fields))
            .collect();
        info!(count = tracks.len(), "songs collection loaded");
        Ok(tracks)
    }
}

// ==========================================
// SONG DOCUMENTS
// ==========================================
// id       -> firestore-<docId>
// video id -> videoId, youtubeId, or the `vi/<id>` segment of the thumbnail
// image    -> image, else the video's hqdefault thumbnail
// audio    -> watch URL when a video id is known, else empty
pub fn song_to_track(doc_id: &str, fields: &Value) -> Track {
    let text = |key: &str| {
        fields
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let image = text("image");
    let video_id = text("videoId")
        .or_else(|| text("youtubeId"))
        .or_else(|| image.as_deref().and_then(thumbnail_video_id));

    let image = image.or_else(|| {
        video_id
            .as_ref()
            .map(|vid| format!("https://i.ytimg.com/vi/{}/hqdefault.jpg", vid))
    });
    let audio = video_id
        .as_deref()
        .map(YouTubeExtractor::watch_url)
        .unwrap_or_default();

    Track::normalize(&json!({
        "id": format!("firestore-{}", doc_id),
        "title": text("title").unwrap_or_else(|| "Unknown".to_string()),
        "artist": text("artist").unwrap_or_else(|| "Unknown".to_string()),
        "image": image,
        "audio": audio,
        "lyrics": fields.get("lyrics"),
        "language": text("language").unwrap_or_else(|| "English".to_string()),
        "category": "YouTube",
    }))
}

fn thumbnail_video_id(url: &str) -> Option<String> {
    let start = url.find("vi/")? + 3;
    let candidate: String = url[start..].chars().take(VIDEO_ID_LEN).collect();
    let valid = candidate.chars().count() == VIDEO_ID_LEN
        && candidate
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    valid.then_some(candidate)
}

// ==========================================
// VALUE ENCODING
// ==========================================

pub fn decode_fields(fields: Option<&Value>) -> Value {
    let mut out = Map::new();
    if let Some(Value::Object(fields)) = fields {
        for (key, value) in fields {
            out.insert(key.clone(), decode_value(value));
        }
    }
    Value::Object(out)
}

pub fn decode_value(value: &Value) -> Value {
    let Value::Object(envelope) = value else {
        return Value::Null;
    };
    let Some((kind, inner)) = envelope.iter().next() else {
        return Value::Null;
    };

    match kind.as_str() {
        "stringValue" | "timestampValue" | "referenceValue" | "booleanValue" | "doubleValue" => {
            inner.clone()
        }
        // int64 travels as a string
        "integerValue" => inner
            .as_str()
            .and_then(|s| s.parse::<i64>().ok())
            .map(Value::from)
            .unwrap_or_else(|| inner.clone()),
        "arrayValue" => Value::Array(
            inner
                .get("values")
                .and_then(Value::as_array)
                .map(|values| values.iter().map(decode_value).collect())
                .unwrap_or_default(),
        ),
        "mapValue" => decode_fields(inner.get("fields")),
        _ => Value::Null,
    }
}

pub fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => match n.as_i64() {
            Some(i) => json!({ "integerValue": i.to_string() }),
            None => json!({ "doubleValue": n.as_f64() }),
        },
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => {
            json!({ "arrayValue": { "values": items.iter().map(encode_value).collect::<Vec<_>>() } })
        }
        Value::Object(map) => {
            let fields: Map<String, Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), encode_value(v)))
                .collect();
            json!({ "mapValue": { "fields": fields } })
        }
    }
}

// Quotes one segment of a field path so artist names with spaces or dots
// stay a single key: interestWeights.`the weeknd`
pub fn quote_segment(segment: &str) -> String {
    format!("`{}`", segment.replace('\\', "\\\\").replace('`', "\\`"))
}
