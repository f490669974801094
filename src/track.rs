// ==========================================
// TRACK MODEL + NORMALIZER
// ==========================================
// Every source (video search hit, database document, local catalog entry,
// voice assistant payload) hands us a loosely shaped JSON record. This module
// turns any of them into one canonical `Track`.
//
// The normalizer never fails: missing fields fall back to fixed defaults.
// Normalizing an already-normalized track gives the same track back.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub const UNKNOWN_TITLE: &str = "Unknown Title";
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";

/// Length of a video platform id, e.g. `dQw4w9WgXcQ`.
pub const VIDEO_ID_LEN: usize = 11;

const VIDEO_DOMAIN: &str = "youtube.com";

// ==========================================
// CATEGORY
// ==========================================
// Decides which playback backend renders the track.
// YouTube -> embedded video player, everything else -> native audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Local,
    YouTube,
    Audius,
    Misc,
}

impl Category {
    // Explicit category strings from sources. Unknown labels (e.g. "Anime"
    // from the local catalog) are kept playable as Misc.
    pub fn parse(label: &str) -> Category {
        match label.trim().to_ascii_lowercase().as_str() {
            "local" => Category::Local,
            "youtube" => Category::YouTube,
            "audius" => Category::Audius,
            _ => Category::Misc,
        }
    }

    pub fn is_embedded_video(self) -> bool {
        self == Category::YouTube
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Category::Local => "Local",
            Category::YouTube => "YouTube",
            Category::Audius => "Audius",
            Category::Misc => "Misc",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LyricLine {
    pub time: f64,
    pub line: String,
}

// ==========================================
// TRACK
// ==========================================
// `id` is prefixed by source (`yt-`, `firestore-`, `audius-`, `local-`,
// `melo-`) and is the dedup key everywhere downstream.
//
// `audio` may be empty: that means "no native stream", only the embedded
// player can render it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub image: Option<String>,
    pub audio: String,
    pub category: Category,
    pub video: Option<String>,
    pub channel_id: Option<String>,
    #[serde(default)]
    pub lyrics: Vec<LyricLine>,
    pub language: Option<String>,
}

impl Track {
    pub fn new(id: &str, title: &str, artist: &str, audio: &str, category: Category) -> Self {
        Track {
            id: id.to_string(),
            title: title.to_string(),
            artist: artist.to_string(),
            image: None,
            audio: audio.to_string(),
            category,
            video: None,
            channel_id: None,
            lyrics: Vec::new(),
            language: None,
        }
    }

    // ==========================================
    // NORMALIZE: generic source record
    // ==========================================
    // Resolution order per field (first non-empty wins):
    //   title    <- title, name, "Unknown Title"
    //   artist   <- artist, channelTitle, "Unknown Artist"
    //   image    <- image, thumbnail, thumbnails.high.url, none
    //   audio    <- audio, streamUrl, ""
    //   channel  <- channelId, snippet.channelId, artistChannelId, channel
    //   category <- category, else inferred from audio URL / id prefix
    pub fn normalize(record: &Value) -> Track {
        let id = id_field(record).unwrap_or_default();
        let audio = first_str(record, &[&["audio"], &["streamUrl"]]).unwrap_or_default();

        let category = match str_at(record, &["category"]) {
            Some(label) => Category::parse(&label),
            None => infer_category(&id, &audio),
        };

        Track {
            title: first_str(record, &[&["title"], &["name"]])
                .unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
            artist: first_str(record, &[&["artist"], &["channelTitle"]])
                .unwrap_or_else(|| UNKNOWN_ARTIST.to_string()),
            image: first_str(
                record,
                &[&["image"], &["thumbnail"], &["thumbnails", "high", "url"]],
            ),
            channel_id: first_str(
                record,
                &[
                    &["channelId"],
                    &["snippet", "channelId"],
                    &["artistChannelId"],
                    &["channel"],
                ],
            ),
            video: str_at(record, &["video"]),
            lyrics: lyrics_field(record),
            language: str_at(record, &["language"]),
            id,
            audio,
            category,
        }
    }

    // ==========================================
    // NORMALIZE: voice assistant payload
    // ==========================================
    // The assistant backend is looser than the catalogs: it may omit the id
    // entirely and hands raw video ids in `video_id`.
    pub fn from_assistant(record: &Value, now_ms: i64) -> Track {
        let id = id_field(record).unwrap_or_else(|| format!("melo-{}", now_ms));

        let category = str_at(record, &["category"])
            .map(|label| Category::parse(&label))
            .unwrap_or(Category::YouTube);

        let video = str_at(record, &["video"]).or_else(|| {
            str_at(record, &["video_id"]).map(|vid| {
                format!(
                    "https://www.youtube.com/embed/{}?autoplay=1&mute=1&controls=0",
                    vid
                )
            })
        });

        Track {
            id,
            title: str_at(record, &["title"]).unwrap_or_else(|| "Unknown Song".to_string()),
            artist: str_at(record, &["artist"]).unwrap_or_else(|| UNKNOWN_ARTIST.to_string()),
            image: first_str(record, &[&["image"], &["thumbnail"]]),
            audio: first_str(record, &[&["audio"], &["url"]]).unwrap_or_default(),
            category,
            video,
            channel_id: str_at(record, &["channelId"]),
            lyrics: lyrics_field(record),
            language: str_at(record, &["language"]),
        }
    }

    /// Lower-cased artist, the listening memory key.
    pub fn artist_key(&self) -> String {
        crate::memory::key_for(&self.artist)
    }

    // ==========================================
    // SOURCE ID EXTRACTION
    // ==========================================
    // Recovers the video platform id for embedded playback:
    //   firestore-<id>  only when the remainder is exactly 11 chars
    //   yt-<id>         remainder as-is (validated by the caller)
    //   <id>            a bare 11-char id
    //   ...?v=<id>      from the audio or video URL
    pub fn video_id(&self) -> Option<String> {
        if let Some(rest) = self.id.strip_prefix("firestore-") {
            if rest.chars().count() == VIDEO_ID_LEN {
                return Some(rest.to_string());
            }
        }

        if let Some(rest) = self.id.strip_prefix("yt-") {
            return Some(rest.to_string());
        }

        if self.id.chars().count() == VIDEO_ID_LEN {
            return Some(self.id.clone());
        }

        let url = if !self.audio.is_empty() {
            self.audio.as_str()
        } else {
            self.video.as_deref().unwrap_or("")
        };
        video_id_from_url(url)
    }

    /// `video_id` filtered to the platform's id format.
    pub fn valid_video_id(&self) -> Option<String> {
        self.video_id()
            .filter(|vid| vid.chars().count() == VIDEO_ID_LEN)
    }
}

fn infer_category(id: &str, audio: &str) -> Category {
    if audio.contains(VIDEO_DOMAIN) || id.starts_with("yt-") || id.starts_with("firestore-") {
        Category::YouTube
    } else {
        Category::Local
    }
}

fn is_video_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

// Finds `?v=` or `&v=` followed by 11 id characters
pub fn video_id_from_url(url: &str) -> Option<String> {
    for marker in ["?v=", "&v="] {
        let mut search = url;
        while let Some(pos) = search.find(marker) {
            let candidate: String = search[pos + marker.len()..]
                .chars()
                .take(VIDEO_ID_LEN)
                .collect();
            if candidate.chars().count() == VIDEO_ID_LEN && candidate.chars().all(is_video_id_char) {
                return Some(candidate);
            }
            search = &search[pos + marker.len()..];
        }
    }
    None
}

// ==========================================
// FIELD HELPERS
// ==========================================

fn str_at(record: &Value, path: &[&str]) -> Option<String> {
    let mut node = record;
    for key in path {
        node = node.get(key)?;
    }
    node.as_str()
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

fn first_str(record: &Value, paths: &[&[&str]]) -> Option<String> {
    paths.iter().find_map(|path| str_at(record, path))
}

// Ids arrive as strings or numbers depending on the source
fn id_field(record: &Value) -> Option<String> {
    match record.get("id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn lyrics_field(record: &Value) -> Vec<LyricLine> {
    record
        .get("lyrics")
        .and_then(Value::as_array)
        .map(|lines| {
            lines
                .iter()
                .filter_map(|l| serde_json::from_value::<LyricLine>(l.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}
