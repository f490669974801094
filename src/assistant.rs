// Voice assistant backend
// Sends a free-text command, gets back a spoken reply and a structured
// action. The session decides what the action does to playback.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::catalog::json_body;
use crate::error::CatalogError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssistantAction {
    PlayDirect,
    #[serde(alias = "play_next")]
    AddToQueue,
    Pause,
    Resume,
    Next,
    Previous,
    Like,
    // Anything else: treated as play_direct when a song is attached
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssistantReply {
    #[serde(default)]
    pub reply: Option<String>,
    #[serde(default = "default_action")]
    pub action: AssistantAction,
    #[serde(default)]
    pub song: Option<Value>,
    #[serde(default)]
    pub queue: Option<Vec<Value>>,
}

fn default_action() -> AssistantAction {
    AssistantAction::Unknown
}

pub struct AssistantClient {
    http: reqwest::Client,
    command_url: String,
    like_url: Option<String>,
}

impl AssistantClient {
    pub fn new(http: reqwest::Client, command_url: &str, like_url: Option<String>) -> Self {
        AssistantClient {
            http,
            command_url: command_url.to_string(),
            like_url,
        }
    }

    pub async fn send(&self, command: &str) -> Result<AssistantReply, CatalogError> {
        let response = self
            .http
            .post(&self.command_url)
            .json(&json!({ "command": command }))
            .send()
            .await?;

        let body = json_body(response).await?;
        let reply: AssistantReply = serde_json::from_value(body)
            .map_err(|e| CatalogError::BadResponse(format!("assistant reply: {}", e)))?;
        info!(action = ?reply.action, "assistant replied");
        Ok(reply)
    }

    pub async fn like(&self, user_id: &str, song: &Value) -> Result<(), CatalogError> {
        let url = self
            .like_url
            .as_deref()
            .ok_or(CatalogError::NotConfigured("like endpoint"))?;
        let response = self
            .http
            .post(url)
            .json(&json!({ "userId": user_id, "song": song }))
            .send()
            .await?;
        json_body(response).await?;
        debug!(user_id, "song liked");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: Value) -> AssistantReply {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn parses_known_and_aliased_actions() {
        assert_eq!(parse(json!({ "action": "play_direct" })).action, AssistantAction::PlayDirect);
        assert_eq!(parse(json!({ "action": "play_next" })).action, AssistantAction::AddToQueue);
        assert_eq!(parse(json!({ "action": "previous" })).action, AssistantAction::Previous);
    }

    #[test]
    fn unknown_or_missing_action_is_unknown() {
        let reply = parse(json!({ "reply": "Sure!", "action": "dance", "song": { "title": "x" } }));
        assert_eq!(reply.action, AssistantAction::Unknown);
        assert_eq!(reply.reply.as_deref(), Some("Sure!"));
        assert!(reply.song.is_some());

        assert_eq!(parse(json!({})).action, AssistantAction::Unknown);
    }

    #[test]
    fn queue_payload_is_kept_raw() {
        let reply = parse(json!({ "action": "add_to_queue", "queue": [{ "title": "a" }, { "title": "b" }] }));
        assert_eq!(reply.queue.map(|q| q.len()), Some(2));
    }
}
