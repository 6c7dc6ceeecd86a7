//! Deciding who speaks after a model turn without tool calls.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::Display;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::chat::ChatSession;
use super::client::ModelClient;
use crate::models::DEFAULT_GEMINI_FLASH_MODEL;
use crate::types::{Content, Role};

const CHECK_PROMPT: &str = r#"Look only at your own most recent reply in this conversation and decide who should talk next: the 'user' or the 'model' (you).

Apply these rules in order:
1. If your reply announces something you are about to do yourself ("Next I will...", "Now let me check...") or stops mid-thought, the 'model' speaks next.
2. If your reply ends with a question addressed to the user, the 'user' speaks next.
3. Otherwise your reply finished a thought or a task and is waiting for a reaction, so the 'user' speaks next.

Answer with JSON matching the provided schema and nothing else."#;

/// Who should produce the next message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NextSpeaker {
    User,
    Model,
}

#[derive(Debug, Deserialize)]
struct NextSpeakerResponse {
    #[allow(dead_code)]
    #[serde(default)]
    reasoning: String,
    next_speaker: NextSpeaker,
}

/// Collaborator consulted after a tool-free turn. `None` means "no opinion"
/// and ends the exchange.
#[async_trait]
pub trait NextSpeakerChecker: Send + Sync {
    async fn check(&self, chat: &ChatSession, token: &CancellationToken) -> Option<NextSpeaker>;
}

/// Decides from the history shape where possible and asks the flash model otherwise.
pub struct ModelNextSpeakerChecker {
    client: Arc<ModelClient>,
}

impl ModelNextSpeakerChecker {
    pub fn new(client: Arc<ModelClient>) -> Self {
        Self { client }
    }

    fn response_schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "reasoning": {
                    "type": "string",
                    "description": "Which rule applied and why."
                },
                "next_speaker": {
                    "type": "string",
                    "enum": ["user", "model"],
                    "description": "Who talks next."
                }
            },
            "required": ["reasoning", "next_speaker"]
        })
    }
}

/// Answers that follow from the history alone, without asking the model.
pub(crate) fn next_speaker_from_history(
    curated: &[Content],
    comprehensive: &[Content],
) -> Option<Option<NextSpeaker>> {
    if curated.is_empty() {
        return Some(None);
    }
    let Some(last) = comprehensive.last() else {
        return Some(None);
    };
    if last.is_function_response() {
        return Some(Some(NextSpeaker::Model));
    }
    if last.role == Role::Model && last.parts.is_empty() {
        return Some(Some(NextSpeaker::Model));
    }
    match curated.last() {
        Some(content) if content.role == Role::Model => None,
        _ => Some(None),
    }
}

#[async_trait]
impl NextSpeakerChecker for ModelNextSpeakerChecker {
    async fn check(&self, chat: &ChatSession, token: &CancellationToken) -> Option<NextSpeaker> {
        let curated = chat.history(true);
        let comprehensive = chat.history(false);
        if let Some(decided) = next_speaker_from_history(&curated, &comprehensive) {
            return decided;
        }

        let mut contents = curated;
        contents.push(Content::user_text(CHECK_PROMPT));
        let value = match self
            .client
            .generate_json(
                contents,
                Self::response_schema(),
                token,
                Some(DEFAULT_GEMINI_FLASH_MODEL),
            )
            .await
        {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, "Failed to determine next speaker");
                return None;
            }
        };
        match serde_json::from_value::<NextSpeakerResponse>(value) {
            Ok(response) => Some(response.next_speaker),
            Err(err) => {
                warn!(error = %err, "Next speaker response did not match the schema");
                None
            }
        }
    }
}
