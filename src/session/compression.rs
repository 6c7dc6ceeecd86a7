//! History compression.
//!
//! When the history nears the model's context window, everything before a
//! split point is summarised by the model into a `<state_snapshot>` and
//! replaced by that summary. The split point always sits on a plain user
//! message, so a function call is never separated from its response.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::chat::ChatSession;
use crate::config::StewardConfig;
use crate::error::{Result, StewardError};
use crate::models::token_limit;
use crate::provider::ContentGenerator;
use crate::types::{Content, CountTokensRequest, GenerateContentConfig, Part, Role};

const COMPRESSION_REQUEST: &str =
    "First, reason in your scratchpad. Then, generate the <state_snapshot>.";
const COMPRESSION_ACK: &str = "Got it. Thanks for the additional context!";

/// Token counts before and after a compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatCompressionInfo {
    pub original_token_count: u64,
    pub new_token_count: u64,
}

/// System instruction used for the summarisation request.
pub fn compression_prompt() -> &'static str {
    r#"You are the component that condenses a long conversation between a user and a coding agent into a structured snapshot of its state.

The snapshot replaces the whole conversation so far. The agent will continue working from it alone, so every fact, decision, file path and open task that matters for the work must survive. Drop pleasantries, dead ends and anything already superseded.

Before answering, think through the conversation in a private <scratchpad>: what the user is ultimately after, what the agent has learned, which files it touched and how, and what it was about to do next.

Then emit exactly one <state_snapshot> XML block with this structure:

<state_snapshot>
    <overall_goal>
        <!-- One sentence describing the user's high-level objective. -->
    </overall_goal>

    <key_knowledge>
        <!-- Bullet list of facts, conventions and constraints the agent must remember: build commands, test commands, API details, user preferences. -->
    </key_knowledge>

    <file_system_state>
        <!-- Files created, read, modified or deleted, with what was learned or changed in each. -->
    </file_system_state>

    <recent_actions>
        <!-- The last significant actions taken and their outcomes. Facts only. -->
    </recent_actions>

    <current_plan>
        <!-- Numbered steps of the plan, each marked [DONE], [IN PROGRESS] or [TODO]. -->
    </current_plan>
</state_snapshot>"#
}

/// Index of the first entry at which the cumulative serialized size reaches
/// `fraction` of the total. Returns `history.len()` if it is never reached.
pub fn find_index_after_fraction(history: &[Content], fraction: f64) -> Result<usize> {
    if fraction <= 0.0 || fraction >= 1.0 {
        return Err(StewardError::InvalidArgument(
            "Fraction must be between 0 and 1".into(),
        ));
    }
    let lengths: Vec<usize> = history
        .iter()
        .map(|content| serde_json::to_string(content).map(|s| s.len()))
        .collect::<std::result::Result<_, _>>()?;
    let total: usize = lengths.iter().sum();
    let target = total as f64 * fraction;

    let mut so_far = 0usize;
    for (index, length) in lengths.iter().enumerate() {
        so_far += length;
        if so_far as f64 >= target {
            return Ok(index);
        }
    }
    Ok(history.len())
}

fn is_plain_user_message(content: &Content) -> bool {
    content.role == Role::User
        && !content
            .parts
            .iter()
            .any(|part| part.as_function_response().is_some())
}

/// Where to split `history` so that roughly `fraction` of it is compressed.
///
/// Walks backward from the fraction point to the nearest plain user message,
/// then forward if there is none. `history.len()` means compress everything.
pub fn find_compress_split_point(history: &[Content], fraction: f64) -> Result<usize> {
    let start = find_index_after_fraction(history, fraction)?;
    if let Some(index) = (1..=start.min(history.len().saturating_sub(1)))
        .rev()
        .find(|&i| is_plain_user_message(&history[i]))
    {
        return Ok(index);
    }
    Ok((start..history.len())
        .find(|&i| i > 0 && is_plain_user_message(&history[i]))
        .unwrap_or(history.len()))
}

fn serialized_len(history: &[Content]) -> usize {
    history
        .iter()
        .map(|content| serde_json::to_string(content).map_or(0, |s| s.len()))
        .sum()
}

/// Scale `original_tokens` by how much the serialized history shrank.
fn estimate_token_count(original_tokens: u64, before: &[Content], after: &[Content]) -> u64 {
    let before_len = serialized_len(before);
    if before_len == 0 {
        return original_tokens;
    }
    let ratio = serialized_len(after) as f64 / before_len as f64;
    (original_tokens as f64 * ratio).round() as u64
}

async fn count_tokens(
    generator: &dyn ContentGenerator,
    model: &str,
    contents: Vec<Content>,
) -> Option<u64> {
    let request = CountTokensRequest {
        model: model.to_string(),
        contents,
    };
    match generator.count_tokens(&request).await {
        Ok(response) => response.total_tokens,
        Err(err) => {
            warn!(model, error = %err, "Token counting failed");
            None
        }
    }
}

/// Compress the chat history if it is large enough (or `force` is set).
///
/// Returns `Ok(None)` when nothing was compressed, including when token
/// counts are unavailable.
pub async fn try_compress_chat(
    chat: &ChatSession,
    generator: &dyn ContentGenerator,
    config: &StewardConfig,
    prompt_id: &str,
    force: bool,
) -> Result<Option<ChatCompressionInfo>> {
    let curated = chat.history(true);
    if curated.is_empty() {
        return Ok(None);
    }

    let model = config.model();
    let Some(original_token_count) = count_tokens(generator, &model, curated.clone()).await else {
        let err = StewardError::TokenLimitUnknown(model.clone());
        warn!(error = %err, "Skipping chat compression");
        return Ok(None);
    };

    let limit = token_limit(&model) as f64;
    if !force && (original_token_count as f64) < config.compression_threshold() * limit {
        return Ok(None);
    }

    let split = find_compress_split_point(&curated, 1.0 - config.compression_preserve_fraction())?;
    if split == 0 {
        return Ok(None);
    }
    let to_keep = curated[split..].to_vec();
    debug!(
        original_token_count,
        compressed = split,
        kept = to_keep.len(),
        "Compressing chat history"
    );

    chat.set_history(curated[..split].to_vec());
    let overrides = GenerateContentConfig {
        system_instruction: Some(Content::user_text(compression_prompt())),
        ..Default::default()
    };
    let summary = match chat
        .send_message(vec![Part::text(COMPRESSION_REQUEST)], Some(&overrides), prompt_id)
        .await
    {
        Ok(response) => response.text().unwrap_or_default(),
        Err(err) => {
            chat.set_history(curated);
            return Err(err);
        }
    };

    let mut new_history = Vec::with_capacity(to_keep.len() + 2);
    new_history.push(Content::user_text(summary));
    new_history.push(Content::model_text(COMPRESSION_ACK));
    new_history.extend(to_keep);
    chat.set_history(new_history.clone());

    let new_token_count = match count_tokens(generator, &model, new_history.clone()).await {
        Some(count) => count,
        None => {
            let estimate = estimate_token_count(original_token_count, &curated, &new_history);
            warn!(
                estimate,
                "Could not count compressed history tokens, estimating from its size"
            );
            estimate
        }
    };

    Ok(Some(ChatCompressionInfo {
        original_token_count,
        new_token_count,
    }))
}
