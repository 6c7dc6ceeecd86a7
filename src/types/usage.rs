//! Token usage reported by the model.

use serde::{Deserialize, Serialize};

/// Token accounting attached to a response.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: u32,
    #[serde(default)]
    pub candidates_token_count: u32,
    #[serde(default)]
    pub total_token_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_content_token_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thoughts_token_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use_prompt_token_count: Option<u32>,
}

impl UsageMetadata {
    /// Merge another usage into this one (accumulate).
    pub fn merge(&mut self, other: &UsageMetadata) {
        self.prompt_token_count += other.prompt_token_count;
        self.candidates_token_count += other.candidates_token_count;
        self.total_token_count += other.total_token_count;
        if let Some(v) = other.cached_content_token_count {
            *self.cached_content_token_count.get_or_insert(0) += v;
        }
        if let Some(v) = other.thoughts_token_count {
            *self.thoughts_token_count.get_or_insert(0) += v;
        }
        if let Some(v) = other.tool_use_prompt_token_count {
            *self.tool_use_prompt_token_count.get_or_insert(0) += v;
        }
    }
}
