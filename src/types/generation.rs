//! Request and response shapes of the model transport.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::content::{Content, FunctionCall, Part};
use super::usage::UsageMetadata;

/// Declaration of a callable function advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Per-request generation settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<FunctionDeclaration>,
}

impl GenerateContentConfig {
    /// Overlay the fields set in `other` on top of `self`.
    pub fn merged_with(&self, other: &GenerateContentConfig) -> GenerateContentConfig {
        GenerateContentConfig {
            system_instruction: other
                .system_instruction
                .clone()
                .or_else(|| self.system_instruction.clone()),
            temperature: other.temperature.or(self.temperature),
            top_p: other.top_p.or(self.top_p),
            max_output_tokens: other.max_output_tokens.or(self.max_output_tokens),
            response_mime_type: other
                .response_mime_type
                .clone()
                .or_else(|| self.response_mime_type.clone()),
            response_schema: other
                .response_schema
                .clone()
                .or_else(|| self.response_schema.clone()),
            tools: if other.tools.is_empty() {
                self.tools.clone()
            } else {
                other.tools.clone()
            },
        }
    }
}

/// A full request to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateContentRequest {
    pub model: String,
    pub contents: Vec<Content>,
    pub config: GenerateContentConfig,
}

/// Why the model stopped producing a candidate.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum FinishReason {
    FinishReasonUnspecified,
    Stop,
    MaxTokens,
    Safety,
    Recitation,
    Language,
    Blocklist,
    ProhibitedContent,
    Spii,
    MalformedFunctionCall,
    #[serde(other)]
    Other,
}

/// One candidate of a model response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
}

/// A complete response, or one chunk of a streamed response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_metadata: Option<UsageMetadata>,
}

impl GenerateContentResponse {
    /// Build a single-candidate response from parts.
    pub fn from_parts(parts: Vec<Part>, finish_reason: Option<FinishReason>) -> Self {
        Self {
            candidates: vec![Candidate {
                content: Some(Content::model(parts)),
                finish_reason,
                index: Some(0),
            }],
            usage_metadata: None,
        }
    }

    /// Parts of the first candidate.
    pub fn parts(&self) -> &[Part] {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.as_slice())
            .unwrap_or(&[])
    }

    /// Visible text of the first candidate; `None` when there is none.
    pub fn text(&self) -> Option<String> {
        let text = self
            .parts()
            .iter()
            .filter(|part| !part.thought)
            .filter_map(Part::as_text)
            .collect::<Vec<_>>()
            .join("");
        (!text.is_empty()).then_some(text)
    }

    /// Function calls of the first candidate, in order.
    pub fn function_calls(&self) -> Vec<&FunctionCall> {
        self.parts()
            .iter()
            .filter_map(Part::as_function_call)
            .collect()
    }

    /// Finish reason of the first candidate.
    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.candidates.first().and_then(|c| c.finish_reason)
    }
}

/// Token counting request.
#[derive(Debug, Clone, PartialEq)]
pub struct CountTokensRequest {
    pub model: String,
    pub contents: Vec<Content>,
}

/// Token counting response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CountTokensResponse {
    #[serde(default)]
    pub total_tokens: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_finish_reasons_deserialize_as_other() {
        let reason: FinishReason = serde_json::from_str("\"IMAGE_SAFETY\"").unwrap();
        assert_eq!(reason, FinishReason::Other);
        let reason: FinishReason = serde_json::from_str("\"MAX_TOKENS\"").unwrap();
        assert_eq!(reason, FinishReason::MaxTokens);
        assert_eq!(FinishReason::Safety.to_string(), "SAFETY");
    }

    #[test]
    fn response_text_skips_thoughts() {
        let response = GenerateContentResponse::from_parts(
            vec![Part::thought("thinking"), Part::text("a"), Part::text("b")],
            None,
        );
        assert_eq!(response.text().as_deref(), Some("ab"));
        assert!(GenerateContentResponse::default().text().is_none());
    }

    #[test]
    fn merged_config_prefers_overrides() {
        let base = GenerateContentConfig {
            temperature: Some(0.0),
            top_p: Some(1.0),
            ..Default::default()
        };
        let merged = base.merged_with(&GenerateContentConfig {
            temperature: Some(0.5),
            ..Default::default()
        });
        assert_eq!(merged.temperature, Some(0.5));
        assert_eq!(merged.top_p, Some(1.0));
    }
}
