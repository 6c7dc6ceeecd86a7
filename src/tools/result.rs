//! What a tool hands back after executing.

use serde::{Deserialize, Serialize};

use crate::types::Part;

/// Content destined for the model.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolContent {
    Text(String),
    Parts(Vec<Part>),
}

impl From<String> for ToolContent {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for ToolContent {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Vec<Part>> for ToolContent {
    fn from(parts: Vec<Part>) -> Self {
        Self::Parts(parts)
    }
}

/// Content destined for the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultDisplay {
    Text(String),
    FileDiff {
        file_name: String,
        file_diff: String,
        original_content: Option<String>,
        new_content: String,
    },
}

impl ResultDisplay {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }
}

/// Result of one tool execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub llm_content: ToolContent,
    pub display: Option<ResultDisplay>,
    /// Set when the tool ran but failed; the call then ends in `Error`.
    pub error: Option<String>,
}

impl ToolResult {
    pub fn new(llm_content: impl Into<ToolContent>) -> Self {
        Self {
            llm_content: llm_content.into(),
            display: None,
            error: None,
        }
    }

    pub fn with_display(mut self, display: ResultDisplay) -> Self {
        self.display = Some(display);
        self
    }

    /// A handled failure: the model sees `message`.
    pub fn failed(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            llm_content: ToolContent::Text(message.clone()),
            display: None,
            error: Some(message),
        }
    }
}
