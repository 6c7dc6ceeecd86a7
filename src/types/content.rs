//! Conversation content: roles, parts, function calls and responses.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// A single entry of conversation history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Content {
    pub role: Role,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    /// Create a user entry.
    pub fn user(parts: Vec<Part>) -> Self {
        Self {
            role: Role::User,
            parts,
        }
    }

    /// Create a model entry.
    pub fn model(parts: Vec<Part>) -> Self {
        Self {
            role: Role::Model,
            parts,
        }
    }

    /// Create a user entry holding a single text part.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::user(vec![Part::text(text)])
    }

    /// Create a model entry holding a single text part.
    pub fn model_text(text: impl Into<String>) -> Self {
        Self::model(vec![Part::text(text)])
    }

    /// Concatenate the non-thought text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter(|part| !part.thought)
            .filter_map(Part::as_text)
            .collect::<Vec<_>>()
            .join("")
    }

    /// A user entry whose every part is a function response.
    pub fn is_function_response(&self) -> bool {
        self.role == Role::User
            && !self.parts.is_empty()
            && self.parts.iter().all(|part| part.as_function_response().is_some())
    }

    /// A model entry containing at least one function call.
    pub fn has_function_call(&self) -> bool {
        self.role == Role::Model && self.parts.iter().any(|part| part.as_function_call().is_some())
    }
}

/// Conversation role.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// A single part of content.
///
/// The payload is a closed variant; `thought` marks model reasoning parts
/// which never count as visible output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Part {
    #[serde(flatten)]
    pub data: PartData,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub thought: bool,
}

/// Payload of a [`Part`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum PartData {
    Text(String),
    InlineData(Blob),
    FileData(FileData),
    FunctionCall(FunctionCall),
    FunctionResponse(FunctionResponse),
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            data: PartData::Text(text.into()),
            thought: false,
        }
    }

    pub fn thought(text: impl Into<String>) -> Self {
        Self {
            data: PartData::Text(text.into()),
            thought: true,
        }
    }

    pub fn inline_data(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            data: PartData::InlineData(Blob {
                mime_type: mime_type.into(),
                data: data.into(),
            }),
            thought: false,
        }
    }

    pub fn file_data(mime_type: impl Into<String>, file_uri: impl Into<String>) -> Self {
        Self {
            data: PartData::FileData(FileData {
                mime_type: mime_type.into(),
                file_uri: file_uri.into(),
            }),
            thought: false,
        }
    }

    pub fn function_call(call: FunctionCall) -> Self {
        Self {
            data: PartData::FunctionCall(call),
            thought: false,
        }
    }

    pub fn function_response(response: FunctionResponse) -> Self {
        Self {
            data: PartData::FunctionResponse(response),
            thought: false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match &self.data {
            PartData::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_function_call(&self) -> Option<&FunctionCall> {
        match &self.data {
            PartData::FunctionCall(call) => Some(call),
            _ => None,
        }
    }

    pub fn as_function_response(&self) -> Option<&FunctionResponse> {
        match &self.data {
            PartData::FunctionResponse(response) => Some(response),
            _ => None,
        }
    }

    /// MIME type of inline or file data.
    pub fn binary_mime_type(&self) -> Option<&str> {
        match &self.data {
            PartData::InlineData(blob) => Some(&blob.mime_type),
            PartData::FileData(file) => Some(&file.mime_type),
            _ => None,
        }
    }
}

impl From<&str> for Part {
    fn from(text: &str) -> Self {
        Part::text(text)
    }
}

impl From<String> for Part {
    fn from(text: String) -> Self {
        Part::text(text)
    }
}

/// Inline binary payload (base64 encoded).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

/// Reference to uploaded file content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileData {
    pub mime_type: String,
    pub file_uri: String,
}

/// A function call emitted by the model. Any field may be missing on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<serde_json::Value>,
}

/// The result of a function call sent back to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub response: serde_json::Value,
}

/// Concatenated text of a list of parts, ignoring non-text parts.
pub fn parts_text(parts: &[Part]) -> String {
    parts
        .iter()
        .filter_map(Part::as_text)
        .collect::<Vec<_>>()
        .join("")
}
