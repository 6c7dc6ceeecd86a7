//! Gemini model definitions.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Default model for interactive sessions.
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-pro";
/// Cheaper model used for side queries and as the rate-limit fallback.
pub const DEFAULT_GEMINI_FLASH_MODEL: &str = "gemini-2.5-flash";
/// Context window assumed for unknown models.
pub const DEFAULT_TOKEN_LIMIT: usize = 1_048_576;

/// Gemini models with known context windows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
pub enum GeminiModel {
    #[strum(serialize = "gemini-1.5-pro")]
    Gemini15Pro,
    #[strum(serialize = "gemini-1.5-flash")]
    Gemini15Flash,
    #[strum(serialize = "gemini-2.0-flash")]
    Gemini20Flash,
    #[strum(serialize = "gemini-2.0-flash-preview-image-generation")]
    Gemini20FlashImageGeneration,
    #[strum(serialize = "gemini-2.5-pro")]
    Gemini25Pro,
    #[strum(serialize = "gemini-2.5-flash")]
    Gemini25Flash,
    #[strum(serialize = "gemini-2.5-flash-lite")]
    Gemini25FlashLite,
    #[strum(serialize = "gemini-embedding-001")]
    GeminiEmbedding,
    /// Custom/unknown model by ID.
    #[strum(default)]
    Custom(String),
}

impl GeminiModel {
    /// Resolve a model ID. Unknown IDs become [`GeminiModel::Custom`].
    pub fn from_id(id: &str) -> Self {
        id.parse().unwrap_or_else(|_| Self::Custom(id.to_string()))
    }

    /// Get the API model identifier.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Gemini15Pro => "gemini-1.5-pro",
            Self::Gemini15Flash => "gemini-1.5-flash",
            Self::Gemini20Flash => "gemini-2.0-flash",
            Self::Gemini20FlashImageGeneration => "gemini-2.0-flash-preview-image-generation",
            Self::Gemini25Pro => "gemini-2.5-pro",
            Self::Gemini25Flash => "gemini-2.5-flash",
            Self::Gemini25FlashLite => "gemini-2.5-flash-lite",
            Self::GeminiEmbedding => "gemini-embedding-001",
            Self::Custom(s) => s,
        }
    }

    /// Context window in tokens.
    pub fn token_limit(&self) -> usize {
        match self {
            Self::Gemini15Pro => 2_097_152,
            Self::Gemini15Flash
            | Self::Gemini20Flash
            | Self::Gemini25Pro
            | Self::Gemini25Flash
            | Self::Gemini25FlashLite => 1_048_576,
            Self::Gemini20FlashImageGeneration => 32_000,
            Self::GeminiEmbedding => 2_048,
            Self::Custom(_) => DEFAULT_TOKEN_LIMIT,
        }
    }

    /// Whether this is one of the flash-tier models.
    pub fn is_flash(&self) -> bool {
        self.as_str().contains("flash")
    }
}
