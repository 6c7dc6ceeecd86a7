//! Model identifiers and context limits.

pub mod gemini;

pub use gemini::{GeminiModel, DEFAULT_GEMINI_FLASH_MODEL, DEFAULT_GEMINI_MODEL, DEFAULT_TOKEN_LIMIT};

/// Context window in tokens for a model ID.
pub fn token_limit(model: &str) -> usize {
    GeminiModel::from_id(model).token_limit()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_models_resolve_their_limits() {
        assert_eq!(token_limit("gemini-1.5-pro"), 2_097_152);
        assert_eq!(token_limit("gemini-2.5-flash"), 1_048_576);
    }

    #[test]
    fn unknown_models_fall_back_to_default_limit() {
        let model = GeminiModel::from_id("my-tuned-model");
        assert_eq!(model, GeminiModel::Custom("my-tuned-model".to_string()));
        assert_eq!(model.token_limit(), DEFAULT_TOKEN_LIMIT);
    }

    #[test]
    fn flash_detection_uses_model_id() {
        assert!(GeminiModel::from_id(DEFAULT_GEMINI_FLASH_MODEL).is_flash());
        assert!(!GeminiModel::from_id(DEFAULT_GEMINI_MODEL).is_flash());
    }
}
