//! Content generation transport.
//!
//! The agent core only talks to a [`ContentGenerator`]; the Gemini HTTP
//! transport is one implementation, tests supply scripted ones.

pub mod gemini;
pub mod http;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::config::StewardConfig;
use crate::error::{Result, StewardError};
use crate::types::{
    CountTokensRequest, CountTokensResponse, GenerateContentRequest, GenerateContentResponse,
};

/// Stream of response chunks for one model turn.
pub type ResponseStream = BoxStream<'static, Result<GenerateContentResponse>>;

/// Core trait implemented by every model transport.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Generate a complete response.
    async fn generate_content(
        &self,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse>;

    /// Generate a response as a stream of chunks.
    async fn generate_content_stream(
        &self,
        request: &GenerateContentRequest,
    ) -> Result<ResponseStream>;

    /// Count the tokens `request.contents` would occupy.
    async fn count_tokens(&self, request: &CountTokensRequest) -> Result<CountTokensResponse>;
}

/// Create the default transport for the given config.
pub fn create_content_generator(config: &StewardConfig) -> Result<Arc<dyn ContentGenerator>> {
    let api_key = config
        .api_key()
        .ok_or_else(|| StewardError::Authentication("Missing GEMINI_API_KEY".into()))?;
    let mut generator = gemini::GeminiContentGenerator::new(api_key);
    if let Some(url) = config.base_url() {
        generator = generator.with_base_url(url);
    }
    Ok(Arc::new(generator))
}
