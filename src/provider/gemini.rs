//! Google Gemini API transport.

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::Serialize;
use tracing::debug;

use crate::error::{Result, StewardError};
use crate::types::{
    Content, CountTokensRequest, CountTokensResponse, FunctionDeclaration, GenerateContentConfig,
    GenerateContentRequest, GenerateContentResponse,
};

use super::http::{gemini_headers, shared_client, status_to_error};
use super::{ContentGenerator, ResponseStream};

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini REST transport (`generateContent`, `streamGenerateContent`, `countTokens`).
pub struct GeminiContentGenerator {
    api_key: String,
    base_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireRequest<'a> {
    contents: &'a [Content],
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<&'a Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<WireGenerationConfig<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireGenerationConfig<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<&'a serde_json::Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireTool<'a> {
    function_declarations: &'a [FunctionDeclaration],
}

#[derive(Serialize)]
struct WireCountTokens<'a> {
    contents: &'a [Content],
}

impl GeminiContentGenerator {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: BASE_URL.to_string(),
        }
    }

    /// Point the transport at another endpoint (proxies, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn build_request_body<'a>(&self, request: &'a GenerateContentRequest) -> WireRequest<'a> {
        let config: &'a GenerateContentConfig = &request.config;
        let generation_config = WireGenerationConfig {
            temperature: config.temperature,
            top_p: config.top_p,
            max_output_tokens: config.max_output_tokens,
            response_mime_type: config.response_mime_type.as_deref(),
            response_schema: config.response_schema.as_ref(),
        };
        let has_generation_config = generation_config.temperature.is_some()
            || generation_config.top_p.is_some()
            || generation_config.max_output_tokens.is_some()
            || generation_config.response_mime_type.is_some()
            || generation_config.response_schema.is_some();

        let tools = if config.tools.is_empty() {
            Vec::new()
        } else {
            vec![WireTool {
                function_declarations: &config.tools,
            }]
        };

        WireRequest {
            contents: &request.contents,
            system_instruction: config.system_instruction.as_ref(),
            generation_config: has_generation_config.then_some(generation_config),
            tools,
        }
    }

    fn url(&self, model: &str, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, model, method)
    }

    async fn post<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> Result<reqwest::Response> {
        let resp = shared_client()
            .post(url)
            .headers(gemini_headers(&self.api_key))
            .json(body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body_text = resp.text().await.unwrap_or_default();
            return Err(status_to_error(status, &body_text, retry_after.as_deref()));
        }
        Ok(resp)
    }
}

#[async_trait]
impl ContentGenerator for GeminiContentGenerator {
    async fn generate_content(
        &self,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse> {
        debug!(model = %request.model, "Gemini generate_content");
        let body = self.build_request_body(request);
        let resp = self
            .post(&self.url(&request.model, "generateContent"), &body)
            .await?;
        Ok(resp.json::<GenerateContentResponse>().await?)
    }

    async fn generate_content_stream(
        &self,
        request: &GenerateContentRequest,
    ) -> Result<ResponseStream> {
        debug!(model = %request.model, "Gemini generate_content_stream");
        let body = self.build_request_body(request);
        let url = format!(
            "{}?alt=sse",
            self.url(&request.model, "streamGenerateContent")
        );
        let resp = self.post(&url, &body).await?;
        Ok(sse_response_stream(resp.bytes_stream()))
    }

    async fn count_tokens(&self, request: &CountTokensRequest) -> Result<CountTokensResponse> {
        let body = WireCountTokens {
            contents: &request.contents,
        };
        let resp = self
            .post(&self.url(&request.model, "countTokens"), &body)
            .await?;
        Ok(resp.json::<CountTokensResponse>().await?)
    }
}

/// Pop the next complete line off `buffer`, decoded once it is whole so a
/// multi-byte character split across network chunks stays intact.
fn take_line(buffer: &mut Vec<u8>) -> Option<String> {
    let line_end = buffer.iter().position(|&b| b == b'\n')?;
    let line: Vec<u8> = buffer.drain(..=line_end).collect();
    Some(String::from_utf8_lossy(&line).trim().to_string())
}

fn parse_chunk(data: &str) -> Result<GenerateContentResponse> {
    serde_json::from_str(data)
        .map_err(|e| StewardError::Stream(format!("malformed stream chunk: {e}")))
}

/// Turn an SSE byte stream into response chunks.
fn sse_response_stream<S, B>(byte_stream: S) -> ResponseStream
where
    S: Stream<Item = std::result::Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut buffer: Vec<u8> = Vec::new();
        futures::pin_mut!(byte_stream);

        while let Some(chunk_result) = byte_stream.next().await {
            let chunk = match chunk_result {
                Ok(c) => c,
                Err(e) => {
                    yield Err(StewardError::Network(e));
                    return;
                }
            };
            buffer.extend_from_slice(chunk.as_ref());

            while let Some(line) = take_line(&mut buffer) {
                if let Some(data) = super::http::parse_sse_data(&line) {
                    match parse_chunk(data) {
                        Ok(chunk) => yield Ok(chunk),
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }
        }

        let rest = String::from_utf8_lossy(&buffer);
        if let Some(data) = super::http::parse_sse_data(rest.trim()) {
            if let Ok(chunk) = parse_chunk(data) {
                yield Ok(chunk);
            }
        }
    };
    Box::pin(stream)
}
