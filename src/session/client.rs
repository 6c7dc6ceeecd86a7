//! Direct (non-chat) model calls with retry, fallback and reporting.

use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::StewardConfig;
use crate::error::{Result, StewardError};
use crate::models::DEFAULT_GEMINI_FLASH_MODEL;
use crate::provider::ContentGenerator;
use crate::report::{ErrorReport, ErrorReporter};
use crate::telemetry::{Telemetry, TelemetryEvent};
use crate::types::{Content, GenerateContentConfig, GenerateContentRequest, GenerateContentResponse};
use crate::util::retry::PersistentRateLimitHandler;

const EMPTY_JSON_RESPONSE: &str = "API returned an empty response for generateJson.";

/// One-shot `generate_content` / `generate_json` calls outside the chat history.
pub struct ModelClient {
    config: StewardConfig,
    generator: Arc<dyn ContentGenerator>,
    telemetry: Telemetry,
    reporter: Arc<dyn ErrorReporter>,
    base_config: GenerateContentConfig,
}

impl ModelClient {
    pub fn new(
        config: StewardConfig,
        generator: Arc<dyn ContentGenerator>,
        telemetry: Telemetry,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            config,
            generator,
            telemetry,
            reporter,
            base_config: GenerateContentConfig {
                temperature: Some(0.0),
                top_p: Some(1.0),
                ..Default::default()
            },
        }
    }

    pub fn generator(&self) -> &Arc<dyn ContentGenerator> {
        &self.generator
    }

    pub fn config(&self) -> &StewardConfig {
        &self.config
    }

    /// Offered to the retry loop after repeated 429s: ask the configured
    /// fallback handler whether to switch to the flash model.
    fn fallback_handler(&self) -> PersistentRateLimitHandler {
        let config = self.config.clone();
        let telemetry = self.telemetry.clone();
        Arc::new(move |error: String| {
            let config = config.clone();
            let telemetry = telemetry.clone();
            async move {
                let current = config.model();
                let fallback = DEFAULT_GEMINI_FLASH_MODEL.to_string();
                if current == fallback {
                    return None;
                }
                let handler = config.fallback_handler()?;
                if !handler(current.clone(), fallback.clone(), error).await {
                    return None;
                }
                tracing::warn!(from = %current, to = %fallback, "Falling back to flash model");
                config.set_model(&fallback);
                config.set_fallback_mode(true);
                telemetry.log(TelemetryEvent::FlashFallback {
                    from_model: current,
                    to_model: fallback.clone(),
                });
                Some(fallback)
            }
            .boxed()
        })
    }

    /// Generate content, retrying transient failures.
    ///
    /// Without an explicit `model`, the configured model is read on every
    /// attempt so a fallback takes effect immediately.
    pub async fn generate_content(
        &self,
        contents: Vec<Content>,
        generation_config: &GenerateContentConfig,
        token: &CancellationToken,
        model: Option<&str>,
    ) -> Result<GenerateContentResponse> {
        let config = self.base_config.merged_with(generation_config);
        self.call_with_retry(contents, config, token, model, "generate-content-api")
            .await
    }

    /// Generate a JSON value conforming to `schema`.
    pub async fn generate_json(
        &self,
        contents: Vec<Content>,
        schema: Value,
        token: &CancellationToken,
        model: Option<&str>,
    ) -> Result<Value> {
        let config = self.base_config.merged_with(&GenerateContentConfig {
            response_mime_type: Some("application/json".into()),
            response_schema: Some(schema),
            ..Default::default()
        });
        let response = self
            .call_with_retry(contents.clone(), config, token, model, "generate-json-api")
            .await?;

        let Some(text) = response.text() else {
            let err = StewardError::EmptyResponse(EMPTY_JSON_RESPONSE.into());
            self.reporter
                .report(ErrorReport::new(
                    "generate-json-empty-response",
                    &err,
                    serde_json::json!({ "contents": contents }),
                ))
                .await;
            return Err(err);
        };

        match serde_json::from_str::<Value>(strip_code_fence(&text)) {
            Ok(value) => Ok(value),
            Err(parse_err) => {
                let err = StewardError::UnparsableResponse(parse_err.to_string());
                self.reporter
                    .report(ErrorReport::new(
                        "generate-json-parse",
                        &err,
                        serde_json::json!({
                            "responseTextFailedToParse": text,
                            "originalRequestContents": contents,
                        }),
                    ))
                    .await;
                Err(err)
            }
        }
    }

    async fn call_with_retry(
        &self,
        contents: Vec<Content>,
        config: GenerateContentConfig,
        token: &CancellationToken,
        model: Option<&str>,
        report_kind: &str,
    ) -> Result<GenerateContentResponse> {
        let prompt_id = self.config.session_id().to_string();
        let fallback = self.fallback_handler();
        let started = Instant::now();

        let attempt = || {
            let request = GenerateContentRequest {
                model: model
                    .map(str::to_string)
                    .unwrap_or_else(|| self.config.model()),
                contents: contents.clone(),
                config: config.clone(),
            };
            self.telemetry.log(TelemetryEvent::ApiRequest {
                model: request.model.clone(),
                prompt_id: prompt_id.clone(),
                request_text: None,
            });
            let generator = Arc::clone(&self.generator);
            async move {
                let response = generator.generate_content(&request).await?;
                Ok::<_, StewardError>((request.model, response))
            }
        };

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(StewardError::Cancelled),
            result = self.config.retry_policy().execute_with_fallback(attempt, Some(&fallback)) => result,
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok((model, response)) => {
                self.telemetry.log(TelemetryEvent::ApiResponse {
                    model,
                    prompt_id,
                    duration_ms,
                    usage: response.usage_metadata.clone(),
                    response_text: response.text(),
                });
                Ok(response)
            }
            Err(err) => {
                self.telemetry.log(TelemetryEvent::ApiError {
                    model: model
                        .map(str::to_string)
                        .unwrap_or_else(|| self.config.model()),
                    prompt_id,
                    duration_ms,
                    error: err.to_string(),
                    status: err.status(),
                });
                if token.is_cancelled() {
                    return Err(err);
                }
                self.reporter
                    .report(ErrorReport::new(
                        report_kind,
                        &err,
                        serde_json::json!({ "requestContents": contents, "requestConfig": config }),
                    ))
                    .await;
                Err(err)
            }
        }
    }
}

/// Models sometimes wrap JSON in a markdown fence.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_fences_are_stripped() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("  {\"a\":1} "), "{\"a\":1}");
    }
}
