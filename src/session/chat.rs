//! Chat history bookkeeping around the content generator.
//!
//! The comprehensive history keeps every entry, including model turns that
//! came back empty. The curated history (what gets sent to the model) drops
//! such invalid model turns together with the user input that produced them.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use futures::StreamExt;
use tracing::debug;

use crate::config::StewardConfig;
use crate::error::Result;
use crate::provider::{ContentGenerator, ResponseStream};
use crate::telemetry::{Telemetry, TelemetryEvent};
use crate::types::{
    parts_text, Content, FunctionDeclaration, GenerateContentConfig, GenerateContentRequest,
    GenerateContentResponse, Part, PartData, Role, UsageMetadata,
};

/// A conversation with the model and its history.
pub struct ChatSession {
    config: StewardConfig,
    generator: Arc<dyn ContentGenerator>,
    telemetry: Telemetry,
    generation_config: GenerateContentConfig,
    history: Arc<Mutex<Vec<Content>>>,
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("history_len", &self.lock_history().len())
            .field("tools", &self.generation_config.tools.len())
            .finish()
    }
}

impl ChatSession {
    pub fn new(
        config: StewardConfig,
        generator: Arc<dyn ContentGenerator>,
        telemetry: Telemetry,
        generation_config: GenerateContentConfig,
        history: Vec<Content>,
    ) -> Self {
        Self {
            config,
            generator,
            telemetry,
            generation_config,
            history: Arc::new(Mutex::new(history)),
        }
    }

    fn lock_history(&self) -> MutexGuard<'_, Vec<Content>> {
        self.history.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// History entries. `curated` drops invalid model turns.
    pub fn history(&self, curated: bool) -> Vec<Content> {
        let history = self.lock_history();
        if curated {
            extract_curated_history(&history)
        } else {
            history.clone()
        }
    }

    pub fn set_history(&self, history: Vec<Content>) {
        *self.lock_history() = history;
    }

    pub fn add_history(&self, content: Content) {
        self.lock_history().push(content);
    }

    pub fn clear_history(&self) {
        self.lock_history().clear();
    }

    pub fn set_tools(&mut self, tools: Vec<FunctionDeclaration>) {
        self.generation_config.tools = tools;
    }

    pub fn generation_config(&self) -> &GenerateContentConfig {
        &self.generation_config
    }

    fn build_request(
        &self,
        user_content: &Content,
        overrides: Option<&GenerateContentConfig>,
    ) -> GenerateContentRequest {
        let mut contents = self.history(true);
        contents.push(user_content.clone());
        let config = match overrides {
            Some(overrides) => self.generation_config.merged_with(overrides),
            None => self.generation_config.clone(),
        };
        GenerateContentRequest {
            model: self.config.model(),
            contents,
            config,
        }
    }

    fn log_request(&self, model: &str, prompt_id: &str, user_content: &Content) {
        self.telemetry.log(TelemetryEvent::ApiRequest {
            model: model.to_string(),
            prompt_id: prompt_id.to_string(),
            request_text: Some(parts_text(&user_content.parts)),
        });
    }

    /// Send a message and wait for the whole response. `overrides` is laid
    /// over the chat's generation config for this request only.
    pub async fn send_message(
        &self,
        message: Vec<Part>,
        overrides: Option<&GenerateContentConfig>,
        prompt_id: &str,
    ) -> Result<GenerateContentResponse> {
        let user_content = Content::user(message);
        let request = self.build_request(&user_content, overrides);
        self.log_request(&request.model, prompt_id, &user_content);

        let started = Instant::now();
        let generator = Arc::clone(&self.generator);
        let result = self
            .config
            .retry_policy()
            .execute(|| {
                let generator = Arc::clone(&generator);
                let request = request.clone();
                async move { generator.generate_content(&request).await }
            })
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(response) => {
                self.telemetry.log(TelemetryEvent::ApiResponse {
                    model: request.model.clone(),
                    prompt_id: prompt_id.to_string(),
                    duration_ms,
                    usage: response.usage_metadata.clone(),
                    response_text: response.text(),
                });
                let outputs = response
                    .candidates
                    .first()
                    .and_then(|c| c.content.clone())
                    .map(|c| vec![c])
                    .unwrap_or_default();
                record_history(&self.history, user_content, outputs);
                Ok(response)
            }
            Err(err) => {
                self.telemetry.log(TelemetryEvent::ApiError {
                    model: request.model.clone(),
                    prompt_id: prompt_id.to_string(),
                    duration_ms,
                    error: err.to_string(),
                    status: err.status(),
                });
                Err(err)
            }
        }
    }

    /// Send a message and stream the response.
    ///
    /// History is updated when the stream has been consumed to the end; a
    /// stream that fails or is dropped early leaves the history untouched.
    pub async fn send_message_stream(
        &self,
        message: Vec<Part>,
        prompt_id: &str,
    ) -> Result<ResponseStream> {
        let user_content = Content::user(message);
        let request = self.build_request(&user_content, None);
        self.log_request(&request.model, prompt_id, &user_content);

        let started = Instant::now();
        let model = request.model.clone();
        let prompt_id = prompt_id.to_string();
        let telemetry = self.telemetry.clone();

        let mut inner = match self.generator.generate_content_stream(&request).await {
            Ok(stream) => stream,
            Err(err) => {
                telemetry.log(TelemetryEvent::ApiError {
                    model,
                    prompt_id,
                    duration_ms: started.elapsed().as_millis() as u64,
                    error: err.to_string(),
                    status: err.status(),
                });
                return Err(err);
            }
        };

        let history = Arc::clone(&self.history);
        let stream = async_stream::stream! {
            let mut outputs: Vec<Content> = Vec::new();
            let mut usage: Option<UsageMetadata> = None;
            let mut text = String::new();

            while let Some(item) = inner.next().await {
                match item {
                    Ok(chunk) => {
                        if let Some(content) = chunk.candidates.first().and_then(|c| c.content.clone()) {
                            if is_valid_content(&content) {
                                text.push_str(&content.text());
                                outputs.push(content);
                            }
                        }
                        if chunk.usage_metadata.is_some() {
                            usage = chunk.usage_metadata.clone();
                        }
                        yield Ok(chunk);
                    }
                    Err(err) => {
                        telemetry.log(TelemetryEvent::ApiError {
                            model: model.clone(),
                            prompt_id: prompt_id.clone(),
                            duration_ms: started.elapsed().as_millis() as u64,
                            error: err.to_string(),
                            status: err.status(),
                        });
                        yield Err(err);
                        return;
                    }
                }
            }

            telemetry.log(TelemetryEvent::ApiResponse {
                model,
                prompt_id,
                duration_ms: started.elapsed().as_millis() as u64,
                usage,
                response_text: (!text.is_empty()).then_some(text),
            });
            record_history(&history, user_content, outputs);
        };

        Ok(Box::pin(stream))
    }
}

/// A content entry the model may be shown again: at least one part, no empty
/// text parts.
pub fn is_valid_content(content: &Content) -> bool {
    !content.parts.is_empty()
        && content.parts.iter().all(|part| match &part.data {
            PartData::Text(text) => part.thought || !text.is_empty(),
            _ => true,
        })
}

/// Drop invalid model turns and the user input that produced them.
pub fn extract_curated_history(history: &[Content]) -> Vec<Content> {
    let mut curated = Vec::with_capacity(history.len());
    let mut i = 0;
    while i < history.len() {
        if history[i].role == Role::User {
            curated.push(history[i].clone());
            i += 1;
            continue;
        }
        let start = i;
        while i < history.len() && history[i].role == Role::Model {
            i += 1;
        }
        let model_turns = &history[start..i];
        if model_turns.iter().all(is_valid_content) {
            curated.extend(model_turns.iter().cloned());
        } else if curated.last().is_some_and(|c| c.role == Role::User) {
            curated.pop();
        }
    }
    curated
}

/// Append the user input and the consolidated model output.
///
/// Thought parts are dropped and adjacent text parts merged. No output at all
/// is recorded as an empty model entry.
fn record_history(history: &Mutex<Vec<Content>>, user_content: Content, outputs: Vec<Content>) {
    let mut parts: Vec<Part> = Vec::new();
    for part in outputs.into_iter().flat_map(|c| c.parts) {
        if part.thought {
            continue;
        }
        let merged = match (parts.last_mut().map(|p| &mut p.data), &part.data) {
            (Some(PartData::Text(previous)), PartData::Text(text)) => {
                previous.push_str(text);
                true
            }
            _ => false,
        };
        if !merged {
            parts.push(part);
        }
    }
    debug!(parts = parts.len(), "Recording model turn");

    let mut history = history.lock().unwrap_or_else(|p| p.into_inner());
    history.push(user_content);
    history.push(Content::model(parts));
}
