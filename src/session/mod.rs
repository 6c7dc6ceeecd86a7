//! Agent session: the multi-turn exchange with the model.
//!
//! [`AgentSession::send_message_stream`] runs model turns in an explicit
//! loop bounded by [`MAX_TURNS`], continuing without user input while the
//! next-speaker check says the model should go on.
//! [`AgentSession::run`] additionally executes requested tool calls through
//! the scheduler and feeds their responses back until the model is done.

pub mod chat;
pub mod client;
pub mod compression;
pub mod next_speaker;

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::StewardConfig;
use crate::error::Result;
use crate::provider::ContentGenerator;
use crate::report::ErrorReporter;
use crate::scheduler::{SchedulerHandlers, ToolCallScheduler, ToolCallStatus};
use crate::telemetry::{Telemetry, TelemetryEvent};
use crate::tools::ToolRegistry;
use crate::turn::{AgentEvent, EventSender, Turn};
use crate::types::{Content, GenerateContentConfig, GenerateContentResponse, Part};

pub use chat::{extract_curated_history, is_valid_content, ChatSession};
pub use client::ModelClient;
pub use compression::{
    find_compress_split_point, find_index_after_fraction, try_compress_chat, ChatCompressionInfo,
};
pub use next_speaker::{ModelNextSpeakerChecker, NextSpeaker, NextSpeakerChecker};

/// Upper bound on model turns per call, whatever the caller asks for.
pub const MAX_TURNS: usize = 100;
/// Sent in place of user input when the model should keep going.
pub const CONTINUE_PROMPT: &str = "Please continue.";

/// Long-lived orchestrator of one conversation.
pub struct AgentSession {
    config: StewardConfig,
    client: Arc<ModelClient>,
    chat: ChatSession,
    registry: Arc<ToolRegistry>,
    scheduler: ToolCallScheduler,
    telemetry: Telemetry,
    reporter: Arc<dyn ErrorReporter>,
    next_speaker: Arc<dyn NextSpeakerChecker>,
    session_turn_count: usize,
}

impl std::fmt::Debug for AgentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSession")
            .field("config", &self.config)
            .field("chat", &self.chat)
            .field("session_turn_count", &self.session_turn_count)
            .finish()
    }
}

impl AgentSession {
    pub fn new(
        config: StewardConfig,
        generator: Arc<dyn ContentGenerator>,
        registry: ToolRegistry,
        telemetry: Telemetry,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        let registry = Arc::new(registry);
        let client = Arc::new(ModelClient::new(
            config.clone(),
            Arc::clone(&generator),
            telemetry.clone(),
            Arc::clone(&reporter),
        ));
        let chat = ChatSession::new(
            config.clone(),
            generator,
            telemetry.clone(),
            GenerateContentConfig {
                temperature: Some(0.0),
                top_p: Some(1.0),
                tools: registry.function_declarations(),
                ..Default::default()
            },
            Vec::new(),
        );
        let scheduler = ToolCallScheduler::new(
            Arc::clone(&registry),
            config.clone(),
            telemetry.clone(),
            SchedulerHandlers::default(),
        );
        let next_speaker = Arc::new(ModelNextSpeakerChecker::new(Arc::clone(&client)));
        Self {
            config,
            client,
            chat,
            registry,
            scheduler,
            telemetry,
            reporter,
            next_speaker,
            session_turn_count: 0,
        }
    }

    pub fn with_next_speaker_checker(mut self, checker: Arc<dyn NextSpeakerChecker>) -> Self {
        self.next_speaker = checker;
        self
    }

    /// Replace the scheduler so `handlers` observe tool call progress.
    pub fn with_scheduler_handlers(mut self, handlers: SchedulerHandlers) -> Self {
        self.scheduler = ToolCallScheduler::new(
            Arc::clone(&self.registry),
            self.config.clone(),
            self.telemetry.clone(),
            handlers,
        );
        self
    }

    pub fn with_history(self, history: Vec<Content>) -> Self {
        self.chat.set_history(history);
        self
    }

    pub fn config(&self) -> &StewardConfig {
        &self.config
    }

    pub fn chat(&self) -> &ChatSession {
        &self.chat
    }

    pub fn scheduler(&self) -> &ToolCallScheduler {
        &self.scheduler
    }

    pub fn client(&self) -> &Arc<ModelClient> {
        &self.client
    }

    /// Model turns sent so far in this session.
    pub fn session_turn_count(&self) -> usize {
        self.session_turn_count
    }

    pub fn history(&self, curated: bool) -> Vec<Content> {
        self.chat.history(curated)
    }

    pub fn set_history(&self, history: Vec<Content>) {
        self.chat.set_history(history);
    }

    pub fn add_history(&self, content: Content) {
        self.chat.add_history(content);
    }

    /// Start over with an empty history. The session turn count is kept.
    pub fn reset_chat(&mut self) {
        self.chat.clear_history();
        self.set_tools();
    }

    /// Re-advertise the registry's tools to the model.
    pub fn set_tools(&mut self) {
        self.chat.set_tools(self.registry.function_declarations());
    }

    /// Compress history if it is near the context limit (or `force` is set).
    pub async fn try_compress_chat(
        &self,
        prompt_id: &str,
        force: bool,
    ) -> Result<Option<ChatCompressionInfo>> {
        let info = try_compress_chat(
            &self.chat,
            self.client.generator().as_ref(),
            &self.config,
            prompt_id,
            force,
        )
        .await?;
        if let Some(info) = info {
            self.telemetry.log(TelemetryEvent::ChatCompression {
                tokens_before: info.original_token_count,
                tokens_after: info.new_token_count,
            });
        }
        Ok(info)
    }

    /// Send `request` and keep the model talking while it wants to.
    ///
    /// At most `min(turns, MAX_TURNS)` model turns are sent. Every turn sent
    /// counts against the session-wide limit, continuations included. The
    /// returned turn is the last one that ran.
    pub async fn send_message_stream(
        &mut self,
        request: Vec<Part>,
        prompt_id: &str,
        token: &CancellationToken,
        turns: usize,
        events: &EventSender,
    ) -> Result<Turn> {
        let initial_model = self.config.model();
        let mut remaining = turns.min(MAX_TURNS);
        let mut request = request;
        let mut last_turn = Turn::new(prompt_id, Arc::clone(&self.reporter));

        loop {
            if remaining == 0 {
                debug!(prompt_id, "Turn budget exhausted");
                return Ok(last_turn);
            }

            self.session_turn_count += 1;
            if let Some(limit) = self.config.max_session_turns() {
                if self.session_turn_count > limit {
                    info!(limit, "Maximum session turns reached");
                    self.telemetry.log(TelemetryEvent::MaxSessionTurns { limit });
                    let _ = events.send(AgentEvent::MaxSessionTurns);
                    return Ok(last_turn);
                }
            }

            if let Some(info) = self.try_compress_chat(prompt_id, false).await? {
                let _ = events.send(AgentEvent::ChatCompressed(info));
            }

            let mut turn = Turn::new(prompt_id, Arc::clone(&self.reporter));
            turn.run(&self.chat, request, token, events).await;
            remaining -= 1;

            if !turn.pending_tool_calls().is_empty()
                || token.is_cancelled()
                || turn.error().is_some()
            {
                return Ok(turn);
            }
            if self.config.model() != initial_model {
                debug!(
                    from = %initial_model,
                    to = %self.config.model(),
                    "Model changed during the exchange, stopping"
                );
                return Ok(turn);
            }

            let next = self.next_speaker.check(&self.chat, token).await;
            self.telemetry.log(TelemetryEvent::NextSpeakerCheck {
                prompt_id: prompt_id.to_string(),
                result: next.map(|s| s.to_string()).unwrap_or_else(|| "none".into()),
            });
            if next != Some(NextSpeaker::Model) {
                return Ok(turn);
            }
            request = vec![Part::text(CONTINUE_PROMPT)];
            last_turn = turn;
        }
    }

    /// Run a full exchange: model turns, tool calls, and their responses fed
    /// back, until the model stops asking for tools.
    pub async fn run(
        &mut self,
        request: Vec<Part>,
        prompt_id: &str,
        token: &CancellationToken,
        events: &EventSender,
    ) -> Result<()> {
        self.telemetry.log(TelemetryEvent::UserPrompt {
            prompt_id: prompt_id.to_string(),
            prompt_length: crate::types::parts_text(&request).len(),
        });

        let mut request = request;
        loop {
            let turn = self
                .send_message_stream(request, prompt_id, token, MAX_TURNS, events)
                .await?;
            if let Some(error) = turn.error() {
                debug!(prompt_id, error, "Turn failed, not running its tool calls");
                return Ok(());
            }
            let pending = turn.pending_tool_calls().to_vec();
            if pending.is_empty() || token.is_cancelled() {
                return Ok(());
            }

            let batch = self.scheduler.schedule(pending, token.clone()).await?;
            let calls = batch.wait().await?;

            let mut parts = Vec::new();
            for call in &calls {
                if let Some(response) = call.response() {
                    let _ = events.send(AgentEvent::ToolCallResponse(response.clone()));
                    parts.extend(response.response_parts.iter().cloned());
                }
            }

            let all_cancelled = calls
                .iter()
                .all(|call| call.status() == ToolCallStatus::Cancelled);
            if all_cancelled || token.is_cancelled() {
                debug!(prompt_id, "Tool calls cancelled, recording responses and stopping");
                self.chat.add_history(Content::user(parts));
                return Ok(());
            }
            request = parts;
        }
    }

    /// One-shot generation outside the chat history, with retry and fallback.
    pub async fn generate_content(
        &self,
        contents: Vec<Content>,
        generation_config: &GenerateContentConfig,
        token: &CancellationToken,
        model: Option<&str>,
    ) -> Result<GenerateContentResponse> {
        self.client
            .generate_content(contents, generation_config, token, model)
            .await
    }

    /// One-shot JSON generation against `schema`.
    pub async fn generate_json(
        &self,
        contents: Vec<Content>,
        schema: Value,
        token: &CancellationToken,
        model: Option<&str>,
    ) -> Result<Value> {
        self.client
            .generate_json(contents, schema, token, model)
            .await
    }

    /// Flush telemetry. The session stays usable but stops recording.
    pub async fn shutdown(&self) {
        self.telemetry.shutdown().await;
    }
}
