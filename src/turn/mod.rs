//! One model turn: a streamed response turned into ordered [`AgentEvent`]s.

use std::sync::Arc;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::StewardError;
use crate::report::{ErrorReport, ErrorReporter};
use crate::scheduler::{ToolCallRequest, ToolCallResponse};
use crate::session::chat::ChatSession;
use crate::session::compression::ChatCompressionInfo;
use crate::types::{FinishReason, FunctionCall, GenerateContentResponse, Part, UsageMetadata};

/// Name used when the model emits a function call without one.
pub const UNDEFINED_TOOL_NAME: &str = "undefined_tool_name";

/// A parsed model thought: `**subject** description`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThoughtSummary {
    pub subject: String,
    pub description: String,
}

impl ThoughtSummary {
    pub fn parse(raw: &str) -> Self {
        let bold = raw.find("**").and_then(|start| {
            let rest = &raw[start + 2..];
            rest.find("**").map(|len| (start, start + 2 + len + 2, &rest[..len]))
        });
        match bold {
            Some((start, end, subject)) => Self {
                subject: subject.trim().to_string(),
                description: format!("{}{}", &raw[..start], &raw[end..]).trim().to_string(),
            },
            None => Self {
                subject: String::new(),
                description: raw.trim().to_string(),
            },
        }
    }
}

/// Events produced while talking to the model.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    Content(String),
    Thought(ThoughtSummary),
    ToolCallRequest(ToolCallRequest),
    ToolCallResponse(ToolCallResponse),
    UserCancelled,
    Error { message: String, status: Option<u16> },
    Finished(FinishReason),
    ChatCompressed(ChatCompressionInfo),
    MaxSessionTurns,
}

pub type EventSender = mpsc::UnboundedSender<AgentEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<AgentEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

fn emit(events: &EventSender, event: AgentEvent) {
    // A closed receiver means nobody is listening any more.
    let _ = events.send(event);
}

/// One request/response exchange with the model.
pub struct Turn {
    prompt_id: String,
    reporter: Arc<dyn ErrorReporter>,
    pending_tool_calls: Vec<ToolCallRequest>,
    debug_responses: Vec<GenerateContentResponse>,
    usage: Option<UsageMetadata>,
    finish_reason: Option<FinishReason>,
    error: Option<String>,
}

impl std::fmt::Debug for Turn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Turn")
            .field("prompt_id", &self.prompt_id)
            .field("pending_tool_calls", &self.pending_tool_calls)
            .field("finish_reason", &self.finish_reason)
            .field("error", &self.error)
            .finish()
    }
}

impl Turn {
    pub fn new(prompt_id: impl Into<String>, reporter: Arc<dyn ErrorReporter>) -> Self {
        Self {
            prompt_id: prompt_id.into(),
            reporter,
            pending_tool_calls: Vec::new(),
            debug_responses: Vec::new(),
            usage: None,
            finish_reason: None,
            error: None,
        }
    }

    pub fn prompt_id(&self) -> &str {
        &self.prompt_id
    }

    /// Function calls requested during this turn, in order.
    pub fn pending_tool_calls(&self) -> &[ToolCallRequest] {
        &self.pending_tool_calls
    }

    /// Every raw chunk received.
    pub fn debug_responses(&self) -> &[GenerateContentResponse] {
        &self.debug_responses
    }

    pub fn usage_metadata(&self) -> Option<&UsageMetadata> {
        self.usage.as_ref()
    }

    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.finish_reason
    }

    /// Message of the transport error that ended this turn, if any.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Send `request` and push the resulting events onto `events`.
    pub async fn run(
        &mut self,
        chat: &ChatSession,
        request: Vec<Part>,
        token: &CancellationToken,
        events: &EventSender,
    ) {
        if token.is_cancelled() {
            emit(events, AgentEvent::UserCancelled);
            return;
        }

        let started = tokio::select! {
            biased;
            _ = token.cancelled() => {
                emit(events, AgentEvent::UserCancelled);
                return;
            }
            started = chat.send_message_stream(request.clone(), &self.prompt_id) => started,
        };
        let mut stream = match started {
            Ok(stream) => stream,
            Err(err) => {
                self.fail(chat, &request, err, token, events).await;
                return;
            }
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    emit(events, AgentEvent::UserCancelled);
                    return;
                }
                next = stream.next() => next,
            };
            match next {
                None => break,
                Some(Ok(chunk)) => self.handle_chunk(chunk, events),
                Some(Err(err)) => {
                    self.fail(chat, &request, err, token, events).await;
                    return;
                }
            }
        }
    }

    fn handle_chunk(&mut self, chunk: GenerateContentResponse, events: &EventSender) {
        self.debug_responses.push(chunk.clone());
        if chunk.usage_metadata.is_some() {
            self.usage = chunk.usage_metadata.clone();
        }

        for part in chunk.parts().iter().filter(|p| p.thought) {
            if let Some(text) = part.as_text() {
                emit(events, AgentEvent::Thought(ThoughtSummary::parse(text)));
            }
        }

        if let Some(text) = chunk.text() {
            emit(events, AgentEvent::Content(text));
        }

        for call in chunk.function_calls() {
            let request = self.to_tool_call_request(call);
            debug!(call_id = %request.call_id, tool = %request.name, "Model requested tool call");
            self.pending_tool_calls.push(request.clone());
            emit(events, AgentEvent::ToolCallRequest(request));
        }

        if let Some(reason) = chunk.finish_reason() {
            if reason != FinishReason::FinishReasonUnspecified {
                self.finish_reason = Some(reason);
                emit(events, AgentEvent::Finished(reason));
            }
        }
    }

    fn to_tool_call_request(&self, call: &FunctionCall) -> ToolCallRequest {
        let name = call
            .name
            .clone()
            .unwrap_or_else(|| UNDEFINED_TOOL_NAME.to_string());
        let call_id = call.id.clone().unwrap_or_else(|| synthesize_call_id(&name));
        ToolCallRequest {
            call_id,
            name,
            args: call
                .args
                .clone()
                .unwrap_or_else(|| serde_json::Value::Object(Default::default())),
            is_client_initiated: false,
            prompt_id: self.prompt_id.clone(),
        }
    }

    async fn fail(
        &mut self,
        chat: &ChatSession,
        request: &[Part],
        err: StewardError,
        token: &CancellationToken,
        events: &EventSender,
    ) {
        if token.is_cancelled() {
            emit(events, AgentEvent::UserCancelled);
            return;
        }
        let context = serde_json::json!({
            "history": chat.history(true),
            "request": request,
        });
        self.reporter
            .report(ErrorReport::new("turn-send-message-stream", &err, context))
            .await;
        let message = err.to_string();
        self.error = Some(message.clone());
        emit(
            events,
            AgentEvent::Error {
                message,
                status: err.status(),
            },
        );
    }
}

/// `{name}-{unix millis}-{random hex}` for calls the model sent without an id.
fn synthesize_call_id(name: &str) -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("{name}-{millis}-{}", &random[..13])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thought_subject_is_the_bold_prefix() {
        let thought = ThoughtSummary::parse("**Planning the edit** I will read the file first.");
        assert_eq!(thought.subject, "Planning the edit");
        assert_eq!(thought.description, "I will read the file first.");

        let plain = ThoughtSummary::parse("  just thinking ");
        assert_eq!(plain.subject, "");
        assert_eq!(plain.description, "just thinking");
    }

    #[test]
    fn synthesized_ids_start_with_the_tool_name() {
        let id = synthesize_call_id("read_file");
        let mut pieces = id.splitn(3, '-');
        assert_eq!(pieces.next(), Some("read_file"));
        assert!(pieces.next().unwrap().parse::<i64>().is_ok());
        assert_eq!(pieces.next().unwrap().len(), 13);
    }
}
