//! Shared test helpers: a scripted content generator and sample tools.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use steward::config::StewardConfig;
use steward::error::{Result, StewardError};
use steward::provider::{ContentGenerator, ResponseStream};
use steward::report::{ErrorReport, ErrorReporter};
use steward::session::{ChatSession, NextSpeaker, NextSpeakerChecker};
use steward::tools::*;
use steward::types::*;

/// A content generator that replays queued responses.
///
/// Empty queues fall back to a plain "Mock response" and a token count of 10.
#[derive(Default)]
pub struct ScriptedGenerator {
    streams: Mutex<VecDeque<(Vec<Result<GenerateContentResponse>>, Option<CancellationToken>)>>,
    responses: Mutex<VecDeque<Result<GenerateContentResponse>>>,
    token_counts: Mutex<VecDeque<Result<u64>>>,
    stream_requests: Mutex<Vec<GenerateContentRequest>>,
    requests: Mutex<Vec<GenerateContentRequest>>,
}

impl ScriptedGenerator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue the chunks of one streamed turn.
    pub fn queue_stream(&self, chunks: Vec<Result<GenerateContentResponse>>) {
        self.streams.lock().unwrap().push_back((chunks, None));
    }

    /// Queue a streamed turn that cancels `token` as its first chunk is
    /// delivered, with the remaining chunks still buffered.
    pub fn queue_stream_cancelling_after_first(
        &self,
        chunks: Vec<Result<GenerateContentResponse>>,
        token: CancellationToken,
    ) {
        self.streams.lock().unwrap().push_back((chunks, Some(token)));
    }

    /// Queue a streamed turn answering with plain text.
    pub fn queue_stream_text(&self, text: &str) {
        self.queue_stream(vec![Ok(finished_chunk(text, FinishReason::Stop))]);
    }

    pub fn queue_response(&self, response: Result<GenerateContentResponse>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn queue_text_response(&self, text: &str) {
        self.queue_response(Ok(finished_chunk(text, FinishReason::Stop)));
    }

    pub fn queue_token_count(&self, count: Result<u64>) {
        self.token_counts.lock().unwrap().push_back(count);
    }

    pub fn stream_requests(&self) -> Vec<GenerateContentRequest> {
        self.stream_requests.lock().unwrap().clone()
    }

    pub fn requests(&self) -> Vec<GenerateContentRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContentGenerator for ScriptedGenerator {
    async fn generate_content(
        &self,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(finished_chunk("Mock response", FinishReason::Stop)))
    }

    async fn generate_content_stream(
        &self,
        request: &GenerateContentRequest,
    ) -> Result<ResponseStream> {
        self.stream_requests.lock().unwrap().push(request.clone());
        let (chunks, cancel) = self.streams.lock().unwrap().pop_front().unwrap_or_else(|| {
            (vec![Ok(finished_chunk("Mock response", FinishReason::Stop))], None)
        });
        let stream = futures::stream::iter(chunks).enumerate().map(move |(index, chunk)| {
            if index == 0 {
                if let Some(token) = &cancel {
                    token.cancel();
                }
            }
            chunk
        });
        Ok(Box::pin(stream))
    }

    async fn count_tokens(&self, _request: &CountTokensRequest) -> Result<CountTokensResponse> {
        let total = self.token_counts.lock().unwrap().pop_front().unwrap_or(Ok(10))?;
        Ok(CountTokensResponse {
            total_tokens: Some(total),
        })
    }
}

pub fn text_chunk(text: &str) -> GenerateContentResponse {
    GenerateContentResponse::from_parts(vec![Part::text(text)], None)
}

pub fn finished_chunk(text: &str, reason: FinishReason) -> GenerateContentResponse {
    GenerateContentResponse::from_parts(vec![Part::text(text)], Some(reason))
}

pub fn call_chunk(id: &str, name: &str, args: Value) -> GenerateContentResponse {
    GenerateContentResponse::from_parts(
        vec![Part::function_call(FunctionCall {
            id: Some(id.to_string()),
            name: Some(name.to_string()),
            args: Some(args),
        })],
        Some(FinishReason::Stop),
    )
}

/// Collects error reports in memory.
#[derive(Default)]
pub struct RecordingReporter {
    reports: Mutex<Vec<ErrorReport>>,
}

impl RecordingReporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn kinds(&self) -> Vec<String> {
        self.reports
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.kind.clone())
            .collect()
    }
}

#[async_trait]
impl ErrorReporter for RecordingReporter {
    async fn report(&self, report: ErrorReport) {
        self.reports.lock().unwrap().push(report);
    }
}

/// Always gives the same answer and counts how often it was asked.
pub struct FixedNextSpeaker {
    answer: Option<NextSpeaker>,
    calls: AtomicUsize,
}

impl FixedNextSpeaker {
    pub fn new(answer: Option<NextSpeaker>) -> Arc<Self> {
        Arc::new(Self {
            answer,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NextSpeakerChecker for FixedNextSpeaker {
    async fn check(&self, _chat: &ChatSession, _token: &CancellationToken) -> Option<NextSpeaker> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answer
    }
}

/// Config with retries fast enough for paused-clock tests.
pub fn test_config() -> StewardConfig {
    StewardConfig::new()
        .with_api_key("test-key")
        .with_session_id("test-session")
}

/// A tool that counts its executions.
pub fn counting_tool(name: &str) -> (Arc<dyn Tool>, Arc<AtomicUsize>) {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let tool = Arc::new(FunctionTool::new(
        name,
        "Count how often it runs",
        ToolParameters::empty(),
        move |_args, _token| {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(ToolResult::new(format!("run {n}")))
            }
            .boxed()
        },
    ));
    (tool, runs)
}

pub fn echo_tool() -> Arc<dyn Tool> {
    Arc::new(FunctionTool::new(
        "echo",
        "Echo a message back",
        ToolParameters::object()
            .string("message", "Text to echo", true)
            .build(),
        |args, _token| {
            async move { Ok(ToolResult::new(args.get_str("message")?.to_string())) }.boxed()
        },
    ))
}

/// Sleeps for `delay` unless cancelled first.
pub fn sleep_tool(name: &str, delay: Duration) -> Arc<dyn Tool> {
    let label = name.to_string();
    Arc::new(FunctionTool::new(
        name,
        "Wait for a while",
        ToolParameters::empty(),
        move |_args, token| {
            let label = label.clone();
            async move {
                tokio::select! {
                    _ = token.cancelled() => Err(StewardError::Cancelled),
                    _ = tokio::time::sleep(delay) => Ok(ToolResult::new(format!("{label} done"))),
                }
            }
            .boxed()
        },
    ))
}

pub fn failing_tool() -> Arc<dyn Tool> {
    Arc::new(FunctionTool::new(
        "explode",
        "Always fails",
        ToolParameters::empty(),
        |_args, _token| {
            async move {
                Err(StewardError::ToolExecution {
                    tool_name: "explode".into(),
                    message: "disk on fire".into(),
                })
            }
            .boxed()
        },
    ))
}

/// Writes `content` to `file_path`; asks for an edit confirmation first.
pub struct WriteFileTool {
    parameters: ToolParameters,
    confirmations: AtomicUsize,
}

impl WriteFileTool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            parameters: ToolParameters::object()
                .string("file_path", "File to write", true)
                .string("content", "New content", true)
                .build(),
            confirmations: AtomicUsize::new(0),
        })
    }

    pub fn confirmations(&self) -> usize {
        self.confirmations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write a file"
    }

    fn parameters(&self) -> &ToolParameters {
        &self.parameters
    }

    async fn should_confirm(
        &self,
        args: &ToolArguments,
        _token: &CancellationToken,
    ) -> Result<Option<ConfirmationDetails>> {
        self.confirmations.fetch_add(1, Ordering::SeqCst);
        let file_name = args.get_str("file_path")?.to_string();
        let new_content = args.get_str("content")?.to_string();
        Ok(Some(ConfirmationDetails::new(
            format!("Confirm Write: {file_name}"),
            ConfirmationKind::Edit {
                file_diff: format!("+{new_content}"),
                file_name,
                original_content: None,
                new_content,
            },
        )))
    }

    async fn execute(
        &self,
        args: &ToolArguments,
        _token: CancellationToken,
        _output: Option<OutputCallback>,
    ) -> Result<ToolResult> {
        Ok(ToolResult::new(format!(
            "Wrote {} bytes to {}",
            args.get_str("content")?.len(),
            args.get_str("file_path")?
        )))
    }

    fn modify_args(&self, args: &ToolArguments, new_content: &str) -> Option<ToolArguments> {
        Some(args.with("content", new_content))
    }
}

/// Runs a "command"; asks for an exec confirmation keyed by its first word.
/// Streams the command back as live output.
pub struct ShellTool {
    parameters: ToolParameters,
}

impl ShellTool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            parameters: ToolParameters::object()
                .string("command", "Command to run", true)
                .build(),
        })
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "run_shell_command"
    }

    fn description(&self) -> &str {
        "Run a shell command"
    }

    fn parameters(&self) -> &ToolParameters {
        &self.parameters
    }

    fn can_update_output(&self) -> bool {
        true
    }

    async fn should_confirm(
        &self,
        args: &ToolArguments,
        _token: &CancellationToken,
    ) -> Result<Option<ConfirmationDetails>> {
        let command = args.get_str("command")?.to_string();
        let root_command = command
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string();
        Ok(Some(ConfirmationDetails::new(
            "Confirm Shell Command",
            ConfirmationKind::Exec {
                command,
                root_command,
            },
        )))
    }

    async fn execute(
        &self,
        args: &ToolArguments,
        _token: CancellationToken,
        output: Option<OutputCallback>,
    ) -> Result<ToolResult> {
        let command = args.get_str("command")?.to_string();
        if let Some(output) = output {
            output(format!("$ {command}"));
        }
        Ok(ToolResult::new(format!("ran {command}")))
    }
}

pub fn function_response_value(part: &Part) -> Value {
    part.as_function_response()
        .map(|r| r.response.clone())
        .unwrap_or_else(|| json!(null))
}
