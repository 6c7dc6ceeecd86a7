//! A single model turn: stream chunks in, ordered events out.

mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use common::*;
use steward::error::StewardError;
use steward::session::ChatSession;
use steward::telemetry::Telemetry;
use steward::turn::*;
use steward::types::*;

fn chat(generator: Arc<ScriptedGenerator>) -> ChatSession {
    ChatSession::new(
        test_config(),
        generator,
        Telemetry::disabled(),
        GenerateContentConfig::default(),
        Vec::new(),
    )
}

fn drain(mut rx: EventReceiver) -> Vec<AgentEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

async fn run_turn(
    generator: Arc<ScriptedGenerator>,
    reporter: Arc<RecordingReporter>,
    token: &CancellationToken,
) -> (Turn, Vec<AgentEvent>, ChatSession) {
    let chat = chat(generator);
    let (tx, rx) = event_channel();
    let mut turn = Turn::new("prompt-1", reporter);
    turn.run(&chat, vec![Part::text("hi")], token, &tx).await;
    drop(tx);
    (turn, drain(rx), chat)
}

#[tokio::test]
async fn content_then_a_single_finished_event() {
    let generator = ScriptedGenerator::new();
    generator.queue_stream(vec![
        Ok(text_chunk("Hello")),
        Ok(finished_chunk(" world", FinishReason::Safety)),
    ]);

    let (turn, events, chat) =
        run_turn(generator, RecordingReporter::new(), &CancellationToken::new()).await;

    assert_eq!(
        events,
        vec![
            AgentEvent::Content("Hello".into()),
            AgentEvent::Content(" world".into()),
            AgentEvent::Finished(FinishReason::Safety),
        ]
    );
    assert_eq!(turn.finish_reason(), Some(FinishReason::Safety));
    assert_eq!(turn.debug_responses().len(), 2);
    assert_eq!(
        chat.history(false),
        vec![
            Content::user_text("hi"),
            Content::model_text("Hello world"),
        ]
    );
}

#[tokio::test]
async fn no_finish_reason_means_no_finished_event() {
    let generator = ScriptedGenerator::new();
    generator.queue_stream(vec![Ok(text_chunk("partial"))]);

    let (turn, events, _) =
        run_turn(generator, RecordingReporter::new(), &CancellationToken::new()).await;

    assert_eq!(events, vec![AgentEvent::Content("partial".into())]);
    assert_eq!(turn.finish_reason(), None);
}

#[tokio::test]
async fn thoughts_are_parsed_into_subject_and_description() {
    let generator = ScriptedGenerator::new();
    generator.queue_stream(vec![Ok(GenerateContentResponse::from_parts(
        vec![Part::thought("**Planning** look at the tests first")],
        None,
    ))]);

    let (_, events, _) =
        run_turn(generator, RecordingReporter::new(), &CancellationToken::new()).await;

    assert_eq!(
        events,
        vec![AgentEvent::Thought(ThoughtSummary {
            subject: "Planning".into(),
            description: "look at the tests first".into(),
        })]
    );
}

#[tokio::test]
async fn function_calls_become_pending_tool_call_requests() {
    let generator = ScriptedGenerator::new();
    generator.queue_stream(vec![
        Ok(call_chunk("call-1", "read_file", json!({ "path": "a.rs" }))),
        Ok(GenerateContentResponse::from_parts(
            vec![
                Part::function_call(FunctionCall {
                    id: None,
                    name: Some("list_directory".into()),
                    args: None,
                }),
                Part::function_call(FunctionCall::default()),
            ],
            None,
        )),
    ]);

    let (turn, events, _) =
        run_turn(generator, RecordingReporter::new(), &CancellationToken::new()).await;

    let pending = turn.pending_tool_calls();
    assert_eq!(pending.len(), 3);
    assert_eq!(pending[0].call_id, "call-1");
    assert_eq!(pending[0].args, json!({ "path": "a.rs" }));
    assert_eq!(pending[0].prompt_id, "prompt-1");

    assert!(pending[1].call_id.starts_with("list_directory-"));
    assert_eq!(pending[1].args, json!({}));
    assert_eq!(pending[2].name, UNDEFINED_TOOL_NAME);
    assert_ne!(pending[1].call_id, pending[2].call_id);

    let requested: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::ToolCallRequest(r) => Some(r.call_id.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(requested.len(), 3);
}

#[tokio::test]
async fn stream_failure_is_reported_once() {
    let generator = ScriptedGenerator::new();
    generator.queue_stream(vec![
        Ok(text_chunk("Hel")),
        Err(StewardError::api(500, "backend exploded")),
    ]);
    let reporter = RecordingReporter::new();

    let (turn, events, chat) =
        run_turn(generator, reporter.clone(), &CancellationToken::new()).await;

    assert_eq!(
        events,
        vec![
            AgentEvent::Content("Hel".into()),
            AgentEvent::Error {
                message: "API error (status 500): backend exploded".into(),
                status: Some(500),
            },
        ]
    );
    assert_eq!(reporter.kinds(), vec!["turn-send-message-stream".to_string()]);
    assert!(turn.error().is_some());
    assert!(chat.history(false).is_empty());
}

#[tokio::test]
async fn cancelled_token_yields_user_cancelled_without_sending() {
    let generator = ScriptedGenerator::new();
    let token = CancellationToken::new();
    token.cancel();
    let reporter = RecordingReporter::new();

    let (_, events, _) = run_turn(generator.clone(), reporter.clone(), &token).await;

    assert_eq!(events, vec![AgentEvent::UserCancelled]);
    assert!(generator.stream_requests().is_empty());
    assert!(reporter.kinds().is_empty());
}

#[tokio::test]
async fn cancellation_mid_stream_stops_events_and_history() {
    let generator = ScriptedGenerator::new();
    let token = CancellationToken::new();
    generator.queue_stream_cancelling_after_first(
        vec![
            Ok(text_chunk("first")),
            Ok(text_chunk("second")),
            Ok(call_chunk("c1", "echo", json!({ "message": "late" }))),
        ],
        token.clone(),
    );
    let reporter = RecordingReporter::new();

    let (turn, events, chat) = run_turn(generator.clone(), reporter.clone(), &token).await;

    assert_eq!(
        events,
        vec![
            AgentEvent::Content("first".into()),
            AgentEvent::UserCancelled,
        ]
    );
    assert!(turn.pending_tool_calls().is_empty());
    assert!(turn.error().is_none());
    assert!(chat.history(false).is_empty());
    assert!(reporter.kinds().is_empty());
    assert_eq!(generator.stream_requests().len(), 1);
}
