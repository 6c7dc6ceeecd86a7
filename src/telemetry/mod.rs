//! Session telemetry.
//!
//! A [`Telemetry`] handle is created when a session starts and passed to the
//! chat, the session and the scheduler. Events are queued on an unbounded
//! channel and drained by a background task into a [`TelemetrySink`];
//! [`Telemetry::shutdown`] flushes whatever is still queued.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::tools::ConfirmationOutcome;
use crate::types::UsageMetadata;

/// How the user answered a confirmation, as recorded for a tool call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallDecision {
    Accept,
    Reject,
    Modify,
}

impl From<ConfirmationOutcome> for ToolCallDecision {
    fn from(outcome: ConfirmationOutcome) -> Self {
        match outcome {
            ConfirmationOutcome::ProceedOnce | ConfirmationOutcome::ProceedAlways => Self::Accept,
            ConfirmationOutcome::ModifyWithEditor => Self::Modify,
            ConfirmationOutcome::Cancel => Self::Reject,
        }
    }
}

/// Telemetry payloads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelemetryEvent {
    UserPrompt {
        prompt_id: String,
        prompt_length: usize,
    },
    ApiRequest {
        model: String,
        prompt_id: String,
        request_text: Option<String>,
    },
    ApiResponse {
        model: String,
        prompt_id: String,
        duration_ms: u64,
        usage: Option<UsageMetadata>,
        response_text: Option<String>,
    },
    ApiError {
        model: String,
        prompt_id: String,
        duration_ms: u64,
        error: String,
        status: Option<u16>,
    },
    ToolCall {
        call_id: String,
        function_name: String,
        function_args: serde_json::Value,
        prompt_id: String,
        duration_ms: u64,
        success: bool,
        decision: Option<ToolCallDecision>,
        error: Option<String>,
        error_type: Option<String>,
    },
    NextSpeakerCheck {
        prompt_id: String,
        result: String,
    },
    ChatCompression {
        tokens_before: u64,
        tokens_after: u64,
    },
    FlashFallback {
        from_model: String,
        to_model: String,
    },
    MaxSessionTurns {
        limit: usize,
    },
}

/// Envelope for queued events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryRecord {
    pub session_id: String,
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub event: TelemetryEvent,
}

/// Destination for drained telemetry records.
pub trait TelemetrySink: Send + Sync {
    fn record(&self, record: TelemetryRecord);
}

/// Writes every record as a structured `tracing` event.
#[derive(Debug, Default)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn record(&self, record: TelemetryRecord) {
        let payload = serde_json::to_string(&record.event).unwrap_or_default();
        tracing::info!(
            target: "steward::telemetry",
            session_id = %record.session_id,
            seq = record.seq,
            event = %payload,
            "telemetry"
        );
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<TelemetryRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TelemetryRecord> {
        self.records
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.records().into_iter().map(|r| r.event).collect()
    }
}

impl TelemetrySink for MemorySink {
    fn record(&self, record: TelemetryRecord) {
        self.records
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(record);
    }
}

struct TelemetryInner {
    session_id: String,
    seq: AtomicU64,
    sender: Mutex<Option<mpsc::UnboundedSender<TelemetryRecord>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Cloneable telemetry handle.
#[derive(Clone)]
pub struct Telemetry {
    inner: Arc<TelemetryInner>,
}

impl std::fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telemetry")
            .field("session_id", &self.inner.session_id)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl Telemetry {
    /// Start draining into `sink`. Must be called inside a Tokio runtime.
    pub fn start(session_id: impl Into<String>, sink: Arc<dyn TelemetrySink>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<TelemetryRecord>();
        let worker = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                sink.record(record);
            }
        });
        Self {
            inner: Arc::new(TelemetryInner {
                session_id: session_id.into(),
                seq: AtomicU64::new(0),
                sender: Mutex::new(Some(tx)),
                worker: Mutex::new(Some(worker)),
            }),
        }
    }

    /// A handle that drops every event.
    pub fn disabled() -> Self {
        Self {
            inner: Arc::new(TelemetryInner {
                session_id: String::new(),
                seq: AtomicU64::new(0),
                sender: Mutex::new(None),
                worker: Mutex::new(None),
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner
            .sender
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .is_some()
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Queue an event. Dropped silently once shut down.
    pub fn log(&self, event: TelemetryEvent) {
        let sender = self.inner.sender.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(tx) = sender.as_ref() {
            let record = TelemetryRecord {
                session_id: self.inner.session_id.clone(),
                seq: self.inner.seq.fetch_add(1, Ordering::Relaxed),
                timestamp: Utc::now(),
                event,
            };
            let _ = tx.send(record);
        }
    }

    /// Stop accepting events and wait until the queue is drained.
    pub async fn shutdown(&self) {
        self.inner
            .sender
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        let worker = self
            .inner
            .worker
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(worker) = worker {
            if let Err(err) = worker.await {
                tracing::warn!(error = %err, "Telemetry worker ended abnormally");
            }
        }
    }
}
