//! Steward: supervised tool calling for model-driven coding assistants.
//!
//! The crate drives a conversation with a Gemini-style model: it streams
//! model turns, schedules the tool calls the model asks for through a
//! confirmation-aware state machine, feeds tool output back, compresses
//! history when it grows near the context limit and falls back to a
//! faster model under persistent rate limiting.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use steward::prelude::*;
//!
//! # async fn example() -> steward::error::Result<()> {
//! let config = StewardConfig::load(None)?;
//! let generator = steward::provider::create_content_generator(&config)?;
//! let telemetry = Telemetry::start(config.session_id(), Arc::new(TracingSink));
//! let mut session = AgentSession::new(
//!     config,
//!     generator,
//!     ToolRegistry::new(),
//!     telemetry,
//!     Arc::new(TracingErrorReporter),
//! );
//!
//! let (events, mut rx) = event_channel();
//! let token = CancellationToken::new();
//! session
//!     .run(vec![Part::text("List the files here")], "prompt-1", &token, &events)
//!     .await?;
//! drop(events);
//! while let Some(event) = rx.recv().await {
//!     if let AgentEvent::Content(text) = event {
//!         print!("{text}");
//!     }
//! }
//! session.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod models;
pub mod prelude;
pub mod provider;
pub mod report;
pub mod scheduler;
pub mod session;
pub mod telemetry;
pub mod tools;
pub mod turn;
pub mod types;
pub mod util;
