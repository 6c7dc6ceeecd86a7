//! Convenience re-exports for common use.

pub use crate::config::{ApprovalMode, StewardConfig};
pub use crate::error::{Result, StewardError};
pub use crate::provider::ContentGenerator;
pub use crate::report::{ErrorReporter, FileErrorReporter, TracingErrorReporter};
pub use crate::scheduler::{
    SchedulerHandlers, ToolCall, ToolCallRequest, ToolCallScheduler, ToolCallStatus,
};
pub use crate::session::{AgentSession, NextSpeaker, NextSpeakerChecker};
pub use crate::telemetry::{Telemetry, TracingSink};
pub use crate::tools::{
    ConfirmationDetails, ConfirmationOutcome, FunctionTool, ParameterBuilder, Tool,
    ToolArguments, ToolParameters, ToolRegistry, ToolResult,
};
pub use crate::turn::{event_channel, AgentEvent, Turn};
pub use crate::types::{Content, GenerateContentConfig, Part, Role};
pub use tokio_util::sync::CancellationToken;
