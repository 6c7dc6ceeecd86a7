//! Tool call lifecycle.
//!
//! A [`ToolCall`] moves one way through
//! `Validating -> [AwaitingApproval] -> Scheduled -> Executing -> terminal`.
//! Every transition is a method that checks the current variant and builds
//! the next one; an illegal move returns [`StewardError::InvalidState`] and
//! leaves the original untouched.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio_util::sync::CancellationToken;

use super::response::cancelled_response;
use super::ConfirmationResolver;
use crate::error::{Result, StewardError};
use crate::tools::{
    ConfirmationDetails, ConfirmationKind, ConfirmationOutcome, ResultDisplay, Tool,
    ToolArguments,
};
use crate::types::Part;

/// A function call the model (or the client) asked to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub name: String,
    pub args: serde_json::Value,
    pub is_client_initiated: bool,
    pub prompt_id: String,
}

/// Category of a failed call.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolErrorType {
    ToolNotFound,
    InvalidToolParams,
    UnhandledException,
    ExecutionFailed,
}

/// What goes back to the model (and the user) once a call ends.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallResponse {
    pub call_id: String,
    pub response_parts: Vec<Part>,
    pub result_display: Option<ResultDisplay>,
    pub error: Option<String>,
    pub error_type: Option<ToolErrorType>,
}

/// Coarse status of a call, for logging and matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ToolCallStatus {
    Validating,
    Scheduled,
    AwaitingApproval,
    Executing,
    Success,
    Error,
    Cancelled,
}

impl ToolCallStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Cancelled)
    }
}

#[derive(Clone)]
pub struct ValidatingCall {
    pub request: ToolCallRequest,
    pub tool: Arc<dyn Tool>,
    pub started: Instant,
}

#[derive(Clone)]
pub struct ScheduledCall {
    pub request: ToolCallRequest,
    pub tool: Arc<dyn Tool>,
    pub started: Instant,
    pub outcome: Option<ConfirmationOutcome>,
}

#[derive(Clone)]
pub struct WaitingCall {
    pub request: ToolCallRequest,
    pub tool: Arc<dyn Tool>,
    pub started: Instant,
    pub details: ConfirmationDetails,
    pub resolver: ConfirmationResolver,
}

#[derive(Clone)]
pub struct ExecutingCall {
    pub request: ToolCallRequest,
    pub tool: Arc<dyn Tool>,
    pub started: Instant,
    pub token: CancellationToken,
    pub live_output: Option<String>,
    pub outcome: Option<ConfirmationOutcome>,
}

#[derive(Clone)]
pub struct CompletedCall {
    pub request: ToolCallRequest,
    /// `None` when the tool was never found.
    pub tool: Option<Arc<dyn Tool>>,
    pub response: ToolCallResponse,
    pub duration_ms: u64,
    pub outcome: Option<ConfirmationOutcome>,
}

/// One tool call in one of its lifecycle states.
#[derive(Clone)]
pub enum ToolCall {
    Validating(ValidatingCall),
    Scheduled(ScheduledCall),
    AwaitingApproval(WaitingCall),
    Executing(ExecutingCall),
    Success(CompletedCall),
    Error(CompletedCall),
    Cancelled(CompletedCall),
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

impl ToolCall {
    /// A freshly validated call.
    pub fn validating(request: ToolCallRequest, tool: Arc<dyn Tool>) -> Self {
        Self::Validating(ValidatingCall {
            request,
            tool,
            started: Instant::now(),
        })
    }

    /// A call that failed before it could be validated (unknown tool, bad params).
    pub fn rejected(
        request: ToolCallRequest,
        tool: Option<Arc<dyn Tool>>,
        response: ToolCallResponse,
    ) -> Self {
        Self::Error(CompletedCall {
            request,
            tool,
            response,
            duration_ms: 0,
            outcome: None,
        })
    }

    pub fn status(&self) -> ToolCallStatus {
        match self {
            Self::Validating(_) => ToolCallStatus::Validating,
            Self::Scheduled(_) => ToolCallStatus::Scheduled,
            Self::AwaitingApproval(_) => ToolCallStatus::AwaitingApproval,
            Self::Executing(_) => ToolCallStatus::Executing,
            Self::Success(_) => ToolCallStatus::Success,
            Self::Error(_) => ToolCallStatus::Error,
            Self::Cancelled(_) => ToolCallStatus::Cancelled,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn request(&self) -> &ToolCallRequest {
        match self {
            Self::Validating(c) => &c.request,
            Self::Scheduled(c) => &c.request,
            Self::AwaitingApproval(c) => &c.request,
            Self::Executing(c) => &c.request,
            Self::Success(c) | Self::Error(c) | Self::Cancelled(c) => &c.request,
        }
    }

    pub fn call_id(&self) -> &str {
        &self.request().call_id
    }

    pub fn tool(&self) -> Option<&Arc<dyn Tool>> {
        match self {
            Self::Validating(c) => Some(&c.tool),
            Self::Scheduled(c) => Some(&c.tool),
            Self::AwaitingApproval(c) => Some(&c.tool),
            Self::Executing(c) => Some(&c.tool),
            Self::Success(c) | Self::Error(c) | Self::Cancelled(c) => c.tool.as_ref(),
        }
    }

    /// Terminal response, once there is one.
    pub fn response(&self) -> Option<&ToolCallResponse> {
        match self {
            Self::Success(c) | Self::Error(c) | Self::Cancelled(c) => Some(&c.response),
            _ => None,
        }
    }

    pub fn duration_ms(&self) -> Option<u64> {
        match self {
            Self::Success(c) | Self::Error(c) | Self::Cancelled(c) => Some(c.duration_ms),
            _ => None,
        }
    }

    pub fn outcome(&self) -> Option<ConfirmationOutcome> {
        match self {
            Self::Scheduled(c) => c.outcome,
            Self::Executing(c) => c.outcome,
            Self::Success(c) | Self::Error(c) | Self::Cancelled(c) => c.outcome,
            _ => None,
        }
    }

    pub fn confirmation_details(&self) -> Option<&ConfirmationDetails> {
        match self {
            Self::AwaitingApproval(c) => Some(&c.details),
            _ => None,
        }
    }

    pub fn resolver(&self) -> Option<&ConfirmationResolver> {
        match self {
            Self::AwaitingApproval(c) => Some(&c.resolver),
            _ => None,
        }
    }

    pub fn live_output(&self) -> Option<&str> {
        match self {
            Self::Executing(c) => c.live_output.as_deref(),
            _ => None,
        }
    }

    fn invalid(&self, target: ToolCallStatus) -> StewardError {
        StewardError::InvalidState(format!(
            "tool call {} cannot move from {} to {}",
            self.call_id(),
            self.status(),
            target
        ))
    }

    fn started(&self) -> Option<Instant> {
        match self {
            Self::Validating(c) => Some(c.started),
            Self::Scheduled(c) => Some(c.started),
            Self::AwaitingApproval(c) => Some(c.started),
            Self::Executing(c) => Some(c.started),
            _ => None,
        }
    }

    /// Validating -> AwaitingApproval.
    pub fn await_approval(
        &self,
        details: ConfirmationDetails,
        resolver: ConfirmationResolver,
    ) -> Result<Self> {
        match self {
            Self::Validating(c) => Ok(Self::AwaitingApproval(WaitingCall {
                request: c.request.clone(),
                tool: Arc::clone(&c.tool),
                started: c.started,
                details,
                resolver,
            })),
            _ => Err(self.invalid(ToolCallStatus::AwaitingApproval)),
        }
    }

    /// Validating | AwaitingApproval -> Scheduled. `args` replaces the
    /// request arguments when the user modified them.
    pub fn schedule(
        &self,
        outcome: Option<ConfirmationOutcome>,
        args: Option<ToolArguments>,
    ) -> Result<Self> {
        let (request, tool, started) = match self {
            Self::Validating(c) => (&c.request, &c.tool, c.started),
            Self::AwaitingApproval(c) => (&c.request, &c.tool, c.started),
            _ => return Err(self.invalid(ToolCallStatus::Scheduled)),
        };
        let mut request = request.clone();
        if let Some(args) = args {
            request.args = args.into_raw();
        }
        Ok(Self::Scheduled(ScheduledCall {
            request,
            tool: Arc::clone(tool),
            started,
            outcome,
        }))
    }

    /// Scheduled -> Executing.
    pub fn start_execution(&self, token: CancellationToken) -> Result<Self> {
        match self {
            Self::Scheduled(c) => Ok(Self::Executing(ExecutingCall {
                request: c.request.clone(),
                tool: Arc::clone(&c.tool),
                started: c.started,
                token,
                live_output: None,
                outcome: c.outcome,
            })),
            _ => Err(self.invalid(ToolCallStatus::Executing)),
        }
    }

    /// Record live output of an executing call. Not a state change.
    pub fn with_live_output(&self, output: String) -> Result<Self> {
        match self {
            Self::Executing(c) => Ok(Self::Executing(ExecutingCall {
                live_output: Some(output),
                ..c.clone()
            })),
            _ => Err(self.invalid(ToolCallStatus::Executing)),
        }
    }

    /// Executing -> Success.
    pub fn succeed(&self, response: ToolCallResponse) -> Result<Self> {
        match self {
            Self::Executing(c) => Ok(Self::Success(CompletedCall {
                request: c.request.clone(),
                tool: Some(Arc::clone(&c.tool)),
                response,
                duration_ms: elapsed_ms(c.started),
                outcome: c.outcome,
            })),
            _ => Err(self.invalid(ToolCallStatus::Success)),
        }
    }

    /// Any non-terminal state -> Error.
    pub fn fail(&self, response: ToolCallResponse) -> Result<Self> {
        let started = self
            .started()
            .ok_or_else(|| self.invalid(ToolCallStatus::Error))?;
        Ok(Self::Error(CompletedCall {
            request: self.request().clone(),
            tool: self.tool().cloned(),
            response,
            duration_ms: elapsed_ms(started),
            outcome: self.outcome(),
        }))
    }

    /// Any non-terminal state -> Cancelled.
    ///
    /// A call cancelled while awaiting approval of an edit keeps the proposed
    /// diff as its result display.
    pub fn cancel(&self, reason: &str) -> Result<Self> {
        let started = self
            .started()
            .ok_or_else(|| self.invalid(ToolCallStatus::Cancelled))?;
        let display = match self {
            Self::AwaitingApproval(c) => match &c.details.kind {
                ConfirmationKind::Edit {
                    file_name,
                    file_diff,
                    original_content,
                    new_content,
                } => Some(ResultDisplay::FileDiff {
                    file_name: file_name.clone(),
                    file_diff: file_diff.clone(),
                    original_content: original_content.clone(),
                    new_content: new_content.clone(),
                }),
                _ => None,
            },
            _ => None,
        };
        let request = self.request().clone();
        let response = cancelled_response(&request, reason, display);
        Ok(Self::Cancelled(CompletedCall {
            request,
            tool: self.tool().cloned(),
            response,
            duration_ms: elapsed_ms(started),
            outcome: self.outcome(),
        }))
    }
}

impl fmt::Debug for ToolCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolCall")
            .field("status", &self.status())
            .field("call_id", &self.call_id())
            .field("name", &self.request().name)
            .field("response", &self.response())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::response::error_response;
    use crate::tools::{FunctionTool, ToolParameters, ToolResult};
    use futures::FutureExt;
    use serde_json::json;

    fn request(id: &str) -> ToolCallRequest {
        ToolCallRequest {
            call_id: id.into(),
            name: "noop".into(),
            args: json!({}),
            is_client_initiated: false,
            prompt_id: "p1".into(),
        }
    }

    fn tool() -> Arc<dyn Tool> {
        Arc::new(FunctionTool::new(
            "noop",
            "Does nothing",
            ToolParameters::empty(),
            |_args, _token| async { Ok(ToolResult::new("done")) }.boxed(),
        ))
    }

    #[test]
    fn happy_path_moves_forward_only() {
        let call = ToolCall::validating(request("c1"), tool());
        let scheduled = call.schedule(None, None).unwrap();
        let executing = scheduled.start_execution(CancellationToken::new()).unwrap();
        assert_eq!(executing.status(), ToolCallStatus::Executing);

        let response = error_response(&request("c1"), "boom", ToolErrorType::ExecutionFailed);
        let failed = executing.fail(response).unwrap();
        assert_eq!(failed.status(), ToolCallStatus::Error);
        assert!(failed.duration_ms().is_some());

        assert!(matches!(
            failed.cancel("late"),
            Err(StewardError::InvalidState(_))
        ));
        assert!(scheduled.schedule(None, None).is_err());
        assert!(call.start_execution(CancellationToken::new()).is_err());
    }

    #[test]
    fn scheduling_can_replace_arguments() {
        let call = ToolCall::validating(request("c1"), tool());
        let scheduled = call
            .schedule(
                Some(ConfirmationOutcome::ProceedOnce),
                Some(ToolArguments::new(json!({ "content": "edited" }))),
            )
            .unwrap();
        assert_eq!(scheduled.request().args, json!({ "content": "edited" }));
        assert_eq!(scheduled.outcome(), Some(ConfirmationOutcome::ProceedOnce));
    }

    #[test]
    fn live_output_only_applies_to_executing_calls() {
        let call = ToolCall::validating(request("c1"), tool());
        assert!(call.with_live_output("x".into()).is_err());
        let executing = call
            .schedule(None, None)
            .and_then(|c| c.start_execution(CancellationToken::new()))
            .and_then(|c| c.with_live_output("partial".into()))
            .unwrap();
        assert_eq!(executing.live_output(), Some("partial"));
    }
}
