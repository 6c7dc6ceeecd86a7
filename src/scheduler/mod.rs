//! Tool call scheduler.
//!
//! Takes the function calls of one model turn (a batch), validates them,
//! asks for approval where the approval policy requires it, runs the approved
//! calls concurrently and reports every state change through
//! [`SchedulerHandlers`]. A batch completes once every call is terminal.

pub mod response;
pub mod state;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{ApprovalMode, StewardConfig};
use crate::error::{Result, StewardError};
use crate::telemetry::{Telemetry, TelemetryEvent};
use crate::tools::{
    ConfirmationDetails, ConfirmationKind, ConfirmationOutcome, ConfirmationPayload,
    OutputCallback, Tool, ToolArguments, ToolRegistry,
};

pub use response::{
    cancelled_response, convert_to_function_response, error_response, success_response,
};
pub use state::{
    CompletedCall, ExecutingCall, ScheduledCall, ToolCall, ToolCallRequest, ToolCallResponse,
    ToolCallStatus, ToolErrorType, ValidatingCall, WaitingCall,
};

const CANCELLED_BY_USER: &str = "Tool call cancelled by user.";
const USER_DENIED: &str = "User did not allow tool call";
const EXECUTION_CANCELLED: &str = "User cancelled tool execution.";

pub type ToolCallsUpdateHandler = Arc<dyn Fn(&[ToolCall]) + Send + Sync>;
pub type AllToolCallsCompleteHandler = Arc<dyn Fn(&[ToolCall]) + Send + Sync>;
/// Called with `(call_id, output)` whenever an executing tool reports output.
pub type OutputUpdateHandler = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Observers of scheduler progress.
///
/// Handlers run while the scheduler holds its state lock, so they observe
/// transitions in order. They must not call back into the scheduler
/// synchronously; spawn a task to answer a confirmation instead.
#[derive(Clone, Default)]
pub struct SchedulerHandlers {
    pub on_tool_calls_update: Option<ToolCallsUpdateHandler>,
    pub on_all_tool_calls_complete: Option<AllToolCallsCompleteHandler>,
    pub on_output_update: Option<OutputUpdateHandler>,
}

impl SchedulerHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_tool_calls_update(mut self, f: impl Fn(&[ToolCall]) + Send + Sync + 'static) -> Self {
        self.on_tool_calls_update = Some(Arc::new(f));
        self
    }

    pub fn on_all_tool_calls_complete(
        mut self,
        f: impl Fn(&[ToolCall]) + Send + Sync + 'static,
    ) -> Self {
        self.on_all_tool_calls_complete = Some(Arc::new(f));
        self
    }

    pub fn on_output_update(mut self, f: impl Fn(&str, &str) + Send + Sync + 'static) -> Self {
        self.on_output_update = Some(Arc::new(f));
        self
    }
}

/// Answers the confirmation request of one call.
#[derive(Clone)]
pub struct ConfirmationResolver {
    shared: Weak<SchedulerShared>,
    call_id: String,
}

impl ConfirmationResolver {
    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub async fn resolve(
        &self,
        outcome: ConfirmationOutcome,
        payload: Option<ConfirmationPayload>,
    ) -> Result<()> {
        let shared = self
            .shared
            .upgrade()
            .ok_or_else(|| StewardError::InvalidState("tool scheduler was dropped".into()))?;
        shared
            .handle_confirmation(&self.call_id, outcome, payload)
            .await
    }
}

impl std::fmt::Debug for ConfirmationResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfirmationResolver")
            .field("call_id", &self.call_id)
            .finish()
    }
}

/// Resolves with the terminal calls of a batch, in request order.
#[derive(Debug)]
pub struct BatchHandle {
    batch_id: u64,
    rx: oneshot::Receiver<Vec<ToolCall>>,
}

impl BatchHandle {
    pub fn batch_id(&self) -> u64 {
        self.batch_id
    }

    pub async fn wait(self) -> Result<Vec<ToolCall>> {
        self.rx.await.map_err(|_| {
            StewardError::InvalidState("tool call batch was dropped before completing".into())
        })
    }
}

struct Batch {
    id: u64,
    order: Vec<String>,
    calls: HashMap<String, ToolCall>,
    token: CancellationToken,
    done: Option<oneshot::Sender<Vec<ToolCall>>>,
    finished: CancellationToken,
}

impl Batch {
    fn snapshot(&self) -> Vec<ToolCall> {
        self.order
            .iter()
            .filter_map(|id| self.calls.get(id).cloned())
            .collect()
    }

    /// Not yet reported as complete.
    fn is_active(&self) -> bool {
        self.done.is_some()
    }

    fn all_terminal(&self) -> bool {
        self.calls.values().all(ToolCall::is_terminal)
    }

    fn ids_with(&self, pred: impl Fn(ToolCallStatus) -> bool) -> Vec<(String, ToolCallStatus)> {
        self.order
            .iter()
            .filter_map(|id| {
                let status = self.calls.get(id)?.status();
                pred(status).then(|| (id.clone(), status))
            })
            .collect()
    }
}

#[derive(Default)]
struct SchedulerState {
    batch: Option<Batch>,
    next_batch_id: u64,
}

struct SchedulerShared {
    registry: Arc<ToolRegistry>,
    config: StewardConfig,
    telemetry: Telemetry,
    handlers: SchedulerHandlers,
    allowed_root_commands: Mutex<HashSet<String>>,
    state: Mutex<SchedulerState>,
}

/// Schedules and supervises tool call batches.
#[derive(Clone)]
pub struct ToolCallScheduler {
    shared: Arc<SchedulerShared>,
}

impl std::fmt::Debug for ToolCallScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCallScheduler")
            .field("registry", &self.shared.registry)
            .field("running", &self.is_running())
            .finish()
    }
}

impl ToolCallScheduler {
    pub fn new(
        registry: Arc<ToolRegistry>,
        config: StewardConfig,
        telemetry: Telemetry,
        handlers: SchedulerHandlers,
    ) -> Self {
        Self {
            shared: Arc::new(SchedulerShared {
                registry,
                config,
                telemetry,
                handlers,
                allowed_root_commands: Mutex::new(HashSet::new()),
                state: Mutex::new(SchedulerState::default()),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.shared.registry
    }

    /// Whether a batch is still in progress.
    pub fn is_running(&self) -> bool {
        self.shared
            .lock()
            .batch
            .as_ref()
            .is_some_and(Batch::is_active)
    }

    /// Snapshot of the current (or most recent) batch.
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.shared
            .lock()
            .batch
            .as_ref()
            .map(Batch::snapshot)
            .unwrap_or_default()
    }

    pub fn is_root_command_allowed(&self, root_command: &str) -> bool {
        self.shared.is_root_command_allowed(root_command)
    }

    /// Schedule a batch of calls.
    ///
    /// Returns once every call has been validated and either scheduled or
    /// put in front of the user; executions continue in the background.
    pub async fn schedule(
        &self,
        requests: Vec<ToolCallRequest>,
        token: CancellationToken,
    ) -> Result<BatchHandle> {
        let shared = &self.shared;
        let (batch_id, finished, pending, rx) = {
            let mut state = shared.lock();
            if state.batch.as_ref().is_some_and(Batch::is_active) {
                return Err(StewardError::InvalidState(
                    "Cannot schedule new tool calls while other tool calls are actively running \
                     (executing or awaiting approval)."
                        .into(),
                ));
            }

            let mut order = Vec::with_capacity(requests.len());
            let mut calls = HashMap::with_capacity(requests.len());
            let mut pending = Vec::new();
            for request in requests {
                if calls.contains_key(&request.call_id) {
                    return Err(StewardError::InvalidArgument(format!(
                        "duplicate tool call id {}",
                        request.call_id
                    )));
                }
                let call_id = request.call_id.clone();
                let call = shared.initial_call(request, &mut pending);
                order.push(call_id.clone());
                calls.insert(call_id, call);
            }

            let batch_id = state.next_batch_id;
            state.next_batch_id += 1;
            let (tx, rx) = oneshot::channel();
            let finished = CancellationToken::new();
            let batch = Batch {
                id: batch_id,
                order,
                calls,
                token: token.clone(),
                done: Some(tx),
                finished: finished.clone(),
            };
            debug!(batch_id, calls = batch.order.len(), "Scheduling tool calls");
            shared.emit_update(&batch);
            state.batch = Some(batch);
            shared.check_completion(&mut state);
            (batch_id, finished, pending, rx)
        };

        shared.spawn_cancellation_watcher(batch_id, token.clone(), finished);

        for (call_id, tool, args) in pending {
            shared
                .confirm_or_schedule(batch_id, &call_id, tool, args, &token)
                .await;
        }
        shared.attempt_execution(batch_id);

        Ok(BatchHandle { batch_id, rx })
    }

    /// Answer the confirmation request of a call awaiting approval.
    pub async fn handle_confirmation_response(
        &self,
        call_id: &str,
        outcome: ConfirmationOutcome,
        payload: Option<ConfirmationPayload>,
    ) -> Result<()> {
        self.shared
            .handle_confirmation(call_id, outcome, payload)
            .await
    }
}

impl SchedulerShared {
    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn is_root_command_allowed(&self, root_command: &str) -> bool {
        self.allowed_root_commands
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(root_command)
    }

    /// Look up and validate; unknown tools and bad params end in `Error` right away.
    fn initial_call(
        &self,
        request: ToolCallRequest,
        pending: &mut Vec<(String, Arc<dyn Tool>, ToolArguments)>,
    ) -> ToolCall {
        let Some(tool) = self.registry.get(&request.name) else {
            let message = StewardError::ToolNotFound(request.name.clone()).to_string();
            let response = error_response(&request, &message, ToolErrorType::ToolNotFound);
            return ToolCall::rejected(request, None, response);
        };
        let args = ToolArguments::new(request.args.clone());
        if let Some(message) = tool.validate(&args) {
            let response = error_response(&request, &message, ToolErrorType::InvalidToolParams);
            return ToolCall::rejected(request, Some(tool), response);
        }
        pending.push((request.call_id.clone(), Arc::clone(&tool), args));
        ToolCall::validating(request, tool)
    }

    fn emit_update(&self, batch: &Batch) {
        if let Some(handler) = &self.handlers.on_tool_calls_update {
            handler(&batch.snapshot());
        }
    }

    /// Apply a transition to a call of the active batch, publish it, and
    /// complete the batch if that was the last one.
    fn update_call<F>(
        &self,
        state: &mut SchedulerState,
        batch_id: u64,
        call_id: &str,
        transition: F,
    ) -> Result<ToolCall>
    where
        F: FnOnce(&ToolCall) -> Result<ToolCall>,
    {
        let batch = state
            .batch
            .as_mut()
            .filter(|b| b.id == batch_id && b.is_active())
            .ok_or_else(|| StewardError::InvalidState(format!("batch {batch_id} is not active")))?;
        let current = batch
            .calls
            .get(call_id)
            .ok_or_else(|| StewardError::InvalidState(format!("unknown tool call {call_id}")))?;
        let next = transition(current)?;
        debug!(
            call_id,
            tool = %next.request().name,
            from = %current.status(),
            to = %next.status(),
            "Tool call transition"
        );
        batch.calls.insert(call_id.to_string(), next.clone());
        self.emit_update(batch);
        self.check_completion(state);
        Ok(next)
    }

    /// Like [`update_call`](Self::update_call), for transitions that may lose
    /// a race against cancellation.
    fn try_update<F>(&self, batch_id: u64, call_id: &str, transition: F) -> Option<ToolCall>
    where
        F: FnOnce(&ToolCall) -> Result<ToolCall>,
    {
        let mut state = self.lock();
        match self.update_call(&mut state, batch_id, call_id, transition) {
            Ok(call) => Some(call),
            Err(err) => {
                debug!(call_id, error = %err, "Skipping tool call transition");
                None
            }
        }
    }

    fn check_completion(&self, state: &mut SchedulerState) {
        let Some(batch) = state.batch.as_mut() else {
            return;
        };
        if !batch.is_active() || !batch.all_terminal() {
            return;
        }
        let calls = batch.snapshot();
        for call in &calls {
            self.log_tool_call(call);
        }
        if let Some(handler) = &self.handlers.on_all_tool_calls_complete {
            handler(&calls);
        }
        debug!(batch_id = batch.id, calls = calls.len(), "Tool call batch complete");
        if let Some(tx) = batch.done.take() {
            let _ = tx.send(calls);
        }
        batch.finished.cancel();
    }

    fn log_tool_call(&self, call: &ToolCall) {
        let request = call.request();
        let response = call.response();
        self.telemetry.log(TelemetryEvent::ToolCall {
            call_id: request.call_id.clone(),
            function_name: request.name.clone(),
            function_args: request.args.clone(),
            prompt_id: request.prompt_id.clone(),
            duration_ms: call.duration_ms().unwrap_or_default(),
            success: call.status() == ToolCallStatus::Success,
            decision: call.outcome().map(Into::into),
            error: response.and_then(|r| r.error.clone()),
            error_type: response.and_then(|r| r.error_type).map(|t| t.to_string()),
        });
    }

    fn is_policy_approved(&self, details: &ConfirmationDetails) -> bool {
        match &details.kind {
            ConfirmationKind::Edit { .. } => {
                self.config.approval_mode() == ApprovalMode::AutoEdit
            }
            ConfirmationKind::Exec { root_command, .. } => {
                self.is_root_command_allowed(root_command)
            }
            ConfirmationKind::Info { .. } => false,
        }
    }

    async fn confirm_or_schedule(
        self: &Arc<Self>,
        batch_id: u64,
        call_id: &str,
        tool: Arc<dyn Tool>,
        args: ToolArguments,
        token: &CancellationToken,
    ) {
        if token.is_cancelled() {
            self.try_update(batch_id, call_id, |c| c.cancel(CANCELLED_BY_USER));
            return;
        }
        if self.config.approval_mode() == ApprovalMode::Yolo {
            self.try_update(batch_id, call_id, |c| c.schedule(None, None));
            return;
        }

        match tool.should_confirm(&args, token).await {
            Err(err) => {
                warn!(call_id, tool = %tool.name(), error = %err, "Confirmation check failed");
                self.try_update(batch_id, call_id, |c| {
                    c.fail(error_response(
                        c.request(),
                        &err.to_string(),
                        ToolErrorType::UnhandledException,
                    ))
                });
            }
            Ok(None) => {
                self.try_update(batch_id, call_id, |c| c.schedule(None, None));
            }
            Ok(Some(details)) if self.is_policy_approved(&details) => {
                self.try_update(batch_id, call_id, |c| c.schedule(None, None));
            }
            Ok(Some(details)) => {
                let resolver = ConfirmationResolver {
                    shared: Arc::downgrade(self),
                    call_id: call_id.to_string(),
                };
                self.try_update(batch_id, call_id, |c| c.await_approval(details, resolver));
            }
        }
    }

    async fn handle_confirmation(
        self: &Arc<Self>,
        call_id: &str,
        outcome: ConfirmationOutcome,
        payload: Option<ConfirmationPayload>,
    ) -> Result<()> {
        let (batch_id, details, tool, args, token) = {
            let state = self.lock();
            let batch = state
                .batch
                .as_ref()
                .filter(|b| b.is_active())
                .ok_or_else(|| StewardError::InvalidState("no active tool call batch".into()))?;
            match batch.calls.get(call_id) {
                Some(ToolCall::AwaitingApproval(waiting)) => (
                    batch.id,
                    waiting.details.clone(),
                    Arc::clone(&waiting.tool),
                    ToolArguments::new(waiting.request.args.clone()),
                    batch.token.clone(),
                ),
                Some(other) => {
                    return Err(StewardError::InvalidState(format!(
                        "tool call {call_id} is {}, not awaiting approval",
                        other.status()
                    )))
                }
                None => {
                    return Err(StewardError::InvalidState(format!(
                        "unknown tool call {call_id}"
                    )))
                }
            }
        };

        if let Some(on_confirm) = &details.on_confirm {
            on_confirm(outcome, payload.clone()).await;
        }

        if outcome == ConfirmationOutcome::Cancel || token.is_cancelled() {
            self.try_update(batch_id, call_id, |c| c.cancel(USER_DENIED));
            self.attempt_execution(batch_id);
            return Ok(());
        }

        if outcome == ConfirmationOutcome::ProceedAlways {
            match &details.kind {
                ConfirmationKind::Edit { .. } => {
                    debug!(call_id, "Switching approval mode to auto-edit");
                    self.config.set_approval_mode(ApprovalMode::AutoEdit);
                }
                ConfirmationKind::Exec { root_command, .. } => {
                    debug!(call_id, root_command = %root_command, "Allow-listing command");
                    self.allowed_root_commands
                        .lock()
                        .unwrap_or_else(|p| p.into_inner())
                        .insert(root_command.clone());
                }
                ConfirmationKind::Info { .. } => {}
            }
        }

        let modified = payload
            .and_then(|p| p.new_content)
            .and_then(|content| tool.modify_args(&args, &content));
        self.try_update(batch_id, call_id, |c| c.schedule(Some(outcome), modified));
        self.attempt_execution(batch_id);
        Ok(())
    }

    /// Start every scheduled call once nothing is validating or awaiting approval.
    fn attempt_execution(self: &Arc<Self>, batch_id: u64) {
        let mut state = self.lock();
        let Some(batch) = state
            .batch
            .as_ref()
            .filter(|b| b.id == batch_id && b.is_active())
        else {
            return;
        };
        let blocked = batch.calls.values().any(|c| {
            matches!(
                c.status(),
                ToolCallStatus::Validating | ToolCallStatus::AwaitingApproval
            )
        });
        if blocked {
            return;
        }
        let token = batch.token.clone();
        let scheduled = batch.ids_with(|s| s == ToolCallStatus::Scheduled);

        for (call_id, _) in scheduled {
            let started = self.update_call(&mut state, batch_id, &call_id, |c| {
                c.start_execution(token.clone())
            });
            let Ok(ToolCall::Executing(executing)) = started else {
                continue;
            };
            tokio::spawn(Arc::clone(self).execute_call(
                batch_id,
                executing.request,
                executing.tool,
                token.clone(),
            ));
        }
    }

    async fn execute_call(
        self: Arc<Self>,
        batch_id: u64,
        request: ToolCallRequest,
        tool: Arc<dyn Tool>,
        token: CancellationToken,
    ) {
        let call_id = request.call_id.clone();
        let args = ToolArguments::new(request.args.clone());
        let output: Option<OutputCallback> = tool.can_update_output().then(|| {
            let shared = Arc::clone(&self);
            let call_id = call_id.clone();
            Arc::new(move |chunk: String| shared.on_live_output(batch_id, &call_id, chunk))
                as OutputCallback
        });

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            result = tool.execute(&args, token.clone(), output) => Some(result),
        };

        match result {
            _ if token.is_cancelled() => {
                self.try_update(batch_id, &call_id, |c| c.cancel(EXECUTION_CANCELLED));
            }
            None => {
                self.try_update(batch_id, &call_id, |c| c.cancel(EXECUTION_CANCELLED));
            }
            Some(Err(err)) => {
                let message = match err {
                    StewardError::ToolExecution { message, .. } => message,
                    other => other.to_string(),
                };
                warn!(call_id = %call_id, tool = %request.name, error = %message, "Tool execution failed");
                self.try_update(batch_id, &call_id, |c| {
                    c.fail(error_response(
                        c.request(),
                        &message,
                        ToolErrorType::ExecutionFailed,
                    ))
                });
            }
            Some(Ok(result)) => match &result.error {
                Some(message) => {
                    self.try_update(batch_id, &call_id, |c| {
                        c.fail(error_response(
                            c.request(),
                            message,
                            ToolErrorType::ExecutionFailed,
                        ))
                    });
                }
                None => {
                    self.try_update(batch_id, &call_id, |c| {
                        c.succeed(success_response(c.request(), &result))
                    });
                }
            },
        }
    }

    fn on_live_output(&self, batch_id: u64, call_id: &str, output: String) {
        let mut state = self.lock();
        if let Some(handler) = &self.handlers.on_output_update {
            handler(call_id, &output);
        }
        if let Err(err) = self.update_call(&mut state, batch_id, call_id, |c| {
            c.with_live_output(output)
        }) {
            debug!(call_id, error = %err, "Dropping live output");
        }
    }

    fn spawn_cancellation_watcher(
        self: &Arc<Self>,
        batch_id: u64,
        token: CancellationToken,
        finished: CancellationToken,
    ) {
        let shared = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = finished.cancelled() => {}
                _ = token.cancelled() => {
                    if let Some(shared) = shared.upgrade() {
                        shared.cancel_pending(batch_id);
                    }
                }
            }
        });
    }

    /// Cancel every call that has not started executing.
    fn cancel_pending(&self, batch_id: u64) {
        let mut state = self.lock();
        let Some(batch) = state
            .batch
            .as_ref()
            .filter(|b| b.id == batch_id && b.is_active())
        else {
            return;
        };
        let pending = batch.ids_with(|s| {
            matches!(
                s,
                ToolCallStatus::Validating
                    | ToolCallStatus::Scheduled
                    | ToolCallStatus::AwaitingApproval
            )
        });
        for (call_id, status) in pending {
            let reason = if status == ToolCallStatus::AwaitingApproval {
                USER_DENIED
            } else {
                CANCELLED_BY_USER
            };
            if let Err(err) = self.update_call(&mut state, batch_id, &call_id, |c| c.cancel(reason)) {
                debug!(call_id = %call_id, error = %err, "Skipping cancellation");
            }
        }
    }
}
