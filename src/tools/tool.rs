//! Tool trait and closure-based tool wrapper.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use super::arguments::ToolArguments;
use super::confirmation::ConfirmationDetails;
use super::result::ToolResult;
use super::types::ToolParameters;
use super::validation::validate_arguments;
use crate::error::Result;
use crate::types::FunctionDeclaration;

/// Receives live output while a tool runs.
pub type OutputCallback = Arc<dyn Fn(String) + Send + Sync>;

/// A named local capability the model can invoke.
///
/// Only [`name`](Tool::name), [`description`](Tool::description),
/// [`parameters`](Tool::parameters) and [`execute`](Tool::execute) are
/// required. Tools that mutate state override
/// [`should_confirm`](Tool::should_confirm) to ask for approval first.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the model calls the tool by.
    fn name(&self) -> &str;

    /// Label for UI display. Defaults to [`name`](Tool::name).
    fn display_name(&self) -> &str {
        self.name()
    }

    fn description(&self) -> &str;

    fn parameters(&self) -> &ToolParameters;

    /// Whether [`execute`](Tool::execute) reports live output.
    fn can_update_output(&self) -> bool {
        false
    }

    /// Check arguments before anything else happens. `Some(message)` rejects the call.
    fn validate(&self, args: &ToolArguments) -> Option<String> {
        validate_arguments(args.raw(), &self.parameters().schema)
    }

    /// One-line summary of what a call with `args` would do.
    fn describe(&self, args: &ToolArguments) -> String {
        format!("{} {}", self.display_name(), args.raw())
    }

    /// Ask for approval. `Ok(None)` means the call may run straight away.
    async fn should_confirm(
        &self,
        _args: &ToolArguments,
        _token: &CancellationToken,
    ) -> Result<Option<ConfirmationDetails>> {
        Ok(None)
    }

    async fn execute(
        &self,
        args: &ToolArguments,
        token: CancellationToken,
        output: Option<OutputCallback>,
    ) -> Result<ToolResult>;

    /// Rewrite arguments so the call writes `new_content` instead of what the
    /// model proposed. `None` when the tool does not support modification.
    fn modify_args(&self, _args: &ToolArguments, _new_content: &str) -> Option<ToolArguments> {
        None
    }

    /// Declaration advertised to the model.
    fn declaration(&self) -> FunctionDeclaration {
        FunctionDeclaration {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters().schema.clone(),
        }
    }
}

type ToolHandler = dyn Fn(ToolArguments, CancellationToken) -> BoxFuture<'static, Result<ToolResult>>
    + Send
    + Sync;

/// A tool backed by a closure. Never asks for confirmation.
pub struct FunctionTool {
    name: String,
    display_name: Option<String>,
    description: String,
    parameters: ToolParameters,
    handler: Arc<ToolHandler>,
}

impl FunctionTool {
    pub fn new<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ToolParameters,
        handler: F,
    ) -> Self
    where
        F: Fn(ToolArguments, CancellationToken) -> BoxFuture<'static, Result<ToolResult>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            display_name: None,
            description: description.into(),
            parameters,
            handler: Arc::new(handler),
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }
}

#[async_trait]
impl Tool for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> &ToolParameters {
        &self.parameters
    }

    async fn execute(
        &self,
        args: &ToolArguments,
        token: CancellationToken,
        _output: Option<OutputCallback>,
    ) -> Result<ToolResult> {
        (self.handler)(args.clone(), token).await
    }
}

impl std::fmt::Debug for FunctionTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use serde_json::json;

    fn echo_tool() -> FunctionTool {
        FunctionTool::new(
            "echo",
            "Echo a message",
            ToolParameters::object().string("message", "Text to echo", true).build(),
            |args, _token| {
                async move { Ok(ToolResult::new(args.get_str("message")?.to_string())) }.boxed()
            },
        )
        .with_display_name("Echo")
    }

    #[tokio::test]
    async fn function_tool_runs_its_handler() {
        let tool = echo_tool();
        let result = tool
            .execute(
                &ToolArguments::new(json!({ "message": "hi" })),
                CancellationToken::new(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(result, ToolResult::new("hi"));
    }

    #[test]
    fn default_validation_uses_the_parameter_schema() {
        let tool = echo_tool();
        assert_eq!(tool.validate(&ToolArguments::new(json!({ "message": "x" }))), None);
        assert_eq!(
            tool.validate(&ToolArguments::new(json!({}))).as_deref(),
            Some("params must have required property 'message'")
        );
    }

    #[test]
    fn declaration_mirrors_the_tool() {
        let declaration = echo_tool().declaration();
        assert_eq!(declaration.name, "echo");
        assert_eq!(declaration.parameters["required"], json!(["message"]));
        assert_eq!(echo_tool().display_name(), "Echo");
    }
}
