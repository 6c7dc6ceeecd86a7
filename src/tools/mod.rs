//! Tool capabilities the model can invoke.

pub mod arguments;
pub mod confirmation;
pub mod registry;
pub mod result;
pub mod tool;
pub mod types;
pub mod validation;

pub use arguments::ToolArguments;
pub use confirmation::{
    ConfirmHandler, ConfirmationDetails, ConfirmationKind, ConfirmationOutcome,
    ConfirmationPayload,
};
pub use registry::ToolRegistry;
pub use result::{ResultDisplay, ToolContent, ToolResult};
pub use tool::{FunctionTool, OutputCallback, Tool};
pub use types::{ParameterBuilder, ToolParameters};
pub use validation::validate_arguments;
