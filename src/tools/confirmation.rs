//! Confirmation requests raised by tools before they run.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// The user's answer to a confirmation request.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConfirmationOutcome {
    ProceedOnce,
    /// Proceed, and stop asking for calls of this kind.
    ProceedAlways,
    /// Proceed after the user edited the proposed content.
    ModifyWithEditor,
    Cancel,
}

impl ConfirmationOutcome {
    pub fn is_proceed(self) -> bool {
        !matches!(self, Self::Cancel)
    }
}

/// Extra data accompanying an outcome, e.g. user-edited content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationPayload {
    pub new_content: Option<String>,
}

/// Called with the outcome before the scheduler acts on it.
pub type ConfirmHandler = Arc<
    dyn Fn(ConfirmationOutcome, Option<ConfirmationPayload>) -> BoxFuture<'static, ()>
        + Send
        + Sync,
>;

/// What the user is asked to approve.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmationKind {
    /// A file modification.
    Edit {
        file_name: String,
        file_diff: String,
        original_content: Option<String>,
        new_content: String,
    },
    /// A command execution. `root_command` keys the "always allow" list.
    Exec {
        command: String,
        root_command: String,
    },
    /// Anything else (fetching URLs, etc.).
    Info { prompt: String, urls: Vec<String> },
}

/// A confirmation request produced by [`Tool::should_confirm`](super::Tool::should_confirm).
#[derive(Clone)]
pub struct ConfirmationDetails {
    pub title: String,
    pub kind: ConfirmationKind,
    pub on_confirm: Option<ConfirmHandler>,
}

impl ConfirmationDetails {
    pub fn new(title: impl Into<String>, kind: ConfirmationKind) -> Self {
        Self {
            title: title.into(),
            kind,
            on_confirm: None,
        }
    }

    pub fn with_on_confirm(mut self, handler: ConfirmHandler) -> Self {
        self.on_confirm = Some(handler);
        self
    }

    pub fn is_edit(&self) -> bool {
        matches!(self.kind, ConfirmationKind::Edit { .. })
    }
}

impl fmt::Debug for ConfirmationDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfirmationDetails")
            .field("title", &self.title)
            .field("kind", &self.kind)
            .field("on_confirm", &self.on_confirm.is_some())
            .finish()
    }
}
