//! Lookup of tools by name.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use super::tool::Tool;
use crate::types::FunctionDeclaration;

/// Registered tools, in registration order.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A tool with the same name is replaced.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if let Some(&slot) = self.index.get(&name) {
            warn!(tool = %name, "Replacing already registered tool");
            self.tools[slot] = tool;
        } else {
            self.index.insert(name, self.tools.len());
            self.tools.push(tool);
        }
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.index.get(name).map(|&slot| Arc::clone(&self.tools[slot]))
    }

    pub fn tools(&self) -> &[Arc<dyn Tool>] {
        &self.tools
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn function_declarations(&self) -> Vec<FunctionDeclaration> {
        self.tools.iter().map(|t| t.declaration()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{FunctionTool, ToolParameters, ToolResult};
    use futures::FutureExt;

    fn named(name: &str, description: &str) -> Arc<dyn Tool> {
        Arc::new(FunctionTool::new(
            name,
            description,
            ToolParameters::empty(),
            |_args, _token| async { Ok(ToolResult::new("ok")) }.boxed(),
        ))
    }

    #[test]
    fn registration_order_is_kept_and_duplicates_replace() {
        let mut registry = ToolRegistry::new();
        registry.register(named("ls", "first"));
        registry.register(named("grep", "search"));
        registry.register(named("ls", "second"));

        assert_eq!(registry.names(), vec!["ls", "grep"]);
        assert_eq!(registry.get("ls").unwrap().description(), "second");
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.function_declarations().len(), 2);
    }
}
