//! Tests for the tool system.

use std::sync::Arc;

use futures::FutureExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use steward::tools::*;

#[test]
fn parameter_builder_constructs_schema() {
    let params = ToolParameters::object()
        .string("query", "Search query", true)
        .integer("limit", "Max results", false)
        .boolean("verbose", "Enable verbose output", false)
        .build();

    let schema = &params.schema;
    assert_eq!(schema["type"], "object");
    assert_eq!(schema["properties"]["query"]["type"], "string");
    assert_eq!(schema["properties"]["limit"]["type"], "integer");
    assert_eq!(schema["required"].as_array().unwrap().len(), 1);
}

#[test]
fn parameter_builder_string_enum() {
    let params = ToolParameters::object()
        .string_enum("format", "Output format", &["json", "text", "csv"], true)
        .build();

    let enums = params.schema["properties"]["format"]["enum"]
        .as_array()
        .unwrap();
    assert_eq!(enums.len(), 3);
}

#[test]
fn empty_parameters() {
    let params = ToolParameters::empty();
    assert_eq!(params.schema["type"], "object");
}

#[test]
fn tool_arguments_accessors() {
    let args = ToolArguments::new(json!({"name": "Alice", "age": 30, "admin": true}));
    assert_eq!(args.get_str("name").unwrap(), "Alice");
    assert_eq!(args.get_i64("age").unwrap(), 30);
    assert!(args.get_bool("admin").unwrap());
    assert!(args.get_str("missing").is_err());
    assert_eq!(args.get_str_opt("missing"), None);
}

#[test]
fn tool_arguments_deserialize() {
    #[derive(serde::Deserialize, PartialEq, Debug)]
    struct Params {
        query: String,
        limit: Option<u32>,
    }

    let args = ToolArguments::new(json!({"query": "rust", "limit": 10}));
    let params: Params = args.deserialize().unwrap();
    assert_eq!(params.query, "rust");
    assert_eq!(params.limit, Some(10));
}

#[test]
fn schema_validation_reports_the_first_problem() {
    let schema = ToolParameters::object()
        .string("path", "File path", true)
        .integer("limit", "Max lines", false)
        .string_enum("mode", "Read mode", &["head", "tail"], false)
        .build()
        .schema;

    assert_eq!(validate_arguments(&json!({"path": "a.rs"}), &schema), None);
    assert_eq!(
        validate_arguments(&json!({"path": "a.rs", "limit": "ten"}), &schema).as_deref(),
        Some("params/limit must be integer")
    );
    assert!(validate_arguments(&json!({"path": "a.rs", "mode": "middle"}), &schema)
        .unwrap()
        .starts_with("params/mode must be equal to one of the allowed values"));
}

fn greet_tool() -> Arc<dyn Tool> {
    Arc::new(FunctionTool::new(
        "greet",
        "Greet a person",
        ToolParameters::object().string("name", "Name", true).build(),
        |args, _token| {
            async move { Ok(ToolResult::new(format!("Hello, {}!", args.get_str("name")?))) }
                .boxed()
        },
    ))
}

#[tokio::test]
async fn function_tool_executes() {
    let tool = greet_tool();
    assert_eq!(tool.name(), "greet");
    assert_eq!(tool.description(), "Greet a person");

    let args = ToolArguments::new(json!({"name": "World"}));
    assert!(tool
        .should_confirm(&args, &CancellationToken::new())
        .await
        .unwrap()
        .is_none());
    let result = tool
        .execute(&args, CancellationToken::new(), None)
        .await
        .unwrap();
    assert_eq!(result.llm_content, ToolContent::Text("Hello, World!".into()));
}

#[test]
fn registry_replaces_tools_with_the_same_name() {
    let mut registry = ToolRegistry::new().with_tool(greet_tool());
    registry.register(greet_tool());

    assert_eq!(registry.len(), 1);
    assert_eq!(registry.names(), vec!["greet"]);
    let declarations = registry.function_declarations();
    assert_eq!(declarations[0].name, "greet");
    assert_eq!(declarations[0].parameters["required"], json!(["name"]));
    assert!(registry.get("missing").is_none());
}
