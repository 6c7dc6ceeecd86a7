//! Turning tool output into function-response parts for the model.

use serde_json::{json, Value};

use super::state::{ToolCallRequest, ToolCallResponse, ToolErrorType};
use crate::tools::{ResultDisplay, ToolContent, ToolResult};
use crate::types::{parts_text, FunctionResponse, Part, PartData};

const GENERIC_SUCCESS: &str = "Tool execution succeeded.";

fn function_response_part(call_id: &str, tool_name: &str, response: Value) -> Part {
    Part::function_response(FunctionResponse {
        id: Some(call_id.to_string()),
        name: tool_name.to_string(),
        response,
    })
}

fn output_part(call_id: &str, tool_name: &str, output: &str) -> Part {
    function_response_part(call_id, tool_name, json!({ "output": output }))
}

/// Convert a tool's model-facing content into function-response parts.
///
/// Text becomes `{output: text}`. Binary parts are announced by MIME type and
/// forwarded. Multiple parts are preceded by a generic success marker.
pub fn convert_to_function_response(
    tool_name: &str,
    call_id: &str,
    content: &ToolContent,
) -> Vec<Part> {
    let part = match content {
        ToolContent::Text(text) => return vec![output_part(call_id, tool_name, text)],
        ToolContent::Parts(parts) if parts.len() == 1 => &parts[0],
        ToolContent::Parts(parts) => {
            let mut out = Vec::with_capacity(parts.len() + 1);
            out.push(output_part(call_id, tool_name, GENERIC_SUCCESS));
            out.extend(parts.iter().cloned());
            return out;
        }
    };

    match &part.data {
        PartData::Text(text) => vec![output_part(call_id, tool_name, text)],
        PartData::FunctionResponse(response) => {
            match response.response.get("content").map(nested_text) {
                Some(text) => vec![output_part(call_id, tool_name, &text)],
                None => vec![part.clone()],
            }
        }
        PartData::InlineData(_) | PartData::FileData(_) => {
            let mime = part.binary_mime_type().unwrap_or("unknown");
            vec![
                output_part(
                    call_id,
                    tool_name,
                    &format!("Binary content of type {mime} was processed."),
                ),
                part.clone(),
            ]
        }
        PartData::FunctionCall(_) => vec![output_part(call_id, tool_name, GENERIC_SUCCESS)],
    }
}

/// Text of a nested `content` payload, which is either a part list or a string.
fn nested_text(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        other => serde_json::from_value::<Vec<Part>>(other.clone())
            .map(|parts| parts_text(&parts))
            .unwrap_or_default(),
    }
}

/// Response for a successful execution.
pub fn success_response(request: &ToolCallRequest, result: &ToolResult) -> ToolCallResponse {
    ToolCallResponse {
        call_id: request.call_id.clone(),
        response_parts: convert_to_function_response(
            &request.name,
            &request.call_id,
            &result.llm_content,
        ),
        result_display: result.display.clone(),
        error: None,
        error_type: None,
    }
}

/// Response for a failed call; the model sees `{error: message}`.
pub fn error_response(
    request: &ToolCallRequest,
    message: &str,
    error_type: ToolErrorType,
) -> ToolCallResponse {
    ToolCallResponse {
        call_id: request.call_id.clone(),
        response_parts: vec![function_response_part(
            &request.call_id,
            &request.name,
            json!({ "error": message }),
        )],
        result_display: Some(ResultDisplay::text(message)),
        error: Some(message.to_string()),
        error_type: Some(error_type),
    }
}

/// Response for a cancelled call.
pub fn cancelled_response(
    request: &ToolCallRequest,
    reason: &str,
    display: Option<ResultDisplay>,
) -> ToolCallResponse {
    ToolCallResponse {
        call_id: request.call_id.clone(),
        response_parts: vec![function_response_part(
            &request.call_id,
            &request.name,
            json!({ "error": format!("[Operation Cancelled] Reason: {reason}") }),
        )],
        result_display: display,
        error: None,
        error_type: None,
    }
}
