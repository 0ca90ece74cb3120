//! Always-available tools registered regardless of which remote tool
//! servers a deployment configures. Grounded on the teacher's builtin tool
//! set in `tool_registry.rs` (ponder, web_search, ...) — kept small here
//! since the concrete capabilities (sandboxed code execution, bundle
//! loading) are out of scope; what's reused is the shape: builtins carry no
//! `required_permissions` and `ToolResolver::check_permission` always
//! allows them.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use crate::contracts::{ToolRequest, ToolResult, UniversalTool};
use crate::errors::AetherResult;
use crate::tools::registry::{normalize_result_data, Tool};

pub const BUILTIN_NAMESPACE: &str = "builtin";

/// Returns the default builtin toolset. Called from
/// [`crate::tools::registry::ToolService::initialize`] when
/// [`crate::tools::registry::ToolServiceConfig::enable_builtins`] is set.
pub fn default_builtin_tools() -> Vec<std::sync::Arc<dyn Tool>> {
    vec![std::sync::Arc::new(PonderTool), std::sync::Arc::new(CurrentTimeTool)]
}

/// Mirrors the teacher's "ponder" tool: gives the agent a scratch space to
/// record a reflection without any side effect, so a run's reasoning trace
/// is inspectable in `tool_results` without a real external call.
pub struct PonderTool;

#[async_trait]
impl Tool for PonderTool {
    fn schema(&self) -> UniversalTool {
        UniversalTool {
            name: "builtin.ponder".to_string(),
            description: "Record a reasoning step without performing any external action.".to_string(),
            parameters_schema: serde_json::json!({
                "type": "object",
                "properties": { "thought": { "type": "string" } },
                "required": ["thought"],
            }),
            namespace: BUILTIN_NAMESPACE.to_string(),
            supports_streaming: false,
            required_permissions: vec![],
            metadata: HashMap::new(),
        }
    }

    fn validate_parameters(&self, parameters: &Value) -> bool {
        parameters.get("thought").and_then(Value::as_str).is_some()
    }

    async fn execute(&self, request: &ToolRequest) -> AetherResult<ToolResult> {
        let thought = request.parameters["thought"].as_str().unwrap_or_default();
        Ok(ToolResult::success(
            "builtin.ponder",
            normalize_result_data(serde_json::json!({ "acknowledged": thought })),
        ))
    }
}

/// Trivial builtin with no teacher analogue beyond "always-available system
/// tool" — useful as a smoke-test target that never requires network access.
pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn schema(&self) -> UniversalTool {
        UniversalTool {
            name: "builtin.current_time".to_string(),
            description: "Returns the current UTC time.".to_string(),
            parameters_schema: serde_json::json!({ "type": "object" }),
            namespace: BUILTIN_NAMESPACE.to_string(),
            supports_streaming: false,
            required_permissions: vec![],
            metadata: HashMap::new(),
        }
    }

    async fn execute(&self, _request: &ToolRequest) -> AetherResult<ToolResult> {
        Ok(ToolResult::success(
            "builtin.current_time",
            normalize_result_data(Value::String(Utc::now().to_rfc3339())),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn request(params: Value) -> ToolRequest {
        ToolRequest {
            tool_name: "builtin.ponder".to_string(),
            tool_namespace: None,
            parameters: params,
            user_context: None,
            session_context: None,
            execution_context: None,
            timeout: None,
            metadata: Map::new(),
        }
    }

    #[tokio::test]
    async fn ponder_echoes_thought() {
        let tool = PonderTool;
        let result = tool.execute(&request(serde_json::json!({"thought": "consider the edge case"}))).await.unwrap();
        assert_eq!(result.status, crate::contracts::ToolStatus::Success);
    }

    #[test]
    fn ponder_rejects_missing_thought() {
        let tool = PonderTool;
        assert!(!tool.validate_parameters(&serde_json::json!({})));
    }

    #[tokio::test]
    async fn current_time_returns_rfc3339_string() {
        let tool = CurrentTimeTool;
        let result = tool.execute(&request(serde_json::json!({}))).await.unwrap();
        match result.result_data {
            Some(crate::contracts::ToolResultData::Text(s)) => assert!(chrono::DateTime::parse_from_rfc3339(&s).is_ok()),
            other => panic!("unexpected result_data: {other:?}"),
        }
    }
}
