//! Tool registration, namespaced lookup, parameter validation, and sync +
//! streaming execution. Grounded on the dispatch shape of
//! `ToolRegistryInterface::execute_tool` in the teacher (resolve → validate
//! → invoke → taxonomized error), generalized to the namespaced matching
//! and streaming-fallback rules in spec.md §4.9.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::contracts::{
    TaskChunkType, TaskStreamChunk, ToolRequest, ToolResult, ToolResultData, ToolStatus, UniversalTool,
    CHUNK_KIND_TOOL_ERROR, CHUNK_KIND_TOOL_RESULT,
};
use crate::errors::{AetherError, AetherResult, ErrorCode};

pub type ToolChunkStream = Pin<Box<dyn Stream<Item = TaskStreamChunk> + Send>>;

/// A registered, executable tool. Implementations adapt a builtin
/// function, a remote tool server entry, or a bundled capability to this
/// single interface.
#[async_trait]
pub trait Tool: Send + Sync {
    fn schema(&self) -> UniversalTool;

    /// Default accepts anything; tools with a strict schema should
    /// validate `parameters` against `schema().parameters_schema`.
    fn validate_parameters(&self, _parameters: &Value) -> bool {
        true
    }

    async fn execute(&self, request: &ToolRequest) -> AetherResult<ToolResult>;

    fn supports_streaming(&self) -> bool {
        false
    }

    /// Only called when `supports_streaming()` is true; `ToolService`
    /// handles the sync fallback for tools that don't override this.
    async fn execute_stream(&self, request: &ToolRequest, task_id: &str, seq_start: u64) -> AetherResult<ToolChunkStream> {
        let _ = (request, task_id, seq_start);
        Err(AetherError::tool_execution(
            "tool_service.execute_tool_stream",
            "streaming not implemented for this tool",
        ))
    }

    async fn shutdown(&self) -> AetherResult<()> {
        Ok(())
    }
}

/// Startup configuration consumed by [`ToolService::initialize`]: whether to
/// register the builtin toolset and which remote tool servers to discover
/// tools from.
#[derive(Debug, Clone, Default)]
pub struct ToolServiceConfig {
    pub enable_builtins: bool,
    pub remote_servers: Vec<crate::tools::remote_client::RemoteToolServerConfig>,
}

pub struct ToolService {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
    tool_namespaces: RwLock<HashMap<String, Vec<String>>>,
}

impl Default for ToolService {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolService {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            tool_namespaces: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register_tool(&self, tool: Arc<dyn Tool>) {
        let schema = tool.schema();
        let mut tools = self.tools.write().await;
        let mut namespaces = self.tool_namespaces.write().await;
        namespaces
            .entry(schema.namespace.clone())
            .or_default()
            .push(schema.name.clone());
        tools.insert(schema.name.clone(), tool);
    }

    pub async fn list_tools(&self) -> Vec<UniversalTool> {
        self.tools.read().await.values().map(|t| t.schema()).collect()
    }

    /// Registers the builtin toolset (if enabled) and discovers + registers
    /// tools from each configured remote server. A server that fails
    /// discovery is skipped rather than aborting the whole startup — one
    /// unreachable remote tool server shouldn't take down every builtin.
    pub async fn initialize(&self, config: &ToolServiceConfig) -> Vec<AetherError> {
        let mut discovery_errors = Vec::new();

        if config.enable_builtins {
            for tool in crate::tools::builtin::default_builtin_tools() {
                self.register_tool(tool).await;
            }
        }

        for server in &config.remote_servers {
            let client = Arc::new(crate::tools::remote_client::RemoteToolClient::new(server.clone()));
            match client.discover().await {
                Ok(schemas) => {
                    for schema in schemas {
                        self.register_tool(Arc::new(crate::tools::remote_client::RemoteTool::new(schema, client.clone())))
                            .await;
                    }
                }
                Err(err) => discovery_errors.push(err),
            }
        }

        discovery_errors
    }

    async fn find(&self, tool_name: &str, tool_namespace: Option<&str>) -> Option<Arc<dyn Tool>> {
        let tools = self.tools.read().await;
        if let Some(t) = tools.get(tool_name) {
            return Some(t.clone());
        }
        if let Some(ns) = tool_namespace {
            let namespaced = format!("{}.{}", ns, tool_name);
            if let Some(t) = tools.get(&namespaced) {
                return Some(t.clone());
            }
        }
        None
    }

    pub async fn execute_tool(&self, request: &ToolRequest) -> ToolResult {
        let started = Instant::now();
        let tool = match self.find(&request.tool_name, request.tool_namespace.as_deref()).await {
            Some(t) => t,
            None => {
                return not_declared(&request.tool_name);
            }
        };

        if !tool.validate_parameters(&request.parameters) {
            return invalid_parameters(&request.tool_name);
        }

        match tool.execute(request).await {
            Ok(mut result) => {
                result.execution_time.get_or_insert(started.elapsed().as_secs_f64());
                result
            }
            Err(err) => tool_result_from_error(&request.tool_name, &err),
        }
    }

    /// Streams a tool's native chunks if it supports streaming; otherwise
    /// falls back to a single synchronous execution wrapped as one final
    /// chunk with `metadata.fallback_to_sync = true`.
    pub async fn execute_tool_stream(&self, request: &ToolRequest, task_id: &str, seq_start: u64) -> ToolChunkStream {
        let tool = match self.find(&request.tool_name, request.tool_namespace.as_deref()).await {
            Some(t) => t,
            None => return single_error_chunk(task_id, seq_start, &not_declared(&request.tool_name)),
        };

        if !tool.validate_parameters(&request.parameters) {
            return single_error_chunk(task_id, seq_start, &invalid_parameters(&request.tool_name));
        }

        if tool.supports_streaming() {
            match tool.execute_stream(request, task_id, seq_start).await {
                Ok(stream) => return stream,
                Err(_) => {
                    // Falls through to sync fallback below.
                }
            }
        }

        let result = self.execute_tool(request).await;
        let mut chunk = TaskStreamChunk::new(
            task_id,
            seq_start,
            match result.status {
                ToolStatus::Success => TaskChunkType::ToolCallRequest,
                _ => TaskChunkType::Error,
            },
            serde_json::to_value(&result).unwrap_or(Value::Null),
        )
        .with_kind(match result.status {
            ToolStatus::Success => CHUNK_KIND_TOOL_RESULT,
            _ => CHUNK_KIND_TOOL_ERROR,
        })
        .finalize();
        chunk.metadata.insert("fallback_to_sync".to_string(), Value::Bool(true));
        Box::pin(futures::stream::once(async move { chunk }))
    }

    pub async fn shutdown(&self) {
        let mut tools = self.tools.write().await;
        for tool in tools.values() {
            let _ = tool.shutdown().await;
        }
        tools.clear();
        self.tool_namespaces.write().await.clear();
    }
}

fn not_declared(tool_name: &str) -> ToolResult {
    let mut r = ToolResult::error(tool_name, ToolStatus::NotFound, format!("tool '{}' is not declared", tool_name));
    r.metadata.insert("error_code".to_string(), Value::String(ErrorCode::ToolNotDeclared.as_str().to_string()));
    r
}

fn invalid_parameters(tool_name: &str) -> ToolResult {
    let mut r = ToolResult::error(tool_name, ToolStatus::Error, "parameter validation failed");
    r.metadata.insert(
        "error_code".to_string(),
        Value::String(ErrorCode::ToolInvalidParameters.as_str().to_string()),
    );
    r
}

fn tool_result_from_error(tool_name: &str, err: &AetherError) -> ToolResult {
    let status = match err.code {
        ErrorCode::ToolUnauthorized => ToolStatus::Unauthorized,
        ErrorCode::ToolTimeout => ToolStatus::Timeout,
        ErrorCode::ToolNotDeclared => ToolStatus::NotFound,
        _ => ToolStatus::Error,
    };
    let mut r = ToolResult::error(tool_name, status, err.message.clone());
    r.metadata.insert("error_code".to_string(), Value::String(err.code.as_str().to_string()));
    r
}

fn single_error_chunk(task_id: &str, seq: u64, result: &ToolResult) -> ToolChunkStream {
    let chunk = TaskStreamChunk::new(
        task_id,
        seq,
        TaskChunkType::Error,
        serde_json::to_value(result).unwrap_or(Value::Null),
    )
    .with_kind(CHUNK_KIND_TOOL_ERROR)
    .finalize();
    Box::pin(futures::stream::once(async move { chunk }))
}

/// Normalizes a tool's return value into the tagged `ToolResultData`
/// variant expected at the boundary, per the Design Notes.
pub fn normalize_result_data(value: Value) -> ToolResultData {
    match value {
        Value::Null => ToolResultData::Null,
        Value::String(s) => ToolResultData::Text(s),
        Value::Array(items) => ToolResultData::Parts(items),
        other => ToolResultData::Structured(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::UniversalTool;
    use std::collections::HashMap as Map;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn schema(&self) -> UniversalTool {
            UniversalTool {
                name: "builtin.echo".to_string(),
                description: "echoes input".to_string(),
                parameters_schema: serde_json::json!({"type": "object"}),
                namespace: "builtin".to_string(),
                supports_streaming: false,
                required_permissions: vec![],
                metadata: Map::new(),
            }
        }

        async fn execute(&self, request: &ToolRequest) -> AetherResult<ToolResult> {
            Ok(ToolResult::success(
                "builtin.echo",
                normalize_result_data(request.parameters.clone()),
            ))
        }
    }

    fn request(name: &str) -> ToolRequest {
        ToolRequest {
            tool_name: name.to_string(),
            tool_namespace: None,
            parameters: serde_json::json!({"x": 1}),
            user_context: None,
            session_context: None,
            execution_context: None,
            timeout: None,
            metadata: Map::new(),
        }
    }

    #[tokio::test]
    async fn executes_registered_tool() {
        let service = ToolService::new();
        service.register_tool(Arc::new(EchoTool)).await;
        let result = service.execute_tool(&request("builtin.echo")).await;
        assert_eq!(result.status, ToolStatus::Success);
    }

    #[tokio::test]
    async fn missing_tool_is_not_declared() {
        let service = ToolService::new();
        let result = service.execute_tool(&request("builtin.missing")).await;
        assert_eq!(result.status, ToolStatus::NotFound);
        assert_eq!(
            result.metadata.get("error_code").and_then(|v| v.as_str()),
            Some("tool.not_declared")
        );
    }

    #[tokio::test]
    async fn stream_falls_back_to_sync_for_non_streaming_tool() {
        let service = ToolService::new();
        service.register_tool(Arc::new(EchoTool)).await;
        let mut stream = service.execute_tool_stream(&request("builtin.echo"), "t1", 0).await;
        use futures::StreamExt;
        let chunk = stream.next().await.unwrap();
        assert!(chunk.is_final);
        assert_eq!(chunk.metadata.get("fallback_to_sync").and_then(|v| v.as_bool()), Some(true));
    }

    #[tokio::test]
    async fn initialize_registers_builtins_when_enabled() {
        let service = ToolService::new();
        let errors = service
            .initialize(&ToolServiceConfig {
                enable_builtins: true,
                remote_servers: vec![],
            })
            .await;
        assert!(errors.is_empty());
        let names: Vec<_> = service.list_tools().await.into_iter().map(|t| t.name).collect();
        assert!(names.contains(&"builtin.ponder".to_string()));
        assert!(names.contains(&"builtin.current_time".to_string()));
    }

    #[tokio::test]
    async fn initialize_skips_builtins_when_disabled() {
        let service = ToolService::new();
        service.initialize(&ToolServiceConfig::default()).await;
        assert!(service.list_tools().await.is_empty());
    }
}
