//! Persistent RPC session to a remote tool server: discovery, unary call,
//! server-streaming call, and header propagation. The concrete wire
//! protocol is out of scope (spec.md §1 non-goals); this client speaks
//! plain HTTP via `reqwest` — the same client crate the teacher's LLM
//! providers and ICC bridge use for outbound calls — and normalizes
//! responses into [`UniversalTool`]/[`ToolResult`] at the boundary.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;

use crate::contracts::{
    TaskChunkType, TaskStreamChunk, ToolRequest, ToolResult, ToolResultData, ToolStatus, UniversalTool, UserContext,
    CHUNK_KIND_TOOL_PROGRESS,
};
use crate::errors::{AetherError, AetherResult};
use crate::tools::registry::{normalize_result_data, Tool, ToolChunkStream};

#[derive(Debug, Clone)]
pub struct RemoteToolServerConfig {
    pub base_url: String,
    /// Server-level default headers, lowest precedence in the merge.
    pub default_headers: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct RemoteToolDescriptor {
    name: String,
    description: String,
    input_schema: Value,
    supports_streaming: bool,
}

pub struct RemoteToolClient {
    config: RemoteToolServerConfig,
    http: reqwest::Client,
}

impl RemoteToolClient {
    pub fn new(config: RemoteToolServerConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    pub async fn discover(&self) -> AetherResult<Vec<UniversalTool>> {
        let url = format!("{}/tools", self.config.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| AetherError::tool_execution("remote_tool_client.discover", e.to_string()))?;

        let descriptors: Vec<RemoteToolDescriptor> = response
            .json()
            .await
            .map_err(|e| AetherError::tool_execution("remote_tool_client.discover", e.to_string()))?;

        Ok(descriptors
            .into_iter()
            .map(|d| UniversalTool {
                namespace: UniversalTool::namespace_for(&d.name),
                name: d.name,
                description: d.description,
                parameters_schema: d.input_schema,
                supports_streaming: d.supports_streaming,
                required_permissions: vec![],
                metadata: HashMap::new(),
            })
            .collect())
    }

    pub async fn call_tool(&self, request: &ToolRequest, tool_headers: &HashMap<String, String>) -> AetherResult<ToolResult> {
        let headers = merge_headers(self, request, tool_headers);
        let url = format!("{}/call/{}", self.config.base_url, request.tool_name);

        let mut builder = self.http.post(&url).json(&request.parameters);
        for (k, v) in &headers {
            builder = builder.header(k, v);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AetherError::tool_execution("remote_tool_client.call_tool", e.to_string()))?;

        if !response.status().is_success() {
            return Err(AetherError::tool_execution(
                "remote_tool_client.call_tool",
                format!("remote tool server returned status {}", response.status()),
            ));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AetherError::tool_execution("remote_tool_client.call_tool", e.to_string()))?;

        Ok(ToolResult {
            tool_name: request.tool_name.clone(),
            status: ToolStatus::Success,
            result_data: Some(normalize_result_data(body)),
            error_message: None,
            execution_time: None,
            metadata: HashMap::new(),
        })
    }

    /// Server-streaming call: decodes newline-delimited JSON events from the
    /// response body into a stream of `ToolResultData` chunks.
    pub async fn call_tool_stream(
        &self,
        request: &ToolRequest,
        tool_headers: &HashMap<String, String>,
    ) -> AetherResult<Pin<Box<dyn Stream<Item = ToolResultData> + Send>>> {
        let headers = merge_headers(self, request, tool_headers);
        let url = format!("{}/call_stream/{}", self.config.base_url, request.tool_name);

        let mut builder = self.http.post(&url).json(&request.parameters);
        for (k, v) in &headers {
            builder = builder.header(k, v);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AetherError::tool_execution("remote_tool_client.call_tool_stream", e.to_string()))?;

        let byte_stream = response.bytes_stream();
        let mapped = byte_stream.filter_map(|chunk| async move {
            let bytes = chunk.ok()?;
            let text = String::from_utf8_lossy(&bytes);
            let mut last = None;
            for line in text.lines().filter(|l| !l.trim().is_empty()) {
                if let Ok(value) = serde_json::from_str::<Value>(line) {
                    last = Some(normalize_result_data(value));
                }
            }
            last
        });

        Ok(Box::pin(mapped))
    }
}

/// Effective headers for a call: server default < tool-level
/// `metadata.mcp_headers` < task-level `metadata.mcp_headers` < call-site
/// `metadata.mcp_headers`, plus an injected `X-AF-User-Id` when a
/// user_context is present. Each tier overrides keys from the previous one.
fn merge_headers(client: &RemoteToolClient, request: &ToolRequest, tool_headers: &HashMap<String, String>) -> HashMap<String, String> {
    let mut merged = client.config.default_headers.clone();

    for (k, v) in tool_headers {
        merged.insert(k.clone(), v.clone());
    }

    if let Some(task_headers) = extract_mcp_headers(&request.metadata) {
        merged.extend(task_headers);
    }

    if let Some(user_context) = &request.user_context {
        merged.insert("X-AF-User-Id".to_string(), user_context.resolve_user_id());
    }

    merged
}

fn extract_mcp_headers(metadata: &HashMap<String, Value>) -> Option<HashMap<String, String>> {
    let raw = metadata.get("mcp_headers")?.as_object()?;
    Some(
        raw.iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect(),
    )
}

/// Adapts a tool discovered on a remote server to the local [`Tool`]
/// interface, so `ToolService` dispatches to it exactly like a builtin.
pub struct RemoteTool {
    schema: UniversalTool,
    client: Arc<RemoteToolClient>,
}

impl RemoteTool {
    pub fn new(schema: UniversalTool, client: Arc<RemoteToolClient>) -> Self {
        Self { schema, client }
    }
}

#[async_trait]
impl Tool for RemoteTool {
    fn schema(&self) -> UniversalTool {
        self.schema.clone()
    }

    async fn execute(&self, request: &ToolRequest) -> AetherResult<ToolResult> {
        let tool_headers = extract_mcp_headers(&self.schema.metadata).unwrap_or_default();
        self.client.call_tool(request, &tool_headers).await
    }

    fn supports_streaming(&self) -> bool {
        self.schema.supports_streaming
    }

    async fn execute_stream(&self, request: &ToolRequest, task_id: &str, seq_start: u64) -> AetherResult<ToolChunkStream> {
        // The underlying byte stream has no lookahead, so every decoded event
        // is emitted as a progress delta; the caller's final sync-fallback
        // chunk (or the remote server's own trailing event) carries the result.
        let tool_headers = extract_mcp_headers(&self.schema.metadata).unwrap_or_default();
        let events = self.client.call_tool_stream(request, &tool_headers).await?;
        let task_id = task_id.to_string();
        let mut seq = seq_start;
        let chunks = events.map(move |data| {
            let chunk = TaskStreamChunk::new(
                &task_id,
                seq,
                TaskChunkType::ToolCallRequest,
                serde_json::to_value(&data).unwrap_or(Value::Null),
            )
            .with_kind(CHUNK_KIND_TOOL_PROGRESS);
            seq += 1;
            chunk
        });
        Ok(Box::pin(chunks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_request() -> ToolRequest {
        ToolRequest {
            tool_name: "remote.search".to_string(),
            tool_namespace: None,
            parameters: serde_json::json!({}),
            user_context: None,
            session_context: None,
            execution_context: None,
            timeout: None,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn header_merge_is_right_biased() {
        let mut default_headers = HashMap::new();
        default_headers.insert("Authorization".to_string(), "server-default".to_string());
        default_headers.insert("X-Scope".to_string(), "server".to_string());

        let client = RemoteToolClient::new(RemoteToolServerConfig {
            base_url: "http://example.invalid".to_string(),
            default_headers,
        });

        let mut tool_headers = HashMap::new();
        tool_headers.insert("Authorization".to_string(), "tool-level".to_string());

        let mut request = base_request();
        let mut mcp = serde_json::Map::new();
        mcp.insert("Authorization".to_string(), Value::String("task-level".to_string()));
        request.metadata.insert("mcp_headers".to_string(), Value::Object(mcp));

        let merged = merge_headers(&client, &request, &tool_headers);
        assert_eq!(merged.get("Authorization").unwrap(), "task-level");
        assert_eq!(merged.get("X-Scope").unwrap(), "server");
    }

    #[test]
    fn tool_level_headers_win_over_server_default_but_lose_to_task_level() {
        let mut default_headers = HashMap::new();
        default_headers.insert("Authorization".to_string(), "server-default".to_string());
        default_headers.insert("X-Tool".to_string(), "server".to_string());

        let client = RemoteToolClient::new(RemoteToolServerConfig {
            base_url: "http://example.invalid".to_string(),
            default_headers,
        });

        let mut tool_headers = HashMap::new();
        tool_headers.insert("Authorization".to_string(), "tool-level".to_string());
        tool_headers.insert("X-Tool".to_string(), "tool-level".to_string());

        let mut request = base_request();
        let mut mcp = serde_json::Map::new();
        mcp.insert("Authorization".to_string(), Value::String("task-level".to_string()));
        request.metadata.insert("mcp_headers".to_string(), Value::Object(mcp));

        let merged = merge_headers(&client, &request, &tool_headers);
        assert_eq!(merged.get("Authorization").unwrap(), "task-level");
        assert_eq!(merged.get("X-Tool").unwrap(), "tool-level");
    }

    #[test]
    fn remote_tool_execute_sources_tool_level_headers_from_schema_metadata() {
        let mut schema_metadata = HashMap::new();
        let mut mcp = serde_json::Map::new();
        mcp.insert("X-Tool-Declared".to_string(), Value::String("from-schema".to_string()));
        schema_metadata.insert("mcp_headers".to_string(), Value::Object(mcp));

        let schema = UniversalTool {
            name: "remote.search".to_string(),
            description: "searches".to_string(),
            parameters_schema: serde_json::json!({}),
            namespace: "remote".to_string(),
            supports_streaming: false,
            required_permissions: vec![],
            metadata: schema_metadata,
        };

        let extracted = extract_mcp_headers(&schema.metadata).expect("schema carries mcp_headers");
        assert_eq!(extracted.get("X-Tool-Declared").unwrap(), "from-schema");
    }

    #[test]
    fn user_id_is_injected_when_context_present() {
        let client = RemoteToolClient::new(RemoteToolServerConfig {
            base_url: "http://example.invalid".to_string(),
            default_headers: HashMap::new(),
        });
        let mut request = base_request();
        request.user_context = Some(UserContext {
            user_id: Some("u1".to_string()),
            user_name: None,
            session_token: None,
            permissions: None,
            preferences: None,
        });
        let merged = merge_headers(&client, &request, &HashMap::new());
        assert_eq!(merged.get("X-AF-User-Id").unwrap(), "u1");
    }
}
