//! Executes one task against a bound runner session: sync request/response,
//! or a live chunked stream with human-in-the-loop tool approval gating.
//! Grounded on the teacher's `engines/execution.rs` dispatch loop structure
//! (resolve tools, iterate runtime events, pick the terminal response) and
//! on `icc.rs` for the approve/cancel back-channel shape.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use futures::StreamExt;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::contracts::{
    CommunicatorMessage, ContentPart, HitlTimeoutPolicy, MessageContent, MessageRole, RuntimeContext, TaskRequest,
    TaskResult, TaskStreamChunk, ToolCall, ToolRequest, ToolStatus, UniversalMessage, CHUNK_KIND_TOOL_COMPLETE,
    CHUNK_KIND_TOOL_ERROR, CHUNK_KIND_TOOL_PROPOSAL, CHUNK_KIND_TOOL_RESULT,
};
use crate::contracts::{InteractionRequest, InteractionResponse, InteractionType, TaskChunkType};
use crate::errors::{AetherError, AetherResult};
use crate::runner_manager::RunnerManager;
use crate::tools::registry::ToolService;
use crate::tools::resolver::ToolResolver;

pub type ChunkStream = std::pin::Pin<Box<dyn futures::Stream<Item = TaskStreamChunk> + Send>>;
pub type CommunicatorSender = mpsc::Sender<CommunicatorMessage>;

#[derive(Debug, Clone)]
pub struct DomainAgentSettings {
    pub hitl_timeout: StdDuration,
    pub hitl_timeout_policy: HitlTimeoutPolicy,
    pub communicator_buffer: usize,
}

impl Default for DomainAgentSettings {
    fn default() -> Self {
        Self {
            hitl_timeout: StdDuration::from_secs(120),
            hitl_timeout_policy: HitlTimeoutPolicy::AutoCancel,
            communicator_buffer: 16,
        }
    }
}

pub struct DomainAgent {
    runner_manager: Arc<RunnerManager>,
    tool_service: Arc<ToolService>,
    settings: DomainAgentSettings,
}

impl DomainAgent {
    pub fn new(runner_manager: Arc<RunnerManager>, tool_service: Arc<ToolService>, settings: DomainAgentSettings) -> Self {
        Self {
            runner_manager,
            tool_service,
            settings,
        }
    }

    fn pending_tool_calls(request: &TaskRequest) -> Vec<ToolCall> {
        let Some(last) = request.messages.last() else {
            return Vec::new();
        };
        if let Some(calls) = &last.tool_calls {
            return calls.clone();
        }
        match &last.content {
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::FunctionCall { function_call } => Some(function_call.clone()),
                    _ => None,
                })
                .collect(),
            MessageContent::Text(_) => Vec::new(),
        }
    }

    fn requires_approval(ctx: &RuntimeContext) -> bool {
        ctx.agent_config
            .as_ref()
            .and_then(|c| c.behavior_settings.get("require_tool_approval"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    fn prompt_text(request: &TaskRequest) -> String {
        request
            .messages
            .iter()
            .filter(|m| matches!(m.role, MessageRole::User))
            .last()
            .map(|m| m.as_text())
            .unwrap_or_else(|| request.description.clone())
    }

    async fn execute_tool_calls(&self, ctx: &RuntimeContext, request: &TaskRequest, calls: &[ToolCall]) -> Vec<crate::contracts::ToolResult> {
        let resolver = ToolResolver::new(&self.tool_service);
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            let resolved = resolver.resolve_single(&call.tool_name, request.user_context.as_ref()).await;
            let result = match resolved {
                Ok(tool) => {
                    let tool_request = ToolRequest {
                        tool_name: tool.name.clone(),
                        tool_namespace: Some(tool.namespace.clone()),
                        parameters: call.parameters.clone(),
                        user_context: request.user_context.clone(),
                        session_context: request.session_context.clone(),
                        execution_context: request.execution_context.clone(),
                        timeout: None,
                        metadata: request.metadata.clone(),
                    };
                    self.tool_service.execute_tool(&tool_request).await
                }
                Err(e) => crate::contracts::ToolResult::error(&call.tool_name, ToolStatus::NotFound, e.message),
            };
            results.push(result);
            let _ = ctx;
        }
        results
    }

    /// Synchronous path: no interactive gating, tool calls present in the
    /// last message execute unconditionally, then the runner is driven to
    /// completion and the best candidate final response is returned.
    pub async fn execute(&self, ctx: &RuntimeContext, request: &TaskRequest) -> AetherResult<TaskResult> {
        let runner_id = ctx
            .runner_id
            .as_ref()
            .ok_or_else(|| AetherError::runner_not_found("domain_agent.execute", "runtime context missing runner_id"))?;
        let runner_session_id = ctx
            .runner_session_id
            .as_ref()
            .ok_or_else(|| AetherError::session_not_found("domain_agent.execute", "runtime context missing runner_session_id"))?;

        let pending_calls = Self::pending_tool_calls(request);
        let tool_results = if pending_calls.is_empty() {
            Vec::new()
        } else {
            self.execute_tool_calls(ctx, request, &pending_calls).await
        };

        let runner_handle = self
            .runner_manager
            .runner_handle(runner_id)
            .await
            .ok_or_else(|| AetherError::runner_not_found("domain_agent.execute", runner_id.clone()))?;

        let content = Self::prompt_text(request);
        let mut stream = runner_handle.run_async(&ctx.user_id, runner_session_id, &content).await?;

        let mut messages = Vec::new();
        while let Some(event) = stream.next().await {
            if let Some(text) = event.content {
                let mut message = if event.author == "user" {
                    UniversalMessage::user(text)
                } else {
                    UniversalMessage::assistant(text)
                };
                message.author = Some(event.author);
                messages.push(message);
            }
        }

        self.runner_manager.mark_runner_activity(runner_id).await;

        let mut result = TaskResult::success(request.task_id.clone(), messages);
        result.tool_results = tool_results;
        Ok(result.with_session(runner_session_id.clone()))
    }

    /// Live path: runs in a spawned task, returning a chunk stream to the
    /// caller and a sender the caller uses to approve/reject proposed tool
    /// calls or inject follow-up user messages before the terminal chunk.
    pub async fn execute_live(&self, ctx: RuntimeContext, request: TaskRequest) -> AetherResult<(ChunkStream, CommunicatorSender)> {
        let runner_id = ctx
            .runner_id
            .clone()
            .ok_or_else(|| AetherError::runner_not_found("domain_agent.execute_live", "runtime context missing runner_id"))?;
        let runner_session_id = ctx
            .runner_session_id
            .clone()
            .ok_or_else(|| AetherError::session_not_found("domain_agent.execute_live", "runtime context missing runner_session_id"))?;
        let runner_handle = self
            .runner_manager
            .runner_handle(&runner_id)
            .await
            .ok_or_else(|| AetherError::runner_not_found("domain_agent.execute_live", runner_id.clone()))?;

        let (chunk_tx, chunk_rx) = mpsc::channel::<TaskStreamChunk>(32);
        let (comm_tx, mut comm_rx) = mpsc::channel::<CommunicatorMessage>(self.settings.communicator_buffer);

        let runner_manager = self.runner_manager.clone();
        let tool_service = self.tool_service.clone();
        let settings = self.settings.clone();
        let task_id = request.task_id.clone();
        let pending_calls = Self::pending_tool_calls(&request);
        let needs_approval = Self::requires_approval(&ctx) && !pending_calls.is_empty();

        tokio::spawn(async move {
            let mut seq: u64 = 0;
            let mut next_seq = || {
                let current = seq;
                seq += 1;
                current
            };

            let _ = chunk_tx
                .send(TaskStreamChunk::new(&task_id, next_seq(), TaskChunkType::Processing, serde_json::json!({"stage": "dispatch"})))
                .await;

            if needs_approval {
                for call in &pending_calls {
                    let interaction_id = Uuid::new_v4().to_string();
                    let interaction = InteractionRequest {
                        interaction_id: interaction_id.clone(),
                        interaction_type: InteractionType::ToolApproval,
                        task_id: task_id.clone(),
                        content: serde_json::json!({"tool_name": call.tool_name, "parameters": call.parameters}),
                        metadata: HashMap::new(),
                        timestamp: chrono::Utc::now(),
                    };
                    let _ = chunk_tx
                        .send(
                            TaskStreamChunk::new(
                                &task_id,
                                next_seq(),
                                TaskChunkType::ToolApprovalRequest,
                                serde_json::to_value(&interaction).unwrap_or(serde_json::Value::Null),
                            )
                            .with_kind(CHUNK_KIND_TOOL_PROPOSAL)
                            .with_interaction(interaction_id.clone()),
                        )
                        .await;

                    let decision = wait_for_decision(&mut comm_rx, &interaction, &settings).await;

                    match decision {
                        Some(true) => {
                            let resolver = ToolResolver::new(&tool_service);
                            let resolved = resolver.resolve_single(&call.tool_name, request.user_context.as_ref()).await;
                            match resolved {
                                Ok(tool) => {
                                    let tool_request = ToolRequest {
                                        tool_name: tool.name.clone(),
                                        tool_namespace: Some(tool.namespace.clone()),
                                        parameters: call.parameters.clone(),
                                        user_context: request.user_context.clone(),
                                        session_context: request.session_context.clone(),
                                        execution_context: request.execution_context.clone(),
                                        timeout: None,
                                        metadata: request.metadata.clone(),
                                    };
                                    let mut tool_chunks = tool_service.execute_tool_stream(&tool_request, &task_id, 0).await;
                                    while let Some(mut tool_chunk) = tool_chunks.next().await {
                                        tool_chunk.sequence_id = next_seq();
                                        tool_chunk.interaction_id = Some(interaction_id.clone());
                                        // The tool's own stream finalizes itself, but the live
                                        // task stream continues past it into the model's reply
                                        // and the real Complete chunk below.
                                        tool_chunk.is_final = false;
                                        let _ = chunk_tx.send(tool_chunk).await;
                                    }
                                }
                                Err(e) => {
                                    let err_result = crate::contracts::ToolResult::error(&call.tool_name, ToolStatus::NotFound, e.message);
                                    let _ = chunk_tx
                                        .send(
                                            TaskStreamChunk::new(
                                                &task_id,
                                                next_seq(),
                                                TaskChunkType::Error,
                                                serde_json::to_value(&err_result).unwrap_or(serde_json::Value::Null),
                                            )
                                            .with_kind(CHUNK_KIND_TOOL_ERROR)
                                            .with_interaction(interaction_id.clone()),
                                        )
                                        .await;
                                }
                            }
                        }
                        _ => {
                            let _ = chunk_tx
                                .send(
                                    TaskStreamChunk::new(
                                        &task_id,
                                        next_seq(),
                                        TaskChunkType::Cancelled,
                                        serde_json::json!({"tool_name": call.tool_name, "approved": false}),
                                    )
                                    .with_kind(CHUNK_KIND_TOOL_ERROR)
                                    .with_interaction(interaction_id)
                                    .finalize(),
                                )
                                .await;
                            return;
                        }
                    }
                }
            }

            let content = Self::prompt_text(&request);
            let stream_result = runner_handle.run_async(&ctx.user_id, &runner_session_id, &content).await;

            let mut events = match stream_result {
                Ok(s) => s,
                Err(e) => {
                    let _ = chunk_tx
                        .send(
                            TaskStreamChunk::new(&task_id, next_seq(), TaskChunkType::Error, e.to_envelope()).finalize(),
                        )
                        .await;
                    return;
                }
            };

            while let Some(event) = events.next().await {
                let chunk_type = if event.is_final {
                    TaskChunkType::Response
                } else {
                    TaskChunkType::Progress
                };
                let _ = chunk_tx
                    .send(TaskStreamChunk::new(
                        &task_id,
                        next_seq(),
                        chunk_type,
                        serde_json::json!({"author": event.author, "content": event.content}),
                    ))
                    .await;
            }

            runner_manager.mark_runner_activity(&runner_id).await;

            let _ = chunk_tx
                .send(
                    TaskStreamChunk::new(&task_id, next_seq(), TaskChunkType::Complete, serde_json::json!({}))
                        .with_kind(CHUNK_KIND_TOOL_COMPLETE)
                        .finalize(),
                )
                .await;
        });

        let chunk_stream: ChunkStream = Box::pin(tokio_stream::wrappers::ReceiverStream::new(chunk_rx));
        Ok((chunk_stream, comm_tx))
    }
}

/// Waits for a matching `InteractionResponse`, a close signal, or the
/// timeout — applying the configured [`HitlTimeoutPolicy`] on expiry.
/// Any `UserMessage`/non-matching response received meanwhile is dropped;
/// a single-task DomainAgent has nowhere else to route it mid-approval.
async fn wait_for_decision(
    rx: &mut mpsc::Receiver<CommunicatorMessage>,
    interaction: &InteractionRequest,
    settings: &DomainAgentSettings,
) -> Option<bool> {
    let deadline = tokio::time::sleep(settings.hitl_timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            msg = rx.recv() => {
                match msg {
                    Some(CommunicatorMessage::InteractionResponse(resp)) if resp.matches(interaction) => {
                        return Some(resp.approved);
                    }
                    Some(CommunicatorMessage::Close) | None => return None,
                    _ => continue,
                }
            }
            _ = &mut deadline => {
                return match settings.hitl_timeout_policy {
                    HitlTimeoutPolicy::AutoApprove => Some(true),
                    HitlTimeoutPolicy::AutoCancel => Some(false),
                    HitlTimeoutPolicy::Error => None,
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{
        AgentConfig, FrameworkType, RunnerHandle, RuntimeEvent, RuntimeEventStream, SessionEvent, SessionServiceHandle,
        SessionSnapshot,
    };
    use crate::runner_manager::{RunnerFactory, RunnerManagerSettings};
    use futures::stream;
    use std::collections::HashMap as Map;

    struct EchoRunner;

    #[async_trait::async_trait]
    impl RunnerHandle for EchoRunner {
        async fn run_async(&self, _user_id: &str, _session_id: &str, content: &str) -> AetherResult<RuntimeEventStream> {
            let reply = RuntimeEvent {
                author: "assistant".to_string(),
                content: Some(format!("echo: {}", content)),
                is_final: true,
                timestamp: chrono::Utc::now(),
            };
            Ok(Box::pin(stream::iter(vec![reply])))
        }
        async fn shutdown(&self) -> AetherResult<()> {
            Ok(())
        }
    }

    struct InMemorySessions(tokio::sync::Mutex<HashMap<String, SessionSnapshot>>);

    #[async_trait::async_trait]
    impl SessionServiceHandle for InMemorySessions {
        async fn create_session(&self, _app_name: &str, _user_id: &str, session_id: &str) -> AetherResult<()> {
            self.0.lock().await.insert(session_id.to_string(), SessionSnapshot::default());
            Ok(())
        }
        async fn get_session(&self, _app_name: &str, _user_id: &str, session_id: &str) -> AetherResult<Option<SessionSnapshot>> {
            Ok(self.0.lock().await.get(session_id).cloned())
        }
        async fn delete_session(&self, _app_name: &str, _user_id: &str, session_id: &str) -> AetherResult<()> {
            self.0.lock().await.remove(session_id);
            Ok(())
        }
        async fn append_event(&self, _app_name: &str, _user_id: &str, session_id: &str, event: SessionEvent) -> AetherResult<()> {
            self.0.lock().await.entry(session_id.to_string()).or_default().events.push(event);
            Ok(())
        }
        async fn shutdown(&self) -> AetherResult<()> {
            Ok(())
        }
    }

    struct EchoFactory;

    #[async_trait::async_trait]
    impl RunnerFactory for EchoFactory {
        async fn create_runner(&self, _agent_config: &AgentConfig) -> AetherResult<(Arc<dyn RunnerHandle>, Arc<dyn SessionServiceHandle>)> {
            Ok((Arc::new(EchoRunner), Arc::new(InMemorySessions(tokio::sync::Mutex::new(Map::new())))))
        }
    }

    fn config() -> AgentConfig {
        AgentConfig {
            agent_type: "helper".to_string(),
            framework_type: FrameworkType::Adk,
            name: None,
            description: None,
            system_prompt: Some("hi".to_string()),
            model_config: Map::new(),
            available_tools: vec![],
            behavior_settings: Map::new(),
            tool_permissions: vec![],
            max_iterations: 10,
            timeout: None,
            memory_config: Map::new(),
            include_contents: "default".to_string(),
            output_schema: None,
            input_schema: None,
            output_key: None,
        }
    }

    fn request(task_id: &str, text: &str) -> TaskRequest {
        TaskRequest {
            task_id: task_id.to_string(),
            task_type: "chat".to_string(),
            description: text.to_string(),
            messages: vec![UniversalMessage::user(text)],
            available_tools: vec![],
            available_knowledge: vec![],
            attachments: vec![],
            user_context: None,
            session_context: None,
            execution_context: None,
            execution_config: None,
            agent_config: None,
            agent_id: None,
            session_id: None,
            metadata: HashMap::new(),
        }
    }

    async fn domain_agent() -> (DomainAgent, RuntimeContext) {
        let runner_manager = Arc::new(RunnerManager::new(RunnerManagerSettings::default(), Arc::new(EchoFactory)));
        let cfg = config();
        let (runner_id, session_id) = runner_manager.get_or_create_runner("agent-a", &cfg, None, None, true, true).await.unwrap();
        let tool_service = Arc::new(ToolService::new());
        let agent = DomainAgent::new(runner_manager, tool_service, DomainAgentSettings::default());
        let now = chrono::Utc::now();
        let ctx = RuntimeContext {
            session_id: session_id.clone().unwrap(),
            user_id: "u1".to_string(),
            framework_type: FrameworkType::Adk,
            agent_id: Some("agent-a".to_string()),
            agent_config: Some(cfg),
            runner_id: Some(runner_id),
            runner_session_id: session_id,
            execution_id: None,
            trace_id: None,
            metadata: HashMap::new(),
            created_at: now,
            last_activity: now,
        };
        (agent, ctx)
    }

    #[tokio::test]
    async fn execute_returns_runner_response() {
        let (agent, ctx) = domain_agent().await;
        let req = request("t1", "hello");
        let result = agent.execute(&ctx, &req).await.unwrap();
        assert_eq!(result.messages.len(), 1);
        assert!(result.messages[0].as_text().contains("hello"));
    }

    #[tokio::test]
    async fn execute_live_emits_complete_terminal_chunk() {
        let (agent, ctx) = domain_agent().await;
        let req = request("t2", "hi there");
        let (mut stream, _comm) = agent.execute_live(ctx, req).await.unwrap();

        let mut saw_complete = false;
        while let Some(chunk) = stream.next().await {
            if chunk.chunk_type == TaskChunkType::Complete {
                saw_complete = true;
                assert!(chunk.is_final);
            }
        }
        assert!(saw_complete);
    }
}
