//! The `adk` [`FrameworkAdapter`]: request classification/dispatch
//! (AdapterCore) plus the concrete runtime it binds into [`RunnerManager`]
//! via [`RunnerFactory`]. Classification and dispatch are grounded on
//! `adk_adapter.py`'s three-way request routing (exercised indirectly
//! through `test_adk_adapter_error_handling.py`); the HTTP runtime is
//! grounded on the teacher's `engines/llm/providers/openai.rs` — a
//! reqwest chat-completions client plays the role ADK itself plays in the
//! original: the thing that actually turns a prompt into a reply.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::agent_manager::AgentManager;
use crate::contracts::{
    AgentConfig, ExecutionContext, ExecutionStrategy, FrameworkType, RequestMode, RuntimeContext, RuntimeEvent,
    RuntimeEventStream, SessionEvent, SessionServiceHandle, SessionSnapshot, TaskRequest, TaskResult,
};
use crate::domain_agent::DomainAgent;
use crate::errors::{AetherError, AetherResult};
use crate::framework::registry::{AdapterSettings, ChunkStream, CommunicatorSender, FrameworkAdapter};
use crate::runner_manager::{RunnerFactory, RunnerManager};
use crate::session_coordinator::SessionCoordinator;
use crate::tools::registry::ToolService;

/// Config for the HTTP chat-completions backend every `adk`-tagged agent
/// runs against. Mirrors the teacher's `OpenAIProvider` construction
/// options rather than a full provider abstraction, since this crate only
/// ever needs one concrete runtime to exercise the adapter contract.
#[derive(Debug, Clone)]
pub struct AdkRuntimeSettings {
    pub base_url: String,
    pub api_key: String,
    pub default_model: String,
    pub timeout: StdDuration,
    pub temperature: f32,
}

impl AdkRuntimeSettings {
    /// Reads `AETHER_ADK_API_KEY`/`AETHER_ADK_BASE_URL`/`AETHER_ADK_MODEL`,
    /// falling back to OpenAI's public endpoint and an empty key. An empty
    /// key surfaces as a `framework.init_failed` error on first completion
    /// attempt rather than at construction time, so a caller that never
    /// actually dispatches a live request isn't forced to configure one.
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("AETHER_ADK_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            api_key: std::env::var("AETHER_ADK_API_KEY").unwrap_or_default(),
            default_model: std::env::var("AETHER_ADK_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            timeout: StdDuration::from_secs(60),
            temperature: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Backs both [`RunnerHandle`](crate::contracts::RunnerHandle) and
/// [`SessionServiceHandle`] over one shared turn store, per runner
/// instance — a single runtime that owns both execution and session
/// state the way the real ADK runner does.
struct AdkRuntime {
    client: Client,
    settings: AdkRuntimeSettings,
    model: String,
    system_prompt: Option<String>,
    sessions: Mutex<HashMap<String, Vec<ChatMessage>>>,
}

impl AdkRuntime {
    fn new(settings: AdkRuntimeSettings, agent_config: &AgentConfig) -> Self {
        let model = agent_config
            .model_config
            .get("model")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| settings.default_model.clone());
        Self {
            client: Client::new(),
            settings,
            model,
            system_prompt: agent_config.system_prompt.clone(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    async fn history_with_system(&self, session_id: &str) -> Vec<ChatMessage> {
        let sessions = self.sessions.lock().await;
        let turns = sessions.get(session_id).cloned().unwrap_or_default();
        match &self.system_prompt {
            Some(prompt) => {
                let mut with_system = vec![ChatMessage { role: "system".to_string(), content: prompt.clone() }];
                with_system.extend(turns);
                with_system
            }
            None => turns,
        }
    }

    async fn complete(&self, session_id: &str) -> AetherResult<String> {
        if self.settings.api_key.is_empty() {
            return Err(AetherError::framework_init_failed(
                "adk_runtime.complete",
                "no API key configured for the adk runtime (set AETHER_ADK_API_KEY)",
            ));
        }

        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: self.history_with_system(session_id).await,
            temperature: self.settings.temperature,
        };

        let response = tokio::time::timeout(
            self.settings.timeout,
            self.client
                .post(format!("{}/chat/completions", self.settings.base_url))
                .bearer_auth(&self.settings.api_key)
                .json(&request)
                .send(),
        )
        .await
        .map_err(|_| AetherError::runner_execution("adk_runtime.complete", "chat completion request timed out"))?
        .map_err(|e| AetherError::runner_execution("adk_runtime.complete", format!("chat completion request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AetherError::runner_execution(
                "adk_runtime.complete",
                format!("chat completion endpoint returned {status}: {body}"),
            ));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| AetherError::runner_execution("adk_runtime.complete", format!("malformed completion response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| AetherError::runner_execution("adk_runtime.complete", "completion response had no choices"))
    }
}

#[async_trait]
impl crate::contracts::RunnerHandle for AdkRuntime {
    async fn run_async(&self, _user_id: &str, session_id: &str, content: &str) -> AetherResult<RuntimeEventStream> {
        {
            let mut sessions = self.sessions.lock().await;
            sessions
                .entry(session_id.to_string())
                .or_default()
                .push(ChatMessage { role: "user".to_string(), content: content.to_string() });
        }

        let reply = self.complete(session_id).await?;

        {
            let mut sessions = self.sessions.lock().await;
            sessions
                .entry(session_id.to_string())
                .or_default()
                .push(ChatMessage { role: "assistant".to_string(), content: reply.clone() });
        }

        let event = RuntimeEvent {
            author: "assistant".to_string(),
            content: Some(reply),
            is_final: true,
            timestamp: Utc::now(),
        };
        Ok(Box::pin(stream::iter(vec![event])))
    }

    async fn shutdown(&self) -> AetherResult<()> {
        Ok(())
    }
}

#[async_trait]
impl SessionServiceHandle for AdkRuntime {
    async fn create_session(&self, _app_name: &str, _user_id: &str, session_id: &str) -> AetherResult<()> {
        self.sessions.lock().await.entry(session_id.to_string()).or_default();
        Ok(())
    }

    async fn get_session(&self, _app_name: &str, _user_id: &str, session_id: &str) -> AetherResult<Option<SessionSnapshot>> {
        let sessions = self.sessions.lock().await;
        Ok(sessions.get(session_id).map(|turns| SessionSnapshot {
            events: turns
                .iter()
                .map(|t| SessionEvent {
                    author: t.role.clone(),
                    content: Some(t.content.clone()),
                    is_tool_artifact: false,
                    timestamp: Utc::now(),
                })
                .collect(),
        }))
    }

    async fn delete_session(&self, _app_name: &str, _user_id: &str, session_id: &str) -> AetherResult<()> {
        self.sessions.lock().await.remove(session_id);
        Ok(())
    }

    async fn append_event(&self, _app_name: &str, _user_id: &str, session_id: &str, event: SessionEvent) -> AetherResult<()> {
        if let Some(content) = event.content {
            let role = if event.author == "user" { "user" } else { "assistant" };
            self.sessions
                .lock()
                .await
                .entry(session_id.to_string())
                .or_default()
                .push(ChatMessage { role: role.to_string(), content });
        }
        Ok(())
    }

    async fn shutdown(&self) -> AetherResult<()> {
        Ok(())
    }
}

pub struct AdkRunnerFactory {
    settings: AdkRuntimeSettings,
}

impl AdkRunnerFactory {
    pub fn new(settings: AdkRuntimeSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl RunnerFactory for AdkRunnerFactory {
    async fn create_runner(
        &self,
        agent_config: &AgentConfig,
    ) -> AetherResult<(Arc<dyn crate::contracts::RunnerHandle>, Arc<dyn SessionServiceHandle>)> {
        let runtime = Arc::new(AdkRuntime::new(self.settings.clone(), agent_config));
        Ok((runtime.clone(), runtime))
    }
}

/// AdapterCore: classifies each [`TaskRequest`] into agent-creation or
/// conversation-continuation and dispatches to the manager that owns that
/// concern. Never holds conversation or runner state itself — every field
/// here is a handle to a manager that does.
pub struct AdkFrameworkAdapter {
    agent_manager: Arc<AgentManager>,
    runner_manager: Arc<RunnerManager>,
    session_coordinator: Arc<SessionCoordinator>,
    tool_service: Arc<ToolService>,
    domain_agent: Arc<DomainAgent>,
}

impl AdkFrameworkAdapter {
    pub fn new(
        agent_manager: Arc<AgentManager>,
        runner_manager: Arc<RunnerManager>,
        session_coordinator: Arc<SessionCoordinator>,
        tool_service: Arc<ToolService>,
        domain_agent: Arc<DomainAgent>,
    ) -> Self {
        Self {
            agent_manager,
            runner_manager,
            session_coordinator,
            tool_service,
            domain_agent,
        }
    }

    async fn create_agent(&self, req: &TaskRequest) -> AetherResult<TaskResult> {
        let agent_config = req
            .agent_config
            .as_ref()
            .ok_or_else(|| AetherError::request_context_missing("adk_adapter.create_agent", "agent_config is required to create an agent"))?;

        let agent_id = self.agent_manager.create_agent(agent_config);
        self.runner_manager
            .get_or_create_runner(&agent_id, agent_config, Some(req), None, true, false)
            .await?;

        let result = TaskResult::success(req.task_id.clone(), Vec::new())
            .with_agent(agent_id)
            .with_metadata("request_mode", Value::String(RequestMode::AgentCreation.as_str().to_string()));
        Ok(result)
    }

    fn resolve_chat_session_id(req: &TaskRequest, agent_id: &str) -> String {
        req.session_context
            .as_ref()
            .and_then(|s| s.effective_session_id())
            .or_else(|| req.session_id.clone())
            .unwrap_or_else(|| format!("chat_{}", agent_id))
    }

    /// Resolves which agent a continuation request targets: `agent_id` when
    /// given, else the agent already bound to `session_id`'s chat session.
    /// A `session_id` with no prior binding has nothing to continue and is
    /// rejected the same as a request with neither.
    async fn resolve_agent_id(&self, req: &TaskRequest, stage: &str) -> AetherResult<String> {
        if let Some(agent_id) = &req.agent_id {
            return Ok(agent_id.clone());
        }

        let chat_session_id = req
            .session_context
            .as_ref()
            .and_then(|s| s.effective_session_id())
            .or_else(|| req.session_id.clone())
            .ok_or_else(|| AetherError::request_context_missing(stage, "agent_id is required to continue a conversation"))?;

        let bound_agent_id = self
            .session_coordinator
            .get_chat_session(&chat_session_id)
            .await
            .and_then(|info| info.active_agent_id);

        bound_agent_id.ok_or_else(|| {
            AetherError::session_not_found(stage, format!("no agent bound to session_id '{}'; a new chat requires agent_id", chat_session_id))
        })
    }

    async fn continue_conversation(&self, req: &TaskRequest) -> AetherResult<TaskResult> {
        let agent_id = self.resolve_agent_id(req, "adk_adapter.continue_conversation").await?;

        let agent_config = match &req.agent_config {
            Some(cfg) => cfg.clone(),
            None => self
                .agent_manager
                .get_config(&agent_id)
                .ok_or_else(|| AetherError::request_context_missing("adk_adapter.continue_conversation", format!("unknown agent_id '{}'", agent_id)))?,
        };

        let user_id = req
            .user_context
            .as_ref()
            .map(|u| u.resolve_user_id())
            .unwrap_or_else(|| "anonymous_user".to_string());
        let chat_session_id = Self::resolve_chat_session_id(req, &agent_id);

        let coordination = self
            .session_coordinator
            .coordinate_chat_session(&user_id, &chat_session_id, &agent_id, &agent_config, Some(req))
            .await?;

        self.agent_manager.mark_activity(&agent_id);

        let runner_id = self
            .runner_manager
            .get_runner_for_agent(&agent_id)
            .await
            .ok_or_else(|| AetherError::runner_not_found("adk_adapter.continue_conversation", agent_id.clone()))?;

        let ctx = self.build_runtime_context(&chat_session_id, &user_id, &agent_id, agent_config, runner_id, coordination.runner_session_id.clone(), None, None);

        let mut result = self.domain_agent.execute(&ctx, req).await?;
        result.agent_id = Some(agent_id);
        result = result
            .with_metadata("request_mode", Value::String(RequestMode::ConversationContinuation.as_str().to_string()))
            .with_metadata("chat_session_id", Value::String(chat_session_id));
        if coordination.switch_occurred {
            result = result.with_metadata("agent_switch_occurred", Value::Bool(true));
        }
        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    fn build_runtime_context(
        &self,
        chat_session_id: &str,
        user_id: &str,
        agent_id: &str,
        agent_config: AgentConfig,
        runner_id: String,
        runner_session_id: String,
        execution_id: Option<String>,
        trace_id: Option<String>,
    ) -> RuntimeContext {
        let now = Utc::now();
        RuntimeContext {
            session_id: chat_session_id.to_string(),
            user_id: user_id.to_string(),
            framework_type: FrameworkType::Adk,
            agent_id: Some(agent_id.to_string()),
            agent_config: Some(agent_config),
            runner_id: Some(runner_id),
            runner_session_id: Some(runner_session_id),
            execution_id,
            trace_id,
            metadata: HashMap::new(),
            created_at: now,
            last_activity: now,
        }
    }
}

#[async_trait]
impl FrameworkAdapter for AdkFrameworkAdapter {
    fn framework_type(&self) -> FrameworkType {
        FrameworkType::Adk
    }

    async fn initialize(&self, _settings: &AdapterSettings) -> AetherResult<()> {
        Ok(())
    }

    async fn execute_task(&self, req: &TaskRequest, _strategy: &ExecutionStrategy) -> AetherResult<TaskResult> {
        let request_mode = req.classify();
        let span = tracing::info_span!(
            "adk_adapter.execute_task",
            task_id = %req.task_id,
            agent_id = req.agent_id.as_deref().unwrap_or(""),
            request_mode = request_mode.as_str(),
        );
        let _guard = span.enter();

        if let Err(reason) = req.validate_basic() {
            let err = AetherError::request_validation("adk_adapter.validate_request", reason);
            tracing::warn!(code = err.code.as_str(), stage = %err.stage, "task rejected at validation");
            return Ok(TaskResult::from_error(req.task_id.clone(), &err, request_mode.as_str()));
        }

        let result = match request_mode {
            RequestMode::AgentCreationWithMessages => {
                let err = AetherError::request_validation(
                    "adk_adapter.validate_request",
                    "create the agent first, then continue the conversation in a follow-up request",
                );
                Ok(TaskResult::from_error(req.task_id.clone(), &err, request_mode.as_str()))
            }
            RequestMode::AgentCreation => self.create_agent(req).await,
            RequestMode::ConversationContinuation => self.continue_conversation(req).await,
        };

        if let Err(err) = &result {
            tracing::warn!(code = err.code.as_str(), stage = %err.stage, "task dispatch failed");
        }
        result
    }

    async fn execute_task_live(&self, req: &TaskRequest, exec_ctx: &ExecutionContext) -> AetherResult<(ChunkStream, CommunicatorSender)> {
        req.validate_basic().map_err(|reason| AetherError::request_validation("adk_adapter.execute_task_live", reason))?;

        if req.classify() != RequestMode::ConversationContinuation {
            return Err(AetherError::request_validation(
                "adk_adapter.execute_task_live",
                "live execution requires an existing agent_id and conversation context",
            ));
        }

        let agent_id = self.resolve_agent_id(req, "adk_adapter.execute_task_live").await?;
        let agent_config = match &req.agent_config {
            Some(cfg) => cfg.clone(),
            None => self
                .agent_manager
                .get_config(&agent_id)
                .ok_or_else(|| AetherError::request_context_missing("adk_adapter.execute_task_live", format!("unknown agent_id '{}'", agent_id)))?,
        };

        let user_id = req
            .user_context
            .as_ref()
            .map(|u| u.resolve_user_id())
            .unwrap_or_else(|| "anonymous_user".to_string());
        let chat_session_id = Self::resolve_chat_session_id(req, &agent_id);

        let coordination = self
            .session_coordinator
            .coordinate_chat_session(&user_id, &chat_session_id, &agent_id, &agent_config, Some(req))
            .await?;

        self.agent_manager.mark_activity(&agent_id);

        let runner_id = self
            .runner_manager
            .get_runner_for_agent(&agent_id)
            .await
            .ok_or_else(|| AetherError::runner_not_found("adk_adapter.execute_task_live", agent_id.clone()))?;

        let ctx = self.build_runtime_context(
            &chat_session_id,
            &user_id,
            &agent_id,
            agent_config,
            runner_id,
            coordination.runner_session_id.clone(),
            Some(exec_ctx.execution_id.clone()),
            exec_ctx.trace_id.clone(),
        );

        self.domain_agent.execute_live(ctx, req.clone()).await
    }

    fn supports_live_execution(&self) -> bool {
        true
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn shutdown(&self) -> AetherResult<()> {
        self.tool_service.shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_manager::AgentManagerSettings;
    use crate::contracts::UniversalMessage;
    use crate::runner_manager::RunnerManagerSettings;
    use crate::session_coordinator::{InMemorySessionRecoveryStore, SessionCoordinatorSettings};
    use crate::domain_agent::DomainAgentSettings;
    use std::collections::HashMap as Map;

    fn agent_config() -> AgentConfig {
        AgentConfig {
            agent_type: "helper".to_string(),
            framework_type: FrameworkType::Adk,
            name: None,
            description: None,
            system_prompt: Some("be terse".to_string()),
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

    fn adapter() -> AdkFrameworkAdapter {
        let factory = Arc::new(AdkRunnerFactory::new(AdkRuntimeSettings::from_env()));
        let runner_manager = Arc::new(RunnerManager::new(RunnerManagerSettings::default(), factory));
        let agent_manager = Arc::new(AgentManager::new(AgentManagerSettings::default()));
        runner_manager.set_agent_cleanup_callback(agent_manager.cleanup_callback());
        let session_coordinator = Arc::new(SessionCoordinator::new(
            runner_manager.clone(),
            Arc::new(InMemorySessionRecoveryStore::new()),
            SessionCoordinatorSettings::default(),
        ));
        let tool_service = Arc::new(ToolService::new());
        let domain_agent = Arc::new(DomainAgent::new(runner_manager.clone(), tool_service.clone(), DomainAgentSettings::default()));
        AdkFrameworkAdapter::new(agent_manager, runner_manager, session_coordinator, tool_service, domain_agent)
    }

    fn creation_request(task_id: &str) -> TaskRequest {
        TaskRequest {
            task_id: task_id.to_string(),
            task_type: "agent_setup".to_string(),
            description: "declare an agent".to_string(),
            messages: vec![],
            available_tools: vec![],
            available_knowledge: vec![],
            attachments: vec![],
            user_context: None,
            session_context: None,
            execution_context: None,
            execution_config: None,
            agent_config: Some(agent_config()),
            agent_id: None,
            session_id: None,
            metadata: Map::new(),
        }
    }

    #[tokio::test]
    async fn creation_with_messages_is_rejected() {
        let adapter = adapter();
        let mut req = creation_request("t1");
        req.messages.push(UniversalMessage::user("hello"));
        let strategy = ExecutionStrategy {
            framework_type: FrameworkType::Adk,
            task_complexity: crate::contracts::TaskComplexity::Simple,
            execution_config: crate::contracts::ExecutionConfig::default(),
            runtime_options: Map::new(),
            execution_mode: crate::contracts::ExecutionMode::Sync,
            framework_score: 1.0,
            fallback_frameworks: vec![],
        };
        let result = adapter.execute_task(&req, &strategy).await.unwrap();
        assert_eq!(result.status, crate::contracts::TaskStatus::Error);
        assert_eq!(
            result.metadata.get("request_mode").and_then(|v| v.as_str()),
            Some("agent_creation_with_messages")
        );
    }

    #[tokio::test]
    async fn agent_creation_registers_agent_and_runner() {
        let adapter = adapter();
        let req = creation_request("t2");
        let strategy = ExecutionStrategy {
            framework_type: FrameworkType::Adk,
            task_complexity: crate::contracts::TaskComplexity::Simple,
            execution_config: crate::contracts::ExecutionConfig::default(),
            runtime_options: Map::new(),
            execution_mode: crate::contracts::ExecutionMode::Sync,
            framework_score: 1.0,
            fallback_frameworks: vec![],
        };
        let result = adapter.execute_task(&req, &strategy).await.unwrap();
        assert_eq!(result.status, crate::contracts::TaskStatus::Success);
        assert!(result.agent_id.is_some());
        assert!(adapter.agent_manager.exists(result.agent_id.as_deref().unwrap()));
    }

    #[tokio::test]
    async fn continuation_without_agent_id_fails_with_context_missing() {
        let adapter = adapter();
        let mut req = creation_request("t3");
        req.agent_config = None;
        req.messages.push(UniversalMessage::user("hi"));
        let strategy = ExecutionStrategy {
            framework_type: FrameworkType::Adk,
            task_complexity: crate::contracts::TaskComplexity::Simple,
            execution_config: crate::contracts::ExecutionConfig::default(),
            runtime_options: Map::new(),
            execution_mode: crate::contracts::ExecutionMode::Sync,
            framework_score: 1.0,
            fallback_frameworks: vec![],
        };
        let result = adapter.execute_task(&req, &strategy).await.unwrap();
        assert_eq!(result.status, crate::contracts::TaskStatus::Error);
        assert_eq!(result.error.as_ref().unwrap().code, "request.context_missing");
    }
}
