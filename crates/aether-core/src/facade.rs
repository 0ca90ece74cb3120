//! `AIAssistant`: the single entry point embedding applications construct.
//! Wires agent/runner/session/tool management into one [`ExecutionEngine`]
//! and exposes the sync/live task surface plus lifecycle operations
//! (idle sweeping, health, shutdown). Grounded on `test_ai_assistant_unit.py`'s
//! `AIAssistant` contract: a thin facade that validates, delegates to the
//! engine, and never holds orchestration state of its own.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;

use crate::agent_manager::AgentManager;
use crate::contracts::{CommunicatorMessage, TaskRequest, TaskResult, TaskStreamChunk};
use crate::errors::{AetherError, AetherResult};
use crate::execution_engine::ExecutionEngine;
use crate::session_coordinator::SessionCoordinator;
use crate::tools::registry::ToolService;

pub type ChunkStream = std::pin::Pin<Box<dyn futures::Stream<Item = TaskStreamChunk> + Send>>;
pub type CommunicatorSender = tokio::sync::mpsc::Sender<CommunicatorMessage>;

#[derive(Debug, Clone)]
pub struct AssistantSettings {
    pub version: Option<String>,
    pub idle_sweep_interval: StdDuration,
}

impl Default for AssistantSettings {
    fn default() -> Self {
        Self {
            version: None,
            idle_sweep_interval: StdDuration::from_secs(300),
        }
    }
}

pub struct AIAssistant {
    engine: ExecutionEngine,
    agent_manager: Arc<AgentManager>,
    session_coordinator: Arc<SessionCoordinator>,
    tool_service: Arc<ToolService>,
    settings: AssistantSettings,
}

impl AIAssistant {
    pub fn new(
        engine: ExecutionEngine,
        agent_manager: Arc<AgentManager>,
        session_coordinator: Arc<SessionCoordinator>,
        tool_service: Arc<ToolService>,
        settings: AssistantSettings,
    ) -> Self {
        Self {
            engine,
            agent_manager,
            session_coordinator,
            tool_service,
            settings,
        }
    }

    /// Synchronous task execution. Requests that fail basic structural
    /// validation never reach the engine — a caller always gets an error
    /// `TaskResult` rather than a transport error for a malformed request.
    pub async fn process_task(&self, request: TaskRequest) -> TaskResult {
        if let Err(reason) = request.validate_basic() {
            let err = AetherError::request_validation("ai_assistant.process_task", reason);
            return TaskResult::from_error(request.task_id.clone(), &err, request.classify().as_str());
        }
        self.engine.execute(&request).await
    }

    /// Live task execution: returns a chunk stream and the back-channel
    /// sender the caller uses to approve tool calls or inject follow-up
    /// messages.
    pub async fn process_task_live(&self, request: TaskRequest) -> AetherResult<(ChunkStream, CommunicatorSender)> {
        request
            .validate_basic()
            .map_err(|reason| AetherError::request_validation("ai_assistant.process_task_live", reason))?;
        self.engine.execute_live(&request).await
    }

    pub async fn list_tools(&self) -> Vec<crate::contracts::UniversalTool> {
        self.tool_service.list_tools().await
    }

    pub async fn register_tool(&self, tool: Arc<dyn crate::tools::registry::Tool>) {
        self.tool_service.register_tool(tool).await;
    }

    /// Sweeps idle chat sessions and reports how many were archived. A
    /// caller running this as a background loop should space calls by
    /// roughly `settings.idle_sweep_interval`.
    pub async fn sweep_idle_sessions(&self) -> usize {
        let swept = self.session_coordinator.sweep_idle(chrono::Utc::now()).await;
        swept.len()
    }

    pub fn idle_sweep_interval(&self) -> StdDuration {
        self.settings.idle_sweep_interval
    }

    pub fn idle_agent_ids(&self, idle_timeout: Duration) -> Vec<String> {
        self.agent_manager.idle_agent_ids(idle_timeout, chrono::Utc::now())
    }

    /// `healthy`/`degraded`/`unhealthy`, mirroring [`crate::framework::registry::FrameworkRegistry::health_check_all`].
    pub async fn health_check(&self) -> serde_json::Value {
        serde_json::json!({
            "status": self.engine.health_check().await,
            "version": self.settings.version.clone().unwrap_or_else(|| crate::AETHER_VERSION.to_string()),
        })
    }

    pub async fn shutdown(&self) {
        self.tool_service.shutdown().await;
    }
}
