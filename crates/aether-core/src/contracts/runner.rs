use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;

use super::configs::AgentConfig;
use crate::errors::AetherResult;

/// One event in a runtime session's conversation history, as understood by
/// the history-extraction/injection algorithm (Agent Switch Protocol and
/// recovery). `author == "user"` maps to a user turn; any other author maps
/// to an assistant turn; a `None` content marks a tool/function artifact
/// that history migration must drop.
#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub author: String,
    pub content: Option<String>,
    pub is_tool_artifact: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    pub events: Vec<SessionEvent>,
}

/// One turn emitted by a runner while executing a conversation.
#[derive(Debug, Clone)]
pub struct RuntimeEvent {
    pub author: String,
    pub content: Option<String>,
    pub is_final: bool,
    pub timestamp: DateTime<Utc>,
}

pub type RuntimeEventStream = Pin<Box<dyn Stream<Item = RuntimeEvent> + Send>>;

/// Abstraction over a concrete agent runtime's session store. The concrete
/// wire protocol to any specific runtime is out of scope; adapters provide
/// an implementation of this trait per framework.
#[async_trait]
pub trait SessionServiceHandle: Send + Sync {
    async fn create_session(&self, app_name: &str, user_id: &str, session_id: &str) -> AetherResult<()>;
    async fn get_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &str,
    ) -> AetherResult<Option<SessionSnapshot>>;
    async fn delete_session(&self, app_name: &str, user_id: &str, session_id: &str) -> AetherResult<()>;
    async fn append_event(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &str,
        event: SessionEvent,
    ) -> AetherResult<()>;
    async fn shutdown(&self) -> AetherResult<()>;
}

/// Abstraction over a concrete agent runtime's execution entry point.
#[async_trait]
pub trait RunnerHandle: Send + Sync {
    async fn run_async(&self, user_id: &str, session_id: &str, content: &str) -> AetherResult<RuntimeEventStream>;
    async fn shutdown(&self) -> AetherResult<()>;
}

/// Owned exclusively by RunnerManager, keyed by `runner_id`.
pub struct RunnerContext {
    pub runner_id: String,
    pub runner_handle: Arc<dyn RunnerHandle>,
    pub session_service: Arc<dyn SessionServiceHandle>,
    pub agent_config: AgentConfig,
    pub config_hash: String,
    pub sessions: HashSet<String>,
    pub session_user_ids: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub app_name: String,
}

impl RunnerContext {
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

impl std::fmt::Debug for RunnerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerContext")
            .field("runner_id", &self.runner_id)
            .field("config_hash", &self.config_hash)
            .field("sessions", &self.sessions)
            .field("app_name", &self.app_name)
            .finish()
    }
}
