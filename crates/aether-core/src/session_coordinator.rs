//! Binds a caller-facing chat session to exactly one runner-backed agent
//! session at a time, and implements the Agent Switch Protocol: moving a
//! chat session from one bound agent to another without losing
//! conversation history. Grounded on `adk_session_manager.py`'s
//! `coordinate_chat_session`; the idle-sweeper/recovery split is grounded
//! on `session_recovery.py`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use crate::contracts::{
    recovery_record_to_messages, AgentConfig, ChatSessionInfo, CoordinationResult, SessionEvent,
    SessionRecoveryRecord, TaskRequest, UniversalMessage,
};
use crate::errors::{AetherError, AetherResult};
use crate::runner_manager::RunnerManager;

#[async_trait::async_trait]
pub trait SessionRecoveryStore: Send + Sync {
    async fn archive(&self, record: SessionRecoveryRecord);
    async fn take(&self, chat_session_id: &str) -> Option<SessionRecoveryRecord>;
    async fn peek(&self, chat_session_id: &str) -> Option<SessionRecoveryRecord>;
    async fn retain_after_failed_recovery(&self, record: SessionRecoveryRecord);
}

/// `std::sync::Mutex`-guarded map; recovery records are small summaries of
/// recently idle sessions, not a durable store — restart loses them, which
/// is acceptable since the upstream caller always resends enough context
/// to recreate an agent on a hard miss.
#[derive(Default)]
pub struct InMemorySessionRecoveryStore {
    records: std::sync::Mutex<HashMap<String, SessionRecoveryRecord>>,
}

impl InMemorySessionRecoveryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SessionRecoveryStore for InMemorySessionRecoveryStore {
    async fn archive(&self, record: SessionRecoveryRecord) {
        self.records.lock().unwrap().insert(record.chat_session_id.clone(), record);
    }

    async fn take(&self, chat_session_id: &str) -> Option<SessionRecoveryRecord> {
        self.records.lock().unwrap().remove(chat_session_id)
    }

    async fn peek(&self, chat_session_id: &str) -> Option<SessionRecoveryRecord> {
        self.records.lock().unwrap().get(chat_session_id).cloned()
    }

    async fn retain_after_failed_recovery(&self, record: SessionRecoveryRecord) {
        self.records.lock().unwrap().insert(record.chat_session_id.clone(), record);
    }
}

#[derive(Debug, Clone)]
pub struct SessionCoordinatorSettings {
    pub chat_session_idle_timeout: Duration,
}

impl Default for SessionCoordinatorSettings {
    fn default() -> Self {
        Self {
            chat_session_idle_timeout: Duration::minutes(30),
        }
    }
}

pub struct SessionCoordinator {
    chat_sessions: RwLock<HashMap<String, ChatSessionInfo>>,
    /// Chat sessions idle-cleared by the sweeper, keyed to the time they
    /// were cleared. A chat_session_id present here but absent from the
    /// recovery store has lost its snapshot — the next coordination
    /// attempt must fail loudly rather than silently starting a fresh
    /// chat under the same id.
    cleared_sessions: RwLock<HashMap<String, DateTime<Utc>>>,
    /// Chat sessions currently mid-coordination; the idle sweeper skips
    /// these so it never races a concurrent switch/recovery.
    in_use: RwLock<HashSet<String>>,
    runner_manager: Arc<RunnerManager>,
    recovery_store: Arc<dyn SessionRecoveryStore>,
    settings: SessionCoordinatorSettings,
}

impl SessionCoordinator {
    pub fn new(
        runner_manager: Arc<RunnerManager>,
        recovery_store: Arc<dyn SessionRecoveryStore>,
        settings: SessionCoordinatorSettings,
    ) -> Self {
        Self {
            chat_sessions: RwLock::new(HashMap::new()),
            cleared_sessions: RwLock::new(HashMap::new()),
            in_use: RwLock::new(HashSet::new()),
            runner_manager,
            recovery_store,
            settings,
        }
    }

    async fn mark_in_use(&self, chat_session_id: &str) {
        self.in_use.write().await.insert(chat_session_id.to_string());
    }

    async fn clear_in_use(&self, chat_session_id: &str) {
        self.in_use.write().await.remove(chat_session_id);
    }

    /// Entry point: binds `chat_session_id` to a runner session for
    /// `agent_id`/`agent_config`, transparently switching agents or
    /// recovering from a prior idle-clear as needed.
    pub async fn coordinate_chat_session(
        &self,
        user_id: &str,
        chat_session_id: &str,
        agent_id: &str,
        agent_config: &AgentConfig,
        task_request: Option<&TaskRequest>,
    ) -> AetherResult<CoordinationResult> {
        self.mark_in_use(chat_session_id).await;
        let result = self
            .coordinate_inner(user_id, chat_session_id, agent_id, agent_config, task_request)
            .await;
        self.clear_in_use(chat_session_id).await;
        result
    }

    async fn coordinate_inner(
        &self,
        user_id: &str,
        chat_session_id: &str,
        agent_id: &str,
        agent_config: &AgentConfig,
        task_request: Option<&TaskRequest>,
    ) -> AetherResult<CoordinationResult> {
        let existing = self.chat_sessions.read().await.get(chat_session_id).cloned();

        if let Some(mut info) = existing {
            if info.active_agent_id.as_deref() == Some(agent_id) {
                info.touch();
                let runner_session_id = info.active_runner_session_id.clone().ok_or_else(|| {
                    AetherError::session_recovery_failed(
                        "session_coordinator.coordinate",
                        "bound chat session missing runner_session_id",
                    )
                })?;
                self.chat_sessions.write().await.insert(chat_session_id.to_string(), info);
                return Ok(CoordinationResult {
                    runner_session_id,
                    switch_occurred: false,
                    previous_agent_id: Some(agent_id.to_string()),
                    new_agent_id: Some(agent_id.to_string()),
                });
            }

            return self.switch_agent(chat_session_id, info, agent_id, agent_config, task_request).await;
        }

        if let Some(record) = self.recovery_store.take(chat_session_id).await {
            return self.recover(user_id, chat_session_id, agent_id, agent_config, record, task_request).await;
        }

        if self.cleared_sessions.read().await.contains_key(chat_session_id) {
            return Err(AetherError::session_recovery_failed(
                "session_coordinator.coordinate",
                format!("chat session '{}' was idle-cleared and its recovery record is no longer available", chat_session_id),
            )
            .with_details(serde_json::json!({"reason": "missing_recovery_record", "chat_session_id": chat_session_id})));
        }

        self.bind_new(user_id, chat_session_id, agent_id, agent_config, task_request).await
    }

    async fn bind_new(
        &self,
        user_id: &str,
        chat_session_id: &str,
        agent_id: &str,
        agent_config: &AgentConfig,
        task_request: Option<&TaskRequest>,
    ) -> AetherResult<CoordinationResult> {
        let (runner_id, session_id) = self
            .runner_manager
            .get_or_create_runner(agent_id, agent_config, task_request, None, true, true)
            .await?;
        let runner_session_id = session_id.expect("create_session requested");

        let mut info = ChatSessionInfo::new(user_id, chat_session_id);
        info.bind(agent_id.to_string(), runner_session_id.clone(), runner_id);
        self.chat_sessions.write().await.insert(chat_session_id.to_string(), info);

        Ok(CoordinationResult {
            runner_session_id,
            switch_occurred: false,
            previous_agent_id: None,
            new_agent_id: Some(agent_id.to_string()),
        })
    }

    /// Agent Switch Protocol: extract history from the currently bound
    /// runner session, tear it down, bind a fresh runner session for the
    /// new agent, and replay the filtered history into it.
    async fn switch_agent(
        &self,
        chat_session_id: &str,
        mut info: ChatSessionInfo,
        new_agent_id: &str,
        new_agent_config: &AgentConfig,
        task_request: Option<&TaskRequest>,
    ) -> AetherResult<CoordinationResult> {
        let previous_agent_id = info.active_agent_id.clone();

        let history = match (&info.active_runner_id, &info.active_runner_session_id) {
            (Some(runner_id), Some(runner_session_id)) => {
                self.extract_history(runner_id, runner_session_id).await.unwrap_or_default()
            }
            _ => Vec::new(),
        };

        if let (Some(runner_id), Some(runner_session_id)) = (&info.active_runner_id, &info.active_runner_session_id) {
            let _ = self.runner_manager.remove_session_from_runner(runner_id, runner_session_id).await;
        }

        let (new_runner_id, new_session_id) = self
            .runner_manager
            .get_or_create_runner(new_agent_id, new_agent_config, task_request, None, true, true)
            .await?;
        let new_runner_session_id = new_session_id.expect("create_session requested");

        self.inject_history(&new_runner_id, &new_runner_session_id, &history).await?;

        info.record_switch(new_agent_id.to_string(), new_runner_session_id.clone(), new_runner_id);
        self.chat_sessions.write().await.insert(chat_session_id.to_string(), info);

        Ok(CoordinationResult {
            runner_session_id: new_runner_session_id,
            switch_occurred: true,
            previous_agent_id,
            new_agent_id: Some(new_agent_id.to_string()),
        })
    }

    /// Recovery protocol: rebuild a runner session for the archived agent
    /// and replay the archived (not live) history. On failure, the record
    /// is put back so a later retry doesn't lose it.
    async fn recover(
        &self,
        user_id: &str,
        chat_session_id: &str,
        agent_id: &str,
        agent_config: &AgentConfig,
        record: SessionRecoveryRecord,
        task_request: Option<&TaskRequest>,
    ) -> AetherResult<CoordinationResult> {
        let messages = recovery_record_to_messages(&record, true);

        let result = async {
            let (runner_id, session_id) = self
                .runner_manager
                .get_or_create_runner(agent_id, agent_config, task_request, None, true, true)
                .await?;
            let runner_session_id = session_id.expect("create_session requested");
            self.inject_history(&runner_id, &runner_session_id, &messages).await?;
            Ok::<(String, String), AetherError>((runner_id, runner_session_id))
        }
        .await;

        match result {
            Ok((runner_id, runner_session_id)) => {
                let mut info = ChatSessionInfo::new(user_id, chat_session_id);
                info.bind(agent_id.to_string(), runner_session_id.clone(), runner_id);
                self.chat_sessions.write().await.insert(chat_session_id.to_string(), info);
                self.cleared_sessions.write().await.remove(chat_session_id);
                Ok(CoordinationResult {
                    runner_session_id,
                    switch_occurred: false,
                    previous_agent_id: Some(record.agent_id),
                    new_agent_id: Some(agent_id.to_string()),
                })
            }
            Err(err) => {
                self.recovery_store.retain_after_failed_recovery(record).await;
                Err(AetherError::session_recovery_failed(
                    "session_coordinator.recover",
                    format!("failed to recover chat session: {}", err.message),
                ))
            }
        }
    }

    async fn extract_history(&self, runner_id: &str, runner_session_id: &str) -> AetherResult<Vec<UniversalMessage>> {
        let Some(session_service) = self.runner_manager.session_service(runner_id).await else {
            return Ok(Vec::new());
        };
        let app_name = self.runner_manager.app_name(runner_id).await.unwrap_or_default();
        let snapshot = session_service.get_session(&app_name, "", runner_session_id).await?;
        Ok(snapshot
            .map(|s| s.events.into_iter().filter(|e| !e.is_tool_artifact).map(event_to_message).collect())
            .unwrap_or_default())
    }

    async fn inject_history(&self, runner_id: &str, runner_session_id: &str, history: &[UniversalMessage]) -> AetherResult<()> {
        let Some(session_service) = self.runner_manager.session_service(runner_id).await else {
            return Ok(());
        };
        let app_name = self.runner_manager.app_name(runner_id).await.unwrap_or_default();
        for message in history {
            session_service
                .append_event(&app_name, "", runner_session_id, message_to_event(message))
                .await?;
        }
        Ok(())
    }

    pub async fn get_chat_session(&self, chat_session_id: &str) -> Option<ChatSessionInfo> {
        self.chat_sessions.read().await.get(chat_session_id).cloned()
    }

    /// Idle sweep: archives and unbinds chat sessions whose `last_activity`
    /// is older than the configured timeout, skipping any session currently
    /// `in_use` to avoid racing an in-flight coordination call. Intended to
    /// run on a periodic background task.
    pub async fn sweep_idle(&self, now: DateTime<Utc>) -> Vec<String> {
        let idle_timeout = self.settings.chat_session_idle_timeout;
        let in_use = self.in_use.read().await.clone();

        let candidates: Vec<(String, ChatSessionInfo)> = self
            .chat_sessions
            .read()
            .await
            .iter()
            .filter(|(id, info)| !in_use.contains(*id) && now - info.last_activity >= idle_timeout)
            .map(|(id, info)| (id.clone(), info.clone()))
            .collect();

        let mut swept = Vec::new();
        for (chat_session_id, info) in candidates {
            self.archive_and_clear(&chat_session_id, &info).await;
            swept.push(chat_session_id);
        }
        swept
    }

    async fn archive_and_clear(&self, chat_session_id: &str, info: &ChatSessionInfo) {
        let (Some(agent_id), Some(runner_id), Some(runner_session_id)) =
            (&info.active_agent_id, &info.active_runner_id, &info.active_runner_session_id)
        else {
            self.chat_sessions.write().await.remove(chat_session_id);
            self.cleared_sessions.write().await.insert(chat_session_id.to_string(), Utc::now());
            return;
        };

        let history = self.extract_history(runner_id, runner_session_id).await.unwrap_or_default();
        let record = SessionRecoveryRecord {
            chat_session_id: chat_session_id.to_string(),
            user_id: info.user_id.clone(),
            agent_id: agent_id.clone(),
            agent_config: None,
            chat_history: history,
            archived_at: Utc::now(),
        };
        self.recovery_store.archive(record).await;

        let _ = self.runner_manager.remove_session_from_runner(runner_id, runner_session_id).await;
        self.chat_sessions.write().await.remove(chat_session_id);
        self.cleared_sessions.write().await.insert(chat_session_id.to_string(), Utc::now());
    }

    pub async fn pending_recovery(&self, chat_session_id: &str) -> Option<SessionRecoveryRecord> {
        self.recovery_store.peek(chat_session_id).await
    }
}

fn event_to_message(event: SessionEvent) -> UniversalMessage {
    use crate::contracts::{MessageContent, MessageRole};
    let role = if event.author == "user" { MessageRole::User } else { MessageRole::Assistant };
    UniversalMessage {
        role,
        content: MessageContent::Text(event.content.unwrap_or_default()),
        author: Some(event.author),
        tool_calls: None,
        metadata: HashMap::new(),
    }
}

fn message_to_event(message: &UniversalMessage) -> SessionEvent {
    use crate::contracts::MessageRole;
    let author = message.author.clone().unwrap_or_else(|| match message.role {
        MessageRole::User => "user".to_string(),
        MessageRole::Assistant => "assistant".to_string(),
        MessageRole::System => "system".to_string(),
        MessageRole::Tool => "tool".to_string(),
    });
    SessionEvent {
        author,
        content: Some(message.as_text()),
        is_tool_artifact: message.is_tool_artifact(),
        timestamp: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{FrameworkType, RunnerHandle, RuntimeEventStream, SessionServiceHandle, SessionSnapshot};
    use crate::runner_manager::{RunnerFactory, RunnerManagerSettings};
    use futures::stream;
    use std::collections::HashMap as Map;

    struct NoopRunner;

    #[async_trait::async_trait]
    impl RunnerHandle for NoopRunner {
        async fn run_async(&self, _user_id: &str, _session_id: &str, _content: &str) -> AetherResult<RuntimeEventStream> {
            Ok(Box::pin(stream::empty()))
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

    struct SimpleFactory;

    #[async_trait::async_trait]
    impl RunnerFactory for SimpleFactory {
        async fn create_runner(&self, _agent_config: &AgentConfig) -> AetherResult<(Arc<dyn RunnerHandle>, Arc<dyn SessionServiceHandle>)> {
            Ok((Arc::new(NoopRunner), Arc::new(InMemorySessions(tokio::sync::Mutex::new(Map::new())))))
        }
    }

    fn config(agent_type: &str) -> AgentConfig {
        AgentConfig {
            agent_type: agent_type.to_string(),
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

    fn coordinator() -> SessionCoordinator {
        let runner_manager = Arc::new(RunnerManager::new(RunnerManagerSettings::default(), Arc::new(SimpleFactory)));
        let recovery_store = Arc::new(InMemorySessionRecoveryStore::new());
        SessionCoordinator::new(runner_manager, recovery_store, SessionCoordinatorSettings::default())
    }

    #[tokio::test]
    async fn first_coordination_binds_new_session() {
        let coordinator = coordinator();
        let cfg = config("helper");
        let result = coordinator.coordinate_chat_session("u1", "chat-1", "agent-a", &cfg, None).await.unwrap();
        assert!(!result.switch_occurred);
        assert_eq!(result.new_agent_id.as_deref(), Some("agent-a"));
    }

    #[tokio::test]
    async fn same_agent_reuses_binding_without_switch() {
        let coordinator = coordinator();
        let cfg = config("helper");
        coordinator.coordinate_chat_session("u1", "chat-1", "agent-a", &cfg, None).await.unwrap();
        let result = coordinator.coordinate_chat_session("u1", "chat-1", "agent-a", &cfg, None).await.unwrap();
        assert!(!result.switch_occurred);
    }

    #[tokio::test]
    async fn different_agent_triggers_switch() {
        let coordinator = coordinator();
        let cfg_a = config("helper");
        let cfg_b = config("specialist");
        coordinator.coordinate_chat_session("u1", "chat-1", "agent-a", &cfg_a, None).await.unwrap();
        let result = coordinator.coordinate_chat_session("u1", "chat-1", "agent-b", &cfg_b, None).await.unwrap();
        assert!(result.switch_occurred);
        assert_eq!(result.previous_agent_id.as_deref(), Some("agent-a"));
        assert_eq!(result.new_agent_id.as_deref(), Some("agent-b"));
    }

    #[tokio::test]
    async fn idle_sweep_archives_and_unbinds() {
        let coordinator = coordinator();
        let cfg = config("helper");
        coordinator.coordinate_chat_session("u1", "chat-1", "agent-a", &cfg, None).await.unwrap();

        let future = Utc::now() + Duration::hours(2);
        let swept = coordinator.sweep_idle(future).await;
        assert_eq!(swept, vec!["chat-1".to_string()]);
        assert!(coordinator.get_chat_session("chat-1").await.is_none());
        assert!(coordinator.pending_recovery("chat-1").await.is_some());
    }

    #[tokio::test]
    async fn missing_recovery_record_after_clear_fails_loudly() {
        let coordinator = coordinator();
        let cfg = config("helper");
        coordinator.coordinate_chat_session("u1", "chat-1", "agent-a", &cfg, None).await.unwrap();
        coordinator.sweep_idle(Utc::now() + Duration::hours(2)).await;
        assert!(coordinator.pending_recovery("chat-1").await.is_some());

        // Simulate the record vanishing between sweep and the retry.
        coordinator.recovery_store.take("chat-1").await;

        let err = coordinator
            .coordinate_chat_session("u1", "chat-1", "agent-a", &cfg, None)
            .await
            .unwrap_err();
        assert_eq!(err.code, crate::errors::ErrorCode::SessionRecoveryFailed);
        assert_eq!(err.details["reason"], "missing_recovery_record");
    }

    #[tokio::test]
    async fn recovery_rebinds_from_archived_record() {
        let coordinator = coordinator();
        let cfg = config("helper");
        coordinator.coordinate_chat_session("u1", "chat-1", "agent-a", &cfg, None).await.unwrap();
        coordinator.sweep_idle(Utc::now() + Duration::hours(2)).await;

        let result = coordinator.coordinate_chat_session("u1", "chat-1", "agent-a", &cfg, None).await.unwrap();
        assert!(!result.switch_occurred);
        assert!(coordinator.pending_recovery("chat-1").await.is_none());
    }
}
