//! Pool of runner instances keyed by agent-config fingerprint; per-runner
//! session map; agent<->runner binding; idle metrics; cleanup callbacks.
//! Grounded on spec.md §4.6; concurrency discipline (single rw-style lock
//! over the pool and indices) follows §5.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::config_fingerprint::fingerprint;
use crate::contracts::{AgentConfig, RunnerContext, RunnerHandle, SessionServiceHandle, TaskRequest};
use crate::errors::{AetherError, AetherResult};

#[derive(Debug, Clone)]
pub struct RunnerManagerSettings {
    pub default_app_name: String,
    pub default_user_id: String,
    pub max_sessions_per_agent: usize,
    pub session_id_prefix: String,
    pub runner_id_prefix: String,
}

impl Default for RunnerManagerSettings {
    fn default() -> Self {
        Self {
            default_app_name: "aether_frame".to_string(),
            default_user_id: "anonymous_user".to_string(),
            max_sessions_per_agent: 50,
            session_id_prefix: "runner_session".to_string(),
            runner_id_prefix: "runner".to_string(),
        }
    }
}

/// Factory the manager uses to materialize a fresh runner+session-service
/// pair for a never-before-seen config fingerprint. The concrete agent
/// runtime this binds to is supplied by the embedding adapter.
#[async_trait::async_trait]
pub trait RunnerFactory: Send + Sync {
    async fn create_runner(&self, agent_config: &AgentConfig) -> AetherResult<(Arc<dyn RunnerHandle>, Arc<dyn SessionServiceHandle>)>;
}

type AgentCleanupCallback = Arc<dyn Fn(&str) + Send + Sync>;

pub struct RunnerManager {
    runners: RwLock<HashMap<String, RunnerContext>>,
    config_to_runner: RwLock<HashMap<String, String>>,
    session_to_runner: RwLock<HashMap<String, String>>,
    agent_runner_mapping: RwLock<HashMap<String, String>>,
    /// Guards runner creation per config fingerprint so concurrent
    /// first-use requests deduplicate instead of racing to create two
    /// runners for the same config.
    creation_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    settings: RunnerManagerSettings,
    factory: Arc<dyn RunnerFactory>,
    agent_cleanup_callback: RwLock<Option<AgentCleanupCallback>>,
}

impl RunnerManager {
    pub fn new(settings: RunnerManagerSettings, factory: Arc<dyn RunnerFactory>) -> Self {
        Self {
            runners: RwLock::new(HashMap::new()),
            config_to_runner: RwLock::new(HashMap::new()),
            session_to_runner: RwLock::new(HashMap::new()),
            agent_runner_mapping: RwLock::new(HashMap::new()),
            creation_locks: Mutex::new(HashMap::new()),
            settings,
            factory,
            agent_cleanup_callback: RwLock::new(None),
        }
    }

    pub async fn set_agent_cleanup_callback(&self, callback: AgentCleanupCallback) {
        *self.agent_cleanup_callback.write().await = Some(callback);
    }

    async fn fingerprint_lock(&self, config_hash: &str) -> Arc<Mutex<()>> {
        let mut locks = self.creation_locks.lock().await;
        locks.entry(config_hash.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Computes the config fingerprint; reuses an existing open runner when
    /// one exists and has capacity, else creates one. When `create_session`
    /// is true, also creates a session bound to the caller's user id.
    pub async fn get_or_create_runner(
        &self,
        agent_id: &str,
        agent_config: &AgentConfig,
        task_request: Option<&TaskRequest>,
        engine_session_id: Option<&str>,
        allow_reuse: bool,
        create_session: bool,
    ) -> AetherResult<(String, Option<String>)> {
        let config_hash = fingerprint(agent_config);
        let fp_lock = self.fingerprint_lock(&config_hash).await;
        let _guard = fp_lock.lock().await;

        let existing_runner_id = {
            let config_to_runner = self.config_to_runner.read().await;
            config_to_runner.get(&config_hash).cloned()
        };

        let runner_id = if let Some(runner_id) = existing_runner_id.filter(|_| allow_reuse) {
            let has_capacity = {
                let runners = self.runners.read().await;
                runners
                    .get(&runner_id)
                    .map(|r| r.session_count() < self.settings.max_sessions_per_agent)
                    .unwrap_or(false)
            };
            if has_capacity {
                runner_id
            } else {
                self.create_runner(&config_hash, agent_config).await?
            }
        } else {
            self.create_runner(&config_hash, agent_config).await?
        };

        self.agent_runner_mapping.write().await.insert(agent_id.to_string(), runner_id.clone());

        let session_id = if create_session {
            let user_id = task_request
                .and_then(|r| r.user_context.as_ref())
                .map(|u| u.resolve_user_id())
                .unwrap_or_else(|| self.settings.default_user_id.clone());
            Some(
                self.create_session_in_runner(&runner_id, &user_id, task_request, engine_session_id)
                    .await?,
            )
        } else {
            None
        };

        Ok((runner_id, session_id))
    }

    async fn create_runner(&self, config_hash: &str, agent_config: &AgentConfig) -> AetherResult<String> {
        let (runner_handle, session_service) = self.factory.create_runner(agent_config).await?;
        let runner_id = format!("{}_{}", self.settings.runner_id_prefix, Uuid::new_v4());
        let now = Utc::now();
        let context = RunnerContext {
            runner_id: runner_id.clone(),
            runner_handle,
            session_service,
            agent_config: agent_config.clone(),
            config_hash: config_hash.to_string(),
            sessions: Default::default(),
            session_user_ids: HashMap::new(),
            created_at: now,
            last_activity: now,
            app_name: self.settings.default_app_name.clone(),
        };
        self.runners.write().await.insert(runner_id.clone(), context);
        self.config_to_runner.write().await.insert(config_hash.to_string(), runner_id.clone());
        Ok(runner_id)
    }

    /// Enforces per-runner user-id mapping; never stores a process-wide
    /// user_id on the runner, keeping a single runner multi-tenant safe.
    pub async fn create_session_in_runner(
        &self,
        runner_id: &str,
        user_id: &str,
        task_request: Option<&TaskRequest>,
        external_session_id: Option<&str>,
    ) -> AetherResult<String> {
        let session_id = external_session_id
            .map(|s| s.to_string())
            .or_else(|| task_request.map(|r| format!("{}_{}_{}", self.settings.session_id_prefix, r.task_id, Uuid::new_v4())))
            .unwrap_or_else(|| format!("{}_{}", self.settings.session_id_prefix, Uuid::new_v4()));

        let mut runners = self.runners.write().await;
        let context = runners
            .get_mut(runner_id)
            .ok_or_else(|| AetherError::runner_not_found("runner_manager.create_session_in_runner", runner_id.to_string()))?;

        context
            .session_service
            .create_session(&context.app_name, user_id, &session_id)
            .await?;

        context.sessions.insert(session_id.clone());
        context.session_user_ids.insert(session_id.clone(), user_id.to_string());
        context.touch();
        drop(runners);

        self.session_to_runner.write().await.insert(session_id.clone(), runner_id.to_string());
        Ok(session_id)
    }

    pub async fn remove_session_from_runner(&self, runner_id: &str, session_id: &str) -> AetherResult<()> {
        let mut runners = self.runners.write().await;
        if let Some(context) = runners.get_mut(runner_id) {
            if context.sessions.remove(session_id) {
                context.session_user_ids.remove(session_id);
                let _ = context.session_service.delete_session(&context.app_name, "", session_id).await;
            }
        }
        drop(runners);
        self.session_to_runner.write().await.remove(session_id);
        Ok(())
    }

    pub async fn get_runner_session_count(&self, runner_id: &str) -> usize {
        self.runners.read().await.get(runner_id).map(|r| r.session_count()).unwrap_or(0)
    }

    /// Best-effort shutdown: always purges indices even if the underlying
    /// shutdown calls fail, so in-memory state never drifts from reality.
    /// Invokes the agent-cleanup callback for every agent bound to this
    /// runner — outside any lock, per §5's deadlock-avoidance rule.
    pub async fn cleanup_runner(&self, runner_id: &str) -> bool {
        let (runner_handle, session_service, bound_agents) = {
            let mut runners = self.runners.write().await;
            let Some(context) = runners.remove(runner_id) else {
                return false;
            };
            let mut agent_runner_mapping = self.agent_runner_mapping.write().await;
            let bound_agents: Vec<String> = agent_runner_mapping
                .iter()
                .filter(|(_, r)| r.as_str() == runner_id)
                .map(|(a, _)| a.clone())
                .collect();
            for agent_id in &bound_agents {
                agent_runner_mapping.remove(agent_id);
            }
            let mut session_to_runner = self.session_to_runner.write().await;
            for session_id in &context.sessions {
                session_to_runner.remove(session_id);
            }
            self.config_to_runner.write().await.retain(|_, r| r != runner_id);
            (context.runner_handle, context.session_service, bound_agents)
        };

        let shutdown_ok = runner_handle.shutdown().await.is_ok() && session_service.shutdown().await.is_ok();

        if let Some(callback) = self.agent_cleanup_callback.read().await.clone() {
            for agent_id in &bound_agents {
                callback(agent_id);
            }
        }

        shutdown_ok
    }

    pub async fn get_runner_by_session(&self, session_id: &str) -> Option<String> {
        self.session_to_runner.read().await.get(session_id).cloned()
    }

    pub async fn get_runner_for_agent(&self, agent_id: &str) -> Option<String> {
        self.agent_runner_mapping.read().await.get(agent_id).cloned()
    }

    pub async fn mark_runner_activity(&self, runner_id: &str) {
        if let Some(context) = self.runners.write().await.get_mut(runner_id) {
            context.touch();
        }
    }

    pub async fn runner_handle(&self, runner_id: &str) -> Option<Arc<dyn RunnerHandle>> {
        self.runners.read().await.get(runner_id).map(|c| c.runner_handle.clone())
    }

    pub async fn session_service(&self, runner_id: &str) -> Option<Arc<dyn SessionServiceHandle>> {
        self.runners.read().await.get(runner_id).map(|c| c.session_service.clone())
    }

    pub async fn app_name(&self, runner_id: &str) -> Option<String> {
        self.runners.read().await.get(runner_id).map(|c| c.app_name.clone())
    }

    pub async fn idle_runner_ids(&self, idle_timeout: chrono::Duration, now: DateTime<Utc>) -> Vec<String> {
        self.runners
            .read()
            .await
            .iter()
            .filter(|(_, c)| now - c.last_activity >= idle_timeout)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{FrameworkType, SessionEvent, SessionSnapshot};
    use futures::stream;
    use std::collections::HashMap as Map;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoopRunner;

    #[async_trait::async_trait]
    impl RunnerHandle for NoopRunner {
        async fn run_async(&self, _user_id: &str, _session_id: &str, _content: &str) -> AetherResult<crate::contracts::RuntimeEventStream> {
            Ok(Box::pin(stream::empty()))
        }
        async fn shutdown(&self) -> AetherResult<()> {
            Ok(())
        }
    }

    struct InMemorySessions(Mutex<HashMap<String, SessionSnapshot>>);

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

    struct CountingFactory(AtomicUsize);

    #[async_trait::async_trait]
    impl RunnerFactory for CountingFactory {
        async fn create_runner(&self, _agent_config: &AgentConfig) -> AetherResult<(Arc<dyn RunnerHandle>, Arc<dyn SessionServiceHandle>)> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok((Arc::new(NoopRunner), Arc::new(InMemorySessions(Mutex::new(Map::new())))))
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

    #[tokio::test]
    async fn same_fingerprint_reuses_runner() {
        let factory = Arc::new(CountingFactory(AtomicUsize::new(0)));
        let manager = RunnerManager::new(RunnerManagerSettings::default(), factory.clone());
        let cfg = config();

        let (runner_a, _) = manager.get_or_create_runner("agent-a", &cfg, None, None, true, true).await.unwrap();
        let (runner_b, _) = manager.get_or_create_runner("agent-b", &cfg, None, None, true, true).await.unwrap();

        assert_eq!(runner_a, runner_b);
        assert_eq!(factory.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn session_to_runner_consistency_holds() {
        let factory = Arc::new(CountingFactory(AtomicUsize::new(0)));
        let manager = RunnerManager::new(RunnerManagerSettings::default(), factory);
        let cfg = config();
        let (runner_id, session_id) = manager.get_or_create_runner("agent-a", &cfg, None, None, true, true).await.unwrap();
        let session_id = session_id.unwrap();

        let mapped = manager.get_runner_by_session(&session_id).await.unwrap();
        assert_eq!(mapped, runner_id);
        assert_eq!(manager.get_runner_session_count(&runner_id).await, 1);
    }

    #[tokio::test]
    async fn cleanup_runner_is_idempotent() {
        let factory = Arc::new(CountingFactory(AtomicUsize::new(0)));
        let manager = RunnerManager::new(RunnerManagerSettings::default(), factory);
        let cfg = config();
        let (runner_id, _) = manager.get_or_create_runner("agent-a", &cfg, None, None, true, true).await.unwrap();

        assert!(manager.cleanup_runner(&runner_id).await);
        assert!(!manager.cleanup_runner(&runner_id).await);
        assert_eq!(manager.get_runner_session_count(&runner_id).await, 0);
    }

    #[tokio::test]
    async fn exhausted_capacity_creates_new_runner() {
        let factory = Arc::new(CountingFactory(AtomicUsize::new(0)));
        let mut settings = RunnerManagerSettings::default();
        settings.max_sessions_per_agent = 1;
        let manager = RunnerManager::new(settings, factory.clone());
        let cfg = config();

        let (runner_a, _) = manager.get_or_create_runner("agent-a", &cfg, None, None, true, true).await.unwrap();
        let (runner_b, _) = manager.get_or_create_runner("agent-b", &cfg, None, None, true, true).await.unwrap();

        assert_ne!(runner_a, runner_b);
        assert_eq!(factory.0.load(Ordering::SeqCst), 2);
    }
}
