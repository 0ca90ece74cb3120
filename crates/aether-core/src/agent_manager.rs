//! Owns agent metadata on behalf of AdapterCore: agent_id issuance, the
//! config each agent was created with, and a `last_activity` timestamp used
//! by the idle sweeper. Subordinate to AdapterCore per spec.md §3 ownership
//! rules — RunnerManager and SessionCoordinator never reach into this map
//! directly, they only hold/return `agent_id` strings.
//!
//! Uses a plain `std::sync::Mutex` rather than `tokio::sync::RwLock`: every
//! critical section here is a HashMap lookup/insert with no `.await` inside
//! it, and RunnerManager's cleanup callback (see spec.md §4.6) is a
//! synchronous `Fn(&str)` invoked outside any async lock — an async mutex
//! would force that callback to spawn a task just to remove an entry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::contracts::{AgentConfig, AgentStatus, FrameworkType};

#[derive(Debug, Clone)]
pub struct AgentMetadata {
    pub agent_id: String,
    pub agent_config: AgentConfig,
    pub framework_type: FrameworkType,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub status: AgentStatus,
}

#[derive(Debug, Clone)]
pub struct AgentManagerSettings {
    pub agent_id_prefix: String,
}

impl Default for AgentManagerSettings {
    fn default() -> Self {
        Self {
            agent_id_prefix: "agent".to_string(),
        }
    }
}

pub struct AgentManager {
    agents: Mutex<HashMap<String, AgentMetadata>>,
    settings: AgentManagerSettings,
}

impl AgentManager {
    pub fn new(settings: AgentManagerSettings) -> Self {
        Self {
            agents: Mutex::new(HashMap::new()),
            settings,
        }
    }

    /// Registers a freshly created agent and returns its id. Called once
    /// per AgentCreation request; never reused across configs — runner
    /// reuse is a RunnerManager concern keyed by config fingerprint, not an
    /// AgentManager one.
    pub fn create_agent(&self, agent_config: &AgentConfig) -> String {
        let agent_id = format!("{}_{}", self.settings.agent_id_prefix, Uuid::new_v4());
        let now = Utc::now();
        self.agents.lock().unwrap().insert(
            agent_id.clone(),
            AgentMetadata {
                agent_id: agent_id.clone(),
                agent_config: agent_config.clone(),
                framework_type: agent_config.framework_type,
                created_at: now,
                last_activity: now,
                status: AgentStatus::Ready,
            },
        );
        agent_id
    }

    pub fn get_config(&self, agent_id: &str) -> Option<AgentConfig> {
        self.agents.lock().unwrap().get(agent_id).map(|m| m.agent_config.clone())
    }

    pub fn exists(&self, agent_id: &str) -> bool {
        self.agents.lock().unwrap().contains_key(agent_id)
    }

    pub fn mark_activity(&self, agent_id: &str) {
        if let Some(meta) = self.agents.lock().unwrap().get_mut(agent_id) {
            meta.last_activity = Utc::now();
            meta.status = AgentStatus::Idle;
        }
    }

    pub fn set_status(&self, agent_id: &str, status: AgentStatus) {
        if let Some(meta) = self.agents.lock().unwrap().get_mut(agent_id) {
            meta.status = status;
        }
    }

    pub fn remove(&self, agent_id: &str) -> bool {
        self.agents.lock().unwrap().remove(agent_id).is_some()
    }

    pub fn idle_agent_ids(&self, idle_timeout: Duration, now: DateTime<Utc>) -> Vec<String> {
        self.agents
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, meta)| now - meta.last_activity >= idle_timeout)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// A sync closure suitable for [`crate::runner_manager::RunnerManager::set_agent_cleanup_callback`]:
    /// when a runner is torn down, every agent bound to it is dropped from
    /// this map too.
    pub fn cleanup_callback(self: &Arc<Self>) -> Arc<dyn Fn(&str) + Send + Sync> {
        let this = self.clone();
        Arc::new(move |agent_id: &str| {
            this.remove(agent_id);
        })
    }
}
