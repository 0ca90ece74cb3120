use std::collections::HashSet;

use chrono::{DateTime, Utc};

use super::configs::AgentConfig;
use super::contexts::{KnowledgeSource, UniversalMessage};

/// Owned exclusively by SessionCoordinator. Invariant: if any of the three
/// `active_*` fields is set, all three are set and reference a live
/// runner+session (enforced by SessionCoordinator, never by construction).
#[derive(Debug, Clone)]
pub struct ChatSessionInfo {
    pub user_id: String,
    pub chat_session_id: String,
    pub active_agent_id: Option<String>,
    pub active_runner_session_id: Option<String>,
    pub active_runner_id: Option<String>,
    pub available_knowledge: Vec<KnowledgeSource>,
    pub synced_knowledge_sources: HashSet<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub last_switch_at: Option<DateTime<Utc>>,
}

impl ChatSessionInfo {
    pub fn new(user_id: impl Into<String>, chat_session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            chat_session_id: chat_session_id.into(),
            active_agent_id: None,
            active_runner_session_id: None,
            active_runner_id: None,
            available_knowledge: Vec::new(),
            synced_knowledge_sources: HashSet::new(),
            created_at: now,
            last_activity: now,
            last_switch_at: None,
        }
    }

    /// True once all three active_* fields are populated. A partial set is
    /// a programmer error, not a valid transient state.
    pub fn is_bound(&self) -> bool {
        self.active_agent_id.is_some()
            && self.active_runner_session_id.is_some()
            && self.active_runner_id.is_some()
    }

    pub fn bind(&mut self, agent_id: String, runner_session_id: String, runner_id: String) {
        self.active_agent_id = Some(agent_id);
        self.active_runner_session_id = Some(runner_session_id);
        self.active_runner_id = Some(runner_id);
        self.last_activity = Utc::now();
    }

    pub fn record_switch(&mut self, agent_id: String, runner_session_id: String, runner_id: String) {
        self.bind(agent_id, runner_session_id, runner_id);
        self.last_switch_at = Some(Utc::now());
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

/// Result of SessionCoordinator::coordinate_chat_session.
#[derive(Debug, Clone)]
pub struct CoordinationResult {
    pub runner_session_id: String,
    pub switch_occurred: bool,
    pub previous_agent_id: Option<String>,
    pub new_agent_id: Option<String>,
}

/// Immutable snapshot sufficient to re-inject chat history on the next
/// request for a chat_session cleared by the idle sweeper.
#[derive(Debug, Clone)]
pub struct SessionRecoveryRecord {
    pub chat_session_id: String,
    pub user_id: String,
    pub agent_id: String,
    pub agent_config: Option<AgentConfig>,
    pub chat_history: Vec<UniversalMessage>,
    pub archived_at: DateTime<Utc>,
}

impl SessionRecoveryRecord {
    /// Redacted projection (no message bodies) for logging.
    pub fn to_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "chat_session_id": self.chat_session_id,
            "user_id": self.user_id,
            "agent_id": self.agent_id,
            "message_count": self.chat_history.len(),
            "archived_at": self.archived_at.to_rfc3339(),
        })
    }
}

/// Converts a recovery record's chat history into replayable messages,
/// skipping tool/function artifacts and annotating restored messages.
/// Grounded on `recovery_record_to_messages` in the source material.
pub fn recovery_record_to_messages(record: &SessionRecoveryRecord, mark_restored: bool) -> Vec<UniversalMessage> {
    record
        .chat_history
        .iter()
        .filter(|m| !m.is_tool_artifact())
        .cloned()
        .map(|mut m| {
            if mark_restored {
                m.metadata.insert(
                    "restored_from_archive".to_string(),
                    serde_json::Value::Bool(true),
                );
                m.metadata.insert(
                    "archived_at".to_string(),
                    serde_json::Value::String(record.archived_at.to_rfc3339()),
                );
            }
            m
        })
        .collect()
}
