use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::configs::{AgentConfig, ExecutionConfig};
use super::contexts::{
    ExecutionContext, FileReference, KnowledgeSource, SessionContext, UniversalMessage,
    UserContext,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    pub task_id: String,
    pub task_type: String,
    pub description: String,
    #[serde(default)]
    pub messages: Vec<UniversalMessage>,
    #[serde(default)]
    pub available_tools: Vec<String>,
    #[serde(default)]
    pub available_knowledge: Vec<KnowledgeSource>,
    #[serde(default)]
    pub attachments: Vec<FileReference>,
    pub user_context: Option<UserContext>,
    pub session_context: Option<SessionContext>,
    pub execution_context: Option<ExecutionContext>,
    pub execution_config: Option<ExecutionConfig>,
    pub agent_config: Option<AgentConfig>,
    pub agent_id: Option<String>,
    pub session_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

/// What AdapterCore decided this request means, after classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
    AgentCreation,
    ConversationContinuation,
    AgentCreationWithMessages,
}

impl RequestMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestMode::AgentCreation => "agent_creation",
            RequestMode::ConversationContinuation => "conversation_continuation",
            RequestMode::AgentCreationWithMessages => "agent_creation_with_messages",
        }
    }
}

impl TaskRequest {
    /// Structural validity independent of classification: non-empty
    /// `task_id`/`task_type`, and a creation/continuation discriminator
    /// present. Returns the human-readable reason on failure.
    pub fn validate_basic(&self) -> Result<(), String> {
        if self.task_id.trim().is_empty() {
            return Err("task_id must not be empty".to_string());
        }
        if self.task_type.trim().is_empty() {
            return Err("task_type must not be empty".to_string());
        }
        if self.description.trim().is_empty() {
            return Err("description must not be empty".to_string());
        }
        Ok(())
    }

    pub fn has_context(&self) -> bool {
        self.agent_config.is_some() || self.agent_id.is_some() || self.session_id.is_some()
    }

    /// AgentCreation / ConversationContinuation / AgentCreationWithMessages
    /// per spec.md §4.5.
    pub fn classify(&self) -> RequestMode {
        let has_config = self.agent_config.is_some();
        let has_agent_id = self.agent_id.is_some();
        let has_messages = !self.messages.is_empty();

        if has_config && !has_agent_id && has_messages {
            RequestMode::AgentCreationWithMessages
        } else if has_config && !has_agent_id {
            RequestMode::AgentCreation
        } else {
            RequestMode::ConversationContinuation
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequest {
    pub tool_name: String,
    pub tool_namespace: Option<String>,
    #[serde(default)]
    pub parameters: Value,
    pub user_context: Option<UserContext>,
    pub session_context: Option<SessionContext>,
    pub execution_context: Option<ExecutionContext>,
    pub timeout: Option<u64>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}
