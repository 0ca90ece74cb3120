use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::enums::FrameworkType;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserPermissions {
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub restrictions: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPreferences {
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    pub preferred_framework: Option<FrameworkType>,
    #[serde(default)]
    pub settings: HashMap<String, Value>,
}

fn default_language() -> String {
    "en".to_string()
}
fn default_timezone() -> String {
    "UTC".to_string()
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            language: default_language(),
            timezone: default_timezone(),
            preferred_framework: None,
            settings: HashMap::new(),
        }
    }
}

/// Caller identity. `user_id` resolution follows a fixed fallback policy —
/// see [`UserContext::resolve_user_id`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub session_token: Option<String>,
    pub permissions: Option<UserPermissions>,
    pub preferences: Option<UserPreferences>,
}

impl UserContext {
    /// Explicit id, else username-derived, else session-token-derived
    /// (first 8 chars), else `"anonymous_user"`. Fixed policy, not an
    /// implicit chain — call sites must not re-derive this independently.
    pub fn resolve_user_id(&self) -> String {
        if let Some(id) = &self.user_id {
            if !id.is_empty() {
                return id.clone();
            }
        }
        if let Some(name) = &self.user_name {
            if !name.is_empty() {
                return format!("user_{}", name);
            }
        }
        if let Some(token) = &self.session_token {
            if !token.is_empty() {
                let prefix: String = token.chars().take(8).collect();
                return format!("session_{}", prefix);
            }
        }
        "anonymous_user".to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_name: String,
    #[serde(default)]
    pub parameters: Value,
    pub tool_namespace: Option<String>,
    pub call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileReference {
    pub path: String,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageReference {
    pub url: String,
    pub mime_type: Option<String>,
}

/// One segment of a structured message body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "part_type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    FunctionCall { function_call: ToolCall },
    FileReference { file_reference: FileReference },
    ImageReference { image_reference: ImageReference },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

/// Message content is either a plain string or structured parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniversalMessage {
    pub role: MessageRole,
    pub content: MessageContent,
    pub author: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl UniversalMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: MessageContent::Text(text.into()),
            author: None,
            tool_calls: None,
            metadata: HashMap::new(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: MessageContent::Text(text.into()),
            author: None,
            tool_calls: None,
            metadata: HashMap::new(),
        }
    }

    pub fn as_text(&self) -> String {
        match &self.content {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.clone()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }

    /// True if any part of this message is a tool/function artifact rather
    /// than conversational text — used to filter replayed history.
    pub fn is_tool_artifact(&self) -> bool {
        matches!(self.role, MessageRole::Tool)
            || self.tool_calls.as_ref().is_some_and(|c| !c.is_empty())
            || matches!(&self.content, MessageContent::Parts(parts)
                if parts.iter().any(|p| matches!(p, ContentPart::FunctionCall { .. })))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeSource {
    pub name: String,
    pub source_type: String,
    pub location: String,
    pub description: Option<String>,
    #[serde(default)]
    pub access_config: HashMap<String, Value>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

/// Fully-qualified tool schema as seen by the resolver and registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniversalTool {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters_schema: Value,
    pub namespace: String,
    #[serde(default)]
    pub supports_streaming: bool,
    #[serde(default)]
    pub required_permissions: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl UniversalTool {
    /// Namespace derived from `tool_name.split('.')`: first segment if the
    /// name is dotted, else `"builtin"`.
    pub fn namespace_for(tool_name: &str) -> String {
        match tool_name.split_once('.') {
            Some((ns, _)) => ns.to_string(),
            None => "builtin".to_string(),
        }
    }

    pub fn local_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }
}

/// Caller-visible session/business identity and conversation history view.
/// Distinct from [`RuntimeContext`] per the directional-flow resolution in
/// SPEC_FULL.md §9.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: Option<String>,
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub conversation_history: Vec<UniversalMessage>,
    #[serde(default)]
    pub session_state: HashMap<String, Value>,
    pub created_at: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
}

impl SessionContext {
    pub fn effective_session_id(&self) -> Option<String> {
        self.session_id.clone().or_else(|| self.conversation_id.clone())
    }
}

/// Flows from the public API inward: the caller's execution-mode/timeout
/// intent, independent of how the adapter ultimately dispatches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub execution_id: String,
    pub framework_type: FrameworkType,
    #[serde(default = "default_exec_mode")]
    pub execution_mode: String,
    pub timeout: Option<u64>,
    #[serde(default)]
    pub available_tools: Vec<String>,
    #[serde(default)]
    pub available_knowledge: Vec<KnowledgeSource>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub trace_id: Option<String>,
}

fn default_exec_mode() -> String {
    "sync".to_string()
}

impl ExecutionContext {
    pub fn live_default(task_id: &str, framework_type: FrameworkType) -> Self {
        Self {
            execution_id: format!("live_{}", task_id),
            framework_type,
            execution_mode: "live".to_string(),
            timeout: None,
            available_tools: Vec::new(),
            available_knowledge: Vec::new(),
            metadata: HashMap::new(),
            trace_id: None,
        }
    }
}

/// Assembled by AdapterCore immediately before dispatch; private to the
/// adapter/agent boundary. Never constructed by anything upstream of
/// AdapterCore, and never cloned across manager ownership boundaries — see
/// SPEC_FULL.md §9 on deep object graphs.
#[derive(Debug, Clone)]
pub struct RuntimeContext {
    pub session_id: String,
    pub user_id: String,
    pub framework_type: FrameworkType,
    pub agent_id: Option<String>,
    pub agent_config: Option<super::configs::AgentConfig>,
    pub runner_id: Option<String>,
    pub runner_session_id: Option<String>,
    pub execution_id: Option<String>,
    pub trace_id: Option<String>,
    pub metadata: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl RuntimeContext {
    pub fn update_activity(&mut self) {
        self.last_activity = Utc::now();
    }
}
