use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::contexts::UniversalMessage;
use super::enums::{TaskStatus, ToolStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskError {
    pub code: String,
    pub stage: String,
    #[serde(default)]
    pub details: Value,
}

impl TaskError {
    pub fn new(code: impl Into<String>, stage: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            stage: stage.into(),
            details: Value::Null,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

impl From<&crate::errors::AetherError> for TaskError {
    fn from(e: &crate::errors::AetherError) -> Self {
        TaskError {
            code: e.code.as_str().to_string(),
            stage: e.stage.clone(),
            details: e.details.clone(),
        }
    }
}

/// Duck-typed tool outputs are normalized to this tagged variant at the
/// boundary — never `Any`/untyped — per the Design Notes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResultData {
    Null,
    Text(String),
    Structured(Value),
    Parts(Vec<Value>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_name: String,
    pub status: ToolStatus,
    pub result_data: Option<ToolResultData>,
    pub error_message: Option<String>,
    pub execution_time: Option<f64>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl ToolResult {
    pub fn success(tool_name: impl Into<String>, data: ToolResultData) -> Self {
        Self {
            tool_name: tool_name.into(),
            status: ToolStatus::Success,
            result_data: Some(data),
            error_message: None,
            execution_time: None,
            metadata: HashMap::new(),
        }
    }

    pub fn error(tool_name: impl Into<String>, status: ToolStatus, message: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            status,
            result_data: None,
            error_message: Some(message.into()),
            execution_time: None,
            metadata: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub messages: Vec<UniversalMessage>,
    #[serde(default)]
    pub tool_results: Vec<ToolResult>,
    pub error: Option<TaskError>,
    pub error_message: Option<String>,
    pub execution_time: Option<f64>,
    pub session_id: Option<String>,
    pub agent_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl TaskResult {
    pub fn success(task_id: impl Into<String>, messages: Vec<UniversalMessage>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Success,
            messages,
            tool_results: Vec::new(),
            error: None,
            error_message: None,
            execution_time: None,
            session_id: None,
            agent_id: None,
            metadata: HashMap::new(),
        }
    }

    /// On error, `error` is populated and `metadata` always includes
    /// `request_mode` and `error_stage` (spec.md §3).
    pub fn from_error(
        task_id: impl Into<String>,
        error: &crate::errors::AetherError,
        request_mode: &str,
    ) -> Self {
        let task_id = task_id.into();
        let mut metadata = HashMap::new();
        metadata.insert("request_mode".to_string(), Value::String(request_mode.to_string()));
        metadata.insert("error_stage".to_string(), Value::String(error.stage.clone()));

        Self {
            task_id,
            status: TaskStatus::Error,
            messages: Vec::new(),
            tool_results: Vec::new(),
            error: Some(TaskError::from(error)),
            error_message: Some(error.message.clone()),
            execution_time: None,
            session_id: None,
            agent_id: None,
            metadata,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}
