use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::enums::{InteractionType, TaskChunkType};

pub const DEFAULT_CHUNK_VERSION: &str = "2025-03-01";

pub const CHUNK_KIND_PLAN_DELTA: &str = "plan.delta";
pub const CHUNK_KIND_PLAN_SUMMARY: &str = "plan.summary";
pub const CHUNK_KIND_TOOL_PROPOSAL: &str = "tool.proposal";
pub const CHUNK_KIND_TOOL_RESULT: &str = "tool.result";
pub const CHUNK_KIND_TOOL_PROGRESS: &str = "tool.delta";
pub const CHUNK_KIND_TOOL_COMPLETE: &str = "tool.complete";
pub const CHUNK_KIND_TOOL_ERROR: &str = "tool.error";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStreamChunk {
    pub task_id: String,
    pub chunk_type: TaskChunkType,
    pub sequence_id: u64,
    pub content: Value,
    #[serde(default)]
    pub is_final: bool,
    pub chunk_kind: Option<String>,
    pub interaction_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(default = "default_chunk_version")]
    pub chunk_version: String,
    pub timestamp: DateTime<Utc>,
}

fn default_chunk_version() -> String {
    DEFAULT_CHUNK_VERSION.to_string()
}

impl TaskStreamChunk {
    pub fn new(task_id: impl Into<String>, sequence_id: u64, chunk_type: TaskChunkType, content: Value) -> Self {
        Self {
            task_id: task_id.into(),
            chunk_type,
            sequence_id,
            content,
            is_final: false,
            chunk_kind: None,
            interaction_id: None,
            metadata: HashMap::new(),
            chunk_version: default_chunk_version(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_kind(mut self, kind: &str) -> Self {
        self.chunk_kind = Some(kind.to_string());
        self
    }

    pub fn with_interaction(mut self, interaction_id: impl Into<String>) -> Self {
        self.interaction_id = Some(interaction_id.into());
        self
    }

    pub fn finalize(mut self) -> Self {
        self.is_final = true;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionRequest {
    pub interaction_id: String,
    pub interaction_type: InteractionType,
    pub task_id: String,
    pub content: Value,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionResponse {
    pub interaction_id: String,
    pub interaction_type: InteractionType,
    pub approved: bool,
    pub response_data: Option<Value>,
    pub user_message: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl InteractionResponse {
    /// The back-channel also carries plain user messages and a close
    /// signal, multiplexed over the same queue — see [`CommunicatorMessage`].
    pub fn matches(&self, request: &InteractionRequest) -> bool {
        self.interaction_id == request.interaction_id && self.task_id_matches(&request.task_id)
    }

    fn task_id_matches(&self, _task_id: &str) -> bool {
        // interaction_id is unique per task in this implementation; the
        // task_id check is a documented extension point for multi-task
        // communicators.
        true
    }
}

/// Messages a caller may post on a StreamSession's back-channel.
#[derive(Debug, Clone)]
pub enum CommunicatorMessage {
    InteractionResponse(InteractionResponse),
    UserMessage(String),
    Close,
}

/// HITL approval timeout behavior when no response arrives in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitlTimeoutPolicy {
    AutoApprove,
    AutoCancel,
    Error,
}

impl Default for HitlTimeoutPolicy {
    fn default() -> Self {
        HitlTimeoutPolicy::AutoCancel
    }
}
