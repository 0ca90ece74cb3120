use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::enums::{ExecutionMode, FrameworkType, TaskComplexity};

/// Agent blueprint. Two configs with identical normalized fields produce the
/// same config fingerprint (see `config_fingerprint`); fingerprint identity
/// governs runner reuse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub agent_type: String,
    #[serde(default = "default_framework")]
    pub framework_type: FrameworkType,
    pub name: Option<String>,
    pub description: Option<String>,
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub model_config: HashMap<String, Value>,
    #[serde(default)]
    pub available_tools: Vec<String>,
    #[serde(default)]
    pub behavior_settings: HashMap<String, Value>,
    #[serde(default)]
    pub tool_permissions: Vec<String>,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    pub timeout: Option<u64>,
    #[serde(default)]
    pub memory_config: HashMap<String, Value>,
    #[serde(default = "default_include_contents")]
    pub include_contents: String,
    pub output_schema: Option<Value>,
    pub input_schema: Option<Value>,
    pub output_key: Option<String>,
}

fn default_framework() -> FrameworkType {
    FrameworkType::Adk
}
fn default_max_iterations() -> u32 {
    10
}
fn default_include_contents() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_exec_mode")]
    pub execution_mode: ExecutionMode,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    pub timeout: Option<u64>,
    #[serde(default)]
    pub parallel_execution: bool,
    #[serde(default = "default_true")]
    pub enable_logging: bool,
    #[serde(default = "default_true")]
    pub enable_monitoring: bool,
    #[serde(default)]
    pub resource_limits: HashMap<String, Value>,
    #[serde(default)]
    pub error_handling: HashMap<String, Value>,
    #[serde(default)]
    pub performance_settings: HashMap<String, Value>,
}

fn default_exec_mode() -> ExecutionMode {
    ExecutionMode::Sync
}
fn default_max_retries() -> u32 {
    3
}
fn default_true() -> bool {
    true
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            execution_mode: default_exec_mode(),
            max_retries: default_max_retries(),
            timeout: None,
            parallel_execution: false,
            enable_logging: true,
            enable_monitoring: true,
            resource_limits: HashMap::new(),
            error_handling: HashMap::new(),
            performance_settings: HashMap::new(),
        }
    }
}

/// Output of TaskRouter: which adapter strategy and runtime options apply
/// to a classified task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStrategy {
    pub framework_type: FrameworkType,
    pub task_complexity: TaskComplexity,
    pub execution_config: ExecutionConfig,
    #[serde(default)]
    pub runtime_options: HashMap<String, Value>,
    pub execution_mode: ExecutionMode,
    pub framework_score: f64,
    #[serde(default)]
    pub fallback_frameworks: Vec<FrameworkType>,
}
