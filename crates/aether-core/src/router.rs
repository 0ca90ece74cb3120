//! TaskRouter: classifies task complexity and selects an adapter strategy.
//! Pure — no network or shared state — grounded on the pure-function shape
//! of `detect_multi_tool_requirement` in the teacher's execution engine.

use crate::contracts::{ExecutionMode, ExecutionStrategy, FrameworkType, TaskComplexity, TaskRequest};

pub struct TaskRouter {
    default_framework: FrameworkType,
}

impl TaskRouter {
    pub fn new(default_framework: FrameworkType) -> Self {
        Self { default_framework }
    }

    /// `len(messages) >= 11 OR len(available_tools) >= 6 -> complex`;
    /// else `>= 4 OR >= 3 -> moderate`; else `simple`.
    pub fn classify_complexity(&self, req: &TaskRequest) -> TaskComplexity {
        let message_count = req.messages.len();
        let tool_count = req.available_tools.len();

        if message_count >= 11 || tool_count >= 6 {
            TaskComplexity::Complex
        } else if message_count >= 4 || tool_count >= 3 {
            TaskComplexity::Moderate
        } else {
            TaskComplexity::Simple
        }
    }

    pub fn route(&self, req: &TaskRequest) -> ExecutionStrategy {
        let task_complexity = self.classify_complexity(req);
        let framework_type = req
            .agent_config
            .as_ref()
            .map(|c| c.framework_type)
            .or_else(|| req.execution_context.as_ref().map(|c| c.framework_type))
            .unwrap_or(self.default_framework);

        let execution_mode = req
            .execution_config
            .as_ref()
            .map(|c| c.execution_mode)
            .unwrap_or(ExecutionMode::Sync);

        ExecutionStrategy {
            framework_type,
            task_complexity,
            execution_config: req.execution_config.clone().unwrap_or_default(),
            runtime_options: Default::default(),
            execution_mode,
            framework_score: score_for(task_complexity),
            fallback_frameworks: Vec::new(),
        }
    }
}

fn score_for(complexity: TaskComplexity) -> f64 {
    match complexity {
        TaskComplexity::Simple => 1.0,
        TaskComplexity::Moderate => 0.85,
        TaskComplexity::Complex => 0.7,
        TaskComplexity::Advanced => 0.5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::UniversalMessage;

    fn base_request(message_count: usize, tool_count: usize) -> TaskRequest {
        TaskRequest {
            task_id: "t1".to_string(),
            task_type: "chat".to_string(),
            description: "test".to_string(),
            messages: (0..message_count).map(|i| UniversalMessage::user(format!("m{i}"))).collect(),
            available_tools: (0..tool_count).map(|i| format!("tool_{i}")).collect(),
            available_knowledge: vec![],
            attachments: vec![],
            user_context: None,
            session_context: None,
            execution_context: None,
            execution_config: None,
            agent_config: None,
            agent_id: None,
            session_id: None,
            metadata: Default::default(),
        }
    }

    #[test]
    fn simple_below_all_thresholds() {
        let router = TaskRouter::new(FrameworkType::Adk);
        assert_eq!(router.classify_complexity(&base_request(1, 1)), TaskComplexity::Simple);
    }

    #[test]
    fn moderate_by_message_count() {
        let router = TaskRouter::new(FrameworkType::Adk);
        assert_eq!(router.classify_complexity(&base_request(4, 0)), TaskComplexity::Moderate);
    }

    #[test]
    fn moderate_by_tool_count() {
        let router = TaskRouter::new(FrameworkType::Adk);
        assert_eq!(router.classify_complexity(&base_request(0, 3)), TaskComplexity::Moderate);
    }

    #[test]
    fn complex_by_message_count() {
        let router = TaskRouter::new(FrameworkType::Adk);
        assert_eq!(router.classify_complexity(&base_request(11, 0)), TaskComplexity::Complex);
    }

    #[test]
    fn complex_by_tool_count() {
        let router = TaskRouter::new(FrameworkType::Adk);
        assert_eq!(router.classify_complexity(&base_request(0, 6)), TaskComplexity::Complex);
    }

    #[test]
    fn complex_boundary_respects_moderate_just_below() {
        let router = TaskRouter::new(FrameworkType::Adk);
        assert_eq!(router.classify_complexity(&base_request(10, 5)), TaskComplexity::Moderate);
    }
}
