//! Top-level dispatch: classify a request's execution strategy, resolve
//! the target framework adapter, and run it — sync or live. Grounded on
//! `test_execution_engine_unit.py`'s `execute`/`execute_live` contract
//! (route then dispatch, wrap adapter failures into an error `TaskResult`
//! rather than propagating, fall back to the default framework when a
//! request names none).

use std::sync::Arc;

use crate::contracts::{CommunicatorMessage, TaskRequest, TaskResult, TaskStreamChunk};
use crate::errors::{AetherError, AetherResult};
use crate::framework::registry::FrameworkRegistry;
use crate::router::TaskRouter;

pub type ChunkStream = std::pin::Pin<Box<dyn futures::Stream<Item = TaskStreamChunk> + Send>>;
pub type CommunicatorSender = tokio::sync::mpsc::Sender<CommunicatorMessage>;

pub struct ExecutionEngine {
    router: TaskRouter,
    registry: Arc<FrameworkRegistry>,
}

impl ExecutionEngine {
    pub fn new(router: TaskRouter, registry: Arc<FrameworkRegistry>) -> Self {
        Self { router, registry }
    }

    /// Routes `req` to a strategy, resolves the chosen framework's adapter,
    /// and runs it synchronously. Adapter/routing failures become an error
    /// [`TaskResult`] rather than propagating, so a single bad request
    /// never surfaces as a transport-level error.
    pub async fn execute(&self, req: &TaskRequest) -> TaskResult {
        if !req.has_context() {
            let err = AetherError::request_context_missing(
                "execution_engine.validate_context",
                "request must carry agent_config, agent_id, or session_id",
            );
            return TaskResult::from_error(req.task_id.clone(), &err, req.classify().as_str());
        }

        let strategy = self.router.route(req);

        let adapter = match self.registry.get_adapter(strategy.framework_type).await {
            Ok(a) => a,
            Err(err) => return TaskResult::from_error(req.task_id.clone(), &err, req.classify().as_str()),
        };

        match adapter.execute_task(req, &strategy).await {
            Ok(result) => result,
            Err(err) => TaskResult::from_error(req.task_id.clone(), &err, req.classify().as_str()),
        }
    }

    /// Same routing as [`Self::execute`] but for the live chunk-streamed
    /// path. Unlike `execute`, failures here propagate as `Err` — there's
    /// no stream yet to carry an error chunk on.
    pub async fn execute_live(&self, req: &TaskRequest) -> AetherResult<(ChunkStream, CommunicatorSender)> {
        if !req.has_context() {
            return Err(AetherError::request_context_missing(
                "execution_engine.validate_context",
                "request must carry agent_config, agent_id, or session_id",
            ));
        }

        let strategy = self.router.route(req);
        let adapter = self.registry.get_adapter(strategy.framework_type).await?;

        if !adapter.supports_live_execution() {
            return Err(crate::errors::AetherError::framework_unavailable(
                "execution_engine.execute_live",
                format!("{:?} adapter does not support live execution", strategy.framework_type),
            ));
        }

        let exec_ctx = req
            .execution_context
            .clone()
            .unwrap_or_else(|| crate::contracts::ExecutionContext::live_default(&req.task_id, strategy.framework_type));

        adapter.execute_task_live(req, &exec_ctx).await
    }

    pub async fn health_check(&self) -> &'static str {
        self.registry.health_check_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{ExecutionContext, ExecutionStrategy, FrameworkType, TaskStatus};
    use crate::framework::registry::{AdapterSettings, FrameworkAdapter};
    use async_trait::async_trait;
    use futures::stream;
    use std::collections::HashMap;

    struct StubAdapter {
        framework_type: FrameworkType,
        available: bool,
    }

    #[async_trait]
    impl FrameworkAdapter for StubAdapter {
        fn framework_type(&self) -> FrameworkType {
            self.framework_type
        }

        async fn initialize(&self, _settings: &AdapterSettings) -> AetherResult<()> {
            Ok(())
        }

        async fn execute_task(&self, req: &TaskRequest, _strategy: &ExecutionStrategy) -> AetherResult<TaskResult> {
            Ok(TaskResult::success(req.task_id.clone(), vec![]))
        }

        async fn execute_task_live(&self, req: &TaskRequest, _ctx: &ExecutionContext) -> AetherResult<(ChunkStream, CommunicatorSender)> {
            let (tx, _rx) = tokio::sync::mpsc::channel(4);
            let chunk = TaskStreamChunk::new(&req.task_id, 0, crate::contracts::TaskChunkType::Complete, serde_json::json!({})).finalize();
            let stream: ChunkStream = Box::pin(stream::iter(vec![chunk]));
            Ok((stream, tx))
        }

        fn supports_live_execution(&self) -> bool {
            true
        }

        async fn is_available(&self) -> bool {
            self.available
        }

        async fn shutdown(&self) -> AetherResult<()> {
            Ok(())
        }
    }

    fn request(task_id: &str) -> TaskRequest {
        TaskRequest {
            task_id: task_id.to_string(),
            task_type: "chat".to_string(),
            description: "hi".to_string(),
            messages: vec![],
            available_tools: vec![],
            available_knowledge: vec![],
            attachments: vec![],
            user_context: None,
            session_context: None,
            execution_context: None,
            execution_config: None,
            agent_config: None,
            agent_id: Some("agent-a".to_string()),
            session_id: None,
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn unregistered_framework_becomes_error_result() {
        let registry = Arc::new(FrameworkRegistry::new(AdapterSettings::default()));
        let engine = ExecutionEngine::new(TaskRouter::new(FrameworkType::Adk), registry);
        let result = engine.execute(&request("t1")).await;
        assert_eq!(result.status, TaskStatus::Error);
        assert_eq!(result.error.as_ref().unwrap().code, "framework.unavailable");
    }

    #[tokio::test]
    async fn registered_adapter_executes_successfully() {
        let registry = Arc::new(FrameworkRegistry::new(AdapterSettings::default()));
        registry
            .register_adapter(Arc::new(StubAdapter { framework_type: FrameworkType::Adk, available: true }))
            .await;
        let engine = ExecutionEngine::new(TaskRouter::new(FrameworkType::Adk), registry);
        let result = engine.execute(&request("t2")).await;
        assert_eq!(result.status, TaskStatus::Success);
    }

    #[tokio::test]
    async fn request_with_no_context_is_rejected_before_routing() {
        let registry = Arc::new(FrameworkRegistry::new(AdapterSettings::default()));
        let engine = ExecutionEngine::new(TaskRouter::new(FrameworkType::Adk), registry);
        let mut req = request("t3");
        req.agent_id = None;
        let result = engine.execute(&req).await;
        assert_eq!(result.status, TaskStatus::Error);
        assert_eq!(result.error.as_ref().unwrap().code, "request.context_missing");
    }
}
