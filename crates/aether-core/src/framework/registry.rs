//! FrameworkRegistry: owns adapter instances keyed by framework id with
//! lazy init, health, and shutdown. Grounded on the provider-pluggability
//! shape of the teacher's `LLMHandler`/`LLMProvider` (a `HashMap` of boxed
//! trait objects, resolved by key, wrapped with retry/timeout at the call
//! site) — but deliberately NOT grounded on `framework_registry.py`'s
//! dynamic-import auto-loading, which SPEC_FULL.md §9 flags for removal:
//! adapters here must be registered explicitly via [`FrameworkRegistry::register_adapter`],
//! never discovered by module path.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::contracts::{
    CommunicatorMessage, ExecutionContext, ExecutionStrategy, FrameworkType, TaskRequest, TaskResult, TaskStreamChunk,
};
use crate::errors::{AetherError, AetherResult};

pub type ChunkStream = std::pin::Pin<Box<dyn futures::Stream<Item = TaskStreamChunk> + Send>>;
pub type CommunicatorSender = tokio::sync::mpsc::Sender<CommunicatorMessage>;

/// Settings passed to every adapter's `initialize`. Framework-specific
/// options live in `options`.
#[derive(Debug, Clone, Default)]
pub struct AdapterSettings {
    pub options: HashMap<String, serde_json::Value>,
}

/// The contract AdapterCore (embedded inside each adapter implementation)
/// exposes to ExecutionEngine, per spec.md §4.5.
#[async_trait]
pub trait FrameworkAdapter: Send + Sync {
    fn framework_type(&self) -> FrameworkType;

    async fn initialize(&self, settings: &AdapterSettings) -> AetherResult<()>;

    async fn execute_task(&self, req: &TaskRequest, strategy: &ExecutionStrategy) -> AetherResult<TaskResult>;

    async fn execute_task_live(
        &self,
        req: &TaskRequest,
        ctx: &ExecutionContext,
    ) -> AetherResult<(ChunkStream, CommunicatorSender)>;

    fn supports_live_execution(&self) -> bool;

    async fn is_available(&self) -> bool;

    async fn shutdown(&self) -> AetherResult<()>;
}

struct AdapterEntry {
    adapter: Arc<dyn FrameworkAdapter>,
    initialized: bool,
}

pub struct FrameworkRegistry {
    adapters: RwLock<HashMap<FrameworkType, AdapterEntry>>,
    settings: AdapterSettings,
}

impl FrameworkRegistry {
    pub fn new(settings: AdapterSettings) -> Self {
        Self {
            adapters: RwLock::new(HashMap::new()),
            settings,
        }
    }

    pub async fn register_adapter(&self, adapter: Arc<dyn FrameworkAdapter>) {
        let mut adapters = self.adapters.write().await;
        let framework_type = adapter.framework_type();
        adapters.insert(framework_type, AdapterEntry { adapter, initialized: false });
    }

    /// Looks up a registered adapter, lazily initializing it on first
    /// access (idempotent). Returns `framework.unavailable` if nothing was
    /// ever registered for this framework type — never auto-loads one.
    pub async fn get_adapter(&self, framework_type: FrameworkType) -> AetherResult<Arc<dyn FrameworkAdapter>> {
        {
            let adapters = self.adapters.read().await;
            if let Some(entry) = adapters.get(&framework_type) {
                if entry.initialized {
                    return Ok(entry.adapter.clone());
                }
            } else {
                return Err(AetherError::framework_unavailable(
                    "framework_registry.get_adapter",
                    format!("no adapter registered for {:?}", framework_type),
                ));
            }
        }

        let mut adapters = self.adapters.write().await;
        let entry = adapters
            .get_mut(&framework_type)
            .expect("presence checked above under the same lock discipline");
        if !entry.initialized {
            entry.adapter.initialize(&self.settings).await?;
            entry.initialized = true;
        }
        Ok(entry.adapter.clone())
    }

    pub async fn get_available_frameworks(&self) -> Vec<FrameworkType> {
        let adapters = self.adapters.read().await;
        let mut available = Vec::new();
        for (framework_type, entry) in adapters.iter() {
            if entry.adapter.is_available().await {
                available.push(*framework_type);
            }
        }
        available
    }

    pub async fn initialize_all(&self) -> AetherResult<()> {
        let mut adapters = self.adapters.write().await;
        for entry in adapters.values_mut() {
            if !entry.initialized {
                entry.adapter.initialize(&self.settings).await?;
                entry.initialized = true;
            }
        }
        Ok(())
    }

    pub async fn shutdown_all(&self) {
        let adapters = self.adapters.read().await;
        for entry in adapters.values() {
            if let Err(err) = entry.adapter.shutdown().await {
                tracing::warn!(error = %err, "adapter shutdown failed");
            }
        }
    }

    /// ANDs individual adapter health: degraded if at least one fails while
    /// another succeeds, unhealthy if all fail, healthy otherwise.
    pub async fn health_check_all(&self) -> &'static str {
        let adapters = self.adapters.read().await;
        if adapters.is_empty() {
            return "unhealthy";
        }
        let mut healthy = 0usize;
        let total = adapters.len();
        for entry in adapters.values() {
            if entry.adapter.is_available().await {
                healthy += 1;
            }
        }
        if healthy == total {
            "healthy"
        } else if healthy == 0 {
            "unhealthy"
        } else {
            "degraded"
        }
    }
}
