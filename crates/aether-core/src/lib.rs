//! Orchestration core: runner/agent/session management, the tool
//! subsystem, and the live streaming contract described in spec.md §4.
//! Framework-specific adaptation lives under [`framework`]; everything
//! else here is framework-neutral and is exercised by the `adk` adapter
//! the same way a second adapter (autogen, langgraph, ...) would.

pub mod agent_manager;
pub mod config_fingerprint;
pub mod contracts;
pub mod domain_agent;
pub mod errors;
pub mod execution_engine;
pub mod facade;
pub mod framework;
pub mod router;
pub mod runner_manager;
pub mod session_coordinator;
pub mod stream_session;
pub mod tools;

pub use agent_manager::AgentManager;
pub use domain_agent::{DomainAgent, DomainAgentSettings};
pub use errors::{AetherError, AetherResult, ErrorCategory, ErrorCode, ErrorSeverity};
pub use execution_engine::ExecutionEngine;
pub use facade::{AIAssistant, AssistantSettings};
pub use framework::{AdapterSettings, FrameworkAdapter, FrameworkRegistry};
pub use router::TaskRouter;
pub use runner_manager::{RunnerFactory, RunnerManager, RunnerManagerSettings};
pub use session_coordinator::{
    InMemorySessionRecoveryStore, SessionCoordinator, SessionCoordinatorSettings, SessionRecoveryStore,
};
pub use stream_session::StreamSession;
pub use tools::{RemoteToolClient, RemoteToolServerConfig, Tool, ToolResolver, ToolService, ToolServiceConfig};

/// Crate version, surfaced by [`facade::AIAssistant::health_check`] when a
/// caller doesn't override it via [`facade::AssistantSettings`].
pub const AETHER_VERSION: &str = env!("CARGO_PKG_VERSION");
