use std::env;
use std::sync::Arc;

use aether_core::agent_manager::{AgentManager, AgentManagerSettings};
use aether_core::contracts::{AgentConfig, FrameworkType, TaskRequest, UniversalMessage};
use aether_core::domain_agent::DomainAgent;
use aether_core::framework::adk_adapter::{AdkFrameworkAdapter, AdkRunnerFactory, AdkRuntimeSettings};
use aether_core::runner_manager::RunnerManager;
use aether_core::session_coordinator::{InMemorySessionRecoveryStore, SessionCoordinator};
use aether_core::tools::{ToolService, ToolServiceConfig};
use aether_core::{AIAssistant, AssistantSettings, ExecutionEngine, FrameworkRegistry, TaskRouter};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    match args[1].as_str() {
        "run" => {
            if args.len() < 3 {
                error!("Usage: aether-frame run <prompt>");
                return Ok(());
            }
            run_prompt(&args[2]).await?;
        }
        "health" => {
            show_health().await?;
        }
        "tools" => {
            show_tools().await?;
        }
        "help" | "--help" | "-h" => {
            print_help();
        }
        other => {
            error!("Unknown command: {}", other);
            print_help();
        }
    }

    Ok(())
}

fn print_help() {
    println!("aether-frame - command line interface for the Aether Frame orchestration layer");
    println!();
    println!("USAGE:");
    println!("    aether-frame <COMMAND> [OPTIONS]");
    println!();
    println!("COMMANDS:");
    println!("    run <prompt>     Create a one-off agent and run a single-turn conversation");
    println!("    health           Report registered-framework health");
    println!("    tools            List the tools available to a freshly initialized assistant");
    println!("    help             Show this help message");
    println!();
    println!("CONFIGURATION:");
    println!("    AETHER_ADK_BASE_URL   chat-completions endpoint (default: https://api.openai.com/v1)");
    println!("    AETHER_ADK_API_KEY    bearer token for the endpoint above");
    println!("    AETHER_ADK_MODEL      default model id (default: gpt-4o-mini)");
}

/// Wires every manager into one [`AIAssistant`], the same graph an
/// embedding application would construct once at startup.
async fn build_assistant() -> AIAssistant {
    let runner_factory = Arc::new(AdkRunnerFactory::new(AdkRuntimeSettings::from_env()));
    let runner_manager = Arc::new(RunnerManager::new(Default::default(), runner_factory));
    let agent_manager = Arc::new(AgentManager::new(AgentManagerSettings::default()));
    runner_manager.set_agent_cleanup_callback(agent_manager.cleanup_callback());

    let session_coordinator = Arc::new(SessionCoordinator::new(
        runner_manager.clone(),
        Arc::new(InMemorySessionRecoveryStore::new()),
        Default::default(),
    ));

    let tool_service = Arc::new(ToolService::new());
    let discovery_errors = tool_service
        .initialize(&ToolServiceConfig {
            enable_builtins: true,
            remote_servers: vec![],
        })
        .await;
    for err in discovery_errors {
        tracing::warn!(error = %err, "remote tool server discovery failed");
    }

    let domain_agent = Arc::new(DomainAgent::new(runner_manager.clone(), tool_service.clone(), Default::default()));
    let adapter = Arc::new(AdkFrameworkAdapter::new(
        agent_manager.clone(),
        runner_manager,
        session_coordinator.clone(),
        tool_service.clone(),
        domain_agent,
    ));

    let registry = Arc::new(FrameworkRegistry::new(Default::default()));
    registry.register_adapter(adapter).await;

    let engine = ExecutionEngine::new(TaskRouter::new(FrameworkType::Adk), registry);
    AIAssistant::new(engine, agent_manager, session_coordinator, tool_service, AssistantSettings::default())
}

fn default_agent_config() -> AgentConfig {
    AgentConfig {
        agent_type: "cli_agent".to_string(),
        framework_type: FrameworkType::Adk,
        name: Some("aether-frame cli".to_string()),
        description: None,
        system_prompt: Some("You are a concise, helpful assistant.".to_string()),
        model_config: Default::default(),
        available_tools: vec![],
        behavior_settings: Default::default(),
        tool_permissions: vec![],
        max_iterations: 10,
        timeout: None,
        memory_config: Default::default(),
        include_contents: "default".to_string(),
        output_schema: None,
        input_schema: None,
        output_key: None,
    }
}

async fn run_prompt(prompt: &str) -> Result<(), Box<dyn std::error::Error>> {
    let assistant = build_assistant().await;

    let creation = TaskRequest {
        task_id: uuid::Uuid::new_v4().to_string(),
        task_type: "agent_setup".to_string(),
        description: "declare the cli agent".to_string(),
        messages: vec![],
        available_tools: vec![],
        available_knowledge: vec![],
        attachments: vec![],
        user_context: None,
        session_context: None,
        execution_context: None,
        execution_config: None,
        agent_config: Some(default_agent_config()),
        agent_id: None,
        session_id: None,
        metadata: Default::default(),
    };
    let created = assistant.process_task(creation).await;
    let creation_error = created.error.clone();
    let agent_id = match created.agent_id {
        Some(id) => id,
        None => {
            error!(error = ?creation_error, "agent creation failed");
            return Ok(());
        }
    };

    let continuation = TaskRequest {
        task_id: uuid::Uuid::new_v4().to_string(),
        task_type: "chat".to_string(),
        description: "cli single-turn prompt".to_string(),
        messages: vec![UniversalMessage::user(prompt)],
        available_tools: vec![],
        available_knowledge: vec![],
        attachments: vec![],
        user_context: None,
        session_context: None,
        execution_context: None,
        execution_config: None,
        agent_config: None,
        agent_id: Some(agent_id),
        session_id: None,
        metadata: Default::default(),
    };

    let result = assistant.process_task(continuation).await;
    match result.error {
        Some(err) => error!(code = %err.code, stage = %err.stage, "task failed"),
        None => {
            for message in &result.messages {
                println!("{}", message.as_text());
            }
        }
    }

    assistant.shutdown().await;
    Ok(())
}

async fn show_health() -> Result<(), Box<dyn std::error::Error>> {
    let assistant = build_assistant().await;
    let health = assistant.health_check().await;
    println!("{}", serde_json::to_string_pretty(&health)?);
    Ok(())
}

async fn show_tools() -> Result<(), Box<dyn std::error::Error>> {
    let assistant = build_assistant().await;
    for tool in assistant.list_tools().await {
        info!(name = %tool.name, description = %tool.description, "registered tool");
        println!("{} - {}", tool.name, tool.description);
    }
    Ok(())
}
