pub mod agent_engine;
pub mod commands;
pub mod config;
pub mod diagnostics;
pub mod errors;
pub mod executor;
pub mod llm;
pub mod perception;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::agent_engine::context::ContextManager;
use crate::agent_engine::{AgentEngine, Collaborators};
use crate::commands::AgentHandle;
use crate::config::AppConfig;
use crate::diagnostics::JobLog;
use crate::errors::VisorResult;
use crate::executor::input::EnigoInput;
use crate::llm::registry::{ProviderRegistry, Role};
use crate::perception::crop::CropSelector;
use crate::perception::parser::OmniParserClient;
use crate::perception::screenshot::XcapCapture;

/// Installs the global `tracing` subscriber. `RUST_LOG` overrides the default `info`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

/// Production collaborators: xcap capture, OmniParser over HTTP, configured LLM roles, enigo input.
pub fn build_collaborators(config: &AppConfig) -> VisorResult<Collaborators> {
    let registry = ProviderRegistry::from_config(config);
    tracing::info!(providers = ?registry.list_names(), active = %config.llm.active_provider, "LLM registry built");
    let (llm, llm_cfg) = registry.resolve(Role::Agent)?;

    let crop = if config.agent.crop_enabled {
        match registry.resolve(Role::Crop) {
            Ok((provider, cfg)) => Some(CropSelector::new(provider, cfg)),
            Err(e) => {
                tracing::warn!(error = %e, "crop role unavailable, crop pre-pass disabled");
                None
            }
        }
    } else {
        None
    };

    let data_dir = config::data_dir();
    Ok(Collaborators {
        capture: Arc::new(XcapCapture::new(data_dir.join("screenshots"))?),
        parser: Arc::new(OmniParserClient::new(
            config.parser.endpoint.clone(),
            Duration::from_secs(config.parser.timeout_secs),
        )?),
        llm,
        llm_cfg,
        crop,
        input: Arc::new(EnigoInput::new()),
        diagnostics: Some(Arc::new(JobLog::open(data_dir.join("applied_jobs.jsonl")))),
    })
}

/// Builds an engine from `config` and runs its service loop on a background task.
pub fn spawn(config: AppConfig) -> VisorResult<(AgentHandle, JoinHandle<()>)> {
    let collab = build_collaborators(&config)?;
    let system_prompt = ContextManager::load_system_prompt(config.prompts.system_prompt_file.as_deref());
    let mut engine = AgentEngine::new(config.agent, config.executor, system_prompt, collab);
    let (handle, rx) = AgentHandle::attach(&engine);

    tracing::info!("spawning agent engine");
    let task = tokio::spawn(async move {
        engine.run_loop(rx).await;
    });
    Ok((handle, task))
}
