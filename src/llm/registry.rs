use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{AppConfig, LlmConfig, RoleEntry};
use crate::errors::{VisorError, VisorResult};
use crate::llm::provider::LlmProvider;
use crate::llm::providers::openai_compatible::OpenAiCompatibleProvider;
use crate::llm::types::CallConfig;

const FALLBACK_TEMPERATURE: f64 = 0.1;

/// What an LLM call is for. Each role may pin its own provider and model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Step planning: screenshot + UI context in, action batch out.
    Agent,
    /// Crop pre-pass on the raw screenshot.
    Crop,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Agent => "agent",
            Role::Crop => "crop",
        }
    }

    fn entry(self, llm: &LlmConfig) -> Option<&RoleEntry> {
        match self {
            Role::Agent => llm.roles.agent.as_ref(),
            Role::Crop => llm.roles.crop.as_ref(),
        }
    }
}

/// Providers built from `[llm.providers.*]`, looked up by config id.
pub struct ProviderRegistry {
    by_id: HashMap<String, Arc<dyn LlmProvider>>,
    llm: LlmConfig,
}

impl ProviderRegistry {
    pub fn new(llm: LlmConfig) -> Self {
        Self {
            by_id: HashMap::new(),
            llm,
        }
    }

    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        self.by_id.insert(provider.name().to_string(), provider);
    }

    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.by_id.keys().cloned().collect();
        names.sort();
        names
    }

    fn provider(&self, id: &str) -> VisorResult<Arc<dyn LlmProvider>> {
        self.by_id
            .get(id)
            .cloned()
            .ok_or_else(|| VisorError::Config(format!("LLM provider '{id}' is not configured")))
    }

    fn default_temperature(&self, id: &str) -> f64 {
        self.llm
            .providers
            .get(id)
            .map_or(FALLBACK_TEMPERATURE, |p| p.temperature)
    }

    /// Provider and call settings for `role`.
    ///
    /// `[llm.roles.<role>]` wins when present; otherwise the active provider is
    /// used with its own model and temperature, without streaming.
    pub fn resolve(&self, role: Role) -> VisorResult<(Arc<dyn LlmProvider>, CallConfig)> {
        let resolved = match role.entry(&self.llm) {
            Some(entry) => (
                self.provider(&entry.provider)?,
                CallConfig {
                    model: entry.model.clone(),
                    stream: entry.stream,
                    temperature: entry
                        .temperature
                        .unwrap_or_else(|| self.default_temperature(&entry.provider)),
                },
            ),
            None => {
                let active = &self.llm.active_provider;
                let model = self
                    .llm
                    .providers
                    .get(active)
                    .map(|p| p.model.clone())
                    .unwrap_or_default();
                (
                    self.provider(active)?,
                    CallConfig {
                        model,
                        stream: false,
                        temperature: self.default_temperature(active),
                    },
                )
            }
        };
        tracing::debug!(
            role = role.as_str(),
            provider = resolved.0.name(),
            model = %resolved.1.model,
            stream = resolved.1.stream,
            "LLM role resolved"
        );
        Ok(resolved)
    }

    /// One OpenAI-compatible client per configured provider. The key comes from
    /// `VISOR_<ID>_API_KEY`, then the provider's `api_key` field.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut registry = Self::new(config.llm.clone());
        for (id, entry) in &config.llm.providers {
            let api_key = std::env::var(format!("VISOR_{}_API_KEY", id.to_uppercase()))
                .ok()
                .or_else(|| entry.api_key.clone())
                .unwrap_or_default();
            if api_key.is_empty() {
                tracing::warn!(provider = %id, "no API key configured");
            }
            registry.register(Arc::new(OpenAiCompatibleProvider::new(
                id.clone(),
                entry.api_base.clone(),
                api_key,
            )));
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AppConfig {
        toml::from_str(
            r#"
            [llm]
            active_provider = "openrouter"

            [llm.providers.openrouter]
            display_name = "OpenRouter"
            api_base = "https://openrouter.ai/api/v1/chat/completions"
            model = "google/gemini-3-flash-preview"
            temperature = 0.3

            [llm.providers.local]
            display_name = "Local"
            api_base = "http://127.0.0.1:8000/v1/chat/completions"
            model = "qwen2.5-vl"

            [llm.roles.crop]
            provider = "local"
            model = "qwen2.5-vl-3b"
            stream = true
            "#,
        )
        .unwrap()
    }

    #[test]
    fn role_entry_overrides_active_provider() {
        let reg = ProviderRegistry::from_config(&config());
        let (provider, cfg) = reg.resolve(Role::Crop).unwrap();
        assert_eq!(provider.name(), "local");
        assert_eq!(cfg.model, "qwen2.5-vl-3b");
        assert!(cfg.stream);
        assert_eq!(cfg.temperature, 0.1);
    }

    #[test]
    fn missing_role_falls_back_to_active() {
        let reg = ProviderRegistry::from_config(&config());
        let (provider, cfg) = reg.resolve(Role::Agent).unwrap();
        assert_eq!(provider.name(), "openrouter");
        assert_eq!(cfg.model, "google/gemini-3-flash-preview");
        assert_eq!(cfg.temperature, 0.3);
        assert!(!cfg.stream);
        assert_eq!(reg.list_names(), vec!["local".to_string(), "openrouter".to_string()]);
    }

    #[test]
    fn empty_registry_reports_config_error() {
        let reg = ProviderRegistry::new(LlmConfig {
            active_provider: "none".into(),
            ..LlmConfig::default()
        });
        assert!(matches!(reg.resolve(Role::Agent), Err(VisorError::Config(_))));
    }
}
