use async_trait::async_trait;

use crate::errors::{VisorError, VisorResult};
use crate::llm::types::{CallConfig, ChatMessage, Completion, LlmResponse};

/// Unified LLM provider trait. All providers implement this trait.
/// New providers only need to implement this trait and register in config.toml.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Returns the provider's identifier (matches config.toml key).
    fn name(&self) -> &str;

    async fn chat(&self, messages: Vec<ChatMessage>, cfg: &CallConfig) -> VisorResult<LlmResponse>;
}

/// Runs one completion and folds any failure into `Completion { success: false }`.
pub async fn complete(
    provider: &dyn LlmProvider,
    messages: Vec<ChatMessage>,
    cfg: &CallConfig,
) -> Completion {
    match provider.chat(messages, cfg).await {
        Ok(resp) => Completion::ok(resp.content),
        Err(VisorError::LlmInvocation(msg)) => {
            tracing::warn!(provider = provider.name(), error = %msg, "completion failed");
            Completion::failed(msg)
        }
        Err(e) => {
            tracing::warn!(provider = provider.name(), error = %e, "completion failed");
            Completion::failed(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(VisorResult<&'static str>);

    #[async_trait]
    impl LlmProvider for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn chat(&self, _messages: Vec<ChatMessage>, _cfg: &CallConfig) -> VisorResult<LlmResponse> {
            match &self.0 {
                Ok(s) => Ok(LlmResponse {
                    content: s.to_string(),
                    reasoning: String::new(),
                }),
                Err(VisorError::LlmInvocation(m)) => Err(VisorError::LlmInvocation(m.clone())),
                Err(_) => Err(VisorError::Config("no key".into())),
            }
        }
    }

    fn cfg() -> CallConfig {
        CallConfig {
            model: "m".into(),
            stream: false,
            temperature: 0.1,
        }
    }

    #[tokio::test]
    async fn success_carries_content() {
        let c = complete(&Fixed(Ok("{}")), vec![], &cfg()).await;
        assert_eq!(c, Completion::ok("{}".into()));
    }

    #[tokio::test]
    async fn errors_never_escape() {
        let c = complete(&Fixed(Err(VisorError::LlmInvocation("rate limited".into()))), vec![], &cfg()).await;
        assert!(!c.success);
        assert_eq!(c.error.as_deref(), Some("rate limited"));

        let c = complete(&Fixed(Err(VisorError::Cancelled)), vec![], &cfg()).await;
        assert_eq!(c.error.as_deref(), Some("Configuration error: no key"));
    }
}
