use thiserror::Error;

#[derive(Debug, Error)]
pub enum VisorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Screenshot capture failed: {0}")]
    Capture(String),

    #[error("UI parse service error: {0}")]
    ParseService(String),

    #[error("Malformed LLM response: {0}")]
    MalformedResponse(String),

    #[error("LLM invocation failed: {0}")]
    LlmInvocation(String),

    #[error("SSE parsing error: {0}")]
    SseParsing(String),

    #[error("Action execution failed: {0}")]
    ActionExecution(String),

    #[error("Crop heuristic failed: {0}")]
    CropHeuristic(String),

    #[error("A task is already running")]
    AlreadyRunning,

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Task cancelled")]
    Cancelled,
}

/// How the orchestrator reacts to an error surfacing from a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Ends the run immediately.
    Fatal,
    /// Retried with the long (parse-service) backoff.
    TransientParse,
    /// Retried with the short backoff.
    Transient,
    /// Logged and ignored; never counts against the retry budget.
    NonFatal,
}

impl VisorError {
    pub fn class(&self) -> ErrorClass {
        match self {
            VisorError::Capture(_)
            | VisorError::Config(_)
            | VisorError::AlreadyRunning
            | VisorError::Agent(_) => ErrorClass::Fatal,
            VisorError::ParseService(_) => ErrorClass::TransientParse,
            VisorError::ActionExecution(_) | VisorError::CropHeuristic(_) => ErrorClass::NonFatal,
            VisorError::MalformedResponse(_)
            | VisorError::LlmInvocation(_)
            | VisorError::SseParsing(_)
            | VisorError::Http(_)
            | VisorError::Json(_)
            | VisorError::Io(_)
            | VisorError::TomlDe(_)
            | VisorError::TomlSer(_)
            | VisorError::Cancelled => ErrorClass::Transient,
        }
    }
}

impl serde::Serialize for VisorError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

pub type VisorResult<T> = Result<T, VisorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_errors_are_fatal() {
        assert_eq!(VisorError::Capture("no monitor".into()).class(), ErrorClass::Fatal);
    }

    #[test]
    fn parse_errors_use_the_long_backoff() {
        assert_eq!(
            VisorError::ParseService("502".into()).class(),
            ErrorClass::TransientParse
        );
        assert_eq!(
            VisorError::LlmInvocation("rate limited".into()).class(),
            ErrorClass::Transient
        );
        assert_eq!(
            VisorError::MalformedResponse("empty".into()).class(),
            ErrorClass::Transient
        );
    }

    #[test]
    fn serializes_as_message() {
        let json = serde_json::to_string(&VisorError::LlmInvocation("rate limited".into())).unwrap();
        assert_eq!(json, "\"LLM invocation failed: rate limited\"");
    }
}
