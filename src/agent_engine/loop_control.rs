// Retry policy and step budget for one run.
use std::time::Duration;

use crate::config::AgentConfig;
use crate::errors::{ErrorClass, VisorError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    pub error_count: u32,
    pub max_errors: u32,
    pub step_count: u32,
    pub max_steps: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for the backoff, then run the step again.
    Retry(Duration),
    /// Give up; the run fails.
    Fail,
    /// Not worth counting; continue immediately.
    Ignore,
}

pub struct LoopController {
    retry: RetryState,
    parse_backoff: Duration,
    other_backoff: Duration,
}

impl LoopController {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            retry: RetryState {
                error_count: 0,
                max_errors: config.max_errors.max(1),
                step_count: 0,
                max_steps: config.max_steps,
            },
            parse_backoff: Duration::from_millis(config.parse_backoff_ms),
            other_backoff: Duration::from_millis(config.llm_backoff_ms),
        }
    }

    pub fn state(&self) -> RetryState {
        self.retry
    }

    pub fn reset(&mut self) {
        self.retry.error_count = 0;
        self.retry.step_count = 0;
    }

    /// A step finished without error.
    pub fn record_success(&mut self) {
        self.retry.step_count += 1;
        self.retry.error_count = 0;
    }

    pub fn record_failure(&mut self, error: &VisorError) -> RetryDecision {
        let backoff = match error.class() {
            ErrorClass::Fatal => return RetryDecision::Fail,
            ErrorClass::NonFatal => return RetryDecision::Ignore,
            ErrorClass::TransientParse => self.parse_backoff,
            ErrorClass::Transient => self.other_backoff,
        };
        self.retry.error_count += 1;
        if self.retry.error_count >= self.retry.max_errors {
            RetryDecision::Fail
        } else {
            RetryDecision::Retry(backoff)
        }
    }

    pub fn step_limit_reached(&self) -> bool {
        self.retry.step_count >= self.retry.max_steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(max_errors: u32, max_steps: u32) -> LoopController {
        LoopController::new(&AgentConfig {
            max_errors,
            max_steps,
            parse_backoff_ms: 5000,
            llm_backoff_ms: 2000,
            ..AgentConfig::default()
        })
    }

    #[test]
    fn transient_errors_fail_on_reaching_max() {
        let mut lc = controller(3, 200);
        let err = VisorError::LlmInvocation("rate limited".into());
        assert_eq!(lc.record_failure(&err), RetryDecision::Retry(Duration::from_millis(2000)));
        assert_eq!(lc.record_failure(&err), RetryDecision::Retry(Duration::from_millis(2000)));
        assert_eq!(lc.record_failure(&err), RetryDecision::Fail);
        assert_eq!(lc.state().error_count, 3);
    }

    #[test]
    fn parse_errors_back_off_longer() {
        let mut lc = controller(3, 200);
        let parse = lc.record_failure(&VisorError::ParseService("timeout".into()));
        let llm = lc.record_failure(&VisorError::MalformedResponse("empty".into()));
        match (parse, llm) {
            (RetryDecision::Retry(p), RetryDecision::Retry(l)) => assert!(p > l),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn success_resets_error_count() {
        let mut lc = controller(3, 200);
        lc.record_failure(&VisorError::ParseService("timeout".into()));
        lc.record_failure(&VisorError::ParseService("timeout".into()));
        lc.record_success();
        assert_eq!(lc.state().error_count, 0);
        assert_eq!(lc.state().step_count, 1);
        assert!(matches!(
            lc.record_failure(&VisorError::ParseService("timeout".into())),
            RetryDecision::Retry(_)
        ));
    }

    #[test]
    fn fatal_and_non_fatal() {
        let mut lc = controller(3, 200);
        assert_eq!(lc.record_failure(&VisorError::Capture("no display".into())), RetryDecision::Fail);
        assert_eq!(
            lc.record_failure(&VisorError::ActionExecution("no focus".into())),
            RetryDecision::Ignore
        );
        assert_eq!(lc.state().error_count, 0);
    }

    #[test]
    fn step_budget() {
        let mut lc = controller(3, 2);
        assert!(!lc.step_limit_reached());
        lc.record_success();
        lc.record_success();
        assert!(lc.step_limit_reached());
        lc.reset();
        assert!(!lc.step_limit_reached());
    }
}
