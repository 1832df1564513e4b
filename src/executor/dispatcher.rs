//! Executes one action batch in order against the native input backend.
use std::sync::Arc;
use std::time::Duration;

use crate::agent_engine::event_bus::CancelFlag;
use crate::agent_engine::response::Action;
use crate::config::ExecutorConfig;
use crate::executor::input::{MouseButton, NativeInput};
use crate::perception::geometry::center_pixels;
use crate::perception::types::{ScreenshotMeta, UIElement};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Every action ran.
    Completed,
    /// A `done` action was reached; later actions were skipped.
    Done,
    /// Cancellation was observed between actions.
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub outcome: BatchOutcome,
    /// Descriptions of the actions that were attempted, in order.
    pub executed: Vec<String>,
}

pub struct ActionDispatcher {
    input: Arc<dyn NativeInput>,
    delays: ExecutorConfig,
}

impl ActionDispatcher {
    pub fn new(input: Arc<dyn NativeInput>, delays: ExecutorConfig) -> Self {
        Self { input, delays }
    }

    pub async fn execute(
        &self,
        actions: &[Action],
        elements: &[UIElement],
        meta: &ScreenshotMeta,
        cancel: &CancelFlag,
    ) -> BatchReport {
        let mut executed = Vec::with_capacity(actions.len());

        for (i, action) in actions.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!(executed = i, remaining = actions.len() - i, "batch stopped by user");
                return BatchReport {
                    outcome: BatchOutcome::Stopped,
                    executed,
                };
            }

            if matches!(action, Action::Done) {
                tracing::info!(skipped = actions.len() - i - 1, "done reached");
                return BatchReport {
                    outcome: BatchOutcome::Done,
                    executed,
                };
            }

            let note = self.run_one(action, elements, meta).await;
            executed.push(match note {
                Some(note) => format!("{} ({note})", action.describe()),
                None => action.describe(),
            });
        }

        BatchReport {
            outcome: BatchOutcome::Completed,
            executed,
        }
    }

    /// Runs one action plus its settle delay. Returns a note when the action
    /// was skipped or failed; failures never stop the batch.
    async fn run_one(&self, action: &Action, elements: &[UIElement], meta: &ScreenshotMeta) -> Option<String> {
        let d = &self.delays;
        let (result, settle_ms) = match action {
            Action::Click { target_id } | Action::DoubleClick { target_id } => {
                let Some(el) = elements.iter().find(|e| e.index == *target_id) else {
                    tracing::warn!(target_id, available = elements.len(), "click target not in current element list");
                    return Some("skipped: unknown target".into());
                };
                let (x, y) = center_pixels(el.bbox, meta.physical_width, meta.physical_height);
                tracing::info!(target_id, x, y, content = %el.content, "click: element → physical pixel");

                let mut result = self.input.click(x, y, MouseButton::Left).await;
                if result.is_ok() && matches!(action, Action::DoubleClick { .. }) {
                    sleep_ms(d.double_click_gap_ms).await;
                    result = self.input.click(x, y, MouseButton::Left).await;
                }
                (result, d.click_settle_ms)
            }
            Action::Scroll { direction, amount } => {
                (self.input.scroll(*direction, *amount).await, d.scroll_settle_ms)
            }
            Action::Type { text } => (self.input.type_text(text).await, d.type_settle_ms),
            Action::Key { key, modifiers } => (self.input.key_press(key, modifiers).await, d.key_settle_ms),
            Action::Wait { ms } => {
                tracing::info!(ms, "waiting");
                sleep_ms(*ms).await;
                (Ok(()), 0)
            }
            Action::Done => return None,
        };

        let note = match result {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!(action = %action.describe(), error = %e, "action failed, continuing batch");
                Some(format!("failed: {e}"))
            }
        };
        sleep_ms(settle_ms).await;
        note
    }
}

async fn sleep_ms(ms: u64) {
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}
