use serde::{Deserialize, Serialize};

use crate::agent_engine::response::{truncate, AgentResponse};
use crate::llm::types::ChatMessage;

pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You operate a desktop computer on behalf of the user.
Each turn you receive a screenshot and a numbered list of UI elements.
Reply with a single JSON object:
{"output": [
  {"type": "reasoning", "summary": "<short thought>"},
  {"type": "message", "reply": "<what you are doing>"},
  {"type": "action_batch", "actions": [ ... ]}
]}
Actions: {"type":"click","target_id":N}, {"type":"double_click","target_id":N},
{"type":"scroll","direction":"up|down|left|right","amount":N},
{"type":"type","text":"..."}, {"type":"key","key":"enter","modifiers":["ctrl"]},
{"type":"wait","ms":N}, {"type":"done"}.
Only reference element ids from the current list. Emit {"type":"done"} once the goal is achieved.
When you submit an application, add a line "[APPLIED] <company> | <position>" to your reply."#;

pub const CONTINUE_PROMPT: &str =
    "Here is the current screen. Continue working toward the goal, or reply with done if it is complete.";

const SUMMARY_REPLY_CHARS: usize = 120;
const PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub role: Role,
    pub content: String,
}

impl ConversationEntry {
    fn to_message(&self) -> ChatMessage {
        match self.role {
            Role::System => ChatMessage::system(self.content.clone()),
            Role::User => ChatMessage::user(self.content.clone()),
            Role::Assistant => ChatMessage::assistant(self.content.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressLogEntry {
    pub step_index: u32,
    pub summary: String,
}

/// Owns everything that goes into a prompt apart from the current screen.
///
/// The conversation is append-only for the whole run; only the trailing
/// `window` entries are replayed to the model. Older steps survive only as
/// one-line progress summaries.
pub struct ContextManager {
    system_prompt: String,
    goal: Option<String>,
    ui_context: String,
    conversation: Vec<ConversationEntry>,
    progress: Vec<ProgressLogEntry>,
    window: usize,
}

impl ContextManager {
    pub fn new(system_prompt: impl Into<String>, window: usize) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            goal: None,
            ui_context: String::new(),
            conversation: Vec::new(),
            progress: Vec::new(),
            window,
        }
    }

    /// Reads the system prompt from `path`, or the built-in one when unset or unreadable.
    pub fn load_system_prompt(path: Option<&str>) -> String {
        let Some(path) = path else {
            return DEFAULT_SYSTEM_PROMPT.to_string();
        };
        match std::fs::read_to_string(path) {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                tracing::warn!(path, "system prompt file is empty, using built-in prompt");
                DEFAULT_SYSTEM_PROMPT.to_string()
            }
            Err(e) => {
                tracing::warn!(path, error = %e, "cannot read system prompt, using built-in prompt");
                DEFAULT_SYSTEM_PROMPT.to_string()
            }
        }
    }

    pub fn begin_task(&mut self, goal: &str) {
        self.reset();
        self.goal = Some(goal.to_string());
    }

    pub fn reset(&mut self) {
        self.goal = None;
        self.ui_context.clear();
        self.conversation.clear();
        self.progress.clear();
    }

    pub fn goal(&self) -> Option<&str> {
        self.goal.as_deref()
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn set_ui_context(&mut self, block: String) {
        self.ui_context = block;
    }

    pub fn progress(&self) -> &[ProgressLogEntry] {
        &self.progress
    }

    pub fn conversation(&self) -> &[ConversationEntry] {
        &self.conversation
    }

    pub fn next_user_message(&self, step: u32) -> String {
        match (&self.goal, step) {
            (Some(goal), 0) => goal.clone(),
            _ => CONTINUE_PROMPT.to_string(),
        }
    }

    /// Trailing slice of the conversation replayed to the model.
    pub fn window(&self) -> &[ConversationEntry] {
        let start = self.conversation.len().saturating_sub(self.window);
        &self.conversation[start..]
    }

    fn goal_block(&self) -> String {
        let mut block = format!("Goal: {}", self.goal.as_deref().unwrap_or("(none)"));
        if self.progress.is_empty() {
            block.push_str("\nProgress: nothing done yet.");
        } else {
            block.push_str("\nProgress so far:");
            for entry in &self.progress {
                block.push_str(&format!("\n{}. {}", entry.step_index + 1, entry.summary));
            }
        }
        block
    }

    pub fn build_messages(
        &self,
        diagnostics: Option<&str>,
        user_text: &str,
        images: &[String],
    ) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.window.min(self.conversation.len()) + 5);
        messages.push(ChatMessage::system(self.system_prompt.clone()));
        if let Some(diag) = diagnostics.filter(|d| !d.trim().is_empty()) {
            messages.push(ChatMessage::system(format!("System diagnostics:\n{diag}")));
        }
        messages.push(ChatMessage::system(format!(
            "Current UI elements:\n{}",
            self.ui_context
        )));
        messages.push(ChatMessage::system(self.goal_block()));
        messages.extend(self.window().iter().map(ConversationEntry::to_message));
        if images.is_empty() {
            messages.push(ChatMessage::user(user_text.to_string()));
        } else {
            messages.push(ChatMessage::user_with_images(user_text, images));
        }
        messages
    }

    /// Appends the resolved step. Called once per step, after it completes.
    pub fn record_step(&mut self, step: u32, user_text: &str, assistant_raw: &str, response: &AgentResponse) {
        self.conversation.push(ConversationEntry {
            role: Role::User,
            content: user_text.to_string(),
        });
        self.conversation.push(ConversationEntry {
            role: Role::Assistant,
            content: assistant_raw.to_string(),
        });
        let summary = summarize_step(response);
        tracing::debug!(step, %summary, "progress");
        self.progress.push(ProgressLogEntry {
            step_index: step,
            summary,
        });
    }

    pub fn history_summary(&self) -> Vec<String> {
        self.conversation
            .iter()
            .map(|e| {
                let role = match e.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                format!("{role}: {}", truncate(&e.content, PREVIEW_CHARS))
            })
            .collect()
    }
}

/// `<action-description>[ — <reply-text>]`
pub fn summarize_step(response: &AgentResponse) -> String {
    let actions = if response.actions.is_empty() {
        "no action".to_string()
    } else {
        response
            .actions
            .iter()
            .map(|a| a.describe())
            .collect::<Vec<_>>()
            .join(", ")
    };
    match response.reply.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
        Some(reply) => format!("{actions} — {}", truncate(reply, SUMMARY_REPLY_CHARS)),
        None => actions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_engine::response::Action;
    use crate::llm::types::MessageContent;
    use pretty_assertions::assert_eq;

    fn response(actions: Vec<Action>, reply: Option<&str>) -> AgentResponse {
        AgentResponse {
            reply: reply.map(String::from),
            reasoning: vec![],
            actions,
        }
    }

    #[test]
    fn summary_lines() {
        assert_eq!(
            summarize_step(&response(vec![Action::Click { target_id: 3 }], Some("Opening search"))),
            "click #3 — Opening search"
        );
        assert_eq!(summarize_step(&response(vec![], None)), "no action");
        assert_eq!(
            summarize_step(&response(vec![Action::Wait { ms: 250 }, Action::Done], Some("  "))),
            "wait 250ms, done"
        );
    }

    #[test]
    fn first_message_is_goal_then_continue() {
        let mut ctx = ContextManager::new("sys", 6);
        ctx.begin_task("open the calculator");
        assert_eq!(ctx.next_user_message(0), "open the calculator");
        assert_eq!(ctx.next_user_message(1), CONTINUE_PROMPT);
    }

    #[test]
    fn prompt_order_is_fixed() {
        let mut ctx = ContextManager::new("sys", 6);
        ctx.begin_task("goal");
        ctx.set_ui_context("ID: 0 | Type: text | Interactive: yes | Content: \"OK\"".into());
        ctx.record_step(0, "goal", "{\"output\":[]}", &response(vec![], Some("looking")));

        let msgs = ctx.build_messages(Some("os: linux"), "continue", &["aGVsbG8=".into()]);
        let roles: Vec<&str> = msgs.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "system", "system", "system", "user", "assistant", "user"]);
        assert_eq!(msgs[0].text(), "sys");
        assert!(msgs[1].text().contains("os: linux"));
        assert!(msgs[2].text().contains("ID: 0"));
        assert!(msgs[3].text().contains("Goal: goal"));
        assert!(msgs[3].text().contains("1. no action — looking"));
        assert!(matches!(msgs[6].content, MessageContent::Parts(_)));
    }

    #[test]
    fn diagnostics_block_is_optional() {
        let ctx = ContextManager::new("sys", 6);
        let msgs = ctx.build_messages(None, "hi", &[]);
        assert_eq!(msgs.len(), 4);
        assert!(matches!(msgs[3].content, MessageContent::Text(_)));
    }

    #[test]
    fn window_never_exceeds_limit() {
        let mut ctx = ContextManager::new("sys", 4);
        ctx.begin_task("goal");
        for step in 0..10 {
            ctx.record_step(step, "u", &format!("a{step}"), &response(vec![], None));
            assert!(ctx.window().len() <= 4);
        }
        assert_eq!(ctx.conversation().len(), 20);
        assert_eq!(ctx.progress().len(), 10);
        assert_eq!(ctx.window().last().map(|e| e.content.as_str()), Some("a9"));
        // system, ui, goal + window + current user message
        assert_eq!(ctx.build_messages(None, "u", &[]).len(), 3 + 4 + 1);
    }

    #[test]
    fn begin_task_resets_state() {
        let mut ctx = ContextManager::new("sys", 6);
        ctx.begin_task("first");
        ctx.record_step(0, "first", "{}", &response(vec![Action::Done], None));
        ctx.begin_task("second");
        assert_eq!(ctx.goal(), Some("second"));
        assert!(ctx.progress().is_empty());
        assert!(ctx.conversation().is_empty());
    }

    #[test]
    fn history_summary_truncates() {
        let mut ctx = ContextManager::new("sys", 6);
        ctx.record_step(0, &"x".repeat(300), "ok", &response(vec![], None));
        let summary = ctx.history_summary();
        assert_eq!(summary.len(), 2);
        assert!(summary[0].starts_with("user: "));
        assert!(summary[0].chars().count() <= "user: ".len() + 101);
        assert_eq!(summary[1], "assistant: ok");
    }

    #[test]
    fn missing_prompt_file_uses_default() {
        assert_eq!(ContextManager::load_system_prompt(None), DEFAULT_SYSTEM_PROMPT);
        assert_eq!(
            ContextManager::load_system_prompt(Some("/nonexistent/visor/prompt.md")),
            DEFAULT_SYSTEM_PROMPT
        );
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompt.md");
        std::fs::write(&path, "custom").unwrap();
        assert_eq!(ContextManager::load_system_prompt(path.to_str()), "custom");
    }
}
