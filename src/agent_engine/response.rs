//! Typed view of the model's JSON reply.
//!
//! Expected shape (optionally wrapped in a Markdown code fence):
//!
//! ```json
//! {"output": [
//!   {"type": "reasoning", "summary": "..."},
//!   {"type": "message", "reply": "..."},
//!   {"type": "action_batch", "actions": [{"type": "click", "target_id": 3}, {"type": "done"}]}
//! ]}
//! ```
//!
//! A single legacy `{"type": "computer_call", "action": {...}}` item is accepted
//! and normalized to a one-element batch. Unknown item or action tags are rejected.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::{VisorError, VisorResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

impl ScrollDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScrollDirection::Up => "up",
            ScrollDirection::Down => "down",
            ScrollDirection::Left => "left",
            ScrollDirection::Right => "right",
        }
    }
}

/// One primitive UI action. `Done` is the completion sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Click {
        target_id: usize,
    },
    DoubleClick {
        target_id: usize,
    },
    Scroll {
        direction: ScrollDirection,
        #[serde(default = "default_scroll_amount")]
        amount: i32,
    },
    Type {
        text: String,
    },
    Key {
        key: String,
        #[serde(default)]
        modifiers: Vec<String>,
    },
    Wait {
        ms: u64,
    },
    Done,
}

fn default_scroll_amount() -> i32 {
    5
}

impl Action {
    /// Short human-readable description used in progress lines and step events.
    pub fn describe(&self) -> String {
        match self {
            Action::Click { target_id } => format!("click #{target_id}"),
            Action::DoubleClick { target_id } => format!("double-click #{target_id}"),
            Action::Scroll { direction, amount } => format!("scroll {} {amount}", direction.as_str()),
            Action::Type { text } => format!("type \"{}\"", truncate(text, 40)),
            Action::Key { key, modifiers } if modifiers.is_empty() => format!("key {key}"),
            Action::Key { key, modifiers } => format!("key {}+{key}", modifiers.join("+")),
            Action::Wait { ms } => format!("wait {ms}ms"),
            Action::Done => "done".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutputItem {
    Message { reply: String },
    Reasoning { summary: String },
    ActionBatch { actions: Vec<Action> },
    ComputerCall { action: Action },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentResponse {
    /// All `message` replies joined with newlines.
    pub reply: Option<String>,
    pub reasoning: Vec<String>,
    /// Actions from every batch, in order of appearance.
    pub actions: Vec<Action>,
}

/// Removes Markdown code-fence markers (```` ```json ```` / ```` ``` ````) and trims.
pub fn strip_code_fences(raw: &str) -> String {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    match FENCE.get_or_init(|| Regex::new(r"```(?:json)?\n?").ok()) {
        Some(re) => re.replace_all(raw, "").trim().to_string(),
        None => raw.trim().to_string(),
    }
}

pub fn parse_agent_response(raw: &str) -> VisorResult<AgentResponse> {
    let cleaned = strip_code_fences(raw);
    if cleaned.is_empty() {
        return Err(VisorError::MalformedResponse("response is empty".into()));
    }

    let value: serde_json::Value = serde_json::from_str(&cleaned)
        .map_err(|e| VisorError::MalformedResponse(format!("not valid JSON: {e}")))?;
    let items = match value.get("output") {
        Some(serde_json::Value::Array(items)) => items,
        Some(_) => return Err(VisorError::MalformedResponse("`output` is not an array".into())),
        None => return Err(VisorError::MalformedResponse("missing `output`".into())),
    };

    let mut resp = AgentResponse::default();
    let mut replies = Vec::new();
    for (i, item) in items.iter().enumerate() {
        let item: OutputItem = serde_json::from_value(item.clone())
            .map_err(|e| VisorError::MalformedResponse(format!("output[{i}]: {e}")))?;
        match item {
            OutputItem::Message { reply } => replies.push(reply),
            OutputItem::Reasoning { summary } => resp.reasoning.push(summary),
            OutputItem::ActionBatch { actions } => resp.actions.extend(actions),
            OutputItem::ComputerCall { action } => resp.actions.push(action),
        }
    }
    if !replies.is_empty() {
        resp.reply = Some(replies.join("\n"));
    }
    Ok(resp)
}

pub(crate) fn truncate(s: &str, max_chars: usize) -> String {
    let one_line = s.split_whitespace().collect::<Vec<_>>().join(" ");
    if one_line.chars().count() <= max_chars {
        return one_line;
    }
    let cut: String = one_line.chars().take(max_chars).collect();
    format!("{cut}…")
}
