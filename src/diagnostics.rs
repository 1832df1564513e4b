use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::VisorResult;

/// Read-mostly side channel consulted while building prompts.
pub trait Diagnostics: Send + Sync {
    /// Free-form system description, injected as its own system message.
    fn system_info(&self) -> String;
    fn applied_items(&self) -> Vec<AppliedItem>;
    fn record_applied(&self, company: &str, position: &str) -> VisorResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedItem {
    pub company: String,
    pub position: String,
    pub ts: i64,
}

/// Extracts `(company, position)` from every `[APPLIED] <company> | <position>` line.
pub fn parse_applied_tags(text: &str) -> Vec<(String, String)> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"(?m)^\s*\[APPLIED\]\s*(.+?)\s*\|\s*(.+?)\s*$").ok());
    let Some(re) = re else {
        return Vec::new();
    };
    re.captures_iter(text)
        .map(|c| (c[1].to_string(), c[2].to_string()))
        .collect()
}

/// Diagnostics text block for the prompt: system info plus what was already applied to.
pub fn render_block(diag: &dyn Diagnostics) -> String {
    let mut block = diag.system_info();
    let applied = diag.applied_items();
    if !applied.is_empty() {
        block.push_str("\nAlready applied (do not apply again):");
        for item in applied {
            block.push_str(&format!("\n- {} | {}", item.company, item.position));
        }
    }
    block
}

/// Applied items persisted as JSONL, one record per line, appended on each record.
pub struct JobLog {
    file_path: PathBuf,
    items: Mutex<Vec<AppliedItem>>,
}

impl JobLog {
    /// Opens (or starts) the log at `path`, loading existing records. Unreadable lines are skipped.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let file_path = path.into();
        let items = match std::fs::read_to_string(&file_path) {
            Ok(text) => text
                .lines()
                .filter(|l| !l.trim().is_empty())
                .filter_map(|l| match serde_json::from_str::<AppliedItem>(l) {
                    Ok(item) => Some(item),
                    Err(e) => {
                        tracing::warn!(error = %e, "skipping bad job log line");
                        None
                    }
                })
                .collect(),
            Err(_) => Vec::new(),
        };
        tracing::debug!(path = %file_path.display(), count = items.len(), "job log loaded");
        Self {
            file_path,
            items: Mutex::new(items),
        }
    }

    fn append_line(&self, item: &AppliedItem) -> VisorResult<()> {
        if let Some(parent) = self.file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let line = serde_json::to_string(item)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

impl Diagnostics for JobLog {
    fn system_info(&self) -> String {
        format!(
            "os: {} ({})\ntime: {}",
            std::env::consts::OS,
            std::env::consts::ARCH,
            chrono::Local::now().format("%Y-%m-%d %H:%M")
        )
    }

    fn applied_items(&self) -> Vec<AppliedItem> {
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn record_applied(&self, company: &str, position: &str) -> VisorResult<()> {
        let item = AppliedItem {
            company: company.to_string(),
            position: position.to_string(),
            ts: chrono::Utc::now().timestamp_millis(),
        };
        self.append_line(&item)?;
        tracing::info!(company, position, "applied item recorded");
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(item);
        Ok(())
    }
}
