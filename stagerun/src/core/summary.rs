//! Size-bounded summaries of audit payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default number of characters kept from a payload before truncating.
pub const DEFAULT_SUMMARY_LIMIT: usize = 500;

/// Bounded rendering of a payload plus its original size.
///
/// Truncation keeps a prefix and appends the total length, so a summary never
/// silently drops a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSummary {
    pub summary: String,
    /// Size in bytes of the full serialized payload.
    pub size: usize,
    pub truncated: bool,
}

/// Render a payload as text: strings verbatim, everything else as compact JSON.
pub fn render_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Number of bytes a payload contributes to the run's data counter.
pub fn payload_size(value: &Value) -> usize {
    match value {
        Value::Null => 0,
        Value::String(s) => s.len(),
        other => other.to_string().len(),
    }
}

pub fn summarize(value: &Value, limit: usize) -> DataSummary {
    let text = render_text(value);
    let size = payload_size(value);
    let total_chars = text.chars().count();
    if total_chars <= limit {
        return DataSummary {
            summary: text,
            size,
            truncated: false,
        };
    }
    let prefix: String = text.chars().take(limit).collect();
    DataSummary {
        summary: format!("{prefix}... ({total_chars} total chars)"),
        size,
        truncated: true,
    }
}

/// Truncate a single-line message for the text trace, keeping its total length.
pub fn clip_line(text: &str, limit: usize) -> String {
    let flat = text.replace(['\n', '\r'], " ");
    let total_chars = flat.chars().count();
    if total_chars <= limit {
        return flat;
    }
    let prefix: String = flat.chars().take(limit).collect();
    format!("{prefix}... ({total_chars} total chars)")
}
