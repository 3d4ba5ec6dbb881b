use chrono::{DateTime, Utc};
use serde::Serialize;

/// A single logged LLM response, captured for drift analysis.
///
/// Entries are immutable once created and serialize to the wire names expected by the log
/// ingestion endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    /// Name of the prompt this response belongs to.
    #[serde(rename = "prompt_name")]
    pub name: String,
    /// The LLM response text.
    #[serde(rename = "response_text")]
    pub response: String,
    /// The input prompt, if the caller chose to attach it for reference.
    #[serde(rename = "input_text", skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// The model that produced the response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// When the entry was created on the client.
    #[serde(rename = "logged_at")]
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    /// Create a new entry timestamped with the current time.
    pub fn new(name: impl Into<String>, response: impl Into<String>) -> LogEntry {
        LogEntry {
            name: name.into(),
            response: response.into(),
            prompt: None,
            model: None,
            timestamp: Utc::now(),
        }
    }
}
