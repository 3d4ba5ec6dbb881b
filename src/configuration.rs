//! Server-assigned prompt configuration and the wire types it is parsed from.
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which of the two registered prompt texts the server currently designates as in-use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActiveVariant {
    /// Prompt text "a".
    A,
    /// Prompt text "b".
    B,
}

impl ActiveVariant {
    /// The wire representation of the variant.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActiveVariant::A => "a",
            ActiveVariant::B => "b",
        }
    }
}

/// Whether the server has collected enough baseline samples to trust drift results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaselineStatus {
    /// The baseline sample set is still being collected.
    Learning,
    /// Enough samples exist; drift scores are meaningful.
    Ready,
}

impl Default for BaselineStatus {
    fn default() -> BaselineStatus {
        BaselineStatus::Learning
    }
}

/// Server-assigned configuration for a single prompt.
///
/// Produced from sync responses and read-only to consumers. `fetched_at` records when the
/// snapshot containing this entry was fetched; when syncs fail, it lags real time and the entry
/// must be treated as "last known", not "current".
#[derive(Debug, Clone, PartialEq)]
pub struct PromptConfig {
    /// Name of the prompt.
    pub name: String,
    /// Currently active variant, or `None` if the server hasn't designated one.
    pub active_variant: Option<ActiveVariant>,
    /// Registered prompt text "a".
    pub prompt_a: Option<String>,
    /// Registered prompt text "b".
    pub prompt_b: Option<String>,
    /// Baseline readiness as reported by the server.
    pub baseline_status: BaselineStatus,
    /// Number of baseline samples the server has collected.
    pub sample_count: u64,
    /// Server-side sample threshold for the baseline to become ready.
    pub min_baseline_samples: u64,
    /// Semantic drift score above which the server flags drift.
    pub drift_threshold: f64,
    /// Response-length ratio above which the server flags length drift.
    pub length_drift_threshold: f64,
    /// Whether the server may auto-switch the active variant on drift.
    pub auto_switch_enabled: bool,
    /// When this entry was fetched from the server.
    pub fetched_at: DateTime<Utc>,
}

/// Wire form of a single prompt's configuration in the sync response.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct PromptConfigResponse {
    #[serde(rename = "active_prompt", default)]
    active_variant: Option<ActiveVariant>,
    #[serde(default)]
    prompt_a: Option<String>,
    #[serde(default)]
    prompt_b: Option<String>,
    #[serde(default)]
    baseline_status: BaselineStatus,
    #[serde(rename = "baseline_sample_count", default)]
    sample_count: u64,
    #[serde(default = "default_min_baseline_samples")]
    min_baseline_samples: u64,
    #[serde(default = "default_drift_threshold")]
    drift_threshold: f64,
    #[serde(default = "default_length_drift_threshold")]
    length_drift_threshold: f64,
    #[serde(default = "default_auto_switch_enabled")]
    auto_switch_enabled: bool,
}

fn default_min_baseline_samples() -> u64 {
    30
}

fn default_drift_threshold() -> f64 {
    0.7
}

fn default_length_drift_threshold() -> f64 {
    1.5
}

fn default_auto_switch_enabled() -> bool {
    true
}

/// Wire form of the full sync response.
#[derive(Debug, Deserialize)]
pub(crate) struct ConfigurationResponse {
    #[serde(default)]
    pub(crate) prompts: HashMap<String, PromptConfigResponse>,
}

/// Remote configuration for the DriftBalloon client.
///
/// An immutable snapshot of every prompt's server-assigned state, built from one sync
/// response. Snapshots are only ever replaced wholesale, never mutated, so readers holding one
/// see a consistent view.
#[derive(Debug)]
pub struct Configuration {
    /// Timestamp when the snapshot was fetched by the SDK.
    pub fetched_at: DateTime<Utc>,
    prompts: HashMap<String, Arc<PromptConfig>>,
}

impl Configuration {
    /// Create a new configuration from a server response.
    pub(crate) fn from_server_response(response: ConfigurationResponse) -> Configuration {
        let now = Utc::now();

        let prompts = response
            .prompts
            .into_iter()
            .map(|(name, wire)| {
                let config = PromptConfig {
                    name: name.clone(),
                    active_variant: wire.active_variant,
                    prompt_a: wire.prompt_a,
                    prompt_b: wire.prompt_b,
                    baseline_status: wire.baseline_status,
                    sample_count: wire.sample_count,
                    min_baseline_samples: wire.min_baseline_samples,
                    drift_threshold: wire.drift_threshold,
                    length_drift_threshold: wire.length_drift_threshold,
                    auto_switch_enabled: wire.auto_switch_enabled,
                    fetched_at: now,
                };
                (name, Arc::new(config))
            })
            .collect();

        Configuration {
            fetched_at: now,
            prompts,
        }
    }

    /// Build a configuration snapshot directly from prompt configurations.
    ///
    /// Useful for seeding a client in tests or restoring a snapshot from caller-managed storage.
    pub fn from_prompts(prompts: impl IntoIterator<Item = PromptConfig>) -> Configuration {
        Configuration {
            fetched_at: Utc::now(),
            prompts: prompts
                .into_iter()
                .map(|config| (config.name.clone(), Arc::new(config)))
                .collect(),
        }
    }

    /// Return the configuration for the given prompt name.
    pub fn get(&self, name: &str) -> Option<&Arc<PromptConfig>> {
        self.prompts.get(name)
    }

    /// Get a set of all prompt names present in the snapshot.
    pub fn prompt_names(&self) -> HashSet<String> {
        self.prompts.keys().cloned().collect()
    }
}
