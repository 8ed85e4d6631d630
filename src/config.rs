use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use crate::ai::RetryPolicy;

/// Application-level constants
pub const APP_NAME: &str = "ClinicCore";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "clinic_core=info,warn"
}

/// Default location of the SQLite file, under the user's data directory.
/// `None` when the platform reports no data directory.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join(APP_NAME).join("clinic.db"))
}

// ═══════════════════════════════════════════════════════════
// Core configuration
// ═══════════════════════════════════════════════════════════

/// Everything the core needs, injected at construction. Missing fields
/// deserialize to their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub scheduling: SchedulingConfig,
    pub recommendation: RecommendationConfig,
    pub cache: CacheConfig,
    pub retry: RetryPolicy,
    pub ai: AiConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    pub max_duration_minutes: i64,
    /// Cap on `upcoming` results when the caller gives no limit.
    pub default_upcoming_limit: u32,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            max_duration_minutes: 480,
            default_upcoming_limit: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendationConfig {
    /// Most recent history entries placed in the prompt context.
    pub history_limit: u32,
    /// Most recent manual treatments placed in the prompt context.
    pub treatment_limit: u32,
    /// Per-entry character cap inside the context.
    pub context_entry_chars: usize,
    /// Cap on the symptom or condition text after sanitization.
    pub max_input_chars: usize,
    pub min_suggestion_chars: usize,
    pub max_suggestion_chars: usize,
    pub max_tokens: u32,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            history_limit: 10,
            treatment_limit: 5,
            context_entry_chars: 300,
            max_input_chars: 2_000,
            min_suggestion_chars: 20,
            max_suggestion_chars: 8_000,
            max_tokens: 1_024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub capacity: usize,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 15 * 60,
            capacity: 512,
        }
    }
}

/// Local Ollama endpoint and model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub base_url: String,
    pub model: String,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".into(),
            model: "medgemma:4b".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = CoreConfig::default();
        assert_eq!(config.scheduling.max_duration_minutes, 480);
        assert_eq!(config.recommendation.history_limit, 10);
        assert_eq!(config.recommendation.treatment_limit, 5);
        assert_eq!(config.recommendation.max_suggestion_chars, 8_000);
        assert_eq!(config.cache.ttl(), Duration::from_secs(900));
        assert_eq!(config.cache.capacity, 512);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: CoreConfig = serde_json::from_str(
            r#"{ "cache": { "ttl_secs": 60 }, "ai": { "model": "llama3" } }"#,
        )
        .unwrap();
        assert_eq!(config.cache.ttl_secs, 60);
        assert_eq!(config.cache.capacity, 512);
        assert_eq!(config.ai.model, "llama3");
        assert_eq!(config.ai.base_url, "http://localhost:11434");
        assert_eq!(config.retry, RetryPolicy::default());
    }

    #[test]
    fn database_path_under_data_dir() {
        if let (Some(path), Some(data)) = (default_database_path(), dirs::data_dir()) {
            assert!(path.starts_with(data));
            assert!(path.ends_with("clinic.db"));
        }
    }

    #[test]
    fn app_version_matches_cargo() {
        assert_eq!(APP_VERSION, "0.1.0");
    }
}
