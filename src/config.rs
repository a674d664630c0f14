use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::shard::ShardConfig;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub models: Vec<ModelConfig>,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub shard_profiles: ShardProfilesConfig,
    #[serde(default)]
    pub tool_selection: ToolSelectionConfig,
    #[serde(default)]
    pub learning: LearningConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ModelConfig {
    pub id: String,
    pub provider: String, // "ollama" | "openai"
    pub url: String,
    pub model: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct QueueConfig {
    pub max_queue_size: usize,
    pub max_queue_per_priority: usize,
    pub default_timeout_secs: u64,
    pub high_water_mark: f64,
    pub worker_count: usize,
    pub drain_timeout_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 100,
            max_queue_per_priority: 30,
            default_timeout_secs: 5 * 60,
            high_water_mark: 0.7,
            worker_count: 2,
            drain_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ShardProfilesConfig {
    #[serde(default)]
    pub profiles: HashMap<String, ShardConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ToolSelectionConfig {
    pub full_threshold: f64,
    pub condensed_threshold: f64,
    pub minimal_threshold: f64,
    pub logic_weight: f64,
    pub vector_weight: f64,
    pub max_full_tools: usize,
    pub token_budget: usize,
}

impl Default for ToolSelectionConfig {
    fn default() -> Self {
        Self {
            full_threshold: 70.0,
            condensed_threshold: 40.0,
            minimal_threshold: 20.0,
            logic_weight: 7.0,
            vector_weight: 3.0,
            max_full_tools: 6,
            token_budget: 2000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LearningConfig {
    pub threshold: u32,
    pub auto_promote: bool,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            threshold: 3,
            auto_promote: false,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Path::new("shardcore.toml");
        if config_path.exists() {
            let content = fs::read_to_string(config_path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            models: vec![ModelConfig {
                id: "default".to_string(),
                provider: "ollama".to_string(),
                url: "http://127.0.0.1:11434".to_string(),
                model: "qwen3-coder".to_string(),
                api_key: None,
            }],
            queue: QueueConfig::default(),
            shard_profiles: ShardProfilesConfig::default(),
            tool_selection: ToolSelectionConfig::default(),
            learning: LearningConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_queue_config_matches_spec_defaults() {
        let q = QueueConfig::default();
        assert_eq!(q.max_queue_size, 100);
        assert_eq!(q.max_queue_per_priority, 30);
        assert_eq!(q.default_timeout_secs, 300);
        assert_eq!(q.high_water_mark, 0.7);
        assert_eq!(q.worker_count, 2);
        assert_eq!(q.drain_timeout_secs, 30);
    }
}
