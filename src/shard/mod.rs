//! Shard Manager (§4.2): the lifecycle owner of agents. This module holds
//! the static vocabulary (config, session context, result types, the
//! `ShardAgent` trait); [`manager`] holds the registry and spawn algorithm;
//! [`factory`] holds the alias/researcher/base-agent fallback chain.

pub mod factory;
pub mod manager;

pub use factory::ShardFactory;
pub use manager::ShardManager;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ShardType {
    Ephemeral,
    Persistent,
    System,
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StartupMode {
    Auto,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ReadFile,
    WriteFile,
    ExecCmd,
    Network,
    Browser,
    Research,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ModelCapability {
    #[default]
    Balanced,
    HighReasoning,
    Fast,
}

#[derive(Debug, Clone, PartialEq, Eq, Copy, PartialOrd, Ord)]
pub enum ShardState {
    Idle,
    Running,
    Completed,
    Failed,
}

/// Immutable per-type configuration, resolved by the manager at spawn time
/// and attached to the shard's config snapshot along with the caller's
/// session context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub shard_type: ShardType,
    /// Alias fallback: if no factory is registered for `name`, the manager
    /// tries `base_type` next.
    #[serde(default)]
    pub base_type: Option<String>,
    #[serde(default)]
    pub knowledge_path: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_startup_mode")]
    pub startup_mode: StartupMode,
    #[serde(default)]
    pub permissions: HashSet<Permission>,
    #[serde(default)]
    pub model_capability: ModelCapability,
    #[serde(skip)]
    pub session_context: Option<SessionContext>,
}

fn default_timeout_secs() -> u64 {
    15 * 60
}

fn default_startup_mode() -> StartupMode {
    StartupMode::Manual
}

impl ShardConfig {
    pub fn default_ephemeral(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shard_type: ShardType::Ephemeral,
            base_type: None,
            knowledge_path: None,
            timeout_secs: default_timeout_secs(),
            startup_mode: StartupMode::Manual,
            permissions: HashSet::new(),
            model_capability: ModelCapability::Balanced,
            session_context: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Read-only per-spawn snapshot a shard consults when composing prompts.
/// `available_tools` is filled in by the Manager's tool-relevance query
/// (§4.5) before the shard is constructed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionContext {
    #[serde(default)]
    pub diagnostics: Vec<String>,
    #[serde(default)]
    pub test_state: Option<String>,
    #[serde(default)]
    pub recent_findings: Vec<String>,
    #[serde(default)]
    pub impacted_files: Vec<String>,
    #[serde(default)]
    pub git_context: Option<String>,
    #[serde(default)]
    pub campaign_context: Option<String>,
    #[serde(default)]
    pub prior_shard_outputs: Vec<String>,
    #[serde(default)]
    pub recent_actions: Vec<String>,
    #[serde(default)]
    pub knowledge_atoms: Vec<String>,
    #[serde(default)]
    pub safety_constraints: Vec<String>,
    #[serde(default)]
    pub compressed_history: Option<String>,
    /// Current intent verb/target, used to build the tool-relevance query.
    #[serde(default)]
    pub current_intent_verb: Option<String>,
    #[serde(default)]
    pub current_intent_target: Option<String>,
    #[serde(default)]
    pub available_tools: Vec<String>,
}

/// Terminal outcome of a shard's `Execute`, surfaced to whoever is waiting
/// on the result (a direct caller or a queue worker).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardResult {
    pub shard_id: String,
    pub output: Option<String>,
    pub error: Option<String>,
}

impl ShardResult {
    pub fn ok(shard_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            shard_id: shard_id.into(),
            output: Some(output.into()),
            error: None,
        }
    }

    pub fn err(shard_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            shard_id: shard_id.into(),
            output: None,
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Dependencies the Manager injects into an agent at construction time.
/// A shard owns nothing of its own beyond its id and config: the kernel
/// and LLM client are handles to shared collaborators (§9 "shard owns
/// nothing; manager owns shards; kernel is a shared collaborator reached
/// by handle").
pub struct ShardDeps {
    pub kernel: std::sync::Arc<crate::kernel::Kernel>,
    pub llm: std::sync::Arc<dyn crate::llm::LlmClient>,
}

/// An agent: identity, config, and an `execute` entry point. Implementors
/// are constructed fresh per spawn by a [`ShardFactory`] and destroyed when
/// `execute` returns or panics — no implementor holds a back-reference to
/// the manager.
#[async_trait]
pub trait ShardAgent: Send + Sync {
    fn id(&self) -> &str;
    fn config(&self) -> &ShardConfig;

    async fn execute(&self, deps: &ShardDeps, task: &str) -> anyhow::Result<String>;
}

pub type ShardMap = HashMap<String, std::sync::Arc<dyn ShardAgent>>;
