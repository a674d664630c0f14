//! Tool vocabulary: the metadata a tool carries once discovered/analyzed,
//! and the render-mode tiers the compiler assigns it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    Full,
    Condensed,
    Minimal,
}

impl RenderMode {
    pub fn estimated_tokens(self) -> usize {
        match self {
            RenderMode::Full => 200,
            RenderMode::Condensed => 30,
            RenderMode::Minimal => 5,
        }
    }

    pub fn demote(self) -> Option<RenderMode> {
        match self {
            RenderMode::Full => Some(RenderMode::Condensed),
            RenderMode::Condensed => Some(RenderMode::Minimal),
            RenderMode::Minimal => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MCPTool {
    pub id: String,
    pub server: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub domains: Vec<String>,
    /// `shardType -> affinity (0-100)`.
    #[serde(default)]
    pub shard_affinities: HashMap<String, f64>,
    #[serde(default)]
    pub json_schema: Option<serde_json::Value>,
    /// Little-endian float32 embedding, stored and searched as raw bytes.
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

impl MCPTool {
    pub fn affinity_for(&self, shard_type: &str) -> f64 {
        self.shard_affinities.get(shard_type).copied().unwrap_or(0.0).clamp(0.0, 100.0)
    }
}

#[derive(Debug, Clone)]
pub struct CompiledTool {
    pub tool: MCPTool,
    pub mode: RenderMode,
    pub score: f64,
}

#[derive(Debug, Clone, Default)]
pub struct CompiledToolSet {
    pub tools: Vec<CompiledTool>,
}

impl CompiledToolSet {
    pub fn estimated_tokens(&self) -> usize {
        self.tools.iter().map(|t| t.mode.estimated_tokens()).sum()
    }

    pub fn full_count(&self) -> usize {
        self.tools.iter().filter(|t| t.mode == RenderMode::Full).count()
    }
}

/// Normalized, LLM- or keyword-derived tool metadata produced by the
/// Analyzer on first discovery of a tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub categories: Vec<String>,
    pub capabilities: Vec<String>,
    pub domains: Vec<String>,
    pub shard_affinities: HashMap<String, f64>,
}
