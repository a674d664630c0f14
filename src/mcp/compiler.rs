//! Compiler (§4.6 steps 1-6): turns a `(shardType, taskDescription)` pair
//! into a token-budget-fitted [`CompiledToolSet`], preferring a kernel-driven
//! selection (`mcp_tool_selected/3`) and falling back to the hybrid
//! logic+vector score when the kernel path yields nothing.

use super::store::ToolStore;
use super::tool::{CompiledTool, CompiledToolSet, RenderMode};
use super::Embedder;
use crate::kernel::{Fact, Kernel, Term};
use std::collections::HashMap;

pub struct ToolCompilationContext<'a> {
    pub shard_type: &'a str,
    pub task_description: &'a str,
    pub token_budget: usize,
}

pub struct CompilerThresholds {
    pub full: f64,
    pub condensed: f64,
    pub minimal: f64,
    pub logic_weight: f64,
    pub vector_weight: f64,
    pub max_full_tools: usize,
}

impl Default for CompilerThresholds {
    fn default() -> Self {
        Self {
            full: 70.0,
            condensed: 40.0,
            minimal: 20.0,
            logic_weight: 7.0,
            vector_weight: 3.0,
            max_full_tools: 6,
        }
    }
}

pub fn compile(
    kernel: &Kernel,
    store: &dyn ToolStore,
    embedder: &dyn Embedder,
    thresholds: &CompilerThresholds,
    ctx: &ToolCompilationContext,
) -> anyhow::Result<CompiledToolSet> {
    // 1. Load all tools.
    let tools = store.load_all()?;
    let tools_by_id: HashMap<String, _> = tools.iter().map(|t| (t.id.clone(), t.clone())).collect();

    // 2. Query embedding + vector search.
    let query_embedding = embedder.embed(ctx.task_description);
    let similarities: HashMap<String, f32> = tools
        .iter()
        .filter_map(|t| {
            let embedding = t.embedding.as_ref()?;
            Some((t.id.clone(), super::store::cosine_similarity(&query_embedding, embedding)))
        })
        .collect();

    // 3. Assert ephemeral vector-score facts.
    for (id, sim) in &similarities {
        kernel.assert(Fact::new(
            "mcp_tool_vector_score",
            vec![Term::str(id.clone()), Term::num((*sim as f64) * 100.0)],
        ));
    }

    // 4. Prefer a kernel-driven selection; otherwise fall back.
    let selected = kernel
        .query("mcp_tool_selected")
        .into_iter()
        .filter(|f| f.args.first().and_then(|t| t.as_atom()) == Some(ctx.shard_type))
        .filter_map(|f| {
            let tool_id = f.args.get(1)?.as_str_val()?.to_string();
            let mode = match f.args.get(2)?.as_atom()? {
                "full" => RenderMode::Full,
                "condensed" => RenderMode::Condensed,
                "minimal" => RenderMode::Minimal,
                _ => return None,
            };
            Some((tool_id, mode))
        })
        .collect::<Vec<_>>();

    let mut compiled: Vec<CompiledTool> = if !selected.is_empty() {
        selected
            .into_iter()
            .filter_map(|(id, mode)| {
                let tool = tools_by_id.get(&id)?.clone();
                let score = similarities.get(&id).copied().unwrap_or(0.0) as f64 * 100.0;
                Some(CompiledTool { tool, mode, score })
            })
            .collect()
    } else {
        fallback_selection(&tools, &similarities, ctx.shard_type, thresholds)
    };

    // 5. Fit to budget.
    compiled.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    fit_to_budget(&mut compiled, ctx.token_budget, thresholds.max_full_tools);

    // 6. Retract ephemeral vector-score facts.
    kernel.retract("mcp_tool_vector_score");

    Ok(CompiledToolSet { tools: compiled })
}

fn fallback_selection(
    tools: &[super::tool::MCPTool],
    similarities: &HashMap<String, f32>,
    shard_type: &str,
    thresholds: &CompilerThresholds,
) -> Vec<CompiledTool> {
    tools
        .iter()
        .filter_map(|tool| {
            let logic = tool.affinity_for(shard_type);
            let vector = similarities.get(&tool.id).copied().unwrap_or(0.0) as f64 * 100.0;
            let final_score =
                (logic * thresholds.logic_weight + vector * thresholds.vector_weight) / 10.0;

            let mode = if final_score >= thresholds.full {
                RenderMode::Full
            } else if final_score >= thresholds.condensed {
                RenderMode::Condensed
            } else if final_score >= thresholds.minimal {
                RenderMode::Minimal
            } else {
                return None;
            };

            Some(CompiledTool {
                tool: tool.clone(),
                mode,
                score: final_score,
            })
        })
        .collect()
}

/// Demotes the lowest-scored full tools to condensed, then condensed to
/// minimal, then drops minimal from the tail, until the set fits the
/// budget (and `max_full_tools` is respected).
fn fit_to_budget(compiled: &mut Vec<CompiledTool>, token_budget: usize, max_full_tools: usize) {
    let excess_full = compiled.iter().filter(|t| t.mode == RenderMode::Full).count();
    if excess_full > max_full_tools {
        let mut full_indices: Vec<usize> = compiled
            .iter()
            .enumerate()
            .filter(|(_, t)| t.mode == RenderMode::Full)
            .map(|(i, _)| i)
            .collect();
        full_indices.sort_by(|&a, &b| {
            compiled[a].score.partial_cmp(&compiled[b].score).unwrap_or(std::cmp::Ordering::Equal)
        });
        for &i in full_indices.iter().take(excess_full - max_full_tools) {
            compiled[i].mode = RenderMode::Condensed;
        }
    }

    loop {
        let total: usize = compiled.iter().map(|t| t.mode.estimated_tokens()).sum();
        if total <= token_budget || compiled.is_empty() {
            break;
        }

        // Demote the lowest-scored tool still above Minimal; if everything
        // is already Minimal, drop the lowest-scored tool entirely.
        let demote_candidate = compiled
            .iter()
            .enumerate()
            .filter(|(_, t)| t.mode != RenderMode::Minimal)
            .min_by(|a, b| a.1.score.partial_cmp(&b.1.score).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i);

        match demote_candidate {
            Some(i) => {
                if let Some(next) = compiled[i].mode.demote() {
                    compiled[i].mode = next;
                }
            }
            None => {
                let drop_idx = compiled
                    .iter()
                    .enumerate()
                    .min_by(|a, b| a.1.score.partial_cmp(&b.1.score).unwrap_or(std::cmp::Ordering::Equal))
                    .map(|(i, _)| i)
                    .unwrap();
                compiled.remove(drop_idx);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::tool::MCPTool;
    use std::collections::HashMap as Map;

    fn tool(id: &str, affinity: f64) -> MCPTool {
        let mut affinities = Map::new();
        affinities.insert("coder".to_string(), affinity);
        MCPTool {
            id: id.to_string(),
            server: "local".to_string(),
            name: id.to_string(),
            description: "a tool".to_string(),
            capabilities: vec![],
            categories: vec![],
            domains: vec![],
            shard_affinities: affinities,
            json_schema: None,
            embedding: None,
        }
    }

    #[test]
    fn fallback_selection_assigns_tiers_by_threshold() {
        let tools = vec![tool("full-tool", 100.0), tool("condensed-tool", 60.0), tool("excluded-tool", 5.0)];
        let thresholds = CompilerThresholds::default();
        let compiled = fallback_selection(&tools, &HashMap::new(), "coder", &thresholds);
        assert_eq!(compiled.len(), 2);
        let full = compiled.iter().find(|t| t.tool.id == "full-tool").unwrap();
        assert_eq!(full.mode, RenderMode::Full);
        let condensed = compiled.iter().find(|t| t.tool.id == "condensed-tool").unwrap();
        assert_eq!(condensed.mode, RenderMode::Condensed);
    }

    #[test]
    fn fit_to_budget_demotes_lowest_scored_full_tools_first() {
        let mut compiled: Vec<CompiledTool> = (0..5)
            .map(|i| CompiledTool {
                tool: tool(&format!("tool-{i}"), 100.0),
                mode: RenderMode::Full,
                score: i as f64,
            })
            .collect();
        fit_to_budget(&mut compiled, 400, 10);
        assert!(compiled.iter().map(|t| t.mode.estimated_tokens()).sum::<usize>() <= 400);
        // The lowest-scored tool (tool-0) should have been demoted first.
        let tool0 = compiled.iter().find(|t| t.tool.id == "tool-0").unwrap();
        assert_ne!(tool0.mode, RenderMode::Full);
    }

    #[test]
    fn fit_to_budget_respects_max_full_tools() {
        let mut compiled: Vec<CompiledTool> = (0..10)
            .map(|i| CompiledTool {
                tool: tool(&format!("tool-{i}"), 100.0),
                mode: RenderMode::Full,
                score: i as f64,
            })
            .collect();
        fit_to_budget(&mut compiled, 100_000, 3);
        assert_eq!(compiled.iter().filter(|t| t.mode == RenderMode::Full).count(), 3);
    }

    struct FixedToolSet(Vec<MCPTool>);
    impl ToolStore for FixedToolSet {
        fn load_all(&self) -> anyhow::Result<Vec<MCPTool>> {
            Ok(self.0.clone())
        }
        fn upsert(&self, _tool: &MCPTool) -> anyhow::Result<()> {
            Ok(())
        }
        fn vector_search(&self, _query_embedding: &[f32], _top_k: usize) -> anyhow::Result<Vec<(String, f32)>> {
            Ok(vec![])
        }
    }

    struct ZeroEmbedder;
    impl super::Embedder for ZeroEmbedder {
        fn embed(&self, _text: &str) -> Vec<f32> {
            vec![]
        }
    }

    /// §8 scenario #6: through the public `compile` entry point, a
    /// high-affinity tool set that doesn't fit the token budget demotes its
    /// lowest-scored members first, in the same order `fit_to_budget` does
    /// in isolation.
    #[test]
    fn compile_demotes_lowest_scored_tools_when_over_budget() {
        let kernel = Kernel::new();
        // All five clear the Full threshold (affinity * logic_weight / 10 >=
        // 70), so without budget pressure every tool would render Full.
        let tools: Vec<MCPTool> =
            (0..5).map(|i| tool(&format!("tool-{i}"), 100.0 + i as f64)).collect();
        let store = FixedToolSet(tools);
        let embedder = ZeroEmbedder;
        let thresholds = CompilerThresholds::default();
        let ctx = ToolCompilationContext {
            shard_type: "coder",
            task_description: "do something",
            token_budget: 400,
        };

        let result = compile(&kernel, &store, &embedder, &thresholds, &ctx).unwrap();

        let total_tokens: usize = result.tools.iter().map(|t| t.mode.estimated_tokens()).sum();
        assert!(total_tokens <= 400);

        // Highest-affinity tool (tool-4) keeps Full; lowest-affinity tool
        // (tool-0) is demoted away from Full first to fit the budget.
        let best = result.tools.iter().find(|t| t.tool.id == "tool-4").unwrap();
        assert_eq!(best.mode, RenderMode::Full);
        let worst = result.tools.iter().find(|t| t.tool.id == "tool-0").unwrap();
        assert_ne!(worst.mode, RenderMode::Full);

        // Ephemeral vector-score facts don't leak past compile().
        assert!(kernel.query("mcp_tool_vector_score").is_empty());
    }
}
