//! Rendering (§4.6): turns a [`CompiledToolSet`] into text a model or
//! invocation layer can consume, at several fidelities.

use super::tool::{CompiledToolSet, RenderMode};

/// Three-tier markdown: Primary Tools (full), Secondary Tools (condensed),
/// Additional Tools (names only).
pub fn render(set: &CompiledToolSet) -> String {
    let mut out = String::new();

    let full: Vec<_> = set.tools.iter().filter(|t| t.mode == RenderMode::Full).collect();
    let condensed: Vec<_> = set.tools.iter().filter(|t| t.mode == RenderMode::Condensed).collect();
    let minimal: Vec<_> = set.tools.iter().filter(|t| t.mode == RenderMode::Minimal).collect();

    if !full.is_empty() {
        out.push_str("## Primary Tools\n\n");
        for t in &full {
            out.push_str(&format!("### {}\n", t.tool.name));
            out.push_str(&format!("{}\n", t.tool.description));
            if !t.tool.capabilities.is_empty() {
                out.push_str(&format!("Capabilities: {}\n", t.tool.capabilities.join(", ")));
            }
            if !t.tool.categories.is_empty() {
                out.push_str(&format!("Categories: {}\n", t.tool.categories.join(", ")));
            }
            if let Some(schema) = &t.tool.json_schema {
                let rendered = serde_json::to_string_pretty(schema).unwrap_or_default();
                let truncated: String = rendered.chars().take(500).collect();
                out.push_str(&format!("Schema:\n```json\n{truncated}\n```\n"));
            }
            out.push('\n');
        }
    }

    if !condensed.is_empty() {
        out.push_str("## Secondary Tools\n\n");
        for t in &condensed {
            out.push_str(&format!("- **{}**: {}\n", t.tool.name, t.tool.description));
        }
        out.push('\n');
    }

    if !minimal.is_empty() {
        out.push_str("## Additional Tools\n\n");
        out.push_str(&minimal.iter().map(|t| t.tool.name.as_str()).collect::<Vec<_>>().join(", "));
        out.push('\n');
    }

    out
}

/// A single-line-per-tool rendering for contexts with no markdown budget.
pub fn render_compact(set: &CompiledToolSet) -> String {
    set.tools
        .iter()
        .map(|t| format!("{} ({:?}): {}", t.tool.name, t.mode, t.tool.description))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_json(set: &CompiledToolSet) -> serde_json::Value {
    serde_json::json!({
        "tools": set.tools.iter().map(|t| serde_json::json!({
            "id": t.tool.id,
            "name": t.tool.name,
            "mode": format!("{:?}", t.mode).to_lowercase(),
            "score": t.score,
        })).collect::<Vec<_>>()
    })
}

/// Tool-invocation-ready rendering: only full-tier tools, with their
/// schemas intact (invocation needs exact argument shapes, not prose).
pub fn render_for_invocation(set: &CompiledToolSet) -> serde_json::Value {
    serde_json::json!({
        "tools": set
            .tools
            .iter()
            .filter(|t| t.mode == RenderMode::Full)
            .map(|t| serde_json::json!({
                "name": t.tool.name,
                "description": t.tool.description,
                "input_schema": t.tool.json_schema.clone().unwrap_or(serde_json::json!({})),
            }))
            .collect::<Vec<_>>()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::tool::{CompiledTool, MCPTool};
    use std::collections::HashMap;

    fn tool(id: &str) -> MCPTool {
        MCPTool {
            id: id.to_string(),
            server: "local".to_string(),
            name: id.to_string(),
            description: "desc".to_string(),
            capabilities: vec![],
            categories: vec![],
            domains: vec![],
            shard_affinities: HashMap::new(),
            json_schema: None,
            embedding: None,
        }
    }

    #[test]
    fn render_groups_tools_by_tier() {
        let set = CompiledToolSet {
            tools: vec![
                CompiledTool { tool: tool("full"), mode: RenderMode::Full, score: 90.0 },
                CompiledTool { tool: tool("cond"), mode: RenderMode::Condensed, score: 50.0 },
            ],
        };
        let md = render(&set);
        assert!(md.contains("## Primary Tools"));
        assert!(md.contains("## Secondary Tools"));
        assert!(!md.contains("## Additional Tools"));
    }

    #[test]
    fn render_for_invocation_only_includes_full_tier() {
        let set = CompiledToolSet {
            tools: vec![
                CompiledTool { tool: tool("full"), mode: RenderMode::Full, score: 90.0 },
                CompiledTool { tool: tool("minimal"), mode: RenderMode::Minimal, score: 25.0 },
            ],
        };
        let json = render_for_invocation(&set);
        assert_eq!(json["tools"].as_array().unwrap().len(), 1);
    }
}
