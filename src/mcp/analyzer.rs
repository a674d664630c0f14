//! Tool Analyzer (§4.6): derives [`ToolMetadata`] for a newly discovered
//! tool, preferring an LLM pass (tolerant of fenced code blocks) and
//! falling back to keyword-driven inference when no LLM is available.

use super::tool::ToolMetadata;
use crate::llm::LlmClient;
use std::collections::HashMap;

const KNOWN_SHARD_TYPES: &[&str] = &["coder", "researcher", "reviewer", "planner"];

pub struct Analyzer<'a> {
    pub llm: Option<&'a dyn LlmClient>,
}

impl<'a> Analyzer<'a> {
    pub fn new(llm: Option<&'a dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn analyze(&self, tool_name: &str, tool_description: &str) -> ToolMetadata {
        if let Some(llm) = self.llm {
            let prompt = build_prompt(tool_name, tool_description);
            if let Ok(response) = llm.complete(&prompt).await {
                if let Some(metadata) = parse_llm_response(&response) {
                    return metadata;
                }
            }
        }
        keyword_inference(tool_description)
    }
}

fn build_prompt(tool_name: &str, tool_description: &str) -> String {
    format!(
        "Classify the tool \"{tool_name}\" described as: \"{tool_description}\".\n\
         Respond with JSON: {{\"categories\": [...], \"capabilities\": [...], \"domains\": [...], \
         \"shard_affinities\": {{\"coder\": 0-100, ...}}}}."
    )
}

/// Strips a fenced code block if present, then parses as JSON, tolerant of
/// surrounding prose the model may add despite instructions.
fn parse_llm_response(response: &str) -> Option<ToolMetadata> {
    let json_slice = extract_json_block(response)?;
    let raw: serde_json::Value = serde_json::from_str(json_slice).ok()?;
    Some(normalize(raw))
}

fn extract_json_block(response: &str) -> Option<&str> {
    if let Some(start) = response.find("```") {
        let after_fence = &response[start + 3..];
        let after_fence = after_fence.strip_prefix("json").unwrap_or(after_fence);
        if let Some(end) = after_fence.find("```") {
            return Some(after_fence[..end].trim());
        }
    }
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    if end > start {
        Some(&response[start..=end])
    } else {
        None
    }
}

fn normalize(raw: serde_json::Value) -> ToolMetadata {
    let categories = string_array(&raw, "categories");
    let capabilities = if string_array(&raw, "capabilities").is_empty() {
        vec!["read".to_string()]
    } else {
        string_array(&raw, "capabilities")
    };
    let domains = if string_array(&raw, "domains").is_empty() {
        vec!["general".to_string()]
    } else {
        string_array(&raw, "domains")
    };

    let mut shard_affinities = HashMap::new();
    if let Some(obj) = raw.get("shard_affinities").and_then(|v| v.as_object()) {
        for (k, v) in obj {
            if let Some(n) = v.as_f64() {
                shard_affinities.insert(k.clone(), n.clamp(0.0, 100.0));
            }
        }
    }
    if shard_affinities.is_empty() {
        for shard_type in KNOWN_SHARD_TYPES {
            shard_affinities.insert(shard_type.to_string(), 50.0);
        }
    }

    ToolMetadata {
        categories,
        capabilities,
        domains,
        shard_affinities,
    }
}

fn string_array(raw: &serde_json::Value, key: &str) -> Vec<String> {
    raw.get(key)
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

/// Keyword-driven fallback used when no LLM is configured.
fn keyword_inference(description: &str) -> ToolMetadata {
    let lower = description.to_lowercase();
    let mut capabilities = Vec::new();
    if lower.contains("write") || lower.contains("edit") || lower.contains("create") {
        capabilities.push("write".to_string());
    }
    if lower.contains("exec") || lower.contains("run") || lower.contains("command") {
        capabilities.push("exec".to_string());
    }
    if capabilities.is_empty() {
        capabilities.push("read".to_string());
    }

    let domain = if lower.contains("file") || lower.contains("path") {
        "filesystem"
    } else if lower.contains("web") || lower.contains("http") || lower.contains("url") {
        "web"
    } else if lower.contains("git") {
        "vcs"
    } else {
        "general"
    };

    let mut shard_affinities = HashMap::new();
    for shard_type in KNOWN_SHARD_TYPES {
        shard_affinities.insert(shard_type.to_string(), 50.0);
    }

    ToolMetadata {
        categories: vec![domain.to_string()],
        capabilities,
        domains: vec![domain.to_string()],
        shard_affinities,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_inference_detects_write_capability() {
        let metadata = keyword_inference("writes content to a file on disk");
        assert!(metadata.capabilities.contains(&"write".to_string()));
        assert_eq!(metadata.domains, vec!["filesystem".to_string()]);
    }

    #[test]
    fn parse_llm_response_handles_fenced_json() {
        let response = "Sure, here you go:\n```json\n{\"categories\": [\"fs\"], \"capabilities\": [\"read\"], \"domains\": [\"filesystem\"], \"shard_affinities\": {\"coder\": 80}}\n```";
        let metadata = parse_llm_response(response).expect("parses");
        assert_eq!(metadata.categories, vec!["fs".to_string()]);
        assert_eq!(metadata.shard_affinities.get("coder"), Some(&80.0));
    }

    #[test]
    fn parse_llm_response_normalizes_unknown_fields_to_defaults() {
        let metadata = parse_llm_response("{}").expect("parses empty object");
        assert_eq!(metadata.capabilities, vec!["read".to_string()]);
        assert_eq!(metadata.domains, vec!["general".to_string()]);
    }
}
