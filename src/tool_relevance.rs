//! Tool Relevance (§4.5): a context-frame query the Shard Manager performs
//! per spawn. Writes ephemeral facts under a dedicated intent id and
//! retracts them before returning, so tool-relevance scoring can never
//! leave residue that misfires unrelated policy rules (§3 invariant 4,
//! §8 testable property 7).

use crate::kernel::{Fact, Kernel, Term};

const ROUTING_CONTEXT_ID: &str = "tool_routing_context";

/// Runs the assert-query-retract transaction and returns the trimmed,
/// token-budget-fitted list of relevant tool names/descriptions.
pub fn query_relevant_tools(
    kernel: &Kernel,
    shard_type: &str,
    verb: Option<&str>,
    target: &str,
    token_budget: usize,
) -> Vec<String> {
    // 1. Retract any stale frame facts first. Only the frame's own
    //    predicates (never the shared `user_intent` predicate, which
    //    Perception owns for the real current intent).
    retract_frame(kernel);

    // 2. Assert the frame under /routing, not /mutation, so campaign-interrupt
    //    rules (which key off /mutation) cannot misfire.
    kernel.assert(Fact::new("current_shard_type", vec![Term::atom(shard_type)]));
    let routing_intent_fact = verb.map(|verb| {
        Fact::new(
            "user_intent",
            vec![
                Term::atom(ROUTING_CONTEXT_ID),
                Term::atom("routing"),
                Term::atom(verb),
                Term::str(target.to_string()),
                Term::str("_"),
            ],
        )
    });
    if let Some(fact) = &routing_intent_fact {
        kernel.assert(Fact::new("current_intent", vec![Term::atom(ROUTING_CONTEXT_ID)]));
        kernel.assert(fact.clone());
    }

    // 3. Assert current_time.
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    kernel.assert(Fact::new("current_time", vec![Term::num(now as f64)]));

    // 4. Query relevant_tool/2; fall back to all registered tools.
    let mut candidates: Vec<(String, f64)> = kernel
        .query("relevant_tool")
        .into_iter()
        .filter_map(|f| Some((f.args.first()?.as_str_val().or(f.args.first()?.as_atom())?.to_string(), 0.0)))
        .collect();

    if candidates.is_empty() {
        candidates = kernel
            .query("mcp_tool_registered")
            .into_iter()
            .filter_map(|f| {
                let id = f.args.first()?.as_str_val().unwrap_or_default().to_string();
                Some((id, 0.0))
            })
            .collect();
    }

    // 5. Apply tool_base_relevance/3 scores (ToolID, ShardType, Score) and
    //    sort descending.
    let scores: std::collections::HashMap<String, f64> = kernel
        .query("tool_base_relevance")
        .into_iter()
        .filter_map(|f| {
            let id = f.args.first()?.as_str_val()?.to_string();
            let score = f.args.get(2)?.as_num()?;
            Some((id, score))
        })
        .collect();

    for (id, score) in candidates.iter_mut() {
        *score = scores.get(id).copied().unwrap_or(*score);
    }
    candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    // 6. Trim to token budget.
    let fitted = fit_to_budget(candidates.into_iter().map(|(id, _)| id).collect(), token_budget);

    // Retract the ephemeral frame before returning — isolation guarantee.
    // Only the exact routing-context fact is removed from `user_intent`;
    // the shared predicate is otherwise untouched.
    kernel.retract("current_shard_type");
    kernel.retract("current_intent");
    kernel.retract("current_time");
    if let Some(fact) = routing_intent_fact {
        kernel.retract_fact(&fact);
    }

    fitted
}

fn retract_frame(kernel: &Kernel) {
    kernel.retract("current_shard_type");
    kernel.retract("current_intent");
    kernel.retract("current_time");
}

const CHARS_PER_TOKEN: usize = 4;
const TOOL_OVERHEAD_TOKENS: usize = 20;

fn fit_to_budget(tool_ids: Vec<String>, token_budget: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut used = 0usize;
    for id in tool_ids {
        let estimate = id.len() / CHARS_PER_TOKEN + TOOL_OVERHEAD_TOKENS;
        if used + estimate > token_budget {
            break;
        }
        used += estimate;
        out.push(id);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaves_no_residue_after_query() {
        let kernel = Kernel::new();
        kernel.assert(Fact::new(
            "mcp_tool_registered",
            vec![Term::str("fs/read"), Term::str("fs"), Term::num(0.0)],
        ));
        let tools = query_relevant_tools(&kernel, "coder", Some("read"), "main.rs", 2000);
        assert_eq!(tools, vec!["fs/read".to_string()]);

        assert!(kernel.query("current_shard_type").is_empty());
        assert!(kernel.query("current_intent").is_empty());
        assert!(kernel.query("current_time").is_empty());
        assert!(kernel.query("user_intent").is_empty());
    }

    #[test]
    fn trims_to_token_budget() {
        let long_ids: Vec<String> = (0..100).map(|i| format!("tool-id-number-{i}")).collect();
        let fitted = fit_to_budget(long_ids, 100);
        assert!(fitted.len() < 100);
    }
}
