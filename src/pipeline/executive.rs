//! Executive Policy (§4.4): selects one `next_action` per tick and emits
//! `pending_action` with a fresh ActionID; hydrates clarification payloads
//! for `/interrogative_mode`; owns the OODA-stall reset.

use super::{ActionId, ActionPipeline};
use crate::kernel::{Fact, FactView, Kernel, Rule, Term};

const CURRENT_INTENT_ID: &str = "current_intent";

/// `next_action(Verb, Target, Payload) :- user_intent(/current_intent, _,
/// Verb, Target, Payload), not executive_processed_intent(/current_intent)`.
/// Self-limiting: once Executive marks the intent processed, this rule
/// stops re-deriving it, so `next_action` doesn't loop without a new
/// intent or an escalation.
pub struct NextActionFromIntentRule;

impl Rule for NextActionFromIntentRule {
    fn head_predicate(&self) -> &str {
        "next_action"
    }

    fn derive(&self, facts: &FactView) -> Vec<Fact> {
        let processed = !facts.query("executive_processed_intent").is_empty();
        if processed {
            return vec![];
        }
        facts
            .query("user_intent")
            .into_iter()
            .filter(|f| f.args.first().and_then(|t| t.as_atom()) == Some(CURRENT_INTENT_ID))
            .filter_map(|f| {
                let verb = f.args.get(2)?.clone();
                let target = f.args.get(3)?.clone();
                let payload = f.args.get(4)?.clone();
                Some(Fact::new("next_action", vec![verb, target, payload]))
            })
            .collect()
    }
}

fn now_ts() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// One Executive tick: pick a `next_action`, emit `pending_action`, and
/// reset OODA stall bookkeeping. Returns `None` if no action is derivable.
pub async fn tick(pipeline: &ActionPipeline) -> Option<ActionId> {
    let kernel = &pipeline.kernel;
    let candidate = kernel.query("next_action").into_iter().next()?;

    let verb = candidate.args[0].clone();
    let mut target = candidate.args[1].clone();
    let mut payload = candidate.args[2].clone();

    let action_id = pipeline.alloc_action_id();

    if verb.as_atom() == Some("interrogative_mode") {
        hydrate_interrogative(kernel, &mut target, &mut payload);
    }

    kernel.assert(Fact::new(
        "pending_action",
        vec![
            Term::str(action_id.clone()),
            verb,
            target,
            payload,
            Term::num(now_ts()),
        ],
    ));

    kernel.assert(Fact::new(
        "executive_processed_intent",
        vec![Term::atom(CURRENT_INTENT_ID)],
    ));

    kernel.retract("ooda_timeout");
    kernel.retract("ooda_stalled");
    kernel.retract_fact(&candidate);

    {
        let mut state = pipeline.state.lock().await;
        state.last_action_emitted_at = Some(std::time::Instant::now());
    }

    Some(action_id)
}

fn hydrate_interrogative(kernel: &Kernel, target: &mut Term, payload: &mut Term) {
    let questions = kernel.query("clarification_question");
    let question = questions
        .iter()
        .find(|f| f.args.first().and_then(|t| t.as_atom()) == Some(CURRENT_INTENT_ID))
        .and_then(|f| f.args.get(1))
        .and_then(|t| t.as_str_val())
        .map(str::to_string)
        .unwrap_or_else(|| "Could you clarify what you'd like me to do?".to_string());

    let options: Vec<serde_json::Value> = kernel
        .query("clarification_option")
        .iter()
        .filter(|f| f.args.first().and_then(|t| t.as_atom()) == Some(CURRENT_INTENT_ID))
        .filter_map(|f| {
            let verb = f.args.get(1)?.as_atom()?.to_string();
            let label = f.args.get(2)?.as_str_val()?.to_string();
            Some(serde_json::json!({ "verb": verb, "label": label }))
        })
        .collect();

    *target = Term::str(question);
    *payload = Term::str(serde_json::json!({ "options": options }).to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineConfig;
    use std::sync::Arc;

    #[tokio::test]
    async fn emits_pending_action_from_intent() {
        let kernel = Arc::new(Kernel::new());
        let pipeline = ActionPipeline::new(kernel.clone(), PipelineConfig::default());
        kernel.assert(Fact::new(
            "user_intent",
            vec![
                Term::atom("current_intent"),
                Term::atom("query"),
                Term::atom("read_file"),
                Term::str("main.rs"),
                Term::str(""),
            ],
        ));

        let action_id = tick(&pipeline).await.expect("action derived");
        let pending = kernel.query("pending_action");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].args[0].as_str_val(), Some(action_id.as_str()));
        assert_eq!(pending[0].args[1].as_atom(), Some("read_file"));

        // Self-limiting: a second tick with no new intent derives nothing.
        assert!(tick(&pipeline).await.is_none());
    }
}
