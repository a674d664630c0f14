//! Perception Firewall (§4.4): turns natural-language input into a
//! `user_intent` fact via a heuristic parser, falling back to
//! `intent_unmapped`/`intent_unknown` and an ambiguity flag when the verb
//! can't be resolved with confidence.

use super::{OodaState, PipelineConfig};
use crate::kernel::{Fact, Kernel, Term};
use tokio::sync::Mutex;

const CURRENT_INTENT_ID: &str = "current_intent";

/// `(pattern substring, category, verb)`. A minimal stand-in for the
/// taxonomy/action-mapping table the spec treats as an external
/// collaborator: this core only needs a deterministic mapping to exercise
/// the pipeline end to end.
const TAXONOMY: &[(&str, &str, &str)] = &[
    ("show me", "query", "read_file"),
    ("read", "query", "read_file"),
    ("run", "mutation", "exec_cmd"),
    ("edit", "mutation", "write_file"),
    ("write", "mutation", "write_file"),
    ("search", "query", "search"),
    ("fetch", "query", "web_fetch"),
];

struct ParseResult {
    category: String,
    verb: String,
    target: String,
    confidence: f64,
}

fn heuristic_parse(input: &str) -> Option<ParseResult> {
    let lower = input.to_lowercase();
    for (pattern, category, verb) in TAXONOMY {
        if let Some(pos) = lower.find(pattern) {
            let rest = input[pos + pattern.len()..].trim().to_string();
            return Some(ParseResult {
                category: category.to_string(),
                verb: verb.to_string(),
                target: rest,
                confidence: 0.95,
            });
        }
    }
    None
}

/// Extracts a plausible verb-shaped token even when it's not in the
/// taxonomy, so we can distinguish "unmapped verb" from "no verb at all".
fn guess_verb(input: &str) -> Option<String> {
    input.split_whitespace().next().map(|s| s.to_lowercase())
}

pub async fn perceive(
    kernel: &Kernel,
    config: &PipelineConfig,
    state: &Mutex<OodaState>,
    input: &str,
) {
    // Retract prior intent and its processed marker before asserting new one
    // (invariant: at most one user_intent(/current_intent, ...) at a time).
    kernel.retract("user_intent");
    kernel.retract("executive_processed_intent");
    kernel.retract("ooda_stalled");

    {
        let mut state = state.lock().await;
        state.last_intent_at = Some(std::time::Instant::now());
        state.last_action_emitted_at = None;
    }

    match heuristic_parse(input) {
        Some(parsed) if parsed.confidence >= config.ambiguity_confidence_threshold => {
            kernel.assert(Fact::new(
                "user_intent",
                vec![
                    Term::atom(CURRENT_INTENT_ID),
                    Term::atom(&parsed.category),
                    Term::atom(&parsed.verb),
                    Term::str(parsed.target),
                    Term::str(""),
                ],
            ));
        }
        Some(parsed) => {
            kernel.assert(Fact::new(
                "focus_resolution",
                vec![
                    Term::atom(CURRENT_INTENT_ID),
                    Term::atom(&parsed.verb),
                    Term::str(parsed.target.clone()),
                ],
            ));
            kernel.assert(Fact::new(
                "ambiguity_flag",
                vec![
                    Term::atom(CURRENT_INTENT_ID),
                    Term::str("confidence below threshold"),
                    Term::num(config.ambiguity_confidence_threshold),
                ],
            ));
            let count = bump_clarification_counter(state, &parsed.verb).await;
            if count >= config.learning_candidate_threshold {
                assert_learning_candidate(kernel, input, &parsed.verb, &parsed.target);
            }
            kernel.assert(Fact::new(
                "user_intent",
                vec![
                    Term::atom(CURRENT_INTENT_ID),
                    Term::atom("interrogative"),
                    Term::atom("interrogative_mode"),
                    Term::str(parsed.target),
                    Term::str(""),
                ],
            ));
        }
        None => match guess_verb(input) {
            Some(verb) if !verb.is_empty() => {
                kernel.assert(Fact::new(
                    "intent_unmapped",
                    vec![Term::str(verb.clone()), Term::atom("unknown_verb")],
                ));
                let count = bump_clarification_counter(state, &verb).await;
                if count >= config.learning_candidate_threshold {
                    assert_learning_candidate(kernel, input, &verb, input);
                }
                kernel.assert(Fact::new(
                    "user_intent",
                    vec![
                        Term::atom(CURRENT_INTENT_ID),
                        Term::atom("interrogative"),
                        Term::atom("interrogative_mode"),
                        Term::str(input.to_string()),
                        Term::str(""),
                    ],
                ));
            }
            _ => {
                kernel.assert(Fact::new(
                    "intent_unknown",
                    vec![Term::str(input.to_string()), Term::atom("no_verb_match")],
                ));
            }
        },
    }
}

async fn bump_clarification_counter(state: &Mutex<OodaState>, verb: &str) -> u32 {
    let mut state = state.lock().await;
    let count = state.clarification_counts.entry(verb.to_string()).or_insert(0);
    *count += 1;
    *count
}

/// Emits `learning_candidate(Phrase, Verb, Target, Reason)` once a verb's
/// clarification count reaches the configured threshold (Invariant #6: a
/// learning candidate is raised for human review, never auto-promoted into
/// the taxonomy by this layer).
fn assert_learning_candidate(kernel: &Kernel, phrase: &str, verb: &str, target: &str) {
    kernel.assert(Fact::new(
        "learning_candidate",
        vec![
            Term::str(phrase.to_string()),
            Term::str(verb.to_string()),
            Term::str(target.to_string()),
            Term::atom("repeated_clarification"),
        ],
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineConfig;

    #[tokio::test]
    async fn maps_known_verb_to_user_intent() {
        let kernel = Kernel::new();
        let state = Mutex::new(OodaState::default());
        perceive(&kernel, &PipelineConfig::default(), &state, "show me main.rs").await;

        let facts = kernel.query("user_intent");
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].args[2].as_atom(), Some("read_file"));
        assert_eq!(facts[0].args[3].as_str_val(), Some("main.rs"));
    }

    #[tokio::test]
    async fn unknown_verb_triggers_clarification() {
        let kernel = Kernel::new();
        let state = Mutex::new(OodaState::default());
        perceive(&kernel, &PipelineConfig::default(), &state, "frobnicate the widget").await;

        assert_eq!(kernel.query("intent_unmapped").len(), 1);
        let intents = kernel.query("user_intent");
        assert_eq!(intents[0].args[2].as_atom(), Some("interrogative_mode"));
    }

    /// Low-confidence matches emit `focus_resolution` alongside the
    /// ambiguity flag, not just the interrogative fallback intent.
    #[tokio::test]
    async fn low_confidence_match_emits_focus_resolution() {
        let kernel = Kernel::new();
        let state = Mutex::new(OodaState::default());
        let config = PipelineConfig {
            ambiguity_confidence_threshold: 0.99,
            ..PipelineConfig::default()
        };
        perceive(&kernel, &config, &state, "read main.rs").await;

        let focus = kernel.query("focus_resolution");
        assert_eq!(focus.len(), 1);
        assert_eq!(focus[0].args[1].as_atom(), Some("read_file"));
        assert_eq!(kernel.query("ambiguity_flag").len(), 1);
    }

    /// Thrice-repeated failures on the same verb raise a learning candidate;
    /// below the threshold, nothing is asserted (no auto-promotion, ever).
    #[tokio::test]
    async fn repeated_unmapped_verb_becomes_learning_candidate_at_threshold() {
        let kernel = Kernel::new();
        let state = Mutex::new(OodaState::default());
        let config = PipelineConfig::default();
        assert_eq!(config.learning_candidate_threshold, 3);

        for _ in 0..2 {
            perceive(&kernel, &config, &state, "frobnicate the widget").await;
            assert!(kernel.query("learning_candidate").is_empty());
        }
        perceive(&kernel, &config, &state, "frobnicate the widget").await;

        let candidates = kernel.query("learning_candidate");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].args[1].as_str_val(), Some("frobnicate"));
        assert_eq!(candidates[0].args[3].as_atom(), Some("repeated_clarification"));
    }

    #[tokio::test]
    async fn retracts_prior_intent_before_asserting_new_one() {
        let kernel = Kernel::new();
        let state = Mutex::new(OodaState::default());
        perceive(&kernel, &PipelineConfig::default(), &state, "read main.rs").await;
        perceive(&kernel, &PipelineConfig::default(), &state, "run tests.sh").await;

        let facts = kernel.query("user_intent");
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].args[2].as_atom(), Some("exec_cmd"));
    }
}
