//! The logic kernel: a small Datalog-style fact/rule store.
//!
//! Facts are asserted into the EDB (externally asserted) and rules derive
//! additional facts (the IDB) to a fixpoint after every top-level batch of
//! `assert`/`retract` calls. Evaluation is stratified: rules in a lower
//! stratum reach their own fixpoint before rules in a higher stratum are
//! allowed to read their output.

mod rules;

pub use rules::{FactView, Rule};

use std::collections::HashSet;
use std::sync::Mutex;
use tracing::debug;

/// Predicate heads the learned-rule (autopoiesis) layer may never define.
/// Built-in rules registered by the core are not subject to this list.
pub const PROTECTED_HEADS: &[&str] = &["permitted", "safe_action"];

#[derive(thiserror::Error, Debug)]
pub enum KernelError {
    #[error("rule head '{0}' is protected and cannot be defined by a learned rule")]
    ProtectedHead(String),
}

/// A single argument to a fact. Atoms are conventionally written with a
/// leading slash in the specification (`/success`, `/permit`, ...); this
/// type distinguishes them from plain strings so callers can't confuse
/// `/running` the atom with `"running"` the string payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Atom(String),
    Str(String),
    Num(f64),
    Bool(bool),
}

impl Term {
    pub fn atom(s: impl Into<String>) -> Self {
        let s = s.into();
        Term::Atom(s.trim_start_matches('/').to_string())
    }

    pub fn str(s: impl Into<String>) -> Self {
        Term::Str(s.into())
    }

    pub fn num(n: impl Into<f64>) -> Self {
        Term::Num(n.into())
    }

    pub fn as_atom(&self) -> Option<&str> {
        match self {
            Term::Atom(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_str_val(&self) -> Option<&str> {
        match self {
            Term::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_num(&self) -> Option<f64> {
        match self {
            Term::Num(n) => Some(*n),
            _ => None,
        }
    }
}

impl std::fmt::Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Term::Atom(a) => write!(f, "/{a}"),
            Term::Str(s) => write!(f, "{s:?}"),
            Term::Num(n) => write!(f, "{n}"),
            Term::Bool(b) => write!(f, "{b}"),
        }
    }
}

// f64 has no total Eq/Hash; facts are compared/hashed bit-wise, which is
// fine here since we never expect NaN payloads in practice.
impl Eq for Term {}
impl std::hash::Hash for Term {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            Term::Atom(a) => {
                0u8.hash(state);
                a.hash(state);
            }
            Term::Str(s) => {
                1u8.hash(state);
                s.hash(state);
            }
            Term::Num(n) => {
                2u8.hash(state);
                n.to_bits().hash(state);
            }
            Term::Bool(b) => {
                3u8.hash(state);
                b.hash(state);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fact {
    pub predicate: String,
    pub args: Vec<Term>,
}

impl Fact {
    pub fn new(predicate: impl Into<String>, args: Vec<Term>) -> Self {
        Self {
            predicate: predicate.into(),
            args,
        }
    }

    /// Does this fact match a predicate-only wildcard retraction.
    fn matches_predicate(&self, predicate: &str) -> bool {
        self.predicate == predicate
    }
}

#[derive(Default)]
struct KernelState {
    edb: HashSet<Fact>,
    idb: HashSet<Fact>,
    rules: Vec<Box<dyn Rule>>,
}

impl KernelState {
    fn all_of(&self, predicate: &str) -> Vec<Fact> {
        self.edb
            .iter()
            .chain(self.idb.iter())
            .filter(|f| f.predicate == predicate)
            .cloned()
            .collect()
    }

    /// Re-derive the IDB from scratch, stratum by stratum, to fixpoint.
    /// Facts are re-derived each batch rather than incrementally — correct
    /// and simple, which the spec favors ("prefer LoadFacts batches ... to
    /// avoid re-evaluation storms", i.e. batch rather than streaming).
    fn evaluate(&mut self) {
        self.idb.clear();
        let mut strata: Vec<u32> = self.rules.iter().map(|r| r.stratum()).collect();
        strata.sort_unstable();
        strata.dedup();

        for stratum in strata {
            loop {
                let mut added = false;
                let snapshot = FactView {
                    edb: &self.edb,
                    idb: &self.idb,
                };
                let mut new_facts = Vec::new();
                for rule in self.rules.iter().filter(|r| r.stratum() == stratum) {
                    for fact in rule.derive(&snapshot) {
                        new_facts.push(fact);
                    }
                }
                for fact in new_facts {
                    if !self.edb.contains(&fact) && self.idb.insert(fact) {
                        added = true;
                    }
                }
                if !added {
                    break;
                }
            }
        }
    }
}

/// Thread-safe, single-writer logic kernel. All mutation goes through a
/// mutex; readers take the same lock, matching the spec's "kernel is
/// shared mutable state; all writers must serialize."
pub struct Kernel {
    state: Mutex<KernelState>,
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(KernelState::default()),
        }
    }

    /// Register a built-in rule. Not subject to the protected-head deny-list.
    pub fn register_rule(&self, rule: Box<dyn Rule>) {
        let mut state = self.state.lock().unwrap();
        state.rules.push(rule);
        state.evaluate();
    }

    /// Register a rule proposed by the learned/autopoiesis layer. Rejected
    /// if its head predicate is in [`PROTECTED_HEADS`].
    pub fn register_learned_rule(&self, rule: Box<dyn Rule>) -> Result<(), KernelError> {
        if PROTECTED_HEADS.contains(&rule.head_predicate()) {
            return Err(KernelError::ProtectedHead(rule.head_predicate().to_string()));
        }
        let mut state = self.state.lock().unwrap();
        state.rules.push(rule);
        state.evaluate();
        Ok(())
    }

    pub fn assert(&self, fact: Fact) {
        let mut state = self.state.lock().unwrap();
        debug!(predicate = %fact.predicate, "kernel assert");
        state.edb.insert(fact);
        state.evaluate();
    }

    /// Batch ingestion without intermediate fixpoints between facts —
    /// only one evaluation after the whole batch lands.
    pub fn load_facts(&self, facts: Vec<Fact>) {
        let mut state = self.state.lock().unwrap();
        debug!(count = facts.len(), "kernel load_facts batch");
        for fact in facts {
            state.edb.insert(fact);
        }
        state.evaluate();
    }

    pub fn retract_fact(&self, fact: &Fact) {
        let mut state = self.state.lock().unwrap();
        state.edb.remove(fact);
        state.evaluate();
    }

    /// Remove all EDB facts for a predicate. No-op if none exist.
    pub fn retract(&self, predicate: &str) {
        let mut state = self.state.lock().unwrap();
        state.edb.retain(|f| !f.matches_predicate(predicate));
        state.evaluate();
    }

    pub fn query(&self, predicate: &str) -> Vec<Fact> {
        let state = self.state.lock().unwrap();
        state.all_of(predicate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assert_retract_query_round_trip() {
        let kernel = Kernel::new();
        let fact = Fact::new("active_shard", vec![Term::str("s1"), Term::atom("coder")]);
        kernel.assert(fact.clone());
        assert_eq!(kernel.query("active_shard").len(), 1);

        kernel.retract_fact(&fact);
        assert!(kernel.query("active_shard").is_empty());
    }

    #[test]
    fn retract_nonexistent_is_noop() {
        let kernel = Kernel::new();
        let fact = Fact::new("nope", vec![]);
        // Must not panic.
        kernel.retract_fact(&fact);
        kernel.retract("nope");
        assert!(kernel.query("nope").is_empty());
    }

    #[test]
    fn wildcard_retract_by_predicate() {
        let kernel = Kernel::new();
        kernel.assert(Fact::new("user_intent", vec![Term::atom("current_intent")]));
        kernel.assert(Fact::new("user_intent", vec![Term::atom("other")]));
        kernel.retract("user_intent");
        assert!(kernel.query("user_intent").is_empty());
    }

    struct DerivedIsReady;
    impl Rule for DerivedIsReady {
        fn head_predicate(&self) -> &str {
            "ready"
        }
        fn derive(&self, facts: &FactView) -> Vec<Fact> {
            facts
                .query("active_shard")
                .into_iter()
                .map(|f| Fact::new("ready", vec![f.args[0].clone()]))
                .collect()
        }
    }

    #[test]
    fn rules_derive_to_fixpoint() {
        let kernel = Kernel::new();
        kernel.register_rule(Box::new(DerivedIsReady));
        kernel.assert(Fact::new("active_shard", vec![Term::str("s1")]));
        assert_eq!(kernel.query("ready").len(), 1);
        kernel.retract("active_shard");
        assert!(kernel.query("ready").is_empty());
    }

    struct ProtectedRule;
    impl Rule for ProtectedRule {
        fn head_predicate(&self) -> &str {
            "permitted"
        }
        fn derive(&self, _facts: &FactView) -> Vec<Fact> {
            vec![]
        }
    }

    #[test]
    fn learned_rules_cannot_define_protected_heads() {
        let kernel = Kernel::new();
        let err = kernel.register_learned_rule(Box::new(ProtectedRule)).unwrap_err();
        assert!(matches!(err, KernelError::ProtectedHead(h) if h == "permitted"));
    }
}
