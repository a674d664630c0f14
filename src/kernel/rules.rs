use super::Fact;
use std::collections::HashSet;

/// Read-only view of the current fact set handed to a [`Rule`] during
/// evaluation. Rules may query but never mutate through this handle —
/// mutation only happens through [`super::Kernel::assert`] at the top level.
pub struct FactView<'a> {
    pub(super) edb: &'a HashSet<Fact>,
    pub(super) idb: &'a HashSet<Fact>,
}

impl<'a> FactView<'a> {
    pub fn query(&self, predicate: &str) -> Vec<Fact> {
        self.edb
            .iter()
            .chain(self.idb.iter())
            .filter(|f| f.predicate == predicate)
            .cloned()
            .collect()
    }
}

/// A derivation rule: `head_predicate() :- derive(facts)`.
///
/// `stratum` controls evaluation order — rules in stratum N reach their own
/// fixpoint using only stratum < N's output (plus the EDB) before stratum
/// N+1 rules run. Negation-as-failure style rules (e.g. "no route was
/// found") should live in a stratum higher than the rules producing the
/// facts they test the absence of.
pub trait Rule: Send + Sync {
    fn head_predicate(&self) -> &str;

    fn stratum(&self) -> u32 {
        0
    }

    fn derive(&self, facts: &FactView) -> Vec<Fact>;
}
