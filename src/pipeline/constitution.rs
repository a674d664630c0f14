//! Constitution Gate (§4.4): evaluates safety rules against each
//! `pending_action`'s type/target/payload and emits a permit/deny verdict
//! keyed by ActionID (never by action type — invariant 5).

use crate::kernel::{Fact, Kernel, Term};

/// A safety rule inspects a pending action's full payload (not just its
/// type/target) and may deny it with a reason. Grounded in the teacher's
/// `is_destructive_tool`/`permission_target_summary` style of per-tool
/// content inspection.
pub trait SafetyRule: Send + Sync {
    fn evaluate(&self, action_type: &str, target: &str, payload: &str) -> Option<String>;
}

/// Denies shell commands containing well-known destructive patterns.
pub struct DestructiveCommandRule;

impl SafetyRule for DestructiveCommandRule {
    fn evaluate(&self, action_type: &str, target: &str, payload: &str) -> Option<String> {
        if action_type != "exec_cmd" {
            return None;
        }
        const DENY_PATTERNS: &[&str] = &["rm -rf /", "mkfs", ":(){ :|:& };:"];
        let haystack = format!("{target} {payload}");
        DENY_PATTERNS
            .iter()
            .find(|p| haystack.contains(*p))
            .map(|p| format!("destructive command pattern detected: {p}"))
    }
}

fn default_rules() -> Vec<Box<dyn SafetyRule>> {
    vec![Box::new(DestructiveCommandRule)]
}

fn now_ts() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Evaluates the pending action with `action_id` against the default
/// safety rule set, emitting `permission_check_result` and, on permit,
/// `permitted_action` + `action_permitted`. Returns whether it was permitted.
pub async fn check(kernel: &Kernel, action_id: &str) -> bool {
    check_with_rules(kernel, action_id, &default_rules()).await
}

pub async fn check_with_rules(kernel: &Kernel, action_id: &str, rules: &[Box<dyn SafetyRule>]) -> bool {
    let Some(pending) = kernel
        .query("pending_action")
        .into_iter()
        .find(|f| f.args[0].as_str_val() == Some(action_id))
    else {
        return false;
    };

    let action_type = pending.args[1].as_atom().unwrap_or_default().to_string();
    let target = pending.args[2]
        .as_str_val()
        .or_else(|| pending.args[2].as_atom())
        .unwrap_or_default()
        .to_string();
    let payload = pending.args[3]
        .as_str_val()
        .or_else(|| pending.args[3].as_atom())
        .unwrap_or_default()
        .to_string();

    let denial_reason = rules.iter().find_map(|r| r.evaluate(&action_type, &target, &payload));

    match denial_reason {
        None => {
            kernel.assert(Fact::new(
                "permission_check_result",
                vec![
                    Term::str(action_id.to_string()),
                    Term::atom("permit"),
                    Term::str(""),
                    Term::num(now_ts()),
                ],
            ));
            kernel.assert(Fact::new(
                "permitted_action",
                vec![
                    Term::str(action_id.to_string()),
                    pending.args[1].clone(),
                    pending.args[2].clone(),
                    pending.args[3].clone(),
                    Term::num(now_ts()),
                ],
            ));
            kernel.assert(Fact::new("action_permitted", vec![Term::str(action_id.to_string())]));
            true
        }
        Some(reason) => {
            kernel.assert(Fact::new(
                "permission_check_result",
                vec![
                    Term::str(action_id.to_string()),
                    Term::atom("deny"),
                    Term::str(reason),
                    Term::num(now_ts()),
                ],
            ));
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Kernel;

    #[tokio::test]
    async fn permits_benign_action() {
        let kernel = Kernel::new();
        kernel.assert(Fact::new(
            "pending_action",
            vec![
                Term::str("A1"),
                Term::atom("read_file"),
                Term::str("main.rs"),
                Term::str(""),
                Term::num(0.0),
            ],
        ));
        assert!(check(&kernel, "A1").await);
        assert_eq!(kernel.query("action_permitted").len(), 1);
    }

    #[tokio::test]
    async fn denies_destructive_command() {
        let kernel = Kernel::new();
        kernel.assert(Fact::new(
            "pending_action",
            vec![
                Term::str("A2"),
                Term::atom("exec_cmd"),
                Term::str("rm -rf /"),
                Term::str(""),
                Term::num(0.0),
            ],
        ));
        assert!(!check(&kernel, "A2").await);
        assert!(kernel.query("action_permitted").is_empty());
        let verdict = kernel.query("permission_check_result");
        assert_eq!(verdict[0].args[1].as_atom(), Some("deny"));
    }
}
