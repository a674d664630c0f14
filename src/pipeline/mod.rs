//! OODA Action Pipeline (§4.4): Perception → Executive → Constitution →
//! Router → Execution, correlated by a single ActionID across five fact
//! records. Each stage is a plain struct operating on the shared kernel
//! rather than a spawned shard task — all four are "system-type" in the
//! sense that they run synchronously as part of driving one action through
//! to completion, matching the state machine in §4.4.

pub mod constitution;
pub mod executive;
pub mod execution;
pub mod perception;
pub mod router;

use crate::kernel::{Fact, Kernel, Term};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

pub type ActionId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionState {
    Pending,
    PermissionChecked,
    Permitted,
    Denied,
    Routed,
    RoutingFailed,
    Executed,
    ExecutionFailed,
}

impl ActionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ActionState::Denied
                | ActionState::RoutingFailed
                | ActionState::Executed
                | ActionState::ExecutionFailed
        )
    }
}

#[derive(Default)]
pub struct OodaState {
    pub last_intent_at: Option<Instant>,
    pub last_action_emitted_at: Option<Instant>,
    pub boot_guard: bool,
    pub clarification_counts: std::collections::HashMap<String, u32>,
}

pub struct PipelineConfig {
    pub stall_window: Duration,
    pub ambiguity_confidence_threshold: f64,
    pub learning_candidate_threshold: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stall_window: Duration::from_secs(30),
            ambiguity_confidence_threshold: 0.70,
            learning_candidate_threshold: 3,
        }
    }
}

/// Shared driver for the four pipeline stages. Owns the ActionID allocator
/// and the OODA-stall bookkeeping; the kernel itself is the only other
/// shared resource (per §9, reached by handle, not by back-pointer).
pub struct ActionPipeline {
    pub kernel: Arc<Kernel>,
    pub config: PipelineConfig,
    pub state: Mutex<OodaState>,
    action_counter: AtomicU64,
    pub router: router::TactileRouter,
}

impl ActionPipeline {
    pub fn new(kernel: Arc<Kernel>, config: PipelineConfig) -> Self {
        kernel.register_rule(Box::new(executive::NextActionFromIntentRule));
        Self {
            kernel,
            config,
            state: Mutex::new(OodaState::default()),
            action_counter: AtomicU64::new(0),
            router: router::TactileRouter::new(),
        }
    }

    pub fn alloc_action_id(&self) -> ActionId {
        let n = self.action_counter.fetch_add(1, Ordering::SeqCst);
        format!("A{n}")
    }

    pub fn set_boot_guard(&self, active: bool) {
        // Avoid blocking async tests on a sync mutex here: this is only
        // called from setup, never from the hot loop.
        if let Ok(mut state) = self.state.try_lock() {
            state.boot_guard = active;
        }
    }

    /// Runs one full perception->execution pass for `input`, returning the
    /// ActionID if an action was derived and executed, or `None` if
    /// perception alone couldn't map the input to an action.
    pub async fn process_input(&self, input: &str) -> Option<ActionId> {
        perception::perceive(&self.kernel, &self.config, &self.state, input).await;
        self.drive_tick().await
    }

    /// Runs one Executive→Constitution→Router→Execution tick, assuming
    /// Perception has already asserted (or not) a `user_intent`. Used both
    /// by `process_input` and directly by tests that assert facts by hand.
    pub async fn drive_tick(&self) -> Option<ActionId> {
        let action_id = executive::tick(self).await?;
        let permitted = constitution::check(&self.kernel, &action_id).await;
        if !permitted {
            return Some(action_id);
        }
        router::route(self, &action_id).await;
        Some(action_id)
    }

    /// Checks the OODA stall window and, unless in boot-guard, asserts
    /// `ooda_timeout()` and an escalation action. Callers run this
    /// periodically (e.g. the CLI's idle loop); tests call it directly
    /// with a manipulated clock via `stall_window`.
    pub async fn check_stall(&self) {
        let state = self.state.lock().await;
        if state.boot_guard {
            return;
        }
        let Some(last) = state.last_intent_at else {
            return;
        };
        if state.last_action_emitted_at.map(|t| t > last).unwrap_or(false) {
            return;
        }
        if last.elapsed() >= self.config.stall_window {
            drop(state);
            self.kernel.assert(Fact::new("ooda_timeout", vec![]));
            self.kernel.assert(Fact::new(
                "ooda_stalled",
                vec![Term::atom("no_action_within_stall_window")],
            ));
            self.kernel.assert(Fact::new(
                "next_action",
                vec![Term::atom("escalate_to_user"), Term::str(""), Term::str("")],
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::execution::{ExecutionOutcome, ReadFileHandler};
    use crate::pipeline::router::ActionHandler;
    use std::sync::Arc;

    fn short_stall_config() -> PipelineConfig {
        PipelineConfig {
            stall_window: Duration::from_millis(10),
            ..PipelineConfig::default()
        }
    }

    /// Drives a full read action through Perception->Executive->
    /// Constitution->Router->Execution and checks all five stage facts
    /// share the same ActionID, matching the correlation invariant.
    #[tokio::test]
    async fn read_action_correlates_one_action_id_across_all_stages() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.rs"), b"fn main() {}").unwrap();

        let kernel = Arc::new(Kernel::new());
        let pipeline = ActionPipeline::new(kernel.clone(), PipelineConfig::default());
        pipeline.router.register(
            "read_file",
            Arc::new(ReadFileHandler { root: dir.path().to_path_buf() }),
        );

        let action_id = pipeline
            .process_input("read main.rs")
            .await
            .expect("read action should be derived and routed");

        let pending = kernel.query("pending_action");
        assert_eq!(pending[0].args[0].as_str_val(), Some(action_id.as_str()));

        let permitted = kernel.query("permitted_action");
        assert_eq!(permitted[0].args[0].as_str_val(), Some(action_id.as_str()));

        let routing = kernel.query("routing_result");
        assert_eq!(routing[0].args[0].as_str_val(), Some(action_id.as_str()));
        assert_eq!(routing[0].args[1].as_atom(), Some("success"));

        let execution = kernel.query("execution_result");
        assert_eq!(execution[0].args[0].as_str_val(), Some(action_id.as_str()));
        assert_eq!(execution[0].args[3].as_atom(), Some("success"));

        // `action_permitted(ActionID)` is retracted on route-hit.
        assert!(kernel.query("action_permitted").is_empty());
    }

    /// An action type with no bound handler escalates to the user instead
    /// of silently vanishing.
    #[tokio::test]
    async fn unmapped_action_type_escalates_to_user() {
        let kernel = Arc::new(Kernel::new());
        let pipeline = ActionPipeline::new(kernel.clone(), PipelineConfig::default());

        // No handler registered for "search".
        let action_id = pipeline
            .process_input("search for TODO")
            .await
            .expect("a pending_action should still be derived");

        let routing = kernel.query("routing_result");
        assert_eq!(routing[0].args[0].as_str_val(), Some(action_id.as_str()));
        assert_eq!(routing[0].args[1].as_atom(), Some("failure"));

        let no_action = kernel.query("no_action_reason");
        assert_eq!(no_action[0].args[1].as_atom(), Some("no_route"));

        let escalation = kernel
            .query("next_action")
            .into_iter()
            .find(|f| f.args.first().and_then(|t| t.as_atom()) == Some("escalate_to_user"));
        assert!(escalation.is_some());
    }

    /// Constitution denies a destructive exec_cmd, so Router/Execution
    /// never run for that ActionID.
    #[tokio::test]
    async fn denied_action_never_reaches_router() {
        struct NeverCalled;
        #[async_trait::async_trait]
        impl ActionHandler for NeverCalled {
            async fn handle(&self, _target: &str, _payload: &str) -> ExecutionOutcome {
                panic!("router must not invoke a handler for a denied action");
            }
        }

        let kernel = Arc::new(Kernel::new());
        let pipeline = ActionPipeline::new(kernel.clone(), PipelineConfig::default());
        pipeline.router.register("exec_cmd", Arc::new(NeverCalled));

        let action_id = pipeline
            .process_input("run rm -rf /")
            .await
            .expect("a pending_action should still be derived");

        let check = kernel.query("permission_check_result");
        assert_eq!(check[0].args[0].as_str_val(), Some(action_id.as_str()));
        assert_eq!(check[0].args[1].as_atom(), Some("deny"));
        assert!(kernel.query("permitted_action").is_empty());
        assert!(kernel.query("routing_result").is_empty());
    }

    /// Outside the boot guard, a stalled intent with no derived action
    /// emits `ooda_timeout` and an escalation; inside the boot guard it
    /// stays silent.
    #[tokio::test]
    async fn stall_detection_respects_boot_guard() {
        let kernel = Arc::new(Kernel::new());
        let pipeline = ActionPipeline::new(kernel.clone(), short_stall_config());

        pipeline.set_boot_guard(true);
        kernel.assert(Fact::new(
            "user_intent",
            vec![
                Term::atom("current_intent"),
                Term::atom("interrogative"),
                Term::atom("interrogative_mode"),
                Term::str(""),
                Term::str(""),
            ],
        ));
        {
            let mut state = pipeline.state.lock().await;
            state.last_intent_at = Some(std::time::Instant::now());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        pipeline.check_stall().await;
        assert!(kernel.query("ooda_timeout").is_empty());
        assert!(kernel.query("ooda_stalled").is_empty());

        pipeline.set_boot_guard(false);
        tokio::time::sleep(Duration::from_millis(20)).await;
        pipeline.check_stall().await;
        assert_eq!(kernel.query("ooda_timeout").len(), 1);
        let stalled = kernel.query("ooda_stalled");
        assert_eq!(stalled.len(), 1);
        assert_eq!(stalled[0].args[0].as_atom(), Some("no_action_within_stall_window"));
    }

    /// A new `user_intent` clears a previously asserted `ooda_stalled`.
    #[tokio::test]
    async fn new_intent_retracts_ooda_stalled() {
        let kernel = Arc::new(Kernel::new());
        let pipeline = ActionPipeline::new(kernel.clone(), short_stall_config());

        kernel.assert(Fact::new(
            "user_intent",
            vec![
                Term::atom("current_intent"),
                Term::atom("interrogative"),
                Term::atom("interrogative_mode"),
                Term::str(""),
                Term::str(""),
            ],
        ));
        {
            let mut state = pipeline.state.lock().await;
            state.last_intent_at = Some(std::time::Instant::now());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        pipeline.check_stall().await;
        assert_eq!(kernel.query("ooda_stalled").len(), 1);

        pipeline.process_input("read main.rs").await;
        assert!(kernel.query("ooda_stalled").is_empty());
    }
}
