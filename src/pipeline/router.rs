//! Tactile Router (§4.4): matches a `permitted_action`'s type against a
//! route table, invokes the bound handler, and emits `routing_result`.
//! On a miss, derives clarification/escalation next-actions via
//! `routing_failed` categorization.

use super::{execution, ActionId, ActionPipeline};
use crate::kernel::{Fact, Term};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

const CURRENT_INTENT_ID: &str = "current_intent";

/// Executes a routed action and returns its outcome. Implementors perform
/// real I/O (file read/write, command execution, MCP tool call).
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(&self, target: &str, payload: &str) -> execution::ExecutionOutcome;
}

pub struct TactileRouter {
    routes: RwLock<HashMap<String, Arc<dyn ActionHandler>>>,
}

impl Default for TactileRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl TactileRouter {
    pub fn new() -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, action_type: &str, handler: Arc<dyn ActionHandler>) {
        self.routes.write().unwrap().insert(action_type.to_string(), handler);
    }

    fn lookup(&self, action_type: &str) -> Option<Arc<dyn ActionHandler>> {
        self.routes.read().unwrap().get(action_type).cloned()
    }
}

fn now_ts() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

pub async fn route(pipeline: &ActionPipeline, action_id: &ActionId) {
    let kernel = &pipeline.kernel;
    let Some(permitted) = kernel
        .query("permitted_action")
        .into_iter()
        .find(|f| f.args[0].as_str_val() == Some(action_id.as_str()))
    else {
        return;
    };

    let action_type = permitted.args[1].as_atom().unwrap_or_default().to_string();
    let target = permitted.args[2]
        .as_str_val()
        .or_else(|| permitted.args[2].as_atom())
        .unwrap_or_default()
        .to_string();
    let payload = permitted.args[3]
        .as_str_val()
        .or_else(|| permitted.args[3].as_atom())
        .unwrap_or_default()
        .to_string();

    match pipeline.router.lookup(&action_type) {
        Some(handler) => {
            kernel.retract_fact(&Fact::new(
                "action_permitted",
                vec![Term::str(action_id.clone())],
            ));

            let outcome = handler.handle(&target, &payload).await;
            kernel.assert(Fact::new(
                "routing_result",
                vec![
                    Term::str(action_id.clone()),
                    Term::atom(if outcome.success { "success" } else { "failure" }),
                    Term::str(outcome.details.clone()),
                    Term::num(now_ts()),
                ],
            ));
            execution::record(kernel, action_id, &action_type, &target, outcome);
        }
        None => {
            kernel.assert(Fact::new(
                "routing_result",
                vec![
                    Term::str(action_id.clone()),
                    Term::atom("failure"),
                    Term::str("no_handler"),
                    Term::num(now_ts()),
                ],
            ));
            kernel.assert(Fact::new(
                "no_action_reason",
                vec![Term::atom(CURRENT_INTENT_ID), Term::atom("no_route")],
            ));
            kernel.assert(Fact::new(
                "routing_failed",
                vec![Term::str(action_id.clone()), Term::atom("no_handler")],
            ));
            kernel.assert(Fact::new(
                "next_action",
                vec![Term::atom("escalate_to_user"), Term::str(""), Term::str("")],
            ));
        }
    }
}
