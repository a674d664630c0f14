use super::{ShardAgent, ShardConfig, ShardDeps};
use async_trait::async_trait;
use std::sync::Arc;

/// Creates a fresh [`ShardAgent`] for a given id/config pair. Registered
/// under a type name in the Manager; resolution falls back through
/// `base_type` alias, then `researcher`, then the base agent (§4.2 step 6).
pub trait ShardFactory: Send + Sync {
    fn create(&self, id: String, config: ShardConfig) -> Arc<dyn ShardAgent>;
}

impl<F> ShardFactory for F
where
    F: Fn(String, ShardConfig) -> Arc<dyn ShardAgent> + Send + Sync,
{
    fn create(&self, id: String, config: ShardConfig) -> Arc<dyn ShardAgent> {
        (self)(id, config)
    }
}

/// Last-resort agent: runs trivially, echoing the task back as its output.
/// Used when a persistent/user spawn matches neither an exact factory, an
/// alias, nor the researcher fallback.
pub struct BaseAgent {
    id: String,
    config: ShardConfig,
}

#[async_trait]
impl ShardAgent for BaseAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn config(&self) -> &ShardConfig {
        &self.config
    }

    async fn execute(&self, _deps: &ShardDeps, task: &str) -> anyhow::Result<String> {
        Ok(format!("base agent acknowledged task: {task}"))
    }
}

pub struct BaseAgentFactory;

impl ShardFactory for BaseAgentFactory {
    fn create(&self, id: String, config: ShardConfig) -> Arc<dyn ShardAgent> {
        Arc::new(BaseAgent { id, config })
    }
}

/// Researcher agent: completes the task through the LLM client with a
/// research-flavored system prompt. Persistent/user shards without a
/// matching factory degrade to this before the base agent (§4.2 edge case).
pub struct ResearcherAgent {
    id: String,
    config: ShardConfig,
}

#[async_trait]
impl ShardAgent for ResearcherAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn config(&self) -> &ShardConfig {
        &self.config
    }

    async fn execute(&self, deps: &ShardDeps, task: &str) -> anyhow::Result<String> {
        deps.llm
            .complete_with_system(
                "You are a research agent. Investigate the task and report findings concisely.",
                task,
            )
            .await
    }
}

pub struct ResearcherFactory;

impl ShardFactory for ResearcherFactory {
    fn create(&self, id: String, config: ShardConfig) -> Arc<dyn ShardAgent> {
        Arc::new(ResearcherAgent { id, config })
    }
}
