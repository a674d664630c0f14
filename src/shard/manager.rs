use super::factory::{BaseAgentFactory, ResearcherFactory};
use super::{
    ShardAgent, ShardConfig, ShardDeps, ShardFactory, ShardResult, ShardState, ShardType,
};
use crate::error::ShardManagerError;
use crate::kernel::{Fact, Kernel, Term};
use crate::limits::LimitsEnforcer;
use crate::llm::LlmClient;
use crate::spawn_queue::{Priority, SpawnQueue};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::RwLock as AsyncRwLock;
use tracing::{info, warn};

/// A prompt loader hydrates a persistent/user shard's YAML prompt file, if
/// one exists for its type, before the shard is asserted active.
pub type PromptLoader = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;
/// JIT registrar/unregistrar (§6): register/unregister a knowledge DB path
/// against a shard type with the MCP tool compiler's knowledge layer.
pub type JitRegistrar = Arc<dyn Fn(&str, &str) + Send + Sync>;
pub type JitUnregistrar = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
struct ManagerState {
    factories: HashMap<String, Arc<dyn ShardFactory>>,
    profiles: HashMap<String, ShardConfig>,
    shards: HashMap<String, (Arc<dyn ShardAgent>, ShardState)>,
    results: HashMap<String, ShardResult>,
    active_jit_dbs: HashMap<String, String>,
    disabled: HashSet<String>,
}

/// Authoritative registry and lifecycle owner of shard agents (§4.2).
pub struct ShardManager {
    state: RwLock<ManagerState>,
    kernel: Arc<Kernel>,
    llm: Arc<dyn LlmClient>,
    limits_enforcer: Option<Arc<dyn LimitsEnforcer>>,
    spawn_queue: AsyncRwLock<Option<Arc<SpawnQueue>>>,
    prompt_loader: Option<PromptLoader>,
    jit_registrar: Option<JitRegistrar>,
    jit_unregistrar: Option<JitUnregistrar>,
    id_counter: AtomicU64,
}

impl ShardManager {
    pub fn new(
        kernel: Arc<Kernel>,
        llm: Arc<dyn LlmClient>,
        limits_enforcer: Option<Arc<dyn LimitsEnforcer>>,
    ) -> Self {
        let mgr = Self {
            state: RwLock::new(ManagerState::default()),
            kernel,
            llm,
            limits_enforcer,
            spawn_queue: AsyncRwLock::new(None),
            prompt_loader: None,
            jit_registrar: None,
            jit_unregistrar: None,
            id_counter: AtomicU64::new(0),
        };
        mgr.register_shard("researcher", Arc::new(ResearcherFactory));
        mgr.register_shard("base-agent", Arc::new(BaseAgentFactory));
        mgr
    }

    pub fn with_callbacks(
        mut self,
        prompt_loader: Option<PromptLoader>,
        jit_registrar: Option<JitRegistrar>,
        jit_unregistrar: Option<JitUnregistrar>,
    ) -> Self {
        self.prompt_loader = prompt_loader;
        self.jit_registrar = jit_registrar;
        self.jit_unregistrar = jit_unregistrar;
        self
    }

    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    pub async fn attach_spawn_queue(&self, queue: Arc<SpawnQueue>) {
        *self.spawn_queue.write().await = Some(queue);
    }

    pub fn register_shard(&self, type_name: &str, factory: Arc<dyn ShardFactory>) {
        self.state
            .write()
            .unwrap()
            .factories
            .insert(type_name.to_string(), factory);
    }

    pub fn define_profile(&self, name: &str, config: ShardConfig) {
        self.state.write().unwrap().profiles.insert(name.to_string(), config);
    }

    pub fn disable_system_shard(&self, name: &str) {
        self.state.write().unwrap().disabled.insert(name.to_string());
    }

    /// One-shot retrieval: the result is removed from the table after read,
    /// matching `double GetResult yields (empty, false) after the first
    /// successful read` (§7 idempotence).
    pub fn get_result(&self, id: &str) -> Option<ShardResult> {
        self.state.write().unwrap().results.remove(id)
    }

    pub fn active_non_system_count_pub(&self) -> usize {
        self.active_non_system_count()
    }

    fn active_non_system_count(&self) -> usize {
        self.state
            .read()
            .unwrap()
            .shards
            .values()
            .filter(|(agent, state)| {
                *state == ShardState::Running && agent.config().shard_type != ShardType::System
            })
            .count()
    }

    /// Synchronous convenience: routes through `SpawnWithPriority(..., Normal)`.
    pub async fn spawn(self: &Arc<Self>, type_name: &str, task: &str) -> Result<ShardResult, ShardManagerError> {
        self.spawn_with_priority(type_name, task, None, Priority::Normal).await
    }

    /// If a spawn queue is attached and the profile is not system-type,
    /// submits to the queue and blocks on its result channel; otherwise
    /// spawns directly (§4.2).
    pub async fn spawn_with_priority(
        self: &Arc<Self>,
        type_name: &str,
        task: &str,
        session_ctx: Option<super::SessionContext>,
        priority: Priority,
    ) -> Result<ShardResult, ShardManagerError> {
        let normalized = normalize_type_name(type_name);
        let is_system = self
            .state
            .read()
            .unwrap()
            .profiles
            .get(&normalized)
            .map(|p| p.shard_type == ShardType::System)
            .unwrap_or(false);

        let queue = self.spawn_queue.read().await.clone();
        if let Some(queue) = queue {
            if !is_system {
                return queue
                    .submit_and_wait(
                        normalized,
                        task.to_string(),
                        session_ctx,
                        priority,
                        None,
                        false,
                    )
                    .await
                    .map_err(|e| ShardManagerError::LimitExceeded(e.to_string()));
            }
        }
        self.spawn_with_context(&normalized, task, session_ctx).await
    }

    /// Direct synchronous spawn: `SpawnAsyncWithContext` then poll until
    /// the result appears.
    pub async fn spawn_with_context(
        self: &Arc<Self>,
        type_name: &str,
        task: &str,
        session_ctx: Option<super::SessionContext>,
    ) -> Result<ShardResult, ShardManagerError> {
        let id = self.spawn_async_with_context(type_name, task, session_ctx).await?;
        loop {
            if let Some(result) = self.get_result(&id) {
                return Ok(result);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// The authoritative spawn routine (§4.2 "Spawn algorithm").
    pub async fn spawn_async_with_context(
        self: &Arc<Self>,
        type_name: &str,
        task: &str,
        session_ctx: Option<super::SessionContext>,
    ) -> Result<String, ShardManagerError> {
        // 1. Normalize type name.
        let normalized = normalize_type_name(type_name);

        // 2. Resolve config: profile if present, otherwise default ephemeral.
        let mut config = {
            let state = self.state.read().unwrap();
            state
                .profiles
                .get(&normalized)
                .cloned()
                .unwrap_or_else(|| ShardConfig::default_ephemeral(&normalized))
        };

        // 3. Attach caller's session context.
        let mut session_ctx = session_ctx.unwrap_or_default();

        // 4. Admission (non-system only).
        if config.shard_type != ShardType::System {
            if let Some(enforcer) = &self.limits_enforcer {
                let active = self.active_non_system_count();
                enforcer
                    .check_shard_limit(active)
                    .map_err(|e| ShardManagerError::LimitExceeded(e.to_string()))?;
                enforcer
                    .check_memory()
                    .map_err(|e| ShardManagerError::LimitExceeded(e.to_string()))?;
            }
        }

        // 5. Tool relevance: attach relevant tools into the session context.
        let verb = session_ctx.current_intent_verb.clone();
        let target = session_ctx.current_intent_target.clone().unwrap_or_default();
        let relevant = crate::tool_relevance::query_relevant_tools(
            &self.kernel,
            &normalized,
            verb.as_deref(),
            &target,
            2000,
        );
        session_ctx.available_tools = relevant;
        config.session_context = Some(session_ctx);

        // 6. Factory resolution: exact -> alias via base_type -> researcher
        //    (persistent/user only) -> base agent.
        let factory = self.resolve_factory(&normalized, &config)?;

        // 7. Allocate id.
        let counter = self.id_counter.fetch_add(1, Ordering::SeqCst);
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let id = format!("{normalized}-{nanos}-{counter}");

        // 8. Hydrate prompts / register JIT knowledge DB for persistent/user shards.
        if matches!(config.shard_type, ShardType::Persistent | ShardType::User) {
            if let Some(loader) = &self.prompt_loader {
                let _ = loader(&normalized);
            }
            if let Some(path) = &config.knowledge_path {
                if std::path::Path::new(path).exists() {
                    if let Some(registrar) = &self.jit_registrar {
                        registrar(&normalized, path);
                        self.state
                            .write()
                            .unwrap()
                            .active_jit_dbs
                            .insert(id.clone(), normalized.clone());
                    }
                }
            }
        }

        // 9. Assert active facts.
        self.kernel.assert(Fact::new(
            "active_shard",
            vec![Term::str(id.clone()), Term::atom(normalized.clone())],
        ));
        self.kernel.assert(Fact::new(
            "shard_status",
            vec![Term::str(id.clone()), Term::atom("running"), Term::str(task.to_string())],
        ));

        // 10. Inject dependencies, construct the agent.
        let agent = factory.create(id.clone(), config.clone());

        // 11. Insert into shards map.
        self.state
            .write()
            .unwrap()
            .shards
            .insert(id.clone(), (agent.clone(), ShardState::Running));

        // 12. Launch the worker task. A supervisor task awaits the worker's
        // JoinHandle so a panic inside `execute` surfaces as a ShardResult
        // error and the active-shard facts still get retracted, instead of
        // silently dropping the shard (§4.2 panic-safe execution).
        let manager = Arc::clone(self);
        let task_owned = task.to_string();
        let deadline = config.timeout();
        let model_capability = config.model_capability;
        let id_for_task = id.clone();
        let shard_type_name = normalized.clone();
        tokio::spawn(async move {
            let manager_for_worker = Arc::clone(&manager);
            let agent_for_worker = Arc::clone(&agent);
            let id_for_worker = id_for_task.clone();
            let task_for_worker = task_owned.clone();
            let shard_type_for_worker = shard_type_name.clone();
            let worker = tokio::spawn(async move {
                manager_for_worker
                    .run_shard_worker(
                        id_for_worker,
                        agent_for_worker,
                        task_for_worker,
                        deadline,
                        model_capability,
                        shard_type_for_worker,
                    )
                    .await
            });

            // On a clean return, `run_shard_worker` already recorded the
            // result and ran `finish_shard` itself, so a caller polling
            // `GetResult` never observes a result with stale active-shard
            // facts still asserted. Only a panic/cancellation (which never
            // reaches that code) needs the supervisor to do it here.
            if let Err(join_err) = worker.await {
                let msg = if join_err.is_panic() {
                    "shard task panicked".to_string()
                } else {
                    "shard task cancelled".to_string()
                };
                manager.kernel.assert(Fact::new(
                    "shard_error",
                    vec![Term::str(id_for_task.clone()), Term::str(msg.clone())],
                ));
                manager
                    .state
                    .write()
                    .unwrap()
                    .results
                    .insert(id_for_task.clone(), ShardResult::err(id_for_task.clone(), msg));
                manager.finish_shard(&id_for_task, &shard_type_name, &task_owned);
            }
        });

        Ok(id)
    }

    fn resolve_factory(
        &self,
        normalized: &str,
        config: &ShardConfig,
    ) -> Result<Arc<dyn ShardFactory>, ShardManagerError> {
        let state = self.state.read().unwrap();
        if let Some(f) = state.factories.get(normalized) {
            return Ok(f.clone());
        }
        if let Some(base) = &config.base_type {
            if let Some(f) = state.factories.get(base) {
                return Ok(f.clone());
            }
        }
        if matches!(config.shard_type, ShardType::Persistent | ShardType::User) {
            if let Some(f) = state.factories.get("researcher") {
                warn!(shard_type = %normalized, "no factory match, falling back to researcher");
                return Ok(f.clone());
            }
        }
        if let Some(f) = state.factories.get("base-agent") {
            warn!(shard_type = %normalized, "no factory/researcher match, falling back to base agent");
            return Ok(f.clone());
        }
        Err(ShardManagerError::NoFactory(normalized.to_string()))
    }

    async fn run_shard_worker(
        self: Arc<Self>,
        id: String,
        agent: Arc<dyn ShardAgent>,
        task: String,
        deadline: Duration,
        model_capability: super::ModelCapability,
        shard_type_name: String,
    ) {
        let deps = ShardDeps {
            kernel: Arc::clone(&self.kernel),
            llm: Arc::clone(&self.llm),
        };

        let agent_for_exec = Arc::clone(&agent);
        let task_for_exec = task.clone();
        let exec_future = crate::llm::with_capability_hint(model_capability, || async move {
            agent_for_exec.execute(&deps, &task_for_exec).await
        });

        let outcome = tokio::time::timeout(deadline, exec_future).await;

        let result = match outcome {
            Ok(Ok(output)) => ShardResult::ok(id.clone(), output),
            Ok(Err(e)) => {
                self.kernel.assert(Fact::new(
                    "shard_error",
                    vec![Term::str(id.clone()), Term::str(e.to_string())],
                ));
                ShardResult::err(id.clone(), e.to_string())
            }
            Err(_) => {
                let msg = format!("shard {id} exceeded deadline of {deadline:?}");
                self.kernel
                    .assert(Fact::new("shard_error", vec![Term::str(id.clone()), Term::str(msg.clone())]));
                ShardResult::err(id.clone(), msg)
            }
        };

        // Record the result, then immediately retract the active-shard facts
        // and unregister any JIT DB, so a caller polling GetResult never sees
        // a result alongside stale active_shard/shard_status facts.
        {
            let mut state = self.state.write().unwrap();
            state.results.insert(id.clone(), result);
        }
        self.finish_shard(&id, &shard_type_name, &task);

        info!(shard_id = %id, "shard worker finished");
    }

    /// Always runs after the worker task joins, success, error, or panic:
    /// retracts the active-shard facts and unregisters any JIT knowledge DB.
    fn finish_shard(&self, id: &str, shard_type_name: &str, task: &str) {
        self.kernel
            .retract_fact(&Fact::new("active_shard", vec![Term::str(id.to_string()), Term::atom(shard_type_name)]));
        self.kernel.retract_fact(&Fact::new(
            "shard_status",
            vec![Term::str(id.to_string()), Term::atom("running"), Term::str(task.to_string())],
        ));

        let jit_type = self.state.write().unwrap().active_jit_dbs.remove(id);
        if let Some(jit_type) = jit_type {
            if let Some(unregistrar) = &self.jit_unregistrar {
                unregistrar(&jit_type);
            }
        }

        if let Some(entry) = self.state.write().unwrap().shards.get_mut(id) {
            if entry.1 == ShardState::Running {
                entry.1 = ShardState::Completed;
            }
        }
    }

    /// Iterates enabled system profiles in `auto` startup mode, dispatching
    /// each at Critical priority, detached, via the queue if attached,
    /// otherwise direct async.
    pub async fn start_system_shards(self: &Arc<Self>) {
        let to_start: Vec<(String, ShardConfig)> = {
            let state = self.state.read().unwrap();
            state
                .profiles
                .iter()
                .filter(|(name, cfg)| {
                    cfg.shard_type == ShardType::System
                        && cfg.startup_mode == super::StartupMode::Auto
                        && !state.disabled.contains(*name)
                })
                .map(|(name, cfg)| (name.clone(), cfg.clone()))
                .collect()
        };

        for (name, _cfg) in to_start {
            let queue = self.spawn_queue.read().await.clone();
            if let Some(queue) = queue {
                let _ = queue
                    .submit_and_wait(name, String::new(), None, Priority::Critical, None, true)
                    .await;
            } else {
                let _ = self.spawn_async_with_context(&name, "", None).await;
            }
        }
    }

    pub async fn stop_all(&self) {
        if let Some(queue) = self.spawn_queue.read().await.clone() {
            queue.stop(Duration::from_secs(30)).await;
        }
    }
}

fn normalize_type_name(type_name: &str) -> String {
    type_name.trim().trim_start_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::DefaultLimitsEnforcer;
    use async_trait::async_trait;

    struct EchoLlm;
    #[async_trait]
    impl LlmClient for EchoLlm {
        async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
            Ok(format!("echo: {prompt}"))
        }
        async fn complete_with_system(&self, _system: &str, user: &str) -> anyhow::Result<String> {
            Ok(format!("echo: {user}"))
        }
    }

    fn test_manager() -> Arc<ShardManager> {
        let kernel = Arc::new(Kernel::new());
        let llm: Arc<dyn LlmClient> = Arc::new(EchoLlm);
        let limits: Arc<dyn LimitsEnforcer> = Arc::new(DefaultLimitsEnforcer::default());
        Arc::new(ShardManager::new(kernel, llm, Some(limits)))
    }

    #[tokio::test]
    async fn spawn_researcher_falls_back_and_asserts_then_retracts_active_facts() {
        let manager = test_manager();
        let id = manager
            .spawn_async_with_context("persistent-unknown-type", "investigate", None)
            .await
            .unwrap();

        assert_eq!(manager.kernel().query("active_shard").len(), 1);

        let result = loop {
            if let Some(r) = manager.get_result(&id) {
                break r;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        };
        assert!(result.is_ok());

        // give the retraction a tick to land (it happens before result insert
        // is visible to a subsequent poll in the worst case)
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(manager.kernel().query("active_shard").is_empty());
    }

    #[tokio::test]
    async fn get_result_is_one_shot() {
        let manager = test_manager();
        let id = manager
            .spawn_async_with_context("base-agent", "hello", None)
            .await
            .unwrap();

        loop {
            if manager.get_result(&id).is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(manager.get_result(&id).is_none());
    }
}
