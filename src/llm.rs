//! LLM Client collaborator (§6). `Complete`/`CompleteWithSystem` plus a
//! model-capability hint that tiered back-ends can read without changing
//! the call signature — modeled as a `tokio::task_local!`, the async
//! equivalent of the context value the spec describes, scoped to the
//! worker task that is executing a shard.

use crate::ollama::{ChatMessage, OllamaClient};
use crate::openai::OpenAiClient;
use crate::shard::ModelCapability;
use anyhow::Result;
use async_trait::async_trait;

tokio::task_local! {
    static MODEL_CAPABILITY_HINT: ModelCapability;
}

/// Run `f` with `capability` visible to any `LlmClient` call made within it,
/// via [`current_capability_hint`]. Mirrors `SpawnAsyncWithContext` placing
/// `modelCapability=config.modelCapability` on the execution context.
pub async fn with_capability_hint<F, Fut, T>(capability: ModelCapability, f: F) -> T
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = T>,
{
    MODEL_CAPABILITY_HINT.scope(capability, f()).await
}

pub fn current_capability_hint() -> Option<ModelCapability> {
    MODEL_CAPABILITY_HINT.try_with(|c| *c).ok()
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
    async fn complete_with_system(&self, system: &str, user: &str) -> Result<String>;
}

/// Picks a model id per capability tier. `fast`/`balanced`/`highReasoning`
/// map onto a configured model triple; callers that never set a hint get
/// the balanced tier.
pub struct TieredModelSelector {
    pub fast: String,
    pub balanced: String,
    pub high_reasoning: String,
}

impl TieredModelSelector {
    pub fn resolve(&self) -> &str {
        match current_capability_hint().unwrap_or(ModelCapability::Balanced) {
            ModelCapability::Fast => &self.fast,
            ModelCapability::Balanced => &self.balanced,
            ModelCapability::HighReasoning => &self.high_reasoning,
        }
    }
}

pub struct OllamaLlmClient {
    client: OllamaClient,
    models: TieredModelSelector,
}

impl OllamaLlmClient {
    pub fn new(base_url: String, api_key: Option<String>, models: TieredModelSelector) -> Self {
        Self {
            client: OllamaClient::new(base_url, api_key),
            models,
        }
    }
}

#[async_trait]
impl LlmClient for OllamaLlmClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let model = self.models.resolve();
        self.client
            .chat_text(
                model,
                &[ChatMessage {
                    role: "user".into(),
                    content: prompt.to_string(),
                }],
            )
            .await
    }

    async fn complete_with_system(&self, system: &str, user: &str) -> Result<String> {
        let model = self.models.resolve();
        self.client
            .chat_text(
                model,
                &[
                    ChatMessage {
                        role: "system".into(),
                        content: system.to_string(),
                    },
                    ChatMessage {
                        role: "user".into(),
                        content: user.to_string(),
                    },
                ],
            )
            .await
    }
}

pub struct OpenAiLlmClient {
    client: OpenAiClient,
    models: TieredModelSelector,
}

impl OpenAiLlmClient {
    pub fn new(base_url: String, api_key: Option<String>, models: TieredModelSelector) -> Self {
        Self {
            client: OpenAiClient::new(base_url, api_key),
            models,
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiLlmClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let model = self.models.resolve();
        self.client
            .chat_text(
                model,
                &[ChatMessage {
                    role: "user".into(),
                    content: prompt.to_string(),
                }],
            )
            .await
    }

    async fn complete_with_system(&self, system: &str, user: &str) -> Result<String> {
        let model = self.models.resolve();
        self.client
            .chat_text(
                model,
                &[
                    ChatMessage {
                        role: "system".into(),
                        content: system.to_string(),
                    },
                    ChatMessage {
                        role: "user".into(),
                        content: user.to_string(),
                    },
                ],
            )
            .await
    }
}
