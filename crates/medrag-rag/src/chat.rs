//! Bridge between retrieval and an external text-generation backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use medrag_core::types::{BodySystem, ComplexityLevel, MetadataFilter};

use crate::context::{Citation, RagContextStats, RetrievedContext};
use crate::lookup::Lookup;
use crate::population::PopulationCache;
use crate::retrieval::{RetrievalEngine, RetrievalOptions};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a careful medical educator. Explain anatomy, physiology and disease clearly, \
and say when a question needs a clinician.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self { Self { role: ChatRole::System, content: content.into() } }
    pub fn user(content: impl Into<String>) -> Self { Self { role: ChatRole::User, content: content.into() } }
    pub fn assistant(content: impl Into<String>) -> Self { Self { role: ChatRole::Assistant, content: content.into() } }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOptions {
    pub model: Option<String>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedReply {
    pub content: String,
    pub model: String,
    pub done: bool,
}

/// The completion backend. Implementations live outside this crate.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, messages: &[ChatMessage], options: &GenerationOptions) -> anyhow::Result<GeneratedReply>;
}

/// Retrieval hints attached to a chat request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RagOptions {
    pub structure_name: Option<String>,
    pub symptom: Option<String>,
    pub lab_name: Option<String>,
    pub lab_value: Option<String>,
    pub system: Option<BodySystem>,
    pub complexity_level: Option<ComplexityLevel>,
    pub max_tokens: Option<usize>,
}

impl RagOptions {
    /// Structure, then symptom, then lab, then the last user message.
    pub fn lookup(&self, messages: &[ChatMessage]) -> Option<Lookup> {
        if let Some(name) = self.structure_name.as_deref().filter(|s| !s.trim().is_empty()) {
            return Some(Lookup::Structure(name.to_string()));
        }
        if let Some(symptom) = self.symptom.as_deref().filter(|s| !s.trim().is_empty()) {
            return Some(Lookup::Symptom(symptom.to_string()));
        }
        if let Some(name) = self.lab_name.as_deref().filter(|s| !s.trim().is_empty()) {
            return Some(Lookup::Lab { name: name.to_string(), value: self.lab_value.clone() });
        }
        messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User && !m.content.trim().is_empty())
            .map(|m| Lookup::FreeText(m.content.clone()))
    }

    pub fn retrieval_options(&self) -> RetrievalOptions {
        RetrievalOptions {
            max_tokens: self.max_tokens,
            filter: MetadataFilter { body_system: self.system, max_complexity: self.complexity_level, ..MetadataFilter::default() },
            ..RetrievalOptions::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    /// Replaces the configured system prompt for this request.
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub rag_options: RagOptions,
    #[serde(flatten)]
    pub generation: GenerationOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RagChatResponse {
    pub content: String,
    pub model: String,
    pub done: bool,
    pub citations: Vec<Citation>,
    pub rag_context: Option<RagContextStats>,
}

pub struct RagChat {
    engine: Arc<RetrievalEngine>,
    cache: Option<PopulationCache>,
    generator: Arc<dyn Generator>,
    system_prompt: String,
}

impl RagChat {
    pub fn new(engine: Arc<RetrievalEngine>, generator: Arc<dyn Generator>) -> Self {
        Self { engine, cache: None, generator, system_prompt: DEFAULT_SYSTEM_PROMPT.to_string() }
    }

    pub fn with_population(mut self, cache: PopulationCache) -> Self { self.cache = Some(cache); self }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self { self.system_prompt = prompt.into(); self }

    /// Retrieval problems degrade to an unaugmented answer; only generator
    /// failures are returned as errors.
    async fn context_for(&self, request: &ChatRequest) -> Option<RetrievedContext> {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.ensure_populated().await {
                warn!(error = %e, "population failed; answering without context");
                return None;
            }
        }
        let lookup = request.rag_options.lookup(&request.messages)?;
        match self.engine.lookup(&lookup, &request.rag_options.retrieval_options(), None).await {
            Ok(ctx) if !ctx.is_empty() => Some(ctx),
            Ok(_) => { debug!("no matching context"); None }
            Err(e) => { warn!(error = %e, "retrieval failed; answering without context"); None }
        }
    }

    /// `prompt` overrides the configured system prompt when set.
    pub fn system_message(&self, prompt: Option<&str>, context: Option<&RetrievedContext>) -> ChatMessage {
        let prompt = prompt.filter(|p| !p.trim().is_empty()).unwrap_or(self.system_prompt.as_str());
        match context {
            Some(ctx) => ChatMessage::system(format!(
                "{}\n\nUse the reference excerpts below when relevant and cite them as [n].\n\n{}",
                prompt,
                ctx.to_prompt_block()
            )),
            None => ChatMessage::system(prompt),
        }
    }

    pub async fn chat(&self, request: &ChatRequest) -> anyhow::Result<RagChatResponse> {
        let context = self.context_for(request).await;
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        messages.push(self.system_message(request.system_prompt.as_deref(), context.as_ref()));
        messages.extend(request.messages.iter().cloned());
        let reply = self.generator.generate(&messages, &request.generation).await?;
        Ok(RagChatResponse {
            content: reply.content,
            model: reply.model,
            done: reply.done,
            citations: context.as_ref().map(|c| c.citations.clone()).unwrap_or_default(),
            rag_context: context.as_ref().map(RetrievedContext::stats),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_priority() {
        let messages = vec![ChatMessage::user("first"), ChatMessage::assistant("reply"), ChatMessage::user("why does my chest hurt?")];
        let mut rag = RagOptions { lab_name: Some("TSH".into()), ..RagOptions::default() };
        assert!(matches!(rag.lookup(&messages), Some(Lookup::Lab { .. })));
        rag.symptom = Some("chest pain".into());
        assert_eq!(rag.lookup(&messages), Some(Lookup::Symptom("chest pain".into())));
        rag.structure_name = Some("aorta".into());
        assert_eq!(rag.lookup(&messages), Some(Lookup::Structure("aorta".into())));
        assert_eq!(
            RagOptions::default().lookup(&messages),
            Some(Lookup::FreeText("why does my chest hurt?".into()))
        );
        assert_eq!(RagOptions::default().lookup(&[]), None);
    }

    #[test]
    fn rag_options_deserialize_from_camel_case() {
        let rag: RagOptions = serde_json::from_str(r#"{"structureName":"aorta","system":"cardiovascular","complexityLevel":2}"#).unwrap();
        assert_eq!(rag.structure_name.as_deref(), Some("aorta"));
        assert_eq!(rag.system, Some(BodySystem::Cardiovascular));
        assert_eq!(rag.retrieval_options().filter.max_complexity.map(|c| c.get()), Some(2));
        assert!(serde_json::from_str::<RagOptions>(r#"{"complexityLevel":9}"#).is_err());
    }

    #[test]
    fn chat_request_reads_desktop_payload() {
        let payload = r#"{
            "model": "llama3",
            "messages": [{"role": "user", "content": "What does the aorta do?"}],
            "systemPrompt": "Be brief.",
            "temperature": 0.2,
            "ragOptions": {"structureName": "aorta", "maxTokens": 600}
        }"#;
        let request: ChatRequest = serde_json::from_str(payload).unwrap();
        assert_eq!(request.rag_options.structure_name.as_deref(), Some("aorta"));
        assert_eq!(request.rag_options.max_tokens, Some(600));
        assert_eq!(request.system_prompt.as_deref(), Some("Be brief."));
        assert_eq!(request.generation.model.as_deref(), Some("llama3"));
        assert_eq!(request.generation.temperature, Some(0.2));

        let bare: ChatRequest = serde_json::from_str(r#"{"messages":[]}"#).unwrap();
        assert_eq!(bare.rag_options, RagOptions::default());
        assert_eq!(bare.system_prompt, None);
    }
}
