//! Optional collaborators and the capability set handed to a session.
//!
//! Transcription, generation and synthesis are required. Context lookup,
//! summary persistence and post-turn observation are optional; a missing one
//! is `None` in [`Collaborators`] and its step is skipped.

use crate::error::VoiceResult;
use crate::llm::ResponseGenerator;
use crate::session::SessionSummary;
use crate::stt::Transcriber;
use crate::voice_output::SpeechSynthesizer;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Supplies the persona/memory/tenant blob used at session start.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    /// `key` is the tenant id when the call has one, else the user id.
    async fn get_context(&self, key: &str) -> VoiceResult<serde_json::Value>;
}

/// Receives the summary of every finished call.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save_summary(&self, summary: SessionSummary) -> VoiceResult<()>;
}

/// A completed exchange, handed to a [`TurnObserver`] after the fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub session_id: String,
    pub user_id: String,
    pub user_text: String,
    pub assistant_text: String,
}

/// Post-turn hook (memory or persona refresh). Runs on the background worker,
/// never on the turn loop.
#[async_trait]
pub trait TurnObserver: Send + Sync {
    async fn on_turn(&self, record: TurnRecord);
}

/// Everything a session talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub transcriber: Arc<dyn Transcriber>,
    pub generator: Arc<dyn ResponseGenerator>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub context_provider: Option<Arc<dyn ContextProvider>>,
    pub session_store: Option<Arc<dyn SessionStore>>,
    pub turn_observer: Option<Arc<dyn TurnObserver>>,
}

impl Collaborators {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        generator: Arc<dyn ResponseGenerator>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
    ) -> Self {
        Self {
            transcriber,
            generator,
            synthesizer,
            context_provider: None,
            session_store: None,
            turn_observer: None,
        }
    }

    pub fn with_context_provider(mut self, provider: Arc<dyn ContextProvider>) -> Self {
        self.context_provider = Some(provider);
        self
    }

    pub fn with_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.session_store = Some(store);
        self
    }

    pub fn with_turn_observer(mut self, observer: Arc<dyn TurnObserver>) -> Self {
        self.turn_observer = Some(observer);
        self
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("context_provider", &self.context_provider.is_some())
            .field("session_store", &self.session_store.is_some())
            .field("turn_observer", &self.turn_observer.is_some())
            .finish_non_exhaustive()
    }
}

/// Context keyed by tenant or user id, with an optional fallback.
#[derive(Debug, Default)]
pub struct StaticContextProvider {
    entries: DashMap<String, serde_json::Value>,
    fallback: Option<serde_json::Value>,
}

impl StaticContextProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fallback(fallback: serde_json::Value) -> Self {
        Self {
            entries: DashMap::new(),
            fallback: Some(fallback),
        }
    }

    pub fn insert(&self, key: impl Into<String>, value: serde_json::Value) {
        self.entries.insert(key.into(), value);
    }
}

#[async_trait]
impl ContextProvider for StaticContextProvider {
    async fn get_context(&self, key: &str) -> VoiceResult<serde_json::Value> {
        Ok(self
            .entries
            .get(key)
            .map(|v| v.value().clone())
            .or_else(|| self.fallback.clone())
            .unwrap_or(serde_json::Value::Null))
    }
}

/// Keeps summaries in memory, newest last.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    summaries: RwLock<Vec<SessionSummary>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn summaries(&self) -> Vec<SessionSummary> {
        self.summaries.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.summaries.read().await.len()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn save_summary(&self, summary: SessionSummary) -> VoiceResult<()> {
        self.summaries.write().await.push(summary);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ConversationSession;
    use serde_json::json;

    #[tokio::test]
    async fn static_context_falls_back() {
        let provider = StaticContextProvider::with_fallback(json!({ "persona": "friendly" }));
        provider.insert("tenant-a", json!({ "organization": "Acme" }));
        assert_eq!(
            provider.get_context("tenant-a").await.unwrap()["organization"],
            "Acme"
        );
        assert_eq!(
            provider.get_context("other").await.unwrap()["persona"],
            "friendly"
        );
        assert!(StaticContextProvider::new()
            .get_context("x")
            .await
            .unwrap()
            .is_null());
    }

    #[tokio::test]
    async fn in_memory_store_keeps_summaries() {
        let store = InMemorySessionStore::new();
        let session = ConversationSession::new("u1", None, 10);
        store.save_summary(session.summary()).await.unwrap();
        assert_eq!(store.len().await, 1);
        assert_eq!(store.summaries().await[0].user_id, "u1");
    }
}
