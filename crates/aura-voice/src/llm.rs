//! **Streaming response generation** seam.
//!
//! A [`ResponseGenerator`] turns the user's words plus recent history into a
//! finite stream of text fragments. Each turn makes a fresh call. The consumer
//! may drop the stream early (on interruption); implementations must release
//! their resources when that happens.

use crate::error::{VoiceError, VoiceResult};
use crate::session::{Role, Turn};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::time::Duration;

/// Token stream returned by a generator.
pub type TokenStream = BoxStream<'static, VoiceResult<String>>;

/// Everything a generator needs for one response.
#[derive(Debug, Clone)]
pub struct ResponseRequest {
    /// The user's transcript for this turn.
    pub prompt: String,
    /// Recent turns, oldest first, not including `prompt`.
    pub history: Vec<Turn>,
    /// Opaque persona/memory/tenant blob from the context provider.
    pub context: serde_json::Value,
}

impl ResponseRequest {
    /// Flatten the request into a single completion prompt.
    pub fn render_prompt(&self) -> String {
        let mut out = if self.history.is_empty() {
            "This is the start of the conversation.\n".to_string()
        } else {
            let mut s = "Recent conversation:\n".to_string();
            for turn in &self.history {
                let who = match turn.role {
                    Role::User => "User",
                    Role::Assistant => "AI",
                };
                s.push_str(who);
                s.push_str(": ");
                s.push_str(&turn.text);
                s.push('\n');
            }
            s
        };
        if let Some(org) = self.context.get("organization").and_then(|v| v.as_str()) {
            out.push_str("\nOrganization Context: ");
            out.push_str(org);
        }
        out.push_str("\n\nUser: ");
        out.push_str(&self.prompt);
        out.push_str("\n\nAssistant:");
        out
    }
}

#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn generate(&self, request: ResponseRequest) -> VoiceResult<TokenStream>;
}

/// Streams a short acknowledgement back word by word. Use for demos and for
/// exercising the streaming path without a model.
#[derive(Debug, Clone, Default)]
pub struct EchoGenerator {
    /// Pause before each token.
    pub token_delay: Duration,
}

impl EchoGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(token_delay: Duration) -> Self {
        Self { token_delay }
    }
}

#[async_trait]
impl ResponseGenerator for EchoGenerator {
    async fn generate(&self, request: ResponseRequest) -> VoiceResult<TokenStream> {
        let reply = format!(
            "I heard you say: {}. What else can I help you with?",
            request.prompt.trim().trim_end_matches(&['.', '!', '?'][..])
        );
        let tokens: Vec<String> = reply.split_inclusive(' ').map(str::to_string).collect();
        let delay = self.token_delay;
        Ok(stream::iter(tokens)
            .then(move |t| async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok::<_, VoiceError>(t)
            })
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prompt_without_history() {
        let req = ResponseRequest {
            prompt: "hi".into(),
            history: vec![],
            context: serde_json::Value::Null,
        };
        assert_eq!(
            req.render_prompt(),
            "This is the start of the conversation.\n\n\nUser: hi\n\nAssistant:"
        );
    }

    #[test]
    fn prompt_with_history_and_organization() {
        let req = ResponseRequest {
            prompt: "what are the office hours".into(),
            history: vec![Turn::assistant("Hello!"), Turn::user("hey")],
            context: json!({ "organization": "Acme" }),
        };
        let p = req.render_prompt();
        assert!(p.starts_with("Recent conversation:\nAI: Hello!\nUser: hey\n"));
        assert!(p.contains("\nOrganization Context: Acme"));
        assert!(p.ends_with("User: what are the office hours\n\nAssistant:"));
    }

    #[tokio::test]
    async fn echo_streams_words_that_rebuild_the_reply() {
        let req = ResponseRequest {
            prompt: "Open late?".into(),
            history: vec![],
            context: serde_json::Value::Null,
        };
        let tokens: Vec<String> = EchoGenerator::new()
            .generate(req)
            .await
            .unwrap()
            .map(|t| t.unwrap())
            .collect()
            .await;
        assert!(tokens.len() > 5);
        assert_eq!(
            tokens.concat(),
            "I heard you say: Open late. What else can I help you with?"
        );
    }
}
