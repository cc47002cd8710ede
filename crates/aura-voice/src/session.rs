//! Per-call conversation state: identity, capped turn history and the
//! turn-taking state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One message in the conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Where the session is in the turn-taking loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Listening,
    Transcribing,
    Responding,
    Closed,
}

/// What is handed to the session store when a call ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub user_id: String,
    pub tenant_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_secs: f64,
    /// Turns completed over the whole call, including ones dropped from history.
    pub turn_count: u64,
    pub interruptions: u64,
    pub history: Vec<Turn>,
}

/// Snapshot of a live session for listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub user_id: String,
    pub tenant_id: Option<String>,
    pub started_at: DateTime<Utc>,
}

/// Mutable state of one conversation. Touched only by the process loop.
#[derive(Debug)]
pub struct ConversationSession {
    id: String,
    user_id: String,
    tenant_id: Option<String>,
    history: VecDeque<Turn>,
    history_limit: usize,
    state: SessionState,
    started_at: DateTime<Utc>,
    context: serde_json::Value,
    turn_count: u64,
    interruptions: u64,
}

impl ConversationSession {
    pub fn new(user_id: impl Into<String>, tenant_id: Option<String>, history_limit: usize) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            tenant_id,
            history: VecDeque::with_capacity(history_limit),
            history_limit: history_limit.max(1),
            state: SessionState::Idle,
            started_at: Utc::now(),
            context: serde_json::Value::Null,
            turn_count: 0,
            interruptions: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    /// Key used for the context lookup: tenant when present, else user.
    pub fn context_key(&self) -> &str {
        self.tenant_id.as_deref().unwrap_or(&self.user_id)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Move to `next`. `Closed` is terminal.
    pub fn set_state(&mut self, next: SessionState) {
        if self.state != SessionState::Closed {
            self.state = next;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    pub fn context(&self) -> &serde_json::Value {
        &self.context
    }

    pub fn set_context(&mut self, context: serde_json::Value) {
        self.context = context;
    }

    /// Append a turn, dropping the oldest ones past the cap.
    pub fn push_turn(&mut self, turn: Turn) {
        self.history.push_back(turn);
        self.turn_count += 1;
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }
    }

    pub fn history(&self) -> &VecDeque<Turn> {
        &self.history
    }

    pub fn history_vec(&self) -> Vec<Turn> {
        self.history.iter().cloned().collect()
    }

    pub fn record_interruption(&mut self) {
        self.interruptions += 1;
    }

    pub fn interruptions(&self) -> u64 {
        self.interruptions
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Greeting spoken at session start, personalised by the context's
    /// `organization` field when present.
    pub fn greeting(&self, assistant_name: &str) -> String {
        match self.context.get("organization").and_then(|v| v.as_str()) {
            Some(org) if !org.trim().is_empty() => format!(
                "Hello! I'm {}, your {} assistant. How can I help you today?",
                assistant_name,
                org.trim()
            ),
            _ => format!(
                "Hello! I'm {}, your AI assistant. How can I help you today?",
                assistant_name
            ),
        }
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.id.clone(),
            user_id: self.user_id.clone(),
            tenant_id: self.tenant_id.clone(),
            started_at: self.started_at,
        }
    }

    pub fn summary(&self) -> SessionSummary {
        let ended_at = Utc::now();
        let duration_secs = (ended_at - self.started_at)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        SessionSummary {
            session_id: self.id.clone(),
            user_id: self.user_id.clone(),
            tenant_id: self.tenant_id.clone(),
            started_at: self.started_at,
            ended_at,
            duration_secs,
            turn_count: self.turn_count,
            interruptions: self.interruptions,
            history: self.history_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn history_keeps_most_recent_turns() {
        let mut s = ConversationSession::new("u1", None, 10);
        for i in 0..15 {
            s.push_turn(Turn::user(format!("turn {}", i)));
        }
        assert_eq!(s.history().len(), 10);
        assert_eq!(s.history().front().unwrap().text, "turn 5");
        assert_eq!(s.history().back().unwrap().text, "turn 14");
        assert_eq!(s.summary().turn_count, 15);
    }

    #[test]
    fn closed_is_terminal() {
        let mut s = ConversationSession::new("u1", None, 10);
        s.set_state(SessionState::Listening);
        s.set_state(SessionState::Closed);
        s.set_state(SessionState::Listening);
        assert!(s.is_closed());
    }

    #[test]
    fn greeting_uses_organization() {
        let mut s = ConversationSession::new("u1", Some("t1".into()), 10);
        assert_eq!(s.context_key(), "t1");
        assert!(s.greeting("AURA").starts_with("Hello! I'm AURA, your AI assistant."));
        s.set_context(json!({ "organization": "Acme Dental" }));
        assert_eq!(
            s.greeting("AURA"),
            "Hello! I'm AURA, your Acme Dental assistant. How can I help you today?"
        );
    }

    #[test]
    fn summary_serializes_roles_in_snake_case() {
        let mut s = ConversationSession::new("u1", None, 4);
        s.push_turn(Turn::user("hi"));
        s.push_turn(Turn::assistant("hello"));
        let v = serde_json::to_value(s.summary()).unwrap();
        assert_eq!(v["history"][0]["role"], "user");
        assert_eq!(v["history"][1]["role"], "assistant");
        assert_eq!(v["user_id"], "u1");
    }
}
