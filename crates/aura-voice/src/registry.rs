//! Set of live sessions, owned by whatever composes them.
//!
//! Sessions never share state through the registry; it is touched only when
//! a session registers and when its guard is dropped.

use crate::session::SessionInfo;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<String, SessionInfo>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session. It stays listed until the returned guard is dropped.
    pub fn register(&self, info: SessionInfo) -> RegistrationGuard {
        let id = info.session_id.clone();
        self.sessions.insert(id.clone(), info);
        debug!(session_id = %id, active = self.sessions.len(), "Session registered");
        RegistrationGuard {
            id,
            sessions: Arc::clone(&self.sessions),
        }
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Active sessions, oldest first.
    pub fn snapshot(&self) -> Vec<SessionInfo> {
        let mut all: Vec<SessionInfo> = self.sessions.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|s| s.started_at);
        all
    }
}

/// Removes its session from the registry on drop.
#[derive(Debug)]
pub struct RegistrationGuard {
    id: String,
    sessions: Arc<DashMap<String, SessionInfo>>,
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.sessions.remove(&self.id);
        debug!(session_id = %self.id, active = self.sessions.len(), "Session deregistered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ConversationSession;

    #[test]
    fn guard_removes_on_drop() {
        let registry = SessionRegistry::new();
        let a = ConversationSession::new("alice", None, 10);
        let b = ConversationSession::new("bob", Some("t".into()), 10);
        let guard_a = registry.register(a.info());
        let _guard_b = registry.register(b.info());
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(a.id()));

        drop(guard_a);
        assert_eq!(registry.len(), 1);
        assert!(!registry.contains(a.id()));
        assert_eq!(registry.snapshot()[0].user_id, "bob");
    }

    #[test]
    fn guard_removes_on_panic_unwind() {
        let registry = SessionRegistry::new();
        let r = registry.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = r.register(ConversationSession::new("u", None, 10).info());
            panic!("session task blew up");
        }));
        assert!(result.is_err());
        assert!(registry.is_empty());
    }
}
