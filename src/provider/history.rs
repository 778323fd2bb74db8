//! Per-session conversation history.
//!
//! Each provider client owns its own store; switching providers mid-session
//! starts from a clean history. Sessions keep the most recent turns only.

use dashmap::DashMap;
use std::collections::VecDeque;

use super::transport::ChatMessage;

/// Rolling (role, text) history keyed by session id.
pub struct ConversationStore {
    max_turns: usize,
    sessions: DashMap<String, VecDeque<ChatMessage>>,
}

impl ConversationStore {
    /// `max_turns` counts individual messages, not exchanges.
    pub fn new(max_turns: usize) -> Self {
        Self {
            max_turns,
            sessions: DashMap::new(),
        }
    }

    /// Prior turns for a session, oldest first. Empty for unknown sessions.
    pub fn turns(&self, session_id: &str) -> Vec<ChatMessage> {
        self.sessions
            .get(session_id)
            .map(|turns| turns.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Record a completed exchange and trim the session to the cap.
    pub fn append_exchange(&self, session_id: &str, user_text: &str, assistant_text: &str) {
        let mut turns = self.sessions.entry(session_id.to_string()).or_default();
        turns.push_back(ChatMessage::user(user_text));
        turns.push_back(ChatMessage::assistant(assistant_text));
        while turns.len() > self.max_turns {
            turns.pop_front();
        }
    }
}
