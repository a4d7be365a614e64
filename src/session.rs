// session.rs — Ordered conversation transcript (system turn first).
// The system turn is never removed, only replaced on reset.

use serde::Serialize;
use tracing::debug;

use crate::error::TutorError;

/// Author of a turn. Serialized with the lowercase names the chat API expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single turn. Fields are private so a message cannot change once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    role: Role,
    content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConversationSession {
    messages: Vec<Message>,
}

impl ConversationSession {
    /// Create a session already holding its system turn.
    pub fn new(system_prompt: &str) -> Self {
        let mut session = Self::default();
        session.initialize(system_prompt);
        session
    }

    /// Set the transcript to exactly one system turn.
    /// No-op when the session already has one; use `reset` to replace it.
    pub fn initialize(&mut self, system_prompt: &str) {
        if !self.messages.is_empty() {
            return;
        }
        self.messages.push(Message::system(system_prompt));
    }

    pub fn append_user(&mut self, text: &str) -> Result<(), TutorError> {
        if text.trim().is_empty() {
            return Err(TutorError::InvalidInput(
                "message must not be empty".to_string(),
            ));
        }
        self.messages.push(Message::user(text));
        debug!(turns = self.messages.len(), "User turn appended");
        Ok(())
    }

    /// Append the assistant reply verbatim, even if it will not parse.
    pub fn append_assistant(&mut self, raw_text: &str) {
        self.messages.push(Message::assistant(raw_text));
        debug!(turns = self.messages.len(), "Assistant turn appended");
    }

    /// Discard everything and start over with a fresh system turn.
    /// Usage and error counters are reset alongside by `app::Session::reset`.
    pub fn reset(&mut self, system_prompt: &str) {
        self.messages.clear();
        self.messages.push(Message::system(system_prompt));
    }

    /// Turns after the system prompt, for display.
    pub fn history(&self) -> &[Message] {
        self.messages.get(1..).unwrap_or(&[])
    }

    /// Full transcript including the system turn, as sent to the API.
    pub fn transcript(&self) -> &[Message] {
        &self.messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_holds_only_system_turn() {
        let s = ConversationSession::new("prompt");
        assert_eq!(s.transcript().len(), 1);
        assert_eq!(s.transcript()[0].role(), Role::System);
        assert_eq!(s.transcript()[0].content(), "prompt");
        assert!(s.history().is_empty());
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let mut s = ConversationSession::default();
        s.initialize("first");
        s.append_user("你好").unwrap();
        s.initialize("second");
        assert_eq!(s.transcript().len(), 2);
        assert_eq!(s.transcript()[0].content(), "first");
    }

    #[test]
    fn test_history_on_uninitialized_session_is_empty() {
        let s = ConversationSession::default();
        assert!(s.history().is_empty());
    }

    #[test]
    fn test_append_user_rejects_blank() {
        let mut s = ConversationSession::new("p");
        assert!(matches!(s.append_user(""), Err(TutorError::InvalidInput(_))));
        assert!(matches!(s.append_user("   "), Err(TutorError::InvalidInput(_))));
        assert!(matches!(s.append_user("\n\t"), Err(TutorError::InvalidInput(_))));
        assert_eq!(s.transcript().len(), 1);
    }

    #[test]
    fn test_append_preserves_order_and_raw_text() {
        let mut s = ConversationSession::new("p");
        s.append_user("你好").unwrap();
        s.append_assistant("not json at all");
        let h = s.history();
        assert_eq!(h.len(), 2);
        assert_eq!(h[0], Message::user("你好"));
        assert_eq!(h[1], Message::assistant("not json at all"));
    }

    #[test]
    fn test_reset_keeps_fresh_system_turn() {
        let mut s = ConversationSession::new("old");
        s.append_user("a").unwrap();
        s.append_assistant("b");
        s.reset("new");
        assert_eq!(s.transcript(), &[Message::system("new")]);
        assert!(s.history().is_empty());
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_value(Message::assistant("x")).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["content"], "x");
    }
}
