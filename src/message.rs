//! Chat messages and the announcement texts synthesized by the server

use crate::session::SessionId;

/// A single line of output, tagged with the session it originated from.
///
/// The sender is used only to exclude the originator from fanout; the
/// recipient sees nothing but `content`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    pub sender: SessionId,
    pub content: String,
}

impl ChatMessage {
    pub fn new(sender: SessionId, content: impl Into<String>) -> Self {
        Self {
            sender,
            content: content.into(),
        }
    }

    /// A line typed by a client, prefixed with its session id
    pub fn chat_line(sender: &SessionId, line: &str) -> Self {
        Self::new(sender.clone(), format!("{}:{}", sender, line))
    }

    /// Greeting placed on the new session's own queue
    pub fn welcome(id: &SessionId) -> Self {
        Self::new(id.clone(), format!("Welcome, {}", id))
    }

    /// Announcement to everyone else that a session has joined
    pub fn entered(id: &SessionId) -> Self {
        Self::new(id.clone(), format!("user:`{}` has entered", id))
    }

    /// Announcement to everyone else that a session has gone
    pub fn left(id: &SessionId) -> Self {
        Self::new(id.clone(), format!("user:`{}` has left", id))
    }
}
