use serde::Serialize;

use super::message::Message;
use super::role::Role;

/// Ordered, append-only history of one bridge session.
///
/// A system message, when present, is always the first entry and is never
/// repeated. Only the bridge (through the crate-private API) can grow or
/// roll back the history.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new(system_prompt: Option<&str>) -> Self {
        let messages = system_prompt
            .map(|prompt| vec![Message::system().with_text(prompt)])
            .unwrap_or_default();
        Self { messages }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .first()
            .filter(|message| message.role == Role::System)
            .map(|message| message.content.as_str())
    }

    pub(crate) fn push(&mut self, message: Message) {
        debug_assert!(
            message.role != Role::System,
            "system message must only be set at construction"
        );
        self.messages.push(message);
    }

    /// Drop everything appended after `len` entries
    pub(crate) fn truncate(&mut self, len: usize) {
        self.messages.truncate(len);
    }
}
