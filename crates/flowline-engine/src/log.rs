use serde::{Deserialize, Serialize};

use flowline_core::types::{ChatMessage, Role};

/// Append-only conversation history owned by one running workflow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationLog {
    messages: Vec<ChatMessage>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn extend(&mut self, messages: impl IntoIterator<Item = ChatMessage>) {
        self.messages.extend(messages);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Number of tool results recorded so far.
    pub fn tool_results(&self) -> usize {
        self.messages.iter().filter(|m| m.role == Role::Tool).count()
    }

    /// Copy of the history with `system` prepended, ready for a model request.
    pub fn with_system(&self, system: impl Into<String>) -> Vec<ChatMessage> {
        let mut out = Vec::with_capacity(self.messages.len() + 1);
        out.push(ChatMessage::system(system));
        out.extend(self.messages.iter().cloned());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_in_order() {
        let mut log = ConversationLog::new();
        log.push(ChatMessage::user("hi"));
        log.push(ChatMessage::assistant_text("hello"));
        log.push(ChatMessage::tool_result("c1", "42", false));

        assert_eq!(log.len(), 3);
        assert_eq!(log.last().map(|m| m.text()), Some("42".to_string()));
        assert_eq!(log.tool_results(), 1);

        let request = log.with_system("be brief");
        assert_eq!(request.len(), 4);
        assert_eq!(request[0].role, Role::System);
        assert_eq!(request[1].text(), "hi");
    }
}
