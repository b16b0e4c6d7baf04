//! Chat session state and the message lifecycle reducer.
//!
//! All mutation goes through the methods here. Message content is append-only,
//! and a message status only ever moves from `streaming` to `done` or `error`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::{ChatRequest, WireMessage, crop_messages};
use crate::events::{IngestEvent, StreamId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Streaming,
    Done,
    Error,
}

impl MessageStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, MessageStatus::Streaming)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Connecting,
    Reconnecting,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub status: MessageStatus,
}

impl Message {
    /// User messages are complete the moment they exist.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::User,
            content: content.into(),
            status: MessageStatus::Done,
        }
    }

    /// An empty assistant message waiting for streamed text.
    pub fn assistant_streaming() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::Assistant,
            content: String::new(),
            status: MessageStatus::Streaming,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.status == MessageStatus::Streaming
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: String,
    pub messages: Vec<Message>,
    pub is_streaming: bool,
    pub connection_status: ConnectionStatus,
    /// Stream whose events may mutate this session.
    #[serde(skip)]
    active_stream: Option<StreamId>,
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            messages: Vec::new(),
            is_streaming: false,
            connection_status: ConnectionStatus::Connected,
            active_stream: None,
        }
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn active_stream(&self) -> Option<StreamId> {
        self.active_stream
    }

    /// Appends a message. User messages are forced to `done` and assistant
    /// messages to `streaming`; a new assistant message closes any other
    /// streaming one as `done`.
    pub fn add_message(&mut self, mut message: Message) {
        match message.role {
            Role::User => message.status = MessageStatus::Done,
            Role::Assistant => {
                message.status = MessageStatus::Streaming;
                for existing in self.messages.iter_mut().filter(|m| m.is_streaming()) {
                    existing.status = MessageStatus::Done;
                }
            }
        }
        self.messages.push(message);
    }

    /// Appends a flushed batch to the last message if it is a streaming
    /// assistant message. Anything else is a no-op.
    pub fn append_token(&mut self, batch: &str) {
        let Some(last) = self.messages.last_mut() else {
            return;
        };
        if last.role != Role::Assistant || !last.is_streaming() {
            return;
        }
        last.content.push_str(batch);
        self.connection_status = ConnectionStatus::Connected;
    }

    /// Closes the exchange. Only a streaming last message changes status.
    pub fn finish_message(&mut self, status: MessageStatus) {
        let status = if status.is_terminal() {
            status
        } else {
            MessageStatus::Done
        };
        if let Some(last) = self.messages.last_mut()
            && last.is_streaming()
        {
            last.status = status;
        }
        self.is_streaming = false;
        self.active_stream = None;
        self.connection_status = if status == MessageStatus::Error {
            ConnectionStatus::Disconnected
        } else {
            ConnectionStatus::Connected
        };
    }

    /// Fresh id, empty history. Events from any earlier stream are ignored
    /// from here on.
    pub fn reset_session(&mut self) {
        *self = Self::new();
    }

    pub fn set_streaming(&mut self, streaming: bool) {
        self.is_streaming = streaming;
        self.connection_status = if streaming {
            ConnectionStatus::Connecting
        } else {
            ConnectionStatus::Connected
        };
    }

    pub fn set_connection_status(&mut self, status: ConnectionStatus) {
        self.connection_status = status;
    }

    /// Host regained connectivity.
    pub fn mark_online(&mut self) {
        if self.connection_status == ConnectionStatus::Disconnected {
            self.connection_status = ConnectionStatus::Connected;
        }
    }

    /// Host lost connectivity.
    pub fn mark_offline(&mut self) {
        self.connection_status = ConnectionStatus::Disconnected;
    }

    /// Starts a new exchange owned by `stream`: appends the user message and
    /// an empty streaming assistant message, and returns the request body
    /// carrying the cropped history.
    pub fn begin_exchange(
        &mut self,
        content: &str,
        stream: StreamId,
        max_context_chars: usize,
    ) -> ChatRequest {
        if self.is_streaming {
            self.finish_message(MessageStatus::Done);
        }

        let user = Message::user(content);
        let history: Vec<WireMessage> = self
            .messages
            .iter()
            .chain(std::iter::once(&user))
            .map(WireMessage::from)
            .collect();

        self.add_message(user);
        self.add_message(Message::assistant_streaming());
        self.set_streaming(true);
        self.active_stream = Some(stream);

        ChatRequest {
            messages: crop_messages(&history, max_context_chars),
            session_id: self.id.clone(),
        }
    }

    /// Applies one controller event. Events from any stream other than the
    /// active one are dropped.
    pub fn apply(&mut self, stream: StreamId, event: &IngestEvent) {
        if self.active_stream != Some(stream) {
            return;
        }
        match event {
            IngestEvent::Connecting { attempt } => {
                if *attempt == 0 {
                    self.connection_status = ConnectionStatus::Connecting;
                }
            }
            IngestEvent::Streaming { .. } => {
                self.connection_status = ConnectionStatus::Connected;
            }
            IngestEvent::Retrying { .. } => {
                self.connection_status = ConnectionStatus::Reconnecting;
            }
            IngestEvent::Batch { text } => self.append_token(text),
            IngestEvent::Completed | IngestEvent::Cancelled => {
                self.finish_message(MessageStatus::Done);
            }
            IngestEvent::Failed { .. } => self.finish_message(MessageStatus::Error),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::StreamError;

    const BUDGET: usize = 16_000;

    fn streaming_session() -> (ChatSession, StreamId) {
        let mut session = ChatSession::new();
        let stream = StreamId(1);
        session.begin_exchange("hello", stream, BUDGET);
        (session, stream)
    }

    #[test]
    fn test_new_user_message_is_done() {
        let mut session = ChatSession::new();
        let mut message = Message::user("hi");
        message.status = MessageStatus::Streaming;
        session.add_message(message);
        assert_eq!(session.messages[0].status, MessageStatus::Done);
    }

    #[test]
    fn test_append_token_on_done_message_is_noop() {
        let (mut session, _) = streaming_session();
        session.append_token("Hi");
        session.finish_message(MessageStatus::Done);

        session.append_token(" late");
        let last = session.last_message().unwrap();
        assert_eq!(last.content, "Hi");
        assert_eq!(last.status, MessageStatus::Done);
    }

    #[test]
    fn test_append_token_ignores_user_message() {
        let mut session = ChatSession::new();
        session.add_message(Message::user("question"));
        session.append_token("stray");
        assert_eq!(session.messages[0].content, "question");
    }

    #[test]
    fn test_finish_error_disconnects_and_never_reverts() {
        let (mut session, _) = streaming_session();
        session.finish_message(MessageStatus::Error);
        assert_eq!(session.connection_status, ConnectionStatus::Disconnected);
        assert!(!session.is_streaming);

        session.finish_message(MessageStatus::Done);
        assert_eq!(session.last_message().unwrap().status, MessageStatus::Error);
        assert_eq!(session.connection_status, ConnectionStatus::Connected);
    }

    #[test]
    fn test_single_streaming_assistant() {
        let (mut session, _) = streaming_session();
        session.add_message(Message::assistant_streaming());
        let streaming = session.messages.iter().filter(|m| m.is_streaming()).count();
        assert_eq!(streaming, 1);
        assert!(session.messages[1].status.is_terminal());
    }

    #[test]
    fn test_assistant_message_starts_streaming() {
        let mut session = ChatSession::new();
        let mut message = Message::assistant_streaming();
        message.status = MessageStatus::Done;
        session.add_message(message);

        assert_eq!(session.messages[0].status, MessageStatus::Streaming);
        session.append_token("hi");
        assert_eq!(session.messages[0].content, "hi");
    }

    #[test]
    fn test_begin_exchange_supersedes_previous_stream() {
        let (mut session, first) = streaming_session();
        session.apply(first, &IngestEvent::Batch { text: "par".into() });

        let second = StreamId(2);
        let request = session.begin_exchange("next", second, BUDGET);

        assert_eq!(session.messages.len(), 4);
        assert_eq!(session.messages[1].status, MessageStatus::Done);
        assert_eq!(session.messages[1].content, "par");
        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.session_id, session.id);

        // Late output from the first stream cannot leak into the new reply.
        session.apply(first, &IngestEvent::Batch { text: "tial".into() });
        session.apply(first, &IngestEvent::Completed);
        assert_eq!(session.last_message().unwrap().content, "");
        assert!(session.is_streaming);
    }

    #[test]
    fn test_apply_full_lifecycle() {
        let (mut session, stream) = streaming_session();
        assert_eq!(session.connection_status, ConnectionStatus::Connecting);

        session.apply(stream, &IngestEvent::Connecting { attempt: 0 });
        session.apply(
            stream,
            &IngestEvent::Retrying {
                attempt: 1,
                delay: Duration::from_secs(1),
                reason: "HTTP 503".into(),
            },
        );
        assert_eq!(session.connection_status, ConnectionStatus::Reconnecting);

        session.apply(stream, &IngestEvent::Connecting { attempt: 1 });
        assert_eq!(session.connection_status, ConnectionStatus::Reconnecting);

        session.apply(stream, &IngestEvent::Batch { text: "Hi".into() });
        session.apply(stream, &IngestEvent::Batch { text: " there".into() });
        assert_eq!(session.connection_status, ConnectionStatus::Connected);
        session.apply(stream, &IngestEvent::Completed);

        let last = session.last_message().unwrap();
        assert_eq!(last.content, "Hi there");
        assert_eq!(last.status, MessageStatus::Done);
        assert_eq!(session.active_stream(), None);
    }

    #[test]
    fn test_apply_failure_marks_error() {
        let (mut session, stream) = streaming_session();
        session.apply(
            stream,
            &IngestEvent::Failed {
                error: StreamError::http_status(400, ""),
            },
        );
        assert_eq!(session.last_message().unwrap().status, MessageStatus::Error);
        assert_eq!(session.connection_status, ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_reset_drops_history_and_stream() {
        let (mut session, stream) = streaming_session();
        let old_id = session.id.clone();
        session.reset_session();

        assert_ne!(session.id, old_id);
        assert!(session.messages.is_empty());
        assert!(!session.is_streaming);

        session.apply(stream, &IngestEvent::Batch { text: "ghost".into() });
        assert!(session.messages.is_empty());
    }

    #[test]
    fn test_online_offline() {
        let mut session = ChatSession::new();
        session.mark_offline();
        assert_eq!(session.connection_status, ConnectionStatus::Disconnected);
        session.mark_online();
        assert_eq!(session.connection_status, ConnectionStatus::Connected);

        session.set_connection_status(ConnectionStatus::Reconnecting);
        session.mark_online();
        assert_eq!(session.connection_status, ConnectionStatus::Reconnecting);
    }

    #[test]
    fn test_session_serializes_without_stream_handle() {
        let (session, _) = streaming_session();
        let json = serde_json::to_value(&session).unwrap();
        assert!(json.get("active_stream").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][1]["status"], "streaming");
    }
}
