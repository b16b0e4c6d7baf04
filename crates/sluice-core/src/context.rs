//! Outbound request body and history cropping.

use serde::{Deserialize, Serialize};

use crate::session::{Message, Role};

/// One history entry as sent on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: Role,
    pub content: String,
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
        }
    }
}

/// `POST` body: `{ "messages": [...], "sessionId": "..." }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub messages: Vec<WireMessage>,
    pub session_id: String,
}

/// Crops history to fit `max_chars`.
///
/// The newest message is always kept. Older messages are added newest-first
/// until the next one would overflow; the walk stops there, so nothing older
/// than an overflowing message is sent.
pub fn crop_messages(messages: &[WireMessage], max_chars: usize) -> Vec<WireMessage> {
    let Some((last, older)) = messages.split_last() else {
        return Vec::new();
    };

    let mut total = last.content.chars().count();
    let mut kept = vec![last.clone()];

    for message in older.iter().rev() {
        let len = message.content.chars().count();
        if total + len > max_chars {
            break;
        }
        total += len;
        kept.push(message.clone());
    }

    kept.reverse();
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(role: Role, content: &str) -> WireMessage {
        WireMessage {
            role,
            content: content.to_string(),
        }
    }

    #[test]
    fn test_empty_history() {
        assert!(crop_messages(&[], 100).is_empty());
    }

    #[test]
    fn test_keeps_everything_within_budget() {
        let history = vec![
            wire(Role::User, "hi"),
            wire(Role::Assistant, "hello"),
            wire(Role::User, "again"),
        ];
        assert_eq!(crop_messages(&history, 100), history);
    }

    #[test]
    fn test_stops_at_first_overflow() {
        let history = vec![
            wire(Role::User, "a"),
            wire(Role::Assistant, "0123456789"),
            wire(Role::User, "bb"),
            wire(Role::User, "last"),
        ];
        // "last" (4) + "bb" (2) fit in 8; the 10-char message overflows and
        // stops the walk even though "a" alone would still fit.
        let cropped = crop_messages(&history, 8);
        assert_eq!(cropped, vec![wire(Role::User, "bb"), wire(Role::User, "last")]);
    }

    #[test]
    fn test_newest_kept_even_when_oversized() {
        let history = vec![wire(Role::User, "old"), wire(Role::User, "far too long")];
        assert_eq!(crop_messages(&history, 4), vec![wire(Role::User, "far too long")]);
    }

    #[test]
    fn test_request_serializes_session_id_in_camel_case() {
        let request = ChatRequest {
            messages: vec![wire(Role::User, "hello")],
            session_id: "s-1".to_string(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "messages": [{"role": "user", "content": "hello"}],
                "sessionId": "s-1"
            })
        );
    }
}
