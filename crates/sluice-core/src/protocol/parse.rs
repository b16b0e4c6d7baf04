//! Per-line parsers.
//!
//! A bad line is never fatal: malformed JSON or an unexpected envelope yields
//! an event without content and the stream moves on to the next line.

use serde_json::Value;

use super::StreamProtocol;
use crate::error::{StreamError, StreamResult};

/// Payload that marks the end of an SSE stream.
pub const DONE_SENTINEL: &str = "[DONE]";

const SSE_DATA_PREFIX: &str = "data: ";

/// Result of parsing one logical line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedEvent {
    /// Text to deliver, if the line carried any.
    pub content: Option<String>,
    /// Server-assigned event id, usable as a resume cursor.
    pub resume_id: Option<String>,
    /// The line was the `[DONE]` sentinel.
    pub done: bool,
}

impl ParsedEvent {
    fn empty() -> Self {
        Self::default()
    }

    fn done() -> Self {
        Self {
            done: true,
            ..Self::default()
        }
    }

    pub fn has_content(&self) -> bool {
        self.content.is_some()
    }
}

/// Dispatches a complete line to the parser for `protocol`.
///
/// `terminated` tells whether the line ended with `\n` on the wire; plain text
/// gets its newline back only in that case.
pub fn parse_line(protocol: StreamProtocol, line: &str, terminated: bool) -> ParsedEvent {
    match protocol {
        StreamProtocol::OpenAiSse | StreamProtocol::StandardSse => parse_sse(line),
        StreamProtocol::Ndjson => parse_ndjson(line),
        StreamProtocol::PlainText => parse_plain_text(line, terminated),
        StreamProtocol::Unknown => {
            let sse = parse_sse(line);
            if sse.has_content() || sse.done {
                return sse;
            }
            let ndjson = parse_ndjson(line);
            if ndjson.has_content() {
                return ndjson;
            }
            ParsedEvent::empty()
        }
    }
}

/// Parses `data: ...` lines in either the OpenAI delta shape or the flat
/// `{"content": ...}` shape.
pub fn parse_sse(line: &str) -> ParsedEvent {
    let Some(data) = line.trim().strip_prefix(SSE_DATA_PREFIX) else {
        return ParsedEvent::empty();
    };
    if data.trim() == DONE_SENTINEL {
        return ParsedEvent::done();
    }

    match parse_json(data) {
        Ok(json) => {
            let content = json
                .get("choices")
                .and_then(Value::as_array)
                .and_then(|choices| choices.first())
                .and_then(|choice| choice.get("delta"))
                .and_then(|delta| non_empty_str(delta.get("content")))
                .or_else(|| non_empty_str(json.get("content")));
            ParsedEvent {
                content,
                resume_id: event_id(&json),
                done: false,
            }
        }
        Err(err) => {
            tracing::debug!(error = %err, "dropping malformed SSE line");
            ParsedEvent::empty()
        }
    }
}

/// Parses a line that is a whole JSON document (`content`, else `text`).
pub fn parse_ndjson(line: &str) -> ParsedEvent {
    match parse_json(line) {
        Ok(json) => ParsedEvent {
            content: non_empty_str(json.get("content")).or_else(|| non_empty_str(json.get("text"))),
            resume_id: event_id(&json),
            done: false,
        },
        Err(err) => {
            tracing::debug!(error = %err, "dropping malformed NDJSON line");
            ParsedEvent::empty()
        }
    }
}

/// The line is the content.
pub fn parse_plain_text(line: &str, terminated: bool) -> ParsedEvent {
    let mut content = line.to_string();
    if terminated {
        content.push('\n');
    }
    ParsedEvent {
        content: (!content.is_empty()).then_some(content),
        resume_id: None,
        done: false,
    }
}

/// Encodes one flat-shape SSE event.
pub fn encode_sse_content(text: &str) -> String {
    let payload = serde_json::json!({ "content": text });
    format!("{SSE_DATA_PREFIX}{payload}\n\n")
}

/// Encodes the SSE completion sentinel.
pub fn encode_sse_done() -> String {
    format!("{SSE_DATA_PREFIX}{DONE_SENTINEL}\n\n")
}

fn parse_json(raw: &str) -> StreamResult<Value> {
    serde_json::from_str::<Value>(raw.trim()).map_err(|err| StreamError::parse(err.to_string()))
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

/// Ids may be strings or integers on the wire.
fn event_id(json: &Value) -> Option<String> {
    match json.get("id")? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_delta_shape() {
        let event = parse_sse(r#"data: {"choices":[{"delta":{"content":"Hello"}}]}"#);
        assert_eq!(event.content.as_deref(), Some("Hello"));
        assert_eq!(event.resume_id, None);
        assert!(!event.done);
    }

    #[test]
    fn test_flat_sse_shape_with_id() {
        let event = parse_sse(r#"data: {"id":"7","content":"World"}"#);
        assert_eq!(event.content.as_deref(), Some("World"));
        assert_eq!(event.resume_id.as_deref(), Some("7"));
    }

    #[test]
    fn test_done_sentinel_is_not_an_error() {
        let event = parse_sse("data: [DONE]");
        assert_eq!(event.content, None);
        assert!(event.done);
    }

    #[test]
    fn test_sse_rejects_non_data_and_malformed_lines() {
        assert_eq!(parse_sse("invalid json"), ParsedEvent::empty());
        assert_eq!(parse_sse("event: ping"), ParsedEvent::empty());
        assert_eq!(parse_sse(r#"data: {"choices":[{"delta":"#), ParsedEvent::empty());
    }

    #[test]
    fn test_sse_keeps_id_when_delta_is_empty() {
        let event = parse_sse(r#"data: {"id":3,"choices":[{"delta":{"role":"assistant"}}]}"#);
        assert_eq!(event.content, None);
        assert_eq!(event.resume_id.as_deref(), Some("3"));
    }

    #[test]
    fn test_ndjson_content_then_text() {
        assert_eq!(
            parse_ndjson(r#"{"content":"World"}"#).content.as_deref(),
            Some("World")
        );
        assert_eq!(
            parse_ndjson(r#"{"type":"chunk","text":"React"}"#).content.as_deref(),
            Some("React")
        );
        assert_eq!(parse_ndjson(r#"{"type":"ping"}"#).content, None);
        assert_eq!(parse_ndjson("{broken"), ParsedEvent::empty());
    }

    #[test]
    fn test_plain_text_restores_newline() {
        assert_eq!(
            parse_plain_text("  indented", true).content.as_deref(),
            Some("  indented\n")
        );
        assert_eq!(parse_plain_text("tail", false).content.as_deref(), Some("tail"));
        assert_eq!(parse_plain_text("", true).content.as_deref(), Some("\n"));
        assert_eq!(parse_plain_text("", false).content, None);
    }

    #[test]
    fn test_unknown_falls_back_to_ndjson_then_drops() {
        let sse = parse_line(StreamProtocol::Unknown, r#"data: {"content":"a"}"#, true);
        assert_eq!(sse.content.as_deref(), Some("a"));

        let ndjson = parse_line(StreamProtocol::Unknown, r#"{"text":"b","id":"9"}"#, true);
        assert_eq!(ndjson.content.as_deref(), Some("b"));
        assert_eq!(ndjson.resume_id.as_deref(), Some("9"));

        let dropped = parse_line(StreamProtocol::Unknown, r#"{"id":"9"}"#, true);
        assert_eq!(dropped, ParsedEvent::empty());

        assert!(parse_line(StreamProtocol::Unknown, "data: [DONE]", true).done);
    }

    #[test]
    fn test_encoders_round_through_parser() {
        let encoded = encode_sse_content("line \"one\"\n");
        let line = encoded.lines().next().unwrap_or_default();
        assert_eq!(parse_sse(line).content.as_deref(), Some("line \"one\"\n"));
        assert_eq!(encode_sse_done(), "data: [DONE]\n\n");
    }
}
