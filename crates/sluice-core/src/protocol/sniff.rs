//! Passive protocol detection from the `Content-Type` header and the first
//! non-empty body line.

use super::StreamProtocol;

const NDJSON_MEDIA_TYPES: &[&str] = &[
    "application/x-ndjson",
    "application/ndjson",
    "application/jsonl",
    "application/x-jsonlines",
];

/// Classifies a response. First match wins:
/// event-stream header, NDJSON header, plain-text header, then the body line.
pub fn detect_protocol(content_type: Option<&str>, first_line: Option<&str>) -> StreamProtocol {
    if let Some(protocol) = content_type.and_then(protocol_from_content_type) {
        return protocol;
    }

    if let Some(line) = first_line {
        let trimmed = line.trim();
        if trimmed.starts_with("data:") {
            return StreamProtocol::OpenAiSse;
        }
        if trimmed.starts_with('{') && trimmed.ends_with('}') {
            return StreamProtocol::Ndjson;
        }
    }

    StreamProtocol::Unknown
}

/// Whether the header alone settles the protocol (no body sniffing needed).
pub fn is_decisive_content_type(content_type: Option<&str>) -> bool {
    content_type.and_then(protocol_from_content_type).is_some()
}

fn protocol_from_content_type(content_type: &str) -> Option<StreamProtocol> {
    let lowered = content_type.to_ascii_lowercase();
    if lowered.contains("text/event-stream") {
        // OpenAI vs flat SSE payloads are told apart per line, not here.
        return Some(StreamProtocol::OpenAiSse);
    }
    if NDJSON_MEDIA_TYPES.iter().any(|media| lowered.contains(media)) {
        return Some(StreamProtocol::Ndjson);
    }
    if lowered.contains("text/plain") {
        return Some(StreamProtocol::PlainText);
    }
    None
}
