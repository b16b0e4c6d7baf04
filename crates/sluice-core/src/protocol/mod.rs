//! Wire protocol detection and per-line parsing.

mod parse;
mod sniff;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use parse::{
    DONE_SENTINEL, ParsedEvent, encode_sse_content, encode_sse_done, parse_line, parse_ndjson,
    parse_plain_text, parse_sse,
};
pub use sniff::{detect_protocol, is_decisive_content_type};

/// Line-oriented formats a streaming response may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamProtocol {
    /// `data: {...}` lines; payload may be the OpenAI delta shape or a flat `content` object
    OpenAiSse,
    /// `data: {"content": ...}` lines (parsed identically to `OpenAiSse`)
    StandardSse,
    /// One JSON document per line
    Ndjson,
    /// Raw text, no envelope
    PlainText,
    /// Nothing decisive seen; each line is tried as SSE, then NDJSON
    Unknown,
}

impl fmt::Display for StreamProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamProtocol::OpenAiSse => write!(f, "openai_sse"),
            StreamProtocol::StandardSse => write!(f, "standard_sse"),
            StreamProtocol::Ndjson => write!(f, "ndjson"),
            StreamProtocol::PlainText => write!(f, "plain_text"),
            StreamProtocol::Unknown => write!(f, "unknown"),
        }
    }
}
