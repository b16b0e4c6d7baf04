//! Transport seam between the controller and the network.
//!
//! The controller only needs "issue this request, give me a content type and a
//! byte stream". Non-success statuses and connect failures come back as
//! [`StreamError`]s so the controller can classify them.

mod http;
mod trace;

#[cfg(test)]
pub(crate) mod scripted;

use std::future::Future;

use bytes::Bytes;
use futures_util::stream::BoxStream;

pub use http::HttpTransport;
pub use trace::DebugTrace;

use crate::context::ChatRequest;
use crate::error::StreamResult;

/// Name of the resume header.
pub const LAST_EVENT_ID_HEADER: &str = "Last-Event-ID";

/// Raw response body chunks.
pub type ByteStream = BoxStream<'static, StreamResult<Bytes>>;

/// One outbound request.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub url: String,
    pub body: ChatRequest,
    /// Sent as `Last-Event-ID` when present.
    pub resume_cursor: Option<String>,
}

/// A successful (2xx) response ready to be read.
pub struct TransportResponse {
    pub content_type: Option<String>,
    pub body: ByteStream,
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

pub trait Transport: Send + Sync {
    /// Opens the stream. Errors are already classified: `Network` for
    /// transport failures, `Http` for non-success statuses, `MissingBody`
    /// when there is nothing to read.
    fn open(
        &self,
        request: &StreamRequest,
    ) -> impl Future<Output = StreamResult<TransportResponse>> + Send;
}
