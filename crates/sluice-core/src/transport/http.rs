//! reqwest-backed transport.

use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE};

use super::trace::{DebugTrace, wrap_stream};
use super::{LAST_EVENT_ID_HEADER, StreamRequest, Transport, TransportResponse};
use crate::error::{StreamError, StreamResult};

/// Standard User-Agent header for sluice requests.
pub const USER_AGENT: &str = concat!("sluice/", env!("CARGO_PKG_VERSION"));

const ACCEPTED_MEDIA_TYPES: &str =
    "text/event-stream, application/x-ndjson, application/jsonl, text/plain;q=0.9, */*;q=0.5";

#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built (e.g. TLS backend
    /// initialisation fails).
    pub fn new(connect_timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::Client::builder().user_agent(USER_AGENT);
        if let Some(timeout) = connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let http = builder.build().context("build HTTP client")?;
        Ok(Self { http })
    }
}

impl Transport for HttpTransport {
    async fn open(&self, request: &StreamRequest) -> StreamResult<TransportResponse> {
        let trace = DebugTrace::from_env(&request.body.session_id);
        if let Some(trace) = &trace
            && let Ok(body) = serde_json::to_vec_pretty(&request.body)
        {
            trace.write_request(&body);
        }

        let mut builder = self
            .http
            .post(&request.url)
            .header(ACCEPT, ACCEPTED_MEDIA_TYPES)
            .json(&request.body);
        if let Some(cursor) = &request.resume_cursor {
            builder = builder.header(LAST_EVENT_ID_HEADER, cursor);
        }

        let response = builder.send().await.map_err(classify_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(StreamError::http_status(status.as_u16(), &error_body));
        }
        if status == StatusCode::NO_CONTENT {
            return Err(StreamError::MissingBody);
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string);

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(classify_reqwest_error));
        Ok(TransportResponse {
            content_type,
            body: wrap_stream(trace, bytes).boxed(),
        })
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> StreamError {
    if e.is_timeout() {
        StreamError::network(format!("Request timed out: {e}"))
    } else if e.is_connect() {
        StreamError::network(format!("Connection failed: {e}"))
    } else if e.is_body() || e.is_decode() {
        StreamError::network(format!("Response body interrupted: {e}"))
    } else {
        StreamError::network(format!("Request error: {e}"))
    }
}
