//! In-memory transport for tests: replays canned responses in order and
//! records every request it was asked to open.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures_util::{StreamExt, stream};

use super::{StreamRequest, Transport, TransportResponse};
use crate::error::{StreamError, StreamResult};

/// One canned response: content type, body chunks, and whether the body
/// stays open after the last chunk.
pub(crate) struct Reply {
    content_type: Option<&'static str>,
    chunks: Vec<StreamResult<&'static str>>,
    hang: bool,
}

pub(crate) type Script = StreamResult<Reply>;

pub(crate) fn reply(content_type: Option<&'static str>, chunks: &[&'static str]) -> Script {
    Ok(Reply {
        content_type,
        chunks: chunks.iter().map(|chunk| Ok(*chunk)).collect(),
        hang: false,
    })
}

/// A body that yields `chunks` (which may include errors) and then ends.
pub(crate) fn reply_with(
    content_type: Option<&'static str>,
    chunks: Vec<StreamResult<&'static str>>,
) -> Script {
    Ok(Reply {
        content_type,
        chunks,
        hang: false,
    })
}

/// A body that yields `chunks` and then never ends.
pub(crate) fn reply_then_hang(
    content_type: Option<&'static str>,
    chunks: &[&'static str],
) -> Script {
    Ok(Reply {
        content_type,
        chunks: chunks.iter().map(|chunk| Ok(*chunk)).collect(),
        hang: true,
    })
}

#[derive(Clone, Default)]
pub(crate) struct ScriptedTransport {
    scripts: Arc<Mutex<VecDeque<Script>>>,
    requests: Arc<Mutex<Vec<StreamRequest>>>,
}

impl ScriptedTransport {
    pub(crate) fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts.into())),
            requests: Arc::default(),
        }
    }

    pub(crate) fn requests(&self) -> Vec<StreamRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn cursors(&self) -> Vec<Option<String>> {
        self.requests()
            .into_iter()
            .map(|request| request.resume_cursor)
            .collect()
    }
}

impl Transport for ScriptedTransport {
    async fn open(&self, request: &StreamRequest) -> StreamResult<TransportResponse> {
        self.requests.lock().unwrap().push(request.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(StreamError::network("script exhausted")));
        let reply = script?;

        let chunks: Vec<StreamResult<Bytes>> = reply
            .chunks
            .into_iter()
            .map(|chunk| chunk.map(|text| Bytes::from_static(text.as_bytes())))
            .collect();
        let body = if reply.hang {
            stream::iter(chunks).chain(stream::pending()).boxed()
        } else {
            stream::iter(chunks).boxed()
        };
        Ok(TransportResponse {
            content_type: reply.content_type.map(ToString::to_string),
            body,
        })
    }
}
