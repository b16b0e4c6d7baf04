//! Raw wire capture for debugging protocol issues.
//!
//! Enabled with `SLUICE_DEBUG_TRACE=1` (system temp dir) or
//! `SLUICE_DEBUG_TRACE=/some/dir`. Each attempt writes the request body and
//! the untouched response bytes, before any framing or parsing.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use futures_util::Stream;
use futures_util::future::Either;

const TRACE_ENV: &str = "SLUICE_DEBUG_TRACE";

static TRACE_COUNTER: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug, Clone)]
pub struct DebugTrace {
    id: String,
    dir: PathBuf,
}

impl DebugTrace {
    pub fn from_env(label: &str) -> Option<Self> {
        Self::from_setting(std::env::var(TRACE_ENV).ok().as_deref(), label)
    }

    fn from_setting(setting: Option<&str>, label: &str) -> Option<Self> {
        let trimmed = setting?.trim();
        if trimmed.is_empty() || trimmed == "0" || trimmed.eq_ignore_ascii_case("false") {
            return None;
        }

        let dir = if trimmed == "1" || trimmed.eq_ignore_ascii_case("true") {
            std::env::temp_dir().join("sluice-trace")
        } else {
            PathBuf::from(trimmed)
        };
        if let Err(err) = fs::create_dir_all(&dir) {
            tracing::warn!(dir = %dir.display(), error = %err, "debug trace disabled");
            return None;
        }

        let mut safe: String = label
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .take(32)
            .collect();
        if safe.is_empty() {
            safe.push_str("stream");
        }
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let counter = TRACE_COUNTER.fetch_add(1, Ordering::Relaxed);

        Some(Self {
            id: format!("{safe}_{ts}_{counter}"),
            dir,
        })
    }

    pub fn write_request(&self, body: &[u8]) {
        let path = self.dir.join(format!("{}_request.json", self.id));
        if let Err(err) = fs::write(&path, body) {
            tracing::debug!(path = %path.display(), error = %err, "failed to write request trace");
        }
    }

    fn response_writer(&self) -> Option<BufWriter<File>> {
        let path = self.dir.join(format!("{}_response.txt", self.id));
        File::create(path).ok().map(BufWriter::new)
    }
}

/// Copies every chunk into a file while passing it through unchanged.
pub struct TeeStream<S> {
    inner: S,
    sink: Option<BufWriter<File>>,
}

impl<S, E> Stream for TeeStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<Bytes, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = Pin::new(&mut self.inner).poll_next(cx);
        match &polled {
            Poll::Ready(Some(Ok(bytes))) => {
                // A failing sink stops tracing, never the stream.
                if let Some(sink) = &mut self.sink
                    && sink.write_all(bytes).is_err()
                {
                    self.sink = None;
                }
            }
            Poll::Ready(None) => {
                if let Some(mut sink) = self.sink.take() {
                    let _ = sink.flush();
                }
            }
            Poll::Ready(Some(Err(_))) | Poll::Pending => {}
        }
        polled
    }
}

pub fn wrap_stream<S, E>(trace: Option<DebugTrace>, stream: S) -> Either<S, TeeStream<S>>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    match trace.as_ref().and_then(DebugTrace::response_writer) {
        Some(sink) => Either::Right(TeeStream {
            inner: stream,
            sink: Some(sink),
        }),
        None => Either::Left(stream),
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{StreamExt, stream};

    use super::*;

    #[test]
    fn test_disabled_settings() {
        assert!(DebugTrace::from_setting(None, "s").is_none());
        assert!(DebugTrace::from_setting(Some(""), "s").is_none());
        assert!(DebugTrace::from_setting(Some("0"), "s").is_none());
        assert!(DebugTrace::from_setting(Some("false"), "s").is_none());
    }

    #[tokio::test]
    async fn test_tee_writes_raw_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let trace =
            DebugTrace::from_setting(Some(dir.path().to_str().unwrap()), "session/1").unwrap();
        trace.write_request(b"{}");

        let chunks = vec![
            Ok::<_, std::io::Error>(Bytes::from_static(b"data: a\n")),
            Ok(Bytes::from_static(b"data: b")),
        ];
        let collected: Vec<_> = wrap_stream(Some(trace), stream::iter(chunks))
            .collect()
            .await;
        assert_eq!(collected.len(), 2);

        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names.len(), 2);
        assert!(names[0].starts_with("session_1_"));

        let response = names.iter().find(|n| n.ends_with("_response.txt")).unwrap();
        let raw = fs::read_to_string(dir.path().join(response)).unwrap();
        assert_eq!(raw, "data: a\ndata: b");
    }
}
