//! Retry/resume controller.
//!
//! Owns the attempt loop for one stream: opens the transport, frames and
//! parses the body, feeds the token batcher, and on failure decides between
//! backing off and retrying (carrying the resume cursor) or failing.
//!
//! ```text
//! Idle -> Connecting -> Streaming -> Done
//!            |  ^          |
//!            v  |          v
//!          Retrying <------+        any -> Cancelled
//!            |
//!            v
//!          Failed
//! ```
//!
//! Cancellation is cooperative: the token is checked while connecting, at
//! every body read and before and during each backoff sleep.

use std::fmt;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::batcher::TokenBatcher;
use crate::config::{BatchConfig, RetryConfig};
use crate::error::{StreamError, StreamResult};
use crate::events::IngestEvent;
use crate::frame::FrameSplitter;
use crate::protocol::{StreamProtocol, detect_protocol, is_decisive_content_type, parse_line};
use crate::transport::{StreamRequest, Transport};

/// Sender half the controller reports through.
pub type EventSink = mpsc::UnboundedSender<IngestEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Connecting,
    Streaming,
    Retrying,
    Done,
    Failed,
    Cancelled,
}

impl ControllerState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ControllerState::Done | ControllerState::Failed | ControllerState::Cancelled
        )
    }

    /// Edges of the attempt state machine.
    pub fn can_transition_to(self, next: ControllerState) -> bool {
        use ControllerState::{Cancelled, Connecting, Done, Failed, Idle, Retrying, Streaming};

        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (_, Cancelled)
                | (Idle | Retrying, Connecting)
                | (Connecting, Streaming | Done)
                | (Streaming, Done)
                | (Connecting | Streaming, Retrying | Failed)
        )
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControllerState::Idle => "idle",
            ControllerState::Connecting => "connecting",
            ControllerState::Streaming => "streaming",
            ControllerState::Retrying => "retrying",
            ControllerState::Done => "done",
            ControllerState::Failed => "failed",
            ControllerState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// One connection attempt within a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamAttempt {
    pub protocol: StreamProtocol,
    pub resume_cursor: Option<String>,
    pub attempt_index: u32,
    pub has_delivered_content: bool,
    /// Content arrived without an id after the cursor was last moved. The
    /// server cannot skip it on resume.
    pub delivered_since_cursor: bool,
}

impl StreamAttempt {
    fn first(resume_cursor: Option<String>) -> Self {
        Self {
            protocol: StreamProtocol::Unknown,
            resume_cursor,
            attempt_index: 0,
            has_delivered_content: false,
            delivered_since_cursor: false,
        }
    }

    /// The follow-up attempt: same cursor, next index, fresh protocol sniff.
    fn next(&self) -> Self {
        Self {
            protocol: StreamProtocol::Unknown,
            resume_cursor: self.resume_cursor.clone(),
            attempt_index: self.attempt_index + 1,
            has_delivered_content: false,
            delivered_since_cursor: false,
        }
    }

    /// Moves the cursor forward. A numeric id lower than the current numeric
    /// cursor is ignored.
    fn record_resume_id(&mut self, id: &str) {
        if let Some(current) = &self.resume_cursor
            && let (Ok(current), Ok(next)) = (current.parse::<u64>(), id.parse::<u64>())
            && next < current
        {
            tracing::debug!(current, next, "ignoring out-of-order resume id");
            return;
        }
        self.resume_cursor = Some(id.to_string());
        self.delivered_since_cursor = false;
    }

    /// Whether a reconnect from the cursor would pick up exactly where the
    /// delivered text ends.
    fn can_resume(&self) -> bool {
        self.resume_cursor.is_some() && !self.delivered_since_cursor
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    Failed(StreamError),
    Cancelled,
}

/// Delay before the attempt numbered `attempt_index` (1 for the first retry):
/// `initial × factor^(index-1) × (1 + jitter_fraction × random)`.
///
/// `random` is expected in `[0, 1]` and is clamped to it.
pub fn backoff_delay(config: &RetryConfig, attempt_index: u32, random: f64) -> Duration {
    let exponent = attempt_index.saturating_sub(1).min(i32::MAX as u32) as i32;
    let base_ms = config.initial_delay_ms as f64 * config.backoff_factor.powi(exponent);
    let jitter = 1.0 + config.jitter_fraction.max(0.0) * random.clamp(0.0, 1.0);
    let delay_ms = base_ms * jitter;

    if !delay_ms.is_finite() || delay_ms <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(delay_ms / 1000.0).unwrap_or(Duration::MAX)
}

enum AttemptEnd {
    Done,
    Cancelled,
}

pub struct StreamController<T> {
    transport: T,
    retry: RetryConfig,
    flush_interval: Duration,
    state: ControllerState,
    attempt: StreamAttempt,
}

impl<T: Transport> StreamController<T> {
    pub fn new(transport: T, retry: RetryConfig, batch: &BatchConfig) -> Self {
        Self {
            transport,
            retry,
            flush_interval: batch.flush_interval(),
            state: ControllerState::Idle,
            attempt: StreamAttempt::first(None),
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Drives the stream to a terminal state, reporting through `events`.
    pub async fn run(
        &mut self,
        mut request: StreamRequest,
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> StreamOutcome {
        let mut batcher = TokenBatcher::new(self.flush_interval);
        self.state = ControllerState::Idle;
        self.attempt = StreamAttempt::first(request.resume_cursor.take());
        self.transition(ControllerState::Connecting);

        loop {
            if cancel.is_cancelled() {
                return self.finish_cancelled(&mut batcher, events);
            }

            request.resume_cursor.clone_from(&self.attempt.resume_cursor);
            emit(
                events,
                IngestEvent::Connecting {
                    attempt: self.attempt.attempt_index,
                },
            );

            let error = match self.run_attempt(&request, &mut batcher, events, cancel).await {
                Ok(AttemptEnd::Done) => {
                    flush(&mut batcher, events);
                    self.transition(ControllerState::Done);
                    emit(events, IngestEvent::Completed);
                    return StreamOutcome::Completed;
                }
                Ok(AttemptEnd::Cancelled) => return self.finish_cancelled(&mut batcher, events),
                Err(error) => error,
            };

            if let Err(fatal) = self.check_retry(error.clone()) {
                flush(&mut batcher, events);
                self.transition(ControllerState::Failed);
                tracing::error!(
                    error = %fatal,
                    attempt = self.attempt.attempt_index,
                    "stream failed"
                );
                emit(
                    events,
                    IngestEvent::Failed {
                        error: fatal.clone(),
                    },
                );
                return StreamOutcome::Failed(fatal);
            }

            // Text from a resumable attempt is real output; show it before waiting.
            flush(&mut batcher, events);

            let next = self.attempt.next();
            let delay = backoff_delay(&self.retry, next.attempt_index, rand::random::<f64>());
            self.transition(ControllerState::Retrying);
            tracing::warn!(
                attempt = next.attempt_index,
                max_retries = self.retry.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "stream attempt failed, retrying"
            );
            emit(
                events,
                IngestEvent::Retrying {
                    attempt: next.attempt_index,
                    delay,
                    reason: error.to_string(),
                },
            );

            if cancel.is_cancelled() {
                return self.finish_cancelled(&mut batcher, events);
            }
            tokio::select! {
                biased;
                () = cancel.cancelled() => return self.finish_cancelled(&mut batcher, events),
                () = sleep(delay) => {}
            }

            self.attempt = next;
            self.transition(ControllerState::Connecting);
        }
    }

    /// `Ok` when `error` may be retried from the current attempt, otherwise
    /// the error the stream should fail with.
    fn check_retry(&self, error: StreamError) -> StreamResult<()> {
        if !error.is_retryable() {
            return Err(error);
        }
        let resumable = self.retry.resume_mid_stream && self.attempt.can_resume();
        if self.attempt.has_delivered_content && !resumable {
            // Restarting would replay text the consumer already has.
            return Err(error);
        }
        if self.attempt.attempt_index >= self.retry.max_retries {
            return Err(StreamError::RetriesExhausted {
                attempts: self.retry.max_retries,
                last: Box::new(error),
            });
        }
        Ok(())
    }

    async fn run_attempt(
        &mut self,
        request: &StreamRequest,
        batcher: &mut TokenBatcher,
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> StreamResult<AttemptEnd> {
        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(AttemptEnd::Cancelled),
            response = self.transport.open(request) => response?,
        };

        let content_type = response.content_type;
        let mut sniffed = is_decisive_content_type(content_type.as_deref());
        if sniffed {
            self.attempt.protocol = detect_protocol(content_type.as_deref(), None);
            tracing::debug!(protocol = %self.attempt.protocol, "protocol from content type");
        }

        let mut body = response.body;
        let mut splitter = FrameSplitter::new();

        loop {
            let deadline = batcher.deadline();
            let has_pending = batcher.has_pending();

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(AttemptEnd::Cancelled),
                () = sleep_until(deadline), if has_pending => {
                    if let Some(text) = batcher.take_if_due(Instant::now()) {
                        emit(events, IngestEvent::Batch { text });
                    }
                }
                chunk = body.next() => match chunk {
                    Some(Ok(bytes)) => {
                        for line in splitter.push(&bytes) {
                            let mut line_ctx = LineContext {
                                content_type: content_type.as_deref(),
                                sniffed: &mut sniffed,
                                batcher: &mut *batcher,
                                events,
                            };
                            if self.handle_line(&line, true, &mut line_ctx) {
                                return Ok(AttemptEnd::Done);
                            }
                        }
                    }
                    Some(Err(error)) => return Err(error),
                    None => {
                        // The last event may arrive without a trailing newline.
                        if let Some(line) = splitter.finish() {
                            let mut line_ctx = LineContext {
                                content_type: content_type.as_deref(),
                                sniffed: &mut sniffed,
                                batcher: &mut *batcher,
                                events,
                            };
                            self.handle_line(&line, false, &mut line_ctx);
                        }
                        return Ok(AttemptEnd::Done);
                    }
                },
            }
        }
    }

    /// Parses one line and delivers its content. Returns `true` on the
    /// completion sentinel.
    fn handle_line(&mut self, line: &str, terminated: bool, ctx: &mut LineContext<'_>) -> bool {
        if !*ctx.sniffed {
            if line.trim().is_empty() {
                return false;
            }
            self.attempt.protocol = detect_protocol(ctx.content_type, Some(line));
            *ctx.sniffed = true;
            tracing::debug!(protocol = %self.attempt.protocol, "protocol sniffed from body");
        }

        let protocol = self.attempt.protocol;
        if protocol != StreamProtocol::PlainText && line.trim().is_empty() {
            return false;
        }

        let event = parse_line(protocol, line, terminated);
        if let Some(id) = &event.resume_id {
            self.attempt.record_resume_id(id);
        }
        if event.done {
            return true;
        }
        let Some(content) = event.content else {
            return false;
        };
        if event.resume_id.is_none() {
            self.attempt.delivered_since_cursor = true;
        }

        if !self.attempt.has_delivered_content {
            self.attempt.has_delivered_content = true;
            self.transition(ControllerState::Streaming);
            emit(
                ctx.events,
                IngestEvent::Streaming {
                    attempt: self.attempt.attempt_index,
                    protocol,
                },
            );
        }
        if let Some(text) = ctx.batcher.push(&content) {
            emit(ctx.events, IngestEvent::Batch { text });
        }
        false
    }

    fn finish_cancelled(
        &mut self,
        batcher: &mut TokenBatcher,
        events: &EventSink,
    ) -> StreamOutcome {
        flush(batcher, events);
        self.transition(ControllerState::Cancelled);
        tracing::debug!(attempt = self.attempt.attempt_index, "stream cancelled");
        emit(events, IngestEvent::Cancelled);
        StreamOutcome::Cancelled
    }

    fn transition(&mut self, next: ControllerState) {
        if self.state == next {
            return;
        }
        if !self.state.can_transition_to(next) {
            tracing::warn!(from = %self.state, to = %next, "unexpected controller transition");
        }
        tracing::debug!(from = %self.state, to = %next, "controller transition");
        self.state = next;
    }
}

struct LineContext<'a> {
    content_type: Option<&'a str>,
    sniffed: &'a mut bool,
    batcher: &'a mut TokenBatcher,
    events: &'a EventSink,
}

fn emit(events: &EventSink, event: IngestEvent) {
    // A dropped receiver only means nobody is watching any more.
    let _ = events.send(event);
}

fn flush(batcher: &mut TokenBatcher, events: &EventSink) {
    if let Some(text) = batcher.flush() {
        emit(events, IngestEvent::Batch { text });
    }
}
