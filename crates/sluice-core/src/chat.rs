//! Exchange orchestration.
//!
//! A [`ChatClient`] owns at most one stream in flight per session. Stopping,
//! resetting or sending a new message cancels that stream and keeps applying
//! its events until it reports a terminal one, so text the batcher was still
//! holding lands in the reply before the reply is closed.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{BatchConfig, Config, RetryConfig};
use crate::controller::{StreamController, StreamOutcome};
use crate::error::StreamError;
use crate::events::{IngestEvent, StreamId, StreamSeq};
use crate::session::{ChatSession, MessageStatus};
use crate::transport::{StreamRequest, Transport};

/// A spawned controller run. Dropping it cancels the run.
struct ActiveStream {
    id: StreamId,
    events: mpsc::UnboundedReceiver<IngestEvent>,
    cancel: CancellationToken,
    handle: JoinHandle<StreamOutcome>,
}

impl ActiveStream {
    /// Applies every remaining event to `session` until the run ends.
    ///
    /// Dropping the future part-way leaves the stream intact; a later call
    /// picks up from the next undelivered event.
    async fn drive<F>(&mut self, session: &mut ChatSession, mut on_event: F) -> StreamOutcome
    where
        F: FnMut(&ChatSession, &IngestEvent),
    {
        while let Some(event) = self.events.recv().await {
            session.apply(self.id, &event);
            on_event(session, &event);
        }

        match (&mut self.handle).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(stream = self.id.0, error = %err, "stream task ended abnormally");
                let error = StreamError::network(format!("stream task ended: {err}"));
                session.apply(
                    self.id,
                    &IngestEvent::Failed {
                        error: error.clone(),
                    },
                );
                StreamOutcome::Failed(error)
            }
        }
    }
}

impl Drop for ActiveStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub struct ChatClient<T> {
    transport: T,
    url: String,
    retry: RetryConfig,
    batch: BatchConfig,
    max_context_chars: usize,
    seq: StreamSeq,
    active: Option<ActiveStream>,
}

impl<T> ChatClient<T>
where
    T: Transport + Clone + 'static,
{
    pub fn new(transport: T, url: impl Into<String>, config: &Config) -> Self {
        Self {
            transport,
            url: url.into(),
            retry: config.retry.clone(),
            batch: config.batch.clone(),
            max_context_chars: config.context.max_context_chars,
            seq: StreamSeq::default(),
            active: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Id of the stream currently in flight.
    pub fn active_stream(&self) -> Option<StreamId> {
        self.active.as_ref().map(|active| active.id)
    }

    /// Token that stops the in-flight stream when cancelled. The stream still
    /// has to be driven to deliver its last batch.
    pub fn cancel_token(&self) -> Option<CancellationToken> {
        self.active.as_ref().map(|active| active.cancel.clone())
    }

    /// Starts an exchange for `text` and returns its stream id. Blank input
    /// is ignored. A stream still in flight is stopped first.
    ///
    /// Must be called from within a tokio runtime: the controller runs on its
    /// own task.
    pub async fn send(&mut self, session: &mut ChatSession, text: &str) -> Option<StreamId> {
        if text.trim().is_empty() {
            tracing::debug!("ignoring blank message");
            return None;
        }

        if let Some(outcome) = self.stop(session).await {
            tracing::debug!(?outcome, "superseded previous stream");
        }

        let id = self.seq.next_id();
        let body = session.begin_exchange(text, id, self.max_context_chars);
        let request = StreamRequest {
            url: self.url.clone(),
            body,
            resume_cursor: None,
        };
        tracing::debug!(
            stream = id.0,
            session = %session.id,
            history = request.body.messages.len(),
            "starting exchange"
        );

        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut controller =
            StreamController::new(self.transport.clone(), self.retry.clone(), &self.batch);
        let task_cancel = cancel.clone();
        let handle =
            tokio::spawn(async move { controller.run(request, &tx, &task_cancel).await });

        self.active = Some(ActiveStream {
            id,
            events: rx,
            cancel,
            handle,
        });
        Some(id)
    }

    /// Waits for the next event of the in-flight stream and applies it to
    /// `session`. `None` once the stream has nothing more to report.
    pub async fn next_event(&mut self, session: &mut ChatSession) -> Option<IngestEvent> {
        let active = self.active.as_mut()?;
        let event = active.events.recv().await?;
        session.apply(active.id, &event);
        Some(event)
    }

    /// Applies the in-flight stream's events to `session` until it ends.
    /// `on_event` sees each event after the session has been updated.
    ///
    /// `None` when nothing is in flight.
    pub async fn drive<F>(
        &mut self,
        session: &mut ChatSession,
        on_event: F,
    ) -> Option<StreamOutcome>
    where
        F: FnMut(&ChatSession, &IngestEvent),
    {
        let active = self.active.as_mut()?;
        let outcome = active.drive(session, on_event).await;
        self.active = None;
        Some(outcome)
    }

    /// Cancels the in-flight stream, applies whatever it flushes on the way
    /// out and closes the reply as `done`.
    pub async fn stop(&mut self, session: &mut ChatSession) -> Option<StreamOutcome> {
        if let Some(cancel) = self.cancel_token() {
            cancel.cancel();
        }
        let outcome = self.drive(session, |_, _| {}).await;
        if session.is_streaming {
            session.finish_message(MessageStatus::Done);
        }
        outcome
    }

    /// Stops the in-flight stream and starts a fresh session.
    pub async fn reset(&mut self, session: &mut ChatSession) {
        self.stop(session).await;
        session.reset_session();
    }
}
