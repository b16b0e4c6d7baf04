//! Events emitted by the stream controller to its consumer.

use std::time::Duration;

use crate::error::StreamError;
use crate::protocol::StreamProtocol;

/// Identifies one controller run (one user exchange).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(pub u64);

#[derive(Debug, Default)]
pub struct StreamSeq {
    next: u64,
}

impl StreamSeq {
    pub fn next_id(&mut self) -> StreamId {
        let id = StreamId(self.next);
        self.next = self.next.wrapping_add(1);
        id
    }
}

/// Progress of an ingest run, in emission order.
///
/// A run ends with exactly one of `Completed`, `Failed` or `Cancelled`.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestEvent {
    /// A request is about to be issued. `attempt` is 0 for the first one.
    Connecting { attempt: u32 },

    /// First content of this attempt reached the batcher.
    Streaming {
        attempt: u32,
        protocol: StreamProtocol,
    },

    /// A retryable failure happened; the next attempt starts after `delay`.
    Retrying {
        attempt: u32,
        delay: Duration,
        reason: String,
    },

    /// Coalesced text, in wire order.
    Batch { text: String },

    /// The stream finished cleanly (sentinel or transport close).
    Completed,

    /// The stream ended in a fatal error.
    Failed { error: StreamError },

    /// Stopped by the consumer. Informational; no completion or error.
    Cancelled,
}

impl IngestEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            IngestEvent::Completed | IngestEvent::Failed { .. } | IngestEvent::Cancelled
        )
    }
}
