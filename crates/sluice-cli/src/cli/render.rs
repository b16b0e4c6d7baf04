//! Terminal output for ingest events.
//!
//! Reply text goes to stdout as batches arrive; reconnect notices go to
//! stderr so piped output stays clean.

use std::io::{self, Write};

use sluice_core::events::IngestEvent;

#[derive(Debug)]
pub struct Printer {
    ends_with_newline: bool,
}

impl Printer {
    pub fn new() -> Self {
        Self {
            ends_with_newline: true,
        }
    }

    pub fn event(&mut self, event: &IngestEvent) {
        match event {
            IngestEvent::Batch { text } => {
                let mut stdout = io::stdout().lock();
                let _ = stdout.write_all(text.as_bytes());
                let _ = stdout.flush();
                if !text.is_empty() {
                    self.ends_with_newline = text.ends_with('\n');
                }
            }
            IngestEvent::Retrying {
                attempt,
                delay,
                reason,
            } => {
                self.finish_line();
                eprintln!(
                    "[reconnecting (attempt {attempt}) in {:.1}s: {reason}]",
                    delay.as_secs_f64()
                );
            }
            // Outcomes are reported by the command once the stream ends.
            IngestEvent::Connecting { .. }
            | IngestEvent::Streaming { .. }
            | IngestEvent::Completed
            | IngestEvent::Failed { .. }
            | IngestEvent::Cancelled => {}
        }
    }

    /// Ends the reply with a newline if the stream did not.
    pub fn finish_line(&mut self) {
        if !self.ends_with_newline {
            println!();
            self.ends_with_newline = true;
        }
    }
}
