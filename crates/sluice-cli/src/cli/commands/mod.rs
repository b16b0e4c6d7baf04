//! CLI command handlers.

pub mod chat;
pub mod config;
pub mod send;

use sluice_core::chat::ChatClient;
use sluice_core::controller::StreamOutcome;
use sluice_core::session::ChatSession;
use sluice_core::transport::HttpTransport;

use super::render::Printer;
use crate::interrupt;

/// How a printed reply ended.
struct Reply {
    outcome: Option<StreamOutcome>,
    /// Ctrl+C arrived while the reply was streaming.
    interrupted: bool,
}

/// Prints the in-flight reply as it streams. Ctrl+C cancels the stream, which
/// is still driven to the end so its last batch is printed and kept.
async fn stream_reply(chat: &mut ChatClient<HttpTransport>, session: &mut ChatSession) -> Reply {
    let mut printer = Printer::new();
    let cancel = chat.cancel_token();
    let mut interrupted = false;

    let outcome = {
        let drive = chat.drive(session, |_, event| printer.event(event));
        tokio::pin!(drive);
        loop {
            tokio::select! {
                outcome = &mut drive => break outcome,
                () = interrupt::wait_for_interrupt(), if !interrupted => {
                    interrupted = true;
                    if let Some(cancel) = &cancel {
                        cancel.cancel();
                    }
                }
            }
        }
    };
    printer.finish_line();

    Reply {
        outcome,
        interrupted,
    }
}
