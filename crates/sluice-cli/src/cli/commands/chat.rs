//! Interactive chat.

use std::io::{IsTerminal, Write};

use anyhow::{Context, Result};
use sluice_core::chat::ChatClient;
use sluice_core::config::Config;
use sluice_core::controller::StreamOutcome;
use sluice_core::session::ChatSession;
use sluice_core::transport::HttpTransport;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::interrupt::{self, InterruptedError};

pub async fn run(config: &Config, url: &str) -> Result<()> {
    let transport =
        HttpTransport::new(config.endpoint.connect_timeout()).context("create HTTP client")?;
    let mut chat = ChatClient::new(transport, url, config);
    let mut session = ChatSession::new();

    let interactive = std::io::stdin().is_terminal();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("sluice chat ({})", chat.url());
    println!("Type a message and press Enter. :reset starts a new session, :q to quit.");

    loop {
        if interactive {
            print!("> ");
            let _ = std::io::stdout().flush();
        }

        let line = tokio::select! {
            line = lines.next_line() => line.context("read stdin")?,
            () = interrupt::wait_for_interrupt() => {
                println!();
                return Err(InterruptedError.into());
            }
        };
        let Some(line) = line else {
            break;
        };

        match line.trim() {
            "" => continue,
            ":q" | ":quit" => break,
            ":reset" => {
                chat.reset(&mut session).await;
                println!("Started a new session.");
                continue;
            }
            _ => {}
        }

        if chat.send(&mut session, &line).await.is_none() {
            continue;
        }
        let reply = super::stream_reply(&mut chat, &mut session).await;
        if reply.interrupted {
            // First Ctrl+C only stops the reply; the next one at the prompt
            // exits.
            interrupt::reset();
            eprintln!("[stopped]");
            continue;
        }
        match reply.outcome {
            Some(StreamOutcome::Failed(error)) => eprintln!("Error: {error}"),
            Some(StreamOutcome::Completed | StreamOutcome::Cancelled) | None => {}
        }
    }

    println!("Goodbye!");
    Ok(())
}
