//! One-shot send.

use anyhow::{Context, Result};
use sluice_core::chat::ChatClient;
use sluice_core::config::Config;
use sluice_core::controller::StreamOutcome;
use sluice_core::session::ChatSession;
use sluice_core::transport::HttpTransport;

use crate::interrupt::InterruptedError;

pub async fn run(config: &Config, url: &str, prompt: &str) -> Result<()> {
    let transport =
        HttpTransport::new(config.endpoint.connect_timeout()).context("create HTTP client")?;
    let mut chat = ChatClient::new(transport, url, config);
    let mut session = ChatSession::new();

    if chat.send(&mut session, prompt).await.is_none() {
        anyhow::bail!("Prompt is empty");
    }

    let reply = super::stream_reply(&mut chat, &mut session).await;
    if reply.interrupted {
        return Err(InterruptedError.into());
    }
    match reply.outcome {
        Some(StreamOutcome::Failed(error)) => {
            Err(anyhow::Error::new(error).context("Stream failed"))
        }
        Some(StreamOutcome::Completed | StreamOutcome::Cancelled) | None => Ok(()),
    }
}
