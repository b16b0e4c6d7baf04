//! Ctrl+C handling.
//!
//! The first Ctrl+C only raises a flag; whoever is waiting decides what it
//! means (stop the stream, leave the prompt). A second Ctrl+C before the flag
//! is cleared exits the process.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use tokio::sync::Notify;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);
static INTERRUPT_NOTIFY: OnceLock<Notify> = OnceLock::new();

#[derive(Debug)]
pub struct InterruptedError;

impl std::fmt::Display for InterruptedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Interrupted")
    }
}

impl std::error::Error for InterruptedError {}

/// Installs the Ctrl+C handler.
pub fn init() -> Result<()> {
    ctrlc::set_handler(trigger_ctrl_c).context("install Ctrl+C handler")
}

fn notifier() -> &'static Notify {
    INTERRUPT_NOTIFY.get_or_init(Notify::new)
}

fn trigger_ctrl_c() {
    if INTERRUPTED.swap(true, Ordering::SeqCst) {
        std::process::exit(130);
    }
    notifier().notify_waiters();
}

pub fn is_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Waits until Ctrl+C is pressed (returns at once if it already was).
pub async fn wait_for_interrupt() {
    loop {
        let notified = notifier().notified();
        if is_interrupted() {
            return;
        }
        notified.await;
    }
}

/// Clears the flag so the next Ctrl+C is treated as a first one again.
pub fn reset() {
    INTERRUPTED.store(false, Ordering::SeqCst);
}
