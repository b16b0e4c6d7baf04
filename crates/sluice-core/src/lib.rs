//! Core sluice library (protocol detection, framing, retry/resume, sessions).

pub mod batcher;
pub mod chat;
pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod events;
pub mod frame;
pub mod protocol;
pub mod session;
pub mod transport;
