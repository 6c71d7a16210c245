//! NapCat gateway support for nap-msg
//!
//! Speaks the OneBot v11 forward-WebSocket protocol: typed commands with
//! echo-correlated replies, the incoming event stream, message segment
//! builders, and the filter/mapping applied to watched events.

pub mod client;
pub mod config;
pub mod protocol;
pub mod segments;
pub mod watch;

pub use client::{
    EventSource, EventStream, NapcatEvents, NapcatRelay, Relay, send_group_forward_message,
    send_group_message, send_private_message,
};
pub use config::{RelayConfig, RelayTarget};
pub use protocol::{ChatId, Command, CommandType};
pub use segments::{Segment, SegmentError, forward_node};
pub use watch::{DEFAULT_IGNORE_PREFIXES, EventPipeline, ReceiveParams, WatchFilter};

use std::time::Duration;

/// Errors talking to the gateway
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("NAPCAT_URL is required")]
    MissingUrl,

    #[error("invalid gateway url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("gateway connection error: {0}")]
    Transport(String),

    #[error("gateway closed the connection before replying")]
    Closed,

    #[error("timed out after {0:?} waiting for gateway response")]
    Timeout(Duration),

    #[error("malformed gateway message: {0}")]
    Malformed(String),

    #[error("gateway rejected {action}: {message}")]
    Rejected { action: String, message: String },

    #[error("failed to read {path}: {reason}")]
    Io { path: String, reason: String },

    #[error(transparent)]
    Asr(#[from] napmsg_asr::AsrError),
}
