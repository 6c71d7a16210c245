//! JSON-RPC front end for nap-msg
//!
//! Reads one JSON request per input line, dispatches it against the gateway
//! relay, and pushes `message.receive` notifications from the watched event
//! stream onto the same output.

pub mod methods;
pub mod output;
pub mod protocol;
pub mod server;
pub mod subscription;

pub use methods::{Method, MethodTable};
pub use output::Outbox;
pub use server::RpcServer;
pub use subscription::{SubscriptionRunner, SubscriptionState};

use napmsg_gateway::GatewayError;

/// Errors surfaced by request handling
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("Method not found")]
    MethodNotFound(String),

    #[error("{0}")]
    InvalidParams(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("duplicate method name in dispatch table: {0}")]
    DuplicateMethod(&'static str),

    #[error("failed to encode output: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("output error: {0}")]
    Output(#[from] std::io::Error),

    #[error("input error: {0}")]
    Input(std::io::Error),
}

impl RpcError {
    /// JSON-RPC error code for this fault
    pub fn code(&self) -> i64 {
        match self {
            Self::MethodNotFound(_) => protocol::METHOD_NOT_FOUND,
            Self::InvalidParams(_) => protocol::INVALID_PARAMS,
            _ => protocol::SERVER_ERROR,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidParams(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(RpcError::MethodNotFound("x".into()).code(), -32601);
        assert_eq!(RpcError::invalid("bad").code(), -32602);
        assert_eq!(RpcError::Gateway(GatewayError::MissingUrl).code(), -32000);
    }

    #[test]
    fn test_gateway_message_passes_through() {
        let err = RpcError::from(GatewayError::MissingUrl);
        assert_eq!(err.to_string(), "NAPCAT_URL is required");
    }
}
