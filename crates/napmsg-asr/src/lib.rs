//! Speech recognition for nap-msg
//!
//! Signs requests with the TC3-HMAC-SHA256 scheme and calls the Tencent
//! Cloud sentence recognition API to turn short voice messages into text.

pub mod client;
pub mod signer;

pub use client::AsrClient;
pub use signer::{SignedRequest, sign};

use std::time::Duration;

/// Default recognition engine when neither the call nor the environment sets one
pub const DEFAULT_ENGINE: &str = "16k_zh";

/// Default API endpoint
pub const DEFAULT_ENDPOINT: &str = "https://asr.tencentcloudapi.com";

/// Request timeout for one recognition call
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors surfaced by a recognition call
#[derive(Debug, thiserror::Error)]
pub enum AsrError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("Tencent Cloud ASR error: {code} - {message}")]
    RemoteService { code: String, message: String },

    #[error("Tencent Cloud did not return recognition result")]
    EmptyResult,
}

/// Symmetric credential pair
#[derive(Clone, Default)]
pub struct Credentials {
    secret_id: String,
    secret_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn mask(s: &str) -> &str {
            if s.is_empty() { "(empty)" } else { "***" }
        }
        f.debug_struct("Credentials")
            .field("secret_id", &self.secret_id)
            .field("secret_key", &mask(&self.secret_key))
            .finish()
    }
}

impl Credentials {
    pub fn new(secret_id: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            secret_id: secret_id.into().trim().to_string(),
            secret_key: secret_key.into().trim().to_string(),
        }
    }

    pub fn secret_id(&self) -> &str {
        &self.secret_id
    }

    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }

    /// Both halves present
    pub fn is_complete(&self) -> bool {
        !self.secret_id.is_empty() && !self.secret_key.is_empty()
    }
}

/// Configuration for the recognition client
#[derive(Debug, Clone)]
pub struct AsrConfig {
    pub credentials: Credentials,
    pub region: Option<String>,
    pub engine: String,
    pub endpoint: String,
    pub timeout: Duration,
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self {
            credentials: Credentials::default(),
            region: None,
            engine: DEFAULT_ENGINE.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout: REQUEST_TIMEOUT,
        }
    }
}

impl AsrConfig {
    /// Read `TENCENT_SECRET_ID`, `TENCENT_SECRET_KEY`, `TENCENT_ASR_REGION`
    /// and `TENCENT_ASR_ENGINE` from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Self {
            credentials: Credentials::new(
                get("TENCENT_SECRET_ID").unwrap_or_default(),
                get("TENCENT_SECRET_KEY").unwrap_or_default(),
            ),
            region: get("TENCENT_ASR_REGION"),
            engine: get("TENCENT_ASR_ENGINE").unwrap_or_else(|| DEFAULT_ENGINE.to_string()),
            ..Self::default()
        }
    }

    /// Recognition is only attempted when both credentials are set
    pub fn is_enabled(&self) -> bool {
        self.credentials.is_complete()
    }
}
