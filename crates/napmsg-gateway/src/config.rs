//! Relay configuration
//!
//! Defaults come from the environment once at startup; per-call parameters
//! take precedence over them.

use std::time::Duration;

use tracing::warn;

use crate::GatewayError;

/// Response wait timeout when neither the call nor `NAPCAT_TIMEOUT` sets one
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Nickname shown on forward nodes when `NAPCAT_FORWARD_NICKNAME` is unset
pub const DEFAULT_FORWARD_NICKNAME: &str = "メイド";

/// Process-wide relay defaults
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Gateway WebSocket endpoint (`NAPCAT_URL`)
    pub url: Option<String>,
    /// Response wait timeout (`NAPCAT_TIMEOUT`, seconds)
    pub timeout: Duration,
    /// Author id on forward nodes (`NAPCAT_FORWARD_USER_ID`)
    pub forward_user_id: String,
    /// Author nickname on forward nodes (`NAPCAT_FORWARD_NICKNAME`)
    pub forward_nickname: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout: DEFAULT_TIMEOUT,
            forward_user_id: String::new(),
            forward_nickname: DEFAULT_FORWARD_NICKNAME.to_string(),
        }
    }
}

/// A resolved endpoint for one exchange with the gateway
#[derive(Debug, Clone, PartialEq)]
pub struct RelayTarget {
    pub url: String,
    pub timeout: Duration,
}

impl RelayConfig {
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

        let timeout = match get("NAPCAT_TIMEOUT") {
            Some(raw) => parse_timeout(&raw).unwrap_or_else(|| {
                warn!("Ignoring invalid NAPCAT_TIMEOUT '{}'", raw);
                DEFAULT_TIMEOUT
            }),
            None => DEFAULT_TIMEOUT,
        };

        Self {
            url: get("NAPCAT_URL"),
            timeout,
            forward_user_id: get("NAPCAT_FORWARD_USER_ID").unwrap_or_default(),
            forward_nickname: get("NAPCAT_FORWARD_NICKNAME")
                .unwrap_or_else(|| DEFAULT_FORWARD_NICKNAME.to_string()),
        }
    }

    /// Replace the default url when `url` is set
    pub fn with_url(mut self, url: Option<String>) -> Self {
        if let Some(url) = url.filter(|u| !u.trim().is_empty()) {
            self.url = Some(url.trim().to_string());
        }
        self
    }

    /// Replace the default timeout when `secs` is a positive number
    pub fn with_timeout(mut self, secs: Option<f64>) -> Self {
        if let Some(timeout) = secs.and_then(secs_to_duration) {
            self.timeout = timeout;
        }
        self
    }

    /// Explicit url wins over the configured default
    pub fn resolve_url(&self, explicit: Option<&str>) -> Option<String> {
        explicit
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(str::to_string)
            .or_else(|| self.url.clone())
    }

    /// Explicit timeout (seconds) wins over the configured default
    pub fn resolve_timeout(&self, explicit: Option<f64>) -> Duration {
        explicit.and_then(secs_to_duration).unwrap_or(self.timeout)
    }

    /// Resolve both halves of a target, failing when no url is known
    pub fn target(
        &self,
        url: Option<&str>,
        timeout: Option<f64>,
    ) -> Result<RelayTarget, GatewayError> {
        let url = self.resolve_url(url).ok_or(GatewayError::MissingUrl)?;
        Ok(RelayTarget {
            url,
            timeout: self.resolve_timeout(timeout),
        })
    }
}

fn parse_timeout(raw: &str) -> Option<Duration> {
    raw.parse::<f64>().ok().and_then(secs_to_duration)
}

fn secs_to_duration(secs: f64) -> Option<Duration> {
    (secs.is_finite() && secs > 0.0).then(|| Duration::from_secs_f64(secs))
}
