use crate::error::{GateError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Per-key counter state, stored as JSON in the shared store.
///
/// Field names stay camelCase on the wire so records written by earlier
/// deployments of the storefront remain readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitRecord {
    /// Requests consumed in the current window
    pub count: u32,
    /// Absolute timestamp (ms since epoch) at which the window ends
    pub reset_time: u64,
}

/// Outcome of one admission evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the request is admitted
    pub allowed: bool,
    /// Remaining requests in the current window
    pub remaining: u32,
    /// Absolute timestamp (ms since epoch) at which the window ends
    pub reset_time: u64,
}

/// Request fields visible to key generators
#[derive(Debug, Clone, Copy)]
pub struct RequestInfo<'a> {
    /// Request path
    pub path: &'a str,
    /// Resolved client IP (or `"unknown"`)
    pub client_ip: &'a str,
    /// Authenticated customer id, when present
    pub customer_id: Option<&'a str>,
}

/// Maps a request to its rate-limit bucket key
pub type KeyGenerator = Arc<dyn Fn(&RequestInfo<'_>) -> String + Send + Sync>;

/// Default key: per path, per resolved client IP
pub fn default_key_generator() -> KeyGenerator {
    Arc::new(|info| format!("rate_limit:{}:{}", info.path, info.client_ip))
}

/// Per-customer key under a fixed scope, falling back to the client IP for
/// unauthenticated requests.
pub fn customer_key_generator(scope: &str) -> KeyGenerator {
    let scope = scope.to_string();
    Arc::new(move |info| {
        let identifier = info.customer_id.unwrap_or(info.client_ip);
        format!("rate_limit:{}:{}", scope, identifier)
    })
}

/// Immutable admission policy supplied at limiter construction
#[derive(Clone)]
pub struct RateLimitPolicy {
    /// Length of the rate window in milliseconds
    pub window_ms: u64,
    /// Maximum allowed requests per window
    pub max_requests: u32,
    /// Message returned to rejected clients
    pub message: String,
    /// Refund the slot after a successful (status < 400) response
    pub skip_successful_requests: bool,
    /// Maps a request to its bucket key
    pub key_generator: KeyGenerator,
}

impl RateLimitPolicy {
    /// Create a policy with default message and key generator
    pub fn new(window_ms: u64, max_requests: u32) -> Self {
        Self {
            window_ms,
            max_requests,
            message: "Too many requests, please try again later.".to_string(),
            skip_successful_requests: false,
            key_generator: default_key_generator(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_key_generator(mut self, key_generator: KeyGenerator) -> Self {
        self.key_generator = key_generator;
        self
    }

    /// Only failed attempts count against the quota
    pub fn skip_successful(mut self) -> Self {
        self.skip_successful_requests = true;
        self
    }

    /// Reject policies that could never admit or never reset
    pub fn validate(&self) -> Result<()> {
        if self.window_ms == 0 {
            return Err(GateError::Config(
                "Rate limit window_ms must be > 0".to_string(),
            ));
        }
        if self.max_requests == 0 {
            return Err(GateError::Config(
                "Rate limit max_requests must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for RateLimitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitPolicy")
            .field("window_ms", &self.window_ms)
            .field("max_requests", &self.max_requests)
            .field("message", &self.message)
            .field("skip_successful_requests", &self.skip_successful_requests)
            .finish_non_exhaustive()
    }
}
