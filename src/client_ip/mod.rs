//! Spoofing-resistant client IP resolution
//!
//! Forwarding headers (`x-forwarded-for` and friends) are attacker-controlled
//! unless the immediate transport peer is a proxy we explicitly trust. This
//! module only consults them when that holds, and otherwise falls back to the
//! transport-layer peer address. Resolution never fails: any ambiguity
//! degrades to the literal identifier `"unknown"`, which groups unattributable
//! traffic into a single rate-limit bucket.

use axum::http::HeaderMap;
use sha2::{Digest, Sha256};
use std::net::IpAddr;
use std::str::FromStr;
use tracing::debug;

/// Identifier returned when no valid client IP can be determined
pub const UNKNOWN_IP: &str = "unknown";

/// Proxies trusted regardless of environment configuration
const DEFAULT_TRUSTED_PROXIES: [&str; 2] = ["127.0.0.1", "::1"];

/// Maximum number of User-Agent bytes fed into the key hash
const UA_HASH_INPUT_LIMIT: usize = 50;

/// Trust policy for forwarding headers
#[derive(Debug, Clone)]
pub struct TrustedProxyConfig {
    /// IPs whose forwarding headers are honored (exact match, no CIDR yet)
    pub trusted_proxies: Vec<String>,
    /// Honor `x-forwarded-for` from trusted peers
    pub x_forwarded_for: bool,
    /// Honor `x-real-ip` from trusted peers
    pub x_real_ip: bool,
    /// Honor `cf-connecting-ip` from trusted peers
    pub cf_connecting_ip: bool,
}

impl Default for TrustedProxyConfig {
    fn default() -> Self {
        Self {
            trusted_proxies: Vec::new(),
            x_forwarded_for: true,
            x_real_ip: true,
            cf_connecting_ip: true,
        }
    }
}

impl TrustedProxyConfig {
    /// Build the trust policy from the environment: the built-in loopback
    /// proxies merged with the comma-separated `TRUSTED_PROXY_IPS` variable.
    pub fn from_env() -> Self {
        let mut trusted_proxies: Vec<String> = DEFAULT_TRUSTED_PROXIES
            .iter()
            .map(|ip| ip.to_string())
            .collect();

        if let Ok(raw) = std::env::var("TRUSTED_PROXY_IPS") {
            trusted_proxies.extend(
                raw.split(',')
                    .map(str::trim)
                    .filter(|ip| !ip.is_empty())
                    .map(str::to_string),
            );
        }

        Self {
            trusted_proxies,
            ..Self::default()
        }
    }
}

/// Resolves a trustworthy client identifier from an inbound request
#[derive(Debug, Clone)]
pub struct ClientIpResolver {
    config: TrustedProxyConfig,
}

impl ClientIpResolver {
    pub fn new(config: TrustedProxyConfig) -> Self {
        Self { config }
    }

    /// Extract the client IP, honoring forwarding headers only when the
    /// direct peer is a trusted proxy.
    pub fn client_ip(&self, peer: Option<IpAddr>, headers: &HeaderMap) -> String {
        let direct = peer
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| UNKNOWN_IP.to_string());

        let mut candidate = direct.clone();
        if !self.config.trusted_proxies.is_empty() {
            if let Some(forwarded) = self.trusted_forwarded_ip(&direct, headers) {
                candidate = forwarded;
            }
        }

        match normalize_ip(&candidate) {
            Some(ip) => ip,
            None => {
                debug!(candidate = %candidate, "Unresolvable client IP, using fallback bucket");
                UNKNOWN_IP.to_string()
            }
        }
    }

    /// Derive a namespaced rate-limit key for `endpoint`, preferring an
    /// explicit `identifier` (e.g. a customer id) over the resolved IP, with
    /// a short User-Agent hash appended for extra entropy.
    pub fn rate_limit_key(
        &self,
        peer: Option<IpAddr>,
        headers: &HeaderMap,
        endpoint: &str,
        identifier: Option<&str>,
    ) -> String {
        let client_ip = self.client_ip(peer, headers);
        let base = identifier.unwrap_or(&client_ip);

        let ua_hash = headers
            .get(http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(user_agent_hash)
            .unwrap_or_default();

        format!("rate_limit:{}:{}:{}", endpoint, base, ua_hash)
    }

    /// Consult forwarding headers, most reliable first. Returns `None`
    /// whenever the direct peer is untrusted, so a client can never spoof
    /// its way past an untrusted hop.
    fn trusted_forwarded_ip(&self, direct: &str, headers: &HeaderMap) -> Option<String> {
        if !self.is_trusted_proxy(direct) {
            return None;
        }

        let candidates = [
            ("cf-connecting-ip", self.config.cf_connecting_ip),
            ("x-real-ip", self.config.x_real_ip),
            ("x-forwarded-for", self.config.x_forwarded_for),
        ];

        for (name, enabled) in candidates {
            if !enabled {
                continue;
            }

            let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) else {
                continue;
            };

            if name == "x-forwarded-for" {
                // First entry is the original client, under the assumption
                // that the nearest trusted hop appended correctly.
                if let Some(first) = value.split(',').map(str::trim).find(|ip| !ip.is_empty()) {
                    return Some(first.to_string());
                }
            } else if !value.trim().is_empty() {
                return Some(value.trim().to_string());
            }
        }

        None
    }

    fn is_trusted_proxy(&self, ip: &str) -> bool {
        let Some(normalized) = normalize_ip(ip) else {
            return false;
        };

        self.config
            .trusted_proxies
            .iter()
            .any(|trusted| normalize_ip(trusted).as_deref() == Some(normalized.as_str()))
    }
}

/// Normalize a raw IP string: strip bracket notation, unwrap IPv4-mapped
/// IPv6 addresses, and validate via `std::net` parsing.
fn normalize_ip(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == UNKNOWN_IP {
        return None;
    }

    let cleaned = trimmed
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(trimmed);

    match IpAddr::from_str(cleaned) {
        Ok(IpAddr::V4(v4)) => Some(v4.to_string()),
        Ok(IpAddr::V6(v6)) => match v6.to_ipv4_mapped() {
            Some(v4) => Some(v4.to_string()),
            None => Some(v6.to_string()),
        },
        Err(_) => None,
    }
}

/// Short hash of the User-Agent header, bounded in input length
fn user_agent_hash(user_agent: &str) -> String {
    let input = &user_agent.as_bytes()[..user_agent.len().min(UA_HASH_INPUT_LIMIT)];
    let digest = Sha256::digest(input);
    digest
        .iter()
        .take(4)
        .map(|b| format!("{:02x}", b))
        .collect()
}
