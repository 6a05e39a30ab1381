use super::limiter::{current_millis, RateLimiter};
use super::types::{RateLimitDecision, RequestInfo};
use crate::client_ip::ClientIpResolver;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Header carrying the authenticated customer id, populated by the
/// storefront's auth layer upstream of this service
pub const CUSTOMER_ID_HEADER: &str = "x-customer-id";

/// Rate limiting middleware state
#[derive(Clone)]
pub struct RateLimitMiddleware {
    limiter: Arc<RateLimiter>,
    resolver: Arc<ClientIpResolver>,
}

impl RateLimitMiddleware {
    pub fn new(limiter: Arc<RateLimiter>, resolver: Arc<ClientIpResolver>) -> Self {
        Self { limiter, resolver }
    }
}

/// Axum middleware enforcing one rate-limit policy on the wrapped routes.
///
/// Every evaluation stamps `X-RateLimit-*` headers on the response. Quota
/// exhaustion short-circuits with 429; any limiter failure short-circuits
/// with 503 rather than letting the request through unchecked.
pub async fn rate_limit_middleware(
    State(mw): State<RateLimitMiddleware>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip());
    let path = request.uri().path().to_string();

    let client_ip = mw.resolver.client_ip(peer, request.headers());
    let customer_id = request
        .headers()
        .get(CUSTOMER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let info = RequestInfo {
        path: &path,
        client_ip: &client_ip,
        customer_id: customer_id.as_deref(),
    };
    let key = (mw.limiter.policy().key_generator)(&info);
    let now_ms = current_millis();

    let decision = match mw.limiter.check_at(&key, now_ms).await {
        Ok(decision) => decision,
        Err(e) => {
            // Fail secure: a broken limiter blocks traffic instead of
            // admitting it unmetered
            error!(key = %key, error = %e, "Rate limiter failure, rejecting request");
            return e.into_response();
        }
    };

    if !decision.allowed {
        warn!(key = %key, reset_time = decision.reset_time, "Rate limit exceeded");
        return denied_response(&mw, &decision, now_ms);
    }

    debug!(key = %key, remaining = decision.remaining, "Rate limit check passed");

    let mut response = next.run(request).await;
    apply_rate_limit_headers(&mut response, mw.limiter.policy().max_requests, &decision);

    // Refund the slot for successful responses when only failed attempts
    // should consume quota. Best effort: errors stay inside refund().
    if mw.limiter.policy().skip_successful_requests && response.status().as_u16() < 400 {
        let limiter = mw.limiter.clone();
        let reset_time = decision.reset_time;
        tokio::spawn(async move {
            limiter.refund(&key, reset_time).await;
        });
    }

    response
}

/// 429 with retry hints and the policy's message
fn denied_response(mw: &RateLimitMiddleware, decision: &RateLimitDecision, now_ms: u64) -> Response {
    let retry_after = decision.reset_time.saturating_sub(now_ms).div_ceil(1000);

    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({
            "error": "Too Many Requests",
            "message": mw.limiter.policy().message,
            "retryAfter": retry_after,
        })),
    )
        .into_response();

    apply_rate_limit_headers(&mut response, mw.limiter.policy().max_requests, decision);
    response.headers_mut().insert(
        "Retry-After",
        HeaderValue::from_str(&retry_after.to_string()).unwrap(),
    );

    response
}

/// Stamp `X-RateLimit-Limit` / `-Remaining` / `-Reset` on a response
fn apply_rate_limit_headers(response: &mut Response, limit: u32, decision: &RateLimitDecision) {
    let headers = response.headers_mut();

    headers.insert(
        "X-RateLimit-Limit",
        HeaderValue::from_str(&limit.to_string()).unwrap(),
    );
    headers.insert(
        "X-RateLimit-Remaining",
        HeaderValue::from_str(&decision.remaining.to_string()).unwrap(),
    );
    headers.insert(
        "X-RateLimit-Reset",
        HeaderValue::from_str(&reset_timestamp(decision.reset_time)).unwrap(),
    );
}

/// Render the window end as RFC 3339 / ISO-8601
fn reset_timestamp(reset_time_ms: u64) -> String {
    DateTime::<Utc>::from_timestamp_millis(reset_time_ms as i64)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| reset_time_ms.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_timestamp_is_rfc3339() {
        let stamp = reset_timestamp(0);
        assert_eq!(stamp, "1970-01-01T00:00:00+00:00");

        let later = reset_timestamp(1_700_000_000_000);
        assert!(later.starts_with("2023-11-14T"));
    }

    #[test]
    fn test_denied_response_shape() {
        let store = Arc::new(crate::store::MemoryStore::new());
        let limiter = Arc::new(
            RateLimiter::new(super::super::types::RateLimitPolicy::new(60_000, 2), store).unwrap(),
        );
        let resolver = Arc::new(ClientIpResolver::new(
            crate::client_ip::TrustedProxyConfig::default(),
        ));
        let mw = RateLimitMiddleware::new(limiter, resolver);

        let decision = RateLimitDecision {
            allowed: false,
            remaining: 0,
            reset_time: 40_000,
        };
        let response = denied_response(&mw, &decision, 0);

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let headers = response.headers();
        assert_eq!(headers.get("X-RateLimit-Limit").unwrap(), "2");
        assert_eq!(headers.get("X-RateLimit-Remaining").unwrap(), "0");
        assert_eq!(headers.get("Retry-After").unwrap(), "40");
    }
}
