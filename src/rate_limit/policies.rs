//! Storefront admission policies
//!
//! Constructed once at the composition root and wired onto their routes;
//! there are no module-level limiter singletons.

use super::types::{customer_key_generator, RateLimitPolicy};
use crate::config::LimitSettings;

/// Review submissions: tight per-customer quota, and a successful submission
/// refunds its slot so only failed attempts count.
pub fn review_submission(settings: &LimitSettings) -> RateLimitPolicy {
    RateLimitPolicy::new(settings.window_ms, settings.max_requests)
        .with_key_generator(customer_key_generator("review_submission"))
        .with_message(format!(
            "Too many review submissions. You can submit up to {} reviews per {} minutes.",
            settings.max_requests,
            settings.window_ms / 60_000,
        ))
        .skip_successful()
}

/// Review reads: generous per-IP quota
pub fn review_read(settings: &LimitSettings) -> RateLimitPolicy {
    RateLimitPolicy::new(settings.window_ms, settings.max_requests)
        .with_message("Too many requests. Please wait a moment before trying again.")
}

/// Catch-all quota for admin API endpoints
pub fn general_api(settings: &LimitSettings) -> RateLimitPolicy {
    RateLimitPolicy::new(settings.window_ms, settings.max_requests)
        .with_message("Too many requests. Please wait a moment before trying again.")
}
