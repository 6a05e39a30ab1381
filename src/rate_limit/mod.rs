//! Distributed rate limiting
//!
//! Admission control over a shared key/value store, safe for concurrent use
//! from independent server processes with no shared memory. The store is
//! assumed to offer only plain `get`/`set`-with-TTL, so updates go through an
//! optimistic compare-and-swap loop with a bounded retry budget; exhaustion
//! fails secure (requests are denied, never admitted unmetered).
//!
//! # Example
//!
//! ```rust,no_run
//! use pharma_gate::rate_limit::{RateLimiter, RateLimitPolicy};
//! use pharma_gate::store::MemoryStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = Arc::new(MemoryStore::new());
//!     let limiter = RateLimiter::new(RateLimitPolicy::new(60_000, 100), store).unwrap();
//!
//!     let decision = limiter.check("rate_limit:/store/reviews:1.2.3.4").await.unwrap();
//!     assert!(decision.allowed);
//! }
//! ```

pub mod limiter;
pub mod middleware;
pub mod policies;
pub mod types;

// Re-export commonly used types
pub use limiter::{current_millis, RateLimiter};
pub use middleware::{rate_limit_middleware, RateLimitMiddleware, CUSTOMER_ID_HEADER};
pub use types::{
    customer_key_generator, default_key_generator, KeyGenerator, RateLimitDecision,
    RateLimitPolicy, RateLimitRecord, RequestInfo,
};
