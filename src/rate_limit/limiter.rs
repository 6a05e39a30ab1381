use super::types::{RateLimitDecision, RateLimitPolicy, RateLimitRecord};
use crate::error::{GateError, Result};
use crate::store::RateLimitStore;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// CAS attempts before giving up and failing secure
const MAX_CAS_RETRIES: u32 = 3;

/// Upper bound of the randomized backoff between CAS attempts, in ms
const MAX_BACKOFF_MS: u64 = 10;

/// Admission control for requests at a given key, backed by a shared store.
///
/// The store offers no atomic primitive, so every mutation goes through an
/// optimistic read-verify-write loop: snapshot the record, compute the
/// update, then re-read and only write if the record is unchanged. A lost
/// race retries with jitter up to [`MAX_CAS_RETRIES`] times; exhaustion is an
/// error the caller must treat as a denial, never an admission.
///
/// No rate-limit state is held in process memory. Multiple server instances
/// sharing the same store coordinate solely through this protocol.
pub struct RateLimiter {
    policy: RateLimitPolicy,
    store: Arc<dyn RateLimitStore>,
}

impl RateLimiter {
    /// Create a limiter, validating the policy
    pub fn new(policy: RateLimitPolicy, store: Arc<dyn RateLimitStore>) -> Result<Self> {
        policy.validate()?;
        debug!(
            window_ms = policy.window_ms,
            max_requests = policy.max_requests,
            "Created rate limiter"
        );
        Ok(Self { policy, store })
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Evaluate the request at `key` against the current wall clock
    pub async fn check(&self, key: &str) -> Result<RateLimitDecision> {
        self.check_at(key, current_millis()).await
    }

    /// Evaluate the request at `key` as of `now_ms`.
    ///
    /// Allowed evaluations persist an incremented record; denied evaluations
    /// leave the store untouched. Errors (store unavailability, CAS retry
    /// exhaustion) must be treated as denials by the caller.
    pub async fn check_at(&self, key: &str, now_ms: u64) -> Result<RateLimitDecision> {
        for attempt in 0..MAX_CAS_RETRIES {
            let snapshot = self.current_record(key, now_ms).await?;

            if snapshot.count >= self.policy.max_requests {
                return Ok(RateLimitDecision {
                    allowed: false,
                    remaining: 0,
                    reset_time: snapshot.reset_time,
                });
            }

            let updated = RateLimitRecord {
                count: snapshot.count + 1,
                reset_time: snapshot.reset_time,
            };
            let ttl = ttl_seconds(snapshot.reset_time, now_ms);

            if self
                .compare_and_swap(key, &snapshot, &updated, ttl, now_ms)
                .await?
            {
                return Ok(RateLimitDecision {
                    allowed: true,
                    remaining: self.policy.max_requests.saturating_sub(updated.count),
                    reset_time: updated.reset_time,
                });
            }

            debug!(key, attempt, "Rate limit CAS lost, retrying");
            backoff_jitter().await;
        }

        Err(GateError::ContentionExhausted(key.to_string()))
    }

    /// Best-effort refund of one admitted request against the current wall
    /// clock, used when successful responses should not consume quota.
    pub async fn refund(&self, key: &str, reset_time: u64) {
        self.refund_at(key, reset_time, current_millis()).await;
    }

    /// Best-effort refund of one admitted request as of `now_ms`.
    ///
    /// `reset_time` is the window captured at admission time; a refund
    /// against any other window is a no-op, so a slot from a later window is
    /// never released by a stale caller. `now_ms` must come from the same
    /// clock the admission was evaluated against, or the CAS would judge the
    /// record's liveness with a different clock than the one that created
    /// it. Failures are logged and swallowed.
    pub async fn refund_at(&self, key: &str, reset_time: u64, now_ms: u64) {
        for attempt in 0..MAX_CAS_RETRIES {
            let snapshot = match self.store.get(key).await {
                Ok(record) => record,
                Err(e) => {
                    warn!(key, error = %e, "Rate limit refund read failed");
                    return;
                }
            };

            let Some(record) = snapshot else {
                return;
            };
            if record.count == 0 || record.reset_time != reset_time {
                return;
            }

            let updated = RateLimitRecord {
                count: record.count - 1,
                reset_time: record.reset_time,
            };
            let ttl = ttl_seconds(reset_time, now_ms);

            match self
                .compare_and_swap(key, &record, &updated, ttl, now_ms)
                .await
            {
                Ok(true) => return,
                Ok(false) => {
                    debug!(key, attempt, "Rate limit refund CAS lost, retrying");
                    backoff_jitter().await;
                }
                Err(e) => {
                    warn!(key, error = %e, "Rate limit refund write failed");
                    return;
                }
            }
        }

        debug!(key, "Rate limit refund abandoned after retries");
    }

    /// Read the record at `key`, treating absent, expired, and malformed
    /// values all as a fresh window starting at `now_ms`.
    async fn current_record(&self, key: &str, now_ms: u64) -> Result<RateLimitRecord> {
        let stored = self.store.get(key).await?;

        Ok(match stored {
            Some(record) if record.reset_time > now_ms => record,
            _ => RateLimitRecord {
                count: 0,
                reset_time: now_ms + self.policy.window_ms,
            },
        })
    }

    /// Optimistic write: re-read `key` and only persist `updated` if the
    /// stored record still equals `expected`.
    ///
    /// An absent entry matches a fresh snapshot (`count == 0`), and an
    /// expired entry is treated as absent, so a rolled-over window is not
    /// blocked by a stale record the store has not evicted yet. This is not
    /// a true atomic primitive; a writer landing between the re-read and the
    /// write can still be overwritten, which bounds but does not eliminate
    /// over-admission under heavy same-key contention.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &RateLimitRecord,
        updated: &RateLimitRecord,
        ttl_secs: u64,
        now_ms: u64,
    ) -> Result<bool> {
        let current = self.store.get(key).await?;
        let live = current.filter(|record| record.reset_time > now_ms);

        match live {
            Some(record) => {
                if record.count != expected.count || record.reset_time != expected.reset_time {
                    return Ok(false);
                }
            }
            None => {
                if expected.count != 0 {
                    return Ok(false);
                }
            }
        }

        self.store.set(key, updated, ttl_secs).await?;
        Ok(true)
    }
}

/// Milliseconds since the Unix epoch
pub fn current_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Seconds of TTL covering the remainder of the window, rounded up
fn ttl_seconds(reset_time: u64, now_ms: u64) -> u64 {
    reset_time.saturating_sub(now_ms).div_ceil(1000).max(1)
}

async fn backoff_jitter() {
    let jitter = rand::thread_rng().gen_range(0..=MAX_BACKOFF_MS);
    tokio::time::sleep(Duration::from_millis(jitter)).await;
}
