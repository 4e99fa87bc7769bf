//! # Token cache
//!
//! [`TokenCache`] wraps the generic [`LruCache`] with the token-specific
//! expiration and renewal policy from §4.3: every cached entry carries both
//! a monotonic deadline (immune to wall-clock adjustment) and a wall-clock
//! deadline computed at the same instant, and is treated as expired the
//! moment *either* one has passed — defending against a wall-clock jump in
//! either direction, which a monotonic-only check cannot catch by
//! construction. Both deadlines sit within the conservative renewal
//! margin of the token's provider-reported lifetime: the lesser of the
//! cache's configured max duration and 80% of the token's own `duration()`.

use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Mutex as AsyncMutex;

use crate::cache::lru::{validate_capacity, LruCache};
use crate::error::Result;
use crate::labels::InvolvedObject;
use crate::observability::metrics;
use crate::token::Token;

/// 80% of a token's reported lifetime is treated as its usable lifetime,
/// leaving headroom for clock skew and request latency before a consumer
/// would otherwise present an expired token.
const RENEWAL_FRACTION: f64 = 0.8;

struct Entry<V> {
    value: V,
    /// Monotonic renewal deadline, immune to wall-clock adjustment.
    renew_at: Instant,
    /// Wall-clock renewal deadline computed at the same moment as
    /// `renew_at`. An entry is expired the instant *either* deadline has
    /// passed, so a wall-clock jump (e.g. an NTP step backwards) cannot by
    /// itself make a stale entry look fresh, nor can a monotonic clock
    /// quirk make a legitimately wall-clock-expired entry look fresh.
    renew_at_wall: DateTime<Utc>,
}

/// A capacity-bounded cache of [`Token`]s, keyed by the caller-supplied
/// fingerprint (see [`crate::cachekey`]).
pub struct TokenCache<V> {
    lru: LruCache<String, Entry<V>>,
    max_duration: Duration,
    involved: AsyncMutex<InvolvedObject>,
}

impl<V: Token + Clone + Send + Sync + 'static> TokenCache<V> {
    /// `capacity == 0` means unbounded. `max_duration` upper-bounds how
    /// long any entry is trusted regardless of what the token itself
    /// reports, per §4.3.
    #[must_use]
    pub fn new(capacity: usize, max_duration: Duration) -> Self {
        Self {
            lru: LruCache::new(capacity),
            max_duration,
            involved: AsyncMutex::new(InvolvedObject::default()),
        }
    }

    /// Record the involved-object label used for subsequent metrics from
    /// this cache instance. Pipelines call this once per request before
    /// touching the cache so hit/miss counters are attributed correctly.
    pub async fn set_involved_object(&self, involved: InvolvedObject) {
        *self.involved.lock().await = involved;
    }

    fn renew_deadlines(&self, value: &V) -> (Instant, DateTime<Utc>) {
        let usable = value.duration().mul_f64(RENEWAL_FRACTION);
        let bound = if self.max_duration.is_zero() {
            usable
        } else {
            usable.min(self.max_duration)
        };
        let chrono_bound = TimeDelta::from_std(bound).unwrap_or(TimeDelta::zero());
        (Instant::now() + bound, Utc::now() + chrono_bound)
    }

    fn still_fresh(entry: &Entry<V>) -> bool {
        Instant::now() < entry.renew_at && Utc::now() < entry.renew_at_wall
    }

    /// Unconditionally insert or replace an entry.
    pub async fn set(&self, key: String, value: V) {
        let (renew_at, renew_at_wall) = self.renew_deadlines(&value);
        let evicted = self
            .lru
            .set(
                key,
                Entry {
                    value,
                    renew_at,
                    renew_at_wall,
                },
            )
            .await;
        if evicted.is_some() {
            metrics::record_eviction();
        }
        metrics::set_items(self.lru.len().await);
    }

    /// Fetch a still-fresh entry, or `None` on a miss/expiry, recording
    /// the appropriate hit/miss metric. An entry is stale as soon as
    /// either its monotonic or wall-clock deadline has passed.
    pub async fn get(&self, key: &str) -> Option<V> {
        let involved = self.involved.lock().await.clone();
        match self.lru.get(&key.to_string()).await {
            Some(entry) if Self::still_fresh(&entry) => {
                metrics::record_hit(&involved);
                Some(entry.value)
            }
            Some(_) => {
                metrics::record_miss(&involved);
                None
            }
            None => {
                metrics::record_miss(&involved);
                None
            }
        }
    }

    pub async fn delete(&self, key: &str) {
        self.lru.delete(&key.to_string()).await;
        metrics::set_items(self.lru.len().await);
    }

    /// Single-flight get-or-populate (§4.2/§4.3): on a miss or an
    /// expired-but-present entry, `produce` is invoked once while the
    /// cache's internal lock is held, and its result becomes the new
    /// cached value for `key`.
    pub async fn get_or_set<F, Fut>(&self, key: String, produce: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<V>>,
    {
        let involved = self.involved.lock().await.clone();
        let was_hit = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let was_hit_writer = Arc::clone(&was_hit);
        let (result, evicted) = self
            .lru
            .get_or_set(
                key,
                Self::still_fresh,
                move || {
                    was_hit_writer.store(false, std::sync::atomic::Ordering::Relaxed);
                    async move {
                        let start = Instant::now();
                        match produce().await {
                            Ok(value) => {
                                metrics::observe_producer_duration(start.elapsed().as_secs_f64());
                                let (renew_at, renew_at_wall) = self.renew_deadlines(&value);
                                Ok(Entry {
                                    value,
                                    renew_at,
                                    renew_at_wall,
                                })
                            }
                            Err(err) => {
                                metrics::record_error();
                                Err(err)
                            }
                        }
                    }
                },
            )
            .await?;
        if was_hit.load(std::sync::atomic::Ordering::Relaxed) {
            metrics::record_hit(&involved);
        } else {
            metrics::record_miss(&involved);
        }
        if evicted.is_some() {
            metrics::record_eviction();
        }
        metrics::set_items(self.lru.len().await);
        Ok(result.value)
    }

    pub async fn list_keys(&self) -> Vec<String> {
        self.lru.list_keys().await
    }

    pub async fn len(&self) -> usize {
        self.lru.len().await
    }

    pub async fn is_empty(&self) -> bool {
        self.lru.is_empty().await
    }

    /// Change the cache's entry-count capacity. `new_capacity < 0` is
    /// rejected with [`crate::error::Error::InvalidSize`].
    pub async fn resize(&self, new_capacity: i64) -> Result<()> {
        let capacity = validate_capacity(new_capacity)?;
        let evicted = self.lru.resize(capacity).await;
        for _ in 0..evicted.len() {
            metrics::record_eviction();
        }
        metrics::set_items(self.lru.len().await);
        Ok(())
    }
}

/// Shared-ownership handle to a [`TokenCache`], the form pipelines and
/// [`crate::options::Options`] actually hold.
pub type SharedTokenCache<V> = Arc<TokenCache<V>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug)]
    struct FakeToken {
        lifetime: Duration,
    }

    impl Token for FakeToken {
        fn duration(&self) -> Duration {
            self.lifetime
        }

        fn provider_name(&self) -> &str {
            "fake"
        }
    }

    #[tokio::test]
    async fn set_then_get_round_trips_within_renewal_window() {
        let cache = TokenCache::new(4, Duration::from_secs(3600));
        cache
            .set(
                "k".to_string(),
                FakeToken {
                    lifetime: Duration::from_secs(600),
                },
            )
            .await;
        assert!(cache.get("k").await.is_some());
    }

    #[tokio::test]
    async fn get_treats_already_past_renewal_margin_as_a_miss() {
        let cache = TokenCache::new(4, Duration::from_secs(3600));
        // lifetime of 0 means renew_at == now, so it's immediately stale.
        cache
            .set(
                "k".to_string(),
                FakeToken {
                    lifetime: Duration::from_secs(0),
                },
            )
            .await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn max_duration_caps_the_usable_lifetime_even_for_long_tokens() {
        let cache = TokenCache::new(4, Duration::from_millis(10));
        cache
            .set(
                "k".to_string(),
                FakeToken {
                    lifetime: Duration::from_secs(3600),
                },
            )
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn get_or_set_single_flights_a_miss() {
        let cache = TokenCache::new(4, Duration::from_secs(3600));
        let token = cache
            .get_or_set("k".to_string(), || async {
                Ok(FakeToken {
                    lifetime: Duration::from_secs(600),
                })
            })
            .await
            .unwrap();
        assert_eq!(token.lifetime, Duration::from_secs(600));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn get_or_set_propagates_a_producer_error_without_caching() {
        let cache: TokenCache<FakeToken> = TokenCache::new(4, Duration::from_secs(3600));
        let result = cache
            .get_or_set("k".to_string(), || async {
                Err(crate::error::Error::ProviderExchange {
                    provider: "mock".to_string(),
                    source: anyhow::anyhow!("boom"),
                })
            })
            .await;
        assert!(result.is_err());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn resize_rejects_negative_capacity() {
        let cache: TokenCache<FakeToken> = TokenCache::new(4, Duration::from_secs(3600));
        assert!(cache.resize(-1).await.is_err());
    }

    #[test]
    fn renewal_fraction_matches_documented_conservative_margin() {
        assert!((RENEWAL_FRACTION - 0.8).abs() < f64::EPSILON);
    }
}
