//! Per-client admission control.
//!
//! The limiter kind is chosen once, when the gateway starts:
//! - disabled → [`AdmissionControl::Noop`]
//! - `redis_url` set and reachable → [`AdmissionControl::Redis`] (shared sliding log)
//! - `redis_url` set but unreachable → [`AdmissionControl::Noop`]
//! - otherwise → [`AdmissionControl::Local`] (in-process token buckets)
//!
//! A failing Redis call admits the request; the limiter kind never changes.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use redis::aio::MultiplexedConnection;
use uuid::Uuid;

use crate::config::RateLimitConfig;
use crate::observability::metrics;

/// A simple token bucket rate limiter.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// In-process token buckets, one per client.
#[derive(Debug)]
pub struct LocalLimiter {
    buckets: DashMap<String, TokenBucket>,
    rps: f64,
    burst: f64,
}

impl LocalLimiter {
    pub fn new(requests_per_second: u32, burst_size: u32) -> Self {
        Self {
            buckets: DashMap::new(),
            rps: f64::from(requests_per_second),
            burst: f64::from(burst_size),
        }
    }

    pub fn check(&self, client: &str) -> bool {
        let mut bucket = self
            .buckets
            .entry(client.to_string())
            .or_insert_with(|| TokenBucket::new(self.burst));
        bucket.try_acquire(self.burst, self.rps)
    }
}

/// Sliding request log in a Redis sorted set per client.
#[derive(Clone)]
pub struct RedisLimiter {
    conn: MultiplexedConnection,
    limit: u64,
    window_secs: u64,
}

impl RedisLimiter {
    /// Connect and verify the server answers `PING`.
    pub async fn connect(url: &str, limit: u64, window_secs: u64) -> redis::RedisResult<Self> {
        let client = redis::Client::open(url)?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(Self {
            conn,
            limit,
            window_secs,
        })
    }

    pub async fn check(&self, client: &str) -> redis::RedisResult<bool> {
        let key = format!("rate_limit:{}", client);
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        let window_start = now_ms.saturating_sub(self.window_secs * 1000);
        let member = format!("{}-{}", now_ms, Uuid::new_v4());

        let mut conn = self.conn.clone();
        let (count,): (u64,) = redis::pipe()
            .atomic()
            .cmd("ZADD").arg(&key).arg(now_ms).arg(&member).ignore()
            .cmd("ZREMRANGEBYSCORE").arg(&key).arg(0).arg(window_start).ignore()
            .cmd("ZCARD").arg(&key)
            .cmd("EXPIRE").arg(&key).arg(self.window_secs).ignore()
            .query_async(&mut conn)
            .await?;

        Ok(count <= self.limit)
    }
}

/// Admission decision for a client, selected once at construction.
pub enum AdmissionControl {
    Redis(RedisLimiter),
    Local(LocalLimiter),
    Noop,
}

impl AdmissionControl {
    pub async fn from_config(config: &RateLimitConfig) -> Self {
        if !config.enabled {
            return AdmissionControl::Noop;
        }

        match &config.redis_url {
            Some(url) => {
                match RedisLimiter::connect(url, config.window_limit(), config.window_secs).await {
                    Ok(limiter) => {
                        tracing::info!(window_secs = config.window_secs, "Using Redis rate limiter");
                        AdmissionControl::Redis(limiter)
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to connect to Redis, rate limiting disabled");
                        AdmissionControl::Noop
                    }
                }
            }
            None => {
                tracing::info!(
                    rps = config.requests_per_second,
                    burst = config.burst_size,
                    "Using local rate limiter"
                );
                AdmissionControl::Local(LocalLimiter::new(
                    config.requests_per_second,
                    config.burst_size,
                ))
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AdmissionControl::Redis(_) => "redis",
            AdmissionControl::Local(_) => "local",
            AdmissionControl::Noop => "noop",
        }
    }

    /// Whether `client` may proceed.
    pub async fn check(&self, client: &str) -> bool {
        let allowed = match self {
            AdmissionControl::Noop => true,
            AdmissionControl::Local(limiter) => limiter.check(client),
            AdmissionControl::Redis(limiter) => match limiter.check(client).await {
                Ok(allowed) => allowed,
                Err(e) => {
                    tracing::warn!(client = %client, error = %e, "Rate limit check failed, allowing request");
                    true
                }
            },
        };

        if !allowed {
            tracing::warn!(client = %client, "Rate limit exceeded");
            metrics::record_rate_limited(client);
        }
        allowed
    }
}
