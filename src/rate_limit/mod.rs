//! Token-bucket rate limiting for the source client.
//!
//! A single shared bucket governs all requests to the document source.
//! `acquire` is the only blocking point the limiter exposes: callers wait
//! until enough tokens have refilled, then proceed. Server-signaled
//! throttling (429/Retry-After) is layered on top by the client, which
//! sleeps the server hint before re-acquiring.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Configuration for the token bucket.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum burst size.
    pub capacity: u32,
    /// Tokens added per second.
    pub refill_per_sec: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            refill_per_sec: 2.0,
        }
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Shared token bucket. Cloning shares the underlying state.
#[derive(Clone)]
pub struct TokenBucket {
    state: Arc<Mutex<BucketState>>,
    config: RateLimitConfig,
}

impl TokenBucket {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(BucketState {
                tokens: config.capacity as f64,
                last_refill: Instant::now(),
            })),
            config,
        }
    }

    /// Block until `n` tokens are available, then consume them.
    ///
    /// Returns the total time spent waiting. Requests for more tokens than
    /// the bucket can hold are clamped to capacity.
    pub async fn acquire(&self, n: u32) -> Duration {
        let need = n.min(self.config.capacity) as f64;
        let start = Instant::now();

        loop {
            let wait = {
                let mut state = self.state.lock().await;
                self.refill(&mut state);
                if state.tokens >= need {
                    state.tokens -= need;
                    return start.elapsed();
                }
                let deficit = need - state.tokens;
                Duration::from_secs_f64(deficit / self.config.refill_per_sec)
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Consume `n` tokens if immediately available.
    pub async fn try_acquire(&self, n: u32) -> bool {
        let need = n.min(self.config.capacity) as f64;
        let mut state = self.state.lock().await;
        self.refill(&mut state);
        if state.tokens >= need {
            state.tokens -= need;
            true
        } else {
            false
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill);
        state.tokens = (state.tokens + elapsed.as_secs_f64() * self.config.refill_per_sec)
            .min(self.config.capacity as f64);
        state.last_refill = now;
    }
}
