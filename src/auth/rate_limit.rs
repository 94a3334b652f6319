// Copyright 2025 Duckgate Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Request rate limiting for the /v1 routes.
//!
//! One token bucket shared by all clients: the gateway fronts a single
//! upstream account, so the budget is global rather than per-IP.

use crate::config::RateLimitConfig;
use axum::{
    extract::{Request, State},
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Token bucket with atomic refill, no lock on the request path.
#[derive(Debug)]
struct TokenBucket {
    /// Current number of tokens (scaled by 1000 for precision)
    tokens: AtomicU64,
    /// Maximum tokens (capacity)
    capacity: f64,
    /// Token refill rate (tokens per second)
    refill_rate: f64,
    /// Last refill time (milliseconds since start)
    last_refill_ms: AtomicU64,
    /// Reference instant for time calculations
    start_instant: Instant,
}

impl TokenBucket {
    fn new(capacity: u32, window: Duration) -> Self {
        let refill_rate = capacity as f64 / window.as_secs_f64();
        Self {
            tokens: AtomicU64::new(u64::from(capacity) * 1000),
            capacity: capacity as f64,
            refill_rate,
            last_refill_ms: AtomicU64::new(0),
            start_instant: Instant::now(),
        }
    }

    fn get_tokens(&self) -> f64 {
        self.tokens.load(Ordering::Relaxed) as f64 / 1000.0
    }

    fn set_tokens(&self, value: f64) {
        self.tokens
            .store((value * 1000.0) as u64, Ordering::Relaxed);
    }

    fn refill(&self) {
        let now_ms = self.start_instant.elapsed().as_millis() as u64;
        let last_ms = self.last_refill_ms.swap(now_ms, Ordering::Relaxed);
        let elapsed_secs = (now_ms.saturating_sub(last_ms)) as f64 / 1000.0;

        let current = self.get_tokens();
        let new_tokens = (current + elapsed_secs * self.refill_rate).min(self.capacity);
        self.set_tokens(new_tokens);
    }

    fn try_consume(&self) -> bool {
        self.refill();

        let current = self.get_tokens();
        if current >= 1.0 {
            self.set_tokens(current - 1.0);
            true
        } else {
            false
        }
    }

    fn remaining(&self) -> u32 {
        self.refill();
        self.get_tokens().floor() as u32
    }

    fn retry_after(&self) -> Duration {
        self.refill();

        let current = self.get_tokens();
        if current >= 1.0 {
            Duration::from_secs(0)
        } else {
            let tokens_needed = 1.0 - current;
            Duration::from_secs_f64(tokens_needed / self.refill_rate)
        }
    }
}

/// Result of a rate limit check
#[derive(Debug)]
pub enum RateLimitResult {
    Allowed { remaining: u32 },
    RateLimited { retry_after: Duration },
}

/// Global rate limiter with a single shared bucket.
pub struct RateLimiter {
    enabled: bool,
    max_requests: u32,
    bucket: TokenBucket,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            enabled: config.enabled,
            max_requests: config.max_requests,
            bucket: TokenBucket::new(config.max_requests, Duration::from_secs(config.window_secs)),
        }
    }

    pub fn check(&self) -> RateLimitResult {
        if !self.enabled {
            return RateLimitResult::Allowed {
                remaining: self.max_requests,
            };
        }

        if self.bucket.try_consume() {
            RateLimitResult::Allowed {
                remaining: self.bucket.remaining(),
            }
        } else {
            RateLimitResult::RateLimited {
                retry_after: self.bucket.retry_after(),
            }
        }
    }
}

/// Rate limiting middleware: 429 with a Retry-After header when the
/// shared budget is exhausted.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    match limiter.check() {
        RateLimitResult::Allowed { remaining } => {
            let mut response = next.run(request).await;
            if let Ok(value) = HeaderValue::from_str(&remaining.to_string()) {
                response.headers_mut().insert("X-RateLimit-Remaining", value);
            }
            response
        }
        RateLimitResult::RateLimited { retry_after } => {
            let mut response =
                (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded").into_response();
            let secs = retry_after.as_secs().max(1);
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert("Retry-After", value);
            }
            response
        }
    }
}
