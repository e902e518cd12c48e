// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-IP request limiting at ingress.
//!
//! A fixed window counter per client address, kept in a bounded LRU so a
//! flood of distinct addresses cannot grow memory without limit.

use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{request::Parts, Extensions, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use lru::LruCache;

use crate::error::ApiError;
use crate::state::AppState;

/// Distinct client addresses tracked at once.
const DEFAULT_CAPACITY: usize = 10_000;

/// Counter for one client in the current window.
struct Window {
    started_at: Instant,
    count: u32,
}

/// Outcome of counting one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

/// Fixed window rate limiter keyed by client address.
pub struct RateLimiter {
    windows: Mutex<LruCache<String, Window>>,
    max_requests: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self::with_capacity(max_requests, window, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(max_requests: u32, window: Duration, capacity: usize) -> Self {
        Self {
            windows: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            max_requests,
            window,
        }
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Count one request from `key` at `now`.
    pub fn check_at(&self, key: &str, now: Instant) -> Decision {
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let entry = windows.get_or_insert_mut(key.to_string(), || Window {
            started_at: now,
            count: 0,
        });
        if now.duration_since(entry.started_at) >= self.window {
            entry.started_at = now;
            entry.count = 0;
        }

        if entry.count >= self.max_requests {
            let elapsed = now.duration_since(entry.started_at);
            return Decision::Limited {
                retry_after: self.window.saturating_sub(elapsed),
            };
        }
        entry.count += 1;
        Decision::Allowed {
            remaining: self.max_requests - entry.count,
        }
    }

    pub fn check(&self, key: &str) -> Decision {
        self.check_at(key, Instant::now())
    }
}

/// Client address for limiting and audit entries.
///
/// The first `X-Forwarded-For` hop is used only when `trust_forwarded_for`
/// is set; otherwise the socket peer is the only source.
pub fn client_ip(parts: &Parts, trust_forwarded_for: bool) -> String {
    client_ip_of(&parts.headers, &parts.extensions, trust_forwarded_for)
}

fn client_ip_of(headers: &HeaderMap, extensions: &Extensions, trust_forwarded_for: bool) -> String {
    let forwarded = || {
        headers
            .get("X-Forwarded-For")
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.split(',').next())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };
    let peer = || {
        extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip().to_string())
    };

    let ip = if trust_forwarded_for {
        forwarded().or_else(peer)
    } else {
        peer()
    };
    ip.unwrap_or_else(|| "unknown".to_string())
}

/// Middleware rejecting requests over the per-IP budget with 429.
pub async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let ip = client_ip_of(
        request.headers(),
        request.extensions(),
        state.config.trust_forwarded_for,
    );
    let limiter = &state.rate_limiter;

    match limiter.check(&ip) {
        Decision::Allowed { remaining } => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert("X-RateLimit-Limit", HeaderValue::from(limiter.max_requests()));
            headers.insert("X-RateLimit-Remaining", HeaderValue::from(remaining));
            response
        }
        Decision::Limited { retry_after } => {
            let secs = retry_after.as_secs().max(1);
            tracing::warn!(ip = %ip, retry_after_secs = secs, "Rate limit exceeded");
            let mut response = ApiError::new(
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                format!("Too many requests, retry after {secs} seconds"),
            )
            .into_response();
            let headers = response.headers_mut();
            headers.insert("Retry-After", HeaderValue::from(secs));
            headers.insert("X-RateLimit-Limit", HeaderValue::from(limiter.max_requests()));
            headers.insert("X-RateLimit-Remaining", HeaderValue::from(0u32));
            response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request as HttpRequest;

    #[test]
    fn window_allows_then_limits() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let now = Instant::now();

        assert_eq!(limiter.check_at("1.2.3.4", now), Decision::Allowed { remaining: 2 });
        assert_eq!(limiter.check_at("1.2.3.4", now), Decision::Allowed { remaining: 1 });
        assert_eq!(limiter.check_at("1.2.3.4", now), Decision::Allowed { remaining: 0 });

        let later = now + Duration::from_secs(20);
        assert_eq!(
            limiter.check_at("1.2.3.4", later),
            Decision::Limited {
                retry_after: Duration::from_secs(40)
            }
        );
        // other clients have their own budget
        assert!(matches!(limiter.check_at("5.6.7.8", later), Decision::Allowed { .. }));
    }

    #[test]
    fn window_resets() {
        let limiter = RateLimiter::new(1, Duration::from_secs(10));
        let now = Instant::now();
        assert!(matches!(limiter.check_at("ip", now), Decision::Allowed { .. }));
        assert!(matches!(limiter.check_at("ip", now), Decision::Limited { .. }));
        assert!(matches!(
            limiter.check_at("ip", now + Duration::from_secs(10)),
            Decision::Allowed { .. }
        ));
    }

    #[test]
    fn least_recent_client_is_evicted() {
        let limiter = RateLimiter::with_capacity(1, Duration::from_secs(60), 2);
        let now = Instant::now();
        limiter.check_at("a", now);
        limiter.check_at("b", now);
        limiter.check_at("c", now);
        // "a" was evicted and starts a fresh window
        assert!(matches!(limiter.check_at("a", now), Decision::Allowed { .. }));
    }

    #[test]
    fn forwarded_for_is_ignored_unless_trusted() {
        let mut parts = HttpRequest::builder()
            .header("X-Forwarded-For", "10.0.0.7, 172.16.0.1")
            .body(())
            .unwrap()
            .into_parts()
            .0;
        assert_eq!(client_ip(&parts, false), "unknown");
        assert_eq!(client_ip(&parts, true), "10.0.0.7");

        let peer: SocketAddr = "192.0.2.10:51000".parse().unwrap();
        parts.extensions.insert(ConnectInfo(peer));
        assert_eq!(client_ip(&parts, false), "192.0.2.10");
        assert_eq!(client_ip(&parts, true), "10.0.0.7");

        let bare = HttpRequest::builder().body(()).unwrap().into_parts().0;
        assert_eq!(client_ip(&bare, true), "unknown");
    }
}
