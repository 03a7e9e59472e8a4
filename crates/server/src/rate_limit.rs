//! Per-tenant sliding-window rate limiting over Redis sorted sets.
//!
//! One ZSET per tenant; members are scored by arrival time. A pipeline
//! trims the window, reads the pre-add cardinality, adds the new member,
//! and refreshes the TTL. If the pre-add count already met the tier limit
//! the member is removed again and the request rejected.
//!
//! The limiter fails OPEN by policy: when Redis is unreachable the request
//! is allowed, a dedicated counter is bumped, and the failure is logged.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rand::Rng;
use redis::AsyncCommands;
use tracing::{debug, warn};

use crate::auth::AuthContext;
use crate::state::AppState;

#[derive(Debug, Clone)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    pub reset_secs: u64,
    pub tier: String,
}

pub async fn enforce_rate_limit(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(auth) = request.extensions().get::<AuthContext>().cloned() else {
        // Auth middleware runs first; a missing context is a wiring bug,
        // not a client error.
        warn!("rate limiter invoked without auth context");
        return next.run(request).await;
    };

    let decision = match check(&state, &auth).await {
        Ok(decision) => decision,
        Err(e) => {
            state.rate_limit_fail_open.fetch_add(1, Ordering::Relaxed);
            warn!(
                tenant_id = %auth.tenant_id,
                error = %e,
                "rate limiter unavailable, failing open"
            );
            return next.run(request).await;
        }
    };

    if !decision.allowed {
        debug!(
            tenant_id = %auth.tenant_id,
            tier = %decision.tier,
            limit = decision.limit,
            "rate limit exceeded"
        );
        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({
                "ok": false,
                "error": "rate_limited",
                "retry_after": decision.reset_secs,
            })),
        )
            .into_response();
        let headers = response.headers_mut();
        headers.insert("Retry-After", header_u64(decision.reset_secs));
        apply_headers(headers, &decision);
        return response;
    }

    let mut response = next.run(request).await;
    apply_headers(response.headers_mut(), &decision);
    response
}

fn header_u64(value: u64) -> HeaderValue {
    HeaderValue::from_str(&value.to_string()).unwrap_or(HeaderValue::from_static("0"))
}

fn apply_headers(headers: &mut axum::http::HeaderMap, decision: &RateDecision) {
    headers.insert("X-RateLimit-Limit", header_u64(decision.limit));
    headers.insert("X-RateLimit-Remaining", header_u64(decision.remaining));
    headers.insert("X-RateLimit-Reset", header_u64(decision.reset_secs));
    if let Ok(tier) = HeaderValue::from_str(&decision.tier) {
        headers.insert("X-RateLimit-Tier", tier);
    }
}

async fn check(state: &AppState, auth: &AuthContext) -> Result<RateDecision, redis::RedisError> {
    let limits = &state.config.rate_limit;
    let limit = limits.max_requests(&auth.plan_tier);
    let window_ms = limits.window_seconds * 1000;

    let key = format!("centinela:ratelimit:{}", auth.tenant_id);
    let now_ms = chrono::Utc::now().timestamp_millis();
    // Probabilistic suffix keeps same-millisecond arrivals distinct.
    let member = format!("{}-{:08x}", now_ms, rand::thread_rng().gen::<u32>());

    let mut conn = state.redis.clone();
    let (_, before_add, _, _): (i64, u64, i64, i64) = redis::pipe()
        .atomic()
        .zrembyscore(&key, 0, now_ms - window_ms as i64)
        .zcard(&key)
        .zadd(&key, &member, now_ms)
        .expire(&key, limits.window_seconds as i64 + 1)
        .query_async(&mut conn)
        .await?;

    if before_add >= limit {
        // Roll back the member we just added; the stored cardinality must
        // reflect only accepted requests.
        let _: i64 = conn.zrem(&key, &member).await?;
        return Ok(RateDecision {
            allowed: false,
            limit,
            remaining: 0,
            reset_secs: limits.window_seconds,
            tier: auth.plan_tier.clone(),
        });
    }

    Ok(RateDecision {
        allowed: true,
        limit,
        remaining: limit - before_add - 1,
        reset_secs: limits.window_seconds,
        tier: auth.plan_tier.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_values_are_numeric() {
        assert_eq!(header_u64(42), HeaderValue::from_static("42"));
    }

    #[test]
    fn headers_applied_from_decision() {
        let decision = RateDecision {
            allowed: true,
            limit: 100,
            remaining: 57,
            reset_secs: 60,
            tier: "pro".to_string(),
        };
        let mut headers = axum::http::HeaderMap::new();
        apply_headers(&mut headers, &decision);
        assert_eq!(headers["X-RateLimit-Limit"], "100");
        assert_eq!(headers["X-RateLimit-Remaining"], "57");
        assert_eq!(headers["X-RateLimit-Reset"], "60");
        assert_eq!(headers["X-RateLimit-Tier"], "pro");
    }
}
