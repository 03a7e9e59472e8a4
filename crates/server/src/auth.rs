//! API-key authentication middleware.
//!
//! The bearer token is hashed with SHA-256 and matched against the key
//! store; plaintext keys never touch the database. A miss is delayed
//! 100 ms before the 401 to soften brute-force probing, and rejections are
//! logged at debug, never error.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::state::AppState;

const MISS_DELAY: Duration = Duration::from_millis(100);

/// Attached to the request after successful authentication. Handlers take
/// the tenant from here and only here; a tenant id in the body is ignored.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub tenant_id: Uuid,
    pub api_key_id: Uuid,
    pub plan_tier: String,
}

#[derive(Debug, sqlx::FromRow)]
struct KeyRow {
    api_key_id: Uuid,
    tenant_id: Uuid,
    plan_tier: String,
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({"ok": false, "error": "unauthorized"})),
    )
        .into_response()
}

/// Hex SHA-256 of an API key, the only form ever persisted or compared.
pub fn hash_api_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = match bearer_token(&request) {
        Some(token) => token.to_string(),
        None => {
            debug!("missing or malformed Authorization header");
            tokio::time::sleep(MISS_DELAY).await;
            return unauthorized();
        }
    };

    let key_hash = hash_api_key(&token);
    let row: Result<Option<KeyRow>, sqlx::Error> = sqlx::query_as(
        "SELECT k.id AS api_key_id, k.tenant_id, t.plan_tier \
         FROM api_keys k JOIN tenants t ON t.id = k.tenant_id \
         WHERE k.key_hash = $1 AND k.is_active = TRUE AND t.status = 'active'",
    )
    .bind(&key_hash)
    .fetch_optional(&state.pool)
    .await;

    let row = match row {
        Ok(Some(row)) => row,
        Ok(None) => {
            debug!("unknown or inactive API key");
            tokio::time::sleep(MISS_DELAY).await;
            return unauthorized();
        }
        Err(e) => {
            warn!(error = %e, "API key lookup failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"ok": false, "error": "internal"})),
            )
                .into_response();
        }
    };

    // Touch last_used_at off the request path.
    let pool = state.pool.clone();
    let api_key_id = row.api_key_id;
    tokio::spawn(async move {
        if let Err(e) = sqlx::query("UPDATE api_keys SET last_used_at = now() WHERE id = $1")
            .bind(api_key_id)
            .execute(&pool)
            .await
        {
            debug!(error = %e, "last_used_at touch failed");
        }
    });

    request.extensions_mut().insert(AuthContext {
        tenant_id: row.tenant_id,
        api_key_id: row.api_key_id,
        plan_tier: row.plan_tier,
    });
    next.run(request).await
}

fn bearer_token(request: &Request) -> Option<&str> {
    let header = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?;
    let token = header.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token)
}
