//! Raw → normalized event conversion.

use sqlx::PgPool;
use tracing::{debug, info, warn};

use centinela_core::RawEvent;
use centinela_parser::{
    extract_parenthesized_ip, map_event_type, map_severity, LogParser, ParsedEvent,
};

use crate::PipelineError;

pub struct Normalizer {
    pool: PgPool,
    parser: Box<dyn LogParser>,
}

impl Normalizer {
    pub fn new(pool: PgPool, parser: Box<dyn LogParser>) -> Self {
        Self { pool, parser }
    }

    /// Normalize up to `limit` unparsed raw events, oldest first.
    ///
    /// Parse failures mark the raw row with `parse_error` so it is never
    /// picked up again; only infrastructure errors abort the batch.
    pub async fn normalize_batch(&self, limit: i64) -> Result<u64, PipelineError> {
        let raws: Vec<RawEvent> = sqlx::query_as(
            "SELECT * FROM raw_events WHERE parsed = FALSE ORDER BY received_at ASC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        if raws.is_empty() {
            return Ok(0);
        }

        let mut processed = 0u64;
        let mut parse_failures = 0u64;
        for raw in &raws {
            match self.parser.parse(&raw.raw_message) {
                Ok(parsed) => {
                    self.insert_normalized(raw, parsed).await?;
                }
                Err(e) => {
                    parse_failures += 1;
                    debug!(raw_event_id = %raw.id, error = %e, "parse failed");
                    sqlx::query(
                        "UPDATE raw_events SET parsed = TRUE, parse_error = $2 WHERE id = $1",
                    )
                    .bind(raw.id)
                    .bind(e.to_string())
                    .execute(&self.pool)
                    .await?;
                }
            }
            processed += 1;
        }

        info!(processed, parse_failures, "normalize batch complete");
        if parse_failures > 0 {
            warn!(parse_failures, "some raw events did not parse");
        }
        Ok(processed)
    }

    /// Insert the normalized row and flip `parsed` in one transaction, so a
    /// duplicate pipeline tick can never produce a second normalized row.
    async fn insert_normalized(
        &self,
        raw: &RawEvent,
        parsed: ParsedEvent,
    ) -> Result<(), PipelineError> {
        let event_type = map_event_type(
            parsed.log_type.as_deref(),
            parsed.subtype.as_deref(),
            parsed.action.as_deref(),
        );
        let severity = map_severity(parsed.level.as_deref());
        // Prefer the log's own clock; fall back to the collector's.
        let ts = parsed.ts.unwrap_or(raw.received_at);
        let src_ip = parsed
            .src_ip
            .clone()
            .or_else(|| {
                parsed
                    .message
                    .as_deref()
                    .and_then(extract_parenthesized_ip)
            })
            .or_else(|| raw.source_ip.clone());
        let kv = serde_json::to_value(&parsed.kv)?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO normalized_events \
             (raw_event_id, tenant_id, site_id, source_id, ts, vendor, product, event_type, \
              subtype, action, severity, src_ip, dst_ip, src_user, dst_user, src_port, dst_port, \
              interface, vdom, policy_id, session_id, message, kv) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, \
                     $18, $19, $20, $21, $22, $23)",
        )
        .bind(raw.id)
        .bind(raw.tenant_id)
        .bind(&raw.site_id)
        .bind(&raw.source_id)
        .bind(ts)
        .bind(&parsed.vendor)
        .bind(&parsed.product)
        .bind(&event_type)
        .bind(&parsed.subtype)
        .bind(&parsed.action)
        .bind(severity.as_str())
        .bind(&src_ip)
        .bind(&parsed.dst_ip)
        .bind(&parsed.src_user)
        .bind(&parsed.dst_user)
        .bind(parsed.src_port)
        .bind(parsed.dst_port)
        .bind(&parsed.interface)
        .bind(&parsed.vdom)
        .bind(&parsed.policy_id)
        .bind(&parsed.session_id)
        .bind(&parsed.message)
        .bind(&kv)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE raw_events SET parsed = TRUE, parse_error = NULL WHERE id = $1")
            .bind(raw.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}
