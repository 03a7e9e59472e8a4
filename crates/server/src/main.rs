mod ai_worker;
mod api;
mod auth;
mod ingest_worker;
mod rate_limit;
mod router;
mod state;

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use anyhow::Context;
use redis::aio::ConnectionManager;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use centinela_ai::{AiClient, AiKnowledgeCache};
use centinela_core::Config;
use centinela_parser::FortiGateParser;
use centinela_pipeline::{
    AiDispatcher, Batcher, EmailDispatcher, Normalizer, PipelineScheduler,
};
use centinela_queue::{run_workers, DedupeSet, JobQueue, Lease, WorkerOptions};
use centinela_rules::{default_rules, RulesEngine};

use crate::ai_worker::AiJobHandler;
use crate::ingest_worker::IngestJobHandler;
use crate::state::AppState;

#[tokio::main]
async fn main() {
    centinela_core::config::load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let config = Config::from_env();
    let args: Vec<String> = std::env::args().collect();

    let result = match args.get(1).map(String::as_str) {
        Some("seed-tenant") => seed_tenant(&config, args.get(2).map(String::as_str)).await,
        Some("serve") | None => serve(config).await,
        Some(other) => {
            eprintln!("unknown command: {other}");
            eprintln!("usage: server [serve | seed-tenant <name>]");
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        // Bad config and unreachable stores are fatal at startup.
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

async fn connect_stores(config: &Config) -> anyhow::Result<(PgPool, ConnectionManager)> {
    let database_url = config.postgres.require_url()?;
    info!("connecting to PostgreSQL: {}", config.postgres.masked_url());
    let pool = PgPoolOptions::new()
        .max_connections(config.postgres.max_connections)
        .connect(database_url)
        .await
        .context("PostgreSQL connection failed")?;
    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .context("database migrations failed")?;
    info!("database migrations applied");

    let redis_client =
        redis::Client::open(config.redis.url()).context("invalid Redis configuration")?;
    let redis_conn = ConnectionManager::new(redis_client)
        .await
        .context("Redis connection failed")?;
    info!("Redis connected: {}:{}", config.redis.host, config.redis.port);

    Ok((pool, redis_conn))
}

async fn serve(config: Config) -> anyhow::Result<()> {
    config.log_summary();
    let (pool, redis_conn) = connect_stores(&config).await?;

    let ingest_queue = JobQueue::new(redis_conn.clone(), "ingest");
    let ai_queue = JobQueue::new(redis_conn.clone(), "ai");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Ingest workers ────────────────────────────────────────────
    let ingest_handler = Arc::new(IngestJobHandler::new(
        pool.clone(),
        Some(DedupeSet::new(
            redis_conn.clone(),
            ingest_worker::DEDUPE_WINDOW_SECS,
        )),
    ));
    let mut ingest_workers = run_workers(
        ingest_queue.clone(),
        ingest_handler,
        WorkerOptions {
            concurrency: config.pipeline.ingest_concurrency,
            ..Default::default()
        },
        shutdown_rx.clone(),
    );

    // ── AI workers + dispatcher (optional) ────────────────────────
    let ai_cache = AiKnowledgeCache::new(pool.clone(), config.ai.cache_ttl_days);
    let (mut ai_workers, ai_dispatcher) = if config.ai.is_configured() {
        let client = Arc::new(AiClient::new(pool.clone(), &config.ai)?);
        let handler = Arc::new(AiJobHandler::new(pool.clone(), client));
        let workers = run_workers(
            ai_queue.clone(),
            handler,
            WorkerOptions {
                concurrency: config.pipeline.ai_concurrency,
                ..Default::default()
            },
            shutdown_rx.clone(),
        );
        let dispatcher = AiDispatcher::new(
            pool.clone(),
            ai_queue.clone(),
            DedupeSet::new(redis_conn.clone(), AiDispatcher::claim_ttl_secs()),
        );
        (Some(workers), Some(dispatcher))
    } else {
        warn!("ATA_ORCHESTRATOR_URL not set — AI enrichment disabled");
        (None, None)
    };

    // ── Email dispatcher (optional) ───────────────────────────────
    let email_dispatcher = if config.smtp.is_configured() {
        let sender = Arc::new(centinela_notify::SmtpSender::from_config(&config.smtp)?);
        Some(EmailDispatcher::new(
            pool.clone(),
            sender,
            config.smtp.alert_recipient.clone(),
        ))
    } else {
        warn!("SMTP not configured — digests will accumulate unsent");
        None
    };

    // ── Pipeline scheduler ────────────────────────────────────────
    let lease_ttl_ms = config.pipeline.worker_interval_ms.saturating_mul(2).max(60_000);
    let scheduler = PipelineScheduler::new(
        pool.clone(),
        config.pipeline.clone(),
        Normalizer::new(pool.clone(), Box::new(FortiGateParser::new())),
        RulesEngine::new(pool.clone(), default_rules()),
        ai_dispatcher,
        Batcher::new(pool.clone()),
        email_dispatcher,
        Some(ai_cache),
        Lease::new(redis_conn.clone(), "centinela:pipeline:lease", lease_ttl_ms),
    );
    let scheduler_shutdown = shutdown_rx.clone();
    let scheduler_task = tokio::spawn(async move {
        scheduler.run(scheduler_shutdown).await;
    });

    // ── HTTP front door ───────────────────────────────────────────
    let state = Arc::new(AppState {
        config: config.clone(),
        pool,
        redis: redis_conn,
        ingest_queue,
        rate_limit_fail_open: AtomicU64::new(0),
    });
    let app = router::build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    info!("ingestion service listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = wait_for_signal().await {
                error!(error = %e, "signal handler failed");
            }
        })
        .await?;

    // The HTTP server is down; let workers finish their in-flight jobs.
    info!("shutting down workers");
    let _ = shutdown_tx.send(true);
    while ingest_workers.join_next().await.is_some() {}
    if let Some(mut workers) = ai_workers.take() {
        while workers.join_next().await.is_some() {}
    }
    scheduler_task.await.ok();
    info!("shutdown complete");
    Ok(())
}

/// Create a tenant with a fresh API key and print the plaintext key once.
/// Development helper; the key is unrecoverable afterwards.
async fn seed_tenant(config: &Config, name: Option<&str>) -> anyhow::Result<()> {
    let name = name.unwrap_or("demo-tenant");
    let (pool, _) = connect_stores(config).await?;

    let plaintext = format!(
        "ctn_{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    );
    let key_hash = auth::hash_api_key(&plaintext);
    let prefix = &plaintext[..12];

    let (tenant_id,): (uuid::Uuid,) = sqlx::query_as(
        "INSERT INTO tenants (name, plan_tier, default_locale) \
         VALUES ($1, 'free', 'en') RETURNING id",
    )
    .bind(name)
    .fetch_one(&pool)
    .await?;

    sqlx::query(
        "INSERT INTO api_keys (tenant_id, key_hash, prefix, name) VALUES ($1, $2, $3, $4)",
    )
    .bind(tenant_id)
    .bind(&key_hash)
    .bind(prefix)
    .bind("seeded key")
    .execute(&pool)
    .await?;

    println!("tenant:  {tenant_id} ({name})");
    println!("api key: {plaintext}");
    println!("(store it now — only the hash is persisted)");
    Ok(())
}

async fn wait_for_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    info!("shutdown signal received");
    Ok(())
}
