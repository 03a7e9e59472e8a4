mod buffer;
mod flush;
mod health;
mod metrics;
mod retry;
mod tcp;
mod transport;
mod udp;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use centinela_core::CollectorConfig;

use crate::buffer::EventBuffer;
use crate::health::HealthState;
use crate::metrics::Metrics;
use crate::retry::RetryQueue;
use crate::transport::ApiClient;

#[tokio::main]
async fn main() {
    centinela_core::config::load_dotenv();

    let config = match CollectorConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("collector: invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .with_target(false)
        .init();

    config.log_summary();

    if let Err(e) = run(config).await {
        error!("collector failed: {e}");
        std::process::exit(1);
    }
}

async fn run(config: CollectorConfig) -> anyhow::Result<()> {
    let buffer = Arc::new(EventBuffer::new(config.max_buffer_size));
    let metrics = Arc::new(Metrics::new());
    let retry = Arc::new(RetryQueue::new(
        config.retry_base_delay_ms,
        config.retry_max_delay_ms,
        config.max_retries,
    ));
    let client = Arc::new(ApiClient::new(&config)?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = tokio::task::JoinSet::new();

    if config.udp_enabled {
        let (config, buffer, metrics, shutdown) = (
            config.clone(),
            buffer.clone(),
            metrics.clone(),
            shutdown_rx.clone(),
        );
        tasks.spawn(async move {
            if let Err(e) = udp::run_udp_server(&config, buffer, metrics, shutdown).await {
                error!(error = %e, "UDP server exited");
            }
        });
    }

    if config.tcp_enabled {
        let (config, buffer, metrics, shutdown) = (
            config.clone(),
            buffer.clone(),
            metrics.clone(),
            shutdown_rx.clone(),
        );
        tasks.spawn(async move {
            if let Err(e) = tcp::run_tcp_server(&config, buffer, metrics, shutdown).await {
                error!(error = %e, "TCP server exited");
            }
        });
    }

    tasks.spawn(flush::run_flush_loop(
        buffer.clone(),
        client.clone(),
        retry.clone(),
        metrics.clone(),
        config.batch_size,
        config.flush_interval_ms,
        shutdown_rx.clone(),
    ));

    let retry_in_progress = Arc::new(AtomicBool::new(false));
    tasks.spawn(flush::run_retry_loop(
        client.clone(),
        retry.clone(),
        metrics.clone(),
        config.retry_check_interval_ms,
        retry_in_progress.clone(),
        shutdown_rx.clone(),
    ));

    let health_state = Arc::new(HealthState {
        config: config.clone(),
        metrics: metrics.clone(),
        buffer: buffer.clone(),
        retry: retry.clone(),
    });
    {
        let shutdown = shutdown_rx.clone();
        tasks.spawn(async move {
            if let Err(e) = health::serve(health_state, shutdown).await {
                error!(error = %e, "health server exited");
            }
        });
    }

    info!("collector running");
    wait_for_signal().await?;
    info!("shutdown signal received, stopping listeners");

    // Stop accepting new work; running loops exit after their current pass.
    let _ = shutdown_tx.send(true);

    // Wait for the retry loop's in-flight pass to settle before draining,
    // so we don't race it for the same entries.
    while retry_in_progress.load(Ordering::Acquire) {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }

    flush::drain_for_shutdown(&buffer, client.as_ref(), &retry, &metrics, config.batch_size).await;

    while tasks.join_next().await.is_some() {}

    let dlq_len = retry.dlq_len();
    if dlq_len > 0 {
        error!(dlq = dlq_len, "shutdown complete with dead-lettered events");
    } else {
        info!("shutdown complete, DLQ empty");
    }
    info!(
        received = metrics.received.load(Ordering::Relaxed),
        sent = metrics.sent.load(Ordering::Relaxed),
        failed = metrics.failed.load(Ordering::Relaxed),
        dropped = metrics.dropped.load(Ordering::Relaxed),
        "final counters"
    );

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
    Ok(())
}
