//! UDP syslog server. One datagram is one syslog line; no framing.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{info, warn};

use centinela_core::CollectorConfig;

use crate::buffer::{CollectedEvent, EventBuffer};
use crate::metrics::Metrics;

pub async fn run_udp_server(
    config: &CollectorConfig,
    buffer: Arc<EventBuffer>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.udp_bind, config.udp_port);
    let socket = UdpSocket::bind(&addr).await?;
    info!(addr = %addr, "UDP syslog server listening");

    // Max UDP datagram; syslog lines are far smaller in practice.
    let mut recv_buf = vec![0u8; 65_535];

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("UDP server stopping (shutdown)");
                return Ok(());
            }
            received = socket.recv_from(&mut recv_buf) => {
                match received {
                    Ok((n, peer)) => {
                        let line = String::from_utf8_lossy(&recv_buf[..n]);
                        let line = line.trim_end_matches(['\r', '\n']);
                        if line.is_empty() {
                            continue;
                        }
                        metrics.received.fetch_add(1, Ordering::Relaxed);
                        let event =
                            CollectedEvent::new(line.to_string(), Some(peer.ip().to_string()));
                        if !buffer.push(event) {
                            metrics.dropped.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "UDP recv failed");
                    }
                }
            }
        }
    }
}
