//! TCP syslog server with newline-delimited framing.
//!
//! Each connection gets its own task and its own [`LineAssembler`], which
//! retains incomplete trailing bytes across reads and guards against
//! memory exhaustion: a single pending line over 64 KiB is truncated to
//! 64 KiB, flushed as one event, and the rest of that line discarded.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use centinela_core::CollectorConfig;

use crate::buffer::{CollectedEvent, EventBuffer};
use crate::metrics::Metrics;

/// Hard cap on a single pending line.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Connections idle this long are closed.
const IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

// ── Framing ─────────────────────────────────────────────────────────

/// Incremental newline framer. Feed raw reads in, get complete lines out.
pub struct LineAssembler {
    pending: Vec<u8>,
    /// Set after a truncated flush; bytes are discarded until the next
    /// newline, which ends the oversized logical line.
    discarding: bool,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
            discarding: false,
        }
    }

    /// Feed bytes; returns completed non-empty lines, CR stripped.
    pub fn push(&mut self, data: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in data {
            if byte == b'\n' {
                if self.discarding {
                    self.discarding = false;
                } else if let Some(line) = take_line(&mut self.pending) {
                    lines.push(line);
                }
                continue;
            }
            if self.discarding {
                continue;
            }
            self.pending.push(byte);
            if self.pending.len() >= MAX_LINE_BYTES {
                if let Some(line) = take_line(&mut self.pending) {
                    lines.push(line);
                }
                self.discarding = true;
            }
        }
        lines
    }

    /// Flush the incomplete trailing line, if any (connection EOF).
    pub fn finish(&mut self) -> Option<String> {
        if self.discarding {
            self.discarding = false;
            self.pending.clear();
            return None;
        }
        take_line(&mut self.pending)
    }
}

impl Default for LineAssembler {
    fn default() -> Self {
        Self::new()
    }
}

fn take_line(pending: &mut Vec<u8>) -> Option<String> {
    if pending.last() == Some(&b'\r') {
        pending.pop();
    }
    if pending.is_empty() {
        return None;
    }
    let line = String::from_utf8_lossy(pending).into_owned();
    pending.clear();
    Some(line)
}

// ── Server ──────────────────────────────────────────────────────────

pub async fn run_tcp_server(
    config: &CollectorConfig,
    buffer: Arc<EventBuffer>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.tcp_bind, config.tcp_port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "TCP syslog server listening");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("TCP server stopping (shutdown)");
                return Ok(());
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let buffer = buffer.clone();
                        let metrics = metrics.clone();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, peer.ip().to_string(), buffer, metrics, shutdown).await;
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "TCP accept failed");
                    }
                }
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer_ip: String,
    buffer: Arc<EventBuffer>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    metrics.tcp_connections.fetch_add(1, Ordering::Relaxed);
    debug!(peer = %peer_ip, "TCP connection opened");

    let mut assembler = LineAssembler::new();
    let mut read_buf = vec![0u8; 8192];

    loop {
        let read = tokio::select! {
            _ = shutdown.changed() => break,
            read = tokio::time::timeout(IDLE_TIMEOUT, stream.read(&mut read_buf)) => read,
        };

        match read {
            Err(_) => {
                debug!(peer = %peer_ip, "closing idle TCP connection");
                break;
            }
            Ok(Ok(0)) => {
                // Clean EOF: a sender may omit the final newline.
                if let Some(line) = assembler.finish() {
                    accept_line(line, &peer_ip, &buffer, &metrics);
                }
                break;
            }
            Ok(Ok(n)) => {
                for line in assembler.push(&read_buf[..n]) {
                    accept_line(line, &peer_ip, &buffer, &metrics);
                }
            }
            Ok(Err(e)) => {
                // Resets are routine for syslog senders; keep them quiet.
                if e.kind() == std::io::ErrorKind::ConnectionReset {
                    debug!(peer = %peer_ip, "TCP connection reset");
                } else {
                    warn!(peer = %peer_ip, error = %e, "TCP read error");
                }
                break;
            }
        }
    }

    metrics.tcp_connections.fetch_sub(1, Ordering::Relaxed);
    debug!(peer = %peer_ip, "TCP connection closed");
}

fn accept_line(line: String, peer_ip: &str, buffer: &EventBuffer, metrics: &Metrics) {
    metrics.received.fetch_add(1, Ordering::Relaxed);
    let event = CollectedEvent::new(line, Some(peer_ip.to_string()));
    if !buffer.push(event) {
        metrics.dropped.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_read_single_line() {
        let mut assembler = LineAssembler::new();
        let lines = assembler.push(b"hello world\n");
        assert_eq!(lines, vec!["hello world"]);
    }

    #[test]
    fn crlf_is_stripped() {
        let mut assembler = LineAssembler::new();
        let lines = assembler.push(b"one\r\ntwo\r\n");
        assert_eq!(lines, vec!["one", "two"]);
    }

    #[test]
    fn partial_line_retained_across_reads() {
        let mut assembler = LineAssembler::new();
        assert!(assembler.push(b"first ha").is_empty());
        let lines = assembler.push(b"lf\nsecond\n");
        assert_eq!(lines, vec!["first half", "second"]);
    }

    #[test]
    fn empty_lines_are_skipped() {
        let mut assembler = LineAssembler::new();
        let lines = assembler.push(b"\n\na\n\r\n");
        assert_eq!(lines, vec!["a"]);
    }

    #[test]
    fn oversized_line_truncated_to_exactly_64k() {
        let mut assembler = LineAssembler::new();
        let oversized = vec![b'x'; MAX_LINE_BYTES + 1];
        let lines = assembler.push(&oversized);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].len(), MAX_LINE_BYTES);
        // The overflow byte was discarded; the connection keeps working
        // after the oversized line's newline arrives.
        assert!(assembler.push(b"tail of the huge line\n").is_empty());
        let lines = assembler.push(b"next event\n");
        assert_eq!(lines, vec!["next event"]);
    }

    #[test]
    fn finish_flushes_trailing_bytes() {
        let mut assembler = LineAssembler::new();
        assert!(assembler.push(b"no trailing newline").is_empty());
        assert_eq!(assembler.finish().as_deref(), Some("no trailing newline"));
        assert_eq!(assembler.finish(), None);
    }

    #[test]
    fn finish_discards_oversized_remainder() {
        let mut assembler = LineAssembler::new();
        let oversized = vec![b'x'; MAX_LINE_BYTES + 100];
        let lines = assembler.push(&oversized);
        assert_eq!(lines.len(), 1);
        // EOF while still discarding the oversized tail: nothing extra.
        assert_eq!(assembler.finish(), None);
    }

    #[test]
    fn non_utf8_bytes_are_lossy_converted() {
        let mut assembler = LineAssembler::new();
        let lines = assembler.push(b"bad \xff byte\n");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("bad"));
    }
}
