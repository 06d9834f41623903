// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@on1.no>

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

/// Per-process counters exposed over the plaintext metrics endpoint.
#[derive(Default)]
pub struct ProcessStats {
    pub emitted: AtomicU64,
    pub vetoed: AtomicU64,
    pub emission_failures: AtomicU64,
    pub amplified: AtomicU64,
    pub captures_failed: AtomicU64,
    pub attested: AtomicU64,
    pub rpc_failovers: AtomicU64,
    pub echoes: AtomicU64,
}

pub async fn spawn_metrics_server(
    port: u16,
    role: &'static str,
    stats: Arc<ProcessStats>,
) -> Option<SocketAddr> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::warn!("Metrics server failed to bind: {}", e);
            return None;
        }
    };

    let local = listener.local_addr().ok();
    if let Some(addr) = local {
        tracing::info!("Metrics server listening on {}", addr);
    }

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let body = render_metrics(role, &stats);
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                }
                Err(e) => {
                    tracing::warn!("Metrics accept error: {}", e);
                    continue;
                }
            }
        }
    });

    local
}

fn render_metrics(role: &str, stats: &Arc<ProcessStats>) -> String {
    let rows: [(&str, u64); 8] = [
        ("signals_emitted", stats.emitted.load(Ordering::Relaxed)),
        ("signals_vetoed", stats.vetoed.load(Ordering::Relaxed)),
        (
            "emission_failures",
            stats.emission_failures.load(Ordering::Relaxed),
        ),
        ("signals_amplified", stats.amplified.load(Ordering::Relaxed)),
        (
            "captures_failed",
            stats.captures_failed.load(Ordering::Relaxed),
        ),
        ("yields_attested", stats.attested.load(Ordering::Relaxed)),
        ("rpc_failovers", stats.rpc_failovers.load(Ordering::Relaxed)),
        ("echo_publishes", stats.echoes.load(Ordering::Relaxed)),
    ];
    let mut body = String::new();
    for (name, value) in rows {
        body.push_str(&format!(
            "# TYPE {name} counter\n{name}{{role=\"{role}\"}} {value}\n"
        ));
    }
    body
}
