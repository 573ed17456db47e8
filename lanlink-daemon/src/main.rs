// LanLink daemon: discovery, transport sessions, file transfer.

use lanlink_daemon::{config, Event, Node};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("lanlinkd {}", VERSION);
            return Ok(());
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = config::load();
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let node = match Node::start(cfg, events_tx).await {
            Ok(node) => node,
            Err(e) => {
                let reason = format!("{e:#}");
                error!(error = %reason, "startup failed");
                return Err(e);
            }
        };
        // The daemon has no UI; log the event stream instead.
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                log_event(event);
            }
        });
        shutdown_signal().await?;
        node.shutdown().await;
        Ok(())
    })
}

fn log_event(event: Event) {
    match event {
        Event::PeerFound {
            addr,
            username,
            uuid,
        } => info!(%addr, %username, %uuid, "peer found"),
        Event::PeerLost { addr } => info!(%addr, "peer lost"),
        Event::PeerConnected { addr } => info!(%addr, "session open"),
        Event::PeerDisconnected { addr } => info!(%addr, "session closed"),
        Event::ConnectFailed { addr } => warn!(%addr, "connect failed"),
        Event::MessageReceived {
            addr,
            kind,
            content,
            timestamp,
        } => info!(%addr, kind = kind.as_str(), %content, %timestamp, "message received"),
        Event::TransferProgress {
            id,
            bytes_done,
            bytes_total,
            status,
        } => info!(transfer = %id, bytes_done, bytes_total, %status, "transfer progress"),
        Event::TransferCompleted {
            id,
            success,
            message,
        } => {
            if success {
                info!(transfer = %id, %message, "transfer completed");
            } else {
                warn!(transfer = %id, %message, "transfer failed");
            }
        }
        Event::PortUnavailable { port, role } => {
            warn!(port, ?role, "port unavailable; free the port and retry")
        }
    }
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
