//! LAN discovery: periodic UDP broadcast of our announcement, listen for
//! other peers' announcements, expire peers that go silent.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use lanlink_core::{Datagram, Event};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::node::NodeState;

/// Announce interval. Housekeeping, not correctness: lost or duplicate
/// broadcasts are tolerated.
pub const BROADCAST_INTERVAL: Duration = Duration::from_secs(5);

/// Run discovery on a pre-bound socket (binding happens in `Node::start`
/// so a bind failure can be reported as fatal). Returns when the shutdown
/// flag flips.
pub async fn run(state: Arc<NodeState>, socket: UdpSocket, shutdown: watch::Receiver<bool>) {
    let socket = Arc::new(socket);

    let broadcast_task = tokio::spawn(broadcast_loop(
        socket.clone(),
        state.clone(),
        shutdown.clone(),
    ));
    let sweep_task = tokio::spawn(sweep_loop(state.clone(), shutdown.clone()));

    recv_loop(socket, state, shutdown).await;
    let _ = broadcast_task.await;
    let _ = sweep_task.await;
}

async fn broadcast_loop(
    socket: Arc<UdpSocket>,
    state: Arc<NodeState>,
    mut shutdown: watch::Receiver<bool>,
) {
    let announcement = Datagram::PeerAnnouncement {
        username: state.local.username.clone(),
        uuid: state.local.uuid,
        port: state.transport_port,
        discovery_port: state.discovery_port,
    };
    let payload = match announcement.to_bytes() {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "could not encode announcement");
            return;
        }
    };
    let dest = (Ipv4Addr::BROADCAST, state.discovery_port);
    loop {
        if let Err(e) = socket.send_to(&payload, dest).await {
            warn!(error = %e, "broadcast send failed");
        }
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(BROADCAST_INTERVAL) => {}
        }
    }
}

async fn recv_loop(socket: Arc<UdpSocket>, state: Arc<NodeState>, mut shutdown: watch::Receiver<bool>) {
    let mut buf = vec![0u8; 2048];
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            result = socket.recv_from(&mut buf) => match result {
                Ok((n, from)) => handle_datagram(&state, &buf[..n], from.ip()).await,
                Err(e) => warn!(error = %e, "discovery receive failed"),
            }
        }
    }
}

/// Parse one datagram and update the registry. Malformed datagrams and our
/// own announcements are dropped; only a brand-new address emits `PeerFound`.
pub(crate) async fn handle_datagram(state: &Arc<NodeState>, bytes: &[u8], from: IpAddr) {
    let datagram = match Datagram::from_bytes(bytes) {
        Ok(d) => d,
        Err(e) => {
            debug!(%from, error = %e, "ignoring malformed datagram");
            return;
        }
    };
    let Datagram::PeerAnnouncement {
        username,
        uuid,
        port,
        discovery_port,
    } = datagram;
    if uuid == state.local.uuid {
        debug!("ignoring self announcement");
        return;
    }
    let is_new = {
        let mut registry = state.registry.lock().await;
        registry.observe(from, uuid, &username, port, discovery_port, Instant::now())
    };
    if is_new {
        info!(%from, %username, %uuid, "peer found");
        state.emit(Event::PeerFound {
            addr: from,
            username,
            uuid,
        });
    }
}

async fn sweep_loop(state: Arc<NodeState>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(BROADCAST_INTERVAL) => {}
        }
        let evicted = {
            let mut registry = state.registry.lock().await;
            registry.evict_stale(Instant::now(), state.peer_ttl)
        };
        for addr in evicted {
            info!(%addr, "peer timed out");
            state.emit(Event::PeerLost { addr });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::node::LocalIdentity;
    use lanlink_core::PeerId;
    use tokio::sync::mpsc;

    fn test_state() -> (Arc<NodeState>, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let local = LocalIdentity {
            uuid: PeerId::random(),
            username: "local".into(),
        };
        (Arc::new(NodeState::new(&Config::default(), local, tx)), rx)
    }

    fn announcement(uuid: PeerId, username: &str) -> Vec<u8> {
        Datagram::PeerAnnouncement {
            username: username.into(),
            uuid,
            port: 8081,
            discovery_port: 8080,
        }
        .to_bytes()
        .unwrap()
    }

    #[tokio::test]
    async fn first_announcement_emits_peer_found_once() {
        let (state, mut rx) = test_state();
        let peer = PeerId::random();
        let from: IpAddr = "192.168.1.9".parse().unwrap();

        handle_datagram(&state, &announcement(peer, "alice"), from).await;
        handle_datagram(&state, &announcement(peer, "alice"), from).await;
        handle_datagram(&state, &announcement(peer, "alice"), from).await;

        match rx.try_recv().unwrap() {
            Event::PeerFound {
                addr,
                username,
                uuid,
            } => {
                assert_eq!(addr, from);
                assert_eq!(username, "alice");
                assert_eq!(uuid, peer);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn own_announcements_are_suppressed() {
        let (state, mut rx) = test_state();
        let from: IpAddr = "192.168.1.9".parse().unwrap();
        handle_datagram(&state, &announcement(state.local.uuid, "me"), from).await;
        assert!(rx.try_recv().is_err());
        assert!(state.registry.lock().await.is_empty());
    }

    #[tokio::test]
    async fn malformed_datagram_is_dropped() {
        let (state, mut rx) = test_state();
        let from: IpAddr = "192.168.1.9".parse().unwrap();
        handle_datagram(&state, b"{\"type\": truncated", from).await;
        handle_datagram(&state, b"plain text", from).await;
        assert!(rx.try_recv().is_err());
        assert!(state.registry.lock().await.is_empty());
    }

    #[tokio::test]
    async fn refresh_updates_username_silently() {
        let (state, mut rx) = test_state();
        let peer = PeerId::random();
        let from: IpAddr = "192.168.1.9".parse().unwrap();
        handle_datagram(&state, &announcement(peer, "alice"), from).await;
        let _ = rx.try_recv().unwrap();
        handle_datagram(&state, &announcement(peer, "alice-2"), from).await;
        assert!(rx.try_recv().is_err());
        let registry = state.registry.lock().await;
        assert_eq!(registry.get(&from).unwrap().username, "alice-2");
    }
}
