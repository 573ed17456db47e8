//! Transport sessions: TCP listener for inbound peers, outbound connect to
//! discovered peers, one writer task and one read loop per session.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lanlink_core::wire::{self, MAX_FRAME_LEN};
use lanlink_core::{Envelope, Event};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::dispatch;
use crate::node::NodeState;

/// Session lifecycle. `Connecting` exists only while an outbound dial is in
/// flight; failures jump straight to removal (`Closed`), as does abrupt
/// stream termination from `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

static NEXT_EPOCH: AtomicU64 = AtomicU64::new(0);

fn next_epoch() -> u64 {
    NEXT_EPOCH.fetch_add(1, Ordering::Relaxed)
}

/// One peer's live connection: its state and the queue drained by the
/// writer task. Envelopes are delivered in submission order.
pub struct Session {
    pub state: SessionState,
    /// Distinguishes this connection from a replacement at the same
    /// address; cleanup only touches the entry it created.
    epoch: u64,
    tx: Option<mpsc::UnboundedSender<Envelope>>,
}

impl Session {
    fn connecting() -> Self {
        Session {
            state: SessionState::Connecting,
            epoch: next_epoch(),
            tx: None,
        }
    }

    fn open(tx: mpsc::UnboundedSender<Envelope>) -> Self {
        Session {
            state: SessionState::Open,
            epoch: next_epoch(),
            tx: Some(tx),
        }
    }
}

/// Accept inbound connections until shutdown. Each accepted stream becomes
/// an open session keyed by the remote address.
pub async fn run_listener(
    listener: TcpListener,
    state: Arc<NodeState>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            result = listener.accept() => match result {
                Ok((stream, remote)) => {
                    debug!(addr = %remote.ip(), "inbound connection");
                    let state = state.clone();
                    tokio::spawn(async move {
                        let (rx, epoch) = register(&state, remote.ip()).await;
                        drive(stream, remote.ip(), state, rx, epoch).await;
                    });
                }
                Err(e) => warn!(error = %e, "accept failed"),
            }
        }
    }
}

/// Dial a peer's transport listener. A no-op when a session is already
/// open. On success the session is open (and usable for `send`) before
/// this returns; on failure the dial's own state is removed and
/// `ConnectFailed` fires.
pub async fn connect_to(state: Arc<NodeState>, addr: IpAddr, port: u16) -> bool {
    let dial_epoch = {
        let mut sessions = state.sessions.lock().await;
        if sessions.get(&addr).map(|s| s.state) == Some(SessionState::Open) {
            debug!(%addr, "session already open");
            return true;
        }
        let session = Session::connecting();
        let epoch = session.epoch;
        sessions.insert(addr, session);
        epoch
    };
    match TcpStream::connect((addr, port)).await {
        Ok(stream) => {
            info!(%addr, port, "connected to peer");
            let (rx, epoch) = register(&state, addr).await;
            tokio::spawn(drive(stream, addr, state, rx, epoch));
            true
        }
        Err(e) => {
            warn!(%addr, port, error = %e, "connect failed");
            let mut sessions = state.sessions.lock().await;
            if sessions.get(&addr).map(|s| s.epoch) == Some(dial_epoch) {
                sessions.remove(&addr);
            }
            drop(sessions);
            state.emit(Event::ConnectFailed { addr });
            false
        }
    }
}

/// Enqueue an envelope for a peer. False when no open session exists, so
/// sends toward disconnected peers degrade gracefully.
pub async fn send(state: &NodeState, addr: IpAddr, envelope: Envelope) -> bool {
    let sessions = state.sessions.lock().await;
    if let Some(session) = sessions.get(&addr) {
        if session.state == SessionState::Open {
            if let Some(tx) = &session.tx {
                return tx.send(envelope).is_ok();
            }
        }
    }
    false
}

/// Mark every session closing and drop the send queues, which ends the
/// writer tasks. Each entry stays, and rejects sends, until its drive loop
/// observes the stream closing and removes it.
pub async fn close_all(state: &NodeState) {
    let mut sessions = state.sessions.lock().await;
    for session in sessions.values_mut() {
        session.state = SessionState::Closing;
        session.tx = None;
    }
}

async fn register(state: &Arc<NodeState>, addr: IpAddr) -> (mpsc::UnboundedReceiver<Envelope>, u64) {
    let (tx, rx) = mpsc::unbounded_channel();
    let session = Session::open(tx);
    let epoch = session.epoch;
    state.sessions.lock().await.insert(addr, session);
    state.emit(Event::PeerConnected { addr });
    (rx, epoch)
}

/// Own one connection until it closes: drain the send queue into framed
/// writes, and feed every inbound frame through the dispatcher. `epoch` is
/// this connection's session entry; a replacement at the same address is
/// left alone on cleanup.
async fn drive(
    stream: TcpStream,
    addr: IpAddr,
    state: Arc<NodeState>,
    mut rx: mpsc::UnboundedReceiver<Envelope>,
    epoch: u64,
) {
    let (mut reader, mut writer) = stream.into_split();

    let writer_task = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            let frame = match wire::encode_frame(&envelope) {
                Ok(f) => f,
                Err(e) => {
                    warn!(error = %e, "dropping unencodable envelope");
                    continue;
                }
            };
            if writer.write_all(&frame).await.is_err() {
                break;
            }
            if writer.flush().await.is_err() {
                break;
            }
        }
    });

    loop {
        let mut len_buf = [0u8; 4];
        if reader.read_exact(&mut len_buf).await.is_err() {
            break;
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_FRAME_LEN as usize {
            warn!(%addr, len, "oversized frame, closing session");
            break;
        }
        let mut payload = vec![0u8; len];
        if reader.read_exact(&mut payload).await.is_err() {
            break;
        }
        match wire::decode_payload(&payload) {
            Ok(envelope) => dispatch::dispatch(&state, addr, envelope).await,
            // A bad message never terminates the session.
            Err(e) => warn!(%addr, error = %e, "dropping malformed envelope"),
        }
    }

    writer_task.abort();
    let removed = {
        let mut sessions = state.sessions.lock().await;
        if sessions.get(&addr).map(|s| s.epoch) == Some(epoch) {
            sessions.remove(&addr).is_some()
        } else {
            false
        }
    };
    if removed {
        info!(%addr, "peer disconnected");
        state.emit(Event::PeerDisconnected { addr });
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::Config;
    use crate::node::LocalIdentity;
    use lanlink_core::{MessageKind, PeerId};
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    pub(crate) fn test_state(username: &str) -> (Arc<NodeState>, UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let local = LocalIdentity {
            uuid: PeerId::random(),
            username: username.into(),
        };
        (Arc::new(NodeState::new(&Config::default(), local, tx)), rx)
    }

    pub(crate) fn test_state_in(
        username: &str,
        download_dir: &std::path::Path,
    ) -> (Arc<NodeState>, UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let local = LocalIdentity {
            uuid: PeerId::random(),
            username: username.into(),
        };
        let mut state = NodeState::new(&Config::default(), local, tx);
        state.download_dir = download_dir.to_path_buf();
        (Arc::new(state), rx)
    }

    pub(crate) async fn next_event(rx: &mut UnboundedReceiver<Event>) -> Event {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    /// Loopback listener + outbound session pair for session tests. Files
    /// the server side assembles land under `download_dir`.
    pub(crate) async fn connected_pair(
        download_dir: &std::path::Path,
    ) -> (
        Arc<NodeState>,
        UnboundedReceiver<Event>,
        Arc<NodeState>,
        UnboundedReceiver<Event>,
        IpAddr,
        watch::Sender<bool>,
    ) {
        let (server, mut server_rx) = test_state_in("server", download_dir);
        let (client, mut client_rx) = test_state_in("client", download_dir);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(run_listener(listener, server.clone(), shutdown_rx));

        let addr: IpAddr = "127.0.0.1".parse().unwrap();
        assert!(connect_to(client.clone(), addr, port).await);
        assert!(matches!(
            next_event(&mut client_rx).await,
            Event::PeerConnected { .. }
        ));
        assert!(matches!(
            next_event(&mut server_rx).await,
            Event::PeerConnected { .. }
        ));
        (server, server_rx, client, client_rx, addr, shutdown_tx)
    }

    #[tokio::test]
    async fn send_without_session_returns_false() {
        let (state, _rx) = test_state("lonely");
        let addr: IpAddr = "10.0.0.1".parse().unwrap();
        assert!(!send(&state, addr, Envelope::text("hi", None)).await);
    }

    #[tokio::test]
    async fn connect_failure_cleans_up_and_reports() {
        let (state, mut rx) = test_state("client");
        let addr: IpAddr = "127.0.0.1".parse().unwrap();
        // Nothing listens on port 1 on loopback.
        assert!(!connect_to(state.clone(), addr, 1).await);
        assert!(state.sessions.lock().await.is_empty());
        assert!(matches!(
            next_event(&mut rx).await,
            Event::ConnectFailed { .. }
        ));
    }

    #[tokio::test]
    async fn text_message_reaches_dispatcher() {
        let dir = tempfile::tempdir().unwrap();
        let (_server, mut server_rx, client, _client_rx, addr, _shutdown) =
            connected_pair(dir.path()).await;

        assert!(send(&client, addr, Envelope::text("hi", Some("client".into()))).await);

        match next_event(&mut server_rx).await {
            Event::MessageReceived {
                kind, content, ..
            } => {
                assert_eq!(kind, MessageKind::Text);
                assert_eq!(content, "hi");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn envelopes_arrive_in_submission_order() {
        let dir = tempfile::tempdir().unwrap();
        let (_server, mut server_rx, client, _client_rx, addr, _shutdown) =
            connected_pair(dir.path()).await;

        for i in 0..20 {
            assert!(send(&client, addr, Envelope::text(format!("m{i}"), None)).await);
        }
        for i in 0..20 {
            match next_event(&mut server_rx).await {
                Event::MessageReceived { content, .. } => assert_eq!(content, format!("m{i}")),
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn close_all_disconnects_peer() {
        let dir = tempfile::tempdir().unwrap();
        let (server, mut server_rx, client, _client_rx, _addr, _shutdown) =
            connected_pair(dir.path()).await;

        close_all(&client).await;

        assert!(matches!(
            next_event(&mut server_rx).await,
            Event::PeerDisconnected { .. }
        ));
        assert!(server.sessions.lock().await.is_empty());
    }

    #[tokio::test]
    async fn close_all_marks_sessions_closing_until_streams_end() {
        let dir = tempfile::tempdir().unwrap();
        let (_server, mut server_rx, client, mut client_rx, addr, _shutdown) =
            connected_pair(dir.path()).await;

        close_all(&client).await;

        {
            let sessions = client.sessions.lock().await;
            assert_eq!(sessions.get(&addr).unwrap().state, SessionState::Closing);
        }
        assert!(!send(&client, addr, Envelope::text("late", None)).await);

        // The peer observes the close, then the client's own read loop
        // removes the closing entry.
        assert!(matches!(
            next_event(&mut server_rx).await,
            Event::PeerDisconnected { .. }
        ));
        assert!(matches!(
            next_event(&mut client_rx).await,
            Event::PeerDisconnected { .. }
        ));
        assert!(client.sessions.lock().await.is_empty());
    }

    #[tokio::test]
    async fn replacement_session_survives_old_stream_closing() {
        let dir = tempfile::tempdir().unwrap();
        let (server, mut server_rx) = test_state_in("server", dir.path());
        let (first, _first_rx) = test_state_in("first", dir.path());
        let (second, mut second_rx) = test_state_in("second", dir.path());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(run_listener(listener, server.clone(), shutdown_rx));
        let addr: IpAddr = "127.0.0.1".parse().unwrap();

        // Two connections from the same address; the second replaces the
        // first in the server's session map.
        assert!(connect_to(first.clone(), addr, port).await);
        assert!(matches!(
            next_event(&mut server_rx).await,
            Event::PeerConnected { .. }
        ));
        assert!(connect_to(second.clone(), addr, port).await);
        assert!(matches!(
            next_event(&mut server_rx).await,
            Event::PeerConnected { .. }
        ));
        assert!(matches!(
            next_event(&mut second_rx).await,
            Event::PeerConnected { .. }
        ));

        close_all(&first).await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        // The old stream closing must not tear down the replacement.
        assert!(send(&server, addr, Envelope::text("still here", None)).await);
        match next_event(&mut second_rx).await {
            Event::MessageReceived { content, .. } => assert_eq!(content, "still here"),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(server_rx.try_recv().is_err());
        assert!(!server.sessions.lock().await.is_empty());
    }
}
