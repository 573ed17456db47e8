//! Node: owns the shared state maps, spawns the long-lived tasks and
//! exposes the command surface consumed by external collaborators.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use lanlink_core::{
    Envelope, Event, PeerId, PeerIdentity, PeerRegistry, PortRole, TransferId, TransferState,
};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::transfer::TransferControl;
use crate::transport::Session;
use crate::{discovery, identity, transfer, transport};

/// Identity announced to the LAN.
#[derive(Debug, Clone)]
pub struct LocalIdentity {
    pub uuid: PeerId,
    pub username: String,
}

/// Shared state. Each map is mutated only through its own lock; cross-task
/// signalling goes through the event channel.
pub struct NodeState {
    pub local: LocalIdentity,
    pub discovery_port: u16,
    pub transport_port: u16,
    pub peer_ttl: Duration,
    pub download_dir: PathBuf,
    pub registry: Mutex<PeerRegistry>,
    pub sessions: Mutex<HashMap<IpAddr, Session>>,
    /// Inbound transfers accumulating chunks, keyed by transfer ID.
    pub inbound: Mutex<HashMap<TransferId, TransferState>>,
    /// Pause/cancel flags for outbound transfers.
    pub controls: Mutex<HashMap<TransferId, Arc<TransferControl>>>,
    events: mpsc::UnboundedSender<Event>,
}

impl NodeState {
    pub fn new(
        config: &Config,
        local: LocalIdentity,
        events: mpsc::UnboundedSender<Event>,
    ) -> Self {
        Self {
            local,
            discovery_port: config.discovery_port,
            transport_port: config.transport_port,
            peer_ttl: config.peer_ttl(),
            download_dir: config.resolved_download_dir(),
            registry: Mutex::new(PeerRegistry::new()),
            sessions: Mutex::new(HashMap::new()),
            inbound: Mutex::new(HashMap::new()),
            controls: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Push an event to whoever is listening. A closed receiver means the
    /// collaborator went away; nothing to do about it here.
    pub fn emit(&self, event: Event) {
        let _ = self.events.send(event);
    }
}

/// Handle to a running daemon instance.
pub struct Node {
    state: Arc<NodeState>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Node {
    /// Bind the listening sockets and spawn discovery and transport.
    ///
    /// A discovery bind failure is fatal: the `PortUnavailable` event fires
    /// and the error propagates. A transport bind failure only degrades the
    /// instance to outbound connections.
    pub async fn start(config: Config, events: mpsc::UnboundedSender<Event>) -> anyhow::Result<Node> {
        let uuid = identity::load_or_create(&identity::default_path())
            .context("could not load installation identity")?;
        let local = LocalIdentity {
            uuid,
            username: config.resolved_username(),
        };
        info!(%uuid, username = %local.username, "starting node");
        let state = Arc::new(NodeState::new(&config, local, events));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        let udp = match UdpSocket::bind(("0.0.0.0", state.discovery_port)).await {
            Ok(socket) => socket,
            Err(e) => {
                error!(port = state.discovery_port, error = %e, "discovery port unavailable");
                state.emit(Event::PortUnavailable {
                    port: state.discovery_port,
                    role: PortRole::Discovery,
                });
                return Err(anyhow::Error::new(e).context(format!(
                    "discovery port {} already in use; free the port and retry",
                    state.discovery_port
                )));
            }
        };
        udp.set_broadcast(true)?;
        tasks.push(tokio::spawn(discovery::run(
            state.clone(),
            udp,
            shutdown_rx.clone(),
        )));

        match TcpListener::bind(("0.0.0.0", state.transport_port)).await {
            Ok(listener) => {
                info!(port = state.transport_port, "transport listening");
                tasks.push(tokio::spawn(transport::run_listener(
                    listener,
                    state.clone(),
                    shutdown_rx,
                )));
            }
            Err(e) => {
                warn!(
                    port = state.transport_port,
                    error = %e,
                    "transport port unavailable; inbound sessions disabled"
                );
                state.emit(Event::PortUnavailable {
                    port: state.transport_port,
                    role: PortRole::Transport,
                });
            }
        }

        Ok(Node {
            state,
            shutdown: shutdown_tx,
            tasks: Mutex::new(tasks),
        })
    }

    /// Open a session to a discovered peer. The transport port comes from
    /// the peer's announcement, falling back to our configured default.
    pub async fn connect_to(&self, addr: IpAddr) -> bool {
        let port = {
            let registry = self.state.registry.lock().await;
            registry.get(&addr).map(|p| p.transport_port)
        }
        .unwrap_or(self.state.transport_port);
        transport::connect_to(self.state.clone(), addr, port).await
    }

    /// Enqueue a text message. False when no open session exists.
    pub async fn send_text(&self, addr: IpAddr, text: &str) -> bool {
        let envelope = Envelope::text(text, Some(self.state.local.username.clone()));
        transport::send(&self.state, addr, envelope).await
    }

    /// Start a chunked file send toward a connected peer. Progress and the
    /// terminal outcome arrive on the event channel under the returned ID.
    pub async fn send_file(&self, addr: IpAddr, path: PathBuf) -> TransferId {
        let id = TransferId::random();
        let control = Arc::new(TransferControl::default());
        self.state.controls.lock().await.insert(id, control.clone());
        let state = self.state.clone();
        let handle = tokio::spawn(transfer::run_send(state, id, addr, path, control));
        self.tasks.lock().await.push(handle);
        id
    }

    pub async fn pause_transfer(&self, id: TransferId) -> bool {
        match self.state.controls.lock().await.get(&id) {
            Some(control) => {
                control.pause();
                true
            }
            None => false,
        }
    }

    pub async fn resume_transfer(&self, id: TransferId) -> bool {
        match self.state.controls.lock().await.get(&id) {
            Some(control) => {
                control.resume();
                true
            }
            None => false,
        }
    }

    pub async fn cancel_transfer(&self, id: TransferId) -> bool {
        match self.state.controls.lock().await.get(&id) {
            Some(control) => {
                control.cancel();
                true
            }
            None => false,
        }
    }

    /// Snapshot of the peer registry for display.
    pub async fn peers(&self) -> Vec<PeerIdentity> {
        self.state.registry.lock().await.iter().cloned().collect()
    }

    /// Signal every loop to stop, close all sessions, and wait a bounded
    /// interval per task before force-terminating it.
    pub async fn shutdown(&self) {
        info!("shutting down");
        let _ = self.shutdown.send(true);
        for control in self.state.controls.lock().await.values() {
            control.cancel();
        }
        transport::close_all(&self.state).await;
        let mut tasks = self.tasks.lock().await;
        for mut task in tasks.drain(..) {
            if tokio::time::timeout(Duration::from_secs(1), &mut task)
                .await
                .is_err()
            {
                task.abort();
            }
        }
    }
}
