//! Events surfaced to external collaborators (UI, notifications, logging).
//! Components push these through one channel instead of exposing callbacks.

use std::net::IpAddr;

use crate::identity::{PeerId, TransferId};

/// Which listening role failed to bind its port. Discovery is fatal (no
/// liveness on the LAN without it); transport is degraded (outbound
/// connections still work).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortRole {
    Discovery,
    Transport,
}

/// Payload classification of a received envelope, as handed to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Image,
    File,
    FileCompleted,
    FileError,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::File => "file",
            MessageKind::FileCompleted => "file_completed",
            MessageKind::FileError => "file_error",
        }
    }
}

/// Everything the networking core reports outward.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    PeerFound {
        addr: IpAddr,
        username: String,
        uuid: PeerId,
    },
    PeerLost {
        addr: IpAddr,
    },
    PeerConnected {
        addr: IpAddr,
    },
    PeerDisconnected {
        addr: IpAddr,
    },
    ConnectFailed {
        addr: IpAddr,
    },
    MessageReceived {
        addr: IpAddr,
        kind: MessageKind,
        content: String,
        timestamp: String,
    },
    TransferProgress {
        id: TransferId,
        bytes_done: u64,
        bytes_total: u64,
        status: String,
    },
    /// Exactly one per transfer attempt, on either outcome.
    TransferCompleted {
        id: TransferId,
        success: bool,
        message: String,
    },
    PortUnavailable {
        port: u16,
        role: PortRole,
    },
}
