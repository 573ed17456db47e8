//! LanLink protocol reference implementation.
//! Sans-I/O: data model, wire codec and transfer bookkeeping only; the
//! daemon crate owns sockets, files and tasks.

pub mod chunk;
pub mod event;
pub mod identity;
pub mod peer;
pub mod protocol;
pub mod wire;

pub use chunk::{TransferState, CHUNK_SIZE};
pub use event::{Event, MessageKind, PortRole};
pub use identity::{PeerId, TransferId};
pub use peer::{PeerIdentity, PeerRegistry, DEFAULT_PEER_TTL};
pub use protocol::{Datagram, Envelope};
pub use wire::{decode_frame, decode_payload, encode_frame, FrameDecodeError, FrameEncodeError};
