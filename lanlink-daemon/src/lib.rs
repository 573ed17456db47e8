//! LanLink daemon: UDP peer discovery, persistent per-peer message
//! sessions over TCP, and chunked file transfer with pause/resume/cancel.
//!
//! All state mutation happens through the [`node::NodeState`] maps, each
//! behind its own lock; everything observable leaves through one event
//! channel.

pub mod config;
pub mod discovery;
pub mod dispatch;
pub mod identity;
pub mod node;
pub mod transfer;
pub mod transport;

pub use lanlink_core::{Event, MessageKind, PortRole, TransferId};
pub use node::Node;
