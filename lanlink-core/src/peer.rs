//! Peer registry: in-memory table of discovered peers, keyed by address.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use crate::identity::PeerId;

/// How long a peer may stay silent before eviction. Six missed broadcasts
/// at the 5 second announce interval.
pub const DEFAULT_PEER_TTL: Duration = Duration::from_secs(30);

/// One discovered peer, as self-reported in its announcements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    pub uuid: PeerId,
    pub username: String,
    pub address: IpAddr,
    pub discovery_port: u16,
    pub transport_port: u16,
    pub last_seen: Instant,
}

/// Table of known peers. Pure data structure; the daemon serializes access
/// behind a lock.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: HashMap<IpAddr, PeerIdentity>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an announcement from `address`. Returns true the first time an
    /// address is seen (the caller emits `PeerFound` exactly then); repeat
    /// announcements refresh username, ports and last-seen silently.
    pub fn observe(
        &mut self,
        address: IpAddr,
        uuid: PeerId,
        username: &str,
        transport_port: u16,
        discovery_port: u16,
        now: Instant,
    ) -> bool {
        match self.peers.get_mut(&address) {
            Some(existing) => {
                existing.uuid = uuid;
                existing.username = username.to_string();
                existing.transport_port = transport_port;
                existing.discovery_port = discovery_port;
                existing.last_seen = now;
                false
            }
            None => {
                self.peers.insert(
                    address,
                    PeerIdentity {
                        uuid,
                        username: username.to_string(),
                        address,
                        discovery_port,
                        transport_port,
                        last_seen: now,
                    },
                );
                true
            }
        }
    }

    pub fn get(&self, address: &IpAddr) -> Option<&PeerIdentity> {
        self.peers.get(address)
    }

    pub fn remove(&mut self, address: &IpAddr) -> Option<PeerIdentity> {
        self.peers.remove(address)
    }

    /// Drop peers not seen within `ttl` and return their addresses so the
    /// caller can emit `PeerLost` for each.
    pub fn evict_stale(&mut self, now: Instant, ttl: Duration) -> Vec<IpAddr> {
        let stale: Vec<IpAddr> = self
            .peers
            .iter()
            .filter(|(_, p)| now.duration_since(p.last_seen) >= ttl)
            .map(|(addr, _)| *addr)
            .collect();
        for addr in &stale {
            self.peers.remove(addr);
        }
        stale
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerIdentity> {
        self.peers.values()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
