//! Session and role bookkeeping.

use std::net::SocketAddr;

use arbok_protocol::Message;

/// Asymmetric session roles. The Host is the unique listener and fan-out
/// hub; the Joiner is the unique battle counterparty; Spectators are an
/// unordered read-only set known to the Host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Host,
    Joiner,
    Spectator,
}

/// Connection-level state shared by every role.
pub struct Session {
    pub role: Role,
    /// Shared 32-bit seed; picked by the Host at handshake.
    pub seed: Option<u32>,
    /// The battle counterparty: the Joiner endpoint for a Host, the Host
    /// endpoint for a Joiner or Spectator.
    pub peer_addr: Option<SocketAddr>,
    pub connected: bool,
    spectators: Vec<SocketAddr>,
    /// BattleSetup messages replayed to spectators that join mid-battle.
    setup_cache: Vec<Message>,
}

impl Session {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            seed: None,
            peer_addr: None,
            connected: false,
            spectators: Vec::new(),
            setup_cache: Vec::new(),
        }
    }

    /// Register a spectator endpoint; false when already present (the
    /// repeated request is then an idempotent re-acknowledgment).
    pub fn add_spectator(&mut self, addr: SocketAddr) -> bool {
        if self.spectators.contains(&addr) {
            return false;
        }
        self.spectators.push(addr);
        true
    }

    pub fn remove_spectator(&mut self, addr: SocketAddr) {
        self.spectators.retain(|a| *a != addr);
    }

    pub fn is_spectator(&self, addr: SocketAddr) -> bool {
        self.spectators.contains(&addr)
    }

    pub fn spectators(&self) -> &[SocketAddr] {
        &self.spectators
    }

    pub fn is_counterparty(&self, addr: SocketAddr) -> bool {
        self.peer_addr == Some(addr)
    }

    /// Remember a BattleSetup for late-joining spectators.
    pub fn cache_setup(&mut self, message: Message) {
        self.setup_cache.push(message);
    }

    pub fn setup_cache(&self) -> &[Message] {
        &self.setup_cache
    }

    pub fn clear_setup_cache(&mut self) {
        self.setup_cache.clear();
    }
}
