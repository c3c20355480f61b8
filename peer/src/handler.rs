//! Event callbacks from the peer loop.

use std::net::SocketAddr;

use arbok_battle::BattlePokemon;

use crate::PeerError;

/// Observer of peer events. All methods default to no-ops; implement the
/// ones the driver cares about. Methods are called from inside the event
/// loop between socket polls, so they must not block.
pub trait PeerHandler: Send {
    // ===================
    // Session
    // ===================

    /// Handshake completed; the shared seed is known (0 for a spectator
    /// joining before any battle started).
    fn on_connected(&mut self, seed: u32) {
        let _ = seed;
    }

    /// A spectator registered with this Host.
    fn on_spectator_joined(&mut self, addr: SocketAddr) {
        let _ = addr;
    }

    // ===================
    // Battle
    // ===================

    /// Both BattleSetups are in and the battle begins. For a playing peer
    /// the order is (mine, opponent); a spectator sees the participants in
    /// arrival order.
    fn on_battle_started(&mut self, first: &BattlePokemon, second: &BattlePokemon) {
        let _ = (first, second);
    }

    /// Turn ownership changed after a committed turn.
    fn on_turn_changed(&mut self, my_turn: bool) {
        let _ = my_turn;
    }

    /// A deterministic status line for a committed or mirrored turn.
    fn on_battle_event(&mut self, text: &str) {
        let _ = text;
    }

    /// The peers disagreed once and entered resolution.
    fn on_discrepancy(&mut self) {}

    fn on_game_over(&mut self, winner: &str, loser: &str) {
        let _ = (winner, loser);
    }

    // ===================
    // Rematch
    // ===================

    /// The counterparty offered a rematch.
    fn on_rematch_offer(&mut self) {}

    /// Both sides want a rematch; the battle state has been reset.
    fn on_rematch_agreed(&mut self) {}

    // ===================
    // Chat
    // ===================

    /// Display a chat line. The local peer's own messages arrive with the
    /// sender `"[You]"`; remote self-echoes are already suppressed.
    fn on_chat(&mut self, sender: &str, text: &str) {
        let _ = (sender, text);
    }

    /// Display a sticker (Base64 payload, already validated).
    fn on_sticker(&mut self, sender: &str, data: &str) {
        let _ = (sender, data);
    }

    // ===================
    // Failures
    // ===================

    /// A recoverable condition was suppressed, or a fatal one is about to
    /// terminate the loop.
    fn on_error(&mut self, error: &PeerError) {
        let _ = error;
    }
}

/// A handler that ignores everything; useful for spectating scripts and
/// tests that only use [`crate::PeerHandle`] state queries.
pub struct NullHandler;

impl PeerHandler for NullHandler {}
