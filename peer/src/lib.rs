//! Peer runtime: UDP transport, reliability layer, session management and
//! the battle event loop.
//!
//! A peer is one side of a battle session — the listening Host, the Joiner,
//! or a read-only Spectator. Each peer runs a single cooperative loop that
//! owns the socket and every piece of mutable state; drivers talk to it
//! through a [`PeerHandle`] and observe it through a [`PeerHandler`]
//! implementation.
//!
//! ```ignore
//! use arbok_peer::{Peer, PeerConfig, PeerHandler};
//!
//! struct Ui;
//! impl PeerHandler for Ui {
//!     fn on_chat(&mut self, sender: &str, text: &str) {
//!         println!("{}: {}", sender, text);
//!     }
//! }
//!
//! let (peer, handle) = Peer::host(PeerConfig::default()).await?;
//! tokio::spawn(async move { peer.run(&mut Ui).await });
//! handle.send_chat("glhf")?;
//! ```

use thiserror::Error;

pub mod chat;
pub mod config;
pub mod handle;
pub mod handler;
pub mod peer;
pub mod reliability;
pub mod session;

pub use config::{FaultInjection, PeerConfig, HOST_PORT};
pub use handle::{Command, PeerHandle, PeerStatus, PokemonCondition};
pub use handler::{NullHandler, PeerHandler};
pub use peer::Peer;
pub use reliability::ReliabilityLayer;
pub use session::{Role, Session};

use arbok_battle::BattleError;

/// Failure taxonomy for the peer runtime.
///
/// Recoverable conditions are reported through
/// [`PeerHandler::on_error`] and suppressed; only fatal kinds
/// ([`PeerError::PeerLost`], [`PeerError::ProtocolDesync`], I/O failures)
/// terminate the event loop.
#[derive(Error, Debug)]
pub enum PeerError {
    #[error("Peer unreachable: {0}")]
    PeerLost(String),

    #[error("Calculation desync could not be resolved: {0}")]
    ProtocolDesync(String),

    #[error("Received an attack while holding the turn")]
    IllegalTurn,

    #[error("Unknown move: {0}")]
    UnknownMove(String),

    #[error("Not connected to a battle counterparty")]
    NotConnected,

    #[error("Sticker exceeds the configured size ceiling")]
    StickerOversize,

    #[error("Sticker is not valid Base64")]
    StickerBadEncoding,

    #[error("Peer loop is not accepting commands")]
    ChannelClosed,

    #[error("Invalid battle setup: {0}")]
    BadSetup(String),

    #[error("{0}")]
    Battle(#[from] BattleError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PeerError {
    /// True for failures that end the session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PeerError::PeerLost(_) | PeerError::ProtocolDesync(_) | PeerError::Io(_)
        )
    }

    /// Process exit code for CLI drivers: 0 is reserved for a clean
    /// shutdown, fatal protocol failures get distinct codes.
    pub fn exit_code(&self) -> i32 {
        match self {
            PeerError::PeerLost(_) => 2,
            PeerError::ProtocolDesync(_) => 3,
            _ => 1,
        }
    }
}
