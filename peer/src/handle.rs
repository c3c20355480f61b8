//! Driver-facing handle: commands in, status snapshots out.

use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use arbok_battle::{BattlePhase, BattlePokemon, PokemonStats, StatBoosts};
use tokio::sync::mpsc;

use crate::PeerError;

/// Commands posted from the driver (UI thread) into the event loop. The
/// channel is bounded and the send is non-blocking; the loop drains it
/// between socket polls.
#[derive(Debug)]
pub enum Command {
    StartBattle {
        stats: PokemonStats,
        boosts: StatBoosts,
    },
    SubmitMove {
        move_name: String,
        use_boost: bool,
    },
    /// Declare a special-defense boost for the next incoming attack.
    ArmDefenseBoost,
    Chat {
        text: String,
    },
    Sticker {
        data: String,
    },
    Rematch,
    Shutdown,
}

/// One Pokemon's externally visible condition.
#[derive(Debug, Clone, PartialEq)]
pub struct PokemonCondition {
    pub name: String,
    pub current_hp: i32,
    pub max_hp: i32,
    pub attack_boosts_left: u32,
    pub defense_boosts_left: u32,
}

impl PokemonCondition {
    pub(crate) fn of(pokemon: &BattlePokemon) -> Self {
        Self {
            name: pokemon.name().to_string(),
            current_hp: pokemon.current_hp,
            max_hp: pokemon.max_hp,
            attack_boosts_left: pokemon.attack_boosts_left(),
            defense_boosts_left: pokemon.defense_boosts_left(),
        }
    }
}

/// Read-only snapshot of the peer, refreshed by the loop after every step.
#[derive(Debug, Clone, Default)]
pub struct PeerStatus {
    pub connected: bool,
    pub seed: Option<u32>,
    pub phase: Option<BattlePhase>,
    pub my_turn: bool,
    pub me: Option<PokemonCondition>,
    pub opponent: Option<PokemonCondition>,
    pub spectator_count: usize,
    pub game_over: bool,
}

/// Cheap-to-clone handle owned by the driver.
#[derive(Clone)]
pub struct PeerHandle {
    tx: mpsc::Sender<Command>,
    status: Arc<RwLock<PeerStatus>>,
    local_addr: SocketAddr,
}

impl PeerHandle {
    pub(crate) fn new(
        tx: mpsc::Sender<Command>,
        status: Arc<RwLock<PeerStatus>>,
        local_addr: SocketAddr,
    ) -> Self {
        Self {
            tx,
            status,
            local_addr,
        }
    }

    fn send(&self, command: Command) -> Result<(), PeerError> {
        self.tx.try_send(command).map_err(|_| PeerError::ChannelClosed)
    }

    /// Declare the local Pokemon and boost allotment, emitting BattleSetup.
    pub fn start_battle(&self, stats: PokemonStats, boosts: StatBoosts) -> Result<(), PeerError> {
        self.send(Command::StartBattle { stats, boosts })
    }

    /// Submit a move for the current turn, optionally declaring a
    /// special-attack boost.
    pub fn submit_move(&self, move_name: &str, use_boost: bool) -> Result<(), PeerError> {
        self.send(Command::SubmitMove {
            move_name: move_name.to_string(),
            use_boost,
        })
    }

    /// Arm a special-defense boost for the next attack received.
    pub fn arm_defense_boost(&self) -> Result<(), PeerError> {
        self.send(Command::ArmDefenseBoost)
    }

    pub fn send_chat(&self, text: &str) -> Result<(), PeerError> {
        self.send(Command::Chat {
            text: text.to_string(),
        })
    }

    /// Send a Base64 sticker. Validation happens in the loop; an invalid
    /// payload is rejected locally and never transmitted.
    pub fn send_sticker(&self, data: &str) -> Result<(), PeerError> {
        self.send(Command::Sticker {
            data: data.to_string(),
        })
    }

    pub fn request_rematch(&self) -> Result<(), PeerError> {
        self.send(Command::Rematch)
    }

    pub fn shutdown(&self) -> Result<(), PeerError> {
        self.send(Command::Shutdown)
    }

    /// Latest status snapshot.
    pub fn status(&self) -> PeerStatus {
        self.status
            .read()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}
