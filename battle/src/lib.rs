//! Battle domain for the arbok peer-to-peer battle engine.
//!
//! This crate holds everything two peers must compute *identically* from the
//! shared session seed, plus the per-turn state machine that commits those
//! computations:
//!
//! ```text
//! arbok-protocol (wire format)
//!        │
//!        ▼
//! arbok-battle (domain types + deterministic engine) ← THIS CRATE
//!        │
//!        └─> arbok-peer (reliability, sessions, event loop)
//! ```
//!
//! # Main Types
//!
//! - [`Type`] - Pokemon types with their damage matchups
//! - [`PokemonStats`] - self-contained stat block exchanged at setup
//! - [`BattlePokemon`] - in-battle view: current HP and boost counters
//! - [`Move`] / [`MoveDex`] - built-in move table shared by both peers
//! - [`BattleRng`] - the documented deterministic generator (wire contract)
//! - [`DamageEngine`] - seeded damage computation
//! - [`BattleMachine`] - the four-step turn state machine

pub mod damage;
pub mod machine;
pub mod rng;
pub mod types;

pub use damage::{DamageEngine, TurnOutcome, LEVEL};
pub use machine::{
    BattleError, BattleMachine, BattlePhase, GameOverVerdict, PeerReport, Resolution, ReportCheck,
    TurnEnd,
};
pub use rng::BattleRng;
pub use types::{
    BattlePokemon, EffectTier, Move, MoveCategory, MoveDex, PokemonStats, StatBoosts, Type,
};
