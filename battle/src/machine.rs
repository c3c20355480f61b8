//! Per-turn battle state machine.
//!
//! Coordinates the four-step exchange that commits one turn:
//! AttackAnnounce → DefenseAnnounce → CalculationReport → CalculationConfirm,
//! with a Resolving detour when the peers' reports disagree.
//!
//! The machine is transport-free: it consumes decoded facts (a move was
//! announced, a report arrived, a confirm was acknowledged) and returns what
//! happened, leaving every send to the caller. It never holds references to
//! the session or the socket.

use thiserror::Error;

use crate::damage::{DamageEngine, TurnOutcome};
use crate::types::{BattlePokemon, Move, PokemonStats, StatBoosts};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum BattleError {
    #[error("Received an attack while holding the turn")]
    IllegalTurn,

    #[error("It is not this peer's turn to move")]
    NotYourTurn,

    #[error("No boost uses remaining")]
    NoBoostAvailable,

    #[error("Operation is not valid in the current battle phase")]
    WrongPhase,

    #[error("Battle is not fully set up")]
    NotReady,

    #[error("Turn bookkeeping was lost before the commit")]
    TurnStateLost,
}

/// Battle phases. Exactly one peer holds the turn at any quiescent point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BattlePhase {
    Setup,
    WaitingForMove,
    ProcessingTurn,
    Resolving,
    GameOver,
}

/// The two values cross-checked between peers each turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerReport {
    pub damage_dealt: u32,
    pub defender_hp_remaining: i32,
}

impl PeerReport {
    fn matches(&self, outcome: &TurnOutcome) -> bool {
        self.damage_dealt == outcome.damage_dealt
            && self.defender_hp_remaining == outcome.defender_hp_clamped()
    }
}

/// Result of feeding the counterparty's calculation report in.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportCheck {
    /// Values agree; the caller should send its CalculationConfirm.
    Match,
    /// Values disagree; the caller should enter resolution.
    Mismatch,
    /// Our own computation is not available yet; the report is buffered.
    Waiting,
}

/// Result of comparing the counterparty's resolution values.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Agreement reached; the turn completed with the returned end state.
    Agreed(TurnEnd),
    /// Second disagreement: the battle is dead.
    Desync,
}

/// A committed turn: the applied outcome, whose turn is next, and the
/// game-over verdict if the defender fell.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnEnd {
    pub outcome: TurnOutcome,
    pub my_turn: bool,
    pub game_over: Option<GameOverVerdict>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameOverVerdict {
    pub winner: String,
    pub loser: String,
    /// True when the local Pokemon dealt the lethal hit, i.e. this peer is
    /// the one that announces GameOver on the wire.
    pub announce: bool,
}

/// Everything remembered about the turn in flight.
#[derive(Debug, Clone)]
struct PendingTurn {
    mv: Move,
    attacker_is_me: bool,
    attacker_boost: bool,
    /// Unknown on the attacker side until DefenseAnnounce arrives.
    defender_boost: Option<bool>,
    /// The turn's single draw, kept for resolution re-evaluation.
    roll: Option<f64>,
    local: Option<TurnOutcome>,
    peer: Option<PeerReport>,
    confirm_sent: Option<u64>,
    confirm_acked: bool,
    peer_confirmed: bool,
    peer_resolution: Option<PeerReport>,
}

impl PendingTurn {
    fn new(mv: Move, attacker_is_me: bool, attacker_boost: bool) -> Self {
        Self {
            mv,
            attacker_is_me,
            attacker_boost,
            defender_boost: None,
            roll: None,
            local: None,
            peer: None,
            confirm_sent: None,
            confirm_acked: false,
            peer_confirmed: false,
            peer_resolution: None,
        }
    }
}

/// State machine for one battle between this peer and its counterparty.
pub struct BattleMachine {
    is_host: bool,
    phase: BattlePhase,
    my_turn: bool,
    engine: DamageEngine,
    me: Option<BattlePokemon>,
    opponent: Option<BattlePokemon>,
    pending: Option<PendingTurn>,
}

impl BattleMachine {
    /// A fresh battle seeded with the shared session seed. Host moves first.
    pub fn new(is_host: bool, seed: u32) -> Self {
        Self {
            is_host,
            phase: BattlePhase::Setup,
            my_turn: is_host,
            engine: DamageEngine::new(seed),
            me: None,
            opponent: None,
            pending: None,
        }
    }

    pub fn phase(&self) -> BattlePhase {
        self.phase
    }

    pub fn is_my_turn(&self) -> bool {
        self.my_turn && self.phase == BattlePhase::WaitingForMove
    }

    pub fn me(&self) -> Option<&BattlePokemon> {
        self.me.as_ref()
    }

    pub fn opponent(&self) -> Option<&BattlePokemon> {
        self.opponent.as_ref()
    }

    /// Register the local Pokemon (our own BattleSetup).
    pub fn set_me(&mut self, stats: PokemonStats, boosts: StatBoosts) {
        self.me = Some(BattlePokemon::new(stats, boosts));
        self.check_setup_complete();
    }

    /// Register the counterparty's Pokemon (their BattleSetup).
    pub fn set_opponent(&mut self, stats: PokemonStats, boosts: StatBoosts) {
        self.opponent = Some(BattlePokemon::new(stats, boosts));
        self.check_setup_complete();
    }

    fn check_setup_complete(&mut self) {
        if self.phase == BattlePhase::Setup && self.me.is_some() && self.opponent.is_some() {
            self.phase = BattlePhase::WaitingForMove;
        }
    }

    pub fn is_ready(&self) -> bool {
        self.phase != BattlePhase::Setup
    }

    /// Start our own attack. Consumes the attack boost when requested.
    /// The caller sends AttackAnnounce on success.
    pub fn begin_my_attack(&mut self, mv: Move, use_boost: bool) -> Result<(), BattleError> {
        if self.phase != BattlePhase::WaitingForMove {
            return Err(BattleError::WrongPhase);
        }
        if !self.my_turn {
            return Err(BattleError::NotYourTurn);
        }
        let me = self.me.as_mut().ok_or(BattleError::NotReady)?;
        if use_boost && !me.use_attack_boost() {
            return Err(BattleError::NoBoostAvailable);
        }
        self.pending = Some(PendingTurn::new(mv, true, use_boost));
        self.phase = BattlePhase::ProcessingTurn;
        Ok(())
    }

    /// Handle the counterparty's AttackAnnounce. On success the defense
    /// boost is consumed (when requested and available), the turn's roll is
    /// drawn and the local outcome computed; the caller sends
    /// DefenseAnnounce plus its CalculationReport.
    ///
    /// Returns the outcome and whether the defense boost actually engaged.
    pub fn begin_opponent_attack(
        &mut self,
        mv: Move,
        attacker_boost: bool,
        want_defense_boost: bool,
    ) -> Result<(TurnOutcome, bool), BattleError> {
        if self.phase == BattlePhase::WaitingForMove && self.my_turn {
            return Err(BattleError::IllegalTurn);
        }
        if self.phase != BattlePhase::WaitingForMove {
            return Err(BattleError::WrongPhase);
        }
        let me = self.me.as_mut().ok_or(BattleError::NotReady)?;
        let defense_boost = want_defense_boost && me.use_defense_boost();

        let mut pending = PendingTurn::new(mv, false, attacker_boost);
        pending.defender_boost = Some(defense_boost);

        let roll = self.engine.draw_roll();
        pending.roll = Some(roll);
        let outcome = {
            let attacker = self.opponent.as_ref().ok_or(BattleError::NotReady)?;
            let defender = self.me.as_ref().ok_or(BattleError::NotReady)?;
            self.engine
                .compute(attacker, defender, &pending.mv, attacker_boost, defense_boost, roll)
        };
        pending.local = Some(outcome.clone());
        self.pending = Some(pending);
        self.phase = BattlePhase::ProcessingTurn;
        Ok((outcome, defense_boost))
    }

    /// Handle the counterparty's DefenseAnnounce on the attacker side: the
    /// defender's boost flag completes the inputs, so the roll is drawn and
    /// the local outcome computed. Returns `None` on a stale or duplicate
    /// announce.
    pub fn on_defense_announced(&mut self, defender_boost: bool) -> Option<TurnOutcome> {
        let pending = self.pending.as_mut()?;
        if !pending.attacker_is_me || pending.defender_boost.is_some() {
            return None;
        }
        pending.defender_boost = Some(defender_boost);

        let roll = self.engine.draw_roll();
        pending.roll = Some(roll);
        let outcome = {
            let attacker = self.me.as_ref()?;
            let defender = self.opponent.as_ref()?;
            self.engine.compute(
                attacker,
                defender,
                &pending.mv,
                pending.attacker_boost,
                defender_boost,
                roll,
            )
        };
        pending.local = Some(outcome.clone());
        Some(outcome)
    }

    /// Our computation for the turn in flight, if done.
    pub fn local_outcome(&self) -> Option<&TurnOutcome> {
        self.pending.as_ref().and_then(|p| p.local.as_ref())
    }

    /// Overwrite the outgoing report values (fault injection for exercising
    /// the discrepancy path in tests; never used in a healthy battle).
    pub fn skew_local_report(&mut self, damage_delta: i32) {
        if let Some(outcome) = self.pending.as_mut().and_then(|p| p.local.as_mut()) {
            outcome.damage_dealt = (outcome.damage_dealt as i32 + damage_delta).max(0) as u32;
            outcome.defender_hp_remaining -= damage_delta;
        }
    }

    /// Feed in the counterparty's CalculationReport values. A report
    /// arriving before our own computation is buffered, not lost.
    pub fn record_peer_report(&mut self, report: PeerReport) -> ReportCheck {
        let Some(pending) = self.pending.as_mut() else {
            return ReportCheck::Waiting;
        };
        pending.peer = Some(report);
        match pending.local.as_ref() {
            Some(local) if report.matches(local) => ReportCheck::Match,
            Some(_) => ReportCheck::Mismatch,
            None => ReportCheck::Waiting,
        }
    }

    /// Compare a buffered peer report once the local outcome exists. Call
    /// after [`on_defense_announced`] to catch reports that raced ahead.
    ///
    /// [`on_defense_announced`]: Self::on_defense_announced
    pub fn check_buffered_report(&mut self) -> Option<ReportCheck> {
        let pending = self.pending.as_ref()?;
        let report = pending.peer?;
        pending.local.as_ref()?;
        Some(self.record_peer_report(report))
    }

    /// Record that our CalculationConfirm went out under `seq`. When the
    /// counterparty's confirm raced ahead of ours, this is the moment the
    /// turn completes.
    pub fn confirm_sent(&mut self, seq: u64) -> Result<Option<TurnEnd>, BattleError> {
        if let Some(pending) = self.pending.as_mut() {
            pending.confirm_sent = Some(seq);
        }
        self.try_complete()
    }

    /// The counterparty confirmed our calculation.
    pub fn on_peer_confirm(&mut self) -> Result<Option<TurnEnd>, BattleError> {
        match self.pending.as_mut() {
            Some(pending) => pending.peer_confirmed = true,
            None => return Ok(None),
        }
        self.try_complete()
    }

    /// An ACK arrived; if it covers our confirm, the turn can complete even
    /// when the peer's confirm itself is still in flight.
    pub fn on_ack(&mut self, seq: u64) -> Result<Option<TurnEnd>, BattleError> {
        let Some(pending) = self.pending.as_mut() else {
            return Ok(None);
        };
        if pending.confirm_sent == Some(seq) {
            pending.confirm_acked = true;
            return self.try_complete();
        }
        Ok(None)
    }

    fn try_complete(&mut self) -> Result<Option<TurnEnd>, BattleError> {
        if self.phase != BattlePhase::ProcessingTurn {
            return Ok(None);
        }
        let Some(pending) = self.pending.as_ref() else {
            return Ok(None);
        };
        if pending.confirm_sent.is_some() && (pending.peer_confirmed || pending.confirm_acked) {
            return self.complete_turn().map(Some);
        }
        Ok(None)
    }

    /// Enter the Resolving phase and produce this side's resolution values:
    /// a clean re-evaluation of the turn from its recorded inputs, reusing
    /// the already-drawn roll. The caller sends a ResolutionRequest.
    pub fn enter_resolution(&mut self) -> Option<TurnOutcome> {
        let pending = self.pending.as_mut()?;
        let roll = pending.roll?;
        let attacker_boost = pending.attacker_boost;
        let defender_boost = pending.defender_boost.unwrap_or(false);
        let (attacker, defender) = if pending.attacker_is_me {
            (self.me.as_ref()?, self.opponent.as_ref()?)
        } else {
            (self.opponent.as_ref()?, self.me.as_ref()?)
        };
        let outcome = self.engine.compute(
            attacker,
            defender,
            &pending.mv,
            attacker_boost,
            defender_boost,
            roll,
        );
        pending.local = Some(outcome.clone());
        self.phase = BattlePhase::Resolving;
        Some(outcome)
    }

    /// Feed in the counterparty's ResolutionRequest values. Buffered when we
    /// have not yet detected the mismatch ourselves; otherwise compared
    /// against our own re-evaluation.
    pub fn record_peer_resolution(
        &mut self,
        values: PeerReport,
    ) -> Result<Option<Resolution>, BattleError> {
        let Some(pending) = self.pending.as_mut() else {
            return Ok(None);
        };
        pending.peer_resolution = Some(values);
        if self.phase != BattlePhase::Resolving {
            return Ok(None);
        }
        self.resolve().map(Some)
    }

    /// Compare buffered resolution values after entering Resolving.
    pub fn check_buffered_resolution(&mut self) -> Result<Option<Resolution>, BattleError> {
        if self.phase != BattlePhase::Resolving {
            return Ok(None);
        }
        let buffered = self.pending.as_ref().and_then(|p| p.peer_resolution);
        if buffered.is_none() {
            return Ok(None);
        }
        self.resolve().map(Some)
    }

    fn resolve(&mut self) -> Result<Resolution, BattleError> {
        let matched = {
            let pending = self.pending.as_ref().ok_or(BattleError::TurnStateLost)?;
            match (pending.peer_resolution, pending.local.as_ref()) {
                (Some(values), Some(local)) => values.matches(local),
                _ => return Err(BattleError::TurnStateLost),
            }
        };
        if matched {
            Ok(Resolution::Agreed(self.complete_turn()?))
        } else {
            self.phase = BattlePhase::GameOver;
            Ok(Resolution::Desync)
        }
    }

    /// Apply the agreed outcome, flip the turn, and detect game over.
    fn complete_turn(&mut self) -> Result<TurnEnd, BattleError> {
        let pending = self.pending.take().ok_or(BattleError::TurnStateLost)?;
        let Some(outcome) = pending.local else {
            return Err(BattleError::TurnStateLost);
        };

        let attacker_name = if pending.attacker_is_me {
            self.me.as_ref()
        } else {
            self.opponent.as_ref()
        }
        .map(|p| p.name().to_string())
        .unwrap_or_default();
        let defender = if pending.attacker_is_me {
            self.opponent.as_mut()
        } else {
            self.me.as_mut()
        }
        .ok_or(BattleError::TurnStateLost)?;
        defender.take_damage(outcome.damage_dealt);

        // The unclamped engine value decides the verdict, not the displayed
        // HP.
        let defender_fainted = outcome.is_lethal();
        let verdict = defender_fainted.then(|| GameOverVerdict {
            winner: attacker_name,
            loser: defender.name().to_string(),
            announce: pending.attacker_is_me,
        });

        if defender_fainted {
            self.phase = BattlePhase::GameOver;
        } else {
            self.phase = BattlePhase::WaitingForMove;
            self.my_turn = !self.my_turn;
        }

        Ok(TurnEnd {
            outcome,
            my_turn: self.my_turn && self.phase == BattlePhase::WaitingForMove,
            game_over: verdict,
        })
    }

    /// The counterparty announced game over (its attack was lethal).
    pub fn on_game_over_message(&mut self) {
        self.phase = BattlePhase::GameOver;
        self.pending = None;
    }

    /// Abort the battle (peer lost, desync).
    pub fn abort(&mut self) {
        self.phase = BattlePhase::GameOver;
        self.pending = None;
    }

    pub fn is_host(&self) -> bool {
        self.is_host
    }
}
