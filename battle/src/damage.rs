//! Seeded damage computation, reproduced identically on both peers.

use crate::rng::BattleRng;
use crate::types::{BattlePokemon, EffectTier, Move, MoveCategory};

/// All battles run at a fixed level.
pub const LEVEL: u32 = 50;

const BOOST_MULTIPLIER: f64 = 1.5;
const STAB_MULTIPLIER: f64 = 1.5;

/// Result of one turn's damage computation. The two peers cross-validate
/// `damage_dealt` and `defender_hp_remaining`; `status_message` is derived
/// deterministically from the same inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub attacker: String,
    pub move_used: String,
    pub damage_dealt: u32,
    /// Unclamped: negative values decide game over; clamp at 0 for display
    /// and for the wire report.
    pub defender_hp_remaining: i32,
    pub status_message: String,
}

impl TurnOutcome {
    /// Wire/display form of the defender's HP.
    pub fn defender_hp_clamped(&self) -> i32 {
        self.defender_hp_remaining.max(0)
    }

    pub fn is_lethal(&self) -> bool {
        self.defender_hp_remaining <= 0
    }
}

/// Damage engine holding the per-session random stream.
///
/// Exactly one draw is taken per turn; every arithmetic step below is `f64`
/// in a fixed order, which both peers must follow bit-for-bit.
#[derive(Debug, Clone)]
pub struct DamageEngine {
    rng: BattleRng,
}

impl DamageEngine {
    pub fn new(seed: u32) -> Self {
        Self {
            rng: BattleRng::new(seed),
        }
    }

    /// Reset the stream, e.g. when the session seed arrives or a rematch
    /// starts over.
    pub fn reseed(&mut self, seed: u32) {
        self.rng = BattleRng::new(seed);
    }

    /// Take the turn's single draw from the shared stream. Callers keep the
    /// returned roll with the turn record so discrepancy resolution can
    /// re-evaluate without advancing the stream.
    pub fn draw_roll(&mut self) -> f64 {
        self.rng.damage_roll()
    }

    /// Pure computation of a turn with an already-drawn modifier.
    pub fn compute(
        &self,
        attacker: &BattlePokemon,
        defender: &BattlePokemon,
        mv: &Move,
        attacker_boost: bool,
        defender_boost: bool,
        random: f64,
    ) -> TurnOutcome {
        compute_outcome(attacker, defender, mv, attacker_boost, defender_boost, random)
    }

    /// Draw and compute in one step, for callers that never resolve
    /// discrepancies (tests, spectating tools).
    pub fn turn_outcome(
        &mut self,
        attacker: &BattlePokemon,
        defender: &BattlePokemon,
        mv: &Move,
        attacker_boost: bool,
        defender_boost: bool,
    ) -> TurnOutcome {
        let random = self.draw_roll();
        self.compute(attacker, defender, mv, attacker_boost, defender_boost, random)
    }
}

/// The damage formula at level 50:
///
/// ```text
/// base   = (2 * 50 / 5 + 2) * power * a / d / 50 + 2
/// damage = max(1, floor(base * stab * type1 * type2 * random))
/// ```
///
/// `a`/`d` are the category-selected stats, multiplied by 1.5 (in f64, no
/// intermediate truncation) when the corresponding boost is active.
fn compute_outcome(
    attacker: &BattlePokemon,
    defender: &BattlePokemon,
    mv: &Move,
    attacker_boost: bool,
    defender_boost: bool,
    random: f64,
) -> TurnOutcome {
    let (mut a, mut d) = match mv.category {
        MoveCategory::Physical => (attacker.stats.attack as f64, defender.stats.defense as f64),
        MoveCategory::Special => (
            attacker.stats.sp_attack as f64,
            defender.stats.sp_defense as f64,
        ),
    };
    // Boosts only apply to the special stats.
    if mv.category == MoveCategory::Special {
        if attacker_boost {
            a *= BOOST_MULTIPLIER;
        }
        if defender_boost {
            d *= BOOST_MULTIPLIER;
        }
    }

    let stab = if attacker.stats.has_type(mv.move_type) {
        STAB_MULTIPLIER
    } else {
        1.0
    };
    let (def_type1, def_type2) = defender.stats.types();
    let type1 = mv.move_type.effectiveness(def_type1);
    let type2 = def_type2
        .map(|t| mv.move_type.effectiveness(t))
        .unwrap_or(1.0);

    // Fixed evaluation order; every operand is f64.
    let base = (2.0 * LEVEL as f64 / 5.0 + 2.0) * mv.power as f64 * a / d / 50.0 + 2.0;
    let damage = (base * stab * type1 * type2 * random).floor().max(1.0) as u32;

    let tier = EffectTier::classify(type1 * type2);
    let status_message = format!(
        "{} used {}!{} {} took {} damage!",
        attacker.name(),
        mv.name,
        tier.annotation(),
        defender.name(),
        damage
    );

    TurnOutcome {
        attacker: attacker.name().to_string(),
        move_used: mv.name.clone(),
        damage_dealt: damage,
        defender_hp_remaining: defender.current_hp - damage as i32,
        status_message,
    }
}
