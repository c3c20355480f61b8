//! Deterministic, portable random number generator for damage rolls.
//!
//! The cross-validation of `CalculationReport`s only works if both peers
//! produce bit-identical damage values, so the generator is part of the wire
//! contract and is specified exactly:
//!
//! - 64-bit linear congruential generator, Knuth MMIX constants:
//!   `state' = state * 6364136223846793005 + 1442695040888963407 (mod 2^64)`
//! - seeded by zero-extending the 32-bit session seed
//! - a unit draw advances the state once and maps the top 53 bits to an
//!   `f64` in `[0, 1)`
//!
//! Do not substitute a library RNG here and do not introduce any other
//! source of randomness into this module. Handshake and chat code must never
//! draw from this stream.

const MULTIPLIER: u64 = 6364136223846793005;
const INCREMENT: u64 = 1442695040888963407;

/// The shared-seed generator backing the damage engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BattleRng {
    state: u64,
}

impl BattleRng {
    /// Create a generator from the session seed exchanged at handshake.
    pub fn new(seed: u32) -> Self {
        Self { state: seed as u64 }
    }

    /// Advance the state and return it.
    fn next_state(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(MULTIPLIER)
            .wrapping_add(INCREMENT);
        self.state
    }

    /// Uniform `f64` in `[0, 1)` from the top 53 bits of the next state.
    /// 53 bits fill the full f64 mantissa (52 explicit + 1 implicit).
    pub fn next_unit(&mut self) -> f64 {
        (self.next_state() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// The per-turn damage modifier: uniform in `[0.85, 1.0)`.
    pub fn damage_roll(&mut self) -> f64 {
        0.85 + 0.15 * self.next_unit()
    }
}
