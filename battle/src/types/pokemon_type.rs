//! Elemental types and damage matchups.
//!
//! The matchup table below is what both peers' damage computations (and the
//! status-message tiers derived from it) depend on, so it is compiled in and
//! must never drift between builds.

use serde::{Deserialize, Serialize};

/// Elemental type of a Pokemon or a move.
///
/// The wire form, inside the `pokemon_data` literal of a BattleSetup, is
/// the lowercase name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Type {
    Normal,
    Fire,
    Water,
    Electric,
    Grass,
    Ice,
    Fighting,
    Poison,
    Ground,
    Flying,
    Psychic,
    Bug,
    Rock,
    Ghost,
    Dragon,
    Dark,
    Steel,
    Fairy,
}

const VARIANTS: [Type; 18] = [
    Type::Normal,
    Type::Fire,
    Type::Water,
    Type::Electric,
    Type::Grass,
    Type::Ice,
    Type::Fighting,
    Type::Poison,
    Type::Ground,
    Type::Flying,
    Type::Psychic,
    Type::Bug,
    Type::Rock,
    Type::Ghost,
    Type::Dragon,
    Type::Dark,
    Type::Steel,
    Type::Fairy,
];

const NAMES: [&str; 18] = [
    "normal", "fire", "water", "electric", "grass", "ice", "fighting", "poison", "ground",
    "flying", "psychic", "bug", "rock", "ghost", "dragon", "dark", "steel", "fairy",
];

impl Type {
    pub fn as_str(&self) -> &'static str {
        NAMES[*self as usize]
    }

    /// Parse a type name, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        let wanted = name.to_ascii_lowercase();
        VARIANTS.iter().copied().find(|t| t.as_str() == wanted)
    }

    /// Damage multiplier for a move of this type hitting a defender of the
    /// given type.
    ///
    /// Only the non-neutral matchups are enumerated, grouped by multiplier;
    /// every pair not listed is 1.0. This is the standard Gen-6+ matchup
    /// data for the eighteen types.
    pub fn effectiveness(&self, defender: Type) -> f64 {
        use Type::*;
        match (*self, defender) {
            // No effect at all.
            (Normal | Fighting, Ghost)
            | (Ghost, Normal)
            | (Electric, Ground)
            | (Ground, Flying)
            | (Psychic, Dark)
            | (Poison, Steel)
            | (Dragon, Fairy) => 0.0,

            // Doubled.
            (Fire, Grass | Ice | Bug | Steel)
            | (Water, Fire | Ground | Rock)
            | (Electric, Water | Flying)
            | (Grass, Water | Ground | Rock)
            | (Ice, Grass | Ground | Flying | Dragon)
            | (Fighting, Normal | Ice | Rock | Dark | Steel)
            | (Poison, Grass | Fairy)
            | (Ground, Fire | Electric | Poison | Rock | Steel)
            | (Flying, Grass | Fighting | Bug)
            | (Psychic, Fighting | Poison)
            | (Bug, Grass | Psychic | Dark)
            | (Rock, Fire | Ice | Flying | Bug)
            | (Ghost, Psychic | Ghost)
            | (Dragon, Dragon)
            | (Dark, Psychic | Ghost)
            | (Steel, Ice | Rock | Fairy)
            | (Fairy, Fighting | Dragon | Dark) => 2.0,

            // Halved.
            (Normal, Rock | Steel)
            | (Fire, Fire | Water | Rock | Dragon)
            | (Water, Water | Grass | Dragon)
            | (Electric, Electric | Grass | Dragon)
            | (Grass, Fire | Grass | Poison | Flying | Bug | Dragon | Steel)
            | (Ice, Fire | Water | Ice | Steel)
            | (Fighting, Poison | Flying | Psychic | Bug | Fairy)
            | (Poison, Poison | Ground | Rock | Ghost)
            | (Ground, Grass | Bug)
            | (Flying, Electric | Rock | Steel)
            | (Psychic, Psychic | Steel)
            | (Bug, Fire | Fighting | Poison | Flying | Ghost | Steel | Fairy)
            | (Rock, Fighting | Ground | Steel)
            | (Ghost, Dark)
            | (Dragon, Steel)
            | (Dark, Fighting | Dark | Fairy)
            | (Steel, Fire | Water | Electric | Steel)
            | (Fairy, Fire | Poison | Steel) => 0.5,

            _ => 1.0,
        }
    }

    /// Combined multiplier against a possibly dual-typed defender. The two
    /// matchups multiply, never add; a missing second type contributes a
    /// neutral 1.0.
    pub fn effectiveness_against(&self, primary: Type, secondary: Option<Type>) -> f64 {
        let first = self.effectiveness(primary);
        match secondary {
            Some(second) => first * self.effectiveness(second),
            None => first,
        }
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Effectiveness tier for status-message annotation. Both peers derive the
/// same tier from the same multiplier, keeping the status text deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectTier {
    NoEffect,
    NotVeryEffective,
    Neutral,
    SuperEffective,
}

impl EffectTier {
    pub fn classify(multiplier: f64) -> Self {
        if multiplier == 0.0 {
            EffectTier::NoEffect
        } else if multiplier < 1.0 {
            EffectTier::NotVeryEffective
        } else if multiplier > 1.0 {
            EffectTier::SuperEffective
        } else {
            EffectTier::Neutral
        }
    }

    /// Annotation appended to the turn's status message; empty for neutral.
    pub fn annotation(&self) -> &'static str {
        match self {
            EffectTier::NoEffect => " It barely has any effect...",
            EffectTier::NotVeryEffective => " It's not very effective...",
            EffectTier::Neutral => "",
            EffectTier::SuperEffective => " It's super effective!",
        }
    }
}
