//! Stat blocks exchanged at battle setup.

use serde::{Deserialize, Serialize};

use super::pokemon_type::Type;

/// Full base stat block for one Pokemon.
///
/// A `BattleSetup` carries this whole struct as a JSON literal so that each
/// recipient is self-contained; correctness never depends on both peers
/// sharing a catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PokemonStats {
    pub name: String,
    pub hp: i32,
    pub attack: i32,
    pub defense: i32,
    pub sp_attack: i32,
    pub sp_defense: i32,
    pub speed: i32,
    pub type1: Type,
    #[serde(default)]
    pub type2: Option<Type>,
}

impl PokemonStats {
    pub fn types(&self) -> (Type, Option<Type>) {
        (self.type1, self.type2)
    }

    /// True when the given type matches either of this Pokemon's types
    /// (the STAB condition when applied to a move's type).
    pub fn has_type(&self, t: Type) -> bool {
        self.type1 == t || self.type2 == Some(t)
    }
}

/// Consumable boost allotment declared at setup: how many times each special
/// stat may be multiplied by 1.5 over the course of the battle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatBoosts {
    #[serde(default = "default_uses")]
    pub special_attack_uses: u32,
    #[serde(default = "default_uses")]
    pub special_defense_uses: u32,
}

fn default_uses() -> u32 {
    5
}

impl Default for StatBoosts {
    fn default() -> Self {
        Self {
            special_attack_uses: 5,
            special_defense_uses: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub fn pikachu() -> PokemonStats {
        PokemonStats {
            name: "Pikachu".into(),
            hp: 35,
            attack: 55,
            defense: 40,
            sp_attack: 50,
            sp_defense: 50,
            speed: 90,
            type1: Type::Electric,
            type2: None,
        }
    }

    #[test]
    fn test_json_round_trip() {
        let stats = pikachu();
        let json = serde_json::to_string(&stats).unwrap();
        let back: PokemonStats = serde_json::from_str(&json).unwrap();
        assert_eq!(back, stats);
    }

    #[test]
    fn test_types_serialize_lowercase() {
        let json = serde_json::to_string(&pikachu()).unwrap();
        assert!(json.contains(r#""type1":"electric""#));
        assert!(json.contains(r#""type2":null"#));
    }

    #[test]
    fn test_missing_type2_defaults_to_none() {
        let json = r#"{"name":"Pikachu","hp":35,"attack":55,"defense":40,
                       "sp_attack":50,"sp_defense":50,"speed":90,"type1":"electric"}"#;
        let stats: PokemonStats = serde_json::from_str(json).unwrap();
        assert_eq!(stats.type2, None);
    }

    #[test]
    fn test_has_type() {
        let mut stats = pikachu();
        assert!(stats.has_type(Type::Electric));
        assert!(!stats.has_type(Type::Flying));
        stats.type2 = Some(Type::Flying);
        assert!(stats.has_type(Type::Flying));
    }

    #[test]
    fn test_boosts_default_allotment() {
        let boosts: StatBoosts = serde_json::from_str("{}").unwrap();
        assert_eq!(boosts.special_attack_uses, 5);
        assert_eq!(boosts.special_defense_uses, 5);
    }
}
