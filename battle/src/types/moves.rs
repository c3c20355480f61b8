//! Built-in move table.
//!
//! Both peers resolve an announced `move_name` against this table, so it
//! must be identical on every build; moves are compiled in rather than
//! loaded from an external catalog.

use std::collections::HashMap;

use super::pokemon_type::Type;

/// Damage category: physical moves use Attack/Defense, special moves use
/// SpecialAttack/SpecialDefense and are the only ones affected by boosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveCategory {
    Physical,
    Special,
}

/// A damaging move.
#[derive(Debug, Clone, PartialEq)]
pub struct Move {
    pub name: String,
    pub power: u32,
    pub category: MoveCategory,
    pub move_type: Type,
}

impl Move {
    fn new(name: &str, power: u32, category: MoveCategory, move_type: Type) -> Self {
        Self {
            name: name.to_string(),
            power,
            category,
            move_type,
        }
    }
}

/// Lookup table of every known move, keyed by exact name.
#[derive(Debug, Clone)]
pub struct MoveDex {
    moves: HashMap<String, Move>,
}

impl MoveDex {
    /// The built-in move set: a handful of damaging moves per type.
    pub fn builtin() -> Self {
        use MoveCategory::{Physical, Special};

        let list = [
            // Fire
            Move::new("Ember", 40, Special, Type::Fire),
            Move::new("Flame Thrower", 90, Special, Type::Fire),
            Move::new("Fire Blast", 110, Special, Type::Fire),
            Move::new("Flame Charge", 50, Physical, Type::Fire),
            Move::new("Fire Fang", 65, Physical, Type::Fire),
            // Water
            Move::new("Water Gun", 40, Special, Type::Water),
            Move::new("Hydro Pump", 110, Special, Type::Water),
            Move::new("Surf", 90, Special, Type::Water),
            Move::new("Aqua Tail", 90, Physical, Type::Water),
            Move::new("Waterfall", 80, Physical, Type::Water),
            // Electric
            Move::new("Thunder Shock", 40, Special, Type::Electric),
            Move::new("Thunderbolt", 90, Special, Type::Electric),
            Move::new("Thunder", 110, Special, Type::Electric),
            Move::new("Wild Charge", 90, Physical, Type::Electric),
            Move::new("Thunder Punch", 75, Physical, Type::Electric),
            // Grass
            Move::new("Vine Whip", 45, Physical, Type::Grass),
            Move::new("Solar Beam", 120, Special, Type::Grass),
            Move::new("Leaf Blade", 90, Physical, Type::Grass),
            Move::new("Energy Ball", 90, Special, Type::Grass),
            Move::new("Seed Bomb", 80, Physical, Type::Grass),
            // Psychic
            Move::new("Confusion", 50, Special, Type::Psychic),
            Move::new("Psychic", 90, Special, Type::Psychic),
            Move::new("Psyshock", 80, Special, Type::Psychic),
            Move::new("Zen Headbutt", 80, Physical, Type::Psychic),
            Move::new("Psycho Cut", 70, Physical, Type::Psychic),
            // Normal
            Move::new("Tackle", 40, Physical, Type::Normal),
            Move::new("Body Slam", 85, Physical, Type::Normal),
            Move::new("Hyper Beam", 150, Special, Type::Normal),
            Move::new("Return", 102, Physical, Type::Normal),
            Move::new("Swift", 60, Special, Type::Normal),
            // Fighting
            Move::new("Karate Chop", 50, Physical, Type::Fighting),
            Move::new("Close Combat", 120, Physical, Type::Fighting),
            Move::new("Aura Sphere", 80, Special, Type::Fighting),
            Move::new("Brick Break", 75, Physical, Type::Fighting),
            Move::new("Focus Blast", 120, Special, Type::Fighting),
            // Poison
            Move::new("Poison Sting", 15, Physical, Type::Poison),
            Move::new("Sludge Bomb", 90, Special, Type::Poison),
            Move::new("Gunk Shot", 120, Physical, Type::Poison),
            Move::new("Acid", 40, Special, Type::Poison),
            Move::new("Cross Poison", 70, Physical, Type::Poison),
            // Bug
            Move::new("Bug Bite", 60, Physical, Type::Bug),
            Move::new("X-Scissor", 80, Physical, Type::Bug),
            Move::new("Bug Buzz", 90, Special, Type::Bug),
            Move::new("Signal Beam", 75, Special, Type::Bug),
            Move::new("Megahorn", 120, Physical, Type::Bug),
            // Dark
            Move::new("Bite", 60, Physical, Type::Dark),
            Move::new("Crunch", 80, Physical, Type::Dark),
            Move::new("Dark Pulse", 80, Special, Type::Dark),
            Move::new("Foul Play", 95, Physical, Type::Dark),
            Move::new("Night Slash", 70, Physical, Type::Dark),
            // Dragon
            Move::new("Dragon Breath", 60, Special, Type::Dragon),
            Move::new("Dragon Claw", 80, Physical, Type::Dragon),
            Move::new("Dragon Pulse", 85, Special, Type::Dragon),
            Move::new("Outrage", 120, Physical, Type::Dragon),
            // Fairy
            Move::new("Fairy Wind", 40, Special, Type::Fairy),
            Move::new("Moonblast", 95, Special, Type::Fairy),
            Move::new("Play Rough", 90, Physical, Type::Fairy),
            Move::new("Dazzling Gleam", 80, Special, Type::Fairy),
            // Flying
            Move::new("Peck", 35, Physical, Type::Flying),
            Move::new("Aerial Ace", 60, Physical, Type::Flying),
            Move::new("Fly", 90, Physical, Type::Flying),
            Move::new("Air Slash", 75, Special, Type::Flying),
            Move::new("Brave Bird", 120, Physical, Type::Flying),
            // Ghost
            Move::new("Lick", 30, Physical, Type::Ghost),
            Move::new("Shadow Ball", 80, Special, Type::Ghost),
            Move::new("Shadow Punch", 60, Physical, Type::Ghost),
            Move::new("Shadow Claw", 70, Physical, Type::Ghost),
            Move::new("Hex", 65, Special, Type::Ghost),
            // Ground
            Move::new("Mud Slap", 20, Special, Type::Ground),
            Move::new("Earthquake", 100, Physical, Type::Ground),
            Move::new("Earth Power", 90, Special, Type::Ground),
            Move::new("Bulldoze", 60, Physical, Type::Ground),
            Move::new("Stomping Tantrum", 75, Physical, Type::Ground),
            // Ice
            Move::new("Ice Beam", 90, Special, Type::Ice),
            Move::new("Ice Punch", 75, Physical, Type::Ice),
            Move::new("Blizzard", 110, Special, Type::Ice),
            Move::new("Ice Shard", 40, Physical, Type::Ice),
            Move::new("Avalanche", 60, Physical, Type::Ice),
            // Rock
            Move::new("Rock Throw", 50, Physical, Type::Rock),
            Move::new("Rock Slide", 75, Physical, Type::Rock),
            Move::new("Stone Edge", 100, Physical, Type::Rock),
            Move::new("Power Gem", 80, Special, Type::Rock),
            Move::new("Ancient Power", 60, Special, Type::Rock),
            // Steel
            Move::new("Metal Claw", 50, Physical, Type::Steel),
            Move::new("Iron Head", 80, Physical, Type::Steel),
            Move::new("Flash Cannon", 80, Special, Type::Steel),
            Move::new("Steel Wing", 70, Physical, Type::Steel),
            Move::new("Meteor Mash", 90, Physical, Type::Steel),
        ];

        let moves = list
            .into_iter()
            .map(|m| (m.name.clone(), m))
            .collect();
        Self { moves }
    }

    /// Look up a move by exact name.
    pub fn get(&self, name: &str) -> Option<&Move> {
        self.moves.get(name)
    }

    pub fn all_names(&self) -> Vec<&str> {
        self.moves.keys().map(|s| s.as_str()).collect()
    }

    pub fn moves_of_type(&self, move_type: Type) -> Vec<&Move> {
        self.moves
            .values()
            .filter(|m| m.move_type == move_type)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let dex = MoveDex::builtin();
        let bolt = dex.get("Thunderbolt").unwrap();
        assert_eq!(bolt.power, 90);
        assert_eq!(bolt.category, MoveCategory::Special);
        assert_eq!(bolt.move_type, Type::Electric);
        assert!(dex.get("Splash").is_none());
    }

    #[test]
    fn test_every_type_has_moves() {
        let dex = MoveDex::builtin();
        for t in [
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
        ] {
            assert!(!dex.moves_of_type(t).is_empty(), "no moves for {}", t);
        }
    }
}
