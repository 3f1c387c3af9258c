/// Branch conditions: pure predicates over the world.
///
/// No side effects: these only look at the cell in front of the character.
/// "In front" = current cell offset one step in the facing direction.
///
/// ┌──────────────────┬──────────────────────────────────────────────┐
/// │ Condition         │ True iff the cell in front ...              │
/// ├──────────────────┼──────────────────────────────────────────────┤
/// │ canMoveForward    │ is in bounds, not an obstacle, not a door   │
/// │ monsterInFront    │ is in bounds and holds a monster            │
/// │ doorInFront       │ is in bounds and holds a closed door        │
/// │ coinInFront       │ is in bounds and holds a coin               │
/// └──────────────────┴──────────────────────────────────────────────┘

use std::fmt;
use std::str::FromStr;

use super::world::World;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Condition {
    CanMoveForward,
    MonsterInFront,
    DoorInFront,
    CoinInFront,
}

impl Condition {
    pub const ALL: [Condition; 4] = [
        Condition::CanMoveForward,
        Condition::MonsterInFront,
        Condition::DoorInFront,
        Condition::CoinInFront,
    ];

    pub fn evaluate(self, world: &World) -> bool {
        match self {
            Condition::CanMoveForward => can_move_forward(world),
            Condition::MonsterInFront => monster_in_front(world),
            Condition::DoorInFront => door_in_front(world),
            Condition::CoinInFront => coin_in_front(world),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Condition::CanMoveForward => "canMoveForward",
            Condition::MonsterInFront => "monsterInFront",
            Condition::DoorInFront => "doorInFront",
            Condition::CoinInFront => "coinInFront",
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Unrecognized condition name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCondition(pub String);

impl FromStr for Condition {
    type Err = UnknownCondition;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Condition::ALL
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownCondition(s.to_string()))
    }
}

pub fn can_move_forward(world: &World) -> bool {
    world.front().is_some_and(|c| world.is_enterable(c))
}

pub fn monster_in_front(world: &World) -> bool {
    world.front().is_some_and(|c| world.has_monster(c))
}

pub fn door_in_front(world: &World) -> bool {
    world.front().is_some_and(|c| world.has_door(c))
}

pub fn coin_in_front(world: &World) -> bool {
    world.front().is_some_and(|c| world.has_coin(c))
}
