/// Command registry: the primitive operations a program can issue.
///
/// Every command is `execute(world) -> bool`. The bool is the success flag;
/// failure is never out-of-band. Blocked moves, missing doors and missing
/// monsters are plain no-ops that return `false`.
///
/// ┌───────────┬───────────────────────────────────────────────┬─────────┐
/// │ Command    │ Effect                                        │ Returns │
/// ├───────────┼───────────────────────────────────────────────┼─────────┤
/// │ move       │ front blocked/off-grid → nothing               │ false   │
/// │            │ step; take coin; monster → incapacitated       │ false   │
/// │            │ step; take coin                                │ true    │
/// │ turn       │ rotate clockwise                               │ true    │
/// │ turnLeft   │ rotate counter-clockwise                       │ true    │
/// │ open       │ door in front → removed                        │ true    │
/// │ attack     │ monster in front → removed                     │ true    │
/// └───────────┴───────────────────────────────────────────────┴─────────┘
///
/// Once the world is incapacitated every command is a no-op returning false.

use std::fmt;

use tracing::debug;

use crate::domain::conditions;
use crate::domain::world::World;
use super::event::GameEvent;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Command {
    Move,
    Turn,
    TurnLeft,
    Open,
    Attack,
}

impl Command {
    pub const ALL: [Command; 5] = [
        Command::Move,
        Command::Turn,
        Command::TurnLeft,
        Command::Open,
        Command::Attack,
    ];

    /// Registry lookup by name. `right`/`left` are the turn names used by
    /// older program files.
    pub fn lookup(name: &str) -> Option<Command> {
        let found = Command::ALL
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(name));
        found.or_else(|| match name.to_ascii_lowercase().as_str() {
            "right" => Some(Command::Turn),
            "left" => Some(Command::TurnLeft),
            _ => None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Command::Move => "move",
            Command::Turn => "turn",
            Command::TurnLeft => "turnLeft",
            Command::Open => "open",
            Command::Attack => "attack",
        }
    }

    /// Palette label.
    pub fn label(self) -> &'static str {
        match self {
            Command::Move => "Move",
            Command::Turn => "Turn Right",
            Command::TurnLeft => "Turn Left",
            Command::Open => "Open",
            Command::Attack => "Attack",
        }
    }

    pub fn execute(self, world: &mut World, events: &mut Vec<GameEvent>) -> bool {
        if world.is_incapacitated() {
            return false;
        }
        let ok = match self {
            Command::Move => exec_move(world, events),
            Command::Turn => {
                world.set_facing(world.character().facing.turned_right());
                events.push(GameEvent::Turned { facing: world.character().facing });
                true
            }
            Command::TurnLeft => {
                world.set_facing(world.character().facing.turned_left());
                events.push(GameEvent::Turned { facing: world.character().facing });
                true
            }
            Command::Open => exec_open(world, events),
            Command::Attack => exec_attack(world, events),
        };
        debug!(command = self.name(), ok, "command executed");
        ok
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn exec_move(world: &mut World, events: &mut Vec<GameEvent>) -> bool {
    let here = world.character();
    let target = match world.front() {
        Some(c) if conditions::can_move_forward(world) => c,
        _ => {
            events.push(GameEvent::MoveBlocked { at: here.cell, facing: here.facing });
            return false;
        }
    };
    if !world.relocate(target) {
        events.push(GameEvent::MoveBlocked { at: here.cell, facing: here.facing });
        return false;
    }
    events.push(GameEvent::Moved { to: target });

    let hazard = world.occupant_at(target).is_hazard();
    if world.collect_coin(target) {
        events.push(GameEvent::CoinCollected { at: target });
    }
    // The step still happened; the run ends here.
    if hazard {
        world.incapacitate();
        events.push(GameEvent::Incapacitated { at: target });
        return false;
    }
    true
}

fn exec_open(world: &mut World, events: &mut Vec<GameEvent>) -> bool {
    match world.front() {
        Some(c) if world.open_door(c) => {
            events.push(GameEvent::DoorOpened { at: c });
            true
        }
        _ => {
            events.push(GameEvent::NothingToOpen);
            false
        }
    }
}

fn exec_attack(world: &mut World, events: &mut Vec<GameEvent>) -> bool {
    match world.front() {
        Some(c) if world.defeat_monster(c) => {
            events.push(GameEvent::MonsterDefeated { at: c });
            true
        }
        _ => {
            events.push(GameEvent::NothingToAttack);
            false
        }
    }
}

// ══════════════════════════════════════════════════════════════
// Unit tests
// ══════════════════════════════════════════════════════════════
