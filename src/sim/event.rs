/// Events emitted while a program executes.
/// The presentation layer consumes these for status messages and logging.

use crate::domain::direction::{Cell, Facing};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GameEvent {
    Moved { to: Cell },
    MoveBlocked { at: Cell, facing: Facing },
    Turned { facing: Facing },
    CoinCollected { at: Cell },
    DoorOpened { at: Cell },
    MonsterDefeated { at: Cell },
    NothingToOpen,
    NothingToAttack,
    Incapacitated { at: Cell },
    UnknownCommand { name: String },
    OrphanedBranch { index: usize },
    StageCleared,
}

impl GameEvent {
    /// Short human-readable line for the status bar / headless output.
    pub fn describe(&self) -> String {
        match self {
            GameEvent::Moved { to } => format!("moved to {to}"),
            GameEvent::MoveBlocked { at, facing } => format!("blocked at {at} facing {facing}"),
            GameEvent::Turned { facing } => format!("now facing {facing}"),
            GameEvent::CoinCollected { at } => format!("coin collected at {at}"),
            GameEvent::DoorOpened { at } => format!("door opened at {at}"),
            GameEvent::MonsterDefeated { at } => format!("monster defeated at {at}"),
            GameEvent::NothingToOpen => "no door to open".to_string(),
            GameEvent::NothingToAttack => "nothing to attack".to_string(),
            GameEvent::Incapacitated { at } => format!("walked into a monster at {at}"),
            GameEvent::UnknownCommand { name } => format!("unknown command '{name}' ignored"),
            GameEvent::OrphanedBranch { index } => format!("branch #{} has no open if, skipped", index + 1),
            GameEvent::StageCleared => "stage cleared".to_string(),
        }
    }
}
