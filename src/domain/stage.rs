/// Stage definitions: the canonical, immutable level data.
///
/// Stages are read from `stages.json` (or the embedded set) and never mutated.
/// Play happens on a [`World`](super::world::World) cloned from a stage.
///
/// ## JSON shape
///   ```json
///   {
///     "name": "First Steps",
///     "gridSize": 5,
///     "character": { "x": 0, "y": 0, "direction": "right" },
///     "obstacles": [{ "x": 2, "y": 2 }],
///     "doors": [], "monsters": [], "coins": [{ "x": 4, "y": 0 }],
///     "endPoint": { "x": 4, "y": 4 }
///   }
///   ```
/// Entity lists default to empty when omitted.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::direction::{Cell, Facing};

/// Largest playable grid; anything wider no longer fits a terminal.
pub const MAX_GRID: usize = 32;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    #[serde(default)]
    pub name: String,
    pub grid_size: usize,
    pub character: StartPose,
    #[serde(default)]
    pub obstacles: Vec<Cell>,
    #[serde(default)]
    pub doors: Vec<Cell>,
    #[serde(default)]
    pub monsters: Vec<Cell>,
    #[serde(default)]
    pub coins: Vec<Cell>,
    pub end_point: Cell,
}

/// Initial character position and facing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct StartPose {
    pub x: usize,
    pub y: usize,
    #[serde(alias = "dir")]
    pub direction: Facing,
}

impl StartPose {
    pub fn cell(&self) -> Cell {
        Cell::new(self.x, self.y)
    }
}

/// Why a stage definition cannot be played.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StageDefect {
    #[error("grid size must be positive")]
    EmptyGrid,
    #[error("grid size {size} exceeds the maximum of {max}")]
    TooLarge { size: usize, max: usize },
    #[error("{what} at {cell} lies outside the {size}x{size} grid")]
    OutOfBounds { what: &'static str, cell: Cell, size: usize },
    #[error("character starts on a blocked cell {cell}")]
    StartBlocked { cell: Cell },
}

impl Stage {
    /// Check the coordinate invariant: every entity lies within [0, gridSize),
    /// and the character does not start inside an obstacle or a door.
    pub fn validate(&self) -> Result<(), StageDefect> {
        let size = self.grid_size;
        if size == 0 {
            return Err(StageDefect::EmptyGrid);
        }
        if size > MAX_GRID {
            return Err(StageDefect::TooLarge { size, max: MAX_GRID });
        }
        let in_bounds = |c: &Cell| c.x < size && c.y < size;

        let start = self.character.cell();
        if !in_bounds(&start) {
            return Err(StageDefect::OutOfBounds { what: "character", cell: start, size });
        }
        if !in_bounds(&self.end_point) {
            return Err(StageDefect::OutOfBounds { what: "end point", cell: self.end_point, size });
        }

        let lists: [(&'static str, &[Cell]); 4] = [
            ("obstacle", &self.obstacles),
            ("door", &self.doors),
            ("monster", &self.monsters),
            ("coin", &self.coins),
        ];
        for (what, cells) in lists {
            if let Some(cell) = cells.iter().find(|c| !in_bounds(*c)) {
                return Err(StageDefect::OutOfBounds { what, cell: *cell, size });
            }
        }

        if self.obstacles.contains(&start) || self.doors.contains(&start) {
            return Err(StageDefect::StartBlocked { cell: start });
        }
        Ok(())
    }
}
