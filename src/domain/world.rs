/// World: the mutable play state cloned from a [`Stage`].
///
/// ## Ownership
///
/// The interpreter holds the single mutable `World`. The canonical stage is
/// only read once, in `World::from_stage`, and reset re-clones from it.
///
/// ## Invariants
///
///   - The character is always in bounds and never on an obstacle or a
///     closed door. `relocate()` is the only way to move it and refuses
///     such cells.
///   - Entities only ever disappear (door opened, coin collected, monster
///     defeated); nothing is added after construction.
///   - Once `incapacitated` is set it stays set until the world is replaced.

use std::collections::BTreeSet;

use super::direction::{Cell, Facing};
use super::stage::Stage;
use super::tile::Occupant;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Character {
    pub cell: Cell,
    pub facing: Facing,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct World {
    grid_size: usize,
    character: Character,
    obstacles: BTreeSet<Cell>,
    doors: BTreeSet<Cell>,
    monsters: BTreeSet<Cell>,
    coins: BTreeSet<Cell>,
    end_point: Cell,
    coins_total: usize,
    incapacitated: bool,
}

// ── Construction ──

impl World {
    /// Deep copy of a stage into a fresh play state.
    pub fn from_stage(stage: &Stage) -> Self {
        let coins: BTreeSet<Cell> = stage.coins.iter().copied().collect();
        World {
            grid_size: stage.grid_size,
            character: Character {
                cell: stage.character.cell(),
                facing: stage.character.direction,
            },
            obstacles: stage.obstacles.iter().copied().collect(),
            doors: stage.doors.iter().copied().collect(),
            monsters: stage.monsters.iter().copied().collect(),
            coins_total: coins.len(),
            coins,
            end_point: stage.end_point,
            incapacitated: false,
        }
    }
}

// ── Queries ──

impl World {
    pub fn grid_size(&self) -> usize {
        self.grid_size
    }

    pub fn character(&self) -> Character {
        self.character
    }

    pub fn end_point(&self) -> Cell {
        self.end_point
    }

    #[inline]
    pub fn in_bounds(&self, cell: Cell) -> bool {
        cell.x < self.grid_size && cell.y < self.grid_size
    }

    pub fn is_obstacle(&self, cell: Cell) -> bool {
        self.obstacles.contains(&cell)
    }

    pub fn has_door(&self, cell: Cell) -> bool {
        self.doors.contains(&cell)
    }

    pub fn has_monster(&self, cell: Cell) -> bool {
        self.monsters.contains(&cell)
    }

    pub fn has_coin(&self, cell: Cell) -> bool {
        self.coins.contains(&cell)
    }

    /// Can the character stand on `cell`? Out of bounds = wall.
    pub fn is_enterable(&self, cell: Cell) -> bool {
        self.in_bounds(cell) && self.occupant_at(cell).is_passable()
    }

    /// The cell one step ahead of the character, if it is on the grid.
    pub fn front(&self) -> Option<Cell> {
        self.character
            .cell
            .step(self.character.facing)
            .filter(|c| self.in_bounds(*c))
    }

    /// Highest-priority occupant of a cell, for display.
    /// Obstacle > Door > Monster > Coin > EndPoint.
    pub fn occupant_at(&self, cell: Cell) -> Occupant {
        if self.is_obstacle(cell) {
            Occupant::Obstacle
        } else if self.has_door(cell) {
            Occupant::Door
        } else if self.has_monster(cell) {
            Occupant::Monster
        } else if self.has_coin(cell) {
            Occupant::Coin
        } else if cell == self.end_point {
            Occupant::EndPoint
        } else {
            Occupant::Empty
        }
    }

    pub fn coins_remaining(&self) -> usize {
        self.coins.len()
    }

    pub fn coins_total(&self) -> usize {
        self.coins_total
    }

    pub fn coins_collected(&self) -> usize {
        self.coins_total - self.coins_remaining()
    }

    pub fn monsters_remaining(&self) -> usize {
        self.monsters.len()
    }

    pub fn doors_remaining(&self) -> usize {
        self.doors.len()
    }

    pub fn at_end_point(&self) -> bool {
        self.character.cell == self.end_point
    }

    /// Win needs both: every coin collected AND standing on the end point.
    pub fn is_cleared(&self) -> bool {
        self.coins_remaining() == 0 && self.at_end_point()
    }

    pub fn is_incapacitated(&self) -> bool {
        self.incapacitated
    }
}

// ── Mutation ──

impl World {
    pub fn set_facing(&mut self, facing: Facing) {
        self.character.facing = facing;
    }

    /// Move the character to `cell`. Refuses out-of-bounds, obstacle and
    /// closed-door cells; returns whether the character moved.
    pub fn relocate(&mut self, cell: Cell) -> bool {
        if !self.is_enterable(cell) {
            return false;
        }
        self.character.cell = cell;
        true
    }

    pub fn open_door(&mut self, cell: Cell) -> bool {
        self.doors.remove(&cell)
    }

    /// Remove the coin at `cell`. A second call on the same cell is a no-op.
    pub fn collect_coin(&mut self, cell: Cell) -> bool {
        self.coins.remove(&cell)
    }

    pub fn defeat_monster(&mut self, cell: Cell) -> bool {
        self.monsters.remove(&cell)
    }

    pub fn incapacitate(&mut self) {
        self.incapacitated = true;
    }
}
