/// Facing direction and grid cells.
///
/// Grid coordinates grow right (x) and down (y), matching the stage files:
/// `up` is y - 1, `down` is y + 1.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Deserialize, Serialize)]
pub struct Cell {
    pub x: usize,
    pub y: usize,
}

impl Cell {
    pub const fn new(x: usize, y: usize) -> Self {
        Cell { x, y }
    }

    /// The neighbouring cell one step towards `facing`.
    /// `None` when that step would go below zero; the upper edge is the
    /// world's business since only it knows the grid size.
    pub fn step(self, facing: Facing) -> Option<Cell> {
        match facing {
            Facing::Up => self.y.checked_sub(1).map(|y| Cell::new(self.x, y)),
            Facing::Down => Some(Cell::new(self.x, self.y + 1)),
            Facing::Left => self.x.checked_sub(1).map(|x| Cell::new(x, self.y)),
            Facing::Right => Some(Cell::new(self.x + 1, self.y)),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    Up,
    Right,
    Down,
    Left,
}

impl Facing {
    /// 90° clockwise: up → right → down → left → up.
    pub fn turned_right(self) -> Facing {
        match self {
            Facing::Up => Facing::Right,
            Facing::Right => Facing::Down,
            Facing::Down => Facing::Left,
            Facing::Left => Facing::Up,
        }
    }

    /// 90° counter-clockwise.
    pub fn turned_left(self) -> Facing {
        match self {
            Facing::Up => Facing::Left,
            Facing::Left => Facing::Down,
            Facing::Down => Facing::Right,
            Facing::Right => Facing::Up,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Facing::Up => "up",
            Facing::Right => "right",
            Facing::Down => "down",
            Facing::Left => "left",
        }
    }

    /// Single-character marker used by the text grid.
    pub fn arrow(self) -> char {
        match self {
            Facing::Up => '^',
            Facing::Right => '>',
            Facing::Down => 'v',
            Facing::Left => '<',
        }
    }
}

impl fmt::Display for Facing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
