/// What occupies a grid cell, as seen by queries and the text grid.
/// Properties are queried via methods, not stored as flags,
/// so occupancy semantics are centralized here.

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum Occupant {
    #[default]
    Empty,
    Obstacle, // Impassable, permanent
    Door,     // Impassable until opened
    Monster,  // Passable, but entering incapacitates
    Coin,     // Collected on entry
    EndPoint, // Goal cell
}

impl Occupant {
    /// Can the character enter this cell?
    pub fn is_passable(self) -> bool {
        !matches!(self, Occupant::Obstacle | Occupant::Door)
    }

    /// Does entering this cell end the run?
    pub fn is_hazard(self) -> bool {
        matches!(self, Occupant::Monster)
    }

    /// Legend character for the plain text grid.
    pub fn glyph(self) -> char {
        match self {
            Occupant::Empty => '.',
            Occupant::Obstacle => '#',
            Occupant::Door => 'D',
            Occupant::Monster => 'M',
            Occupant::Coin => '$',
            Occupant::EndPoint => 'E',
        }
    }
}
