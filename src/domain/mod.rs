pub mod conditions;
pub mod direction;
pub mod stage;
pub mod tile;
pub mod world;
