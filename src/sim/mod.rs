pub mod commands;
pub mod event;
pub mod interpreter;
pub mod program;
pub mod stages;
