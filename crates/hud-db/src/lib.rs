//! SQLite persistence for hud: plan slots, the memory log, the history
//! cursor, and rule definitions.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;
