pub mod history;
pub mod memory;
pub mod plans;
pub mod rules;
