pub mod formula;
pub mod gateway;
pub mod history;
pub mod memory;
pub mod plan;
pub mod rules;
